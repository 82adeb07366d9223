#[cfg(test)]
mod property_tests {
    use ndarray::{Array1, Array2, Array3};
    use ndarray_rand::rand_distr::{StandardNormal, Uniform};
    use ndarray_rand::RandomExt;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use trajopt::gps::core::{forward_pass, kl_divergence};
    use trajopt::gps::TrustRegion;
    use trajopt::ilqr::Regularization;
    use trajopt::riccati::{activation_mask, LinearGaussianControl, LinearGaussianDynamics};
    use trajopt::types::BoxSpace;

    // Random controller with diagonal action noise in [0.1, 2]
    fn random_controller(nb_xdim: usize, nb_udim: usize, nb_steps: usize, seed: u64) -> LinearGaussianControl {
        let mut rng = StdRng::seed_from_u64(seed);
        let gain = Array3::<f64>::random_using((nb_steps, nb_udim, nb_xdim), StandardNormal, &mut rng);
        let kff = Array2::<f64>::random_using((nb_steps, nb_udim), StandardNormal, &mut rng);
        let scales = Array2::<f64>::random_using((nb_steps, nb_udim), Uniform::new(0.1, 2.0), &mut rng);
        let mut sigma = Array3::zeros((nb_steps, nb_udim, nb_udim));
        for t in 0..nb_steps {
            for i in 0..nb_udim {
                sigma[[t, i, i]] = scales[[t, i]];
            }
        }
        LinearGaussianControl::from_parts(gain, kff, sigma).unwrap()
    }

    fn random_dynamics(nb_xdim: usize, nb_udim: usize, nb_steps: usize, seed: u64) -> LinearGaussianDynamics {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut a = Array3::<f64>::random_using((nb_steps, nb_xdim, nb_xdim), Uniform::new(-0.3, 0.3), &mut rng);
        for t in 0..nb_steps {
            for i in 0..nb_xdim {
                a[[t, i, i]] += 1.0;
            }
        }
        let b = Array3::<f64>::random_using((nb_steps, nb_xdim, nb_udim), StandardNormal, &mut rng);
        let c = Array2::<f64>::random_using((nb_steps, nb_xdim), StandardNormal, &mut rng);
        let mut sigma = Array3::zeros((nb_steps, nb_xdim, nb_xdim));
        for t in 0..nb_steps {
            for i in 0..nb_xdim {
                sigma[[t, i, i]] = 0.1;
            }
        }
        LinearGaussianDynamics::from_parts(a, b, c, sigma).unwrap()
    }

    proptest! {
        #[test]
        fn test_activation_mask_always_ends_active(
            nb_steps in 1usize..50,
            active in prop::collection::vec(0usize..50, 0..10)
        ) {
            let active: Vec<usize> = active.into_iter().filter(|t| *t <= nb_steps).collect();
            let mask = activation_mask(nb_steps, &active).unwrap();

            prop_assert_eq!(mask.len(), nb_steps + 1);
            prop_assert!(mask[nb_steps]);
            for t in &active {
                prop_assert!(mask[*t]);
            }
            let count = mask.iter().filter(|m| **m).count();
            prop_assert!(count <= active.len() + 1);
        }

        #[test]
        fn test_activation_mask_rejects_steps_past_horizon(nb_steps in 1usize..50, extra in 1usize..10) {
            prop_assert!(activation_mask(nb_steps, &[nb_steps + extra]).is_err());
        }

        #[test]
        fn test_trust_region_multiplier_stays_clipped(
            steps in prop::collection::vec((-1e3f64..1e3, -1e3f64..1e3), 1..30)
        ) {
            let mut region = TrustRegion::new(0.1, 0.1, 5.0, -1.0);
            for (expected, actual) in steps {
                region.adapt(expected, actual);
                region.rescale();
                prop_assert!(region.kl_mult >= 0.1 && region.kl_mult <= 5.0);
                prop_assert!((region.kl_bound - 0.1 * region.kl_mult).abs() < 1e-12);
            }
        }

        #[test]
        fn test_regularization_schedule(ops in prop::collection::vec(any::<bool>(), 1..60)) {
            let mut reg = Regularization::default();
            for grow in ops {
                let before = reg.lmbda;
                if grow {
                    let within = reg.increase();
                    prop_assert!(reg.lmbda >= before);
                    prop_assert!(reg.lmbda >= reg.min_lmbda);
                    prop_assert_eq!(within, reg.lmbda <= reg.max_lmbda);
                    if !within {
                        break;
                    }
                } else {
                    reg.decrease();
                    prop_assert!(reg.lmbda <= before);
                    prop_assert!(reg.lmbda >= 0.0);
                }
            }
        }

        #[test]
        fn test_kl_of_controller_with_itself_vanishes(
            nb_xdim in 1usize..4,
            nb_udim in 1usize..3,
            seed in any::<u64>()
        ) {
            let ctl = random_controller(nb_xdim, nb_udim, 5, seed);
            let dynamics = random_dynamics(nb_xdim, nb_udim, 5, seed.wrapping_add(1));
            let dist = forward_pass(
                Array1::zeros(nb_xdim).view(),
                Array2::eye(nb_xdim).view(),
                &dynamics,
                &ctl,
            ).unwrap();

            let kl = kl_divergence(&ctl, &ctl, &dist.xdist).unwrap();
            prop_assert!(kl.abs() < 1e-9, "kl = {}", kl);
        }

        #[test]
        fn test_kl_is_nonnegative(seed in any::<u64>()) {
            let ctl = random_controller(2, 1, 5, seed);
            let prev = random_controller(2, 1, 5, seed.wrapping_add(7));
            let dynamics = random_dynamics(2, 1, 5, seed.wrapping_add(13));
            let dist = forward_pass(Array1::zeros(2).view(), Array2::eye(2).view(), &dynamics, &ctl).unwrap();

            let kl = kl_divergence(&ctl, &prev, &dist.xdist).unwrap();
            prop_assert!(kl >= -1e-9, "kl = {}", kl);
        }

        #[test]
        fn test_forward_pass_covariances_are_symmetric(
            nb_xdim in 1usize..4,
            nb_udim in 1usize..3,
            seed in any::<u64>()
        ) {
            let ctl = random_controller(nb_xdim, nb_udim, 8, seed);
            let dynamics = random_dynamics(nb_xdim, nb_udim, 8, seed.wrapping_add(3));
            let dist = forward_pass(
                Array1::ones(nb_xdim).view(),
                Array2::eye(nb_xdim).view(),
                &dynamics,
                &ctl,
            ).unwrap();

            prop_assert_eq!(dist.xdist.nb_steps, 9);
            prop_assert_eq!(dist.udist.nb_steps, 8);
            for t in 0..dist.xudist.nb_steps {
                let sigma = dist.xudist.cov(t);
                for i in 0..sigma.nrows() {
                    prop_assert!(sigma[[i, i]] >= 0.0);
                    for j in 0..i {
                        prop_assert_eq!(sigma[[i, j]], sigma[[j, i]]);
                    }
                }
            }
        }

        #[test]
        fn test_box_clip_lands_inside(
            bounds in prop::collection::vec((-10.0f64..0.0, 0.0f64..10.0), 1..5),
            point in prop::collection::vec(-100.0f64..100.0, 5)
        ) {
            let low = Array1::from_iter(bounds.iter().map(|b| b.0));
            let high = Array1::from_iter(bounds.iter().map(|b| b.1));
            let space = BoxSpace::new(low, high).unwrap();

            let x = Array1::from_iter(point.into_iter().take(space.dim()));
            let clipped = space.clip(x.view());
            prop_assert!(space.contains(clipped.view()));
            if space.contains(x.view()) {
                prop_assert_eq!(clipped, x);
            }
        }
    }
}
