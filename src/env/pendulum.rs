use std::f64::consts::PI;

use ndarray::{array, Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{Environment, Step};
use crate::linalg::{psd_lower, sample_gaussian};
use crate::types::BoxSpace;

/// Torque-limited pendulum, `θ = 0` is upright.
///
/// The cost penalizes the distance of the features `[cos θ, sin θ, θ̇]` to the
/// upright goal. The feature map is linearized around the reference state, so
/// for a fixed reference the cost is exactly quadratic in the raw state.
/// Dynamics Jacobians are closed-form, cost derivatives come from finite
/// differences.
#[derive(Clone, Debug)]
pub struct Pendulum {
    dt: f64,
    gravity: f64,
    mass: f64,
    length: f64,
    damping: f64,
    goal: Array1<f64>,
    feature_weights: Array1<f64>,
    action_weight: f64,
    sigma: Array2<f64>,
    observation_space: BoxSpace,
    action_space: BoxSpace,
    state: Array1<f64>,
    rng: StdRng,
}

impl Pendulum {
    pub fn new() -> Self {
        let mut env = Pendulum {
            dt: 0.05,
            gravity: 9.81,
            mass: 1.0,
            length: 1.0,
            damping: 1e-3,
            goal: array![1.0, 0.0, 0.0],
            feature_weights: array![1e1, 1e1, 1e-1],
            action_weight: 1e-3,
            sigma: Array2::eye(2) * 1e-4,
            observation_space: BoxSpace::unbounded(2),
            action_space: BoxSpace::symmetric(1, 2.5),
            state: Array1::zeros(2),
            rng: StdRng::seed_from_u64(0),
        };
        env.reset();
        env
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// `[cos θ, sin θ, θ̇]`
    pub fn features(x: ArrayView1<f64>) -> Array1<f64> {
        array![x[0].cos(), x[0].sin(), x[1]]
    }

    // d features / d x at xref
    fn feature_jacobian(xref: ArrayView1<f64>) -> Array2<f64> {
        array![[-xref[0].sin(), 0.0], [xref[0].cos(), 0.0], [0.0, 1.0]]
    }
}

impl Default for Pendulum {
    fn default() -> Self {
        Pendulum::new()
    }
}

impl Environment for Pendulum {
    fn observation_space(&self) -> &BoxSpace {
        &self.observation_space
    }

    fn action_space(&self) -> &BoxSpace {
        &self.action_space
    }

    fn init(&self) -> (Array1<f64>, Array2<f64>) {
        (array![PI, 0.0], Array2::eye(2) * 1e-4)
    }

    fn dynamics(&self, x: ArrayView1<f64>, u: ArrayView1<f64>) -> Array1<f64> {
        let u = self.action_space.clip(u);
        let inertia = self.mass * self.length * self.length;

        let acc = self.gravity / self.length * x[0].sin() + u[0] / inertia - self.damping * x[1];
        let thd = x[1] + self.dt * acc;
        let th = x[0] + self.dt * thd;

        self.observation_space.clip(array![th, thd].view())
    }

    fn noise(&self, _x: ArrayView1<f64>, _u: ArrayView1<f64>) -> Array2<f64> {
        self.sigma.clone()
    }

    fn dynamics_jacobians(&self, x: ArrayView1<f64>, u: ArrayView1<f64>) -> Option<(Array2<f64>, Array2<f64>)> {
        let inertia = self.mass * self.length * self.length;
        let dt = self.dt;
        let dacc_dth = self.gravity / self.length * x[0].cos();
        // saturated torque has no effect
        let dacc_du = if self.action_space.contains(u) { 1.0 / inertia } else { 0.0 };

        let dthd_dth = dt * dacc_dth;
        let dthd_dthd = 1.0 - dt * self.damping;
        let a = array![[1.0 + dt * dthd_dth, dt * dthd_dthd], [dthd_dth, dthd_dthd]];
        let b = array![[dt * dt * dacc_du], [dt * dacc_du]];
        Some((a, b))
    }

    fn cost(&self, x: ArrayView1<f64>, u: ArrayView1<f64>, active: bool, xref: ArrayView1<f64>) -> f64 {
        let effort: f64 = u.iter().map(|ui| self.action_weight * ui * ui).sum();
        if !active {
            return effort;
        }

        let jac = Pendulum::feature_jacobian(xref);
        let phi = Pendulum::features(xref) + jac.dot(&(&x - &xref));
        let err = phi - &self.goal;

        let tracking: f64 = err.iter().zip(self.feature_weights.iter()).map(|(e, w)| w * e * e).sum();
        tracking + effort
    }

    fn seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    fn reset(&mut self) -> Array1<f64> {
        let (mu, sigma) = self.init();
        self.state = match psd_lower(sigma.view()) {
            Ok(lower) => sample_gaussian(mu.view(), lower.view(), &mut self.rng),
            Err(_) => mu,
        };
        self.state.clone()
    }

    fn step(&mut self, u: ArrayView1<f64>) -> Step {
        let reward = -self.cost(self.state.view(), u, true, self.state.view());
        let mean = self.dynamics(self.state.view(), u);
        self.state = match psd_lower(self.sigma.view()) {
            Ok(lower) => sample_gaussian(mean.view(), lower.view(), &mut self.rng),
            Err(_) => mean,
        };
        Step {
            state: self.state.clone(),
            reward,
            done: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Linearizer;
    use approx::assert_abs_diff_eq;
    use ndarray::s;

    #[test]
    fn test_upright_is_equilibrium() {
        let env = Pendulum::new();
        let next = env.dynamics(array![0.0, 0.0].view(), array![0.0].view());
        assert_abs_diff_eq!(next[0], 0.0);
        assert_abs_diff_eq!(next[1], 0.0);
    }

    #[test]
    fn test_torque_is_clipped() {
        let env = Pendulum::new();
        let x = array![0.3, 0.0];
        let clipped = env.dynamics(x.view(), array![100.0].view());
        let limit = env.dynamics(x.view(), array![2.5].view());
        assert_eq!(clipped, limit);
    }

    #[test]
    fn test_cost_is_zero_at_goal() {
        let env = Pendulum::new();
        let x = array![0.0, 0.0];
        assert_abs_diff_eq!(env.cost(x.view(), array![0.0].view(), true, x.view()), 0.0);
        assert!(env.cost(array![PI, 0.0].view(), array![0.0].view(), true, array![PI, 0.0].view()) > 1.0);
    }

    #[test]
    fn test_inactive_steps_only_charge_effort() {
        let env = Pendulum::new();
        let x = array![0.3, 0.1];
        assert_eq!(env.cost(x.view(), array![0.0].view(), false, x.view()), 0.0);
        assert_abs_diff_eq!(env.cost(x.view(), array![2.0].view(), false, x.view()), 4e-3, epsilon = 1e-15);
        assert!(env.cost(x.view(), array![0.0].view(), true, x.view()) > 0.0);
    }

    #[test]
    fn test_expansion_vanishes_in_state_at_inactive_steps() {
        use crate::riccati::{activation_mask, AnalyticalQuadraticCost};

        let env = Pendulum::new();
        let x = array![[2.0, 0.5], [1.5, 0.2], [1.0, -0.1], [0.5, 0.0]];
        let u = array![[0.3], [-0.2], [0.1]];
        let activation = activation_mask(3, &[1]).unwrap();
        let cost = AnalyticalQuadraticCost::new(2, 1, 4, Linearizer::default())
            .taylor_expansion(&env, x.view(), u.view(), &activation)
            .unwrap();

        for t in [0, 2] {
            assert!(cost.cxx.slice(s![t, .., ..]).iter().all(|v| v.abs() < 1e-6));
            assert!(cost.cx.row(t).iter().all(|v| v.abs() < 1e-6));
        }
        for t in [1, 3] {
            assert!(cost.cxx[[t, 0, 0]] > 1.0);
        }
    }

    #[test]
    fn test_cost_is_quadratic_for_fixed_reference() {
        let env = Pendulum::new();
        let xref = array![2.0, 0.5];
        let u = array![0.3];
        let derivs = Linearizer::default().cost_derivatives(&env, xref.view(), u.view(), true, xref.view());

        // second-order model must match the cost away from the expansion point
        let dx = array![0.4, -0.2];
        let x = &xref + &dx;
        let model = derivs.value + derivs.cx.dot(&dx) + 0.5 * dx.dot(&derivs.cxx.dot(&dx));
        assert_abs_diff_eq!(model, env.cost(x.view(), u.view(), true, xref.view()), epsilon = 1e-4);
    }
}
