use ndarray::{array, Array1, Array2, Array3};

use crate::env::{Environment, Linearizer, Lqr};
use crate::error::TrajoptError;
use crate::gps::core::{forward_pass, kl_divergence};
use crate::gps::{GpsConfig, Mbgps};
use crate::ilqr::{Ilqr, IlqrConfig, Termination};
use crate::linalg::SpdFactor;
use crate::riccati::{
    AnalyticalQuadraticCost, LinearControl, LinearGaussianControl, LinearGaussianDynamics, QuadraticCost,
};
use crate::types::Gaussian;

#[test]
fn test_container_shape_mismatches() {
    let err = Gaussian::from_parts(Array2::zeros((3, 2)), Array3::zeros((3, 2, 1))).unwrap_err();
    assert!(matches!(err, TrajoptError::DimensionMismatch { .. }));

    let err = LinearGaussianDynamics::from_parts(
        Array3::zeros((4, 2, 2)),
        Array3::zeros((4, 2, 1)),
        Array2::zeros((3, 2)),
        Array3::zeros((4, 2, 2)),
    )
    .unwrap_err();
    assert!(matches!(err, TrajoptError::DimensionMismatch { .. }));

    let err = QuadraticCost::from_parts(
        Array3::zeros((5, 2, 2)),
        Array3::zeros((5, 1, 1)),
        Array3::zeros((5, 1, 2)),
        Array2::zeros((5, 2)),
        Array2::zeros((5, 1)),
        Array1::zeros(5),
    )
    .unwrap_err();
    assert!(matches!(err, TrajoptError::DimensionMismatch { .. }));

    assert!(LinearControl::from_parts(Array3::zeros((3, 1, 2)), Array2::zeros((2, 1))).is_err());
    assert!(LinearGaussianControl::from_parts(Array3::zeros((3, 1, 2)), Array2::zeros((3, 1)), Array3::zeros((3, 2, 2))).is_err());
}

#[test]
fn test_empty_cost_reports_error() {
    let cost = QuadraticCost::new(2, 1, 0);
    let err = cost.evaluate(Array2::zeros((0, 2)).view(), Array2::zeros((0, 1)).view()).unwrap_err();
    assert!(matches!(err, TrajoptError::InvalidParameter { .. }));

    let model = AnalyticalQuadraticCost::new(2, 1, 0, Linearizer::default());
    let err = model
        .taylor_expansion(&Lqr::new(), Array2::zeros((0, 2)).view(), Array2::zeros((0, 1)).view(), &[])
        .unwrap_err();
    assert!(matches!(err, TrajoptError::InvalidParameter { .. }));

    // a single terminal entry is fine
    let terminal = QuadraticCost::new(2, 1, 1);
    assert_eq!(terminal.evaluate(Array2::zeros((1, 2)).view(), Array2::zeros((0, 1)).view()).unwrap(), 0.0);
}

#[test]
fn test_forward_pass_rejects_wrong_initial_state() {
    let dynamics = LinearGaussianDynamics::new(2, 1, 3);
    let ctl = LinearGaussianControl::new(2, 1, 3, 1.0);
    let result = forward_pass(array![1.0, 2.0, 3.0].view(), Array2::eye(2).view(), &dynamics, &ctl);
    assert!(matches!(result, Err(TrajoptError::DimensionMismatch { .. })));

    let short = LinearGaussianControl::new(2, 1, 2, 1.0);
    assert!(forward_pass(array![1.0, 2.0].view(), Array2::eye(2).view(), &dynamics, &short).is_err());
}

#[test]
fn test_kl_requires_positive_definite_covariances() {
    let xdist = Gaussian::new(2, 4);
    let ctl = LinearGaussianControl::new(2, 1, 3, 1.0);
    let singular = LinearGaussianControl::new(2, 1, 3, 0.0);
    let err = kl_divergence(&ctl, &singular, &xdist).unwrap_err();
    assert!(matches!(err, TrajoptError::NotPositiveDefinite(_)));
}

#[test]
fn test_spd_factor_edge_cases() {
    assert!(SpdFactor::new(array![[1.0, 2.0], [2.0, 1.0]].view()).is_none());
    assert!(SpdFactor::new(array![[f64::NAN]].view()).is_none());
    assert!(SpdFactor::new(Array2::<f64>::zeros((2, 3)).view()).is_none());

    let factor = SpdFactor::new(array![[4.0, 0.0], [0.0, 9.0]].view()).unwrap();
    assert!((factor.log_det - 36f64.ln()).abs() < 1e-12);
    assert!((factor.inverse[[1, 1]] - 1.0 / 9.0).abs() < 1e-12);
}

#[test]
fn test_single_step_horizon() {
    let mut ilqr = Ilqr::new(
        Lqr::new(),
        IlqrConfig {
            nb_steps: 1,
            ..IlqrConfig::default()
        },
    )
    .unwrap();
    let returns = ilqr.run(10).unwrap();
    assert!(returns.iter().all(|r| r.is_finite()));
    assert_eq!(ilqr.xref().nrows(), 2);

    let mut gps = Mbgps::new(
        Lqr::new(),
        GpsConfig {
            nb_steps: 1,
            ..GpsConfig::default()
        },
    )
    .unwrap();
    assert!(gps.run(2).unwrap().iter().all(|r| r.is_finite()));
}

#[test]
fn test_zero_iterations_only_evaluates() {
    let mut ilqr = Ilqr::new(
        Lqr::new(),
        IlqrConfig {
            nb_steps: 5,
            ..IlqrConfig::default()
        },
    )
    .unwrap();
    let returns = ilqr.run(0).unwrap();
    assert_eq!(returns.len(), 1);
    assert_eq!(ilqr.termination(), Some(Termination::MaxIterations));
    assert!(ilqr.trace().is_empty());
    assert_eq!(ilqr.real_returns(), &[returns[0]]);
}

#[test]
fn test_unstable_open_loop_is_infeasible() {
    let env = Lqr::new();
    let config = IlqrConfig {
        nb_steps: 150,
        ..IlqrConfig::default()
    };
    let ilqr = Ilqr::new(env.clone(), config).unwrap();
    let rollout = ilqr.forward_pass(ilqr.controller(), 1.0);
    assert!(!ilqr.is_feasible(&rollout));

    // a short horizon stays within the bound
    let short = Ilqr::new(
        env,
        IlqrConfig {
            nb_steps: 10,
            ..IlqrConfig::default()
        },
    )
    .unwrap();
    assert!(short.is_feasible(&short.forward_pass(short.controller(), 1.0)));
}

#[test]
fn test_environment_dimensions() {
    let env = Lqr::new();
    assert_eq!(env.state_dim(), 2);
    assert_eq!(env.action_dim(), 1);
}
