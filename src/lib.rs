//! # trajopt - Trajectory Optimization for Stochastic Control
//!
//! trajopt computes locally optimal time-varying linear feedback controllers
//! around a nominal trajectory of a nonlinear, possibly noisy dynamical system.
//! Two families of algorithms share the same Riccati-style recursions:
//!
//! - **Guided policy search** ([`gps`]): linear-Gaussian controllers optimized
//!   under a KL trust region, either on a known model ([`gps::Mbgps`]) or on
//!   dynamics learned from sampled rollouts ([`gps::Mfgps`])
//! - **iLQR** ([`ilqr`]): deterministic iterative LQR with
//!   Levenberg-Marquardt regularization and a backtracking line search
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use trajopt::builders::{IlqrBuilder, MbgpsBuilder};
//! use trajopt::env::Lqr;
//!
//! let mut ilqr = IlqrBuilder::new().nb_steps(150).build(Lqr::new())?;
//! let returns = ilqr.run(25)?;
//! println!("iLQR: {:?} after {:?}", returns.last(), ilqr.termination());
//!
//! let mut gps = MbgpsBuilder::new().nb_steps(100).kl_bound(0.1).build(Lqr::new())?;
//! gps.run(10)?;
//! # Ok::<(), trajopt::error::TrajoptError>(())
//! ```
//!
//! ## Module Organization
//!
//! - [`builders`] - Builder patterns for the three optimizers
//! - [`debug`] - Numerical health checks of trajectory distributions
//! - [`env`] - Environment contract, linearization provider and test systems
//! - [`error`] - Error types and result handling
//! - [`gps`] - KL-constrained trajectory optimization
//! - [`ilqr`] - Iterative LQR
//! - [`linalg`] - Dense linear algebra helpers
//! - [`metrics`] - Per-iteration optimization trace
//! - [`optimizer`] - Bounded scalar minimization for the GPS dual
//! - [`parallel`] - Parallel rollout sampling
//! - [`riccati`] - Quadratic cost, linear dynamics, controllers and value functions
//! - [`types`] - Spaces and time-indexed Gaussian distributions

pub mod builders;
pub mod debug;
pub mod env;
pub mod error;
pub mod gps;
pub mod ilqr;
pub mod linalg;
pub mod metrics;
pub mod optimizer;
pub mod parallel;
pub mod riccati;
pub mod types;

#[cfg(test)]
mod tests;
