//! Per-timestep containers shared by the GPS and iLQR recursions.
//!
//! All arrays are time-first: entry `t` of a `(T, n, m)` array is the
//! matrix at step `t`. Cost and value containers hold `T + 1` entries,
//! dynamics, controllers and state-action values hold `T`.

pub mod control;
pub mod cost;
pub mod dynamics;
pub mod value;

pub use control::{LinearControl, LinearGaussianControl};
pub use cost::{activation_mask, AnalyticalQuadraticCost, QuadraticCost};
pub use dynamics::{AnalyticalLinearDynamics, LinearGaussianDynamics};
pub use value::{QuadraticStateActionValue, QuadraticStateValue};
