//! Guided policy search: linear-Gaussian trajectory optimization under a KL
//! trust region.
//!
//! Each iteration minimizes the expected cost subject to a bound on the KL
//! divergence between the new and the current controller. The constraint is
//! handled through its dual, a convex problem in one scalar `alpha < 0`.
//! [`Mbgps`] linearizes a known model along the mean trajectory, [`Mfgps`]
//! learns the model from sampled rollouts.

pub mod core;
pub mod learned;
pub mod mbgps;
pub mod mfgps;

use serde::{Deserialize, Serialize};

use crate::env::Linearizer;
use crate::error::{Result, TrajoptError};
use crate::gps::core::TrajectoryDistribution;
use crate::riccati::{LinearGaussianControl, LinearGaussianDynamics, QuadraticStateActionValue, QuadraticStateValue};

pub use self::core::{
    augment_cost, backward_pass, extended_forward_pass, forward_pass, kl_divergence, quad_expectation,
    DualEvaluation, DualProblem, DualSolution,
};
pub use learned::{DynamicsRegression, LearnedLinearGaussianDynamics, MatrixNormalInverseWishart};
pub use mbgps::Mbgps;
pub use mfgps::Mfgps;

/// KL trust-region state, adapted once per iteration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrustRegion {
    pub kl_base: f64,
    pub kl_bound: f64,
    pub kl_mult: f64,
    pub kl_mult_min: f64,
    pub kl_mult_max: f64,
    /// Dual variable of the last solve
    pub alpha: f64,
}

impl TrustRegion {
    pub fn new(kl_base: f64, kl_mult_min: f64, kl_mult_max: f64, alpha: f64) -> Self {
        TrustRegion {
            kl_base,
            kl_bound: kl_base,
            kl_mult: 1.0,
            kl_mult_min,
            kl_mult_max,
            alpha,
        }
    }

    /// Scale the multiplier by how well the expected improvement predicted
    /// the actual one.
    pub fn adapt(&mut self, expected_improvement: f64, actual_improvement: f64) {
        let mult = expected_improvement / (2.0 * (expected_improvement - actual_improvement).max(1e-4));
        // NaN falls back to the lower clip
        let mult = if mult.is_nan() { self.kl_mult_min } else { mult };
        let mult = mult.max(self.kl_mult_min).min(self.kl_mult_max);
        self.kl_mult = (mult * self.kl_mult).max(self.kl_mult_min).min(self.kl_mult_max);
    }

    /// `kl_bound = kl_base·kl_mult`
    pub fn rescale(&mut self) {
        self.kl_bound = self.kl_base * self.kl_mult;
    }

    /// Whether a step with total KL `kl` over `nb_steps` stays in the region
    pub fn admits(&self, kl: f64, nb_steps: usize) -> bool {
        let allowed = nb_steps as f64 * self.kl_bound;
        kl - allowed < 0.1 * allowed
    }
}

/// Configuration shared by the model-based and model-free GPS loops
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsConfig {
    pub nb_steps: usize,
    /// Base KL bound of the trust region
    pub kl_bound: f64,
    pub kl_mult_min: f64,
    pub kl_mult_max: f64,
    /// Initial controller covariance scale
    pub init_ctl_sigma: f64,
    /// Standard deviation of the random initial feedforward
    pub init_ctl_feedforward: f64,
    /// Steps whose sparse cost terms are active besides the last one
    pub activation: Vec<usize>,
    pub alpha_init: f64,
    pub alpha_lower: f64,
    pub alpha_upper: f64,
    pub dual_ftol: f64,
    pub dual_max_iter: usize,
    pub linearizer: Linearizer,
    pub seed: u64,
}

impl Default for GpsConfig {
    fn default() -> Self {
        GpsConfig {
            nb_steps: 100,
            kl_bound: 0.1,
            kl_mult_min: 0.1,
            kl_mult_max: 5.0,
            init_ctl_sigma: 1.0,
            init_ctl_feedforward: 1e-2,
            activation: Vec::new(),
            alpha_init: -1e3,
            alpha_lower: -1e8,
            alpha_upper: -1e-8,
            dual_ftol: 1e-10,
            dual_max_iter: 1000,
            linearizer: Linearizer::default(),
            seed: 0,
        }
    }
}

impl GpsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.nb_steps == 0 {
            return Err(TrajoptError::invalid_parameter("nb_steps", "horizon must be at least one step"));
        }
        if !(self.kl_bound > 0.0) {
            return Err(TrajoptError::invalid_parameter(
                "kl_bound".to_string(),
                format!("must be positive, got {}", self.kl_bound),
            ));
        }
        if !(0.0 < self.kl_mult_min && self.kl_mult_min <= 1.0 && 1.0 <= self.kl_mult_max) {
            return Err(TrajoptError::invalid_parameter(
                "kl_mult".to_string(),
                format!("expected 0 < min <= 1 <= max, got [{}, {}]", self.kl_mult_min, self.kl_mult_max),
            ));
        }
        if !(self.init_ctl_sigma > 0.0) {
            return Err(TrajoptError::invalid_parameter(
                "init_ctl_sigma".to_string(),
                format!("must be positive, got {}", self.init_ctl_sigma),
            ));
        }
        if !(self.alpha_lower < self.alpha_upper && self.alpha_upper < 0.0) {
            return Err(TrajoptError::invalid_parameter(
                "alpha bounds".to_string(),
                format!("expected lower < upper < 0, got [{}, {}]", self.alpha_lower, self.alpha_upper),
            ));
        }
        if !(self.alpha_lower <= self.alpha_init && self.alpha_init <= self.alpha_upper) {
            return Err(TrajoptError::invalid_parameter(
                "alpha_init".to_string(),
                format!("{} is outside the alpha bounds", self.alpha_init),
            ));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: GpsConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub(crate) fn trust_region(&self) -> TrustRegion {
        TrustRegion::new(self.kl_bound, self.kl_mult_min, self.kl_mult_max, self.alpha_init)
    }
}

/// Iterate of a GPS loop, replaced as a whole when a step is accepted
#[derive(Clone, Debug)]
pub struct GpsState {
    pub ctl: LinearGaussianControl,
    pub dist: TrajectoryDistribution,
    pub vfunc: QuadraticStateValue,
    pub qfunc: QuadraticStateActionValue,
    /// Model the distributions were propagated through
    pub dynamics: LinearGaussianDynamics,
    pub last_return: f64,
}
