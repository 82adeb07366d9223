//! Iterative LQR with Levenberg-Marquardt regularization and a backtracking
//! line search.

pub mod core;
pub mod solver;

use serde::{Deserialize, Serialize};

use crate::env::Linearizer;
use crate::error::{Result, TrajoptError};

pub use self::core::{backward_pass, IlqrBackward};
pub use solver::{Ilqr, IlqrState, Rollout};

/// Where the damping `λ` enters the backward pass
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegularizationMode {
    /// `Quu + λI`
    Control,
    /// `V' + λI` before it is mapped through `B`
    State,
}

impl Default for RegularizationMode {
    fn default() -> Self {
        RegularizationMode::Control
    }
}

/// Multiplicative schedule of the damping `λ`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Regularization {
    pub lmbda: f64,
    pub dlmbda: f64,
    pub min_lmbda: f64,
    pub max_lmbda: f64,
    pub mult_lmbda: f64,
}

impl Default for Regularization {
    fn default() -> Self {
        Regularization {
            lmbda: 1.0,
            dlmbda: 1.0,
            min_lmbda: 1e-6,
            max_lmbda: 1e6,
            mult_lmbda: 1.6,
        }
    }
}

impl Regularization {
    /// Grow `λ`; false once it exceeds `max_lmbda`
    pub fn increase(&mut self) -> bool {
        self.dlmbda = (self.dlmbda * self.mult_lmbda).max(self.mult_lmbda);
        self.lmbda = (self.lmbda * self.dlmbda).max(self.min_lmbda);
        self.lmbda <= self.max_lmbda
    }

    /// Shrink `λ`, dropping it to zero once it falls below `min_lmbda`
    pub fn decrease(&mut self) {
        self.dlmbda = (self.dlmbda / self.mult_lmbda).min(1.0 / self.mult_lmbda);
        let keep = if self.lmbda > self.min_lmbda { 1.0 } else { 0.0 };
        self.lmbda *= self.dlmbda * keep;
    }
}

/// Why [`Ilqr::run`] stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    MaxIterations,
    /// Accepted improvement below `tolfun`
    FunctionTolerance,
    /// Feedforward small relative to the reference actions
    GradientTolerance,
    /// `λ` exceeded `max_lmbda`
    RegularizationCeiling,
}

/// Configuration of an iLQR solve
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IlqrConfig {
    pub nb_steps: usize,
    /// Line-search step sizes, tried in order
    pub alphas: Vec<f64>,
    pub regularization: Regularization,
    pub mode: RegularizationMode,
    pub tolfun: f64,
    pub tolgrad: f64,
    /// Minimal ratio of actual to expected improvement
    pub min_imp: f64,
    /// States beyond this magnitude make a rollout infeasible
    pub state_bound: f64,
    pub activation: Vec<usize>,
    pub linearizer: Linearizer,
}

/// `10^linspace(0, -3, 11)`
pub fn default_alphas() -> Vec<f64> {
    (0..11).map(|i| 10f64.powf(-0.3 * i as f64)).collect()
}

impl Default for IlqrConfig {
    fn default() -> Self {
        IlqrConfig {
            nb_steps: 100,
            alphas: default_alphas(),
            regularization: Regularization::default(),
            mode: RegularizationMode::default(),
            tolfun: 1e-8,
            tolgrad: 1e-6,
            min_imp: 0.0,
            state_bound: 1e8,
            activation: Vec::new(),
            linearizer: Linearizer::default(),
        }
    }
}

impl IlqrConfig {
    pub fn validate(&self) -> Result<()> {
        if self.nb_steps == 0 {
            return Err(TrajoptError::invalid_parameter("nb_steps", "horizon must be at least one step"));
        }
        if self.alphas.is_empty() || self.alphas.iter().any(|a| !(*a > 0.0)) {
            return Err(TrajoptError::invalid_parameter(
                "alphas".to_string(),
                format!("expected a non-empty list of positive step sizes, got {:?}", self.alphas),
            ));
        }
        let reg = &self.regularization;
        if !(reg.min_lmbda >= 0.0 && reg.min_lmbda < reg.max_lmbda) {
            return Err(TrajoptError::invalid_parameter(
                "regularization".to_string(),
                format!("expected 0 <= min_lmbda < max_lmbda, got [{}, {}]", reg.min_lmbda, reg.max_lmbda),
            ));
        }
        if !(reg.mult_lmbda > 1.0) || !(reg.lmbda >= 0.0) {
            return Err(TrajoptError::invalid_parameter(
                "regularization".to_string(),
                format!("expected lmbda >= 0 and mult_lmbda > 1, got {} and {}", reg.lmbda, reg.mult_lmbda),
            ));
        }
        if !(self.state_bound > 0.0) {
            return Err(TrajoptError::invalid_parameter(
                "state_bound".to_string(),
                format!("must be positive, got {}", self.state_bound),
            ));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: IlqrConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
