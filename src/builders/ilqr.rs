use ndarray::Array2;

use crate::env::{Environment, Linearizer};
use crate::error::{Result, TrajoptError};
use crate::ilqr::{Ilqr, IlqrConfig, Regularization, RegularizationMode};

/// Builder for [`Ilqr`]
pub struct IlqrBuilder {
    config: IlqrConfig,
    nb_steps: Option<usize>,
    initial_actions: Option<Array2<f64>>,
}

impl IlqrBuilder {
    /// Create a new iLQR builder with default settings
    pub fn new() -> Self {
        IlqrBuilder {
            config: IlqrConfig::default(),
            nb_steps: None,
            initial_actions: None,
        }
    }

    /// Start from a complete configuration
    pub fn from_config(config: IlqrConfig) -> Self {
        IlqrBuilder {
            nb_steps: Some(config.nb_steps),
            config,
            initial_actions: None,
        }
    }

    /// Load the configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(IlqrBuilder::from_config(IlqrConfig::from_json(json)?))
    }

    /// Set the horizon
    pub fn nb_steps(mut self, nb_steps: usize) -> Self {
        self.nb_steps = Some(nb_steps);
        self
    }

    /// Set the line-search step sizes
    pub fn alphas(mut self, alphas: Vec<f64>) -> Self {
        self.config.alphas = alphas;
        self
    }

    /// Set the initial damping and its bounds
    pub fn lmbda(mut self, lmbda: f64, min_lmbda: f64, max_lmbda: f64) -> Self {
        self.config.regularization = Regularization {
            lmbda,
            min_lmbda,
            max_lmbda,
            ..self.config.regularization
        };
        self
    }

    /// Damp the state value instead of `Quu`
    pub fn state_regularization(mut self) -> Self {
        self.config.mode = RegularizationMode::State;
        self
    }

    pub fn control_regularization(mut self) -> Self {
        self.config.mode = RegularizationMode::Control;
        self
    }

    pub fn tolerances(mut self, tolfun: f64, tolgrad: f64) -> Self {
        self.config.tolfun = tolfun;
        self.config.tolgrad = tolgrad;
        self
    }

    pub fn min_improvement(mut self, min_imp: f64) -> Self {
        self.config.min_imp = min_imp;
        self
    }

    pub fn state_bound(mut self, state_bound: f64) -> Self {
        self.config.state_bound = state_bound;
        self
    }

    /// Steps whose sparse cost terms are active besides the last one
    pub fn activation(mut self, activation: Vec<usize>) -> Self {
        self.config.activation = activation;
        self
    }

    pub fn linearizer(mut self, linearizer: Linearizer) -> Self {
        self.config.linearizer = linearizer;
        self
    }

    /// Start from an open-loop action sequence instead of zeros
    pub fn initial_actions(mut self, uref: Array2<f64>) -> Self {
        self.initial_actions = Some(uref);
        self
    }

    /// Build the solver for `env`
    pub fn build<E: Environment>(self, env: E) -> Result<Ilqr<E>> {
        let nb_steps = self.nb_steps.ok_or_else(|| TrajoptError::InvalidParameter {
            name: "nb_steps".to_string(),
            reason: "Horizon not specified".to_string(),
        })?;
        let config = IlqrConfig { nb_steps, ..self.config };

        match self.initial_actions {
            Some(uref) => Ilqr::with_initial_actions(env, config, uref),
            None => Ilqr::new(env, config),
        }
    }
}

impl Default for IlqrBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Lqr;

    #[test]
    fn test_ilqr_builder() {
        let ilqr = IlqrBuilder::new()
            .nb_steps(20)
            .lmbda(0.5, 1e-6, 1e3)
            .state_regularization()
            .build(Lqr::new())
            .unwrap();

        assert_eq!(ilqr.config().nb_steps, 20);
        assert_eq!(ilqr.config().mode, RegularizationMode::State);
        assert_eq!(ilqr.regularization().lmbda, 0.5);
        assert_eq!(ilqr.xref().nrows(), 21);
    }

    #[test]
    fn test_builder_errors() {
        // No horizon
        assert!(IlqrBuilder::new().build(Lqr::new()).is_err());

        // No step sizes
        assert!(IlqrBuilder::new().nb_steps(10).alphas(vec![]).build(Lqr::new()).is_err());

        // Initial actions of the wrong length
        let result = IlqrBuilder::new()
            .nb_steps(10)
            .initial_actions(Array2::zeros((3, 1)))
            .build(Lqr::new());
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_from_json() {
        let ilqr = IlqrBuilder::from_json(r#"{"nb_steps": 12, "tolfun": 1e-6}"#)
            .unwrap()
            .build(Lqr::new())
            .unwrap();
        assert_eq!(ilqr.config().nb_steps, 12);
        assert_eq!(ilqr.config().tolfun, 1e-6);
    }
}
