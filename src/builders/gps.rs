use crate::env::{Environment, Linearizer};
use crate::error::{Result, TrajoptError};
use crate::gps::{DynamicsRegression, GpsConfig, Mbgps, Mfgps};

/// Settings shared by the GPS builders
struct GpsSettings {
    config: GpsConfig,
    nb_steps: Option<usize>,
    kl_bound: Option<f64>,
}

impl GpsSettings {
    fn new() -> Self {
        GpsSettings {
            config: GpsConfig::default(),
            nb_steps: None,
            kl_bound: None,
        }
    }

    fn from_config(config: GpsConfig) -> Self {
        GpsSettings {
            nb_steps: Some(config.nb_steps),
            kl_bound: Some(config.kl_bound),
            config,
        }
    }

    fn finish(self) -> Result<GpsConfig> {
        let nb_steps = self.nb_steps.ok_or_else(|| TrajoptError::InvalidParameter {
            name: "nb_steps".to_string(),
            reason: "Horizon not specified".to_string(),
        })?;
        let kl_bound = self.kl_bound.ok_or_else(|| TrajoptError::InvalidParameter {
            name: "kl_bound".to_string(),
            reason: "KL bound not specified".to_string(),
        })?;
        Ok(GpsConfig {
            nb_steps,
            kl_bound,
            ..self.config
        })
    }
}

macro_rules! gps_builder_setters {
    () => {
        /// Set the horizon
        pub fn nb_steps(mut self, nb_steps: usize) -> Self {
            self.settings.nb_steps = Some(nb_steps);
            self
        }

        /// Set the base KL bound of the trust region
        pub fn kl_bound(mut self, kl_bound: f64) -> Self {
            self.settings.kl_bound = Some(kl_bound);
            self
        }

        /// Set the clipping range of the KL multiplier
        pub fn kl_mult_range(mut self, min: f64, max: f64) -> Self {
            self.settings.config.kl_mult_min = min;
            self.settings.config.kl_mult_max = max;
            self
        }

        /// Set the initial controller covariance scale
        pub fn init_ctl_sigma(mut self, sigma: f64) -> Self {
            self.settings.config.init_ctl_sigma = sigma;
            self
        }

        /// Steps whose sparse cost terms are active besides the last one
        pub fn activation(mut self, activation: Vec<usize>) -> Self {
            self.settings.config.activation = activation;
            self
        }

        /// Set the dual search range and starting point
        pub fn alpha_range(mut self, lower: f64, upper: f64, init: f64) -> Self {
            self.settings.config.alpha_lower = lower;
            self.settings.config.alpha_upper = upper;
            self.settings.config.alpha_init = init;
            self
        }

        pub fn linearizer(mut self, linearizer: Linearizer) -> Self {
            self.settings.config.linearizer = linearizer;
            self
        }

        pub fn seed(mut self, seed: u64) -> Self {
            self.settings.config.seed = seed;
            self
        }
    };
}

/// Builder for [`Mbgps`]
pub struct MbgpsBuilder {
    settings: GpsSettings,
}

impl MbgpsBuilder {
    /// Create a new model-based GPS builder
    pub fn new() -> Self {
        MbgpsBuilder {
            settings: GpsSettings::new(),
        }
    }

    pub fn from_config(config: GpsConfig) -> Self {
        MbgpsBuilder {
            settings: GpsSettings::from_config(config),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(MbgpsBuilder::from_config(GpsConfig::from_json(json)?))
    }

    gps_builder_setters!();

    /// Build the optimizer for `env`
    pub fn build<E: Environment>(self, env: E) -> Result<Mbgps<E>> {
        Mbgps::new(env, self.settings.finish()?)
    }
}

impl Default for MbgpsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`Mfgps`]
pub struct MfgpsBuilder {
    settings: GpsSettings,
    regression: Option<Box<dyn DynamicsRegression>>,
}

impl MfgpsBuilder {
    /// Create a new model-free GPS builder
    pub fn new() -> Self {
        MfgpsBuilder {
            settings: GpsSettings::new(),
            regression: None,
        }
    }

    pub fn from_config(config: GpsConfig) -> Self {
        MfgpsBuilder {
            settings: GpsSettings::from_config(config),
            regression: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(MfgpsBuilder::from_config(GpsConfig::from_json(json)?))
    }

    gps_builder_setters!();

    /// Learn the dynamics with a custom regression
    pub fn regression(mut self, regression: Box<dyn DynamicsRegression>) -> Self {
        self.regression = Some(regression);
        self
    }

    /// Build the optimizer for `env`
    pub fn build<E: Environment>(self, env: E) -> Result<Mfgps<E>> {
        let gps = Mfgps::new(env, self.settings.finish()?)?;
        Ok(match self.regression {
            Some(regression) => gps.with_regression(regression),
            None => gps,
        })
    }
}

impl Default for MfgpsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Lqr;
    use crate::gps::MatrixNormalInverseWishart;

    #[test]
    fn test_mbgps_builder() {
        let gps = MbgpsBuilder::new()
            .nb_steps(15)
            .kl_bound(0.5)
            .kl_mult_range(0.2, 4.0)
            .seed(3)
            .build(Lqr::new())
            .unwrap();

        assert_eq!(gps.config().nb_steps, 15);
        assert_eq!(gps.trust_region().kl_bound, 0.5);
        assert_eq!(gps.trust_region().kl_mult_max, 4.0);
    }

    #[test]
    fn test_mfgps_builder_with_regression() {
        let gps = MfgpsBuilder::new()
            .nb_steps(10)
            .kl_bound(0.1)
            .regression(Box::new(MatrixNormalInverseWishart::new(1e-3, 1e-3).unwrap()))
            .build(Lqr::new())
            .unwrap();
        assert_eq!(gps.controller().nb_steps, 10);
    }

    #[test]
    fn test_builder_errors() {
        // No KL bound
        assert!(MbgpsBuilder::new().nb_steps(10).build(Lqr::new()).is_err());

        // No horizon
        assert!(MfgpsBuilder::new().kl_bound(0.1).build(Lqr::new()).is_err());

        // Dual range on the wrong side of zero
        let result = MbgpsBuilder::new()
            .nb_steps(10)
            .kl_bound(0.1)
            .alpha_range(1.0, 2.0, 1.5)
            .build(Lqr::new());
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_from_json() {
        let gps = MbgpsBuilder::from_json(r#"{"nb_steps": 8, "kl_bound": 2.0, "activation": [3]}"#)
            .unwrap()
            .build(Lqr::new())
            .unwrap();
        assert_eq!(gps.config().activation, vec![3]);
    }
}
