//! Time-varying linear-Gaussian dynamics fitted from sampled rollouts.
//!
//! Each step is an independent affine regression of `x_{t+1}` on
//! `φ = [x_t; u_t; 1]`. The regression itself is a pluggable
//! [`DynamicsRegression`]; the default is the conjugate
//! Matrix-Normal-Inverse-Wishart posterior, whose prior keeps the problem
//! well-posed with fewer samples than regressors.

use std::fmt;

use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{check_shape, Result, TrajoptError};
use crate::linalg::{symmetrize, SpdFactor};
use crate::parallel::Rollouts;
use crate::riccati::LinearGaussianDynamics;

/// Affine-Gaussian model of one transition: `x' ~ N(A x + B u + c, Σ)`
#[derive(Clone, Debug)]
pub struct AffineGaussianStep {
    pub a: Array2<f64>,
    pub b: Array2<f64>,
    pub c: Array1<f64>,
    pub sigma: Array2<f64>,
}

/// Fits one transition model from `N` stacked samples
pub trait DynamicsRegression: Send + Sync + fmt::Debug {
    /// `x (N, dx)`, `u (N, du)`, `xn (N, dx)`
    fn fit(&self, x: ArrayView2<f64>, u: ArrayView2<f64>, xn: ArrayView2<f64>) -> Result<AffineGaussianStep>;
}

/// Conjugate Matrix-Normal-Inverse-Wishart regression with a zero prior mean.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixNormalInverseWishart {
    /// Prior precision `κ` of the coefficients, `K0 = κI`
    pub coef_precision: f64,
    /// Prior scale of the noise, `Ψ0 = ψI`
    pub psi: f64,
    /// Prior degrees of freedom beyond `dx`
    pub extra_dof: f64,
}

impl Default for MatrixNormalInverseWishart {
    fn default() -> Self {
        MatrixNormalInverseWishart {
            coef_precision: 1e-6,
            psi: 1e-6,
            extra_dof: 2.0,
        }
    }
}

impl MatrixNormalInverseWishart {
    pub fn new(coef_precision: f64, psi: f64) -> Result<Self> {
        if !(coef_precision > 0.0) {
            return Err(TrajoptError::invalid_parameter(
                "coef_precision".to_string(),
                format!("must be positive, got {}", coef_precision),
            ));
        }
        if !(psi > 0.0) {
            return Err(TrajoptError::invalid_parameter("psi".to_string(), format!("must be positive, got {}", psi)));
        }
        Ok(MatrixNormalInverseWishart {
            coef_precision,
            psi,
            ..MatrixNormalInverseWishart::default()
        })
    }
}

impl DynamicsRegression for MatrixNormalInverseWishart {
    fn fit(&self, x: ArrayView2<f64>, u: ArrayView2<f64>, xn: ArrayView2<f64>) -> Result<AffineGaussianStep> {
        let nb_samples = x.nrows();
        let nb_xdim = x.ncols();
        let nb_udim = u.ncols();
        check_shape("regression actions", &[nb_samples, nb_udim], u.shape())?;
        check_shape("regression targets", &[nb_samples, nb_xdim], xn.shape())?;
        if nb_samples == 0 {
            return Err(TrajoptError::InsufficientData("no transitions to regress on".to_string()));
        }

        let nb_feat = nb_xdim + nb_udim + 1;
        let mut phi = Array2::ones((nb_samples, nb_feat));
        phi.slice_mut(s![.., ..nb_xdim]).assign(&x);
        phi.slice_mut(s![.., nb_xdim..nb_xdim + nb_udim]).assign(&u);

        let prior_precision = Array2::<f64>::eye(nb_feat) * self.coef_precision;
        let mut precision = &prior_precision + &phi.t().dot(&phi);
        symmetrize(&mut precision);
        let factor = SpdFactor::try_new(precision.view(), "regression precision")?;

        // posterior mean of the coefficients, (dx, nb_feat)
        let coef = xn.t().dot(&phi).dot(&factor.inverse);
        let residual = &xn - &phi.dot(&coef.t());

        let mut scatter = Array2::<f64>::eye(nb_xdim) * self.psi;
        scatter += &residual.t().dot(&residual);
        scatter += &coef.dot(&prior_precision).dot(&coef.t());

        let nu = nb_xdim as f64 + self.extra_dof + nb_samples as f64;
        let mut sigma = scatter / (nu + nb_xdim as f64 + 1.0);

        let phi_mean = phi
            .mean_axis(Axis(0))
            .ok_or_else(|| TrajoptError::InsufficientData("no transitions to regress on".to_string()))?;
        let inflation = 1.0 + phi_mean.dot(&factor.inverse.dot(&phi_mean));
        sigma *= inflation;
        symmetrize(&mut sigma);

        Ok(AffineGaussianStep {
            a: coef.slice(s![.., ..nb_xdim]).to_owned(),
            b: coef.slice(s![.., nb_xdim..nb_xdim + nb_udim]).to_owned(),
            c: coef.column(nb_feat - 1).to_owned(),
            sigma,
        })
    }
}

/// Learns [`LinearGaussianDynamics`] over a horizon from rollouts
#[derive(Debug)]
pub struct LearnedLinearGaussianDynamics {
    pub nb_xdim: usize,
    pub nb_udim: usize,
    pub nb_steps: usize,
    regression: Box<dyn DynamicsRegression>,
}

impl LearnedLinearGaussianDynamics {
    pub fn new(nb_xdim: usize, nb_udim: usize, nb_steps: usize) -> Self {
        LearnedLinearGaussianDynamics {
            nb_xdim,
            nb_udim,
            nb_steps,
            regression: Box::new(MatrixNormalInverseWishart::default()),
        }
    }

    pub fn with_regression(mut self, regression: Box<dyn DynamicsRegression>) -> Self {
        self.regression = regression;
        self
    }

    /// Fit every step on the transitions of all episodes
    pub fn learn(&self, rollouts: &Rollouts) -> Result<LinearGaussianDynamics> {
        if rollouts.is_empty() {
            return Err(TrajoptError::InsufficientData(
                "cannot learn dynamics from zero episodes".to_string(),
            ));
        }
        check_shape("rollout horizon", &[self.nb_steps], &[rollouts.nb_steps()])?;

        let mut dynamics = LinearGaussianDynamics::new(self.nb_xdim, self.nb_udim, self.nb_steps);
        for t in 0..self.nb_steps {
            let (x, u, xn) = rollouts.transitions_at(t);
            check_shape("sampled states", &[rollouts.nb_episodes(), self.nb_xdim], x.shape())?;
            let step = self.regression.fit(x.view(), u.view(), xn.view())?;
            dynamics.set_step(t, step.a.view(), step.b.view(), step.c.view(), step.sigma.view());
        }
        Ok(dynamics)
    }
}
