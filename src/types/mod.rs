use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{check_shape, Result, TrajoptError};
use crate::linalg::symmetrize;

/// Box-shaped state or action space
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoxSpace {
    pub low: Array1<f64>,
    pub high: Array1<f64>,
}

impl BoxSpace {
    pub fn new(low: Array1<f64>, high: Array1<f64>) -> Result<Self> {
        if low.len() != high.len() {
            return Err(TrajoptError::dimension_mismatch(
                format!("high bound of length {}", low.len()),
                format!("{}", high.len()),
            ));
        }
        if low.iter().zip(high.iter()).any(|(l, h)| l > h) {
            return Err(TrajoptError::invalid_parameter("low", "lower bound exceeds upper bound"));
        }
        Ok(BoxSpace { low, high })
    }

    /// Unbounded space of the given dimension
    pub fn unbounded(dim: usize) -> Self {
        BoxSpace {
            low: Array1::from_elem(dim, f64::NEG_INFINITY),
            high: Array1::from_elem(dim, f64::INFINITY),
        }
    }

    /// Symmetric space `[-limit, limit]` in every dimension
    pub fn symmetric(dim: usize, limit: f64) -> Self {
        BoxSpace {
            low: Array1::from_elem(dim, -limit),
            high: Array1::from_elem(dim, limit),
        }
    }

    /// Get the dimensionality of the space
    pub fn dim(&self) -> usize {
        self.low.len()
    }

    /// Check if a point lies in the space
    pub fn contains(&self, x: ArrayView1<f64>) -> bool {
        x.len() == self.dim()
            && x.iter()
                .zip(self.low.iter())
                .zip(self.high.iter())
                .all(|((&v, &l), &h)| v >= l && v <= h)
    }

    /// Project a point onto the space
    pub fn clip(&self, x: ArrayView1<f64>) -> Array1<f64> {
        let mut out = x.to_owned();
        ndarray::Zip::from(&mut out)
            .and(&self.low)
            .and(&self.high)
            .for_each(|v, &l, &h| *v = v.max(l).min(h));
        out
    }
}

/// Time-indexed Gaussian distribution over a trajectory.
///
/// Entry `t` holds the marginal mean `mu[t]` and covariance `sigma[t]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Gaussian {
    pub dim: usize,
    pub nb_steps: usize,
    pub mu: Array2<f64>,
    pub sigma: Array3<f64>,
}

impl Gaussian {
    pub fn new(dim: usize, nb_steps: usize) -> Self {
        Gaussian {
            dim,
            nb_steps,
            mu: Array2::zeros((nb_steps, dim)),
            sigma: Array3::zeros((nb_steps, dim, dim)),
        }
    }

    pub fn from_parts(mu: Array2<f64>, sigma: Array3<f64>) -> Result<Self> {
        let (nb_steps, dim) = mu.dim();
        check_shape("covariance trajectory", &[nb_steps, dim, dim], sigma.shape())?;
        Ok(Gaussian { dim, nb_steps, mu, sigma })
    }

    pub fn mean(&self, t: usize) -> ArrayView1<f64> {
        self.mu.row(t)
    }

    pub fn cov(&self, t: usize) -> ArrayView2<f64> {
        self.sigma.slice(s![t, .., ..])
    }

    /// Overwrite entry `t`, symmetrizing the covariance
    pub fn set(&mut self, t: usize, mu: ArrayView1<f64>, sigma: ArrayView2<f64>) {
        self.mu.row_mut(t).assign(&mu);
        let mut sym = sigma.to_owned();
        symmetrize(&mut sym);
        self.sigma.slice_mut(s![t, .., ..]).assign(&sym);
    }

    /// Per-step marginal standard deviations, shape `(nb_steps, dim)`
    pub fn std_devs(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.nb_steps, self.dim), |(t, i)| {
            self.sigma[[t, i, i]].max(0.0).sqrt()
        })
    }
}
