use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{check_shape, Result};
use crate::linalg::{psd_lower, sample_gaussian, symmetrize};

/// Deterministic time-varying affine feedback around a reference trajectory
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinearControl {
    pub nb_xdim: usize,
    pub nb_udim: usize,
    pub nb_steps: usize,
    /// Feedback gains, shape `(nb_steps, du, dx)`
    pub gain: Array3<f64>,
    /// Feed-forward terms, shape `(nb_steps, du)`
    pub kff: Array2<f64>,
}

impl LinearControl {
    pub fn new(nb_xdim: usize, nb_udim: usize, nb_steps: usize) -> Self {
        LinearControl {
            nb_xdim,
            nb_udim,
            nb_steps,
            gain: Array3::zeros((nb_steps, nb_udim, nb_xdim)),
            kff: Array2::zeros((nb_steps, nb_udim)),
        }
    }

    pub fn from_parts(gain: Array3<f64>, kff: Array2<f64>) -> Result<Self> {
        let (nb_steps, nb_udim, nb_xdim) = gain.dim();
        check_shape("feed-forward", &[nb_steps, nb_udim], kff.shape())?;
        Ok(LinearControl {
            nb_xdim,
            nb_udim,
            nb_steps,
            gain,
            kff,
        })
    }

    pub fn gain_at(&self, t: usize) -> ArrayView2<f64> {
        self.gain.slice(s![t, .., ..])
    }

    /// `uref_t + alpha·kff_t + K_t (x − xref_t)`
    pub fn action(
        &self,
        x: ArrayView1<f64>,
        alpha: f64,
        xref: ArrayView2<f64>,
        uref: ArrayView2<f64>,
        t: usize,
    ) -> Array1<f64> {
        let dx = &x - &xref.row(t);
        &uref.row(t) + &(&self.kff.row(t) * alpha) + self.gain_at(t).dot(&dx)
    }
}

/// Time-varying linear-Gaussian policy `u ~ N(K x + kff, Σ)`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinearGaussianControl {
    pub nb_xdim: usize,
    pub nb_udim: usize,
    pub nb_steps: usize,
    pub gain: Array3<f64>,
    pub kff: Array2<f64>,
    pub sigma: Array3<f64>,
}

impl LinearGaussianControl {
    /// Zero gains with isotropic action noise `init_sigma·I`
    pub fn new(nb_xdim: usize, nb_udim: usize, nb_steps: usize, init_sigma: f64) -> Self {
        let mut sigma = Array3::zeros((nb_steps, nb_udim, nb_udim));
        for t in 0..nb_steps {
            sigma
                .slice_mut(s![t, .., ..])
                .assign(&(Array2::<f64>::eye(nb_udim) * init_sigma));
        }
        LinearGaussianControl {
            nb_xdim,
            nb_udim,
            nb_steps,
            gain: Array3::zeros((nb_steps, nb_udim, nb_xdim)),
            kff: Array2::zeros((nb_steps, nb_udim)),
            sigma,
        }
    }

    pub fn from_parts(gain: Array3<f64>, kff: Array2<f64>, sigma: Array3<f64>) -> Result<Self> {
        let (nb_steps, nb_udim, nb_xdim) = gain.dim();
        check_shape("feed-forward", &[nb_steps, nb_udim], kff.shape())?;
        check_shape("action noise", &[nb_steps, nb_udim, nb_udim], sigma.shape())?;
        Ok(LinearGaussianControl {
            nb_xdim,
            nb_udim,
            nb_steps,
            gain,
            kff,
            sigma,
        })
    }

    /// Replace the feed-forward terms by `scale·N(0, I)` draws
    pub fn randomize_feedforward<R: Rng + ?Sized>(&mut self, scale: f64, rng: &mut R) {
        self.kff = Array2::<f64>::random_using((self.nb_steps, self.nb_udim), StandardNormal, rng) * scale;
    }

    pub fn gain_at(&self, t: usize) -> ArrayView2<f64> {
        self.gain.slice(s![t, .., ..])
    }

    pub fn sigma_at(&self, t: usize) -> ArrayView2<f64> {
        self.sigma.slice(s![t, .., ..])
    }

    pub fn mean(&self, x: ArrayView1<f64>, t: usize) -> Array1<f64> {
        self.gain_at(t).dot(&x) + self.kff.row(t)
    }

    /// Draw an action; with `stochastic == false` this is the mean
    pub fn sample<R: Rng + ?Sized>(&self, x: ArrayView1<f64>, t: usize, stochastic: bool, rng: &mut R) -> Array1<f64> {
        let mu = self.mean(x, t);
        if !stochastic {
            return mu;
        }
        match psd_lower(self.sigma_at(t)) {
            Ok(lower) => sample_gaussian(mu.view(), lower.view(), rng),
            Err(_) => mu,
        }
    }

    /// Action distribution induced by `x ~ N(mu, sigma)`
    pub fn forward(&self, mu: ArrayView1<f64>, sigma: ArrayView2<f64>, t: usize) -> (Array1<f64>, Array2<f64>) {
        let gain = self.gain_at(t);
        let u_mu = self.mean(mu, t);
        let mut u_sigma = &self.sigma_at(t) + &gain.dot(&sigma).dot(&gain.t());
        symmetrize(&mut u_sigma);
        (u_mu, u_sigma)
    }
}
