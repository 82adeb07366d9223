use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::env::{Environment, Linearizer};
use crate::error::{check_shape, Result};

/// Time-varying linear-Gaussian dynamics `x' ~ N(A x + B u + c, Σ)`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinearGaussianDynamics {
    pub nb_xdim: usize,
    pub nb_udim: usize,
    pub nb_steps: usize,
    pub a: Array3<f64>,
    pub b: Array3<f64>,
    pub c: Array2<f64>,
    pub sigma: Array3<f64>,
}

impl LinearGaussianDynamics {
    pub fn new(nb_xdim: usize, nb_udim: usize, nb_steps: usize) -> Self {
        LinearGaussianDynamics {
            nb_xdim,
            nb_udim,
            nb_steps,
            a: Array3::zeros((nb_steps, nb_xdim, nb_xdim)),
            b: Array3::zeros((nb_steps, nb_xdim, nb_udim)),
            c: Array2::zeros((nb_steps, nb_xdim)),
            sigma: Array3::zeros((nb_steps, nb_xdim, nb_xdim)),
        }
    }

    pub fn from_parts(a: Array3<f64>, b: Array3<f64>, c: Array2<f64>, sigma: Array3<f64>) -> Result<Self> {
        let (nb_steps, nb_xdim, _) = a.dim();
        let nb_udim = b.shape()[2];

        check_shape("A", &[nb_steps, nb_xdim, nb_xdim], a.shape())?;
        check_shape("B", &[nb_steps, nb_xdim, nb_udim], b.shape())?;
        check_shape("c", &[nb_steps, nb_xdim], c.shape())?;
        check_shape("dynamics noise", &[nb_steps, nb_xdim, nb_xdim], sigma.shape())?;

        Ok(LinearGaussianDynamics {
            nb_xdim,
            nb_udim,
            nb_steps,
            a,
            b,
            c,
            sigma,
        })
    }

    pub fn set_step(
        &mut self,
        t: usize,
        a: ArrayView2<f64>,
        b: ArrayView2<f64>,
        c: ArrayView1<f64>,
        sigma: ArrayView2<f64>,
    ) {
        self.a.slice_mut(s![t, .., ..]).assign(&a);
        self.b.slice_mut(s![t, .., ..]).assign(&b);
        self.c.row_mut(t).assign(&c);
        self.sigma.slice_mut(s![t, .., ..]).assign(&sigma);
    }

    pub fn a_at(&self, t: usize) -> ArrayView2<f64> {
        self.a.slice(s![t, .., ..])
    }

    pub fn b_at(&self, t: usize) -> ArrayView2<f64> {
        self.b.slice(s![t, .., ..])
    }

    pub fn sigma_at(&self, t: usize) -> ArrayView2<f64> {
        self.sigma.slice(s![t, .., ..])
    }

    /// Mean successor `A_t x + B_t u + c_t`
    pub fn predict(&self, t: usize, x: ArrayView1<f64>, u: ArrayView1<f64>) -> Array1<f64> {
        self.a_at(t).dot(&x) + self.b_at(t).dot(&u) + self.c.row(t)
    }
}

/// First-order expansion of an environment's dynamics along a trajectory
#[derive(Clone, Debug)]
pub struct AnalyticalLinearDynamics {
    pub nb_xdim: usize,
    pub nb_udim: usize,
    pub nb_steps: usize,
    linearizer: Linearizer,
}

impl AnalyticalLinearDynamics {
    pub fn new(nb_xdim: usize, nb_udim: usize, nb_steps: usize, linearizer: Linearizer) -> Self {
        AnalyticalLinearDynamics {
            nb_xdim,
            nb_udim,
            nb_steps,
            linearizer,
        }
    }

    /// `(A, B, c, Σ)` at a single operating point; `c` absorbs the residual so
    /// the model is exact at `(x, u)`.
    pub fn linearize<E: Environment>(
        &self,
        env: &E,
        x: ArrayView1<f64>,
        u: ArrayView1<f64>,
    ) -> (Array2<f64>, Array2<f64>, Array1<f64>, Array2<f64>) {
        let (a, b) = self.linearizer.dynamics_jacobians(env, x, u);
        let c = env.dynamics(x, u) - a.dot(&x) - b.dot(&u);
        (a, b, c, env.noise(x, u))
    }

    /// Expand around every `(x_t, u_t)`, `t < nb_steps`.
    ///
    /// `x` is a state trajectory with `nb_steps + 1` rows.
    pub fn taylor_expansion<E: Environment>(
        &self,
        env: &E,
        x: ArrayView2<f64>,
        u: ArrayView2<f64>,
    ) -> Result<LinearGaussianDynamics> {
        check_shape("state trajectory", &[self.nb_steps + 1, self.nb_xdim], x.shape())?;
        check_shape("action trajectory", &[self.nb_steps, self.nb_udim], u.shape())?;

        let mut dynamics = LinearGaussianDynamics::new(self.nb_xdim, self.nb_udim, self.nb_steps);
        for t in 0..self.nb_steps {
            let (a, b, c, sigma) = self.linearize(env, x.row(t), u.row(t));
            dynamics.set_step(t, a.view(), b.view(), c.view(), sigma.view());
        }
        Ok(dynamics)
    }
}
