//! Environment collaborators and the linearization provider.
//!
//! An [`Environment`] supplies the true dynamics, noise, cost and initial state
//! distribution the algorithms linearize, plus `reset`/`step` for sampling.
//! Derivatives come from the environment when it provides them in closed form,
//! otherwise from central finite differences (see [`Linearizer`]).

use ndarray::{s, Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::types::BoxSpace;

pub mod lqr;
pub mod pendulum;

pub use lqr::Lqr;
pub use pendulum::Pendulum;

/// Result of a single environment step
#[derive(Clone, Debug)]
pub struct Step {
    pub state: Array1<f64>,
    pub reward: f64,
    pub done: bool,
}

/// Second-order expansion of a scalar cost around `(x, u)`
#[derive(Clone, Debug)]
pub struct CostDerivatives {
    pub value: f64,
    pub cx: Array1<f64>,
    pub cu: Array1<f64>,
    pub cxx: Array2<f64>,
    pub cuu: Array2<f64>,
    pub cxu: Array2<f64>,
}

/// Trait for stochastic control environments
pub trait Environment: Clone + Send + Sync {
    fn observation_space(&self) -> &BoxSpace;

    fn action_space(&self) -> &BoxSpace;

    fn state_dim(&self) -> usize {
        self.observation_space().dim()
    }

    fn action_dim(&self) -> usize {
        self.action_space().dim()
    }

    /// Mean and covariance of the initial state
    fn init(&self) -> (Array1<f64>, Array2<f64>);

    /// Deterministic part of the transition
    fn dynamics(&self, x: ArrayView1<f64>, u: ArrayView1<f64>) -> Array1<f64>;

    /// Process noise covariance at `(x, u)`
    fn noise(&self, x: ArrayView1<f64>, u: ArrayView1<f64>) -> Array2<f64>;

    /// Cost of `(x, u)`; `active` gates sparse terms, `xref` is the point
    /// nonlinear state features are linearized around.
    fn cost(&self, x: ArrayView1<f64>, u: ArrayView1<f64>, active: bool, xref: ArrayView1<f64>) -> f64;

    /// Closed-form `(∂f/∂x, ∂f/∂u)`, if available
    fn dynamics_jacobians(&self, _x: ArrayView1<f64>, _u: ArrayView1<f64>) -> Option<(Array2<f64>, Array2<f64>)> {
        None
    }

    /// Closed-form cost expansion, if available
    fn cost_derivatives(
        &self,
        _x: ArrayView1<f64>,
        _u: ArrayView1<f64>,
        _active: bool,
        _xref: ArrayView1<f64>,
    ) -> Option<CostDerivatives> {
        None
    }

    /// Reseed the environment's noise source
    fn seed(&mut self, seed: u64);

    /// Draw an initial state
    fn reset(&mut self) -> Array1<f64>;

    /// Advance the environment by one noisy transition
    fn step(&mut self, u: ArrayView1<f64>) -> Step;
}

/// Where derivatives come from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinearizationMode {
    /// Environment-supplied derivatives, finite differences as fallback
    Analytical,
    /// Always central finite differences
    FiniteDifference,
}

/// Linearization provider for dynamics and cost
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Linearizer {
    pub mode: LinearizationMode,
    /// Relative step for Jacobians
    pub jacobian_step: f64,
    /// Relative step for Hessians
    pub hessian_step: f64,
}

impl Default for Linearizer {
    fn default() -> Self {
        Linearizer {
            mode: LinearizationMode::Analytical,
            jacobian_step: 1e-5,
            hessian_step: 1e-4,
        }
    }
}

impl Linearizer {
    pub fn finite_difference() -> Self {
        Linearizer {
            mode: LinearizationMode::FiniteDifference,
            ..Linearizer::default()
        }
    }

    /// `(A, B)` of the dynamics at `(x, u)`
    pub fn dynamics_jacobians<E: Environment>(
        &self,
        env: &E,
        x: ArrayView1<f64>,
        u: ArrayView1<f64>,
    ) -> (Array2<f64>, Array2<f64>) {
        if self.mode == LinearizationMode::Analytical {
            if let Some(jac) = env.dynamics_jacobians(x, u) {
                return jac;
            }
        }

        let nb_xdim = x.len();
        let z = join(x, u);
        let jac = finite_difference_jacobian(
            |z| env.dynamics(z.slice(s![..nb_xdim]), z.slice(s![nb_xdim..])),
            z.view(),
            self.jacobian_step,
        );
        (
            jac.slice(s![.., ..nb_xdim]).to_owned(),
            jac.slice(s![.., nb_xdim..]).to_owned(),
        )
    }

    /// Cost expansion at `(x, u)` with `xref` held fixed
    pub fn cost_derivatives<E: Environment>(
        &self,
        env: &E,
        x: ArrayView1<f64>,
        u: ArrayView1<f64>,
        active: bool,
        xref: ArrayView1<f64>,
    ) -> CostDerivatives {
        if self.mode == LinearizationMode::Analytical {
            if let Some(derivs) = env.cost_derivatives(x, u, active, xref) {
                return derivs;
            }
        }

        let nb_xdim = x.len();
        let z = join(x, u);
        let f = |z: ArrayView1<f64>| env.cost(z.slice(s![..nb_xdim]), z.slice(s![nb_xdim..]), active, xref);
        let value = f(z.view());
        let (grad, hess) = finite_difference_hessian(f, z.view(), self.hessian_step);

        CostDerivatives {
            value,
            cx: grad.slice(s![..nb_xdim]).to_owned(),
            cu: grad.slice(s![nb_xdim..]).to_owned(),
            cxx: hess.slice(s![..nb_xdim, ..nb_xdim]).to_owned(),
            cuu: hess.slice(s![nb_xdim.., nb_xdim..]).to_owned(),
            cxu: hess.slice(s![..nb_xdim, nb_xdim..]).to_owned(),
        }
    }
}

fn join(x: ArrayView1<f64>, u: ArrayView1<f64>) -> Array1<f64> {
    x.iter().chain(u.iter()).copied().collect()
}

fn perturbation(z: f64, step: f64) -> f64 {
    step * z.abs().max(1.0)
}

/// Central-difference Jacobian of a vector function, shape `(m, n)`
pub fn finite_difference_jacobian<F>(f: F, z: ArrayView1<f64>, step: f64) -> Array2<f64>
where
    F: Fn(ArrayView1<f64>) -> Array1<f64>,
{
    let n = z.len();
    let mut columns = Vec::with_capacity(n);
    let mut zp = z.to_owned();

    for i in 0..n {
        let h = perturbation(z[i], step);
        zp[i] = z[i] + h;
        let plus = f(zp.view());
        zp[i] = z[i] - h;
        let minus = f(zp.view());
        zp[i] = z[i];
        columns.push((plus - minus) / (2.0 * h));
    }

    let m = columns.first().map_or(0, |c| c.len());
    Array2::from_shape_fn((m, n), |(r, c)| columns[c][r])
}

/// Central-difference gradient and Hessian of a scalar function
pub fn finite_difference_hessian<F>(f: F, z: ArrayView1<f64>, step: f64) -> (Array1<f64>, Array2<f64>)
where
    F: Fn(ArrayView1<f64>) -> f64,
{
    let n = z.len();
    let h: Vec<f64> = z.iter().map(|&zi| perturbation(zi, step)).collect();
    let f0 = f(z);

    let mut zp = z.to_owned();
    let mut eval = |shifts: &[(usize, f64)]| {
        for &(i, d) in shifts {
            zp[i] += d;
        }
        let value = f(zp.view());
        for &(i, d) in shifts {
            zp[i] -= d;
        }
        value
    };

    let mut grad = Array1::zeros(n);
    let mut hess = Array2::zeros((n, n));
    for i in 0..n {
        let fp = eval(&[(i, h[i])]);
        let fm = eval(&[(i, -h[i])]);
        grad[i] = (fp - fm) / (2.0 * h[i]);
        hess[[i, i]] = (fp - 2.0 * f0 + fm) / (h[i] * h[i]);

        for j in 0..i {
            let fpp = eval(&[(i, h[i]), (j, h[j])]);
            let fpm = eval(&[(i, h[i]), (j, -h[j])]);
            let fmp = eval(&[(i, -h[i]), (j, h[j])]);
            let fmm = eval(&[(i, -h[i]), (j, -h[j])]);
            let value = (fpp - fpm - fmp + fmm) / (4.0 * h[i] * h[j]);
            hess[[i, j]] = value;
            hess[[j, i]] = value;
        }
    }

    (grad, hess)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_jacobian_of_linear_map() {
        let a = array![[1.0, 2.0, 0.5], [-1.0, 0.0, 3.0]];
        let jac = finite_difference_jacobian(|z| a.dot(&z), array![0.3, -2.0, 5.0].view(), 1e-5);
        for (x, y) in jac.iter().zip(a.iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_hessian_of_quadratic() {
        // f(z) = z0^2 + 3 z0 z1 - z1^2 + 2 z1
        let f = |z: ArrayView1<f64>| z[0] * z[0] + 3.0 * z[0] * z[1] - z[1] * z[1] + 2.0 * z[1];
        let (grad, hess) = finite_difference_hessian(f, array![1.0, -0.5].view(), 1e-4);

        assert_abs_diff_eq!(grad[0], 2.0 * 1.0 + 3.0 * -0.5, epsilon = 1e-7);
        assert_abs_diff_eq!(grad[1], 3.0 * 1.0 + 1.0 + 2.0, epsilon = 1e-7);
        assert_abs_diff_eq!(hess[[0, 0]], 2.0, epsilon = 1e-5);
        assert_abs_diff_eq!(hess[[0, 1]], 3.0, epsilon = 1e-5);
        assert_abs_diff_eq!(hess[[1, 0]], 3.0, epsilon = 1e-5);
        assert_abs_diff_eq!(hess[[1, 1]], -2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_analytical_and_finite_difference_agree_on_lqr() {
        let env = Lqr::new();
        let x = array![3.0, -1.0];
        let u = array![0.7];

        let analytical = Linearizer::default();
        let numerical = Linearizer::finite_difference();

        let (a1, b1) = analytical.dynamics_jacobians(&env, x.view(), u.view());
        let (a2, b2) = numerical.dynamics_jacobians(&env, x.view(), u.view());
        for (p, q) in a1.iter().zip(a2.iter()).chain(b1.iter().zip(b2.iter())) {
            assert_abs_diff_eq!(*p, *q, epsilon = 1e-7);
        }

        let c1 = analytical.cost_derivatives(&env, x.view(), u.view(), true, x.view());
        let c2 = numerical.cost_derivatives(&env, x.view(), u.view(), true, x.view());
        assert_abs_diff_eq!(c1.value, c2.value, epsilon = 1e-12);
        for (p, q) in c1.cx.iter().zip(c2.cx.iter()) {
            assert_abs_diff_eq!(*p, *q, epsilon = 1e-5);
        }
        for (p, q) in c1.cxx.iter().zip(c2.cxx.iter()) {
            assert_abs_diff_eq!(*p, *q, epsilon = 1e-3);
        }
        for (p, q) in c1.cuu.iter().zip(c2.cuu.iter()) {
            assert_abs_diff_eq!(*p, *q, epsilon = 1e-3);
        }
    }
}
