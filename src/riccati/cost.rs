use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::env::{CostDerivatives, Environment, Linearizer};
use crate::error::{check_shape, Result, TrajoptError};
use crate::linalg::quad_form;

/// Time-varying quadratic cost model
///
/// Entry `t` represents
/// `½xᵀCxx x + ½uᵀCuu u + xᵀCxu u + cxᵀx + cuᵀu + c0`
/// in absolute coordinates. `nb_steps` counts entries, i.e. horizon + 1.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuadraticCost {
    pub nb_xdim: usize,
    pub nb_udim: usize,
    pub nb_steps: usize,
    pub cxx: Array3<f64>,
    pub cuu: Array3<f64>,
    pub cxu: Array3<f64>,
    pub cx: Array2<f64>,
    pub cu: Array2<f64>,
    pub c0: Array1<f64>,
}

impl QuadraticCost {
    pub fn new(nb_xdim: usize, nb_udim: usize, nb_steps: usize) -> Self {
        QuadraticCost {
            nb_xdim,
            nb_udim,
            nb_steps,
            cxx: Array3::zeros((nb_steps, nb_xdim, nb_xdim)),
            cuu: Array3::zeros((nb_steps, nb_udim, nb_udim)),
            cxu: Array3::zeros((nb_steps, nb_xdim, nb_udim)),
            cx: Array2::zeros((nb_steps, nb_xdim)),
            cu: Array2::zeros((nb_steps, nb_udim)),
            c0: Array1::zeros(nb_steps),
        }
    }

    pub fn from_parts(
        cxx: Array3<f64>,
        cuu: Array3<f64>,
        cxu: Array3<f64>,
        cx: Array2<f64>,
        cu: Array2<f64>,
        c0: Array1<f64>,
    ) -> Result<Self> {
        let (nb_steps, nb_xdim, _) = cxx.dim();
        let nb_udim = cuu.shape()[1];

        check_shape("cxx", &[nb_steps, nb_xdim, nb_xdim], cxx.shape())?;
        check_shape("cuu", &[nb_steps, nb_udim, nb_udim], cuu.shape())?;
        check_shape("cxu", &[nb_steps, nb_xdim, nb_udim], cxu.shape())?;
        check_shape("cx", &[nb_steps, nb_xdim], cx.shape())?;
        check_shape("cu", &[nb_steps, nb_udim], cu.shape())?;
        check_shape("c0", &[nb_steps], c0.shape())?;

        Ok(QuadraticCost {
            nb_xdim,
            nb_udim,
            nb_steps,
            cxx,
            cuu,
            cxu,
            cx,
            cu,
            c0,
        })
    }

    /// Store a local expansion taken at `(x, u)` as entry `t`
    pub fn set_expansion(&mut self, t: usize, derivs: &CostDerivatives, x: ArrayView1<f64>, u: ArrayView1<f64>) {
        let cxx = &derivs.cxx;
        let cuu = &derivs.cuu;
        let cxu = &derivs.cxu;

        let cx = &derivs.cx - &cxx.dot(&x) - &cxu.dot(&u);
        let cu = &derivs.cu - &cuu.dot(&u) - &cxu.t().dot(&x);
        let c0 = derivs.value - derivs.cx.dot(&x) - derivs.cu.dot(&u)
            + 0.5 * quad_form(x, cxx.view(), x)
            + 0.5 * quad_form(u, cuu.view(), u)
            + quad_form(x, cxu.view(), u);

        self.cxx.slice_mut(s![t, .., ..]).assign(cxx);
        self.cuu.slice_mut(s![t, .., ..]).assign(cuu);
        self.cxu.slice_mut(s![t, .., ..]).assign(cxu);
        self.cx.row_mut(t).assign(&cx);
        self.cu.row_mut(t).assign(&cu);
        self.c0[t] = c0;
    }

    /// Model value of entry `t` at `(x, u)`
    pub fn eval_step(&self, t: usize, x: ArrayView1<f64>, u: ArrayView1<f64>) -> f64 {
        0.5 * quad_form(x, self.cxx.slice(s![t, .., ..]), x)
            + 0.5 * quad_form(u, self.cuu.slice(s![t, .., ..]), u)
            + quad_form(x, self.cxu.slice(s![t, .., ..]), u)
            + self.cx.row(t).dot(&x)
            + self.cu.row(t).dot(&u)
            + self.c0[t]
    }

    /// Sum of the model along a trajectory.
    ///
    /// `x` has `nb_steps` rows, `u` one fewer; the last step uses a zero action.
    pub fn evaluate(&self, x: ArrayView2<f64>, u: ArrayView2<f64>) -> Result<f64> {
        let last = last_entry(self.nb_steps)?;
        check_shape("state trajectory", &[self.nb_steps, self.nb_xdim], x.shape())?;
        check_shape("action trajectory", &[last, self.nb_udim], u.shape())?;

        let mut total = 0.0;
        for t in 0..last {
            total += self.eval_step(t, x.row(t), u.row(t));
        }
        total += self.eval_step(last, x.row(last), Array1::zeros(self.nb_udim).view());
        Ok(total)
    }

    /// Local gradients `(∂c/∂x, ∂c/∂u)` of entry `t` at `(x, u)`
    pub fn gradients_at(&self, t: usize, x: ArrayView1<f64>, u: ArrayView1<f64>) -> (Array1<f64>, Array1<f64>) {
        let cxx = self.cxx.slice(s![t, .., ..]);
        let cuu = self.cuu.slice(s![t, .., ..]);
        let cxu = self.cxu.slice(s![t, .., ..]);

        let lx = cxx.dot(&x) + cxu.dot(&u) + self.cx.row(t);
        let lu = cuu.dot(&u) + cxu.t().dot(&x) + self.cu.row(t);
        (lx, lu)
    }
}

// index of the terminal entry, an empty cost has none
fn last_entry(nb_steps: usize) -> Result<usize> {
    nb_steps
        .checked_sub(1)
        .ok_or_else(|| TrajoptError::invalid_parameter("nb_steps", "cost needs at least the terminal entry"))
}

/// Activation mask over `nb_steps + 1` entries.
///
/// The last step is always active; `active` lists additional step indices.
pub fn activation_mask(nb_steps: usize, active: &[usize]) -> Result<Vec<bool>> {
    let mut mask = vec![false; nb_steps + 1];
    mask[nb_steps] = true;
    for &t in active {
        if t > nb_steps {
            return Err(TrajoptError::invalid_parameter(
                "activation".to_string(),
                format!("step {} outside horizon {}", t, nb_steps),
            ));
        }
        mask[t] = true;
    }
    Ok(mask)
}

/// Quadratic expansion of an environment's cost along a trajectory
#[derive(Clone, Debug)]
pub struct AnalyticalQuadraticCost {
    pub nb_xdim: usize,
    pub nb_udim: usize,
    pub nb_steps: usize,
    linearizer: Linearizer,
}

impl AnalyticalQuadraticCost {
    pub fn new(nb_xdim: usize, nb_udim: usize, nb_steps: usize, linearizer: Linearizer) -> Self {
        AnalyticalQuadraticCost {
            nb_xdim,
            nb_udim,
            nb_steps,
            linearizer,
        }
    }

    /// True cost with the feature reference at `x` itself
    pub fn evalf<E: Environment>(&self, env: &E, x: ArrayView1<f64>, u: ArrayView1<f64>, active: bool) -> f64 {
        env.cost(x, u, active, x)
    }

    /// Expand around every `(x_t, u_t)`; the action is padded with zeros at the
    /// last step and `xref_t = x_t` is held fixed while differentiating.
    pub fn taylor_expansion<E: Environment>(
        &self,
        env: &E,
        x: ArrayView2<f64>,
        u: ArrayView2<f64>,
        activation: &[bool],
    ) -> Result<QuadraticCost> {
        let last = last_entry(self.nb_steps)?;
        check_shape("state trajectory", &[self.nb_steps, self.nb_xdim], x.shape())?;
        check_shape("action trajectory", &[last, self.nb_udim], u.shape())?;
        check_shape("activation", &[self.nb_steps], &[activation.len()])?;

        let zero = Array1::zeros(self.nb_udim);
        let mut cost = QuadraticCost::new(self.nb_xdim, self.nb_udim, self.nb_steps);
        for t in 0..self.nb_steps {
            let xt = x.row(t);
            let ut = if t < last { u.row(t) } else { zero.view() };
            let derivs = self.linearizer.cost_derivatives(env, xt, ut, activation[t], xt);
            cost.set_expansion(t, &derivs, xt, ut);
        }
        Ok(cost)
    }
}
