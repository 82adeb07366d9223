use ndarray::{s, Array1, Array2, ArrayView2};

use crate::error::{check_shape, Result, TrajoptError};
use crate::ilqr::RegularizationMode;
use crate::linalg::{symmetrize, SpdFactor};
use crate::riccati::{LinearControl, LinearGaussianDynamics, QuadraticCost, QuadraticStateActionValue, QuadraticStateValue};

/// Output of [`backward_pass`]
#[derive(Clone, Debug)]
pub struct IlqrBackward {
    pub ctl: LinearControl,
    pub vfunc: QuadraticStateValue,
    pub qfunc: QuadraticStateActionValue,
    /// `(Σ kffᵀqu, Σ ½kffᵀQuu kff)`: expected improvement of a step `α` is
    /// `−α(dv[0] + α·dv[1])`
    pub dv: [f64; 2],
}

/// Regularized Riccati recursion in deviation coordinates around
/// `(xref, uref)`.
///
/// Fails with [`TrajoptError::Diverged`] when the regularized `Quu` is not
/// positive definite.
pub fn backward_pass(
    cost: &QuadraticCost,
    dynamics: &LinearGaussianDynamics,
    xref: ArrayView2<f64>,
    uref: ArrayView2<f64>,
    lmbda: f64,
    mode: RegularizationMode,
) -> Result<IlqrBackward> {
    let nb_xdim = dynamics.nb_xdim;
    let nb_udim = dynamics.nb_udim;
    let nb_steps = dynamics.nb_steps;
    check_shape(
        "cost horizon",
        &[nb_steps + 1, nb_xdim, nb_udim],
        &[cost.nb_steps, cost.nb_xdim, cost.nb_udim],
    )?;
    check_shape("state reference", &[nb_steps + 1, nb_xdim], xref.shape())?;
    check_shape("action reference", &[nb_steps, nb_udim], uref.shape())?;

    let mut ctl = LinearControl::new(nb_xdim, nb_udim, nb_steps);
    let mut vfunc = QuadraticStateValue::new(nb_xdim, nb_steps + 1);
    let mut qfunc = QuadraticStateActionValue::new(nb_xdim, nb_udim, nb_steps);
    let mut dv = [0.0, 0.0];

    let zero = Array1::zeros(nb_udim);
    let (lx, _) = cost.gradients_at(nb_steps, xref.row(nb_steps), zero.view());
    vfunc.vxx.slice_mut(s![nb_steps, .., ..]).assign(&cost.cxx.slice(s![nb_steps, .., ..]));
    vfunc.vx.row_mut(nb_steps).assign(&lx);

    let damping_u = Array2::<f64>::eye(nb_udim) * lmbda;
    let damping_x = Array2::<f64>::eye(nb_xdim) * lmbda;

    for t in (0..nb_steps).rev() {
        let a = dynamics.a_at(t);
        let b = dynamics.b_at(t);
        let cxx = cost.cxx.slice(s![t, .., ..]);
        let cuu = cost.cuu.slice(s![t, .., ..]);
        let cux = cost.cxu.slice(s![t, .., ..]).reversed_axes();
        let (lx, lu) = cost.gradients_at(t, xref.row(t), uref.row(t));

        let vxx_next = vfunc.vxx.slice(s![t + 1, .., ..]).to_owned();
        let vx_next = vfunc.vx.row(t + 1).to_owned();

        let qx = &lx + &a.t().dot(&vx_next);
        let qu = &lu + &b.t().dot(&vx_next);
        let qxx = &cxx + &a.t().dot(&vxx_next).dot(&a);
        let mut quu = &cuu + &b.t().dot(&vxx_next).dot(&b);
        symmetrize(&mut quu);
        let qux = &cux + &b.t().dot(&vxx_next).dot(&a);

        let (quu_reg, qux_reg) = match mode {
            RegularizationMode::Control => (&quu + &damping_u, qux.clone()),
            RegularizationMode::State => {
                let vxx_reg = &vxx_next + &damping_x;
                let mut quu_reg = &cuu + &b.t().dot(&vxx_reg).dot(&b);
                symmetrize(&mut quu_reg);
                (quu_reg, &cux + &b.t().dot(&vxx_reg).dot(&a))
            }
        };

        let factor = SpdFactor::new(quu_reg.view()).ok_or(TrajoptError::Diverged { step: t })?;
        let gain = -factor.inverse.dot(&qux_reg);
        let kff = -factor.inverse.dot(&qu);

        dv[0] += kff.dot(&qu);
        dv[1] += 0.5 * kff.dot(&quu.dot(&kff));

        let quu_gain = quu.dot(&gain);
        let mut vxx = &qxx + &gain.t().dot(&quu_gain) + gain.t().dot(&qux) + qux.t().dot(&gain);
        symmetrize(&mut vxx);
        let vx = &qx + &gain.t().dot(&quu.dot(&kff)) + gain.t().dot(&qu) + qux.t().dot(&kff);

        vfunc.vxx.slice_mut(s![t, .., ..]).assign(&vxx);
        vfunc.vx.row_mut(t).assign(&vx);

        qfunc.qxx.slice_mut(s![t, .., ..]).assign(&qxx);
        qfunc.qux.slice_mut(s![t, .., ..]).assign(&qux);
        qfunc.quu.slice_mut(s![t, .., ..]).assign(&quu);
        qfunc.qx.row_mut(t).assign(&qx);
        qfunc.qu.row_mut(t).assign(&qu);

        ctl.gain.slice_mut(s![t, .., ..]).assign(&gain);
        ctl.kff.row_mut(t).assign(&kff);
    }

    Ok(IlqrBackward { ctl, vfunc, qfunc, dv })
}
