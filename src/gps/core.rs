//! Recursions of the KL-constrained linear-Gaussian trajectory optimizer.
//!
//! The dual variable `alpha < 0` enters through `η = −alpha`, the multiplier
//! of the KL constraint. For a fixed `alpha` the constrained problem becomes
//! a soft-optimal control problem with the augmented cost
//! `c/η − log π̄(u|x)`, solved exactly by [`backward_pass`].

use std::f64::consts::PI;

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2};

use crate::env::Environment;
use crate::error::{check_shape, Result, TrajoptError};
use crate::linalg::{quad_form, symmetrize, trace_of_product, SpdFactor};
use crate::optimizer::BoundedScalarMinimizer;
use crate::riccati::{
    AnalyticalLinearDynamics, AnalyticalQuadraticCost, LinearGaussianControl, LinearGaussianDynamics,
    QuadraticCost, QuadraticStateActionValue, QuadraticStateValue,
};
use crate::types::Gaussian;

/// State, action and joint state-action marginals along the horizon
#[derive(Clone, Debug)]
pub struct TrajectoryDistribution {
    /// `nb_steps + 1` entries
    pub xdist: Gaussian,
    /// `nb_steps` entries
    pub udist: Gaussian,
    /// `nb_steps + 1` entries, the last one carries a zero action
    pub xudist: Gaussian,
}

/// Output of [`backward_pass`]
#[derive(Clone, Debug)]
pub struct BackwardSolution {
    pub ctl: LinearGaussianControl,
    pub vfunc: QuadraticStateValue,
    pub qfunc: QuadraticStateActionValue,
}

/// Output of [`extended_forward_pass`]
#[derive(Clone, Debug)]
pub struct ExtendedRollout {
    pub dist: TrajectoryDistribution,
    /// True per-step cost along the mean, `nb_steps + 1` entries
    pub cost: Array1<f64>,
    /// Dynamics linearized along the mean
    pub dynamics: LinearGaussianDynamics,
}

impl ExtendedRollout {
    pub fn total_cost(&self) -> f64 {
        self.cost.sum()
    }
}

fn log_2pi() -> f64 {
    (2.0 * PI).ln()
}

/// Scaled augmented cost `c/η − log π̄(u|x)`, `η = −alpha`.
///
/// The last entry carries no action term and is only scaled.
pub fn augment_cost(cost: &QuadraticCost, prev: &LinearGaussianControl, alpha: f64) -> Result<QuadraticCost> {
    if !(alpha < 0.0) {
        return Err(TrajoptError::invalid_parameter(
            "alpha".to_string(),
            format!("dual variable must be negative, got {}", alpha),
        ));
    }
    check_shape(
        "cost horizon",
        &[prev.nb_steps + 1, prev.nb_xdim, prev.nb_udim],
        &[cost.nb_steps, cost.nb_xdim, cost.nb_udim],
    )?;

    let eta = -alpha;
    let mut agcost = QuadraticCost {
        nb_xdim: cost.nb_xdim,
        nb_udim: cost.nb_udim,
        nb_steps: cost.nb_steps,
        cxx: &cost.cxx / eta,
        cuu: &cost.cuu / eta,
        cxu: &cost.cxu / eta,
        cx: &cost.cx / eta,
        cu: &cost.cu / eta,
        c0: &cost.c0 / eta,
    };

    let nb_udim = prev.nb_udim as f64;
    for t in 0..prev.nb_steps {
        let factor = SpdFactor::try_new(prev.sigma_at(t), "previous action covariance")?;
        let prec = &factor.inverse;
        let gain = prev.gain_at(t);
        let kff = prev.kff.row(t);
        let gain_prec = gain.t().dot(prec);

        let mut cxx = agcost.cxx.slice_mut(s![t, .., ..]);
        cxx += &gain_prec.dot(&gain);
        let mut cuu = agcost.cuu.slice_mut(s![t, .., ..]);
        cuu += prec;
        let mut cxu = agcost.cxu.slice_mut(s![t, .., ..]);
        cxu -= &gain_prec;
        let mut cx = agcost.cx.row_mut(t);
        cx += &gain_prec.dot(&kff);
        let mut cu = agcost.cu.row_mut(t);
        cu -= &prec.dot(&kff);

        agcost.c0[t] += 0.5 * quad_form(kff, prec.view(), kff) + 0.5 * nb_udim * log_2pi() + 0.5 * factor.log_det;
    }

    Ok(agcost)
}

/// Soft Bellman recursion of the augmented cost through linear-Gaussian dynamics.
///
/// Fails with [`TrajoptError::Diverged`] at the first step whose `Quu` is not
/// positive definite.
pub fn backward_pass(agcost: &QuadraticCost, dynamics: &LinearGaussianDynamics) -> Result<BackwardSolution> {
    let nb_xdim = dynamics.nb_xdim;
    let nb_udim = dynamics.nb_udim;
    let nb_steps = dynamics.nb_steps;
    check_shape(
        "cost horizon",
        &[nb_steps + 1, nb_xdim, nb_udim],
        &[agcost.nb_steps, agcost.nb_xdim, agcost.nb_udim],
    )?;

    let mut ctl = LinearGaussianControl::new(nb_xdim, nb_udim, nb_steps, 0.0);
    let mut vfunc = QuadraticStateValue::new(nb_xdim, nb_steps + 1);
    let mut qfunc = QuadraticStateActionValue::new(nb_xdim, nb_udim, nb_steps);

    vfunc.vxx.slice_mut(s![nb_steps, .., ..]).assign(&agcost.cxx.slice(s![nb_steps, .., ..]));
    vfunc.vx.row_mut(nb_steps).assign(&agcost.cx.row(nb_steps));
    vfunc.v0[nb_steps] = agcost.c0[nb_steps];
    vfunc.v0_softmax[nb_steps] = agcost.c0[nb_steps];

    let entropy_offset = 0.5 * nb_udim as f64 * log_2pi();

    for t in (0..nb_steps).rev() {
        let a = dynamics.a_at(t);
        let b = dynamics.b_at(t);
        let c = dynamics.c.row(t);

        let vxx_next = vfunc.vxx.slice(s![t + 1, .., ..]).to_owned();
        let vx_next = vfunc.vx.row(t + 1).to_owned();
        let v_a = vxx_next.dot(&a);
        let v_b = vxx_next.dot(&b);
        let v_c = vxx_next.dot(&c);

        let qxx = &agcost.cxx.slice(s![t, .., ..]) + &a.t().dot(&v_a);
        let mut quu = &agcost.cuu.slice(s![t, .., ..]) + &b.t().dot(&v_b);
        symmetrize(&mut quu);
        let qux = &agcost.cxu.slice(s![t, .., ..]).t() + &b.t().dot(&v_a);
        let qx = &agcost.cx.row(t) + &a.t().dot(&v_c) + a.t().dot(&vx_next);
        let qu = &agcost.cu.row(t) + &b.t().dot(&v_c) + b.t().dot(&vx_next);

        let propagated = 0.5 * c.dot(&v_c) + vx_next.dot(&c) + 0.5 * trace_of_product(vxx_next.view(), dynamics.sigma_at(t));
        let q0 = agcost.c0[t] + propagated + vfunc.v0[t + 1];
        let q0_softmax = agcost.c0[t] + propagated + vfunc.v0_softmax[t + 1];

        let factor = SpdFactor::new(quu.view()).ok_or(TrajoptError::Diverged { step: t })?;
        let quu_inv = &factor.inverse;

        let gain = -quu_inv.dot(&qux);
        let kff = -quu_inv.dot(&qu);

        let mut vxx = &qxx + &qux.t().dot(&gain);
        symmetrize(&mut vxx);
        let vx = &qx + &qux.t().dot(&kff);
        let improvement = 0.5 * qu.dot(&kff);

        vfunc.vxx.slice_mut(s![t, .., ..]).assign(&vxx);
        vfunc.vx.row_mut(t).assign(&vx);
        vfunc.v0[t] = q0 + improvement;
        vfunc.v0_softmax[t] = q0_softmax + improvement - entropy_offset + 0.5 * factor.log_det;

        qfunc.qxx.slice_mut(s![t, .., ..]).assign(&qxx);
        qfunc.qux.slice_mut(s![t, .., ..]).assign(&qux);
        qfunc.quu.slice_mut(s![t, .., ..]).assign(&quu);
        qfunc.qx.row_mut(t).assign(&qx);
        qfunc.qu.row_mut(t).assign(&qu);
        qfunc.q0[t] = q0;
        qfunc.q0_softmax[t] = q0_softmax;

        ctl.gain.slice_mut(s![t, .., ..]).assign(&gain);
        ctl.kff.row_mut(t).assign(&kff);
        ctl.sigma.slice_mut(s![t, .., ..]).assign(quu_inv);
    }

    Ok(BackwardSolution { ctl, vfunc, qfunc })
}

/// `E[½xᵀVx + vᵀx + v0]` for `x ~ N(mu, sigma)`
pub fn quad_expectation(
    mu: ArrayView1<f64>,
    sigma: ArrayView2<f64>,
    vxx: ArrayView2<f64>,
    vx: ArrayView1<f64>,
    v0: f64,
) -> f64 {
    0.5 * quad_form(mu, vxx, mu) + 0.5 * trace_of_product(vxx, sigma) + vx.dot(&mu) + v0
}

/// Joint moments of `[x; u]` for `x ~ N(mu, sigma)`, `u = K x + kff + noise`
fn joint_moments(
    mu: ArrayView1<f64>,
    sigma: ArrayView2<f64>,
    u_mu: ArrayView1<f64>,
    u_sigma: ArrayView2<f64>,
    gain: ArrayView2<f64>,
) -> (Array1<f64>, Array2<f64>) {
    let nb_xdim = mu.len();
    let nb_udim = u_mu.len();
    let cross = sigma.dot(&gain.t());

    let mut xu_mu = Array1::zeros(nb_xdim + nb_udim);
    xu_mu.slice_mut(s![..nb_xdim]).assign(&mu);
    xu_mu.slice_mut(s![nb_xdim..]).assign(&u_mu);

    let mut xu_sigma = Array2::zeros((nb_xdim + nb_udim, nb_xdim + nb_udim));
    xu_sigma.slice_mut(s![..nb_xdim, ..nb_xdim]).assign(&sigma);
    xu_sigma.slice_mut(s![..nb_xdim, nb_xdim..]).assign(&cross);
    xu_sigma.slice_mut(s![nb_xdim.., ..nb_xdim]).assign(&cross.t());
    xu_sigma.slice_mut(s![nb_xdim.., nb_xdim..]).assign(&u_sigma);

    (xu_mu, xu_sigma)
}

/// `[A B]`
fn transition_matrix(a: ArrayView2<f64>, b: ArrayView2<f64>) -> Array2<f64> {
    let nb_xdim = a.nrows();
    let mut f = Array2::zeros((nb_xdim, nb_xdim + b.ncols()));
    f.slice_mut(s![.., ..nb_xdim]).assign(&a);
    f.slice_mut(s![.., nb_xdim..]).assign(&b);
    f
}

fn terminal_joint(xdist: &Gaussian, xudist: &mut Gaussian, nb_steps: usize) {
    let nb_xdim = xdist.dim;
    let mut mu = Array1::zeros(xudist.dim);
    mu.slice_mut(s![..nb_xdim]).assign(&xdist.mean(nb_steps));
    let mut sigma = Array2::zeros((xudist.dim, xudist.dim));
    sigma.slice_mut(s![..nb_xdim, ..nb_xdim]).assign(&xdist.cov(nb_steps));
    xudist.set(nb_steps, mu.view(), sigma.view());
}

/// Closed-form propagation of `N(x0_mu, x0_sigma)` under `ctl` through the
/// linear-Gaussian `dynamics`
pub fn forward_pass(
    x0_mu: ArrayView1<f64>,
    x0_sigma: ArrayView2<f64>,
    dynamics: &LinearGaussianDynamics,
    ctl: &LinearGaussianControl,
) -> Result<TrajectoryDistribution> {
    let nb_xdim = dynamics.nb_xdim;
    let nb_udim = dynamics.nb_udim;
    let nb_steps = dynamics.nb_steps;
    check_shape("controller", &[nb_steps, nb_udim, nb_xdim], ctl.gain.shape())?;
    check_shape("initial mean", &[nb_xdim], x0_mu.shape())?;
    check_shape("initial covariance", &[nb_xdim, nb_xdim], x0_sigma.shape())?;

    let mut xdist = Gaussian::new(nb_xdim, nb_steps + 1);
    let mut udist = Gaussian::new(nb_udim, nb_steps);
    let mut xudist = Gaussian::new(nb_xdim + nb_udim, nb_steps + 1);

    xdist.set(0, x0_mu, x0_sigma);
    for t in 0..nb_steps {
        let mu = xdist.mean(t).to_owned();
        let sigma = xdist.cov(t).to_owned();

        let (u_mu, u_sigma) = ctl.forward(mu.view(), sigma.view(), t);
        let (xu_mu, xu_sigma) = joint_moments(mu.view(), sigma.view(), u_mu.view(), u_sigma.view(), ctl.gain_at(t));
        udist.set(t, u_mu.view(), u_sigma.view());
        xudist.set(t, xu_mu.view(), xu_sigma.view());

        let f = transition_matrix(dynamics.a_at(t), dynamics.b_at(t));
        let next_mu = f.dot(&xu_mu) + dynamics.c.row(t);
        let next_sigma = f.dot(&xu_sigma).dot(&f.t()) + dynamics.sigma_at(t);
        xdist.set(t + 1, next_mu.view(), next_sigma.view());
    }
    terminal_joint(&xdist, &mut xudist, nb_steps);

    Ok(TrajectoryDistribution { xdist, udist, xudist })
}

/// Propagate the mean through the true dynamics with the mean action and
/// the covariance through the local Jacobians plus process noise.
pub fn extended_forward_pass<E: Environment>(
    env: &E,
    x0_mu: ArrayView1<f64>,
    x0_sigma: ArrayView2<f64>,
    ctl: &LinearGaussianControl,
    cost_model: &AnalyticalQuadraticCost,
    dyn_model: &AnalyticalLinearDynamics,
    activation: &[bool],
) -> Result<ExtendedRollout> {
    let nb_xdim = dyn_model.nb_xdim;
    let nb_udim = dyn_model.nb_udim;
    let nb_steps = dyn_model.nb_steps;
    check_shape("controller", &[nb_steps, nb_udim, nb_xdim], ctl.gain.shape())?;
    check_shape("activation", &[nb_steps + 1], &[activation.len()])?;

    let mut xdist = Gaussian::new(nb_xdim, nb_steps + 1);
    let mut udist = Gaussian::new(nb_udim, nb_steps);
    let mut xudist = Gaussian::new(nb_xdim + nb_udim, nb_steps + 1);
    let mut dynamics = LinearGaussianDynamics::new(nb_xdim, nb_udim, nb_steps);
    let mut cost = Array1::zeros(nb_steps + 1);

    xdist.set(0, x0_mu, x0_sigma);
    for t in 0..nb_steps {
        let mu = xdist.mean(t).to_owned();
        let sigma = xdist.cov(t).to_owned();

        let (u_mu, u_sigma) = ctl.forward(mu.view(), sigma.view(), t);
        let (xu_mu, xu_sigma) = joint_moments(mu.view(), sigma.view(), u_mu.view(), u_sigma.view(), ctl.gain_at(t));
        udist.set(t, u_mu.view(), u_sigma.view());
        xudist.set(t, xu_mu.view(), xu_sigma.view());
        cost[t] = cost_model.evalf(env, mu.view(), u_mu.view(), activation[t]);

        let (a, b, c, noise) = dyn_model.linearize(env, mu.view(), u_mu.view());
        let next_mu = a.dot(&mu) + b.dot(&u_mu) + &c;
        if next_mu.iter().any(|v| !v.is_finite()) {
            return Err(TrajoptError::NumericalError(format!(
                "mean trajectory left the finite range at step {}",
                t + 1
            )));
        }

        let f = transition_matrix(a.view(), b.view());
        let next_sigma = f.dot(&xu_sigma).dot(&f.t()) + &noise;
        xdist.set(t + 1, next_mu.view(), next_sigma.view());
        dynamics.set_step(t, a.view(), b.view(), c.view(), noise.view());
    }
    terminal_joint(&xdist, &mut xudist, nb_steps);
    cost[nb_steps] = cost_model.evalf(
        env,
        xdist.mean(nb_steps),
        Array1::zeros(nb_udim).view(),
        activation[nb_steps],
    );

    Ok(ExtendedRollout {
        dist: TrajectoryDistribution { xdist, udist, xudist },
        cost,
        dynamics,
    })
}

/// `Σ_t E_x[KL(π_t(·|x) ‖ π̄_t(·|x))]` with `x` distributed as `xdist`
pub fn kl_divergence(ctl: &LinearGaussianControl, prev: &LinearGaussianControl, xdist: &Gaussian) -> Result<f64> {
    check_shape("previous controller", ctl.gain.shape(), prev.gain.shape())?;
    if xdist.nb_steps < ctl.nb_steps {
        return Err(TrajoptError::dimension_mismatch(
            format!("state distribution with at least {} steps", ctl.nb_steps),
            format!("{}", xdist.nb_steps),
        ));
    }

    let nb_udim = ctl.nb_udim as f64;
    let mut kl = 0.0;
    for t in 0..ctl.nb_steps {
        let prev_factor = SpdFactor::try_new(prev.sigma_at(t), "previous action covariance")?;
        let factor = SpdFactor::try_new(ctl.sigma_at(t), "action covariance")?;
        let prec = &prev_factor.inverse;

        let d_gain = &ctl.gain_at(t) - &prev.gain_at(t);
        let d_kff = &ctl.kff.row(t) - &prev.kff.row(t);
        let d_mean = d_gain.dot(&xdist.mean(t)) + &d_kff;
        let spread = d_gain.t().dot(prec).dot(&d_gain);

        kl += 0.5
            * (trace_of_product(prec.view(), ctl.sigma_at(t))
                + quad_form(d_mean.view(), prec.view(), d_mean.view())
                + trace_of_product(spread.view(), xdist.cov(t))
                - nb_udim
                + prev_factor.log_det
                - factor.log_det);
    }
    Ok(kl)
}

/// Value and derivative of the negated GPS dual
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DualEvaluation {
    pub value: f64,
    pub gradient: f64,
    pub kl: f64,
}

/// The dual of the KL-constrained problem around a fixed linearization
pub struct DualProblem<'a> {
    pub cost: &'a QuadraticCost,
    pub prev: &'a LinearGaussianControl,
    pub dynamics: &'a LinearGaussianDynamics,
    pub x0_mu: ArrayView1<'a, f64>,
    pub x0_sigma: ArrayView2<'a, f64>,
    pub kl_bound: f64,
}

/// Optimal dual variable and the quantities at it
#[derive(Clone, Debug)]
pub struct DualSolution {
    pub alpha: f64,
    pub value: f64,
    pub converged: bool,
    pub iterations: usize,
}

impl<'a> DualProblem<'a> {
    /// Controller, value functions and marginals optimal for a fixed `alpha`
    pub fn solve_at(&self, alpha: f64) -> Result<(BackwardSolution, TrajectoryDistribution)> {
        let agcost = augment_cost(self.cost, self.prev, alpha)?;
        let backward = backward_pass(&agcost, self.dynamics)?;
        let dist = forward_pass(self.x0_mu, self.x0_sigma, self.dynamics, &backward.ctl)?;
        Ok((backward, dist))
    }

    /// `(−E_aug − alpha·kl_bound, −(kl_bound − KL))` at `alpha`
    pub fn evaluate(&self, alpha: f64) -> Result<DualEvaluation> {
        let (backward, dist) = self.solve_at(alpha)?;
        let eta = -alpha;

        let expected = eta
            * quad_expectation(
                self.x0_mu,
                self.x0_sigma,
                backward.vfunc.vxx_at(0),
                backward.vfunc.vx.row(0),
                backward.vfunc.v0_softmax[0],
            );
        let kl = kl_divergence(&backward.ctl, self.prev, &dist.xdist)?;

        Ok(DualEvaluation {
            value: -expected - alpha * self.kl_bound,
            gradient: -(self.kl_bound - kl),
            kl,
        })
    }

    /// Minimize the negated dual over `alpha ∈ [lower, upper] < 0`.
    ///
    /// The search runs in `s = ln(−alpha)`. Diverged evaluations are
    /// infeasible and push the search towards larger `−alpha`, where the
    /// previous controller dominates.
    pub fn solve(&self, lower: f64, upper: f64, alpha0: f64, ftol: f64, max_iter: usize) -> Result<DualSolution> {
        if !(lower < upper && upper < 0.0) {
            return Err(TrajoptError::invalid_parameter(
                "alpha bounds".to_string(),
                format!("expected lower < upper < 0, got [{}, {}]", lower, upper),
            ));
        }

        let minimizer = BoundedScalarMinimizer::new((-upper).ln(), (-lower).ln())?
            .with_ftol(ftol)
            .with_max_iter(max_iter);

        let objective = |log_eta: f64| {
            let alpha = -log_eta.exp();
            match self.evaluate(alpha) {
                Ok(eval) => (eval.value, eval.gradient * alpha),
                Err(_) => (f64::INFINITY, -1.0),
            }
        };
        let res = minimizer.minimize(objective, (-alpha0).ln());

        Ok(DualSolution {
            alpha: -res.x.exp(),
            value: res.value,
            converged: res.converged,
            iterations: res.iterations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{Linearizer, Lqr};
    use crate::riccati::activation_mask;
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const NB_STEPS: usize = 10;

    struct Fixture {
        env: Lqr,
        cost: QuadraticCost,
        dynamics: LinearGaussianDynamics,
        prev: LinearGaussianControl,
        x0_mu: Array1<f64>,
        x0_sigma: Array2<f64>,
    }

    fn fixture() -> Fixture {
        let env = Lqr::new();
        let cost_model = AnalyticalQuadraticCost::new(2, 1, NB_STEPS + 1, Linearizer::default());
        let dyn_model = AnalyticalLinearDynamics::new(2, 1, NB_STEPS, Linearizer::default());
        let activation = activation_mask(NB_STEPS, &[]).unwrap();
        let (x0_mu, x0_sigma) = env.init();

        let mut prev = LinearGaussianControl::new(2, 1, NB_STEPS, 1.0);
        prev.randomize_feedforward(1e-2, &mut StdRng::seed_from_u64(0));

        let ext = extended_forward_pass(&env, x0_mu.view(), x0_sigma.view(), &prev, &cost_model, &dyn_model, &activation)
            .unwrap();
        let cost = cost_model
            .taylor_expansion(&env, ext.dist.xdist.mu.view(), ext.dist.udist.mu.view(), &activation)
            .unwrap();

        Fixture {
            env,
            cost,
            dynamics: ext.dynamics,
            prev,
            x0_mu,
            x0_sigma,
        }
    }

    fn problem(fx: &Fixture, kl_bound: f64) -> DualProblem<'_> {
        DualProblem {
            cost: &fx.cost,
            prev: &fx.prev,
            dynamics: &fx.dynamics,
            x0_mu: fx.x0_mu.view(),
            x0_sigma: fx.x0_sigma.view(),
            kl_bound,
        }
    }

    /// Plain finite-horizon LQR on the raw cost: returns the gains
    fn raw_lqr_gains(fx: &Fixture) -> (Array3<f64>, Array2<f64>) {
        let mut vxx = fx.cost.cxx.slice(s![NB_STEPS, .., ..]).to_owned();
        let mut vx = fx.cost.cx.row(NB_STEPS).to_owned();
        let mut gains = Array3::zeros((NB_STEPS, 1, 2));
        let mut kffs = Array2::zeros((NB_STEPS, 1));
        for t in (0..NB_STEPS).rev() {
            let a = fx.dynamics.a_at(t);
            let b = fx.dynamics.b_at(t);
            let c = fx.dynamics.c.row(t);
            let quu = &fx.cost.cuu.slice(s![t, .., ..]) + &b.t().dot(&vxx).dot(&b);
            let qux = &fx.cost.cxu.slice(s![t, .., ..]).t() + &b.t().dot(&vxx).dot(&a);
            let qu = &fx.cost.cu.row(t) + &b.t().dot(&(vxx.dot(&c) + &vx));
            let qx = &fx.cost.cx.row(t) + &a.t().dot(&(vxx.dot(&c) + &vx));
            let qxx = &fx.cost.cxx.slice(s![t, .., ..]) + &a.t().dot(&vxx).dot(&a);
            let inv = 1.0 / quu[[0, 0]];
            let gain = &qux * -inv;
            let kff = &qu * -inv;
            vxx = &qxx + &qux.t().dot(&gain);
            vx = &qx + &qux.t().dot(&kff);
            gains.slice_mut(s![t, .., ..]).assign(&gain);
            kffs.row_mut(t).assign(&kff);
        }
        (gains, kffs)
    }

    #[test]
    fn test_kl_of_controller_with_itself_is_zero() {
        let fx = fixture();
        let dist = forward_pass(fx.x0_mu.view(), fx.x0_sigma.view(), &fx.dynamics, &fx.prev).unwrap();
        let kl = kl_divergence(&fx.prev, &fx.prev, &dist.xdist).unwrap();
        assert_abs_diff_eq!(kl, 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_forward_pass_is_deterministic() {
        let fx = fixture();
        let d1 = forward_pass(fx.x0_mu.view(), fx.x0_sigma.view(), &fx.dynamics, &fx.prev).unwrap();
        let d2 = forward_pass(fx.x0_mu.view(), fx.x0_sigma.view(), &fx.dynamics, &fx.prev).unwrap();
        assert_eq!(d1.xdist.mu, d2.xdist.mu);
        assert_eq!(d1.xdist.sigma, d2.xdist.sigma);
        assert_eq!(d1.xudist.sigma, d2.xudist.sigma);
        assert_eq!(d1.xdist.nb_steps, NB_STEPS + 1);
        assert_eq!(d1.udist.nb_steps, NB_STEPS);
    }

    #[test]
    fn test_linear_forward_pass_matches_extended_on_linear_system() {
        let fx = fixture();
        let cost_model = AnalyticalQuadraticCost::new(2, 1, NB_STEPS + 1, Linearizer::default());
        let dyn_model = AnalyticalLinearDynamics::new(2, 1, NB_STEPS, Linearizer::default());
        let activation = activation_mask(NB_STEPS, &[]).unwrap();

        let ext = extended_forward_pass(&fx.env, fx.x0_mu.view(), fx.x0_sigma.view(), &fx.prev, &cost_model, &dyn_model, &activation)
            .unwrap();
        let lin = forward_pass(fx.x0_mu.view(), fx.x0_sigma.view(), &fx.dynamics, &fx.prev).unwrap();
        for (p, q) in ext.dist.xdist.mu.iter().zip(lin.xdist.mu.iter()) {
            assert_abs_diff_eq!(*p, *q, epsilon = 1e-9);
        }
        for (p, q) in ext.dist.xdist.sigma.iter().zip(lin.xdist.sigma.iter()) {
            assert_abs_diff_eq!(*p, *q, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_dual_gradient_matches_finite_difference() {
        let fx = fixture();
        let dual = problem(&fx, 1.0);

        for &alpha in &[-10.0, -100.0, -1000.0] {
            let eval = dual.evaluate(alpha).unwrap();
            let h = 1e-5 * alpha.abs();
            let plus = dual.evaluate(alpha + h).unwrap().value;
            let minus = dual.evaluate(alpha - h).unwrap().value;
            let numeric = (plus - minus) / (2.0 * h);
            let scale = eval.gradient.abs().max(1e-3);
            assert!(
                (numeric - eval.gradient).abs() / scale < 1e-3,
                "alpha {}: analytic {} numeric {}",
                alpha,
                eval.gradient,
                numeric
            );
        }
    }

    #[test]
    fn test_large_multiplier_recovers_previous_controller() {
        let fx = fixture();
        let dual = problem(&fx, 1.0);
        let (backward, _) = dual.solve_at(-1e8).unwrap();

        for (p, q) in backward.ctl.kff.iter().zip(fx.prev.kff.iter()) {
            assert_abs_diff_eq!(*p, *q, epsilon = 1e-4);
        }
        for (p, q) in backward.ctl.gain.iter().zip(fx.prev.gain.iter()) {
            assert_abs_diff_eq!(*p, *q, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_small_multiplier_recovers_raw_lqr() {
        let fx = fixture();
        let dual = problem(&fx, 1.0);
        let (backward, _) = dual.solve_at(-1e-8).unwrap();
        let (gains, kffs) = raw_lqr_gains(&fx);

        for (p, q) in backward.ctl.gain.iter().zip(gains.iter()) {
            assert!((p - q).abs() <= 1e-4 * q.abs().max(1.0), "gain {} vs {}", p, q);
        }
        for (p, q) in backward.ctl.kff.iter().zip(kffs.iter()) {
            assert!((p - q).abs() <= 1e-4 * q.abs().max(1.0), "kff {} vs {}", p, q);
        }
    }

    #[test]
    fn test_dual_solution_meets_kl_bound() {
        let fx = fixture();
        let kl_bound = 5.0;
        let dual = problem(&fx, kl_bound);
        let solution = dual.solve(-1e8, -1e-8, -1e3, 1e-10, 1000).unwrap();
        assert!(solution.alpha < 0.0);

        let eval = dual.evaluate(solution.alpha).unwrap();
        assert!(eval.kl <= 1.1 * kl_bound, "kl {} exceeds bound", eval.kl);
    }

    #[test]
    fn test_augment_cost_rejects_positive_alpha() {
        let fx = fixture();
        assert!(augment_cost(&fx.cost, &fx.prev, 1.0).is_err());
        assert!(augment_cost(&fx.cost, &fx.prev, 0.0).is_err());
    }

    #[test]
    fn test_backward_pass_flags_divergence() {
        let fx = fixture();
        let mut agcost = augment_cost(&fx.cost, &fx.prev, -1.0).unwrap();
        agcost.cuu.slice_mut(s![3, .., ..]).fill(-1e6);
        let err = backward_pass(&agcost, &fx.dynamics).unwrap_err();
        assert!(matches!(err, TrajoptError::Diverged { step: 3 }));
    }
}
