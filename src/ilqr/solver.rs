use ndarray::{Array1, Array2};
use tracing::{debug, info, warn};

use crate::env::Environment;
use crate::error::{check_shape, Result};
use crate::ilqr::core::backward_pass;
use crate::ilqr::{IlqrConfig, Regularization, Termination};
use crate::linalg::max_abs;
use crate::metrics::{IterationRecord, OptimizationTrace};
use crate::riccati::{
    activation_mask, AnalyticalLinearDynamics, AnalyticalQuadraticCost, LinearControl, QuadraticStateActionValue,
    QuadraticStateValue,
};

/// Deterministic rollout of a controller on the true dynamics
#[derive(Clone, Debug)]
pub struct Rollout {
    /// `(nb_steps + 1, dx)`
    pub states: Array2<f64>,
    /// `(nb_steps, du)`
    pub actions: Array2<f64>,
    /// `nb_steps + 1` entries, the last one with a zero action
    pub cost: Array1<f64>,
}

impl Rollout {
    pub fn total_cost(&self) -> f64 {
        self.cost.sum()
    }
}

/// Iterate of the iLQR loop, replaced as a whole when a step is accepted
#[derive(Clone, Debug)]
pub struct IlqrState {
    pub xref: Array2<f64>,
    pub uref: Array2<f64>,
    pub ctl: LinearControl,
    pub vfunc: QuadraticStateValue,
    pub qfunc: QuadraticStateActionValue,
    pub last_return: f64,
}

pub struct Ilqr<E: Environment> {
    env: E,
    config: IlqrConfig,
    nb_xdim: usize,
    nb_udim: usize,
    x0: Array1<f64>,
    activation: Vec<bool>,
    cost_model: AnalyticalQuadraticCost,
    dyn_model: AnalyticalLinearDynamics,
    regularization: Regularization,
    state: IlqrState,
    trace: OptimizationTrace,
    real_returns: Vec<f64>,
    termination: Option<Termination>,
}

impl<E: Environment> Ilqr<E> {
    /// Start from the initial mean state and zero actions
    pub fn new(env: E, config: IlqrConfig) -> Result<Self> {
        let uref = Array2::zeros((config.nb_steps, env.action_dim()));
        Ilqr::with_initial_actions(env, config, uref)
    }

    /// Start from the open-loop action sequence `uref`
    pub fn with_initial_actions(env: E, config: IlqrConfig, uref: Array2<f64>) -> Result<Self> {
        config.validate()?;
        let nb_xdim = env.state_dim();
        let nb_udim = env.action_dim();
        let nb_steps = config.nb_steps;
        check_shape("initial actions", &[nb_steps, nb_udim], uref.shape())?;

        let activation = activation_mask(nb_steps, &config.activation)?;
        let (x0, _) = env.init();
        check_shape("initial state", &[nb_xdim], x0.shape())?;

        let mut xref = Array2::zeros((nb_steps + 1, nb_xdim));
        xref.row_mut(0).assign(&x0);

        Ok(Ilqr {
            cost_model: AnalyticalQuadraticCost::new(nb_xdim, nb_udim, nb_steps + 1, config.linearizer.clone()),
            dyn_model: AnalyticalLinearDynamics::new(nb_xdim, nb_udim, nb_steps, config.linearizer.clone()),
            regularization: config.regularization.clone(),
            state: IlqrState {
                xref,
                uref,
                ctl: LinearControl::new(nb_xdim, nb_udim, nb_steps),
                vfunc: QuadraticStateValue::new(nb_xdim, nb_steps + 1),
                qfunc: QuadraticStateActionValue::new(nb_xdim, nb_udim, nb_steps),
                last_return: f64::INFINITY,
            },
            env,
            config,
            nb_xdim,
            nb_udim,
            x0,
            activation,
            trace: OptimizationTrace::default(),
            real_returns: Vec::new(),
            termination: None,
        })
    }

    /// Roll out `u = uref + α·kff + K(x − xref)` from the initial state
    pub fn forward_pass(&self, ctl: &LinearControl, alpha: f64) -> Rollout {
        let nb_steps = self.config.nb_steps;
        let mut states = Array2::zeros((nb_steps + 1, self.nb_xdim));
        let mut actions = Array2::zeros((nb_steps, self.nb_udim));
        let mut cost = Array1::zeros(nb_steps + 1);

        states.row_mut(0).assign(&self.x0);
        for t in 0..nb_steps {
            let u = ctl.action(states.row(t), alpha, self.state.xref.view(), self.state.uref.view(), t);
            cost[t] = self.cost_model.evalf(&self.env, states.row(t), u.view(), self.activation[t]);
            let next = self.env.dynamics(states.row(t), u.view());
            states.row_mut(t + 1).assign(&next);
            actions.row_mut(t).assign(&u);
        }
        let zero = Array1::zeros(self.nb_udim);
        cost[nb_steps] = self
            .cost_model
            .evalf(&self.env, states.row(nb_steps), zero.view(), self.activation[nb_steps]);

        Rollout { states, actions, cost }
    }

    /// Finite states within the state bound and a finite cost
    pub fn is_feasible(&self, rollout: &Rollout) -> bool {
        let peak = max_abs(rollout.states.iter().copied());
        peak.is_finite() && peak <= self.config.state_bound && rollout.total_cost().is_finite()
    }

    fn initial_rollout(&self) -> Rollout {
        let mut last = None;
        for &alpha in &self.config.alphas {
            let rollout = self.forward_pass(&self.state.ctl, alpha);
            if self.is_feasible(&rollout) {
                return rollout;
            }
            debug!(alpha, "initial trajectory infeasible");
            last = Some(rollout);
        }
        warn!("no feasible initial trajectory, keeping the last rollout");
        match last {
            Some(rollout) => rollout,
            // alphas are validated non-empty
            None => self.forward_pass(&self.state.ctl, 1.0),
        }
    }

    /// Mean over action dimensions of `max_t |kff| / (|uref| + 1)`
    fn feedforward_ratio(&self, ctl: &LinearControl) -> f64 {
        let nb_steps = self.config.nb_steps;
        if self.nb_udim == 0 {
            return 0.0;
        }
        let total: f64 = (0..self.nb_udim)
            .map(|i| {
                max_abs((0..nb_steps).map(|t| ctl.kff[[t, i]].abs() / (self.state.uref[[t, i]].abs() + 1.0)))
            })
            .sum();
        total / self.nb_udim as f64
    }

    /// Run up to `nb_iter` iterations.
    ///
    /// Returns the return of the initial trajectory followed by the return
    /// of every accepted iterate.
    pub fn run(&mut self, nb_iter: usize) -> Result<Vec<f64>> {
        let initial = self.initial_rollout();
        self.state.last_return = initial.total_cost();
        self.state.xref = initial.states;
        self.state.uref = initial.actions;
        let mut returns = vec![self.state.last_return];
        self.real_returns.clear();

        let mut termination = Termination::MaxIterations;
        for iteration in 0..nb_iter {
            info!(iteration, objective = self.state.last_return, lmbda = self.regularization.lmbda, "ilqr");
            let real = self.forward_pass(&self.state.ctl, 0.0).total_cost();
            self.real_returns.push(real);

            let dynamics = self
                .dyn_model
                .taylor_expansion(&self.env, self.state.xref.view(), self.state.uref.view())?;
            let cost = self.cost_model.taylor_expansion(
                &self.env,
                self.state.xref.view(),
                self.state.uref.view(),
                &self.activation,
            )?;

            let backward = loop {
                match backward_pass(
                    &cost,
                    &dynamics,
                    self.state.xref.view(),
                    self.state.uref.view(),
                    self.regularization.lmbda,
                    self.config.mode,
                ) {
                    Ok(found) => break Some(found),
                    Err(err) if err.is_divergence() => {
                        debug!(lmbda = self.regularization.lmbda, error = %err, "backward pass diverged");
                        if !self.regularization.increase() {
                            break None;
                        }
                    }
                    Err(err) => return Err(err),
                }
            };
            let backward = match backward {
                Some(found) => found,
                None => {
                    warn!(iteration, lmbda = self.regularization.lmbda, "regularization ceiling reached");
                    self.trace.record(
                        IterationRecord::new(iteration, self.state.last_return, false)
                            .with_regularization(self.regularization.lmbda, None),
                    );
                    termination = Termination::RegularizationCeiling;
                    break;
                }
            };

            if self.feedforward_ratio(&backward.ctl) < self.config.tolgrad && self.regularization.lmbda < 1e-5 {
                self.regularization.decrease();
                self.trace.record(
                    IterationRecord::new(iteration, self.state.last_return, false)
                        .with_regularization(self.regularization.lmbda, None),
                );
                termination = Termination::GradientTolerance;
                break;
            }

            let mut accepted = None;
            for &alpha in &self.config.alphas {
                let rollout = self.forward_pass(&backward.ctl, alpha);
                if !self.is_feasible(&rollout) {
                    continue;
                }
                let new_return = rollout.total_cost();
                let improvement = self.state.last_return - new_return;
                let expected = -alpha * (backward.dv[0] + alpha * backward.dv[1]);
                if improvement / expected > self.config.min_imp {
                    accepted = Some((alpha, rollout, improvement));
                    break;
                }
            }

            match accepted {
                Some((alpha, rollout, improvement)) => {
                    self.regularization.decrease();
                    debug!(alpha, improvement, lmbda = self.regularization.lmbda, "step accepted");

                    let last_return = rollout.total_cost();
                    self.state = IlqrState {
                        xref: rollout.states,
                        uref: rollout.actions,
                        ctl: backward.ctl,
                        vfunc: backward.vfunc,
                        qfunc: backward.qfunc,
                        last_return,
                    };
                    returns.push(last_return);
                    self.trace.record(
                        IterationRecord::new(iteration, last_return, true)
                            .with_regularization(self.regularization.lmbda, Some(alpha)),
                    );

                    if improvement < self.config.tolfun {
                        termination = Termination::FunctionTolerance;
                        break;
                    }
                }
                None => {
                    let within = self.regularization.increase();
                    debug!(lmbda = self.regularization.lmbda, "line search failed");
                    self.trace.record(
                        IterationRecord::new(iteration, self.state.last_return, false)
                            .with_regularization(self.regularization.lmbda, None),
                    );
                    if !within {
                        warn!(iteration, lmbda = self.regularization.lmbda, "regularization ceiling reached");
                        termination = Termination::RegularizationCeiling;
                        break;
                    }
                }
            }
        }

        let real = self.forward_pass(&self.state.ctl, 0.0).total_cost();
        self.real_returns.push(real);
        info!(?termination, objective = self.state.last_return, real, "ilqr finished");
        self.termination = Some(termination);
        Ok(returns)
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn config(&self) -> &IlqrConfig {
        &self.config
    }

    pub fn state(&self) -> &IlqrState {
        &self.state
    }

    pub fn controller(&self) -> &LinearControl {
        &self.state.ctl
    }

    /// State reference trajectory, `(nb_steps + 1, dx)`
    pub fn xref(&self) -> &Array2<f64> {
        &self.state.xref
    }

    /// Action reference trajectory, `(nb_steps, du)`
    pub fn uref(&self) -> &Array2<f64> {
        &self.state.uref
    }

    pub fn regularization(&self) -> &Regularization {
        &self.regularization
    }

    pub fn termination(&self) -> Option<Termination> {
        self.termination
    }

    pub fn trace(&self) -> &OptimizationTrace {
        &self.trace
    }

    /// Return of the current controller at `α = 0` on the true system,
    /// taken before every iteration of the last [`Ilqr::run`] and once at the end
    pub fn real_returns(&self) -> &[f64] {
        &self.real_returns
    }
}
