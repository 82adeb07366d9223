use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::debug::check_distribution;
use crate::env::Environment;
use crate::error::{check_shape, Result, TrajoptError};
use crate::gps::core::{forward_pass, kl_divergence, DualProblem};
use crate::gps::learned::{DynamicsRegression, LearnedLinearGaussianDynamics};
use crate::gps::{GpsConfig, GpsState, TrustRegion};
use crate::metrics::{IterationRecord, OptimizationTrace};
use crate::parallel::{sample_episodes, Rollouts};
use crate::riccati::{
    activation_mask, AnalyticalQuadraticCost, LinearGaussianControl, LinearGaussianDynamics,
    QuadraticStateActionValue, QuadraticStateValue,
};

/// Model-free GPS: the dynamics are learned from rollouts of the current
/// controller and refitted whenever a step is accepted.
pub struct Mfgps<E: Environment> {
    env: E,
    config: GpsConfig,
    nb_xdim: usize,
    nb_udim: usize,
    activation: Vec<bool>,
    x0_mu: Array1<f64>,
    x0_sigma: Array2<f64>,
    cost_model: AnalyticalQuadraticCost,
    learned: LearnedLinearGaussianDynamics,
    trust_region: TrustRegion,
    state: GpsState,
    data: Option<Rollouts>,
    trace: OptimizationTrace,
    nb_sampled: u64,
}

impl<E: Environment> Mfgps<E> {
    pub fn new(env: E, config: GpsConfig) -> Result<Self> {
        config.validate()?;
        let nb_xdim = env.state_dim();
        let nb_udim = env.action_dim();
        let nb_steps = config.nb_steps;

        let activation = activation_mask(nb_steps, &config.activation)?;
        let (x0_mu, x0_sigma) = env.init();
        check_shape("initial mean", &[nb_xdim], x0_mu.shape())?;
        check_shape("initial covariance", &[nb_xdim, nb_xdim], x0_sigma.shape())?;

        let mut ctl = LinearGaussianControl::new(nb_xdim, nb_udim, nb_steps, config.init_ctl_sigma);
        ctl.randomize_feedforward(config.init_ctl_feedforward, &mut StdRng::seed_from_u64(config.seed));

        // placeholder until the first batch is learned
        let dynamics = LinearGaussianDynamics::new(nb_xdim, nb_udim, nb_steps);
        let dist = forward_pass(x0_mu.view(), x0_sigma.view(), &dynamics, &ctl)?;

        Ok(Mfgps {
            cost_model: AnalyticalQuadraticCost::new(nb_xdim, nb_udim, nb_steps + 1, config.linearizer.clone()),
            learned: LearnedLinearGaussianDynamics::new(nb_xdim, nb_udim, nb_steps),
            trust_region: config.trust_region(),
            state: GpsState {
                ctl,
                dist,
                vfunc: QuadraticStateValue::new(nb_xdim, nb_steps + 1),
                qfunc: QuadraticStateActionValue::new(nb_xdim, nb_udim, nb_steps),
                dynamics,
                last_return: f64::INFINITY,
            },
            env,
            config,
            nb_xdim,
            nb_udim,
            activation,
            x0_mu,
            x0_sigma,
            data: None,
            trace: OptimizationTrace::default(),
            nb_sampled: 0,
        })
    }

    /// Replace the regression strategy used to learn the dynamics
    pub fn with_regression(mut self, regression: Box<dyn DynamicsRegression>) -> Self {
        self.learned = self.learned.with_regression(regression);
        self
    }

    /// Roll out the current controller on the environment
    pub fn sample(&mut self, nb_episodes: usize, stochastic: bool) -> Rollouts {
        let seed = self.config.seed.wrapping_add((self.nb_sampled + 1) << 32);
        self.nb_sampled += 1;

        let ctl = &self.state.ctl;
        let activation = &self.activation;
        let cost_model = &self.cost_model;
        sample_episodes(
            &self.env,
            nb_episodes,
            self.config.nb_steps,
            seed,
            |x, t, rng: &mut StdRng| ctl.sample(x, t, stochastic, rng),
            |env: &E, x, u, t| cost_model.evalf(env, x, u, activation[t]),
        )
    }

    /// Sample, refit the dynamics and propagate the current controller
    /// through them.
    fn refit(&mut self, nb_episodes: usize) -> Result<()> {
        let data = self.sample(nb_episodes, true);
        let dynamics = self.learned.learn(&data)?;
        self.state.dist = forward_pass(self.x0_mu.view(), self.x0_sigma.view(), &dynamics, &self.state.ctl)?;
        self.state.dynamics = dynamics;
        self.state.last_return = data.mean_return();
        self.data = Some(data);
        Ok(())
    }

    /// Run `nb_iter` iterations with `nb_episodes` rollouts per fit.
    ///
    /// Returns the mean sampled return before the first iteration and after
    /// every iteration.
    pub fn run(&mut self, nb_episodes: usize, nb_iter: usize) -> Result<Vec<f64>> {
        if nb_episodes == 0 {
            return Err(TrajoptError::InsufficientData(
                "model-free GPS needs at least one episode per iteration".to_string(),
            ));
        }
        let nb_steps = self.config.nb_steps;

        self.refit(nb_episodes)?;
        let mut returns = vec![self.state.last_return];

        for iteration in 0..nb_iter {
            info!(iteration, objective = self.state.last_return, "mfgps");

            let cost = self.cost_model.taylor_expansion(
                &self.env,
                self.state.dist.xdist.mu.view(),
                self.state.dist.udist.mu.view(),
                &self.activation,
            )?;

            let problem = DualProblem {
                cost: &cost,
                prev: &self.state.ctl,
                dynamics: &self.state.dynamics,
                x0_mu: self.x0_mu.view(),
                x0_sigma: self.x0_sigma.view(),
                kl_bound: self.trust_region.kl_bound,
            };
            let solution = problem.solve(
                self.config.alpha_lower,
                self.config.alpha_upper,
                self.config.alpha_init,
                self.config.dual_ftol,
                self.config.dual_max_iter,
            )?;
            debug!(alpha = solution.alpha, converged = solution.converged, "dual solved");

            let (candidate, dist) = match problem.solve_at(solution.alpha) {
                Ok(found) => found,
                Err(err) if err.is_divergence() => {
                    warn!(iteration, alpha = solution.alpha, "backward pass diverged at the dual optimum");
                    self.trust_region.alpha = solution.alpha;
                    self.trace.record(IterationRecord::new(iteration, self.state.last_return, false));
                    returns.push(self.state.last_return);
                    continue;
                }
                Err(err) => return Err(err),
            };

            let expected_return = cost.evaluate(dist.xdist.mu.view(), dist.udist.mu.view())?;
            let kl = kl_divergence(&candidate.ctl, &self.state.ctl, &dist.xdist)?;
            let last_return = self.state.last_return;
            self.trust_region.alpha = solution.alpha;

            let accepted = self.trust_region.admits(kl, nb_steps);
            if accepted {
                check_distribution(&dist.xdist, 1e-8);
                self.state.ctl = candidate.ctl;
                self.state.vfunc = candidate.vfunc;
                self.state.qfunc = candidate.qfunc;
                self.refit(nb_episodes)?;
            } else {
                warn!(
                    iteration,
                    kl,
                    allowed = nb_steps as f64 * self.trust_region.kl_bound,
                    "trust region violated, keeping previous controller"
                );
            }

            let actual_return = self.state.last_return;
            self.trust_region
                .adapt(last_return - expected_return, last_return - actual_return);

            self.trace.record(
                IterationRecord::new(iteration, actual_return, accepted).with_trust_region(
                    kl,
                    self.trust_region.kl_bound,
                    self.trust_region.kl_mult,
                    solution.alpha,
                ),
            );
            returns.push(actual_return);

            self.trust_region.rescale();
        }

        Ok(returns)
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn config(&self) -> &GpsConfig {
        &self.config
    }

    pub fn nb_xdim(&self) -> usize {
        self.nb_xdim
    }

    pub fn nb_udim(&self) -> usize {
        self.nb_udim
    }

    pub fn state(&self) -> &GpsState {
        &self.state
    }

    pub fn controller(&self) -> &LinearGaussianControl {
        &self.state.ctl
    }

    /// Rollouts the current dynamics were learned from
    pub fn data(&self) -> Option<&Rollouts> {
        self.data.as_ref()
    }

    pub fn trust_region(&self) -> &TrustRegion {
        &self.trust_region
    }

    pub fn trace(&self) -> &OptimizationTrace {
        &self.trace
    }
}
