use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::debug::check_distribution;
use crate::env::Environment;
use crate::error::{check_shape, Result};
use crate::gps::core::{extended_forward_pass, forward_pass, kl_divergence, DualProblem, ExtendedRollout};
use crate::gps::{GpsConfig, GpsState, TrustRegion};
use crate::metrics::{IterationRecord, OptimizationTrace};
use crate::parallel::{sample_episodes, Rollouts};
use crate::riccati::{
    activation_mask, AnalyticalLinearDynamics, AnalyticalQuadraticCost, LinearGaussianControl,
    QuadraticStateActionValue, QuadraticStateValue,
};

/// Model-based GPS on the environment's own dynamics
pub struct Mbgps<E: Environment> {
    env: E,
    config: GpsConfig,
    nb_xdim: usize,
    nb_udim: usize,
    activation: Vec<bool>,
    x0_mu: Array1<f64>,
    x0_sigma: Array2<f64>,
    cost_model: AnalyticalQuadraticCost,
    dyn_model: AnalyticalLinearDynamics,
    trust_region: TrustRegion,
    state: GpsState,
    trace: OptimizationTrace,
    nb_sampled: u64,
}

impl<E: Environment> Mbgps<E> {
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

        let cost_model = AnalyticalQuadraticCost::new(nb_xdim, nb_udim, nb_steps + 1, config.linearizer.clone());
        let dyn_model = AnalyticalLinearDynamics::new(nb_xdim, nb_udim, nb_steps, config.linearizer.clone());

        let rollout = extended_forward_pass(&env, x0_mu.view(), x0_sigma.view(), &ctl, &cost_model, &dyn_model, &activation)?;
        let state = GpsState {
            ctl,
            last_return: rollout.total_cost(),
            dist: rollout.dist,
            vfunc: QuadraticStateValue::new(nb_xdim, nb_steps + 1),
            qfunc: QuadraticStateActionValue::new(nb_xdim, nb_udim, nb_steps),
            dynamics: rollout.dynamics,
        };

        Ok(Mbgps {
            trust_region: config.trust_region(),
            env,
            config,
            nb_xdim,
            nb_udim,
            activation,
            x0_mu,
            x0_sigma,
            cost_model,
            dyn_model,
            state,
            trace: OptimizationTrace::default(),
            nb_sampled: 0,
        })
    }

    fn extended_pass(&self, ctl: &LinearGaussianControl) -> Result<ExtendedRollout> {
        extended_forward_pass(
            &self.env,
            self.x0_mu.view(),
            self.x0_sigma.view(),
            ctl,
            &self.cost_model,
            &self.dyn_model,
            &self.activation,
        )
    }

    /// Run `nb_iter` trust-region iterations.
    ///
    /// Returns the return of the initial controller followed by the return of
    /// every accepted iterate.
    pub fn run(&mut self, nb_iter: usize) -> Result<Vec<f64>> {
        let nb_steps = self.config.nb_steps;

        let rollout = self.extended_pass(&self.state.ctl)?;
        self.state.last_return = rollout.total_cost();
        self.state.dist = rollout.dist;
        self.state.dynamics = rollout.dynamics;
        let mut returns = vec![self.state.last_return];

        for iteration in 0..nb_iter {
            info!(iteration, objective = self.state.last_return, "mbgps");

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
            debug!(
                alpha = solution.alpha,
                value = solution.value,
                converged = solution.converged,
                iterations = solution.iterations,
                "dual solved"
            );

            let candidate = match problem.solve_at(solution.alpha) {
                Ok((backward, _)) => backward,
                Err(err) if err.is_divergence() => {
                    warn!(iteration, alpha = solution.alpha, "backward pass diverged at the dual optimum");
                    self.trust_region.alpha = solution.alpha;
                    self.trace.record(IterationRecord::new(iteration, self.state.last_return, false));
                    continue;
                }
                Err(err) => return Err(err),
            };

            let rollout = self.extended_pass(&candidate.ctl)?;
            let actual_return = rollout.total_cost();

            // quadratic model evaluated along the mean of the candidate linearization
            let predicted = forward_pass(self.x0_mu.view(), self.x0_sigma.view(), &rollout.dynamics, &candidate.ctl)?;
            let expected_return = cost.evaluate(predicted.xdist.mu.view(), predicted.udist.mu.view())?;

            let kl = kl_divergence(&candidate.ctl, &self.state.ctl, &rollout.dist.xdist)?;

            let expected_improvement = self.state.last_return - expected_return;
            let actual_improvement = self.state.last_return - actual_return;
            self.trust_region.alpha = solution.alpha;
            self.trust_region.adapt(expected_improvement, actual_improvement);

            let accepted = self.trust_region.admits(kl, nb_steps);
            let record = IterationRecord::new(iteration, actual_return, accepted).with_trust_region(
                kl,
                self.trust_region.kl_bound,
                self.trust_region.kl_mult,
                solution.alpha,
            );

            if accepted {
                check_distribution(&rollout.dist.xdist, 1e-8);
                self.state = GpsState {
                    ctl: candidate.ctl,
                    dist: rollout.dist,
                    vfunc: candidate.vfunc,
                    qfunc: candidate.qfunc,
                    dynamics: rollout.dynamics,
                    last_return: actual_return,
                };
                returns.push(actual_return);
                self.trace.record(record);
            } else {
                warn!(
                    iteration,
                    kl,
                    allowed = nb_steps as f64 * self.trust_region.kl_bound,
                    "trust region violated, keeping previous controller"
                );
                self.trace.record(IterationRecord {
                    objective: self.state.last_return,
                    ..record
                });
            }

            self.trust_region.rescale();
        }

        Ok(returns)
    }

    /// Roll out the current controller on the environment.
    ///
    /// Consecutive calls use fresh random streams.
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

    pub fn trust_region(&self) -> &TrustRegion {
        &self.trust_region
    }

    pub fn trace(&self) -> &OptimizationTrace {
        &self.trace
    }
}
