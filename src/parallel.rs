//! Parallel rollout sampling
//!
//! Episodes are independent, so each one runs on its own clone of the
//! environment with its own seeded random stream. Results are collected in
//! episode order, which keeps sampling deterministic for a given seed.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::env::Environment;

/// One sampled trajectory of `nb_steps` transitions
#[derive(Clone, Debug)]
pub struct Episode {
    /// `(nb_steps, dx)`
    pub states: Array2<f64>,
    /// `(nb_steps, du)`, as commanded (before clipping)
    pub actions: Array2<f64>,
    /// `(nb_steps, dx)`
    pub next_states: Array2<f64>,
    /// `(nb_steps + 1)`, the last entry is the terminal cost
    pub costs: Array1<f64>,
}

impl Episode {
    pub fn total_cost(&self) -> f64 {
        self.costs.sum()
    }
}

/// A batch of episodes sampled with the same controller
#[derive(Clone, Debug)]
pub struct Rollouts {
    pub episodes: Vec<Episode>,
}

impl Rollouts {
    pub fn nb_episodes(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    pub fn nb_steps(&self) -> usize {
        self.episodes.first().map_or(0, |ep| ep.actions.nrows())
    }

    /// Mean over episodes of the summed per-step cost
    pub fn mean_return(&self) -> f64 {
        if self.episodes.is_empty() {
            return f64::NAN;
        }
        self.episodes.iter().map(Episode::total_cost).sum::<f64>() / self.episodes.len() as f64
    }

    /// Transitions at step `t` stacked over episodes: `(x, u, x')`, each `(N, ·)`
    pub fn transitions_at(&self, t: usize) -> (Array2<f64>, Array2<f64>, Array2<f64>) {
        let stack = |rows: Vec<ArrayView1<f64>>| -> Array2<f64> {
            ndarray::stack(Axis(0), &rows).unwrap_or_else(|_| Array2::zeros((0, 0)))
        };
        (
            stack(self.episodes.iter().map(|ep| ep.states.row(t)).collect()),
            stack(self.episodes.iter().map(|ep| ep.actions.row(t)).collect()),
            stack(self.episodes.iter().map(|ep| ep.next_states.row(t)).collect()),
        )
    }
}

/// Roll out `nb_episodes` episodes of `nb_steps` steps in parallel.
///
/// `policy(x, t, rng)` returns the commanded action, which is clipped to the
/// action space before it reaches the environment. `cost(env, x, u, t)` is the
/// per-step cost; it is called with a zero action at `t = nb_steps`.
/// Episode `n` uses the stream seeded with `seed + n`.
pub fn sample_episodes<E, P, C>(
    env: &E,
    nb_episodes: usize,
    nb_steps: usize,
    seed: u64,
    policy: P,
    cost: C,
) -> Rollouts
where
    E: Environment,
    P: Fn(ArrayView1<f64>, usize, &mut StdRng) -> Array1<f64> + Sync,
    C: Fn(&E, ArrayView1<f64>, ArrayView1<f64>, usize) -> f64 + Sync,
{
    let episodes = (0..nb_episodes)
        .into_par_iter()
        .map(|n| {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(n as u64));
            let mut local = env.clone();
            local.seed(rng.gen());
            rollout(&mut local, nb_steps, &mut rng, &policy, &cost)
        })
        .collect();

    Rollouts { episodes }
}

fn rollout<E, P, C>(env: &mut E, nb_steps: usize, rng: &mut StdRng, policy: &P, cost: &C) -> Episode
where
    E: Environment,
    P: Fn(ArrayView1<f64>, usize, &mut StdRng) -> Array1<f64>,
    C: Fn(&E, ArrayView1<f64>, ArrayView1<f64>, usize) -> f64,
{
    let nb_xdim = env.state_dim();
    let nb_udim = env.action_dim();

    let mut states = Array2::zeros((nb_steps, nb_xdim));
    let mut actions = Array2::zeros((nb_steps, nb_udim));
    let mut next_states = Array2::zeros((nb_steps, nb_xdim));
    let mut costs = Array1::zeros(nb_steps + 1);

    let mut x = env.reset();
    for t in 0..nb_steps {
        let u = policy(x.view(), t, rng);
        costs[t] = cost(env, x.view(), u.view(), t);
        states.row_mut(t).assign(&x);
        actions.row_mut(t).assign(&u);

        let clipped = env.action_space().clip(u.view());
        x = env.step(clipped.view()).state;
        next_states.row_mut(t).assign(&x);
    }
    costs[nb_steps] = cost(env, x.view(), Array1::zeros(nb_udim).view(), nb_steps);

    Episode {
        states,
        actions,
        next_states,
        costs,
    }
}
