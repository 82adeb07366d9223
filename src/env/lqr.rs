use ndarray::{array, Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{CostDerivatives, Environment, Step};
use crate::linalg::{psd_lower, sample_gaussian};
use crate::types::BoxSpace;

/// Linear system `ẋ = A (x - g) + B u` integrated with RK4, quadratic goal cost.
///
/// The continuous system is unstable (`A = [[1.1, 0], [1, 1]]`); the goal `g`
/// is an equilibrium. Both the discrete transition and the cost are exactly
/// linear/quadratic, so this environment supplies closed-form derivatives.
#[derive(Clone, Debug)]
pub struct Lqr {
    dt: f64,
    goal: Array1<f64>,
    a: Array2<f64>,
    b: Array2<f64>,
    c: Array1<f64>,
    sigma: Array2<f64>,
    goal_weights: Array1<f64>,
    action_weights: Array1<f64>,
    init_mu: Array1<f64>,
    init_sigma: Array2<f64>,
    // discrete RK4 transition of the deviation from the goal
    ad: Array2<f64>,
    bd: Array2<f64>,
    observation_space: BoxSpace,
    action_space: BoxSpace,
    state: Array1<f64>,
    rng: StdRng,
}

impl Lqr {
    pub fn new() -> Self {
        let a = array![[1.1, 0.0], [1.0, 1.0]];
        let b = array![[1.0], [0.0]];
        let goal = array![10.0, 10.0];
        Lqr::from_system(a, b, goal, 0.1)
    }

    /// Build from continuous-time matrices, goal and integration step
    pub fn from_system(a: Array2<f64>, b: Array2<f64>, goal: Array1<f64>, dt: f64) -> Self {
        let nb_xdim = a.nrows();
        let nb_udim = b.ncols();
        let c = -a.dot(&goal);

        // RK4 of a linear ODE is the 4th-order truncated exponential
        let eye = Array2::<f64>::eye(nb_xdim);
        let ha = &a * dt;
        let ha2 = ha.dot(&ha);
        let ha3 = ha2.dot(&ha);
        let ha4 = ha3.dot(&ha);
        let ad = &eye + &ha + &(&ha2 / 2.0) + &(&ha3 / 6.0) + &(&ha4 / 24.0);
        let input_map = (&eye + &(&ha / 2.0) + &(&ha2 / 6.0) + &(&ha3 / 24.0)) * dt;
        let bd = input_map.dot(&b);

        let mut env = Lqr {
            dt,
            goal,
            a,
            b,
            c,
            sigma: Array2::eye(nb_xdim) * 1e-8,
            goal_weights: Array1::from_elem(nb_xdim, 1e1),
            action_weights: Array1::from_elem(nb_udim, 1.0),
            init_mu: Array1::from_elem(nb_xdim, 5.0),
            init_sigma: Array2::eye(nb_xdim) * 1e-4,
            ad,
            bd,
            observation_space: BoxSpace::unbounded(nb_xdim),
            action_space: BoxSpace::unbounded(nb_udim),
            state: Array1::zeros(nb_xdim),
            rng: StdRng::seed_from_u64(0),
        };
        env.reset();
        env
    }

    pub fn with_initial_state(mut self, mu: Array1<f64>, sigma: Array2<f64>) -> Self {
        self.init_mu = mu;
        self.init_sigma = sigma;
        self
    }

    pub fn with_noise(mut self, sigma: Array2<f64>) -> Self {
        self.sigma = sigma;
        self
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn goal(&self) -> ArrayView1<f64> {
        self.goal.view()
    }

    /// Discrete transition matrices `(A_d, B_d)`
    pub fn discrete_matrices(&self) -> (&Array2<f64>, &Array2<f64>) {
        (&self.ad, &self.bd)
    }

    pub fn goal_weights(&self) -> ArrayView1<f64> {
        self.goal_weights.view()
    }

    pub fn action_weights(&self) -> ArrayView1<f64> {
        self.action_weights.view()
    }

    fn flow(&self, x: &Array1<f64>, u: &Array1<f64>) -> Array1<f64> {
        self.a.dot(x) + self.b.dot(u) + &self.c
    }
}

impl Default for Lqr {
    fn default() -> Self {
        Lqr::new()
    }
}

impl Environment for Lqr {
    fn observation_space(&self) -> &BoxSpace {
        &self.observation_space
    }

    fn action_space(&self) -> &BoxSpace {
        &self.action_space
    }

    fn init(&self) -> (Array1<f64>, Array2<f64>) {
        (self.init_mu.clone(), self.init_sigma.clone())
    }

    fn dynamics(&self, x: ArrayView1<f64>, u: ArrayView1<f64>) -> Array1<f64> {
        let u = self.action_space.clip(u);
        let x = x.to_owned();
        let h = self.dt;

        let k1 = self.flow(&x, &u);
        let k2 = self.flow(&(&x + &(&k1 * (0.5 * h))), &u);
        let k3 = self.flow(&(&x + &(&k2 * (0.5 * h))), &u);
        let k4 = self.flow(&(&x + &(&k3 * h)), &u);

        let xn = &x + &((&k1 + &(&k2 * 2.0) + &(&k3 * 2.0) + &k4) * (h / 6.0));
        self.observation_space.clip(xn.view())
    }

    fn noise(&self, _x: ArrayView1<f64>, _u: ArrayView1<f64>) -> Array2<f64> {
        self.sigma.clone()
    }

    fn cost(&self, x: ArrayView1<f64>, u: ArrayView1<f64>, active: bool, _xref: ArrayView1<f64>) -> f64 {
        let effort: f64 = u.iter().zip(self.action_weights.iter()).map(|(ui, w)| w * ui * ui).sum();
        if active {
            let tracking: f64 = x
                .iter()
                .zip(self.goal.iter())
                .zip(self.goal_weights.iter())
                .map(|((xi, gi), w)| w * (xi - gi) * (xi - gi))
                .sum();
            tracking + effort
        } else {
            effort
        }
    }

    fn dynamics_jacobians(&self, _x: ArrayView1<f64>, _u: ArrayView1<f64>) -> Option<(Array2<f64>, Array2<f64>)> {
        Some((self.ad.clone(), self.bd.clone()))
    }

    fn cost_derivatives(
        &self,
        x: ArrayView1<f64>,
        u: ArrayView1<f64>,
        active: bool,
        xref: ArrayView1<f64>,
    ) -> Option<CostDerivatives> {
        let nb_xdim = x.len();
        let nb_udim = u.len();
        let gate = if active { 1.0 } else { 0.0 };

        Some(CostDerivatives {
            value: self.cost(x, u, active, xref),
            cx: (&x - &self.goal) * &self.goal_weights * (2.0 * gate),
            cu: &u * &self.action_weights * 2.0,
            cxx: Array2::from_diag(&self.goal_weights) * (2.0 * gate),
            cuu: Array2::from_diag(&self.action_weights) * 2.0,
            cxu: Array2::zeros((nb_xdim, nb_udim)),
        })
    }

    fn seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    fn reset(&mut self) -> Array1<f64> {
        self.state = match psd_lower(self.init_sigma.view()) {
            Ok(lower) => sample_gaussian(self.init_mu.view(), lower.view(), &mut self.rng),
            Err(_) => self.init_mu.clone(),
        };
        self.state.clone()
    }

    fn step(&mut self, u: ArrayView1<f64>) -> Step {
        let reward = -self.cost(self.state.view(), u, true, self.state.view());
        let sigma = self.noise(self.state.view(), u);
        let mean = self.dynamics(self.state.view(), u);
        self.state = match psd_lower(sigma.view()) {
            Ok(lower) => sample_gaussian(mean.view(), lower.view(), &mut self.rng),
            Err(_) => mean,
        };
        Step {
            state: self.state.clone(),
            reward,
            done: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_goal_is_equilibrium() {
        let env = Lqr::new();
        let goal = env.goal().to_owned();
        let next = env.dynamics(goal.view(), array![0.0].view());
        assert_abs_diff_eq!(next[0], 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(next[1], 10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_discrete_matrices_match_rk4() {
        let env = Lqr::new();
        let (ad, bd) = env.discrete_matrices();
        let x = array![2.0, -3.0];
        let u = array![0.4];
        let goal = env.goal().to_owned();

        // deviation from the goal evolves linearly without offset
        let expected = ad.dot(&(&x - &goal)) + bd.dot(&u) + &goal;
        let next = env.dynamics(x.view(), u.view());
        assert_abs_diff_eq!(next[0], expected[0], epsilon = 1e-10);
        assert_abs_diff_eq!(next[1], expected[1], epsilon = 1e-10);
    }

    #[test]
    fn test_cost_activation() {
        let env = Lqr::new();
        let x = array![9.0, 10.0];
        let u = array![2.0];
        assert_abs_diff_eq!(env.cost(x.view(), u.view(), false, x.view()), 4.0);
        assert_abs_diff_eq!(env.cost(x.view(), u.view(), true, x.view()), 14.0);
    }

    #[test]
    fn test_reset_is_seeded() {
        let mut env1 = Lqr::new();
        let mut env2 = Lqr::new();
        env1.seed(11);
        env2.seed(11);
        assert_eq!(env1.reset(), env2.reset());
        let s1 = env1.step(array![1.0].view());
        let s2 = env2.step(array![1.0].view());
        assert_eq!(s1.state, s2.state);
        assert!(!s1.done);
    }
}
