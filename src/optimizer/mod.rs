//! Bounded minimization of a scalar function with a known derivative.
//!
//! Used for the GPS dual: the objective is convex along the search variable,
//! so the minimizer brackets the root of the derivative and refines it with
//! safeguarded secant steps.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrajoptError};

/// Outcome of [`BoundedScalarMinimizer::minimize`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScalarMinimum {
    pub x: f64,
    pub value: f64,
    pub gradient: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Box-constrained 1-D minimizer driven by derivative sign changes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundedScalarMinimizer {
    pub lower: f64,
    pub upper: f64,
    /// Relative tolerance on the change of the objective
    pub ftol: f64,
    /// Tolerance on the (projected) derivative
    pub gtol: f64,
    /// Tolerance on the bracket width
    pub xtol: f64,
    pub max_iter: usize,
}

impl BoundedScalarMinimizer {
    pub fn new(lower: f64, upper: f64) -> Result<Self> {
        if !(lower < upper) || !lower.is_finite() || !upper.is_finite() {
            return Err(TrajoptError::invalid_parameter(
                "bounds".to_string(),
                format!("expected finite lower < upper, got [{}, {}]", lower, upper),
            ));
        }
        Ok(BoundedScalarMinimizer {
            lower,
            upper,
            ftol: 1e-10,
            gtol: 1e-8,
            xtol: 1e-10,
            max_iter: 1000,
        })
    }

    pub fn with_ftol(mut self, ftol: f64) -> Self {
        self.ftol = ftol;
        self
    }

    pub fn with_gtol(mut self, gtol: f64) -> Self {
        self.gtol = gtol;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Minimize `f` starting at `x0`.
    ///
    /// `f` returns `(value, derivative)`. An infinite or NaN value marks an
    /// infeasible point; its derivative sign still steers the search. The
    /// best finite point seen is returned whether or not the tolerances were
    /// met.
    pub fn minimize<F>(&self, mut f: F, x0: f64) -> ScalarMinimum
    where
        F: FnMut(f64) -> (f64, f64),
    {
        let mut lo = self.lower;
        let mut hi = self.upper;
        // derivative known at a bracket end
        let mut g_lo: Option<f64> = None;
        let mut g_hi: Option<f64> = None;
        let mut step = 1.0f64.min(0.25 * (hi - lo));

        let mut x = x0.max(lo).min(hi);
        let (mut fx, mut gx) = f(x);

        let mut best = ScalarMinimum {
            x,
            value: fx,
            gradient: gx,
            iterations: 0,
            converged: false,
        };

        for iter in 1..=self.max_iter {
            best.iterations = iter;

            if fx.is_finite() && gx.abs() <= self.gtol {
                best.converged = true;
                break;
            }
            if (x <= self.lower && gx > 0.0) || (x >= self.upper && gx < 0.0) {
                best.converged = true;
                break;
            }

            if gx > 0.0 {
                hi = x;
                g_hi = Some(gx);
            } else {
                lo = x;
                g_lo = Some(gx);
            }
            if hi - lo <= self.xtol {
                best.converged = true;
                break;
            }

            let candidate = match (g_lo, g_hi) {
                (Some(gl), Some(gh)) => {
                    let width = hi - lo;
                    let secant = if gh > gl { lo - gl * width / (gh - gl) } else { 0.5 * (lo + hi) };
                    let secant = if secant.is_finite() { secant } else { 0.5 * (lo + hi) };
                    secant.max(lo + 0.1 * width).min(hi - 0.1 * width)
                }
                // expand towards the unexplored side
                (Some(_), None) => {
                    let next = (x + step).min(hi);
                    step *= 2.0;
                    next
                }
                (None, Some(_)) => {
                    let next = (x - step).max(lo);
                    step *= 2.0;
                    next
                }
                (None, None) => 0.5 * (lo + hi),
            };

            x = candidate;
            let (fv, gv) = f(x);
            fx = fv;
            gx = gv;

            if fx.is_finite() && (!best.value.is_finite() || fx < best.value) {
                let stalled = best.value.is_finite()
                    && best.value - fx <= self.ftol * best.value.abs().max(fx.abs()).max(1.0);
                best.x = x;
                best.value = fx;
                best.gradient = gx;
                if stalled && g_lo.is_some() && g_hi.is_some() {
                    best.converged = true;
                    break;
                }
            }
        }

        best
    }
}
