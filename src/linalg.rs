//! Dense linear algebra on `ndarray` arrays.
//!
//! The trajectory containers are `ndarray` arrays; factorizations are delegated
//! to `nalgebra` by copying the (small, per-timestep) matrices across.

use nalgebra::DMatrix;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::{Result, TrajoptError};

/// Copy an `ndarray` matrix into an `nalgebra` matrix
pub fn to_dmatrix(a: ArrayView2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

/// Copy an `nalgebra` matrix into an `ndarray` matrix
pub fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Cholesky factorization of a symmetric positive definite matrix together
/// with the quantities the Riccati recursions need from it.
#[derive(Debug, Clone)]
pub struct SpdFactor {
    /// Lower triangular factor `L` with `A = L Lᵀ`
    pub lower: Array2<f64>,
    /// `A⁻¹`
    pub inverse: Array2<f64>,
    /// `ln det A`
    pub log_det: f64,
}

impl SpdFactor {
    /// Factorize `a`. Returns `None` when `a` is not positive definite.
    pub fn new(a: ArrayView2<f64>) -> Option<Self> {
        if a.nrows() != a.ncols() {
            return None;
        }
        if a.iter().any(|v| !v.is_finite()) {
            return None;
        }

        let chol = to_dmatrix(a).cholesky()?;
        let l = chol.l();
        let log_det = 2.0 * l.diagonal().iter().map(|d| d.ln()).sum::<f64>();
        let mut inverse = from_dmatrix(&chol.inverse());
        symmetrize(&mut inverse);

        Some(SpdFactor {
            lower: from_dmatrix(&l),
            inverse,
            log_det,
        })
    }

    /// Like [`SpdFactor::new`] but reports failures as an error
    pub fn try_new(a: ArrayView2<f64>, what: &str) -> Result<Self> {
        SpdFactor::new(a).ok_or_else(|| TrajoptError::NotPositiveDefinite(what.to_string()))
    }

    /// Solve `A x = b`
    pub fn solve(&self, b: ArrayView1<f64>) -> Array1<f64> {
        self.inverse.dot(&b)
    }
}

/// Lower Cholesky factor of a positive semi-definite matrix.
///
/// Singular covariances (e.g. deterministic state components) get an
/// increasing diagonal jitter until the factorization succeeds.
pub fn psd_lower(a: ArrayView2<f64>) -> Result<Array2<f64>> {
    if let Some(factor) = SpdFactor::new(a) {
        return Ok(factor.lower);
    }

    let n = a.nrows();
    let scale = a.diag().iter().fold(0.0f64, |m, v| m.max(v.abs())).max(1.0);
    let mut jitter = 1e-12 * scale;
    for _ in 0..10 {
        let shifted = &a + &(Array2::<f64>::eye(n) * jitter);
        if let Some(factor) = SpdFactor::new(shifted.view()) {
            return Ok(factor.lower);
        }
        jitter *= 10.0;
    }

    Err(TrajoptError::NotPositiveDefinite(
        "covariance is not positive semi-definite".to_string(),
    ))
}

/// Draw from `N(mean, L Lᵀ)` given the lower factor `L`
pub fn sample_gaussian<R: Rng + ?Sized>(
    mean: ArrayView1<f64>,
    lower: ArrayView2<f64>,
    rng: &mut R,
) -> Array1<f64> {
    let z: Array1<f64> = (0..mean.len()).map(|_| rng.sample(StandardNormal)).collect();
    &mean + &lower.dot(&z)
}

/// Replace `a` by `(a + aᵀ) / 2`
pub fn symmetrize(a: &mut Array2<f64>) {
    let sym = (&*a + &a.t()) * 0.5;
    a.assign(&sym);
}

/// Outer product `a bᵀ`
pub fn outer(a: ArrayView1<f64>, b: ArrayView1<f64>) -> Array2<f64> {
    a.insert_axis(Axis(1)).dot(&b.insert_axis(Axis(0)))
}

/// Trace of a square matrix
pub fn trace(a: ArrayView2<f64>) -> f64 {
    a.diag().sum()
}

/// `tr(A B)` without forming the product
pub fn trace_of_product(a: ArrayView2<f64>, b: ArrayView2<f64>) -> f64 {
    (&a * &b.t()).sum()
}

/// Quadratic form `xᵀ A y`
pub fn quad_form(x: ArrayView1<f64>, a: ArrayView2<f64>, y: ArrayView1<f64>) -> f64 {
    x.dot(&a.dot(&y))
}

/// Largest absolute entry, used for divergence checks
pub fn max_abs(a: impl IntoIterator<Item = f64>) -> f64 {
    let mut largest = 0.0f64;
    for v in a {
        if v.is_nan() {
            return f64::NAN;
        }
        largest = largest.max(v.abs());
    }
    largest
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_spd_factor() {
        let a = array![[4.0, 1.0], [1.0, 3.0]];
        let factor = SpdFactor::new(a.view()).unwrap();

        let identity = a.dot(&factor.inverse);
        assert_abs_diff_eq!(identity[[0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(identity[[0, 1]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(identity[[1, 1]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(factor.log_det, 11.0f64.ln(), epsilon = 1e-12);

        let rebuilt = factor.lower.dot(&factor.lower.t());
        for (x, y) in rebuilt.iter().zip(a.iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_spd_factor_rejects_indefinite() {
        let a = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(SpdFactor::new(a.view()).is_none());

        let nan = array![[f64::NAN, 0.0], [0.0, 1.0]];
        assert!(SpdFactor::new(nan.view()).is_none());

        let err = SpdFactor::try_new(a.view(), "Quu").unwrap_err();
        assert!(matches!(err, TrajoptError::NotPositiveDefinite(_)));
    }

    #[test]
    fn test_psd_lower_handles_singular() {
        let a = array![[1.0, 0.0], [0.0, 0.0]];
        let l = psd_lower(a.view()).unwrap();
        assert_abs_diff_eq!(l[[0, 0]], 1.0, epsilon = 1e-6);
        assert!(l[[1, 1]] >= 0.0 && l[[1, 1]] < 1e-4);
    }

    #[test]
    fn test_sample_gaussian_moments() {
        let mut rng = StdRng::seed_from_u64(3);
        let mean = array![1.0, -2.0];
        let cov = array![[2.0, 0.5], [0.5, 1.0]];
        let lower = psd_lower(cov.view()).unwrap();

        let n = 20000;
        let mut acc = Array1::<f64>::zeros(2);
        for _ in 0..n {
            acc += &sample_gaussian(mean.view(), lower.view(), &mut rng);
        }
        acc /= n as f64;
        assert_abs_diff_eq!(acc[0], 1.0, epsilon = 0.05);
        assert_abs_diff_eq!(acc[1], -2.0, epsilon = 0.05);
    }

    #[test]
    fn test_small_helpers() {
        let a = array![[1.0, 2.0], [3.0, 4.0]];
        let b = array![[0.5, 0.0], [1.0, 2.0]];
        assert_abs_diff_eq!(trace(a.view()), 5.0);
        assert_abs_diff_eq!(trace_of_product(a.view(), b.view()), trace(a.dot(&b).view()));

        let x = array![1.0, 2.0];
        assert_abs_diff_eq!(quad_form(x.view(), a.view(), x.view()), 27.0);
        assert_eq!(outer(x.view(), x.view()), array![[1.0, 2.0], [2.0, 4.0]]);

        let mut m = a.clone();
        symmetrize(&mut m);
        assert_eq!(m, array![[1.0, 2.5], [2.5, 4.0]]);

        assert_eq!(max_abs(vec![1.0, -3.0, 2.0]), 3.0);
        assert!(max_abs(vec![1.0, f64::NAN]).is_nan());
    }
}
