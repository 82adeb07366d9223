use tracing::warn;

use crate::types::Gaussian;

/// Types of numerical issues in a trajectory distribution
#[derive(Debug, Clone, PartialEq)]
pub enum NumericalIssue {
    NaN { step: usize, count: usize },
    Infinity { step: usize, count: usize },
    /// Largest `|Σ_ij − Σ_ji|` above tolerance
    Asymmetry { step: usize, deviation: f64 },
    NegativeVariance { step: usize, dim: usize, value: f64 },
}

/// Check every step of `dist` for non-finite entries, asymmetric
/// covariances and negative variances
pub fn check_distribution(dist: &Gaussian, symmetry_tol: f64) -> Vec<NumericalIssue> {
    let mut issues = Vec::new();

    for t in 0..dist.nb_steps {
        let mu = dist.mean(t);
        let sigma = dist.cov(t);

        let mut nan_count = 0;
        let mut inf_count = 0;
        for &value in mu.iter().chain(sigma.iter()) {
            if value.is_nan() {
                nan_count += 1;
            } else if value.is_infinite() {
                inf_count += 1;
            }
        }

        if nan_count > 0 {
            issues.push(NumericalIssue::NaN { step: t, count: nan_count });
            warn!(step = t, count = nan_count, "NaN values in distribution");
        }
        if inf_count > 0 {
            issues.push(NumericalIssue::Infinity { step: t, count: inf_count });
            warn!(step = t, count = inf_count, "infinite values in distribution");
        }
        if nan_count + inf_count > 0 {
            continue;
        }

        let mut deviation = 0.0f64;
        for i in 0..dist.dim {
            for j in (i + 1)..dist.dim {
                deviation = deviation.max((sigma[[i, j]] - sigma[[j, i]]).abs());
            }
        }
        if deviation > symmetry_tol {
            issues.push(NumericalIssue::Asymmetry { step: t, deviation });
            warn!(step = t, deviation, "asymmetric covariance");
        }

        for i in 0..dist.dim {
            let value = sigma[[i, i]];
            if value < 0.0 {
                issues.push(NumericalIssue::NegativeVariance { step: t, dim: i, value });
                warn!(step = t, dim = i, value, "negative variance");
            }
        }
    }

    issues
}

/// True when `dist` has no issue at the default symmetry tolerance
pub fn is_distribution_healthy(dist: &Gaussian) -> bool {
    check_distribution(dist, 1e-8).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_healthy_distribution() {
        let mut dist = Gaussian::new(2, 3);
        for t in 0..3 {
            dist.set(t, array![1.0, 2.0].view(), array![[1.0, 0.1], [0.1, 2.0]].view());
        }
        assert!(is_distribution_healthy(&dist));
    }

    #[test]
    fn test_detects_issues() {
        let mut dist = Gaussian::new(2, 3);
        dist.mu[[0, 1]] = f64::NAN;
        dist.sigma[[1, 0, 1]] = 0.5;
        dist.sigma[[2, 1, 1]] = -1.0;

        let issues = check_distribution(&dist, 1e-8);
        assert!(issues.contains(&NumericalIssue::NaN { step: 0, count: 1 }));
        assert!(issues.contains(&NumericalIssue::Asymmetry { step: 1, deviation: 0.5 }));
        assert!(issues.contains(&NumericalIssue::NegativeVariance {
            step: 2,
            dim: 1,
            value: -1.0
        }));
    }
}
