use thiserror::Error;

/// Result type for trajopt operations
pub type Result<T> = std::result::Result<T, TrajoptError>;

/// Main error type for the trajopt library
#[derive(Debug, Clone, Error)]
pub enum TrajoptError {
    /// Invalid dimensions for operations
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: String, actual: String },

    /// Invalid parameter value
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// A backward pass hit a state-action Hessian that is not positive definite
    #[error("Backward pass diverged at step {step}")]
    Diverged { step: usize },

    /// Cholesky factorization failed outside of a backward pass
    #[error("Matrix is not positive definite: {0}")]
    NotPositiveDefinite(String),

    /// Numerical computation errors
    #[error("Numerical error: {0}")]
    NumericalError(String),

    /// Not enough samples to learn from
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for TrajoptError {
    fn from(err: serde_json::Error) -> Self {
        TrajoptError::SerializationError(err.to_string())
    }
}

// Helper functions for common error patterns
impl TrajoptError {
    pub fn dimension_mismatch<S: Into<String>>(expected: S, actual: S) -> Self {
        TrajoptError::DimensionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn invalid_parameter<S: Into<String>>(name: S, reason: S) -> Self {
        TrajoptError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// True for the recoverable divergence signal of a backward pass
    pub fn is_divergence(&self) -> bool {
        matches!(self, TrajoptError::Diverged { .. })
    }
}

/// Check that an array shape matches the expected one
pub(crate) fn check_shape(what: &str, expected: &[usize], actual: &[usize]) -> Result<()> {
    if expected != actual {
        return Err(TrajoptError::dimension_mismatch(
            format!("{} with shape {:?}", what, expected),
            format!("{:?}", actual),
        ));
    }
    Ok(())
}
