pub mod numerical_check;

pub use numerical_check::{check_distribution, is_distribution_healthy, NumericalIssue};
