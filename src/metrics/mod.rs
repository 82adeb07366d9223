pub mod trace;

pub use trace::{IterationRecord, OptimizationTrace};
