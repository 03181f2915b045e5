//! The statistics kernel (spec.md C1) and the `Population` type built on
//! top of it (spec.md C2).

pub mod population;
pub mod student_t;

pub use population::{ConfidenceError, Population, FIXED_RANGE};
