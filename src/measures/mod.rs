//! Per-metric measures: `AveragedMeasure` (spec.md C3) and
//! `DistributionMeasure` (spec.md C4).

pub mod averaged;
pub mod distribution;

pub use averaged::AveragedMeasure;
pub use distribution::{DerivedError, DistributionMeasure};
