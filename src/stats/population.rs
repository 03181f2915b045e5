//! `Population`: an ordered, append-only bag of samples together with the
//! two queries every measure builds on (mean, confidence half-width).
//!
//! Grounded on the `Population` class in `original_source/historical/src/
//! measure.h` / `measure.cc`, redesigned per spec.md §9 to replace the
//! "validity out-parameter" convention with a tagged result: `mean`
//! returns `Option<f64>`, `confidence_interval` returns
//! `Result<f64, ConfidenceError>`.

use super::student_t;

/// Why a confidence interval could not be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceError {
    /// `n <= 1`: a confidence interval needs at least two samples,
    /// whether `cl` names a proper confidence level or the `cl == 2.0`
    /// fixed-range mode.
    InsufficientSamples,
    /// `cl` falls in the `(0.95, 0.975]` Student-t bucket and
    /// `df = n - 1 > 30`: the table has no asymptotic entry for this
    /// column. See `stats::student_t::quantile` and DESIGN.md Open
    /// Question 2.
    UndefinedQuantile,
}

impl std::fmt::Display for ConfidenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfidenceError::InsufficientSamples => {
                write!(f, "population has too few samples for a confidence interval")
            }
            ConfidenceError::UndefinedQuantile => {
                write!(f, "Student-t quantile undefined for this confidence level and df")
            }
        }
    }
}

/// A fixed-range request: `confidence_interval(2.0)` returns
/// `sqrt(variance) / 2` instead of a Student-t half-width. Named so call
/// sites don't read as a typo for `0.2`.
pub const FIXED_RANGE: f64 = 2.0;

/// An ordered, append-only sequence of samples drawn across successive
/// replications of one (metric, index[, bin]) stream.
#[derive(Debug, Clone, Default)]
pub struct Population {
    samples: Vec<f64>,
}

impl Population {
    pub fn new() -> Population {
        Population { samples: Vec::new() }
    }

    pub fn add_sample(&mut self, x: f64) {
        self.samples.push(x);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Random-access read of the `i`-th sample, in insertion (replication)
    /// order. Returns `None` when `i` is out of range; callers that need
    /// to distinguish "out of range" from a programming error should
    /// check `len()` first, per spec.md §4.4's "fail if any individual
    /// sample read returns invalid".
    pub fn get(&self, i: usize) -> Option<f64> {
        self.samples.get(i).copied()
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Arithmetic mean. `None` for an empty population.
    pub fn mean(&self) -> Option<f64> {
        let n = self.samples.len();
        if n == 0 {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / n as f64)
    }

    /// Sample variance with Bessel's correction (`n - 1` denominator).
    /// `None` for `n <= 1`.
    pub fn variance(&self) -> Option<f64> {
        let n = self.samples.len();
        if n <= 1 {
            return None;
        }
        let mean = self.mean()?;
        let sum_sq: f64 = self.samples.iter().map(|&x| (x - mean) * (x - mean)).sum();
        Some(sum_sq / (n - 1) as f64)
    }

    /// Two-sided confidence half-width at level `cl`, or the fixed-range
    /// half-width `sqrt(variance) / 2` when `cl == FIXED_RANGE`.
    ///
    /// Fails with `InsufficientSamples` for `n <= 1` in either mode, and
    /// with `UndefinedQuantile` when `cl` falls in the Student-t bucket
    /// that has no table entry past `df = 30` (see
    /// `stats::student_t::quantile`).
    pub fn confidence_interval(&self, cl: f64) -> Result<f64, ConfidenceError> {
        let n = self.samples.len();
        let insufficient = (cl > 0.0 && cl < 1.0 && n <= 1) || (cl == FIXED_RANGE && n <= 1);
        if insufficient {
            return Err(ConfidenceError::InsufficientSamples);
        }

        // `variance()` already requires n >= 2; the check above rules out
        // n <= 1 for every `cl` this function is meant to handle.
        let variance = self.variance().ok_or(ConfidenceError::InsufficientSamples)?;

        if cl == FIXED_RANGE {
            return Ok(variance.sqrt() / 2.0);
        }

        let df = (n - 1) as u32;
        let t = student_t::quantile(cl, df).ok_or(ConfidenceError::UndefinedQuantile)?;
        Ok(t * (variance / n as f64).sqrt())
    }
}
