//! `DistributionMeasure`: the PMF/CDF grid and its four derived
//! populations (spec.md C4), grounded on `DstMeasure` in
//! `original_source/historical/src/measure.h` and
//! `original_source/src/measure.cc`.
//!
//! The original's running-cumulative-sum accumulator is a function-local
//! `static sample_t cumulative`, shared by *every* `DstMeasure` instance
//! in the process (spec.md §9: "Module-scoped `cumulative` accumulator").
//! Here it is a plain field on this struct instead, so two distribution
//! measures for different metric names never observe each other's
//! in-progress CDF — strictly stronger than the original for interleaved
//! input, and behaviourally identical for the documented precondition
//! that one metric's full distribution (bins `0..B`) is emitted before
//! the next one starts.

use std::collections::BTreeMap;

use crate::stats::Population;

/// Why `compute_derived_statistics` (or one of the four population
/// getters that calls it) could not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedError {
    /// No bin has ever been written for this index.
    UnknownIndex,
    /// `set_bin_size` has not been called yet.
    BinSizeUnset,
    /// `set_dist_lower` has not been called yet.
    DistLowerUnset,
}

impl std::fmt::Display for DerivedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DerivedError::UnknownIndex => write!(f, "no distribution recorded for this index"),
            DerivedError::BinSizeUnset => write!(f, "bin size not set"),
            DerivedError::DistLowerUnset => write!(f, "distribution lower bound not set"),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Grid {
    pmf: Vec<Population>,
    cdf: Vec<Population>,
    valid: Vec<bool>,
}

/// Derived per-index populations, computed lazily and incrementally from
/// the pmf/cdf grids (spec.md §4.4).
#[derive(Debug, Clone, Default)]
struct Derived {
    mean: Population,
    median: Population,
    q95: Population,
    q99: Population,
    /// Number of runs already folded into the four populations above.
    last_run: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DistributionMeasure {
    grids: BTreeMap<u32, Grid>,
    derived: BTreeMap<u32, Derived>,
    bin_size: Option<f64>,
    dist_lower: Option<f64>,
    /// Running cumulative sum, reset to zero whenever `bin == 0` is
    /// observed. See the module doc comment: this used to be a
    /// process-wide static in the original.
    cumulative: f64,
}

impl DistributionMeasure {
    pub fn new() -> DistributionMeasure {
        DistributionMeasure::default()
    }

    /// Records one sample at `(idx, bin)`, updating the PMF and the
    /// running CDF. Precondition (spec.md §4.3): the simulator emits a
    /// complete distribution (bins `0..B` in order) for a given
    /// `(metric, idx)` before starting the next one.
    pub fn add_sample(&mut self, x: f64, idx: u32, bin: usize) {
        if bin == 0 {
            self.cumulative = 0.0;
        }
        self.cumulative += x;

        let grid = self.grids.entry(idx).or_default();
        if bin >= grid.pmf.len() {
            grid.pmf.resize_with(bin + 1, Population::new);
            grid.cdf.resize_with(bin + 1, Population::new);
            grid.valid.resize(bin + 1, false);
        }
        grid.pmf[bin].add_sample(x);
        grid.cdf[bin].add_sample(self.cumulative);
        grid.valid[bin] = true;
    }

    pub fn set_bin_size(&mut self, s: f64) {
        self.bin_size = Some(s);
    }

    pub fn set_dist_lower(&mut self, s: f64) {
        self.dist_lower = Some(s);
    }

    pub fn bin_size(&self) -> Option<f64> {
        self.bin_size
    }

    pub fn dist_lower(&self) -> Option<f64> {
        self.dist_lower
    }

    /// Number of indices with at least one recorded bin.
    pub fn len(&self) -> usize {
        self.grids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }

    /// Ascending traversal over the indices that have at least one bin.
    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.grids.keys().copied()
    }

    /// Number of bins allocated for `idx` (0 if `idx` is unknown).
    pub fn bin_count(&self, idx: u32) -> usize {
        self.grids.get(&idx).map_or(0, |g| g.pmf.len())
    }

    pub fn is_valid(&self, idx: u32, bin: usize) -> bool {
        self.grids.get(&idx).and_then(|g| g.valid.get(bin)).copied().unwrap_or(false)
    }

    pub fn pmf(&self, idx: u32, bin: usize) -> Option<&Population> {
        self.grids.get(&idx).filter(|g| g.valid.get(bin).copied().unwrap_or(false))?.pmf.get(bin)
    }

    pub fn cdf(&self, idx: u32, bin: usize) -> Option<&Population> {
        self.grids.get(&idx).filter(|g| g.valid.get(bin).copied().unwrap_or(false))?.cdf.get(bin)
    }

    /// Computes any not-yet-folded runs of the four derived populations
    /// for `idx` (spec.md §4.4). A no-op if nothing new has arrived
    /// since the last call.
    pub fn compute_derived_statistics(&mut self, idx: u32) -> Result<(), DerivedError> {
        let bin_size = self.bin_size.ok_or(DerivedError::BinSizeUnset)?;
        let dist_lower = self.dist_lower.ok_or(DerivedError::DistLowerUnset)?;
        let grid = self.grids.get(&idx).ok_or(DerivedError::UnknownIndex)?;

        if grid.pmf.is_empty() {
            return Ok(());
        }
        let run_count = grid.pmf[0].len();
        let derived = self.derived.entry(idx).or_default();
        if run_count == derived.last_run {
            return Ok(());
        }

        for run in derived.last_run..run_count {
            let mut mean = 0.0;
            for (bin, pop) in grid.pmf.iter().enumerate() {
                // A sample is guaranteed present at `run` for every bin
                // of this index: spec.md's size invariant requires all
                // pmf populations under an index to share one size.
                let x = pop.get(run).expect("pmf bin population shorter than bin 0");
                mean += x * (dist_lower + bin_size * (bin as f64 + 1.0));
            }

            // Descending scan, overwrite-on-exceed: the final value left
            // standing is the smallest bin whose cumulative still
            // exceeds the threshold (spec.md §4.4).
            let mut median = 0.0;
            let mut q95 = 0.0;
            let mut q99 = 0.0;
            for bin in (0..grid.cdf.len()).rev() {
                let c = grid.cdf[bin]
                    .get(run)
                    .expect("cdf bin population shorter than bin 0");
                let edge = dist_lower + bin_size * (bin as f64 + 1.0);
                if c > 0.50 {
                    median = edge;
                }
                if c > 0.95 {
                    q95 = edge;
                }
                if c > 0.99 {
                    q99 = edge;
                }
            }

            derived.mean.add_sample(mean);
            derived.median.add_sample(median);
            derived.q95.add_sample(q95);
            derived.q99.add_sample(q99);
        }
        derived.last_run = run_count;

        Ok(())
    }

    pub fn mean_population(&mut self, idx: u32) -> Result<&Population, DerivedError> {
        self.compute_derived_statistics(idx)?;
        Ok(&self.derived[&idx].mean)
    }

    pub fn median_population(&mut self, idx: u32) -> Result<&Population, DerivedError> {
        self.compute_derived_statistics(idx)?;
        Ok(&self.derived[&idx].median)
    }

    pub fn q95_population(&mut self, idx: u32) -> Result<&Population, DerivedError> {
        self.compute_derived_statistics(idx)?;
        Ok(&self.derived[&idx].q95)
    }

    pub fn q99_population(&mut self, idx: u32) -> Result<&Population, DerivedError> {
        self.compute_derived_statistics(idx)?;
        Ok(&self.derived[&idx].q99)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// spec.md §8 invariant 1: cdf[idx][last_bin].last() == sum of x.
    #[test]
    fn cdf_last_bin_accumulates_the_full_sum() {
        let mut m = DistributionMeasure::new();
        let xs = [0.1, 0.2, 0.3, 0.4];
        for (bin, &x) in xs.iter().enumerate() {
            m.add_sample(x, 0, bin);
        }
        let total: f64 = xs.iter().sum();
        let last = m.cdf(0, xs.len() - 1).unwrap().get(0).unwrap();
        assert!((last - total).abs() < 1e-12);
    }

    /// spec.md §8 scenario S6.
    #[test]
    fn derived_statistics_match_the_worked_example() {
        let mut m = DistributionMeasure::new();
        m.set_bin_size(1.0);
        m.set_dist_lower(0.0);
        for (bin, &x) in [0.1, 0.4, 0.4, 0.1].iter().enumerate() {
            m.add_sample(x, 0, bin);
        }

        assert_eq!(m.mean_population(0).unwrap().get(0), Some(2.5));
        assert_eq!(m.median_population(0).unwrap().get(0), Some(3.0));
        assert_eq!(m.q95_population(0).unwrap().get(0), Some(4.0));
        assert_eq!(m.q99_population(0).unwrap().get(0), Some(4.0));
    }

    #[test]
    fn derived_statistics_require_bin_size_and_lower_bound() {
        let mut m = DistributionMeasure::new();
        m.add_sample(1.0, 0, 0);
        assert_eq!(m.compute_derived_statistics(0), Err(DerivedError::BinSizeUnset));
        m.set_bin_size(1.0);
        assert_eq!(m.compute_derived_statistics(0), Err(DerivedError::DistLowerUnset));
        m.set_dist_lower(0.0);
        assert_eq!(m.compute_derived_statistics(0), Ok(()));
    }

    #[test]
    fn unknown_index_is_reported_before_bin_size() {
        let mut m = DistributionMeasure::new();
        m.set_bin_size(1.0);
        m.set_dist_lower(0.0);
        assert_eq!(m.compute_derived_statistics(7), Err(DerivedError::UnknownIndex));
    }

    #[test]
    fn sparse_bins_are_tracked_as_invalid() {
        let mut m = DistributionMeasure::new();
        m.add_sample(1.0, 0, 0);
        m.add_sample(1.0, 0, 3);
        assert!(m.is_valid(0, 0));
        assert!(!m.is_valid(0, 1));
        assert!(!m.is_valid(0, 2));
        assert!(m.is_valid(0, 3));
        assert_eq!(m.bin_count(0), 4);
    }

    #[test]
    fn cumulative_is_reset_per_metric_not_process_wide() {
        let mut a = DistributionMeasure::new();
        let mut b = DistributionMeasure::new();
        a.add_sample(1.0, 0, 0);
        a.add_sample(1.0, 0, 1);
        // `b` starting its own bin-0 must not see `a`'s running total.
        b.add_sample(5.0, 0, 0);
        assert_eq!(b.cdf(0, 0).unwrap().get(0), Some(5.0));
        assert_eq!(a.cdf(0, 1).unwrap().get(0), Some(2.0));
    }
}
