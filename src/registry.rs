//! `MetricRegistry`: the keyed collection of averaged and distribution
//! measures (spec.md C5), grounded on the `Metrics` class in
//! `original_source/historical/src/measure.h` and
//! `original_source/src/measure.cc`.

use std::collections::{BTreeMap, HashSet};
use std::io::{self, Write};

use crate::measures::{AveragedMeasure, DistributionMeasure};

#[derive(Debug, Clone, Default)]
pub struct MetricRegistry {
    averaged: BTreeMap<String, AveragedMeasure>,
    distribution: BTreeMap<String, DistributionMeasure>,
}

impl MetricRegistry {
    pub fn new() -> MetricRegistry {
        MetricRegistry::default()
    }

    pub fn add_averaged_sample(&mut self, name: &str, x: f64, id: u32) {
        self.averaged.entry(name.to_string()).or_default().add_sample(id, x);
    }

    pub fn add_distribution_sample(&mut self, name: &str, x: f64, id: u32, bin: usize) {
        self.distribution.entry(name.to_string()).or_default().add_sample(x, id, bin);
    }

    pub fn set_bin_size(&mut self, name: &str, bin_size: f64) {
        self.distribution.entry(name.to_string()).or_default().set_bin_size(bin_size);
    }

    pub fn set_dist_lower(&mut self, name: &str, dist_lower: f64) {
        self.distribution.entry(name.to_string()).or_default().set_dist_lower(dist_lower);
    }

    pub fn averaged(&self, name: &str) -> Option<&AveragedMeasure> {
        self.averaged.get(name)
    }

    pub fn distribution(&self, name: &str) -> Option<&DistributionMeasure> {
        self.distribution.get(name)
    }

    pub fn distribution_mut(&mut self, name: &str) -> Option<&mut DistributionMeasure> {
        self.distribution.get_mut(name)
    }

    /// Ascending-by-name traversal of the averaged measures.
    pub fn averaged_measures(&self) -> impl Iterator<Item = (&str, &AveragedMeasure)> {
        self.averaged.iter().map(|(name, m)| (name.as_str(), m))
    }

    /// Ascending-by-name traversal of the distribution measures, with
    /// mutable access so callers can compute derived statistics while
    /// walking (needed by the stop-condition evaluator, `control::
    /// stop_condition`).
    pub fn distribution_measures_mut(
        &mut self,
    ) -> impl Iterator<Item = (&str, &mut DistributionMeasure)> {
        self.distribution.iter_mut().map(|(name, m)| (name.as_str(), m))
    }

    /// Relative-confidence check over a set of averaged-metric names
    /// (spec.md §4.5): `true` iff every population of every named
    /// averaged measure either has a non-positive mean, or a relative
    /// half-width `(2 * CI) / mean <= threshold`. A population of size
    /// one fails immediately; a confidence interval the statistics
    /// kernel cannot compute is treated the same as "not yet converged"
    /// (the predicate returns `false`), matching spec.md §7's rule that
    /// an invalid statistic means "retain, do not evaluate as passing".
    pub fn check_relative_confidence(
        &self,
        metrics: &HashSet<String>,
        cl: f64,
        threshold: f64,
    ) -> bool {
        for (name, measure) in self.averaged_measures() {
            if !metrics.contains(name) {
                continue;
            }
            for (_, population) in measure.iter() {
                if population.len() == 1 {
                    return false;
                }
                let Some(mean) = population.mean() else {
                    return false;
                };
                if mean <= 0.0 {
                    continue;
                }
                match population.confidence_interval(cl) {
                    Ok(ci) => {
                        if (2.0 * ci) / mean > threshold {
                            return false;
                        }
                    }
                    Err(_) => return false,
                }
            }
        }
        true
    }

    /// Human-readable dump of every raw sample plus `[mean, CI]`,
    /// grounded on `Metrics::dump(std::ostream&, cl, dist)` in
    /// `original_source/src/measure.cc`. Used by the CLI's debug path
    /// (SPEC_FULL.md §3.1); distribution measures are skipped unless
    /// `dist` is true.
    pub fn dump_debug<W: Write>(&mut self, out: &mut W, cl: f64, dist: bool) -> io::Result<()> {
        for (name, measure) in self.averaged.iter() {
            writeln!(out, "averaged measure = {name}")?;
            for (id, population) in measure.iter() {
                write!(out, "({id}) = ")?;
                dump_samples(out, population.samples())?;
                writeln!(out, " [{}, {}]", fmt_opt(population.mean()), fmt_ci(population, cl))?;
            }
        }

        if !dist {
            return Ok(());
        }

        for (name, measure) in self.distribution.iter_mut() {
            writeln!(out, "distribution measure = {name}")?;
            for idx in measure.indices().collect::<Vec<_>>() {
                for bin in 0..measure.bin_count(idx) {
                    if let Some(p) = measure.pmf(idx, bin) {
                        write!(out, "({idx}, {bin}) = ")?;
                        dump_samples(out, p.samples())?;
                        writeln!(out, " [{}, {}]", fmt_opt(p.mean()), fmt_ci(p, cl))?;
                    }
                }
                for bin in 0..measure.bin_count(idx) {
                    if let Some(p) = measure.cdf(idx, bin) {
                        write!(out, "({idx}, {bin}) cdf = ")?;
                        dump_samples(out, p.samples())?;
                        writeln!(out, " [{}, {}]", fmt_opt(p.mean()), fmt_ci(p, cl))?;
                    }
                }
                if let Ok(p) = measure.median_population(idx) {
                    if !p.is_empty() {
                        writeln!(out, "({idx}) median = [{}, {}]", fmt_opt(p.mean()), fmt_ci(p, cl))?;
                    }
                }
                if let Ok(p) = measure.mean_population(idx) {
                    if !p.is_empty() {
                        writeln!(out, "({idx}) mean   = [{}, {}]", fmt_opt(p.mean()), fmt_ci(p, cl))?;
                    }
                }
                if let Ok(p) = measure.q95_population(idx) {
                    if !p.is_empty() {
                        writeln!(out, "({idx}) q95    = [{}, {}]", fmt_opt(p.mean()), fmt_ci(p, cl))?;
                    }
                }
                if let Ok(p) = measure.q99_population(idx) {
                    if !p.is_empty() {
                        writeln!(out, "({idx}) q99    = [{}, {}]", fmt_opt(p.mean()), fmt_ci(p, cl))?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn dump_samples<W: Write>(out: &mut W, samples: &[f64]) -> io::Result<()> {
    for (i, x) in samples.iter().enumerate() {
        if i > 0 {
            write!(out, ", ")?;
        }
        write!(out, "{x}")?;
    }
    Ok(())
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_else(|| "n/a".to_string())
}

fn fmt_ci(p: &crate::stats::Population, cl: f64) -> String {
    p.confidence_interval(cl).map(|x| x.to_string()).unwrap_or_else(|_| "n/a".to_string())
}
