//! The configuration model (spec.md C6): metric descriptors and the
//! read-only oracle the ingester and control loop consult while
//! deciding relevance and the stop condition.
//!
//! Grounded on `Configuration`, `MetricDescAvg`, and `MetricDescDst` in
//! `original_source/historical/src/configuration.h`.

pub mod grammar;

use std::collections::BTreeMap;
use std::path::PathBuf;

/// One `s`/`d` descriptor line's worth of settings for a single metric
/// (or distribution submetric). Defaults to "ignore this metric
/// entirely", matching `MetricDescAvg`'s default constructor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricDescriptor {
    /// False if this metric should be ignored altogether.
    pub relevant: bool,
    /// True if this metric is emitted to a text dump.
    pub output: bool,
    /// True if this metric participates in the stop condition.
    pub check: bool,
    /// Confidence level for output, meaningful only if `output`.
    pub out_cl: f64,
    /// Confidence level for the stop-condition check, meaningful only
    /// if `check`.
    pub cl: f64,
    /// Relative half-width threshold, meaningful only if `check`.
    pub threshold: f64,
}

impl Default for MetricDescriptor {
    fn default() -> MetricDescriptor {
        MetricDescriptor {
            relevant: false,
            output: false,
            check: false,
            out_cl: 0.0,
            cl: 0.0,
            threshold: 0.0,
        }
    }
}

impl MetricDescriptor {
    pub fn is_relevant(&self) -> bool {
        self.relevant
    }
}

/// The six submetrics a distribution descriptor line can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Submetric {
    Pmf,
    Cdf,
    Mean,
    Median,
    Q95,
    Q99,
}

impl Submetric {
    pub const ALL: [Submetric; 6] =
        [Submetric::Pmf, Submetric::Cdf, Submetric::Mean, Submetric::Median, Submetric::Q95, Submetric::Q99];

    pub fn parse(word: &str) -> Option<Submetric> {
        match word {
            "pmf" => Some(Submetric::Pmf),
            "cdf" => Some(Submetric::Cdf),
            "mean" => Some(Submetric::Mean),
            "median" => Some(Submetric::Median),
            "q95" => Some(Submetric::Q95),
            "q99" => Some(Submetric::Q99),
            _ => None,
        }
    }
}

/// Descriptor for a distribution metric/index: one `MetricDescriptor`
/// per submetric, grounded on `MetricDescDst`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DistributionDescriptor {
    pub pmf: MetricDescriptor,
    pub cdf: MetricDescriptor,
    pub mean: MetricDescriptor,
    pub median: MetricDescriptor,
    pub q95: MetricDescriptor,
    pub q99: MetricDescriptor,
}

impl DistributionDescriptor {
    pub fn get(&self, sub: Submetric) -> &MetricDescriptor {
        match sub {
            Submetric::Pmf => &self.pmf,
            Submetric::Cdf => &self.cdf,
            Submetric::Mean => &self.mean,
            Submetric::Median => &self.median,
            Submetric::Q95 => &self.q95,
            Submetric::Q99 => &self.q99,
        }
    }

    pub fn get_mut(&mut self, sub: Submetric) -> &mut MetricDescriptor {
        match sub {
            Submetric::Pmf => &mut self.pmf,
            Submetric::Cdf => &mut self.cdf,
            Submetric::Mean => &mut self.mean,
            Submetric::Median => &mut self.median,
            Submetric::Q95 => &mut self.q95,
            Submetric::Q99 => &mut self.q99,
        }
    }

    /// True iff any of the six submetrics is relevant (spec_full §3.2,
    /// grounded on `MetricDescDst::isRelevant`).
    pub fn is_relevant(&self) -> bool {
        Submetric::ALL.iter().any(|&s| self.get(s).relevant)
    }
}

/// Parsed configuration: the save-file path, replication bounds, and
/// every metric descriptor declared by `s`/`d` directives.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    pub save_file: PathBuf,
    pub header: Option<PathBuf>,
    pub trailer: Option<PathBuf>,
    /// Lower bound on replications. `0` means "no minimum".
    pub min_runs: u32,
    /// Upper bound on replications. `0` means "no maximum" (treated as
    /// infinite by the control loop).
    pub max_runs: u32,
    avg: BTreeMap<String, BTreeMap<u32, MetricDescriptor>>,
    dst: BTreeMap<String, BTreeMap<u32, DistributionDescriptor>>,
}

impl Configuration {
    pub(crate) fn insert_avg(&mut self, name: &str, id: u32, desc: MetricDescriptor) {
        self.avg.entry(name.to_string()).or_default().insert(id, desc);
    }

    pub(crate) fn insert_dst(
        &mut self,
        name: &str,
        id: u32,
        sub: Submetric,
        desc: MetricDescriptor,
    ) {
        let entry = self.dst.entry(name.to_string()).or_default().entry(id).or_default();
        *entry.get_mut(sub) = desc;
    }

    pub fn desc_avg(&self, name: &str, id: u32) -> Option<MetricDescriptor> {
        self.avg.get(name)?.get(&id).copied()
    }

    pub fn desc_dst(&self, name: &str, id: u32) -> Option<DistributionDescriptor> {
        self.dst.get(name)?.get(&id).copied()
    }

    /// Every averaged metric name that has at least one descriptor.
    pub fn averaged_metric_names(&self) -> impl Iterator<Item = &str> {
        self.avg.keys().map(|s| s.as_str())
    }

    /// Every distribution metric name that has at least one descriptor.
    pub fn distribution_metric_names(&self) -> impl Iterator<Item = &str> {
        self.dst.keys().map(|s| s.as_str())
    }

    /// Every `(index, descriptor)` pair declared for an averaged metric.
    pub fn avg_descriptors(&self, name: &str) -> impl Iterator<Item = (u32, MetricDescriptor)> + '_ {
        self.avg.get(name).into_iter().flat_map(|m| m.iter().map(|(&id, &d)| (id, d)))
    }

    /// Every `(index, descriptor)` pair declared for a distribution
    /// metric.
    pub fn dst_descriptors(
        &self,
        name: &str,
    ) -> impl Iterator<Item = (u32, DistributionDescriptor)> + '_ {
        self.dst.get(name).into_iter().flat_map(|m| m.iter().map(|(&id, &d)| (id, d)))
    }

    /// Names of every metric whose `check` flag is set on at least one
    /// descriptor — the set the relative-confidence predicate (spec.md
    /// §4.5) is evaluated over.
    pub fn checked_averaged_names(&self) -> std::collections::HashSet<String> {
        self.avg
            .iter()
            .filter(|(_, descs)| descs.values().any(|d| d.check))
            .map(|(name, _)| name.clone())
            .collect()
    }
}
