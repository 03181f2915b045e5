//! `AveragedMeasure`: a mapping from metric index to `Population` (spec.md
//! C3), grounded on `AvgMeasure` in `original_source/historical/src/
//! measure.h`.
//!
//! The original keeps a mutable cursor (`it`) inside the object, shared
//! between the metric registry's stop-condition walk and any other
//! caller that happens to be iterating at the same time. Per spec.md §9
//! ("Cursor living inside the averaged measure") that's dropped here:
//! ascending traversal is a plain iterator borrowed from the underlying
//! `BTreeMap`, and random access (`get`) is an entirely separate call
//! with no shared mutable state between them.

use std::collections::BTreeMap;

use crate::stats::Population;

/// Populations keyed by metric index, one per index the simulator has
/// emitted a sample for. Indices iterate in ascending order.
#[derive(Debug, Clone, Default)]
pub struct AveragedMeasure {
    populations: BTreeMap<u32, Population>,
}

impl AveragedMeasure {
    pub fn new() -> AveragedMeasure {
        AveragedMeasure { populations: BTreeMap::new() }
    }

    /// Appends `x` to the population at `id`, creating it if this is the
    /// first sample seen for that index.
    pub fn add_sample(&mut self, id: u32, x: f64) {
        self.populations.entry(id).or_default().add_sample(x);
    }

    pub fn has(&self, id: u32) -> bool {
        self.populations.contains_key(&id)
    }

    /// Random access to the population at `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` has never received a sample. Callers must check
    /// `has(id)` first; this mirrors the "duplicate population request
    /// on a known-invalid id" programming-error case in spec.md §7.
    pub fn get(&self, id: u32) -> &Population {
        self.populations
            .get(&id)
            .unwrap_or_else(|| panic!("AveragedMeasure::get: no population at index {id}"))
    }

    /// Number of distinct indices tracked by this measure.
    pub fn len(&self) -> usize {
        self.populations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.populations.is_empty()
    }

    /// Ascending traversal over `(index, population)`. Used by the
    /// metric registry's relative-confidence check and by textual dumps;
    /// mutates nothing, so nothing else needs to coordinate with it.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Population)> {
        self.populations.iter().map(|(&id, p)| (id, p))
    }
}
