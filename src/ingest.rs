//! Ingestion of run records into a [`MetricRegistry`] and save-file
//! recovery (spec.md C8), grounded on `Input::readSingleRun` /
//! `Input::recoverData` in `original_source/src/input.cc`.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use crate::codec::{self, RunRecord};
use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::registry::MetricRegistry;

/// Tracks which run ids have already been folded into a registry, so a
/// duplicate record in the stream is skipped rather than double-counted
/// (spec.md §4.7, `readSingleRun`'s `runIdentifiers.count(id)` guard).
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    seen: HashSet<u32>,
}

impl Ledger {
    pub fn new() -> Ledger {
        Ledger::default()
    }

    pub fn contains(&self, run_id: u32) -> bool {
        self.seen.contains(&run_id)
    }

    pub(crate) fn insert(&mut self, run_id: u32) {
        self.seen.insert(run_id);
    }

    pub fn run_ids(&self) -> impl Iterator<Item = &u32> {
        self.seen.iter()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Folds one decoded run record into `registry`, honoring
/// `recover`/`only_avg`/`one_metric` the way `readSingleRun` does:
/// in recovery mode every sample is accepted regardless of the
/// configuration's relevance flags; `only_avg` skips distribution
/// bins entirely; `one_metric`, when set, restricts ingestion to a
/// single named metric.
fn apply_run(
    registry: &mut MetricRegistry,
    config: &Configuration,
    run: &RunRecord,
    recover: bool,
    only_avg: bool,
    one_metric: Option<&str>,
) {
    for metric in &run.avg {
        if one_metric.is_some_and(|m| m != metric.name) {
            continue;
        }
        for sample in &metric.samples {
            let relevant = recover
                || config.desc_avg(&metric.name, sample.idx).is_some_and(|d| d.is_relevant());
            if relevant {
                registry.add_averaged_sample(&metric.name, sample.value, sample.idx);
            }
        }
    }

    if only_avg {
        return;
    }

    for metric in &run.dst {
        if one_metric.is_some_and(|m| m != metric.name) {
            continue;
        }
        // Bin size and lower bound are metric-wide, set unconditionally
        // (matching `readSingleRun`'s unconditional `setBinSize`/
        // `setDistLower` calls at the end of the per-metric loop);
        // relevance is evaluated per index below, the way the original
        // calls `getDescDst` with each index's own metric id.
        registry.set_bin_size(&metric.name, metric.bin_size);
        registry.set_dist_lower(&metric.name, metric.dist_lower);
        for (idx, bins) in &metric.indices {
            let relevant =
                recover || config.desc_dst(&metric.name, *idx).is_some_and(|d| d.is_relevant());
            if !relevant {
                continue;
            }
            for (bin, &x) in bins.iter().enumerate() {
                registry.add_distribution_sample(&metric.name, x, *idx, bin);
            }
        }
    }
}

/// Reads every run record from `input`, folding new ones into
/// `registry` and skipping ones already present in `ledger`. Mirrors
/// each consumed record verbatim to `mirror` when given (the save-file
/// append path).
pub fn ingest_stream<R: io::Read, W: Write>(
    input: &mut R,
    registry: &mut MetricRegistry,
    config: &Configuration,
    ledger: &mut Ledger,
    mut mirror: Option<&mut W>,
    recover: bool,
    only_avg: bool,
    one_metric: Option<&str>,
) -> Result<()> {
    loop {
        // A duplicate run id cannot be detected before decoding the
        // whole record, since the id is the first field; it is simply
        // discarded (and not mirrored) once seen.
        let run = match codec::read_run(input, None::<&mut io::Sink>)? {
            Some(run) => run,
            None => return Ok(()),
        };

        if ledger.contains(run.run_id) {
            continue;
        }
        ledger.seen.insert(run.run_id);
        apply_run(registry, config, &run, recover, only_avg, one_metric);

        if let Some(w) = mirror.as_deref_mut() {
            codec::write_run(w, &run)?;
        }
    }
}

/// Loads every run already present in `config.save_file` into a fresh
/// registry and ledger. A missing save file is not an error: it simply
/// means no runs have been recorded yet (`Input::loadData`'s
/// `save.is_open()` guard).
pub fn load_existing(config: &Configuration) -> Result<(MetricRegistry, Ledger)> {
    let mut registry = MetricRegistry::new();
    let mut ledger = Ledger::new();

    let file = match File::open(&config.save_file) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((registry, ledger)),
        Err(e) => return Err(Error::io(&config.save_file, e)),
    };
    let mut reader = BufReader::new(file);
    ingest_stream(
        &mut reader,
        &mut registry,
        config,
        &mut ledger,
        None::<&mut io::Sink>,
        false,
        false,
        None,
    )?;
    Ok((registry, ledger))
}

/// Repairs a save file containing a corrupt trailing record (spec.md
/// §4.7), grounded on `Input::recoverData`. On success, `save_file` is
/// overwritten with only its known-good prefix and the previous
/// contents are preserved alongside it as `<save_file>.old`.
///
/// Returns `true` if the file needed no repair (every record decoded
/// cleanly), `false` if a repair was performed.
pub fn recover(save_file: &Path, only_avg: bool, one_metric: Option<&str>) -> Result<bool> {
    let mut registry = MetricRegistry::new();
    let config = Configuration::default();
    let mut ledger = Ledger::new();

    let scan_result = {
        let file = File::open(save_file).map_err(|e| Error::io(save_file, e))?;
        let mut reader = BufReader::new(file);
        ingest_stream(
            &mut reader,
            &mut registry,
            &config,
            &mut ledger,
            None::<&mut io::Sink>,
            true,
            only_avg,
            one_metric,
        )
    };

    if scan_result.is_ok() {
        return Ok(true);
    }

    // The file has at least one corrupt record past `ledger.len()`
    // good ones. Preserve the original, then rewrite the save file
    // with only the first N-1 good records (spec.md §4.7: "assume the
    // first N-1 runs are safe" — one record of slack beyond what
    // actually decoded cleanly, matching the original's conservative
    // margin).
    let old_path = backup_path(save_file);
    fs::copy(save_file, &old_path).map_err(|e| Error::io(&old_path, e))?;

    let good_runs = ledger.len();
    let keep = good_runs.saturating_sub(1);

    let old_file = File::open(&old_path).map_err(|e| Error::io(&old_path, e))?;
    let mut old_reader = BufReader::new(old_file);
    let repaired = File::create(save_file).map_err(|e| Error::io(save_file, e))?;
    let mut repaired_writer = BufWriter::new(repaired);

    let mut replay_ledger = Ledger::new();
    for _ in 0..keep {
        let run = match codec::read_run(&mut old_reader, None::<&mut io::Sink>)? {
            Some(run) => run,
            None => break,
        };
        if replay_ledger.contains(run.run_id) {
            continue;
        }
        replay_ledger.seen.insert(run.run_id);
        codec::write_run(&mut repaired_writer, &run)?;
    }
    repaired_writer.flush().map_err(|e| Error::io(save_file, e))?;

    Ok(false)
}

fn backup_path(save_file: &Path) -> std::path::PathBuf {
    let mut name = save_file.as_os_str().to_os_string();
    name.push(".old");
    std::path::PathBuf::from(name)
}

/// Appends a freshly-read run record to the save file, used by the
/// control loop's per-iteration read (`Input::loadData`'s main cycle).
pub fn append_to_save_file(save_file: &Path, run: &RunRecord) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(save_file)
        .map_err(|e| Error::io(save_file, e))?;
    let mut writer = BufWriter::new(file);
    codec::write_run(&mut writer, run)?;
    writer.flush().map_err(|e| Error::io(save_file, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{AvgMetric, AvgSample, RunRecord};
    use std::io::Cursor;

    fn run(id: u32, value: f64) -> RunRecord {
        RunRecord {
            run_id: id,
            avg: vec![AvgMetric { name: "latency".to_string(), samples: vec![AvgSample { idx: 0, value }] }],
            dst: vec![],
        }
    }

    #[test]
    fn duplicate_run_ids_are_ingested_once() {
        let config = Configuration::default();
        let mut registry = MetricRegistry::new();
        let mut ledger = Ledger::new();

        let mut buf = Vec::new();
        codec::write_run(&mut buf, &run(1, 10.0)).unwrap();
        codec::write_run(&mut buf, &run(1, 20.0)).unwrap();
        codec::write_run(&mut buf, &run(2, 30.0)).unwrap();

        let mut cursor = Cursor::new(buf);
        ingest_stream(
            &mut cursor,
            &mut registry,
            &config,
            &mut ledger,
            None::<&mut io::Sink>,
            true,
            false,
            None,
        )
        .unwrap();

        assert_eq!(ledger.len(), 2);
        assert_eq!(registry.averaged("latency").unwrap().get(0).len(), 2);
    }

    #[test]
    fn recover_truncates_to_the_last_good_record() {
        let dir = tempfile::tempdir().unwrap();
        let save_path = dir.path().join("save.dat");

        let mut buf = Vec::new();
        codec::write_run(&mut buf, &run(1, 1.0)).unwrap();
        codec::write_run(&mut buf, &run(2, 2.0)).unwrap();
        codec::write_run(&mut buf, &run(3, 3.0)).unwrap();
        buf.truncate(buf.len() - 3); // corrupt the third record

        fs::write(&save_path, &buf).unwrap();

        let repaired = recover(&save_path, false, None).unwrap();
        assert!(!repaired);
        assert!(backup_path(&save_path).exists());

        let mut cfg = Configuration::default();
        cfg.save_file = save_path.clone();
        let (_registry, ledger) = load_existing(&cfg).unwrap();
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn clean_file_needs_no_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let save_path = dir.path().join("save.dat");
        let mut buf = Vec::new();
        codec::write_run(&mut buf, &run(1, 1.0)).unwrap();
        fs::write(&save_path, &buf).unwrap();

        assert!(recover(&save_path, false, None).unwrap());
    }
}
