//! The replication control loop (spec.md C9), grounded on `Input::
//! loadData` / `Input::check` / `Input::checkConfidence` /
//! `Input::checkSavedData` in `original_source/src/input.cc`.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use crate::codec;
use crate::config::{Configuration, Submetric};
use crate::error::{Error, Result};
use crate::ingest::{self, Ledger};
use crate::registry::MetricRegistry;

const STOP: u32 = 0;
const GO: u32 = 1;

/// Drives one simulator experiment to completion: loads whatever the
/// save file already holds, then alternates between accepting one run
/// and deciding whether to ask for another.
pub struct ControlLoop {
    config: Configuration,
    registry: MetricRegistry,
    ledger: Ledger,
}

impl ControlLoop {
    /// Loads `config.save_file` (if it exists) and prepares to drive a
    /// simulator session.
    pub fn new(config: Configuration) -> Result<ControlLoop> {
        let (registry, ledger) = ingest::load_existing(&config)?;
        Ok(ControlLoop { config, registry, ledger })
    }

    /// Runs the full protocol of spec.md §4.8 against `file_in`/
    /// `file_out`. Returns once a STOP token has been written, or
    /// propagates the first fatal error (logged with `log_fatal`
    /// before being returned, so the caller does not write a STOP
    /// token on this path and the simulator observes closure instead).
    pub fn run(&mut self, file_in: &Path, file_out: &Path) -> Result<()> {
        let mut out = File::create(file_out).map_err(|e| Error::io(file_out, e))?;
        self.announce_saved_runs(&mut out)?;

        if self.stop_condition() {
            log::info!("stop condition already satisfied by saved data, {} runs", self.ledger.len());
            write_token(&mut out, STOP)?;
            return Ok(());
        }

        write_token(&mut out, GO)?;
        out.flush().map_err(|e| Error::io(file_out, e))?;

        loop {
            let mut input = match File::open(file_in) {
                Ok(f) => f,
                Err(e) => return Err(crate::error::log_fatal("control loop", Error::io(file_in, e))),
            };

            let accepted = self.accept_one_run(&mut input).map_err(|e| {
                crate::error::log_fatal("control loop", e)
            })?;
            drop(input);

            if !accepted {
                // Clean EOF before a run id: retry without consuming
                // the GO token we already sent.
                continue;
            }

            if self.stop_condition() {
                log::info!("stop condition satisfied at {} runs", self.ledger.len());
                write_token(&mut out, STOP)?;
                break;
            }
            write_token(&mut out, GO)?;
            out.flush().map_err(|e| Error::io(file_out, e))?;
        }

        Ok(())
    }

    fn announce_saved_runs(&self, out: &mut File) -> Result<()> {
        let ids: Vec<u32> = self.ledger.run_ids().copied().collect();
        write_token(out, ids.len() as u32)?;
        for id in ids {
            write_token(out, id)?;
        }
        Ok(())
    }

    /// Reads exactly one run record from `input` (§4.8 step 5a),
    /// appending it to the save file and folding it into the registry
    /// if it is new. Returns `false` on a clean EOF before any run id
    /// was read, matching `read_run`'s contract.
    fn accept_one_run(&mut self, input: &mut File) -> Result<bool> {
        let run = match codec::read_run(input, None::<&mut io::Sink>)? {
            Some(run) => run,
            None => return Ok(false),
        };

        if self.ledger.contains(run.run_id) {
            log::warn!("duplicate run id {} ignored", run.run_id);
            return Ok(true);
        }

        ingest::append_to_save_file(&self.config.save_file, &run)?;
        self.ledger.insert(run.run_id);
        self.fold_run(&run);
        Ok(true)
    }

    fn fold_run(&mut self, run: &codec::RunRecord) {
        for metric in &run.avg {
            for sample in &metric.samples {
                if self.config.desc_avg(&metric.name, sample.idx).is_some_and(|d| d.is_relevant()) {
                    self.registry.add_averaged_sample(&metric.name, sample.value, sample.idx);
                }
            }
        }
        for metric in &run.dst {
            self.registry.set_bin_size(&metric.name, metric.bin_size);
            self.registry.set_dist_lower(&metric.name, metric.dist_lower);
            for (idx, bins) in &metric.indices {
                if !self.config.desc_dst(&metric.name, *idx).is_some_and(|d| d.is_relevant()) {
                    continue;
                }
                for (bin, &x) in bins.iter().enumerate() {
                    self.registry.add_distribution_sample(&metric.name, x, *idx, bin);
                }
            }
        }
    }

    /// `n_runs >= max_runs` OR (`n_runs >= max(min_runs, 2)` AND the
    /// relative-confidence predicate holds), per spec.md §4.8/§4.9. A
    /// `max_runs == 0` is treated as "no upper bound".
    pub fn stop_condition(&mut self) -> bool {
        let n = self.ledger.len() as u32;
        if self.config.max_runs != 0 && n >= self.config.max_runs {
            return true;
        }
        let min_floor = self.config.min_runs.max(2);
        n >= min_floor && self.check_confidence()
    }

    /// Walks every `check==true` descriptor, averaged and distribution
    /// alike, short-circuiting `false` on the first violation.
    fn check_confidence(&mut self) -> bool {
        let checked_avg = self.config.checked_averaged_names();
        for name in &checked_avg {
            let Some(measure) = self.registry.averaged(name) else { continue };
            for (idx, population) in measure.iter() {
                let Some(desc) = self.config.desc_avg(name, idx) else { continue };
                if !desc.check {
                    continue;
                }
                // An uncomputable CI on an averaged check blocks stop:
                // spec.md §7 treats it as "retain, not yet converged",
                // unlike the distribution case below.
                match relative_bound_holds(population, desc.cl, desc.threshold) {
                    Ok(true) => {}
                    Ok(false) | Err(_) => return false,
                }
            }
        }

        let dst_names: Vec<String> =
            self.config.distribution_metric_names().map(String::from).collect();
        for name in dst_names {
            let descriptors: Vec<(u32, crate::config::DistributionDescriptor)> =
                self.config.dst_descriptors(&name).collect();
            for (idx, desc) in descriptors {
                if !self.check_distribution_index(&name, idx, &desc) {
                    return false;
                }
            }
        }

        true
    }

    fn check_distribution_index(
        &mut self,
        name: &str,
        idx: u32,
        desc: &crate::config::DistributionDescriptor,
    ) -> bool {
        let Some(measure) = self.registry.distribution_mut(name) else { return true };

        for &sub in &[Submetric::Pmf, Submetric::Cdf] {
            let d = desc.get(sub);
            if !d.check {
                continue;
            }
            for bin in 0..measure.bin_count(idx) {
                let pop = if sub == Submetric::Pmf { measure.pmf(idx, bin) } else { measure.cdf(idx, bin) };
                if let Some(pop) = pop {
                    // An uncomputable CI here skips this sub-metric for
                    // this pass rather than blocking stop (spec.md §7),
                    // the opposite of the averaged case above.
                    match relative_bound_holds(pop, d.cl, d.threshold) {
                        Ok(true) | Err(_) => {}
                        Ok(false) => return false,
                    }
                }
            }
        }

        for &sub in &[Submetric::Mean, Submetric::Median, Submetric::Q95, Submetric::Q99] {
            let d = desc.get(sub);
            if !d.check {
                continue;
            }
            let result = match sub {
                Submetric::Mean => measure.mean_population(idx),
                Submetric::Median => measure.median_population(idx),
                Submetric::Q95 => measure.q95_population(idx),
                Submetric::Q99 => measure.q99_population(idx),
                _ => unreachable!(),
            };
            match result {
                Ok(pop) => match relative_bound_holds(pop, d.cl, d.threshold) {
                    Ok(true) | Err(_) => {}
                    Ok(false) => return false,
                },
                Err(_) => continue,
            }
        }

        true
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut MetricRegistry {
        &mut self.registry
    }
}

/// `2 * CI(cl) / mean <= threshold`, treating a non-positive mean as
/// "acceptable" (spec.md §4.5/§9 OQ1). `Err` means the CI itself could
/// not be computed; the two call sites disagree on what that means
/// (spec.md §7), so this returns the raw `Result` instead of collapsing
/// it to a single `bool` — see `check_confidence` vs.
/// `check_distribution_index`.
fn relative_bound_holds(
    population: &crate::stats::Population,
    cl: f64,
    threshold: f64,
) -> std::result::Result<bool, crate::stats::ConfidenceError> {
    let Some(mean) = population.mean() else { return Ok(false) };
    if mean <= 0.0 {
        return Ok(true);
    }
    let ci = population.confidence_interval(cl)?;
    Ok((2.0 * ci) / mean <= threshold)
}

fn write_token<W: Write>(w: &mut W, token: u32) -> Result<()> {
    w.write_all(&token.to_le_bytes())?;
    Ok(())
}

/// Offline equivalent of `load_data`: loads the save file and reports
/// whether its contents already satisfy the stop condition, without
/// driving a simulator (spec_full.md §3.3, grounded on `Input::
/// checkSavedData`).
pub fn check_only(config: Configuration) -> Result<bool> {
    let mut loop_ = ControlLoop::new(config)?;
    if loop_.ledger.len() <= 1 {
        return Ok(false);
    }
    Ok(loop_.stop_condition())
}
