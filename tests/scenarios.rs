//! End-to-end scenarios from spec.md §8, driven through the public crate
//! API rather than real named pipes: each "run" is appended to the save
//! file the way `ControlLoop::accept_one_run` would, then a fresh
//! `ControlLoop` is built to re-evaluate the stop condition, mirroring
//! what `load_data` does at the top of every experiment.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use repcontrol::codec::{AvgMetric, AvgSample, RunRecord};
use repcontrol::config::grammar;
use repcontrol::config::Configuration;
use repcontrol::control::ControlLoop;
use repcontrol::ingest;

fn config_in(dir: &std::path::Path, text: &str) -> Configuration {
    let mut config = grammar::parse_str(text).unwrap();
    config.save_file = dir.join("save.dat");
    config
}

fn one_sample_run(run_id: u32, metric: &str, value: f64) -> RunRecord {
    RunRecord {
        run_id,
        avg: vec![AvgMetric {
            name: metric.to_string(),
            samples: vec![AvgSample { idx: 0, value }],
        }],
        dst: vec![],
    }
}

/// S1: convergence. A metric hovering tightly around 10.0 should satisfy
/// a 5% relative half-width long before `maxruns` is reached.
#[test]
fn s1_convergence_before_the_max_bound() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir.path(), "minruns 2\nmaxruns 100\ns m 0 check 0.95 0.05\n");

    let normal = Normal::new(10.0, 0.1).unwrap();
    let mut rng = StdRng::seed_from_u64(42);

    let mut converged_at = None;
    for run_id in 1..=100u32 {
        let value = normal.sample(&mut rng);
        ingest::append_to_save_file(&config.save_file, &one_sample_run(run_id, "m", value)).unwrap();

        let mut loop_ = ControlLoop::new(config.clone()).unwrap();
        if loop_.stop_condition() {
            converged_at = Some(run_id);
            break;
        }
    }

    let n = converged_at.expect("should have converged well before maxruns");
    assert!(n < 50, "expected quick convergence given the tight threshold, got n={n}");

    let loop_ = ControlLoop::new(config.clone()).unwrap();
    let population = loop_.registry().averaged("m").unwrap().get(0);
    let mean = population.mean().unwrap();
    let ci = population.confidence_interval(0.95).unwrap();
    assert!((2.0 * ci) / mean <= 0.05);
}

/// S2: cap. Constant samples give zero variance, so a two-run population
/// already satisfies any threshold the moment `minruns` is reached.
#[test]
fn s2_zero_variance_stops_at_minruns() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir.path(), "minruns 2\nmaxruns 100\ns m 0 check 0.95 0.0001\n");

    ingest::append_to_save_file(&config.save_file, &one_sample_run(1, "m", 10.0)).unwrap();
    let mut loop_ = ControlLoop::new(config.clone()).unwrap();
    assert!(!loop_.stop_condition(), "one run is below the minruns floor");

    ingest::append_to_save_file(&config.save_file, &one_sample_run(2, "m", 10.0)).unwrap();
    let mut loop_ = ControlLoop::new(config.clone()).unwrap();
    assert!(loop_.stop_condition());

    let population = loop_.registry().averaged("m").unwrap().get(0);
    assert_eq!(population.confidence_interval(0.95), Ok(0.0));
}

/// S3: max bound. An unachievable threshold still forces a stop exactly
/// at `maxruns`.
#[test]
fn s3_max_bound_forces_a_stop() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir.path(), "minruns 1\nmaxruns 5\ns m 0 check 0.95 0.0000000001\n");

    let normal = Normal::new(10.0, 5.0).unwrap();
    let mut rng = StdRng::seed_from_u64(7);

    for run_id in 1..=4u32 {
        let value = normal.sample(&mut rng);
        ingest::append_to_save_file(&config.save_file, &one_sample_run(run_id, "m", value)).unwrap();
        let mut loop_ = ControlLoop::new(config.clone()).unwrap();
        assert!(!loop_.stop_condition(), "threshold is unachievable below maxruns");
    }

    let value = normal.sample(&mut rng);
    ingest::append_to_save_file(&config.save_file, &one_sample_run(5, "m", value)).unwrap();
    let mut loop_ = ControlLoop::new(config.clone()).unwrap();
    assert!(loop_.stop_condition(), "maxruns=5 must force a stop regardless of confidence");
}

/// S4: recovery. Three well-formed runs followed by a truncated fourth
/// recover to the first two (N-1, per DESIGN.md Open Question 3).
#[test]
fn s4_recovery_truncates_to_n_minus_one() {
    use repcontrol::codec;

    let dir = tempfile::tempdir().unwrap();
    let save_path = dir.path().join("save.dat");

    let mut buf = Vec::new();
    codec::write_run(&mut buf, &one_sample_run(1, "m", 1.0)).unwrap();
    codec::write_run(&mut buf, &one_sample_run(2, "m", 2.0)).unwrap();
    codec::write_run(&mut buf, &one_sample_run(3, "m", 3.0)).unwrap();
    let good_len = buf.len();
    codec::write_run(&mut buf, &one_sample_run(4, "m", 4.0)).unwrap();
    buf.truncate(buf.len() - 3);
    std::fs::write(&save_path, &buf).unwrap();

    let recovered_cleanly = ingest::recover(&save_path, false, None).unwrap();
    assert!(!recovered_cleanly);

    let old_path = {
        let mut name = save_path.as_os_str().to_os_string();
        name.push(".old");
        std::path::PathBuf::from(name)
    };
    assert_eq!(std::fs::read(&old_path).unwrap(), buf);

    let mut cfg = Configuration::default();
    cfg.save_file = save_path.clone();
    let (_registry, ledger) = ingest::load_existing(&cfg).unwrap();
    assert_eq!(ledger.len(), 2);
    assert!(std::fs::metadata(&save_path).unwrap().len() <= good_len as u64);
}

/// S5: deduplication. Loading the same save file twice yields the same
/// registry state as loading it once.
#[test]
fn s5_reingesting_a_save_file_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Configuration::default();
    config.save_file = dir.path().join("save.dat");

    ingest::append_to_save_file(&config.save_file, &one_sample_run(1, "m", 10.0)).unwrap();
    ingest::append_to_save_file(&config.save_file, &one_sample_run(2, "m", 11.0)).unwrap();

    let (registry_once, ledger_once) = ingest::load_existing(&config).unwrap();
    let (registry_twice, ledger_twice) = ingest::load_existing(&config).unwrap();

    assert_eq!(ledger_once.len(), ledger_twice.len());
    assert_eq!(
        registry_once.averaged("m").unwrap().get(0).len(),
        registry_twice.averaged("m").unwrap().get(0).len(),
    );
}

/// S6: distribution derived statistics, worked example from spec.md §8.
#[test]
fn s6_distribution_derived_worked_example() {
    use repcontrol::registry::MetricRegistry;

    let mut registry = MetricRegistry::new();
    registry.set_bin_size("latency", 1.0);
    registry.set_dist_lower("latency", 0.0);
    for (bin, &x) in [0.1, 0.4, 0.4, 0.1].iter().enumerate() {
        registry.add_distribution_sample("latency", x, 0, bin);
    }

    let measure = registry.distribution_mut("latency").unwrap();
    assert_eq!(measure.mean_population(0).unwrap().get(0), Some(2.5));
    assert_eq!(measure.median_population(0).unwrap().get(0), Some(3.0));
    assert_eq!(measure.q95_population(0).unwrap().get(0), Some(4.0));
    assert_eq!(measure.q99_population(0).unwrap().get(0), Some(4.0));
}
