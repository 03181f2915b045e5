//! Command-line surface (spec.md §6, "CLI details not part of core"),
//! filled in per SPEC_FULL.md §2.3: a `clap` derive struct in the style
//! of the other pack examples, since the teacher's own CLI used an
//! older builder API with no analogue here.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "repctl", about = "Confidence-driven replication controller")]
pub struct Cli {
    /// Path to the textual configuration file.
    pub config: PathBuf,

    /// Confidence level used for the debug text dump (`--dump`).
    #[arg(short = 'c', long = "cl", default_value_t = 0.95)]
    pub cl: f64,

    /// Restrict the debug dump to a single metric name.
    #[arg(short = 'o', long = "metric")]
    pub metric: Option<String>,

    /// Named pipe or file the simulator writes runs to.
    #[arg(long = "in")]
    pub file_in: Option<PathBuf>,

    /// Named pipe or file the simulator reads GO/STOP tokens from.
    #[arg(long = "out")]
    pub file_out: Option<PathBuf>,

    /// Attempt to repair a damaged save file instead of running.
    #[arg(long)]
    pub recover: bool,

    /// Only load averaged metrics during `--recover`.
    #[arg(long, requires = "recover")]
    pub recover_avg_only: bool,

    /// Check whether the saved data already satisfies the stop
    /// condition, without driving a simulator.
    #[arg(long, conflicts_with_all = ["recover", "file_in", "file_out"])]
    pub check: bool,

    /// Dump every population to stdout instead of running the control
    /// loop.
    #[arg(long, conflicts_with_all = ["recover", "check"])]
    pub dump: bool,

    /// Include distribution measures in `--dump`.
    #[arg(long, requires = "dump")]
    pub dump_distributions: bool,
}
