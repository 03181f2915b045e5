use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use repcontrol::cli::Cli;
use repcontrol::config::grammar;
use repcontrol::control::{self, ControlLoop};
use repcontrol::error::Error;

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    let config = grammar::parse(&cli.config)?;

    if cli.recover {
        let clean = repcontrol::ingest::recover(
            &config.save_file,
            cli.recover_avg_only,
            cli.metric.as_deref(),
        )?;
        if clean {
            log::info!("save file needed no repair");
        } else {
            log::warn!("save file was damaged; repaired in place, original kept as *.old");
        }
        return Ok(());
    }

    if cli.check {
        let satisfied = control::check_only(config)?;
        log::info!("stop condition satisfied: {satisfied}");
        return Ok(());
    }

    if cli.dump {
        let mut loop_ = ControlLoop::new(config)?;
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        loop_
            .registry_mut()
            .dump_debug(&mut handle, cli.cl, cli.dump_distributions)
            .map_err(Error::from)?;
        return Ok(());
    }

    let file_in = cli.file_in.unwrap_or_else(|| PathBuf::from("repctl.in"));
    let file_out = cli.file_out.unwrap_or_else(|| PathBuf::from("repctl.out"));

    let mut loop_ = ControlLoop::new(config)?;
    loop_.run(&file_in, &file_out)
}
