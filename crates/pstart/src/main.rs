//! pstart CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use color_eyre::eyre::Result;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use pstart::cli::Cli;
use pstart_common::PstartError;

/// Exit code for a run ended by a termination signal.
const EXIT_INTERRUPTED: u8 = 130;

fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    // Usage errors exit 1, not clap's 2
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            err.print()?;
            return Ok(ExitCode::from(code));
        }
    };

    let mut filter = EnvFilter::from_default_env().add_directive(cli.log_directive().parse()?);
    if cli.dump {
        filter = filter.add_directive("pstart::trace=trace".parse()?);
    }
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.execute() {
        Ok(code) => Ok(u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)),
        Err(report) if matches!(report.downcast_ref::<PstartError>(), Some(PstartError::Interrupted)) => {
            eprintln!("pstart: interrupted");
            Ok(ExitCode::from(EXIT_INTERRUPTED))
        }
        Err(report) => Err(report),
    }
}
