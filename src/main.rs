//! Application entry point.
//!
//! Parses command-line arguments, merges configuration layers and delegates
//! execution to [`runner::run`].

use campus_bdd::{cli, runner};
use std::env;
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::fmt;

fn main() -> ExitCode {
    let (parsed, matches) = match cli::parse_from(env::args_os()) {
        Ok(parsed) => parsed,
        Err(err) => err.exit(),
    };
    let merged = match cli::merge_with_config(&parsed, &matches) {
        Ok(merged) => merged.with_default_command(),
        Err(err) => {
            init_logging(parsed.verbose);
            tracing::error!(error = %err, "configuration merge failed");
            return ExitCode::FAILURE;
        }
    };
    init_logging(merged.verbose);
    match runner::run(&merged) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "runner failed");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let max_level = if verbose { Level::DEBUG } else { Level::ERROR };
    fmt()
        .with_max_level(max_level)
        .with_writer(std::io::stderr)
        .init();
}
