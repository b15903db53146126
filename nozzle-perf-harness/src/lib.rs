//! A harness for measuring the throughput of the Splunk firehose nozzle. It sweeps the nozzle (or, for a
//! baseline, the loggregator traffic controller) across a table of message types and HEC settings, rerunning
//! any run that ends too early, and reports every attempt as JSON.
//!
//! It also provides the pieces used to verify what the nozzle forwarded: a Splunk search client and a JSON
//! subset matcher.

pub mod config;
pub mod errors;
pub mod executor;
pub mod json_assert;
pub mod nozzle_env;
pub mod splunk;
pub mod sweep;
pub mod targets;
mod util;

use crate::config::AppConfig;
use crate::errors::AppError;
use crate::executor::ProcessRunner;
use crate::sweep::SweepResults;
use crate::targets::{RunTarget, SweepTarget};
use clap::Parser;
use eyre::{Result, WrapErr};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, fmt::format::FmtSpan, EnvFilter};

/// The command line arguments.
#[derive(Debug, Parser)]
#[command(name = "nozzle-perf-harness", version, about = "Nozzle perf test driver")]
pub struct Cli {
    /// Which binary to sweep.
    #[arg(long, value_enum)]
    pub run: RunTarget,

    /// How long each run should last, in seconds.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub duration: u64,

    /// The maximum number of attempts per case, overriding `NOZZLE_PERF_MAX_ATTEMPTS`.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: Option<u32>,
}

/// The library crate's primary entry point: runs a full sweep and prints the results.
///
/// Parameters:
/// * `cli`: the parsed command line arguments
///
/// Returns an error if the sweep could not be run, or if any case never produced an acceptable run. In the
/// latter case, the results are still printed first.
pub async fn run_perf_harness(cli: Cli) -> Result<()> {
    // Initialize tracing & logging. Because the "tracing-log" feature from "tracing-subscriber" is active,
    // this will also route all log crate usage (from our dependencies) to tracing, instead.
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_target(false);
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Unable to parse the log filter.")?;
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(tracing_error::ErrorLayer::default())
        .try_init()
        .context("Unable to initialize logging.")?;

    // Load the config, letting the command line override it.
    let mut config = AppConfig::new()?;
    if let Some(max_attempts) = cli.max_attempts {
        config.retry.max_attempts = Some(max_attempts);
    }

    let target = targets::create_sweep_target(cli.run, &config);
    verify_prereqs(target.as_ref())?;

    // The sweep blocks on child processes for its whole run, so keep it off of the async workers.
    let target_duration = Duration::from_secs(cli.duration);
    info!(
        "sweeping '{}' with runs of {:?}...",
        cli.run, target_duration
    );
    let sweep_results = tokio::task::spawn_blocking(move || {
        sweep::run_sweep(&config, target.as_ref(), target_duration, ProcessRunner)
    })
    .await
    .context("The sweep was interrupted.")??;

    // Output results.
    output_results(&sweep_results)?;

    let exhausted = sweep_results.exhausted_count();
    if exhausted > 0 {
        return Err(AppError::SweepIncomplete {
            exhausted,
            total: sweep_results.cases.len(),
        }
        .into());
    }
    Ok(())
}

/// Verifies that the binary to be swept is present. Bare command names are left for the `PATH` lookup to
/// resolve (or fail) when they're run.
fn verify_prereqs(target: &dyn SweepTarget) -> Result<()> {
    let binary = target.binary();
    if binary.components().count() > 1 && !binary.exists() {
        return Err(AppError::MissingPrerequisite(binary.to_path_buf()).into());
    }

    Ok(())
}

/// Output all of the results.
fn output_results(sweep_results: &SweepResults) -> Result<()> {
    let sweep_results_pretty =
        serde_json::to_string_pretty(sweep_results).context("Unable to serialize the results.")?;
    println!("{}", sweep_results_pretty);
    Ok(())
}
