//! The main binary crate for the application, which is just a thin wrapper around the project's library
//! crate.

use clap::Parser;
use eyre::Result;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = nozzle_perf_harness::Cli::parse();
    nozzle_perf_harness::run_perf_harness(cli).await
}
