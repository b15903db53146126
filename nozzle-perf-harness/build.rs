/// This build script uses [vergen](https://docs.rs/vergen/5.1.5/vergen/index.html) to pass build and
/// host metadata to the compiler's environment variables, for inclusion in sweep reports.
use anyhow::Result;
use vergen::{vergen, Config};

fn main() -> Result<()> {
    // Git metadata is left out, as the harness is often built from source tarballs.
    vergen(Config::default())
}
