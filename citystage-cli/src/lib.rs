//! Command-line interface for exercising the Citystage staging cache.
#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};

mod error;
mod probe;

pub use error::CliError;

const ARG_KIND: &str = "kind";
const ARG_ROWS: &str = "rows";
const ARG_BRANCHES: &str = "branches";
const ARG_USE_DATABASE: &str = "use-database";
const ARG_LOCAL_CACHE_DIR: &str = "local-cache-dir";
const ARG_MAIN_DATABASE: &str = "main-database";
const ARG_EPHEMERAL: &str = "ephemeral";
const ARG_MAIN_DATABASE_VISIBLE: &str = "main-database-visible";
const ARG_UNLOGGED_INDEXES: &str = "unlogged-indexes";
const ARG_BUSY_TIMEOUT_MS: &str = "busy-timeout-ms";
const ENV_MAIN_DATABASE: &str = "CITYSTAGE_MAIN_DATABASE";

/// Run the Citystage CLI with the current process arguments and environment.
///
/// # Errors
/// Returns [`CliError`] when argument parsing, configuration merging,
/// staging or teardown fails.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    match cli.command {
        Command::Probe(args) => probe::run_probe(args),
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "citystage",
    about = "Inspect the staging cache used while importing city models",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Stage synthetic rows, print a summary and tear everything down.
    Probe(probe::ProbeArgs),
}

#[cfg(test)]
mod tests;
