//! Error types emitted by the Citystage CLI.
//!
//! Staging errors are boxed so the type stays small; the workspace enables
//! `clippy::result_large_err`.

use std::sync::Arc;

use citystage_core::StageError;
use thiserror::Error;

/// Errors emitted by the Citystage CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        /// Name of the CLI flag.
        field: &'static str,
        /// Environment variable that can supply the value.
        env: &'static str,
    },
    /// Opening the registry or staging rows failed.
    #[error("staging failed: {0}")]
    Stage(#[source] Box<StageError>),
    /// Tearing the registry down reported failures.
    #[error("teardown reported {failures} failure(s), first: {source}")]
    Teardown {
        /// Number of members that failed to release.
        failures: usize,
        /// First recorded failure.
        #[source]
        source: Box<StageError>,
    },
    /// Serialising the probe report failed.
    #[error("failed to serialise probe report: {0}")]
    SerialiseReport(#[source] serde_json::Error),
    /// Writing the probe report failed.
    #[error("failed to write probe report: {0}")]
    WriteOutput(#[source] std::io::Error),
}

impl From<StageError> for CliError {
    fn from(source: StageError) -> Self {
        Self::Stage(Box::new(source))
    }
}
