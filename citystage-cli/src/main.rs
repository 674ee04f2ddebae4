//! Entry point for the `citystage` binary.
#![forbid(unsafe_code)]

use std::process::ExitCode;

use citystage_cli::CliError;

#[expect(
    clippy::print_stderr,
    reason = "the binary reports fatal errors on stderr"
)]
fn main() -> ExitCode {
    match citystage_cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::ArgumentParsing(err)) => err.exit(),
        Err(err) => {
            eprintln!("citystage: {err}");
            ExitCode::FAILURE
        }
    }
}
