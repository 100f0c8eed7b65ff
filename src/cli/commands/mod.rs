//! CLI command dispatch and handlers.
//!
//! Routes parsed CLI arguments to the appropriate command handler.

pub mod mission;
pub mod server;
pub mod version;

use tokio_util::sync::CancellationToken;

use std::path::Path;

use crate::cli::args::{Cli, Commands, MissionSubcommand, OutputFormat, ServerSubcommand};
use crate::error::SortieError;

/// Dispatch a parsed CLI invocation to the appropriate command handler.
///
/// # Errors
///
/// Returns an error if the dispatched command handler fails.
pub async fn dispatch(cli: Cli, cancel: CancellationToken) -> Result<(), SortieError> {
    match cli.command {
        Commands::Server(cmd) => match cmd.subcommand {
            ServerSubcommand::Run(args) => server::run(&args, cancel).await,
            ServerSubcommand::Validate(args) => server::validate(&args),
        },
        Commands::Mission(cmd) => match cmd.subcommand {
            MissionSubcommand::Validate(args) => mission::validate(&args),
            MissionSubcommand::Inspect(args) => mission::inspect(&args),
        },
        Commands::Version(args) => {
            version::run(&args);
            Ok(())
        }
    }
}

// ============================================================================
// Validation Reports
// ============================================================================

/// Outcome of validating one file, for `server validate` and
/// `mission validate`.
#[derive(Debug, serde::Serialize)]
pub(crate) struct FileReport {
    pub file: String,
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl FileReport {
    pub(crate) fn new(file: &Path, errors: Vec<String>, warnings: Vec<String>, strict: bool) -> Self {
        let valid = errors.is_empty() && !(strict && !warnings.is_empty());
        Self {
            file: file.display().to_string(),
            valid,
            errors,
            warnings,
        }
    }
}

/// Prints `reports` and returns how many failed.
pub(crate) fn print_reports(reports: &[FileReport], format: OutputFormat) -> usize {
    match format {
        OutputFormat::Human => {
            for report in reports {
                let status = if report.valid { "ok" } else { "FAILED" };
                println!("{}: {status}", report.file);
                for error in &report.errors {
                    println!("  {error}");
                }
                for warning in &report.warnings {
                    println!("  {warning}");
                }
            }
        }
        OutputFormat::Json => {
            match serde_json::to_string_pretty(reports) {
                Ok(json) => println!("{json}"),
                Err(e) => tracing::error!(error = %e, "failed to render report"),
            }
        }
    }
    reports.iter().filter(|r| !r.valid).count()
}
