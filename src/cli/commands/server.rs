//! Server command handlers.
//!
//! Implements `server run` and `server validate`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{FileReport, print_reports};
use crate::cli::args::{ServerRunArgs, ServerValidateArgs};
use crate::config::{ConfigLoader, SortieConfig};
use crate::error::{ConfigError, SortieError};
use crate::mission::MissionLibrary;
use crate::observability::events::EventEmitter;
use crate::server::{AppState, Server};

/// Start the exercise server.
///
/// # Errors
///
/// Returns a config error if the configuration fails to load, or a
/// transport error if the listener cannot bind or fails while serving.
pub async fn run(args: &ServerRunArgs, cancel: CancellationToken) -> Result<(), SortieError> {
    let mut config = match &args.config {
        Some(path) => {
            tracing::info!(config = %path.display(), "loading configuration");
            let load_result = ConfigLoader::default().load(path)?;
            for warning in &load_result.warnings {
                tracing::warn!(
                    location = warning.location.as_deref().unwrap_or("<unknown>"),
                    "{}",
                    warning.message
                );
            }
            Arc::unwrap_or_clone(load_result.config)
        }
        None => SortieConfig::default(),
    };

    if let Some(bind) = &args.bind {
        config.server.bind.clone_from(bind);
    }
    if let Some(dir) = &args.missions {
        config.missions.directory.clone_from(dir);
    }

    if let Some(port) = args.metrics_port {
        crate::observability::init_metrics(Some(port))?;
        tracing::info!(port, "Prometheus metrics endpoint started");
    }

    let library = match MissionLibrary::load_dir(&config.missions.directory) {
        Ok((library, _failures)) => library,
        Err(e) => {
            tracing::warn!(
                dir = %config.missions.directory.display(),
                error = %e,
                "mission directory unreadable, starting with no missions"
            );
            MissionLibrary::new()
        }
    };

    let events = Arc::new(match &args.events_file {
        Some(path) => EventEmitter::from_file(path)?,
        None => EventEmitter::stderr(),
    });

    let state = AppState::new(&config, library, Arc::clone(&events))?;
    let server = Server::bind(state, &config.server.bind, events, cancel).await?;
    server.run().await
}

/// Validate configuration files without starting the server.
///
/// # Errors
///
/// Returns a config error if any file fails validation.
pub fn validate(args: &ServerValidateArgs) -> Result<(), SortieError> {
    let loader = ConfigLoader::default();
    let reports: Vec<FileReport> = args
        .files
        .iter()
        .map(|path| {
            tracing::info!(file = %path.display(), "validating configuration");
            let (errors, warnings) = match loader.load(path) {
                Ok(result) => (
                    Vec::new(),
                    result.warnings.iter().map(ToString::to_string).collect(),
                ),
                Err(ConfigError::ValidationError { errors, .. }) => {
                    (errors.iter().map(ToString::to_string).collect(), Vec::new())
                }
                Err(e) => (vec![e.to_string()], Vec::new()),
            };
            FileReport::new(path, errors, warnings, args.strict)
        })
        .collect();

    let failed = print_reports(&reports, args.format);
    if failed > 0 {
        return Err(ConfigError::InvalidValue {
            field: "files".to_string(),
            value: format!("{failed} of {} invalid", reports.len()),
            expected: "valid configuration files".to_string(),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::cli::args::OutputFormat;

    fn validate_args(files: Vec<PathBuf>, strict: bool) -> ServerValidateArgs {
        ServerValidateArgs {
            files,
            format: OutputFormat::Json,
            strict,
        }
    }

    #[test]
    fn validate_accepts_good_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sortie.yaml");
        std::fs::write(
            &path,
            format!("missions:\n  directory: '{}'\n", dir.path().display()),
        )
        .unwrap();
        validate(&validate_args(vec![path], true)).unwrap();
    }

    #[test]
    fn validate_rejects_bad_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sortie.yaml");
        std::fs::write(&path, "rate_limit:\n  max_messages_per_second: 0\n").unwrap();
        let err = validate(&validate_args(vec![path], false)).unwrap_err();
        assert!(matches!(err, SortieError::Config(_)));
    }

    #[test]
    fn strict_turns_warnings_into_failures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sortie.yaml");
        // Missing mission directory is only a warning.
        std::fs::write(&path, "missions:\n  directory: /definitely/not/here\n").unwrap();
        validate(&validate_args(vec![path.clone()], false)).unwrap();
        assert!(validate(&validate_args(vec![path], true)).is_err());
    }
}
