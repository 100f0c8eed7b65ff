//! Logging initialization.
//!
//! Human-readable or JSON output on stderr, verbosity from `-v` flags, and
//! an environment override via `SORTIE_LOG_LEVEL` (any `EnvFilter`
//! directive, e.g. `sortie::session=debug`).
//!
//! `-v` raises only sortie's own targets; hyper, axum and reqwest stay at
//! `warn` until `-vvv`. Lines logged inside a session actor carry the
//! `session` span, so JSON output includes its `session_id`.

use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

use crate::cli::args::ColorChoice;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable format with optional ANSI colors.
    #[default]
    Human,
    /// Newline-delimited JSON for machine consumption.
    Json,
}

/// Maps a verbosity level to a tracing directive string.
///
/// - 0 → `"warn"`
/// - 1 → `"info"`
/// - 2 → `"debug"`
/// - 3+ → `"trace"` (saturates)
#[must_use]
pub const fn verbosity_to_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Builds the default filter for `verbosity`: the level applies to sortie's
/// targets, everything else stays at `warn` until trace.
#[must_use]
pub fn default_filter(verbosity: u8) -> String {
    let level = verbosity_to_directive(verbosity);
    match verbosity {
        0 => level.to_string(),
        1 | 2 => format!("warn,{}={level}", env!("CARGO_CRATE_NAME")),
        _ => format!("info,{}={level}", env!("CARGO_CRATE_NAME")),
    }
}

/// Initializes the global tracing subscriber.
///
/// `SORTIE_LOG_LEVEL`, when set, takes precedence over `verbosity`. Uses
/// `try_init()`, so repeated calls are ignored.
pub fn init_logging(format: LogFormat, verbosity: u8, color: ColorChoice) {
    let filter = EnvFilter::try_from_env("SORTIE_LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

    let show_target = verbosity >= 2;

    let use_ansi = match color {
        ColorChoice::Auto => {
            std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
        }
        ColorChoice::Always => true,
        ColorChoice::Never => false,
    };

    match format {
        LogFormat::Human => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(use_ansi)
                .with_target(show_target)
                .with_writer(std::io::stderr)
                .try_init();
        }
        LogFormat::Json => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .with_target(show_target)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_default_is_human() {
        assert_eq!(LogFormat::default(), LogFormat::Human);
    }

    #[test]
    fn init_logging_does_not_panic() {
        init_logging(LogFormat::Human, 0, ColorChoice::Auto);
        init_logging(LogFormat::Json, 3, ColorChoice::Never);
    }

    #[test]
    fn verbosity_maps_to_directives() {
        let directives: Vec<_> = [0, 1, 2, 3, 255]
            .into_iter()
            .map(verbosity_to_directive)
            .collect();
        assert_eq!(directives, ["warn", "info", "debug", "trace", "trace"]);
    }

    #[test]
    fn verbosity_is_scoped_to_sortie() {
        assert_eq!(default_filter(0), "warn");
        assert_eq!(default_filter(1), "warn,sortie=info");
        assert_eq!(default_filter(2), "warn,sortie=debug");
        assert_eq!(default_filter(4), "info,sortie=trace");
        for v in 0..4 {
            assert!(EnvFilter::try_new(default_filter(v)).is_ok());
        }
    }
}
