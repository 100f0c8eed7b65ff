//! CLI argument definitions.
//!
//! All Clap derive structs for `sortie` command-line parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::observability::LogFormat;

// ============================================================================
// Root CLI
// ============================================================================

/// Live multi-party exercise runtime.
#[derive(Parser, Debug)]
#[command(name = "sortie", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "SORTIE_COLOR")]
    pub color: ColorChoice,

    /// Log line format.
    #[arg(long, default_value = "human", global = true, env = "SORTIE_LOG_FORMAT")]
    pub log_format: LogFormat,
}

// ============================================================================
// Top-Level Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the exercise server or check its configuration.
    Server(ServerCommand),

    /// Check or describe mission files.
    Mission(MissionCommand),

    /// Display version information.
    Version(VersionArgs),
}

// ============================================================================
// Server Command
// ============================================================================

/// Server management commands.
#[derive(Args, Debug)]
pub struct ServerCommand {
    #[command(subcommand)]
    pub subcommand: ServerSubcommand,
}

/// Server subcommands.
#[derive(Subcommand, Debug)]
pub enum ServerSubcommand {
    /// Start the exercise server.
    Run(ServerRunArgs),

    /// Validate configuration files without starting the server.
    Validate(ServerValidateArgs),
}

/// Arguments for `server run`.
#[derive(Args, Debug)]
pub struct ServerRunArgs {
    /// Path to `sortie.yaml`. Defaults apply when omitted.
    #[arg(short, long, env = "SORTIE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bind address `[host]:port`, overriding the config file.
    #[arg(long, env = "SORTIE_BIND")]
    pub bind: Option<String>,

    /// Mission directory, overriding the config file.
    #[arg(long, env = "SORTIE_MISSIONS")]
    pub missions: Option<PathBuf>,

    /// Serve Prometheus metrics on this port.
    #[arg(long, env = "SORTIE_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Write structured events as JSONL to this file instead of stderr.
    #[arg(long, env = "SORTIE_EVENTS_FILE")]
    pub events_file: Option<PathBuf>,
}

/// Arguments for `server validate`.
#[derive(Args, Debug)]
pub struct ServerValidateArgs {
    /// Configuration files to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,

    /// Enable strict validation (warnings become errors).
    #[arg(long)]
    pub strict: bool,
}

// ============================================================================
// Mission Command
// ============================================================================

/// Mission file commands.
#[derive(Args, Debug)]
pub struct MissionCommand {
    #[command(subcommand)]
    pub subcommand: MissionSubcommand,
}

/// Mission subcommands.
#[derive(Subcommand, Debug)]
pub enum MissionSubcommand {
    /// Validate mission save files.
    Validate(MissionValidateArgs),

    /// Describe one mission: forces, nodes and actions.
    Inspect(MissionInspectArgs),
}

/// Arguments for `mission validate`.
#[derive(Args, Debug)]
pub struct MissionValidateArgs {
    /// Mission files to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,

    /// Enable strict validation (warnings become errors).
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for `mission inspect`.
#[derive(Args, Debug)]
pub struct MissionInspectArgs {
    /// Mission file to describe.
    pub file: PathBuf,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// Version
// ============================================================================

/// Arguments for version display.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Output format for structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}

// ============================================================================
// Tests
// ============================================================================
