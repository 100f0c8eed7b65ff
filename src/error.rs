//! Error types for `sortie`.
//!
//! Each layer owns a `thiserror` enum. [`SortieError`] aggregates them for the
//! binary and maps every variant to a process exit code, while
//! [`RequestError`] is the rejection type surfaced to a single requester over
//! the client error channel.

use std::path::PathBuf;
use thiserror::Error;

use crate::session::SessionState;
use crate::session::member::Permission;
use crate::transport::protocol::ErrorCode;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `sortie` CLI operations.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure, bad mission file)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Transport error (bind failed, protocol error)
    pub const TRANSPORT_ERROR: i32 = 4;

    /// Session runtime error
    pub const SESSION_ERROR: i32 = 5;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `sortie` operations.
#[derive(Debug, Error)]
pub enum SortieError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Mission document error
    #[error(transparent)]
    Mission(#[from] MissionError),

    /// Transport layer error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Session runtime error
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Effect environment error
    #[error(transparent)]
    Effect(#[from] EffectError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SortieError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Mission(_) | Self::Json(_) | Self::Yaml(_) => {
                ExitCode::CONFIG_ERROR
            }
            Self::Transport(_) => ExitCode::TRANSPORT_ERROR,
            Self::Request(_) => ExitCode::SESSION_ERROR,
            Self::Effect(_) => ExitCode::ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Configuration validation failed
    #[error("validation failed for {path}")]
    ValidationError {
        /// Path to the configuration file
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Referenced configuration file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },

    /// Environment variable referenced in configuration is not set
    #[error("environment variable '{var}' not set (referenced at {location})")]
    EnvVarNotSet {
        /// Name of the environment variable
        var: String,
        /// Location in the configuration where it was referenced
        location: String,
    },
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found while validating a config or mission.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g., "forces[0].nodes[3].prototypeId")
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Validation failure that prevents the document from being used
    Error,
    /// Potential issue that does not prevent loading
    Warning,
}

// ============================================================================
// Mission Errors
// ============================================================================

/// Errors raised while importing or validating a mission document.
#[derive(Debug, Error)]
pub enum MissionError {
    /// Mission JSON could not be parsed
    #[error("invalid mission document: {0}")]
    Parse(#[from] serde_json::Error),

    /// Mission failed structural validation
    #[error("mission '{mission}' failed validation with {} issue(s)", errors.len())]
    Invalid {
        /// Mission name
        mission: String,
        /// Every issue found
        errors: Vec<ValidationIssue>,
    },

    /// Mission lookup by id failed
    #[error("mission not found: {0}")]
    NotFound(String),
}

// ============================================================================
// Execution Errors
// ============================================================================

/// Rejections raised by the execution engine on a single node.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    /// Node has no executable actions
    #[error("node '{0}' is not executable")]
    NotExecutable(String),

    /// Node's parent is not open yet
    #[error("node '{0}' is not revealed")]
    NotRevealed(String),

    /// Node is blocked
    #[error("node '{0}' is blocked")]
    Blocked(String),

    /// Node already has an execution in flight
    #[error("node '{0}' is already executing")]
    AlreadyExecuting(String),

    /// Action id does not belong to the node
    #[error("action not found: {0}")]
    ActionNotFound(String),

    /// Force pool cannot cover the action's cost
    #[error("insufficient resources: action costs {required}, force has {available}")]
    InsufficientResources {
        /// Cost of the action
        required: u64,
        /// Resources left in the force pool
        available: u64,
    },

    /// More executions attempted than outcomes were generated
    #[error("outcomes exhausted for action '{0}'")]
    OutcomesExhausted(String),
}

// ============================================================================
// Effect Errors
// ============================================================================

/// Errors raised while resolving or running an effect.
///
/// These never reach clients: the effect engine logs them with the
/// effect's full address and moves on to the next effect.
#[derive(Debug, Error)]
pub enum EffectError {
    /// Target environment is not registered
    #[error("target environment not found: {0}")]
    EnvironmentNotFound(String),

    /// Target is not part of its environment
    #[error("target '{target}' not found in environment '{environment}'")]
    TargetNotFound {
        /// Environment id
        environment: String,
        /// Target id
        target: String,
    },

    /// Required argument is missing
    #[error("missing required argument '{0}'")]
    MissingArgument(String),

    /// Argument has the wrong type
    #[error("argument '{key}' must be {expected}")]
    InvalidArgument {
        /// Argument key
        key: String,
        /// Expected kind
        expected: &'static str,
    },

    /// A named force, node, action, or file could not be resolved
    #[error("could not resolve {kind} '{key}'")]
    Unresolved {
        /// Entity kind (force, node, action, file)
        kind: &'static str,
        /// Key or id that failed to resolve
        key: String,
    },

    /// Script reported a failure
    #[error("script failed: {0}")]
    Script(String),

    /// Environment setup or teardown failed
    #[error("environment '{environment}' failed: {message}")]
    Environment {
        /// Environment id
        environment: String,
        /// Failure description
        message: String,
    },
}

// ============================================================================
// Request Errors
// ============================================================================

/// Rejection of a single client request.
///
/// Always surfaced to the requester only, through the error channel, using
/// the stable [`ErrorCode`] returned by [`RequestError::code`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    /// Requester's role lacks the permission
    #[error("missing permission '{0}'")]
    Unauthorized(Permission),

    /// Request is not applicable in the current session state
    #[error("request conflicts with session state '{0}'")]
    ConflictingState(SessionState),

    /// Session id does not resolve
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Requester has not joined a session
    #[error("not joined to a session")]
    NotJoined,

    /// Requester is already in a session
    #[error("already joined to session '{0}'")]
    AlreadyJoined(String),

    /// Requester is on the session's ban list
    #[error("banned from session")]
    Banned,

    /// Session has reached its member limit
    #[error("session is full")]
    SessionFull,

    /// Requested role exceeds the user's access
    #[error("role '{0}' is not permitted for this user")]
    RoleNotPermitted(String),

    /// Member id does not resolve
    #[error("member not found: {0}")]
    MemberNotFound(String),

    /// Target member holds `manageSessionMembers`
    #[error("member '{0}' cannot be kicked or banned")]
    MemberNotKickable(String),

    /// Force id does not resolve
    #[error("force not found: {0}")]
    ForceNotFound(String),

    /// Node id does not resolve
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// Node cannot be opened
    #[error("node '{0}' is not openable")]
    NodeNotOpenable(String),

    /// Execution engine rejection
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Malformed request payload
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RequestError {
    /// Returns the stable error-channel code for this rejection.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Unauthorized(_) => ErrorCode::SessionUnauthorized,
            Self::ConflictingState(_) => ErrorCode::SessionConflictingState,
            Self::SessionNotFound(_) => ErrorCode::SessionNotFound,
            Self::NotJoined => ErrorCode::SessionNotJoined,
            Self::AlreadyJoined(_) => ErrorCode::SessionAlreadyJoined,
            Self::Banned => ErrorCode::SessionBanned,
            Self::SessionFull => ErrorCode::SessionFull,
            Self::RoleNotPermitted(_) => ErrorCode::RoleNotPermitted,
            Self::MemberNotFound(_) => ErrorCode::MemberNotFound,
            Self::MemberNotKickable(_) => ErrorCode::MemberNotKickable,
            Self::ForceNotFound(_) => ErrorCode::ForceNotFound,
            Self::NodeNotFound(_) => ErrorCode::NodeNotFound,
            Self::NodeNotOpenable(_) => ErrorCode::NodeNotOpenable,
            Self::InvalidRequest(_) => ErrorCode::InvalidMessage,
            Self::Execution(e) => match e {
                ExecutionError::NotExecutable(_) => ErrorCode::NodeNotExecutable,
                ExecutionError::NotRevealed(_) => ErrorCode::NodeNotRevealed,
                ExecutionError::Blocked(_) => ErrorCode::NodeBlocked,
                ExecutionError::AlreadyExecuting(_) => ErrorCode::NodeAlreadyExecuting,
                ExecutionError::ActionNotFound(_) => ErrorCode::ActionNotFound,
                ExecutionError::InsufficientResources { .. } => {
                    ErrorCode::ActionInsufficientResources
                }
                ExecutionError::OutcomesExhausted(_) => ErrorCode::ActionOutcomesExhausted,
            },
        }
    }
}

// ============================================================================
// Login Errors
// ============================================================================

/// Login registry rejections.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoginError {
    /// User already holds a login and eviction was not requested
    #[error("user '{0}' is already logged in")]
    DuplicateLogin(String),

    /// Login already holds a live connection and takeover was not requested
    #[error("user '{0}' already has an active connection")]
    DuplicateConnection(String),

    /// No login for the user
    #[error("user '{0}' is not logged in")]
    NotLoggedIn(String),
}

impl LoginError {
    /// Returns the stable error-channel code for this rejection.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::DuplicateLogin(_) | Self::DuplicateConnection(_) => ErrorCode::DuplicateClient,
            Self::NotLoggedIn(_) => ErrorCode::Unauthenticated,
        }
    }
}

// ============================================================================
// Transport Errors
// ============================================================================

/// Transport layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error during transport operations
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to bind or establish a connection
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Protocol-level error (non-text frame, missing method)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Connection was closed
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Message exceeds size limit
    #[error("message too large: {size} bytes (limit: {limit})")]
    MessageTooLarge {
        /// Actual message size in bytes
        size: usize,
        /// Configured size limit in bytes
        limit: usize,
    },
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `sortie` operations.
pub type Result<T> = std::result::Result<T, SortieError>;

// ============================================================================
// Tests
// ============================================================================
