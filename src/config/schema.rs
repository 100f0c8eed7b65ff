//! Configuration schema.
//!
//! Mirrors `sortie.yaml`. Every section is optional and falls back to its
//! defaults, so an empty mapping is a valid configuration.

use std::path::PathBuf;

use serde::Deserialize;

use crate::effects::webhook::WebhookConfig;
use crate::session::SessionConfig;
use crate::transport::DEFAULT_MAX_MESSAGE_SIZE;
use crate::transport::rate_limit::RateLimitConfig;

/// Root of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SortieConfig {
    pub server: ServerSettings,
    pub rate_limit: RateLimitConfig,
    pub missions: MissionSettings,
    /// Defaults for sessions launched without an explicit config.
    pub sessions: SessionConfig,
    /// HTTP-backed target environments.
    pub environments: Vec<WebhookConfig>,
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    /// Bind address; `":8080"` and `"8080"` bind all interfaces.
    pub bind: String,
    /// Largest inbound frame or request body, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Where mission files are read from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MissionSettings {
    /// Directory of `*.json` mission save files.
    pub directory: PathBuf,
}

impl Default for MissionSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("missions"),
        }
    }
}
