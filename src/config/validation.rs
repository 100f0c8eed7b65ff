//! Configuration validation.
//!
//! Runs on the deserialized [`SortieConfig`] and collects every issue
//! rather than stopping at the first, so one run reports everything that
//! needs fixing.

use std::collections::HashSet;

use crate::config::schema::SortieConfig;
use crate::effects::builtin::INTERNAL_ENVIRONMENT_ID;
use crate::effects::webhook::WebhookConfig;
use crate::error::{Severity, ValidationIssue};
use crate::transport::http::parse_bind_addr;

// ============================================================================
// Public API
// ============================================================================

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors (prevent loading).
    pub errors: Vec<ValidationIssue>,

    /// Validation warnings (informational).
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Configuration validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a configuration and returns every issue found.
    pub fn validate(&mut self, config: &SortieConfig) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        self.validate_server(config);
        self.validate_rate_limit(config);
        self.validate_missions(config);
        self.validate_sessions(config);
        self.validate_environments(&config.environments);

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Sections
    // ========================================================================

    fn validate_server(&mut self, config: &SortieConfig) {
        if let Err(e) = parse_bind_addr(&config.server.bind) {
            self.add_error("server.bind", &e.to_string());
        }
        if config.server.max_message_size == 0 {
            self.add_error("server.max_message_size", "must be greater than zero");
        }
    }

    fn validate_rate_limit(&mut self, config: &SortieConfig) {
        if config.rate_limit.max_messages_per_second == 0 {
            self.add_error(
                "rate_limit.max_messages_per_second",
                "must be greater than zero; every message would be throttled",
            );
        }
        if config.rate_limit.cooldown_ms == 0 {
            self.add_warning(
                "rate_limit.cooldown_ms",
                "zero cooldown lifts throttling as soon as the window slides",
            );
        }
    }

    fn validate_missions(&mut self, config: &SortieConfig) {
        let dir = &config.missions.directory;
        if !dir.is_dir() {
            self.add_warning(
                "missions.directory",
                &format!("{} is not a directory; no missions will load", dir.display()),
            );
        }
    }

    fn validate_sessions(&mut self, config: &SortieConfig) {
        if config.sessions.max_members == Some(0) {
            self.add_error("sessions.maxMembers", "must be at least 1 when set");
        }
        if config.sessions.instantaneous_actions {
            self.add_warning(
                "sessions.instantaneousActions",
                "all sessions default to instantaneous actions",
            );
        }
    }

    fn validate_environments(&mut self, environments: &[WebhookConfig]) {
        let mut ids = HashSet::new();

        for (i, env) in environments.iter().enumerate() {
            let path = format!("environments[{i}]");

            if env.id.is_empty() {
                self.add_error(&format!("{path}.id"), "environment id cannot be empty");
            } else if env.id == INTERNAL_ENVIRONMENT_ID {
                self.add_error(
                    &format!("{path}.id"),
                    &format!("'{INTERNAL_ENVIRONMENT_ID}' is reserved for the built-in environment"),
                );
            } else if !ids.insert(env.id.as_str()) {
                self.add_error(
                    &format!("{path}.id"),
                    &format!("duplicate environment id '{}'", env.id),
                );
            }

            match reqwest::Url::parse(&env.url) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => self.add_error(
                    &format!("{path}.url"),
                    &format!("unsupported scheme '{}', expected http or https", url.scheme()),
                ),
                Err(e) => self.add_error(&format!("{path}.url"), &format!("invalid url: {e}")),
            }

            if env.timeout_ms == Some(0) {
                self.add_error(&format!("{path}.timeout_ms"), "must be greater than zero");
            }

            if env.targets.is_empty() {
                self.add_warning(&format!("{path}.targets"), "environment declares no targets");
            }
            self.validate_targets(env, &path);
        }
    }

    fn validate_targets(&mut self, env: &WebhookConfig, base_path: &str) {
        let mut target_ids = HashSet::new();

        for (i, target) in env.targets.iter().enumerate() {
            let path = format!("{base_path}.targets[{i}]");
            if target.id.is_empty() {
                self.add_error(&format!("{path}.id"), "target id cannot be empty");
            } else if !target_ids.insert(target.id.as_str()) {
                self.add_error(
                    &format!("{path}.id"),
                    &format!("duplicate target id '{}'", target.id),
                );
            }

            let mut keys = HashSet::new();
            for (j, arg) in target.args.iter().enumerate() {
                if !keys.insert(arg.key.as_str()) {
                    self.add_error(
                        &format!("{path}.args[{j}].key"),
                        &format!("duplicate argument '{}'", arg.key),
                    );
                }
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}
