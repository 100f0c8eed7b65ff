//! Target environments and their registered scripts.
//!
//! An environment is a plugin: it has a version, optional async setup and
//! teardown, and a fixed list of [`Target`]s. A target pairs a
//! [`TargetScript`] with the argument schema effects must satisfy before the
//! script is invoked.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::EffectError;

use super::context::EffectContext;
use super::store::{ScopedStores, Store};

// ============================================================================
// Scripts
// ============================================================================

/// A script run when an effect fires against its target.
///
/// Scripts never touch the mission directly: they read through the context
/// and request changes through its mutators.
#[async_trait]
pub trait TargetScript: Send + Sync {
    /// Runs the script.
    ///
    /// # Errors
    ///
    /// Returns an [`EffectError`] if the script fails; the engine logs it and
    /// moves on to the next effect.
    async fn run(&self, ctx: &mut EffectContext<'_>) -> Result<(), EffectError>;
}

/// Adapter for scripts that never suspend.
pub struct SyncScript(pub fn(&mut EffectContext<'_>) -> Result<(), EffectError>);

#[async_trait]
impl TargetScript for SyncScript {
    async fn run(&self, ctx: &mut EffectContext<'_>) -> Result<(), EffectError> {
        (self.0)(ctx)
    }
}

// ============================================================================
// Argument Schema
// ============================================================================

/// JSON kind an argument must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgKind {
    Boolean,
    Number,
    Integer,
    String,
    Object,
    Any,
}

impl ArgKind {
    const fn describe(self) -> &'static str {
        match self {
            Self::Boolean => "a boolean",
            Self::Number => "a number",
            Self::Integer => "an integer",
            Self::String => "a string",
            Self::Object => "an object",
            Self::Any => "any value",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::Boolean => value.is_boolean(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::String => value.is_string(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }
}

/// One argument accepted by a target.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct ArgSpec {
    /// Argument key.
    pub key: String,
    /// Expected JSON kind.
    pub kind: ArgKind,
    /// Whether effects must supply it.
    #[serde(default)]
    pub required: bool,
}

impl ArgSpec {
    /// A required argument.
    #[must_use]
    pub fn required(key: &str, kind: ArgKind) -> Self {
        Self {
            key: key.to_string(),
            kind,
            required: true,
        }
    }

    /// An optional argument.
    #[must_use]
    pub fn optional(key: &str, kind: ArgKind) -> Self {
        Self {
            key: key.to_string(),
            kind,
            required: false,
        }
    }
}

/// Checks `args` against `specs`. Null values count as absent.
///
/// # Errors
///
/// Returns [`EffectError::MissingArgument`] for an absent required argument
/// or [`EffectError::InvalidArgument`] for a value of the wrong kind.
pub fn validate_args(specs: &[ArgSpec], args: &Map<String, Value>) -> Result<(), EffectError> {
    for spec in specs {
        match args.get(&spec.key).filter(|v| !v.is_null()) {
            None if spec.required => return Err(EffectError::MissingArgument(spec.key.clone())),
            Some(value) if !spec.kind.matches(value) => {
                return Err(EffectError::InvalidArgument {
                    key: spec.key.clone(),
                    expected: spec.kind.describe(),
                });
            }
            _ => {}
        }
    }
    Ok(())
}

// ============================================================================
// Targets and Environments
// ============================================================================

/// A registered script and its argument schema.
#[derive(Clone)]
pub struct Target {
    /// Target id, unique within the environment.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Accepted arguments.
    pub args: Vec<ArgSpec>,
    /// Script invoked for each effect.
    pub script: Arc<dyn TargetScript>,
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// A pluggable scripting surface effects run against.
#[async_trait]
pub trait TargetEnvironment: Send + Sync {
    /// Environment id referenced by effects.
    fn id(&self) -> &str;

    /// Display name.
    fn name(&self) -> &str;

    /// Version of the environment's scripts.
    fn version(&self) -> &str;

    /// Registered targets.
    fn targets(&self) -> &[Target];

    /// Looks up a target by id.
    fn target(&self, target_id: &str) -> Option<&Target> {
        self.targets().iter().find(|t| t.id == target_id)
    }

    /// Prepares the environment before a session starts.
    ///
    /// # Errors
    ///
    /// Returns [`EffectError::Environment`] if setup fails.
    async fn setup(&self) -> Result<(), EffectError> {
        Ok(())
    }

    /// Releases the environment after a session ends or before it resets.
    ///
    /// # Errors
    ///
    /// Returns [`EffectError::Environment`] if teardown fails.
    async fn teardown(&self) -> Result<(), EffectError> {
        Ok(())
    }
}

/// Summary of a registered environment.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSummary {
    pub id: String,
    pub name: String,
    pub version: String,
    pub targets: Vec<String>,
}

/// Process-wide registry of target environments.
///
/// Also owns the environment-scoped stores, which outlive any one session.
#[derive(Default)]
pub struct EnvironmentRegistry {
    environments: DashMap<String, Arc<dyn TargetEnvironment>>,
    stores: ScopedStores,
}

impl fmt::Debug for EnvironmentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentRegistry")
            .field("environments", &self.environments.len())
            .finish_non_exhaustive()
    }
}

impl EnvironmentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in `internal` environment.
    #[must_use]
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(super::builtin::InternalEnvironment::new()));
        registry
    }

    /// Registers `environment`, replacing any environment with the same id.
    pub fn register(&self, environment: Arc<dyn TargetEnvironment>) {
        let id = environment.id().to_string();
        let version = environment.version().to_string();
        if self.environments.insert(id.clone(), environment).is_some() {
            warn!(environment = %id, %version, "replaced target environment");
        } else {
            info!(environment = %id, %version, "registered target environment");
        }
    }

    /// Looks up an environment by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn TargetEnvironment>> {
        self.environments.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Summaries of every registered environment, sorted by id.
    #[must_use]
    pub fn list(&self) -> Vec<EnvironmentSummary> {
        let mut list: Vec<_> = self
            .environments
            .iter()
            .map(|e| EnvironmentSummary {
                id: e.id().to_string(),
                name: e.name().to_string(),
                version: e.version().to_string(),
                targets: e.targets().iter().map(|t| t.id.clone()).collect(),
            })
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// Process-wide store for `environment_id`.
    #[must_use]
    pub fn environment_store(&self, environment_id: &str) -> Store {
        self.stores.for_environment(environment_id)
    }

    fn snapshot(&self) -> Vec<Arc<dyn TargetEnvironment>> {
        let mut all: Vec<_> = self.environments.iter().map(|e| Arc::clone(e.value())).collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    /// Sets up every environment. Failures are collected, not fatal.
    pub async fn setup_all(&self) -> Vec<EffectError> {
        let mut failures = Vec::new();
        for env in self.snapshot() {
            if let Err(e) = env.setup().await {
                warn!(environment = %env.id(), error = %e, "environment setup failed");
                failures.push(e);
            }
        }
        failures
    }

    /// Tears down every environment. Failures are collected, not fatal.
    pub async fn teardown_all(&self) -> Vec<EffectError> {
        let mut failures = Vec::new();
        for env in self.snapshot() {
            if let Err(e) = env.teardown().await {
                warn!(environment = %env.id(), error = %e, "environment teardown failed");
                failures.push(e);
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn required_args_must_be_present() {
        let specs = vec![
            ArgSpec::required("message", ArgKind::String),
            ArgSpec::optional("prefix", ArgKind::String),
        ];
        assert!(validate_args(&specs, &args(json!({"message": "hi"}))).is_ok());
        assert!(matches!(
            validate_args(&specs, &args(json!({"message": null}))),
            Err(EffectError::MissingArgument(k)) if k == "message"
        ));
        assert!(matches!(
            validate_args(&specs, &args(json!({"message": "hi", "prefix": 3}))),
            Err(EffectError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn integer_kind_rejects_fractions() {
        let specs = vec![ArgSpec::required("delta", ArgKind::Integer)];
        assert!(validate_args(&specs, &args(json!({"delta": -5}))).is_ok());
        assert!(validate_args(&specs, &args(json!({"delta": 1.5}))).is_err());
    }

    #[test]
    fn builtin_registry_lists_internal() {
        let registry = EnvironmentRegistry::with_builtin();
        let list = registry.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "internal");
        assert!(list[0].targets.contains(&"block-status".to_string()));
        assert!(registry.get("internal").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[tokio::test]
    async fn builtin_setup_and_teardown_succeed() {
        let registry = EnvironmentRegistry::with_builtin();
        assert!(registry.setup_all().await.is_empty());
        assert!(registry.teardown_all().await.is_empty());
    }

    #[test]
    fn environment_store_outlives_lookups() {
        let registry = EnvironmentRegistry::new();
        registry.environment_store("internal").set("k", json!(1));
        assert_eq!(registry.environment_store("internal").get("k"), Some(json!(1)));
    }
}
