//! Effect definitions.
//!
//! An effect is data only: which lifecycle event triggers it, which target
//! environment and target script it invokes, and the arguments handed to
//! that script. Resolution and invocation live in [`crate::effects`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle event that fires an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EffectTrigger {
    /// Session entered `started` (also after a reset).
    SessionStart,
    /// Session is ending.
    SessionEnd,
    /// An execution of the owning action was initiated.
    ExecutionInitiation,
    /// An execution of the owning action succeeded.
    ExecutionSuccess,
    /// An execution of the owning action failed.
    ExecutionFailure,
}

impl EffectTrigger {
    /// Whether effects with this trigger belong to the mission rather than an action.
    #[must_use]
    pub const fn is_session_scoped(self) -> bool {
        matches!(self, Self::SessionStart | Self::SessionEnd)
    }
}

impl std::fmt::Display for EffectTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SessionStart => "session-start",
            Self::SessionEnd => "session-end",
            Self::ExecutionInitiation => "execution-initiation",
            Self::ExecutionSuccess => "execution-success",
            Self::ExecutionFailure => "execution-failure",
        };
        f.write_str(s)
    }
}

/// A scripted side effect attached to an action or to the mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Effect {
    /// Unique id within the mission.
    pub id: String,
    /// Key unique among the effect's siblings.
    #[serde(default)]
    pub local_key: String,
    /// Display name used in logs.
    pub name: String,
    /// Event that fires the effect.
    pub trigger: EffectTrigger,
    /// Target environment providing the script.
    pub target_environment_id: String,
    /// Environment version the effect was authored against.
    #[serde(default)]
    pub target_environment_version: Option<String>,
    /// Target script within the environment.
    pub target_id: String,
    /// Arguments passed to the script.
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl Effect {
    /// Returns the named argument, if present and not null.
    #[must_use]
    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.args.get(key).filter(|v| !v.is_null())
    }
}
