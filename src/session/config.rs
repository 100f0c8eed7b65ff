//! Per-session configuration.

use serde::{Deserialize, Deserializer, Serialize};

/// Whether a session is listed to everyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accessibility {
    #[default]
    Public,
    /// Hidden from listings except to its owner. Joining by id still works.
    Private,
}

/// Session settings chosen at launch and adjustable by managers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Display name; empty means "use the mission name".
    pub name: String,
    pub accessibility: Accessibility,
    /// When false, no effect runs at all.
    pub effects_enabled: bool,
    /// Forces never pay for actions.
    pub infinite_resources: bool,
    /// Every execution completes immediately.
    pub instantaneous_actions: bool,
    /// Member cap; `None` is unlimited.
    pub max_members: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            accessibility: Accessibility::Public,
            effects_enabled: true,
            infinite_resources: false,
            instantaneous_actions: false,
            max_members: None,
        }
    }
}

impl SessionConfig {
    /// Applies every field present in `update`.
    pub fn apply(&mut self, update: SessionConfigUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(accessibility) = update.accessibility {
            self.accessibility = accessibility;
        }
        if let Some(enabled) = update.effects_enabled {
            self.effects_enabled = enabled;
        }
        if let Some(infinite) = update.infinite_resources {
            self.infinite_resources = infinite;
        }
        if let Some(instantaneous) = update.instantaneous_actions {
            self.instantaneous_actions = instantaneous;
        }
        if let Some(max) = update.max_members {
            self.max_members = max;
        }
    }

    /// Whether one more member fits.
    #[must_use]
    pub fn has_room(&self, current: usize) -> bool {
        self.max_members.is_none_or(|max| current < max)
    }
}

/// Partial update of a [`SessionConfig`]; absent fields are left alone.
///
/// `maxMembers: null` clears the cap, while an absent `maxMembers` keeps it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfigUpdate {
    pub name: Option<String>,
    pub accessibility: Option<Accessibility>,
    pub effects_enabled: Option<bool>,
    pub infinite_resources: Option<bool>,
    pub instantaneous_actions: Option<bool>,
    #[serde(deserialize_with = "present")]
    pub max_members: Option<Option<usize>>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
