//! Files attached to a mission.
//!
//! The content lives in an external file-reference service; the runtime only
//! tracks which forces may see each file.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Save form of a mission file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionFileDocument {
    /// File reference id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Forces that can see the file when a session starts.
    #[serde(default)]
    pub initial_access: Vec<String>,
}

/// A mission file with its live access set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionFile {
    /// File reference id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Forces that can see the file when a session starts.
    pub initial_access: Vec<String>,
    /// Forces that can currently see the file.
    pub access: BTreeSet<String>,
}

impl MissionFile {
    /// Builds a file with its live access reset to the initial set.
    #[must_use]
    pub fn from_document(doc: MissionFileDocument) -> Self {
        let access = doc.initial_access.iter().cloned().collect();
        Self {
            id: doc.id,
            name: doc.name,
            initial_access: doc.initial_access,
            access,
        }
    }

    /// Returns the save form. Live access is not saved.
    #[must_use]
    pub fn to_document(&self) -> MissionFileDocument {
        MissionFileDocument {
            id: self.id.clone(),
            name: self.name.clone(),
            initial_access: self.initial_access.clone(),
        }
    }

    /// Grants `force_id` access. Returns `false` if it already had it.
    pub fn grant(&mut self, force_id: &str) -> bool {
        self.access.insert(force_id.to_string())
    }

    /// Revokes access from `force_id`. Returns `false` if it had none.
    pub fn revoke(&mut self, force_id: &str) -> bool {
        self.access.remove(force_id)
    }

    /// Whether `force_id` can currently see the file.
    #[must_use]
    pub fn is_accessible_to(&self, force_id: &str) -> bool {
        self.access.contains(force_id)
    }
}
