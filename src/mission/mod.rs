//! Scenario model.
//!
//! A [`MissionDocument`] is the save form: plain serde data, as stored by the
//! document layer. [`Mission::from_document`] validates it and realizes the
//! live graph: forces own nodes, nodes own actions, and actions own their
//! pre-drawn outcome queues. Cross-links are ids, resolved through the
//! owning maps.
//!
//! # Architecture
//!
//! - [`prototype`]: structural slots shared by every force
//! - [`force`] / [`node`] / [`action`]: the realized tree
//! - [`outcome`]: seeded outcome generation
//! - [`effect`]: effect definitions (data only)
//! - [`file`]: file references and their per-force access
//! - [`library`]: missions loaded from disk
//! - [`validation`]: collects every structural issue in a document
//! - [`view`]: per-viewer projections

pub mod action;
pub mod effect;
pub mod file;
pub mod force;
pub mod library;
pub mod node;
pub mod outcome;
pub mod prototype;
pub mod validation;
pub mod view;

pub use action::Action;
pub use effect::{Effect, EffectTrigger};
pub use file::MissionFile;
pub use force::{Force, Output};
pub use library::{MissionLibrary, MissionSummary};
pub use node::Node;
pub use prototype::Prototype;
pub use validation::{MAX_FORCES, MissionValidator};
pub use view::{MissionView, VisibilityScope};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::MissionError;
use crate::execution::Execution;

use file::MissionFileDocument;
use force::ForceDocument;
use outcome::RealizedOutcome;

/// Save form of a mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionDocument {
    /// Unique mission id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Document revision.
    #[serde(default = "default_version")]
    pub version_number: u32,
    /// Seed for every per-action outcome stream.
    #[serde(default)]
    pub seed: String,
    /// Label shown for force resources.
    #[serde(default = "default_resource_label")]
    pub resource_label: String,
    /// Structural slots, parents before children by convention.
    pub prototypes: Vec<Prototype>,
    /// Competing forces.
    pub forces: Vec<ForceDocument>,
    /// Session-triggered effects.
    #[serde(default)]
    pub effects: Vec<Effect>,
    /// Attached files.
    #[serde(default)]
    pub files: Vec<MissionFileDocument>,
}

const fn default_version() -> u32 {
    1
}

fn default_resource_label() -> String {
    "Resources".to_string()
}

/// A live mission.
#[derive(Debug, Clone)]
pub struct Mission {
    pub id: String,
    pub name: String,
    pub version_number: u32,
    pub seed: String,
    pub resource_label: String,
    pub prototypes: Vec<Prototype>,
    /// Forces keyed by id, in declaration order.
    pub forces: IndexMap<String, Force>,
    /// Session-triggered effects.
    pub effects: Vec<Effect>,
    /// Files keyed by id.
    pub files: IndexMap<String, MissionFile>,
}

impl Mission {
    /// Validates `doc` and realizes the live mission.
    ///
    /// # Errors
    ///
    /// Returns [`MissionError::Invalid`] with every issue found if the
    /// document fails validation. Warnings are logged and do not fail.
    pub fn from_document(doc: MissionDocument) -> Result<Self, MissionError> {
        let result = MissionValidator::new().validate(&doc);
        for issue in &result.warnings {
            warn!(mission = %doc.name, %issue, "mission validation warning");
        }
        if result.has_errors() {
            return Err(MissionError::Invalid {
                mission: doc.name,
                errors: result.errors,
            });
        }

        let forces = doc
            .forces
            .into_iter()
            .map(|f| {
                let force = Force::from_document(f, &doc.seed, &doc.prototypes);
                (force.id.clone(), force)
            })
            .collect();
        let files = doc
            .files
            .into_iter()
            .map(|f| {
                let file = MissionFile::from_document(f);
                (file.id.clone(), file)
            })
            .collect();

        Ok(Self {
            id: doc.id,
            name: doc.name,
            version_number: doc.version_number,
            seed: doc.seed,
            resource_label: doc.resource_label,
            prototypes: doc.prototypes,
            forces,
            effects: doc.effects,
            files,
        })
    }

    /// Parses and realizes a mission from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`MissionError::Parse`] on malformed JSON, or any error of
    /// [`Mission::from_document`].
    pub fn from_json(json: &str) -> Result<Self, MissionError> {
        Self::from_document(serde_json::from_str(json)?)
    }

    /// Returns the save form. Runtime state (pools, outputs, open and block
    /// flags, outcome history, executions, outcome queues) is not saved.
    #[must_use]
    pub fn to_document(&self) -> MissionDocument {
        MissionDocument {
            id: self.id.clone(),
            name: self.name.clone(),
            version_number: self.version_number,
            seed: self.seed.clone(),
            resource_label: self.resource_label.clone(),
            prototypes: self.prototypes.clone(),
            forces: self.forces.values().map(Force::to_document).collect(),
            effects: self.effects.clone(),
            files: self.files.values().map(MissionFile::to_document).collect(),
        }
    }

    /// Serializes the save form as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_save_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.to_document())
    }

    /// Looks up a force by id.
    #[must_use]
    pub fn force(&self, force_id: &str) -> Option<&Force> {
        self.forces.get(force_id)
    }

    /// Looks up a force by id, mutably.
    pub fn force_mut(&mut self, force_id: &str) -> Option<&mut Force> {
        self.forces.get_mut(force_id)
    }

    /// Looks up a force by local key.
    #[must_use]
    pub fn force_by_key(&self, local_key: &str) -> Option<&Force> {
        self.forces.values().find(|f| f.local_key == local_key)
    }

    /// Finds the force owning `node_id`.
    #[must_use]
    pub fn force_of_node(&self, node_id: &str) -> Option<&Force> {
        self.forces.values().find(|f| f.nodes.contains_key(node_id))
    }

    /// Finds a node and its force by node id.
    #[must_use]
    pub fn find_node(&self, node_id: &str) -> Option<(&Force, &Node)> {
        self.forces
            .values()
            .find_map(|f| f.node(node_id).map(|n| (f, n)))
    }

    /// Finds an action and its node and force by action id.
    #[must_use]
    pub fn find_action(&self, action_id: &str) -> Option<(&Force, &Node, &Action)> {
        self.forces.values().find_map(|f| {
            f.nodes
                .values()
                .find_map(|n| n.actions.get(action_id).map(|a| (f, n, a)))
        })
    }

    /// Every in-flight execution across all forces.
    pub fn executions(&self) -> impl Iterator<Item = &Execution> {
        self.forces.values().flat_map(Force::executions)
    }

    /// Aborts every in-flight execution across all forces.
    pub fn abort_all(&mut self, now_ms: i64) -> Vec<(Execution, RealizedOutcome)> {
        self.forces
            .values_mut()
            .flat_map(|f| f.abort_all(now_ms))
            .collect()
    }

    /// Looks up a file by id.
    pub fn file_mut(&mut self, file_id: &str) -> Option<&mut MissionFile> {
        self.files.get_mut(file_id)
    }

    /// Builds the view of this mission for `scope`.
    #[must_use]
    pub fn view(&self, scope: &VisibilityScope) -> MissionView {
        MissionView::build(self, scope)
    }
}
