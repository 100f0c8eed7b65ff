//! Mission document validation.
//!
//! Runs on the parsed [`MissionDocument`] before anything is realized, and
//! collects every issue instead of stopping at the first so an author sees
//! the whole list at once.

use std::collections::{HashMap, HashSet};

use crate::error::{Severity, ValidationIssue};

use super::MissionDocument;
use super::effect::Effect;
use super::force::ForceDocument;
use super::prototype;

/// Upper bound on forces in one mission.
pub const MAX_FORCES: usize = 8;

// ============================================================================
// Public API
// ============================================================================

/// Result of mission validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Issues that prevent the mission from loading.
    pub errors: Vec<ValidationIssue>,

    /// Informational issues.
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Mission validator.
#[derive(Debug, Default)]
pub struct MissionValidator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
    seen_ids: HashMap<String, String>,
}

impl MissionValidator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a mission document and returns every issue found.
    pub fn validate(&mut self, doc: &MissionDocument) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();
        self.seen_ids.clear();

        self.validate_metadata(doc);
        self.validate_prototypes(doc);
        self.validate_forces(doc);
        self.validate_mission_effects(&doc.effects);
        self.validate_files(doc);

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Structure
    // ========================================================================

    fn validate_metadata(&mut self, doc: &MissionDocument) {
        if doc.name.trim().is_empty() {
            self.add_error("name", "Mission name is required and cannot be empty");
        }
        if doc.seed.is_empty() {
            self.add_warning(
                "seed",
                "Mission seed is empty; every action will draw from the same base stream",
            );
        }
        self.claim_id(&doc.id, "id");
    }

    fn validate_prototypes(&mut self, doc: &MissionDocument) {
        if doc.prototypes.is_empty() {
            self.add_error("prototypes", "Mission must define at least one prototype");
        }
        let ids: HashSet<&str> = doc.prototypes.iter().map(|p| p.id.as_str()).collect();
        for (i, proto) in doc.prototypes.iter().enumerate() {
            let path = format!("prototypes[{i}]");
            self.claim_id(&proto.id, &format!("{path}.id"));
            match proto.parent_id.as_deref() {
                Some(parent) if !ids.contains(parent) => {
                    self.add_error(
                        &format!("{path}.parentId"),
                        &format!("Parent prototype '{parent}' does not exist"),
                    );
                }
                Some(_) if prototype::depth(&doc.prototypes, &proto.id).is_none() => {
                    self.add_error(
                        &format!("{path}.parentId"),
                        "Prototype parent links form a cycle",
                    );
                }
                _ => {}
            }
        }
    }

    fn validate_forces(&mut self, doc: &MissionDocument) {
        if doc.forces.is_empty() || doc.forces.len() > MAX_FORCES {
            self.add_error(
                "forces",
                &format!(
                    "Mission must have between 1 and {MAX_FORCES} forces, found {}",
                    doc.forces.len()
                ),
            );
        }
        self.check_local_keys(
            doc.forces.iter().map(|f| f.local_key.as_str()),
            "forces",
        );
        let prototype_ids: HashSet<&str> = doc.prototypes.iter().map(|p| p.id.as_str()).collect();
        for (i, force) in doc.forces.iter().enumerate() {
            self.validate_force(force, &format!("forces[{i}]"), &prototype_ids);
        }
    }

    fn validate_force(&mut self, force: &ForceDocument, path: &str, prototype_ids: &HashSet<&str>) {
        self.claim_id(&force.id, &format!("{path}.id"));
        self.check_local_keys(
            force.nodes.iter().map(|n| n.local_key.as_str()),
            &format!("{path}.nodes"),
        );

        let mut mapped: HashMap<&str, usize> = HashMap::new();
        for (j, node) in force.nodes.iter().enumerate() {
            let node_path = format!("{path}.nodes[{j}]");
            self.claim_id(&node.id, &format!("{node_path}.id"));
            if prototype_ids.contains(node.prototype_id.as_str()) {
                *mapped.entry(node.prototype_id.as_str()).or_default() += 1;
            } else {
                self.add_error(
                    &format!("{node_path}.prototypeId"),
                    &format!("Prototype '{}' does not exist", node.prototype_id),
                );
            }
            if node.executable && node.actions.is_empty() {
                self.add_warning(&node_path, "Executable node has no actions");
            }
            if !node.executable && !node.actions.is_empty() {
                self.add_warning(
                    &node_path,
                    "Non-executable node declares actions that can never run",
                );
            }

            self.check_local_keys(
                node.actions.iter().map(|a| a.local_key.as_str()),
                &format!("{node_path}.actions"),
            );
            for (k, action) in node.actions.iter().enumerate() {
                let action_path = format!("{node_path}.actions[{k}]");
                self.claim_id(&action.id, &format!("{action_path}.id"));
                if !(0.0..=1.0).contains(&action.success_chance) {
                    self.add_error(
                        &format!("{action_path}.successChance"),
                        &format!(
                            "Success chance must be between 0 and 1, got {}",
                            action.success_chance
                        ),
                    );
                }
                self.validate_action_effects(&action.effects, &format!("{action_path}.effects"));
            }
        }

        let mut missing: Vec<&str> = prototype_ids
            .iter()
            .filter(|id| !mapped.contains_key(*id))
            .copied()
            .collect();
        missing.sort_unstable();
        for proto in missing {
            self.add_error(
                &format!("{path}.nodes"),
                &format!("No node realizes prototype '{proto}'"),
            );
        }
        let mut duplicated: Vec<&str> = mapped
            .iter()
            .filter(|(_, count)| **count > 1)
            .map(|(id, _)| *id)
            .collect();
        duplicated.sort_unstable();
        for proto in duplicated {
            self.add_error(
                &format!("{path}.nodes"),
                &format!("Prototype '{proto}' is realized by more than one node"),
            );
        }
    }

    // ========================================================================
    // Effects and Files
    // ========================================================================

    fn validate_mission_effects(&mut self, effects: &[Effect]) {
        self.check_local_keys(effects.iter().map(|e| e.local_key.as_str()), "effects");
        for (i, effect) in effects.iter().enumerate() {
            let path = format!("effects[{i}]");
            self.validate_effect(effect, &path);
            if !effect.trigger.is_session_scoped() {
                self.add_error(
                    &format!("{path}.trigger"),
                    &format!("Mission effects must be session-triggered, got '{}'", effect.trigger),
                );
            }
        }
    }

    fn validate_action_effects(&mut self, effects: &[Effect], path: &str) {
        self.check_local_keys(effects.iter().map(|e| e.local_key.as_str()), path);
        for (i, effect) in effects.iter().enumerate() {
            let effect_path = format!("{path}[{i}]");
            self.validate_effect(effect, &effect_path);
            if effect.trigger.is_session_scoped() {
                self.add_error(
                    &format!("{effect_path}.trigger"),
                    &format!(
                        "Action effects must be execution-triggered, got '{}'",
                        effect.trigger
                    ),
                );
            }
        }
    }

    fn validate_effect(&mut self, effect: &Effect, path: &str) {
        self.claim_id(&effect.id, &format!("{path}.id"));
        if effect.target_environment_id.is_empty() {
            self.add_error(
                &format!("{path}.targetEnvironmentId"),
                "Target environment is required",
            );
        }
        if effect.target_id.is_empty() {
            self.add_error(&format!("{path}.targetId"), "Target is required");
        }
    }

    fn validate_files(&mut self, doc: &MissionDocument) {
        let force_ids: HashSet<&str> = doc.forces.iter().map(|f| f.id.as_str()).collect();
        for (i, file) in doc.files.iter().enumerate() {
            let path = format!("files[{i}]");
            self.claim_id(&file.id, &format!("{path}.id"));
            for force in &file.initial_access {
                if !force_ids.contains(force.as_str()) {
                    self.add_warning(
                        &format!("{path}.initialAccess"),
                        &format!("Force '{force}' does not exist and will be ignored"),
                    );
                }
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn claim_id(&mut self, id: &str, path: &str) {
        if id.is_empty() {
            self.add_error(path, "Id is required");
            return;
        }
        if let Some(first) = self.seen_ids.get(id) {
            let message = format!("Duplicate id '{id}' (first used at {first})");
            self.add_error(path, &message);
        } else {
            self.seen_ids.insert(id.to_string(), path.to_string());
        }
    }

    fn check_local_keys<'a>(&mut self, keys: impl Iterator<Item = &'a str>, path: &str) {
        let mut seen = HashSet::new();
        for key in keys {
            if !key.is_empty() && !seen.insert(key) {
                self.add_error(path, &format!("Duplicate local key '{key}'"));
            }
        }
    }

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
