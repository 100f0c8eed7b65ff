//! Scoped, serializable projections of a live mission.
//!
//! Viewers never see the mission itself: they see a view built for their
//! [`VisibilityScope`]. Outcome queues are not part of any view, and a force
//! scope exposes only that force's revealed nodes.

use serde::Serialize;

use crate::execution::Execution;

use super::Mission;
use super::action::Action;
use super::file::MissionFile;
use super::force::{Force, Output};
use super::node::{ExecutionState, Node};
use super::outcome::RealizedOutcome;
use super::prototype::Prototype;

/// What a viewer is allowed to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisibilityScope {
    /// Every force and node.
    Complete,
    /// One force, revealed nodes only.
    Force(String),
    /// Mission metadata only.
    None,
}

impl VisibilityScope {
    /// Whether a viewer with this scope sees `node_id` of `force_id`.
    #[must_use]
    pub fn can_see_node(&self, mission: &Mission, force_id: &str, node_id: &str) -> bool {
        match self {
            Self::Complete => true,
            Self::Force(own) => {
                own == force_id
                    && mission
                        .force(force_id)
                        .is_some_and(|f| f.is_revealed(node_id))
            }
            Self::None => false,
        }
    }

    /// Whether a viewer with this scope sees anything of `force_id`.
    #[must_use]
    pub fn can_see_force(&self, force_id: &str) -> bool {
        match self {
            Self::Complete => true,
            Self::Force(own) => own == force_id,
            Self::None => false,
        }
    }
}

/// Mission as seen by one viewer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionView {
    pub id: String,
    pub name: String,
    pub version_number: u32,
    pub resource_label: String,
    pub prototypes: Vec<Prototype>,
    pub forces: Vec<ForceView>,
    pub files: Vec<FileView>,
}

/// Force as seen by one viewer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceView {
    pub id: String,
    pub local_key: String,
    pub name: String,
    pub color: String,
    pub initial_resources: u64,
    pub resources_remaining: u64,
    pub nodes: Vec<NodeView>,
    pub outputs: Vec<Output>,
}

/// Node with its derived reveal state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeView {
    pub id: String,
    pub force_id: String,
    pub prototype_id: String,
    pub local_key: String,
    pub name: String,
    pub description: String,
    pub color: String,
    pub pre_execution_text: String,
    pub executable: bool,
    pub device: bool,
    pub opened: bool,
    pub blocked: bool,
    pub revealed: bool,
    pub openable: bool,
    pub execution_state: ExecutionState,
    pub execution: Option<Execution>,
    pub outcomes: Vec<RealizedOutcome>,
    pub actions: Vec<ActionView>,
}

/// Action without its outcome queue.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionView {
    pub id: String,
    pub local_key: String,
    pub name: String,
    pub description: String,
    pub process_time: u64,
    pub success_chance: f64,
    pub resource_cost: u64,
    pub opens_node: bool,
    pub post_execution_success_text: String,
    pub post_execution_failure_text: String,
}

/// File reference visible to the viewer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileView {
    pub id: String,
    pub name: String,
}

impl MissionView {
    /// Builds the view of `mission` for `scope`.
    #[must_use]
    pub fn build(mission: &Mission, scope: &VisibilityScope) -> Self {
        let forces = mission
            .forces
            .values()
            .filter(|f| scope.can_see_force(&f.id))
            .map(|f| ForceView::build(f, scope))
            .collect();
        let files = mission
            .files
            .values()
            .filter(|file| file_visible(file, scope))
            .map(|file| FileView {
                id: file.id.clone(),
                name: file.name.clone(),
            })
            .collect();
        let prototypes = match scope {
            VisibilityScope::None => Vec::new(),
            _ => mission.prototypes.clone(),
        };
        Self {
            id: mission.id.clone(),
            name: mission.name.clone(),
            version_number: mission.version_number,
            resource_label: mission.resource_label.clone(),
            prototypes,
            forces,
            files,
        }
    }
}

fn file_visible(file: &MissionFile, scope: &VisibilityScope) -> bool {
    match scope {
        VisibilityScope::Complete => true,
        VisibilityScope::Force(id) => file.is_accessible_to(id),
        VisibilityScope::None => false,
    }
}

impl ForceView {
    fn build(force: &Force, scope: &VisibilityScope) -> Self {
        let complete = matches!(scope, VisibilityScope::Complete);
        let nodes = force
            .nodes
            .values()
            .filter(|n| complete || force.is_revealed(&n.id))
            .map(|n| NodeView::build(force, n))
            .collect();
        Self {
            id: force.id.clone(),
            local_key: force.local_key.clone(),
            name: force.name.clone(),
            color: force.color.clone(),
            initial_resources: force.initial_resources,
            resources_remaining: force.resources_remaining,
            nodes,
            outputs: force.outputs.clone(),
        }
    }
}

impl NodeView {
    /// Builds the view of one node.
    #[must_use]
    pub fn build(force: &Force, node: &Node) -> Self {
        Self {
            id: node.id.clone(),
            force_id: force.id.clone(),
            prototype_id: node.prototype_id.clone(),
            local_key: node.local_key.clone(),
            name: node.name.clone(),
            description: node.description.clone(),
            color: node.color.clone(),
            pre_execution_text: node.pre_execution_text.clone(),
            executable: node.executable,
            device: node.device,
            opened: node.is_opened(),
            blocked: node.is_blocked(),
            revealed: force.is_revealed(&node.id),
            openable: node.is_openable(),
            execution_state: node.execution_state(),
            execution: node.execution().cloned(),
            outcomes: node.outcomes().to_vec(),
            actions: node.actions.values().map(ActionView::from).collect(),
        }
    }
}

impl From<&Action> for ActionView {
    fn from(action: &Action) -> Self {
        Self {
            id: action.id.clone(),
            local_key: action.local_key.clone(),
            name: action.name.clone(),
            description: action.description.clone(),
            process_time: action.process_time,
            success_chance: action.success_chance,
            resource_cost: action.resource_cost,
            opens_node: action.opens_node,
            post_execution_success_text: action.post_execution_success_text.clone(),
            post_execution_failure_text: action.post_execution_failure_text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::tests::mission;

    #[test]
    fn complete_scope_sees_everything() {
        let mission = mission();
        let view = MissionView::build(&mission, &VisibilityScope::Complete);
        assert_eq!(view.forces.len(), 2);
        assert_eq!(view.forces[0].nodes.len(), 4);
        assert_eq!(view.files.len(), 1);
    }

    #[test]
    fn force_scope_sees_revealed_nodes_of_own_force() {
        let mut mission = mission();
        let scope = VisibilityScope::Force("red".into());
        let view = MissionView::build(&mission, &scope);
        assert_eq!(view.forces.len(), 1);
        assert_eq!(view.forces[0].id, "red");
        assert_eq!(view.forces[0].nodes.len(), 1);

        mission
            .force_mut("red")
            .unwrap()
            .node_mut("red-root")
            .unwrap()
            .set_opened(true);
        let view = MissionView::build(&mission, &scope);
        assert_eq!(view.forces[0].nodes.len(), 3);
        assert!(scope.can_see_node(&mission, "red", "red-mid"));
        assert!(!scope.can_see_node(&mission, "red", "red-leaf"));
        assert!(!scope.can_see_node(&mission, "blue", "blue-root"));
    }

    #[test]
    fn empty_scope_sees_metadata_only() {
        let view = MissionView::build(&mission(), &VisibilityScope::None);
        assert!(view.forces.is_empty());
        assert!(view.prototypes.is_empty());
        assert!(view.files.is_empty());
        assert_eq!(view.name, "Operation Test");
    }

    #[test]
    fn views_never_carry_outcome_queues() {
        let json = serde_json::to_value(MissionView::build(&mission(), &VisibilityScope::Complete))
            .unwrap();
        let action = &json["forces"][0]["nodes"][2]["actions"][0];
        assert!(action.get("outcomes").is_none());
        assert!(action.get("successChance").is_some());
    }
}
