//! Forces: one competing team's realized node tree, resource pool and output log.
//!
//! Nodes are stored flat, keyed by id. Parent and child links are node ids
//! resolved from the prototype tree at build time, so reveal checks and
//! block propagation are plain map lookups.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ExecutionError, RequestError};
use crate::execution::{Execution, ExecutionOptions};

use super::node::{Node, NodeDocument};
use super::outcome::RealizedOutcome;
use super::prototype::{self, Prototype};

/// Save form of a force.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceDocument {
    /// Unique id within the mission.
    pub id: String,
    /// Key unique within the mission.
    pub local_key: String,
    /// Display name.
    pub name: String,
    /// Display color.
    #[serde(default = "default_color")]
    pub color: String,
    /// Starting resource pool.
    pub initial_resources: u64,
    /// One node per prototype.
    pub nodes: Vec<NodeDocument>,
}

fn default_color() -> String {
    "#ffffff".to_string()
}

/// One entry in a force's output log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    /// Unique output id.
    pub id: String,
    /// Force the output was sent to.
    pub force_id: String,
    /// Prefix shown before the message.
    pub prefix: String,
    /// Message body.
    pub message: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

/// Result of a block status change.
#[derive(Debug, Default)]
pub struct BlockUpdate {
    /// Nodes whose flag changed, starting with the target.
    pub changed: Vec<String>,
    /// Executions aborted by the block.
    pub aborted: Vec<(Execution, RealizedOutcome)>,
}

/// A realized force.
#[derive(Debug, Clone)]
pub struct Force {
    /// Unique id within the mission.
    pub id: String,
    /// Key unique within the mission.
    pub local_key: String,
    /// Display name.
    pub name: String,
    /// Display color.
    pub color: String,
    /// Starting resource pool.
    pub initial_resources: u64,
    /// Resources left in the pool.
    pub resources_remaining: u64,
    /// Nodes keyed by id, in declaration order.
    pub nodes: IndexMap<String, Node>,
    /// Output log, oldest first.
    pub outputs: Vec<Output>,
}

impl Force {
    /// Builds a force, its nodes, and the node links implied by `prototypes`.
    ///
    /// The document must already have passed mission validation; nodes whose
    /// prototype has no parent, or whose parent slot has no node, are treated
    /// as top-level.
    #[must_use]
    pub fn from_document(doc: ForceDocument, mission_seed: &str, prototypes: &[Prototype]) -> Self {
        let initial_resources = doc.initial_resources;
        let mut nodes: IndexMap<String, Node> = doc
            .nodes
            .into_iter()
            .map(|n| {
                let node = Node::from_document(n, mission_seed, initial_resources);
                (node.id.clone(), node)
            })
            .collect();

        let by_prototype: HashMap<String, String> = nodes
            .values()
            .map(|n| (n.prototype_id.clone(), n.id.clone()))
            .collect();
        for node in nodes.values_mut() {
            let Some(proto) = prototypes.iter().find(|p| p.id == node.prototype_id) else {
                continue;
            };
            node.parent_id = proto
                .parent_id
                .as_ref()
                .and_then(|parent| by_prototype.get(parent).cloned());
            node.child_ids = prototype::child_ids(prototypes, &proto.id)
                .into_iter()
                .filter_map(|child| by_prototype.get(child).cloned())
                .collect();
        }

        Self {
            id: doc.id,
            local_key: doc.local_key,
            name: doc.name,
            color: doc.color,
            initial_resources,
            resources_remaining: initial_resources,
            nodes,
            outputs: Vec::new(),
        }
    }

    /// Returns the save form. Pool, outputs and node runtime state are not saved.
    #[must_use]
    pub fn to_document(&self) -> ForceDocument {
        ForceDocument {
            id: self.id.clone(),
            local_key: self.local_key.clone(),
            name: self.name.clone(),
            color: self.color.clone(),
            initial_resources: self.initial_resources,
            nodes: self.nodes.values().map(Node::to_document).collect(),
        }
    }

    /// Looks up a node by id.
    #[must_use]
    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    /// Looks up a node by id, mutably.
    pub fn node_mut(&mut self, node_id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(node_id)
    }

    /// Looks up a node by its local key.
    #[must_use]
    pub fn node_by_key(&self, local_key: &str) -> Option<&Node> {
        self.nodes.values().find(|n| n.local_key == local_key)
    }

    /// Whether the node is visible: top-level, or its parent is open.
    #[must_use]
    pub fn is_revealed(&self, node_id: &str) -> bool {
        self.nodes.get(node_id).is_some_and(|node| {
            node.parent_id()
                .is_none_or(|parent| self.nodes.get(parent).is_some_and(Node::is_opened))
        })
    }

    /// Revealed nodes in declaration order.
    pub fn revealed_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|n| self.is_revealed(&n.id))
    }

    /// Executions currently in flight.
    pub fn executions(&self) -> impl Iterator<Item = &Execution> {
        self.nodes.values().filter_map(Node::execution)
    }

    /// Starts an execution, charging the pool unless `opts` waives the cost.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::NodeNotFound`] if the node is not part of this
    /// force, [`ExecutionError::InsufficientResources`] if the pool cannot
    /// cover the cost, or any node-level [`ExecutionError`]. Neither the pool
    /// nor the outcome queue changes on error.
    pub fn execute(
        &mut self,
        node_id: &str,
        action_id: &str,
        opts: &ExecutionOptions,
    ) -> Result<Execution, RequestError> {
        let revealed = self.is_revealed(node_id);
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| RequestError::NodeNotFound(node_id.to_string()))?;
        let cost = node.check_execution(action_id, revealed)?.resource_cost;
        let charge = !opts.ignores_cost();
        if charge && cost > self.resources_remaining {
            return Err(ExecutionError::InsufficientResources {
                required: cost,
                available: self.resources_remaining,
            }
            .into());
        }
        let execution = node.begin_execution(&self.id, action_id, revealed, opts)?;
        if charge {
            self.resources_remaining -= cost;
        }
        Ok(execution)
    }

    /// Completes an execution. Stale ids yield `None`.
    pub fn complete_execution(
        &mut self,
        node_id: &str,
        execution_id: &str,
        now_ms: i64,
    ) -> Option<RealizedOutcome> {
        self.nodes
            .get_mut(node_id)?
            .finish_execution(execution_id, now_ms)
    }

    /// Sets a node's block flag and propagates it through the open subtree.
    ///
    /// Blocking aborts the node's in-flight execution. Children are visited
    /// only while the parent is open; a closed child is skipped along with
    /// everything under it. An unchanged target yields an empty update.
    pub fn update_block_status(&mut self, node_id: &str, blocked: bool, now_ms: i64) -> BlockUpdate {
        let mut update = BlockUpdate::default();
        let mut pending = vec![node_id.to_string()];
        while let Some(id) = pending.pop() {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            if !node.set_blocked(blocked) {
                continue;
            }
            if blocked && let Some(aborted) = node.abort_execution(now_ms) {
                update.aborted.push(aborted);
            }
            let children = if node.is_opened() {
                node.child_ids().to_vec()
            } else {
                Vec::new()
            };
            for child in children.into_iter().rev() {
                if self.nodes.get(&child).is_some_and(Node::is_opened) {
                    pending.push(child);
                } else {
                    debug!(node_id = %child, "closed child skipped during block propagation");
                }
            }
            update.changed.push(id);
        }
        update
    }

    /// Aborts a single node's execution.
    pub fn abort_execution(
        &mut self,
        node_id: &str,
        now_ms: i64,
    ) -> Option<(Execution, RealizedOutcome)> {
        self.nodes.get_mut(node_id)?.abort_execution(now_ms)
    }

    /// Aborts every in-flight execution.
    pub fn abort_all(&mut self, now_ms: i64) -> Vec<(Execution, RealizedOutcome)> {
        self.nodes
            .values_mut()
            .filter_map(|n| n.abort_execution(now_ms))
            .collect()
    }

    /// Appends an entry to the output log.
    pub fn push_output(&mut self, prefix: &str, message: &str, now_ms: i64) -> Output {
        let output = Output {
            id: uuid::Uuid::new_v4().to_string(),
            force_id: self.id.clone(),
            prefix: prefix.to_string(),
            message: message.to_string(),
            timestamp: now_ms,
        };
        self.outputs.push(output.clone());
        output
    }

    /// Adds `delta` to the pool, floored at zero. Returns the new pool.
    pub const fn modify_resource_pool(&mut self, delta: i64) -> u64 {
        self.resources_remaining = self.resources_remaining.saturating_add_signed(delta);
        self.resources_remaining
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::mission::node::tests::node_doc;

    pub(crate) fn prototypes() -> Vec<Prototype> {
        let proto = |id: &str, parent: Option<&str>| Prototype {
            id: id.into(),
            parent_id: parent.map(Into::into),
            depth_padding: 0,
        };
        // root -> mid -> leaf, root -> side
        vec![
            proto("p-root", None),
            proto("p-mid", Some("p-root")),
            proto("p-leaf", Some("p-mid")),
            proto("p-side", Some("p-root")),
        ]
    }

    pub(crate) fn force_doc(id: &str, resources: u64) -> ForceDocument {
        ForceDocument {
            id: id.into(),
            local_key: id.into(),
            name: format!("Force {id}"),
            color: default_color(),
            initial_resources: resources,
            nodes: vec![
                node_doc(&format!("{id}-root"), "p-root", false),
                node_doc(&format!("{id}-mid"), "p-mid", false),
                node_doc(&format!("{id}-leaf"), "p-leaf", true),
                node_doc(&format!("{id}-side"), "p-side", true),
            ],
        }
    }

    fn force() -> Force {
        Force::from_document(force_doc("red", 10), "seed", &prototypes())
    }

    fn opts() -> ExecutionOptions {
        ExecutionOptions::default()
    }

    #[test]
    fn links_follow_prototypes() {
        let force = force();
        let root = force.node("red-root").unwrap();
        assert_eq!(root.parent_id(), None);
        assert_eq!(root.child_ids(), ["red-mid", "red-side"]);
        assert_eq!(force.node("red-leaf").unwrap().parent_id(), Some("red-mid"));
    }

    #[test]
    fn reveal_follows_parent_open() {
        let mut force = force();
        assert!(force.is_revealed("red-root"));
        assert!(!force.is_revealed("red-mid"));
        force.node_mut("red-root").unwrap().set_opened(true);
        assert!(force.is_revealed("red-mid"));
        assert!(force.is_revealed("red-side"));
        assert!(!force.is_revealed("red-leaf"));
        assert_eq!(force.revealed_nodes().count(), 3);
    }

    #[test]
    fn execute_charges_pool() {
        let mut force = force();
        force.node_mut("red-root").unwrap().set_opened(true);
        let exec = force.execute("red-side", "red-side-a", &opts()).unwrap();
        assert_eq!(exec.force_id, "red");
        assert_eq!(force.resources_remaining, 9);
    }

    #[test]
    fn insufficient_resources_consumes_nothing() {
        let mut force = force();
        force.node_mut("red-root").unwrap().set_opened(true);
        force.resources_remaining = 0;
        let before = force.node("red-side").unwrap().actions["red-side-a"].remaining_outcomes();
        let err = force.execute("red-side", "red-side-a", &opts()).unwrap_err();
        assert_eq!(
            err,
            RequestError::Execution(ExecutionError::InsufficientResources {
                required: 1,
                available: 0
            })
        );
        let after = force.node("red-side").unwrap().actions["red-side-a"].remaining_outcomes();
        assert_eq!(before, after);
        assert!(!force.node("red-side").unwrap().is_executing());
    }

    #[test]
    fn zero_cost_cheat_skips_charge() {
        let mut force = force();
        force.node_mut("red-root").unwrap().set_opened(true);
        force.resources_remaining = 0;
        let mut o = opts();
        o.cheats.zero_cost = true;
        force.execute("red-side", "red-side-a", &o).unwrap();
        assert_eq!(force.resources_remaining, 0);
    }

    #[test]
    fn unknown_node_is_not_found() {
        let mut force = force();
        assert_eq!(
            force.execute("nope", "a", &opts()).unwrap_err(),
            RequestError::NodeNotFound("nope".into())
        );
    }

    #[test]
    fn block_propagates_through_open_children_only() {
        let mut force = force();
        force.node_mut("red-root").unwrap().set_opened(true);
        force.node_mut("red-mid").unwrap().set_opened(true);
        // red-side stays closed

        let update = force.update_block_status("red-root", true, 0);
        assert_eq!(update.changed, vec!["red-root", "red-mid"]);
        assert!(force.node("red-mid").unwrap().is_blocked());
        assert!(!force.node("red-side").unwrap().is_blocked());
        assert!(!force.node("red-leaf").unwrap().is_blocked());

        let again = force.update_block_status("red-root", true, 0);
        assert!(again.changed.is_empty());

        let unblock = force.update_block_status("red-root", false, 0);
        assert_eq!(unblock.changed, vec!["red-root", "red-mid"]);
    }

    #[test]
    fn block_aborts_in_flight_execution() {
        let mut force = force();
        force.node_mut("red-root").unwrap().set_opened(true);
        let exec = force.execute("red-side", "red-side-a", &opts()).unwrap();
        let update = force.update_block_status("red-side", true, 5);
        assert_eq!(update.aborted.len(), 1);
        assert_eq!(update.aborted[0].0.id, exec.id);
        assert!(update.aborted[0].1.aborted);
        assert!(!force.node("red-side").unwrap().is_executing());
    }

    #[test]
    fn queue_runs_out_after_affordable_count() {
        // Seed "abc", cost 1 and a pool of 2 give exactly two outcomes.
        let mut force = Force::from_document(force_doc("red", 2), "abc", &prototypes());
        force.node_mut("red-root").unwrap().set_opened(true);
        let o = ExecutionOptions {
            infinite_resources: true,
            ..ExecutionOptions::default()
        };
        assert_eq!(force.node("red-side").unwrap().actions["red-side-a"].remaining_outcomes(), 2);

        for now in [0, 10] {
            let exec = force.execute("red-side", "red-side-a", &o).unwrap();
            force.complete_execution("red-side", &exec.id, now + 5).unwrap();
        }
        assert_eq!(
            force.execute("red-side", "red-side-a", &o).unwrap_err(),
            RequestError::Execution(ExecutionError::OutcomesExhausted("red-side-a".into()))
        );
        assert_eq!(force.node("red-side").unwrap().outcomes().len(), 2);
    }

    #[test]
    fn pool_modifier_floors_at_zero() {
        let mut force = force();
        assert_eq!(force.modify_resource_pool(5), 15);
        assert_eq!(force.modify_resource_pool(-100), 0);
    }

    #[test]
    fn outputs_are_logged() {
        let mut force = force();
        let out = force.push_output("HQ", "Proceed", 42);
        assert_eq!(out.force_id, "red");
        assert_eq!(force.outputs.len(), 1);
        assert_eq!(force.outputs[0].message, "Proceed");
    }
}
