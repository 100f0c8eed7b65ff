//! Actions: the executable operations on a node.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::effect::Effect;
use super::outcome::{self, PotentialOutcome};

/// Save form of an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDocument {
    /// Unique id within the mission.
    pub id: String,
    /// Key unique within the owning node.
    pub local_key: String,
    /// Display name.
    pub name: String,
    /// Description shown to participants.
    #[serde(default)]
    pub description: String,
    /// Execution duration in milliseconds.
    pub process_time: u64,
    /// Probability in `[0, 1]` that an execution succeeds.
    pub success_chance: f64,
    /// Resources consumed from the force pool per execution.
    pub resource_cost: u64,
    /// Whether a successful execution opens the node.
    #[serde(default = "default_opens_node")]
    pub opens_node: bool,
    /// Text shown after a successful execution.
    #[serde(default)]
    pub post_execution_success_text: String,
    /// Text shown after a failed execution.
    #[serde(default)]
    pub post_execution_failure_text: String,
    /// Execution-triggered effects.
    #[serde(default)]
    pub effects: Vec<Effect>,
}

const fn default_opens_node() -> bool {
    true
}

/// A realized action with its pre-generated outcome queue.
#[derive(Debug, Clone)]
pub struct Action {
    /// Unique id within the mission.
    pub id: String,
    /// Key unique within the owning node.
    pub local_key: String,
    /// Display name.
    pub name: String,
    /// Description shown to participants.
    pub description: String,
    /// Execution duration in milliseconds.
    pub process_time: u64,
    /// Probability in `[0, 1]` that an execution succeeds.
    pub success_chance: f64,
    /// Resources consumed per execution.
    pub resource_cost: u64,
    /// Whether a successful execution opens the node.
    pub opens_node: bool,
    /// Text shown after a successful execution.
    pub post_execution_success_text: String,
    /// Text shown after a failed execution.
    pub post_execution_failure_text: String,
    /// Execution-triggered effects.
    pub effects: Vec<Effect>,
    outcomes: VecDeque<PotentialOutcome>,
}

impl Action {
    /// Builds an action and draws its outcome queue.
    ///
    /// `initial_resources` is the owning force's starting pool, which bounds
    /// how many times the action can ever be paid for.
    #[must_use]
    pub fn from_document(doc: ActionDocument, mission_seed: &str, initial_resources: u64) -> Self {
        let count = outcome::outcome_count(initial_resources, doc.resource_cost);
        let outcomes = outcome::generate_outcomes(mission_seed, &doc.id, count);
        Self {
            id: doc.id,
            local_key: doc.local_key,
            name: doc.name,
            description: doc.description,
            process_time: doc.process_time,
            success_chance: doc.success_chance,
            resource_cost: doc.resource_cost,
            opens_node: doc.opens_node,
            post_execution_success_text: doc.post_execution_success_text,
            post_execution_failure_text: doc.post_execution_failure_text,
            effects: doc.effects,
            outcomes,
        }
    }

    /// Returns the save form of this action. The outcome queue is not saved.
    #[must_use]
    pub fn to_document(&self) -> ActionDocument {
        ActionDocument {
            id: self.id.clone(),
            local_key: self.local_key.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            process_time: self.process_time,
            success_chance: self.success_chance,
            resource_cost: self.resource_cost,
            opens_node: self.opens_node,
            post_execution_success_text: self.post_execution_success_text.clone(),
            post_execution_failure_text: self.post_execution_failure_text.clone(),
            effects: self.effects.clone(),
        }
    }

    /// Number of outcomes left in the queue.
    #[must_use]
    pub fn remaining_outcomes(&self) -> usize {
        self.outcomes.len()
    }

    /// Pops the next pre-generated outcome.
    pub(crate) fn take_outcome(&mut self) -> Option<PotentialOutcome> {
        self.outcomes.pop_front()
    }

    /// Adds `delta` to the success chance, clamped to `[0, 1]`.
    ///
    /// The queued draws are kept; the new chance decides every execution
    /// started from now on.
    pub fn modify_success_chance(&mut self, delta: f64) {
        self.success_chance = (self.success_chance + delta).clamp(0.0, 1.0);
    }

    /// Adds `delta_ms` to the process time, floored at zero.
    pub const fn modify_process_time(&mut self, delta_ms: i64) {
        self.process_time = self.process_time.saturating_add_signed(delta_ms);
    }

    /// Adds `delta` to the resource cost, floored at zero.
    pub const fn modify_resource_cost(&mut self, delta: i64) {
        self.resource_cost = self.resource_cost.saturating_add_signed(delta);
    }
}
