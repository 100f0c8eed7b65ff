//! Realized nodes: reveal state, blocking, and the per-node execution slot.
//!
//! A node is `revealed` when it sits at the top of the structure or its
//! parent is open; that check needs the parent, so it lives on
//! [`Force`](super::force::Force). Everything local to one node (open,
//! blocked, the single in-flight execution, outcome history) lives here.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ExecutionError;
use crate::execution::{Execution, ExecutionOptions};

use super::action::{Action, ActionDocument};
use super::outcome::RealizedOutcome;

/// Save form of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDocument {
    /// Unique id within the mission.
    pub id: String,
    /// Structural slot this node realizes.
    pub prototype_id: String,
    /// Key unique within the owning force.
    pub local_key: String,
    /// Display name.
    pub name: String,
    /// Description shown to participants.
    #[serde(default)]
    pub description: String,
    /// Display color.
    #[serde(default = "default_color")]
    pub color: String,
    /// Text shown before executing.
    #[serde(default)]
    pub pre_execution_text: String,
    /// Whether the node is opened by executing actions.
    #[serde(default)]
    pub executable: bool,
    /// Whether the node represents a device.
    #[serde(default)]
    pub device: bool,
    /// Actions available on the node.
    #[serde(default)]
    pub actions: Vec<ActionDocument>,
}

fn default_color() -> String {
    "#ffffff".to_string()
}

/// Execution status derived from the in-flight slot and the outcome history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionState {
    /// No execution has completed.
    Unexecuted,
    /// An execution is in flight.
    Executing,
    /// The latest execution succeeded.
    Success,
    /// The latest execution failed or was aborted.
    Failure,
}

/// A realized prototype instance within one force.
#[derive(Debug, Clone)]
pub struct Node {
    /// Unique id within the mission.
    pub id: String,
    /// Structural slot this node realizes.
    pub prototype_id: String,
    /// Key unique within the owning force.
    pub local_key: String,
    /// Display name.
    pub name: String,
    /// Description shown to participants.
    pub description: String,
    /// Display color.
    pub color: String,
    /// Text shown before executing.
    pub pre_execution_text: String,
    /// Whether the node is opened by executing actions.
    pub executable: bool,
    /// Whether the node represents a device.
    pub device: bool,
    /// Actions keyed by id, in declaration order.
    pub actions: IndexMap<String, Action>,
    pub(crate) parent_id: Option<String>,
    pub(crate) child_ids: Vec<String>,
    opened: bool,
    blocked: bool,
    execution: Option<Execution>,
    outcomes: Vec<RealizedOutcome>,
}

impl Node {
    /// Builds a node and its actions. Parent and child links are wired by the force.
    #[must_use]
    pub fn from_document(doc: NodeDocument, mission_seed: &str, initial_resources: u64) -> Self {
        let actions = doc
            .actions
            .into_iter()
            .map(|a| {
                let action = Action::from_document(a, mission_seed, initial_resources);
                (action.id.clone(), action)
            })
            .collect();
        Self {
            id: doc.id,
            prototype_id: doc.prototype_id,
            local_key: doc.local_key,
            name: doc.name,
            description: doc.description,
            color: doc.color,
            pre_execution_text: doc.pre_execution_text,
            executable: doc.executable,
            device: doc.device,
            actions,
            parent_id: None,
            child_ids: Vec::new(),
            opened: false,
            blocked: false,
            execution: None,
            outcomes: Vec::new(),
        }
    }

    /// Returns the save form of this node. Runtime state is not saved.
    #[must_use]
    pub fn to_document(&self) -> NodeDocument {
        NodeDocument {
            id: self.id.clone(),
            prototype_id: self.prototype_id.clone(),
            local_key: self.local_key.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            color: self.color.clone(),
            pre_execution_text: self.pre_execution_text.clone(),
            executable: self.executable,
            device: self.device,
            actions: self.actions.values().map(Action::to_document).collect(),
        }
    }

    /// Parent node id, `None` at the top of the structure.
    #[must_use]
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    /// Child node ids in structural order.
    #[must_use]
    pub fn child_ids(&self) -> &[String] {
        &self.child_ids
    }

    /// Whether the node has been opened.
    #[must_use]
    pub const fn is_opened(&self) -> bool {
        self.opened
    }

    /// Whether the node is blocked.
    #[must_use]
    pub const fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Whether an execution is in flight.
    #[must_use]
    pub const fn is_executing(&self) -> bool {
        self.execution.is_some()
    }

    /// The in-flight execution, if any.
    #[must_use]
    pub const fn execution(&self) -> Option<&Execution> {
        self.execution.as_ref()
    }

    /// Outcome history, oldest first.
    #[must_use]
    pub fn outcomes(&self) -> &[RealizedOutcome] {
        &self.outcomes
    }

    /// Whether the node can be opened directly (non-executable and still closed).
    #[must_use]
    pub const fn is_openable(&self) -> bool {
        !self.executable && !self.opened
    }

    /// Derived execution status.
    #[must_use]
    pub fn execution_state(&self) -> ExecutionState {
        if self.execution.is_some() {
            return ExecutionState::Executing;
        }
        match self.outcomes.last() {
            None => ExecutionState::Unexecuted,
            Some(o) if o.successful => ExecutionState::Success,
            Some(_) => ExecutionState::Failure,
        }
    }

    /// Sets the open flag. Returns `false` when already in the requested state.
    pub fn set_opened(&mut self, opened: bool) -> bool {
        if self.opened == opened {
            debug!(node_id = %self.id, opened, "node open state unchanged");
            return false;
        }
        self.opened = opened;
        true
    }

    /// Sets the block flag. Returns `false` when already in the requested state.
    ///
    /// Propagation to descendants and aborting the in-flight execution are
    /// driven by [`Force::update_block_status`](super::force::Force::update_block_status).
    pub(crate) fn set_blocked(&mut self, blocked: bool) -> bool {
        if self.blocked == blocked {
            debug!(node_id = %self.id, blocked, "node block state unchanged");
            return false;
        }
        self.blocked = blocked;
        true
    }

    /// Validates that `action_id` could start on this node right now.
    ///
    /// `revealed` comes from the owning force, which needs the parent.
    ///
    /// # Errors
    ///
    /// Returns an [`ExecutionError`] if the node is not executable, not
    /// revealed, blocked, already executing, or if the action is unknown.
    pub(crate) fn check_execution(
        &self,
        action_id: &str,
        revealed: bool,
    ) -> Result<&Action, ExecutionError> {
        if !self.executable {
            return Err(ExecutionError::NotExecutable(self.id.clone()));
        }
        if !revealed {
            return Err(ExecutionError::NotRevealed(self.id.clone()));
        }
        if self.blocked {
            return Err(ExecutionError::Blocked(self.id.clone()));
        }
        if self.execution.is_some() {
            return Err(ExecutionError::AlreadyExecuting(self.id.clone()));
        }
        self.actions
            .get(action_id)
            .ok_or_else(|| ExecutionError::ActionNotFound(action_id.to_string()))
    }

    /// Starts an execution of `action_id`.
    ///
    /// Resource accounting is the force's job; this validates the node and
    /// consumes an outcome.
    ///
    /// # Errors
    ///
    /// Returns every error of [`Node::check_execution`], plus
    /// [`ExecutionError::OutcomesExhausted`] when the queue is empty. Nothing
    /// is consumed on error.
    pub(crate) fn begin_execution(
        &mut self,
        force_id: &str,
        action_id: &str,
        revealed: bool,
        opts: &ExecutionOptions,
    ) -> Result<Execution, ExecutionError> {
        self.check_execution(action_id, revealed)?;
        let action = self
            .actions
            .get_mut(action_id)
            .ok_or_else(|| ExecutionError::ActionNotFound(action_id.to_string()))?;
        let outcome = action
            .take_outcome()
            .ok_or_else(|| ExecutionError::OutcomesExhausted(action_id.to_string()))?;
        let successful = opts.cheats.guaranteed_success || outcome.succeeds(action.success_chance);

        let duration = if opts.is_instantaneous() {
            0
        } else {
            i64::try_from(action.process_time).unwrap_or(i64::MAX)
        };
        let execution = Execution {
            id: uuid::Uuid::new_v4().to_string(),
            action_id: action.id.clone(),
            node_id: self.id.clone(),
            force_id: force_id.to_string(),
            start: opts.now_ms,
            end: opts.now_ms.saturating_add(duration),
            aborted: false,
            successful,
        };
        self.execution = Some(execution.clone());
        Ok(execution)
    }

    /// Completes the in-flight execution if it matches `execution_id`.
    ///
    /// A successful run of an `opens_node` action opens the node.
    pub(crate) fn finish_execution(
        &mut self,
        execution_id: &str,
        now_ms: i64,
    ) -> Option<RealizedOutcome> {
        if self.execution.as_ref().is_none_or(|e| e.id != execution_id) {
            return None;
        }
        let execution = self.execution.take()?;
        let outcome = RealizedOutcome {
            action_id: execution.action_id.clone(),
            node_id: self.id.clone(),
            successful: execution.successful,
            aborted: false,
            timestamp: now_ms,
        };
        let opens = self
            .actions
            .get(&execution.action_id)
            .is_some_and(|a| a.opens_node);
        if outcome.successful && opens {
            self.opened = true;
        }
        self.outcomes.push(outcome.clone());
        Some(outcome)
    }

    /// Aborts the in-flight execution.
    ///
    /// Returns the aborted execution and its synthesized failed outcome, or
    /// `None` (and changes nothing) when the node is idle.
    pub(crate) fn abort_execution(&mut self, now_ms: i64) -> Option<(Execution, RealizedOutcome)> {
        let mut execution = self.execution.take()?;
        execution.aborted = true;
        let outcome = RealizedOutcome {
            action_id: execution.action_id.clone(),
            node_id: self.id.clone(),
            successful: false,
            aborted: true,
            timestamp: now_ms,
        };
        self.outcomes.push(outcome.clone());
        Some((execution, outcome))
    }
}
