//! Execution engine.
//!
//! An [`Execution`] is the ephemeral record of one action run on a node. It
//! carries the result resolved from the outcome it popped from the action's
//! queue, hidden from every serialized view, until the session's [`Scheduler`] fires its completion
//! timer or the execution is aborted.
//!
//! # Architecture
//!
//! - [`Execution`]: in-flight record with projected start and end
//! - [`ExecutionCheats`]: privileged overrides for cost, duration and result
//! - [`Scheduler`]: min-heap of due completions with deterministic cancellation

pub mod scheduler;

pub use scheduler::{Scheduler, TimerId};

use serde::{Deserialize, Serialize};

/// Overrides reserved for roles holding the `cheats` permission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionCheats {
    /// Skip the resource check and deduction.
    pub zero_cost: bool,
    /// Complete immediately instead of after the process time.
    pub instantaneous: bool,
    /// Force a successful result regardless of the drawn outcome.
    pub guaranteed_success: bool,
}

impl ExecutionCheats {
    /// Whether any override is set.
    #[must_use]
    pub const fn any(&self) -> bool {
        self.zero_cost || self.instantaneous || self.guaranteed_success
    }
}

/// Inputs to a single execution attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionOptions {
    /// Current time in epoch milliseconds.
    pub now_ms: i64,
    /// Session runs with unlimited force resources.
    pub infinite_resources: bool,
    /// Session completes every execution immediately.
    pub instantaneous: bool,
    /// Privileged overrides.
    pub cheats: ExecutionCheats,
}

impl ExecutionOptions {
    /// Whether the resource check and deduction are skipped.
    #[must_use]
    pub const fn ignores_cost(&self) -> bool {
        self.infinite_resources || self.cheats.zero_cost
    }

    /// Whether the execution completes immediately.
    #[must_use]
    pub const fn is_instantaneous(&self) -> bool {
        self.instantaneous || self.cheats.instantaneous
    }
}

/// An in-flight action run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    /// Unique execution id.
    pub id: String,
    /// Action being executed.
    pub action_id: String,
    /// Node the action belongs to.
    pub node_id: String,
    /// Force owning the node.
    pub force_id: String,
    /// Start time in epoch milliseconds.
    pub start: i64,
    /// Projected completion time in epoch milliseconds.
    pub end: i64,
    /// Whether the execution was aborted.
    pub aborted: bool,
    #[serde(skip)]
    pub(crate) successful: bool,
}

impl Execution {
    /// Time left until completion, in milliseconds, as of `now_ms`.
    #[must_use]
    pub fn remaining_ms(&self, now_ms: i64) -> u64 {
        u64::try_from(self.end.saturating_sub(now_ms)).unwrap_or(0)
    }

    /// Total duration of the run in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        u64::try_from(self.end.saturating_sub(self.start)).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution(start: i64, end: i64) -> Execution {
        Execution {
            id: "x1".into(),
            action_id: "a1".into(),
            node_id: "n1".into(),
            force_id: "f1".into(),
            start,
            end,
            aborted: false,
            successful: true,
        }
    }

    #[test]
    fn remaining_time_saturates() {
        let exec = execution(1_000, 3_000);
        assert_eq!(exec.remaining_ms(1_500), 1_500);
        assert_eq!(exec.remaining_ms(9_000), 0);
        assert_eq!(exec.duration_ms(), 2_000);
    }

    #[test]
    fn pending_outcome_is_never_serialized() {
        let json = serde_json::to_value(execution(0, 10)).unwrap();
        assert!(json.get("successful").is_none());
        assert_eq!(json["actionId"], "a1");
    }

    #[test]
    fn options_fold_cheats_and_config() {
        let mut opts = ExecutionOptions::default();
        assert!(!opts.ignores_cost());
        opts.cheats.zero_cost = true;
        assert!(opts.ignores_cost());
        assert!(!opts.is_instantaneous());
        opts.instantaneous = true;
        assert!(opts.is_instantaneous());
        assert!(opts.cheats.any());
    }
}
