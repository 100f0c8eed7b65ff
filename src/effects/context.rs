//! The narrow surface an effect script runs against.
//!
//! [`EffectContext`] exposes a read-only mission, the effect's arguments,
//! the two scoped stores, resolvers for `self` and local-key addressing, and
//! mutators. Mutators never change the mission: they resolve their target,
//! fail if it cannot be found, and queue a [`Mutation`] the engine applies
//! after the script returns.

use serde::Serialize;
use serde_json::Value;

use crate::error::EffectError;
use crate::mission::{Action, Effect, Force, Mission, Node};

use super::store::Store;

/// Which action run, if any, fired the effect. Supplies `self` defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectSource {
    pub force_id: Option<String>,
    pub node_id: Option<String>,
    pub action_id: Option<String>,
}

impl EffectSource {
    /// Source of a session-triggered effect: no `self` entities.
    #[must_use]
    pub fn session() -> Self {
        Self::default()
    }

    /// Source of an execution-triggered effect.
    #[must_use]
    pub fn execution(force_id: &str, node_id: &str, action_id: &str) -> Self {
        Self {
            force_id: Some(force_id.to_string()),
            node_id: Some(node_id.to_string()),
            action_id: Some(action_id.to_string()),
        }
    }
}

/// A change requested by a script.
///
/// Ids were valid when queued; the engine checks them again against the
/// live mission before applying.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
#[serde(rename_all_fields = "camelCase")]
pub enum Mutation {
    SendOutput {
        force_id: String,
        prefix: String,
        message: String,
    },
    BlockStatus {
        force_id: String,
        node_id: String,
        blocked: bool,
    },
    OpenStatus {
        force_id: String,
        node_id: String,
        opened: bool,
    },
    SuccessChance {
        force_id: String,
        node_id: String,
        action_id: Option<String>,
        delta: f64,
    },
    ProcessTime {
        force_id: String,
        node_id: String,
        action_id: Option<String>,
        delta: i64,
    },
    ResourceCost {
        force_id: String,
        node_id: String,
        action_id: Option<String>,
        delta: i64,
    },
    ResourcePool {
        force_id: String,
        delta: i64,
    },
    FileAccess {
        file_id: String,
        force_id: String,
        granted: bool,
    },
}

/// Context for one script invocation.
pub struct EffectContext<'a> {
    mission: &'a Mission,
    effect: &'a Effect,
    source: &'a EffectSource,
    session_store: Store,
    environment_store: Store,
    now_ms: i64,
    mutations: Vec<Mutation>,
}

impl std::fmt::Debug for EffectContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectContext")
            .field("effect", &self.effect.id)
            .field("source", &self.source)
            .field("mutations", &self.mutations.len())
            .finish_non_exhaustive()
    }
}

impl<'a> EffectContext<'a> {
    /// Creates a context.
    #[must_use]
    pub const fn new(
        mission: &'a Mission,
        effect: &'a Effect,
        source: &'a EffectSource,
        session_store: Store,
        environment_store: Store,
        now_ms: i64,
    ) -> Self {
        Self {
            mission,
            effect,
            source,
            session_store,
            environment_store,
            now_ms,
            mutations: Vec::new(),
        }
    }

    // ========================================================================
    // Read access
    // ========================================================================

    /// The mission as it was when the script started.
    #[must_use]
    pub const fn mission(&self) -> &'a Mission {
        self.mission
    }

    /// The effect being applied.
    #[must_use]
    pub const fn effect(&self) -> &'a Effect {
        self.effect
    }

    /// The action run that fired the effect, if any.
    #[must_use]
    pub const fn source(&self) -> &'a EffectSource {
        self.source
    }

    /// Store shared by this session's invocations of the environment.
    #[must_use]
    pub const fn session_store(&self) -> &Store {
        &self.session_store
    }

    /// Store shared by every session's invocations of the environment.
    #[must_use]
    pub const fn environment_store(&self) -> &Store {
        &self.environment_store
    }

    /// Current time in epoch milliseconds.
    #[must_use]
    pub const fn now_ms(&self) -> i64 {
        self.now_ms
    }

    /// Mutations queued so far.
    #[must_use]
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    /// Consumes the context, returning its queued mutations.
    #[must_use]
    pub fn into_mutations(self) -> Vec<Mutation> {
        self.mutations
    }

    // ========================================================================
    // Arguments
    // ========================================================================

    /// Raw argument value; null reads as absent.
    #[must_use]
    pub fn arg(&self, key: &str) -> Option<&'a Value> {
        self.effect.arg(key)
    }

    /// Optional string argument.
    ///
    /// # Errors
    ///
    /// Returns [`EffectError::InvalidArgument`] if present but not a string.
    pub fn opt_str(&self, key: &str) -> Result<Option<&'a str>, EffectError> {
        self.arg(key)
            .map(|v| v.as_str().ok_or_else(|| invalid(key, "a string")))
            .transpose()
    }

    /// Required string argument.
    ///
    /// # Errors
    ///
    /// Returns an error if absent or not a string.
    pub fn require_str(&self, key: &str) -> Result<&'a str, EffectError> {
        self.opt_str(key)?
            .ok_or_else(|| EffectError::MissingArgument(key.to_string()))
    }

    /// Required boolean argument.
    ///
    /// # Errors
    ///
    /// Returns an error if absent or not a boolean.
    pub fn require_bool(&self, key: &str) -> Result<bool, EffectError> {
        self.arg(key)
            .ok_or_else(|| EffectError::MissingArgument(key.to_string()))?
            .as_bool()
            .ok_or_else(|| invalid(key, "a boolean"))
    }

    /// Required numeric argument.
    ///
    /// # Errors
    ///
    /// Returns an error if absent or not a number.
    pub fn require_f64(&self, key: &str) -> Result<f64, EffectError> {
        self.arg(key)
            .ok_or_else(|| EffectError::MissingArgument(key.to_string()))?
            .as_f64()
            .ok_or_else(|| invalid(key, "a number"))
    }

    /// Required integer argument.
    ///
    /// # Errors
    ///
    /// Returns an error if absent or not an integer.
    pub fn require_i64(&self, key: &str) -> Result<i64, EffectError> {
        self.arg(key)
            .ok_or_else(|| EffectError::MissingArgument(key.to_string()))?
            .as_i64()
            .ok_or_else(|| invalid(key, "an integer"))
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Resolves a force by local key, or the source force when `key` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`EffectError::Unresolved`] if nothing matches.
    pub fn resolve_force(&self, key: Option<&str>) -> Result<&'a Force, EffectError> {
        let force = match key {
            Some(key) => self.mission.force_by_key(key),
            None => self
                .source
                .force_id
                .as_deref()
                .and_then(|id| self.mission.force(id)),
        };
        force.ok_or_else(|| unresolved("force", key))
    }

    /// Resolves a node by force and node local keys, each defaulting to the source.
    ///
    /// # Errors
    ///
    /// Returns [`EffectError::Unresolved`] if either cannot be found.
    pub fn resolve_node(
        &self,
        force_key: Option<&str>,
        node_key: Option<&str>,
    ) -> Result<(&'a Force, &'a Node), EffectError> {
        let force = self.resolve_force(force_key)?;
        let node = match node_key {
            Some(key) => force.node_by_key(key),
            None => self
                .source
                .node_id
                .as_deref()
                .and_then(|id| force.node(id)),
        };
        node.map(|n| (force, n))
            .ok_or_else(|| unresolved("node", node_key))
    }

    /// Resolves an action on `node` by local key, or the source action.
    ///
    /// # Errors
    ///
    /// Returns [`EffectError::Unresolved`] if nothing matches.
    pub fn resolve_action(
        &self,
        node: &'a Node,
        action_key: Option<&str>,
    ) -> Result<&'a Action, EffectError> {
        let action = match action_key {
            Some(key) => node.actions.values().find(|a| a.local_key == key),
            None => self
                .source
                .action_id
                .as_deref()
                .and_then(|id| node.actions.get(id)),
        };
        action.ok_or_else(|| unresolved("action", action_key))
    }

    /// Resolves the node and optional single action a modifier applies to.
    ///
    /// With an `actionKey` only that action is modified. With an explicit
    /// `forceKey` or `nodeKey` the whole node is. With neither, the source
    /// action is.
    fn resolve_modifier_scope(&self) -> Result<(String, String, Option<String>), EffectError> {
        let force_key = self.opt_str("forceKey")?;
        let node_key = self.opt_str("nodeKey")?;
        let action_key = self.opt_str("actionKey")?;
        let (force, node) = self.resolve_node(force_key, node_key)?;
        let action_id = if action_key.is_some() || (force_key.is_none() && node_key.is_none()) {
            Some(self.resolve_action(node, action_key)?.id.clone())
        } else {
            None
        };
        Ok((force.id.clone(), node.id.clone(), action_id))
    }

    // ========================================================================
    // Mutators
    // ========================================================================

    /// Queues an output message for a force.
    ///
    /// # Errors
    ///
    /// Returns [`EffectError::Unresolved`] if the force cannot be found.
    pub fn send_output(
        &mut self,
        force_key: Option<&str>,
        prefix: &str,
        message: &str,
    ) -> Result<(), EffectError> {
        let force = self.resolve_force(force_key)?;
        self.mutations.push(Mutation::SendOutput {
            force_id: force.id.clone(),
            prefix: prefix.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    /// Queues a block or unblock of a node.
    ///
    /// # Errors
    ///
    /// Returns [`EffectError::Unresolved`] if the node cannot be found.
    pub fn set_block_status(
        &mut self,
        force_key: Option<&str>,
        node_key: Option<&str>,
        blocked: bool,
    ) -> Result<(), EffectError> {
        let (force, node) = self.resolve_node(force_key, node_key)?;
        self.mutations.push(Mutation::BlockStatus {
            force_id: force.id.clone(),
            node_id: node.id.clone(),
            blocked,
        });
        Ok(())
    }

    /// Queues an open or close of a node.
    ///
    /// # Errors
    ///
    /// Returns [`EffectError::Unresolved`] if the node cannot be found.
    pub fn set_open_status(
        &mut self,
        force_key: Option<&str>,
        node_key: Option<&str>,
        opened: bool,
    ) -> Result<(), EffectError> {
        let (force, node) = self.resolve_node(force_key, node_key)?;
        self.mutations.push(Mutation::OpenStatus {
            force_id: force.id.clone(),
            node_id: node.id.clone(),
            opened,
        });
        Ok(())
    }

    /// Queues a success-chance change, scoped by the `forceKey`, `nodeKey`
    /// and `actionKey` arguments.
    ///
    /// # Errors
    ///
    /// Returns [`EffectError::Unresolved`] if the scope cannot be found.
    pub fn modify_success_chance(&mut self, delta: f64) -> Result<(), EffectError> {
        let (force_id, node_id, action_id) = self.resolve_modifier_scope()?;
        self.mutations.push(Mutation::SuccessChance {
            force_id,
            node_id,
            action_id,
            delta,
        });
        Ok(())
    }

    /// Queues a process-time change in milliseconds, scoped like
    /// [`Self::modify_success_chance`].
    ///
    /// # Errors
    ///
    /// Returns [`EffectError::Unresolved`] if the scope cannot be found.
    pub fn modify_process_time(&mut self, delta: i64) -> Result<(), EffectError> {
        let (force_id, node_id, action_id) = self.resolve_modifier_scope()?;
        self.mutations.push(Mutation::ProcessTime {
            force_id,
            node_id,
            action_id,
            delta,
        });
        Ok(())
    }

    /// Queues a resource-cost change, scoped like [`Self::modify_success_chance`].
    ///
    /// # Errors
    ///
    /// Returns [`EffectError::Unresolved`] if the scope cannot be found.
    pub fn modify_resource_cost(&mut self, delta: i64) -> Result<(), EffectError> {
        let (force_id, node_id, action_id) = self.resolve_modifier_scope()?;
        self.mutations.push(Mutation::ResourceCost {
            force_id,
            node_id,
            action_id,
            delta,
        });
        Ok(())
    }

    /// Queues a change to a force's resource pool.
    ///
    /// # Errors
    ///
    /// Returns [`EffectError::Unresolved`] if the force cannot be found.
    pub fn modify_resource_pool(
        &mut self,
        force_key: Option<&str>,
        delta: i64,
    ) -> Result<(), EffectError> {
        let force = self.resolve_force(force_key)?;
        self.mutations.push(Mutation::ResourcePool {
            force_id: force.id.clone(),
            delta,
        });
        Ok(())
    }

    /// Queues a grant or revoke of file access for a force.
    ///
    /// # Errors
    ///
    /// Returns [`EffectError::Unresolved`] if the file or force cannot be found.
    pub fn set_file_access(
        &mut self,
        file_id: &str,
        force_key: Option<&str>,
        granted: bool,
    ) -> Result<(), EffectError> {
        if !self.mission.files.contains_key(file_id) {
            return Err(unresolved("file", Some(file_id)));
        }
        let force = self.resolve_force(force_key)?;
        self.mutations.push(Mutation::FileAccess {
            file_id: file_id.to_string(),
            force_id: force.id.clone(),
            granted,
        });
        Ok(())
    }
}

fn invalid(key: &str, expected: &'static str) -> EffectError {
    EffectError::InvalidArgument {
        key: key.to_string(),
        expected,
    }
}

fn unresolved(kind: &'static str, key: Option<&str>) -> EffectError {
    EffectError::Unresolved {
        kind,
        key: key.unwrap_or("self").to_string(),
    }
}
