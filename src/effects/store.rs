//! Key/value stores handed to effect scripts.
//!
//! A script sees two stores: one scoped to the session and its target
//! environment (cleared when the session resets), and one scoped to the
//! environment for the life of the process. Both are [`Store`] handles;
//! [`ScopedStores`] hands out one per environment id.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

/// Cheaply cloneable handle to a JSON key/value map.
#[derive(Debug, Clone, Default)]
pub struct Store {
    inner: Arc<DashMap<String, Value>>,
}

impl Store {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the value at `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.get(key).map(|v| v.value().clone())
    }

    /// Stores `value` at `key`, returning the previous value.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.inner.insert(key.into(), value)
    }

    /// Removes `key`, returning its value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.remove(key).map(|(_, v)| v)
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// One [`Store`] per environment id, created on first use.
#[derive(Debug, Default)]
pub struct ScopedStores {
    stores: DashMap<String, Store>,
}

impl ScopedStores {
    /// Creates an empty set of stores.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the store for `environment_id`, creating it if needed.
    #[must_use]
    pub fn for_environment(&self, environment_id: &str) -> Store {
        self.stores
            .entry(environment_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Drops every store. Handles already given out keep their data but are
    /// no longer reachable through this set.
    pub fn clear(&self) {
        self.stores.clear();
    }
}
