// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Engine configuration.

use serde::{Deserialize, Serialize};
use understory_mutation::PropertyPath;

/// Listener buckets larger than this are logged as suspicious.
pub const DEFAULT_LISTENER_BUCKET_WARNING: usize = 50;

/// How contexts inside one call queue are ordered.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOrder {
    /// Run contexts in the order they were enqueued.
    Insertion,
    /// Run contexts by dependency priority, then insertion order.
    ///
    /// Priorities are recomputed from the dependency graph at the start of
    /// every queue. Objects absent from the graph sort last.
    #[default]
    DependencyPriority,
}

/// Configuration for an [`Engine`](crate::Engine).
///
/// All fields have defaults, so a partial document deserializes:
///
/// ```rust
/// use understory_recalc::{EngineConfig, ExecutionOrder};
///
/// let config: EngineConfig =
///     serde_json::from_str(r#"{ "execution_order": "insertion" }"#).unwrap();
/// assert_eq!(config.execution_order, ExecutionOrder::Insertion);
/// assert_eq!(config.alias_path.to_string(), "__.aliases");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Path, inside each object's data, of its alias list.
    pub alias_path: PropertyPath,
    /// Ordering of contexts within a call queue.
    pub execution_order: ExecutionOrder,
    /// Size above which a listener index bucket is reported with a warning.
    pub listener_bucket_warning: usize,
}

impl EngineConfig {
    /// Returns the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            alias_path: PropertyPath::root().child_key("__").child_key("aliases"),
            execution_order: ExecutionOrder::default(),
            listener_bucket_warning: DEFAULT_LISTENER_BUCKET_WARNING,
        }
    }

    /// Sets the alias path.
    #[must_use]
    pub fn with_alias_path(mut self, path: PropertyPath) -> Self {
        self.alias_path = path;
        self
    }

    /// Sets the execution order.
    #[must_use]
    pub fn with_execution_order(mut self, order: ExecutionOrder) -> Self {
        self.execution_order = order;
        self
    }

    /// Sets the listener bucket warning threshold.
    #[must_use]
    pub fn with_listener_bucket_warning(mut self, threshold: usize) -> Self {
        self.listener_bucket_warning = threshold;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.alias_path.to_string(), "__.aliases");
        assert_eq!(config.execution_order, ExecutionOrder::DependencyPriority);
        assert_eq!(config.listener_bucket_warning, 50);
    }

    #[test]
    fn rejects_unknown_fields_and_bad_paths() {
        assert!(serde_json::from_str::<EngineConfig>(r#"{ "bogus": 1 }"#).is_err());
        assert!(serde_json::from_str::<EngineConfig>(r#"{ "alias_path": "a..b" }"#).is_err());
    }

    #[test]
    fn builder_round_trip_through_json() {
        let config = EngineConfig::new()
            .with_alias_path(PropertyPath::parse("meta.names").unwrap())
            .with_execution_order(ExecutionOrder::Insertion)
            .with_listener_bucket_warning(8);
        let text = serde_json::to_string(&config).unwrap();
        assert_eq!(serde_json::from_str::<EngineConfig>(&text).unwrap(), config);
    }
}
