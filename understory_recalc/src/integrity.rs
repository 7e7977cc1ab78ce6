// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Integrity registry: cache-validity signatures keyed by name.

use std::collections::BTreeSet;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::EngineError;
use crate::event::IntegrityEvent;
use crate::reference::ObjectId;

/// The last known-good signature of a cached computation.
///
/// Keys are globally unique, conventionally `"{object id}::{path}"` (see
/// [`MutableObject::integrity_key`](crate::MutableObject::integrity_key)).
/// The value is opaque to the engine; only equality matters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityEntry {
    /// Unique key naming the computation.
    pub key: String,
    /// Signature of the computation's inputs.
    pub value: Value,
}

impl IntegrityEntry {
    /// Creates an entry.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Keyed table of [`IntegrityEntry`] values.
///
/// Mutating operations return the [`IntegrityEvent`] describing the change
/// instead of emitting it; the [`Engine`](crate::Engine) tears down bound
/// listeners and then emits it.
///
/// The registry also indexes which objects depend on which keys, in both
/// directions, so that removing an object cascades to its entries.
///
/// # Example
///
/// ```rust
/// use understory_recalc::{IntegrityEntry, IntegrityEvent, IntegrityRegistry, ObjectId};
///
/// let mut registry = IntegrityRegistry::new();
/// let owner = ObjectId::new("11290");
///
/// registry.upsert(IntegrityEntry::new("11290::level", "parent + 1"));
/// registry.index("11290::level", &owner);
///
/// // Same value: nothing to report.
/// assert!(registry.upsert(IntegrityEntry::new("11290::level", "parent + 1")).is_none());
///
/// // New value: listeners bound to the old one must go.
/// let event = registry.upsert(IntegrityEntry::new("11290::level", "parent + 2"));
/// assert!(matches!(event, Some(IntegrityEvent::Updated { .. })));
///
/// let removed = registry.remove_by_object_id(&owner);
/// assert_eq!(removed.len(), 1);
/// assert!(registry.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct IntegrityRegistry {
    entries: HashMap<String, IntegrityEntry>,
    objects_by_key: HashMap<String, BTreeSet<ObjectId>>,
    keys_by_object: HashMap<ObjectId, BTreeSet<String>>,
}

impl IntegrityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a new entry.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateIntegrityEntry`] if the key exists.
    pub fn add(&mut self, entry: IntegrityEntry) -> Result<IntegrityEvent, EngineError> {
        if self.entries.contains_key(&entry.key) {
            return Err(EngineError::DuplicateIntegrityEntry(entry.key));
        }
        debug!(key = %entry.key, value = %entry.value, "integrity entry added");
        self.entries.insert(entry.key.clone(), entry.clone());
        Ok(IntegrityEvent::Added(entry))
    }

    /// Replaces the value of an existing entry.
    ///
    /// Returns `None` when the value is unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownIntegrityEntry`] if the key is absent.
    pub fn update(&mut self, entry: IntegrityEntry) -> Result<Option<IntegrityEvent>, EngineError> {
        let Some(current) = self.entries.get_mut(&entry.key) else {
            return Err(EngineError::UnknownIntegrityEntry(entry.key));
        };
        if current.value == entry.value {
            return Ok(None);
        }
        debug!(key = %entry.key, from = %current.value, to = %entry.value, "integrity entry updated");
        let previous = core::mem::replace(&mut current.value, entry.value.clone());
        Ok(Some(IntegrityEvent::Updated { entry, previous }))
    }

    /// Adds the entry or updates it, whichever applies.
    pub fn upsert(&mut self, entry: IntegrityEntry) -> Option<IntegrityEvent> {
        let result = if self.entries.contains_key(&entry.key) {
            self.update(entry)
        } else {
            self.add(entry).map(Some)
        };
        // Both branches were guarded by the membership check above.
        result.ok().flatten()
    }

    /// Removes an entry and unbinds it from every object.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownIntegrityEntry`] if the key is absent.
    pub fn remove(&mut self, key: &str) -> Result<IntegrityEvent, EngineError> {
        let Some(entry) = self.entries.remove(key) else {
            return Err(EngineError::UnknownIntegrityEntry(key.to_owned()));
        };
        for object in self.objects_by_key.remove(key).unwrap_or_default() {
            if let Some(keys) = self.keys_by_object.get_mut(&object) {
                keys.remove(key);
                if keys.is_empty() {
                    self.keys_by_object.remove(&object);
                }
            }
        }
        debug!(key, "integrity entry removed");
        Ok(IntegrityEvent::Removed(entry))
    }

    /// Records that `object` depends on the entry at `key`.
    ///
    /// Returns `false` if the binding already existed.
    pub fn index(&mut self, key: &str, object: &ObjectId) -> bool {
        let inserted = self
            .objects_by_key
            .entry(key.to_owned())
            .or_default()
            .insert(object.clone());
        self.keys_by_object
            .entry(object.clone())
            .or_default()
            .insert(key.to_owned());
        inserted
    }

    /// Unbinds `object` from all of its keys.
    ///
    /// Entries left with no bound object are removed, and their removal
    /// events are returned in key order.
    pub fn remove_by_object_id(&mut self, object: &ObjectId) -> Vec<IntegrityEvent> {
        let mut events = Vec::new();
        for key in self.keys_by_object.remove(object).unwrap_or_default() {
            let orphaned = match self.objects_by_key.get_mut(&key) {
                Some(objects) => {
                    objects.remove(object);
                    objects.is_empty()
                }
                None => true,
            };
            if orphaned && let Ok(event) = self.remove(&key) {
                events.push(event);
            }
        }
        events
    }

    /// Returns the entry at `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&IntegrityEntry> {
        self.entries.get(key)
    }

    /// Returns `true` if `key` is registered.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the objects bound to `key`.
    pub fn objects_for(&self, key: &str) -> impl Iterator<Item = &ObjectId> + '_ {
        self.objects_by_key.get(key).into_iter().flatten()
    }

    /// Returns the keys bound to `object`.
    pub fn keys_for(&self, object: &ObjectId) -> impl Iterator<Item = &str> + '_ {
        self.keys_by_object
            .get(object)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(key: &str, value: &str) -> IntegrityEntry {
        IntegrityEntry::new(key, value)
    }

    #[test]
    fn add_rejects_duplicates() {
        let mut registry = IntegrityRegistry::new();
        assert!(matches!(
            registry.add(entry("k", "a")).unwrap(),
            IntegrityEvent::Added(_)
        ));
        assert!(matches!(
            registry.add(entry("k", "b")),
            Err(EngineError::DuplicateIntegrityEntry(key)) if key == "k"
        ));
        assert_eq!(registry.get("k").unwrap().value, json!("a"));
    }

    #[test]
    fn update_reports_previous_value() {
        let mut registry = IntegrityRegistry::new();
        registry.add(entry("k", "a")).unwrap();

        assert!(registry.update(entry("k", "a")).unwrap().is_none());
        match registry.update(entry("k", "b")).unwrap() {
            Some(IntegrityEvent::Updated { entry, previous }) => {
                assert_eq!(entry.value, json!("b"));
                assert_eq!(previous, json!("a"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            registry.update(entry("missing", "x")),
            Err(EngineError::UnknownIntegrityEntry(_))
        ));
    }

    #[test]
    fn remove_clears_both_indices() {
        let mut registry = IntegrityRegistry::new();
        let object = ObjectId::new("1");
        registry.upsert(entry("1::a", "x"));
        registry.index("1::a", &object);

        assert!(matches!(registry.remove("1::a").unwrap(), IntegrityEvent::Removed(_)));
        assert_eq!(registry.keys_for(&object).count(), 0);
        assert_eq!(registry.objects_for("1::a").count(), 0);
        assert!(registry.remove("1::a").is_err());
    }

    #[test]
    fn shared_keys_survive_until_last_object_leaves() {
        let mut registry = IntegrityRegistry::new();
        let a = ObjectId::new("a");
        let b = ObjectId::new("b");
        registry.upsert(entry("shared", "v"));
        registry.upsert(entry("a::own", "v"));
        assert!(registry.index("shared", &a));
        assert!(!registry.index("shared", &a));
        registry.index("shared", &b);
        registry.index("a::own", &a);

        let events = registry.remove_by_object_id(&a);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], IntegrityEvent::Removed(e) if e.key == "a::own"));
        assert!(registry.contains("shared"));

        let events = registry.remove_by_object_id(&b);
        assert_eq!(events.len(), 1);
        assert!(registry.is_empty());
    }
}
