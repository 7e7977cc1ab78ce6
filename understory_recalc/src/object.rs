// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Versioned objects and their engine-private metadata.

use core::any::Any;
use core::fmt;
use std::rc::Rc;

use hashbrown::HashMap;
use serde_json::{Map, Value};
use understory_mutation::{PropertyPath, tree};

use crate::integrity::IntegrityEntry;
use crate::reference::{ObjectId, Reference};

/// Type-erased cache slots attached to an object, keyed by property path.
///
/// Metadata holds engine-internal state such as parsed expressions. It is
/// not part of the data snapshot: it never produces change events and is
/// never consulted for aliases.
#[derive(Default)]
pub struct Metadata {
    entries: HashMap<String, Box<dyn Any>>,
}

impl Metadata {
    /// Returns the entry at `key` if it holds a `T`.
    #[must_use]
    pub fn get<T: 'static>(&self, key: &str) -> Option<&T> {
        self.entries.get(key)?.downcast_ref()
    }

    /// Returns the entry at `key` mutably if it holds a `T`.
    pub fn get_mut<T: 'static>(&mut self, key: &str) -> Option<&mut T> {
        self.entries.get_mut(key)?.downcast_mut()
    }

    /// Stores `value` at `key`, replacing whatever was there.
    pub fn insert<T: 'static>(&mut self, key: impl Into<String>, value: T) {
        self.entries.insert(key.into(), Box::new(value));
    }

    /// Removes and returns the entry at `key` if it holds a `T`.
    ///
    /// Entries of another type are left in place.
    pub fn take<T: 'static>(&mut self, key: &str) -> Option<T> {
        if !self.entries.get(key)?.is::<T>() {
            return None;
        }
        let boxed = self.entries.remove(key)?;
        boxed.downcast().ok().map(|value| *value)
    }

    /// Removes the entry at `key`, whatever its type.
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Returns `true` if an entry exists at `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
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

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// An object: an id, an immutable data snapshot, and metadata.
///
/// The snapshot is replaced wholesale on every effective update and never
/// edited in place, so a caller holding [`MutableObject::snapshot`] keeps a
/// consistent view. Updates go through [`Engine::update`](crate::Engine::update).
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use understory_recalc::MutableObject;
///
/// let object = MutableObject::with_data("11174", json!({ "name": "ST:Basic Move" }));
/// assert_eq!(object.get("name"), Some(&json!("ST:Basic Move")));
/// assert_eq!(object.integrity_key("level"), "11174::level");
/// assert_eq!(object.version(), 0);
/// ```
pub struct MutableObject {
    id: ObjectId,
    data: Rc<Value>,
    metadata: Metadata,
    version: u64,
}

impl MutableObject {
    /// Creates an object with empty data.
    #[must_use]
    pub fn new(id: impl Into<ObjectId>) -> Self {
        Self::with_data(id, Value::Object(Map::new()))
    }

    /// Creates an object with initial data.
    ///
    /// The initial data counts as version 0; no change events are fired for
    /// it when the object is added.
    #[must_use]
    pub fn with_data(id: impl Into<ObjectId>, data: Value) -> Self {
        Self {
            id: id.into(),
            data: Rc::new(data),
            metadata: Metadata::default(),
            version: 0,
        }
    }

    /// Returns the object's id.
    #[must_use]
    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    /// Returns a strict reference to this object.
    #[must_use]
    pub fn reference(&self) -> Reference {
        Reference::Id(self.id.clone())
    }

    /// Returns the current data tree.
    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Returns a shared handle to the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Rc<Value> {
        Rc::clone(&self.data)
    }

    /// Returns how many effective updates this object has seen.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the value at a path given as text.
    ///
    /// Malformed paths read as absent.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        let path = PropertyPath::parse(path).ok()?;
        tree::get(&self.data, &path)
    }

    /// Returns the value at `path`.
    #[must_use]
    pub fn get_path(&self, path: &PropertyPath) -> Option<&Value> {
        tree::get(&self.data, path)
    }

    /// Returns the globally unique integrity key for `path` on this object.
    #[must_use]
    pub fn integrity_key(&self, path: &str) -> String {
        format!("{}::{path}", self.id)
    }

    /// Builds an integrity entry keyed by [`integrity_key`](Self::integrity_key).
    #[must_use]
    pub fn integrity_entry(&self, path: &str, value: impl Into<Value>) -> IntegrityEntry {
        IntegrityEntry::new(self.integrity_key(path), value)
    }

    /// Returns the metadata slots.
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub(crate) fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    pub(crate) fn publish(&mut self, data: Value) {
        self.data = Rc::new(data);
        self.version = self.version.wrapping_add(1);
    }
}

impl fmt::Debug for MutableObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutableObject")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("data", &self.data)
            .field("metadata", &self.metadata)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq)]
    struct Parsed(u32);

    #[test]
    fn metadata_is_typed() {
        let mut metadata = Metadata::default();
        metadata.insert("level", Parsed(3));

        assert_eq!(metadata.get::<Parsed>("level"), Some(&Parsed(3)));
        assert_eq!(metadata.get::<String>("level"), None);
        assert_eq!(metadata.take::<String>("level"), None);
        assert!(metadata.contains("level"));

        metadata.get_mut::<Parsed>("level").unwrap().0 = 4;
        assert_eq!(metadata.take::<Parsed>("level"), Some(Parsed(4)));
        assert!(metadata.is_empty());
    }

    #[test]
    fn publish_replaces_snapshot() {
        let mut object = MutableObject::new("1");
        let before = object.snapshot();
        object.publish(json!({ "level": 1 }));

        assert_eq!(*before, json!({}));
        assert_eq!(object.get("level"), Some(&json!(1)));
        assert_eq!(object.version(), 1);
        assert_eq!(object.get("level..x"), None);
    }

    #[test]
    fn integrity_entries_are_namespaced_by_object() {
        let object = MutableObject::new("11290");
        let entry = object.integrity_entry("level", "parent + 1");
        assert_eq!(entry.key, "11290::level");
        assert_eq!(entry.value, json!("parent + 1"));
    }
}
