// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Object arena with id and alias indices.

use std::collections::{BTreeMap, BTreeSet};

use hashbrown::HashMap;
use serde_json::Value;
use tracing::debug;
use understory_mutation::{PropertyPath, tree};

use crate::error::EngineError;
use crate::event::ReferenceEvent;
use crate::object::MutableObject;
use crate::reference::{ObjectId, Reference};

/// Every object in the engine, reachable by id and by alias.
///
/// Objects never point at each other; they hold [`Reference`] values that
/// this store resolves on demand. Aliases are read from each object's data
/// at the configured alias path and re-indexed after every effective update.
///
/// Index changes are returned as [`ReferenceEvent`] lists for the caller to
/// emit.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use understory_mutation::PropertyPath;
/// use understory_recalc::{MutableObject, ObjectStore, Reference};
///
/// let mut store = ObjectStore::new(PropertyPath::parse("aliases").unwrap());
/// let events = store
///     .add(MutableObject::with_data("11174", json!({ "aliases": ["ST:Basic Move"] })))
///     .unwrap();
/// assert_eq!(events.len(), 2);
///
/// let object = store.get_by_strict_reference(&Reference::alias("ST:Basic Move")).unwrap();
/// assert_eq!(object.id().as_str(), "11174");
/// ```
#[derive(Debug)]
pub struct ObjectStore {
    objects: BTreeMap<ObjectId, MutableObject>,
    by_alias: HashMap<String, ObjectId>,
    aliases: HashMap<ObjectId, BTreeSet<String>>,
    alias_path: PropertyPath,
}

impl ObjectStore {
    /// Creates an empty store reading aliases from `alias_path`.
    #[must_use]
    pub fn new(alias_path: PropertyPath) -> Self {
        Self {
            objects: BTreeMap::new(),
            by_alias: HashMap::new(),
            aliases: HashMap::new(),
            alias_path,
        }
    }

    /// Adds an object and indexes its id and aliases.
    ///
    /// Returns `reference:added` events for the id, then each alias.
    ///
    /// # Errors
    ///
    /// Fails without changing the store if the id exists, the alias list is
    /// malformed, or an alias is held by another object.
    pub fn add(&mut self, object: MutableObject) -> Result<Vec<ReferenceEvent>, EngineError> {
        let id = object.id().clone();
        if self.objects.contains_key(&id) {
            return Err(EngineError::DuplicateObject(id));
        }
        let aliases = self.aliases_in(&id, object.data())?;
        self.check_aliases(&id, &aliases)?;

        debug!(object = %id, aliases = aliases.len(), "object added");
        self.objects.insert(id.clone(), object);
        let mut events = vec![ReferenceEvent::Added {
            reference: Reference::Id(id.clone()),
            object: id.clone(),
        }];
        events.extend(self.reindex_with(&id, aliases));
        Ok(events)
    }

    /// Reads the alias list out of `data`.
    ///
    /// An absent or null alias list means no aliases.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidAliases`] unless the value is an array
    /// of strings.
    pub fn aliases_in(&self, id: &ObjectId, data: &Value) -> Result<BTreeSet<String>, EngineError> {
        let invalid = || EngineError::InvalidAliases {
            object: id.clone(),
            path: self.alias_path.to_string(),
        };
        match tree::get(data, &self.alias_path) {
            None | Some(Value::Null) => Ok(BTreeSet::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_owned).ok_or_else(invalid))
                .collect(),
            Some(_) => Err(invalid()),
        }
    }

    /// Checks that no alias in `aliases` is held by an object other than `id`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateAlias`] for the first conflict.
    pub fn check_aliases(&self, id: &ObjectId, aliases: &BTreeSet<String>) -> Result<(), EngineError> {
        for alias in aliases {
            if let Some(holder) = self.by_alias.get(alias)
                && holder != id
            {
                return Err(EngineError::DuplicateAlias {
                    alias: alias.clone(),
                    holder: holder.clone(),
                    claimant: id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Re-reads the aliases of `id` from its current data.
    ///
    /// Returns `reference:removed` events for aliases lost, then
    /// `reference:added` events for aliases gained, each in sorted order.
    ///
    /// # Errors
    ///
    /// Fails without changing the index if the object is unknown, its alias
    /// list is malformed, or it claims an alias held by another object.
    pub fn reindex(&mut self, id: &ObjectId) -> Result<Vec<ReferenceEvent>, EngineError> {
        let object = self
            .objects
            .get(id)
            .ok_or_else(|| EngineError::UnknownObject(id.clone()))?;
        let aliases = self.aliases_in(id, object.data())?;
        self.check_aliases(id, &aliases)?;
        Ok(self.reindex_with(id, aliases))
    }

    /// Replaces the alias set of `id` with an already validated one.
    pub(crate) fn reindex_with(&mut self, id: &ObjectId, aliases: BTreeSet<String>) -> Vec<ReferenceEvent> {
        let previous = self.aliases.remove(id).unwrap_or_default();
        let mut events = Vec::new();
        for alias in previous.difference(&aliases) {
            self.by_alias.remove(alias);
            events.push(ReferenceEvent::Removed {
                reference: Reference::Alias(alias.clone()),
                object: id.clone(),
            });
        }
        for alias in aliases.difference(&previous) {
            self.by_alias.insert(alias.clone(), id.clone());
            events.push(ReferenceEvent::Added {
                reference: Reference::Alias(alias.clone()),
                object: id.clone(),
            });
        }
        if !events.is_empty() {
            debug!(object = %id, changes = events.len(), "aliases reindexed");
        }
        if !aliases.is_empty() {
            self.aliases.insert(id.clone(), aliases);
        }
        events
    }

    /// Removes an object and its index entries.
    ///
    /// Returns the object together with `reference:removed` events for each
    /// alias, then the id.
    pub fn remove(&mut self, id: &ObjectId) -> Option<(MutableObject, Vec<ReferenceEvent>)> {
        let object = self.objects.remove(id)?;
        let mut events = self.reindex_with(id, BTreeSet::new());
        events.push(ReferenceEvent::Removed {
            reference: Reference::Id(id.clone()),
            object: id.clone(),
        });
        debug!(object = %id, "object removed");
        Some((object, events))
    }

    /// Returns the object with `id`.
    #[must_use]
    pub fn get(&self, id: &ObjectId) -> Option<&MutableObject> {
        self.objects.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &ObjectId) -> Option<&mut MutableObject> {
        self.objects.get_mut(id)
    }

    /// Returns `true` if an object with `id` is stored.
    #[must_use]
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    /// Returns the ids `reference` currently resolves to.
    ///
    /// Self references resolve to nothing; resolve them against an origin
    /// first.
    #[must_use]
    pub fn resolve(&self, reference: &Reference) -> Vec<&ObjectId> {
        match reference {
            Reference::Id(id) => self.objects.get_key_value(id).map(|(id, _)| id).into_iter().collect(),
            Reference::Alias(alias) => self.by_alias.get(alias).into_iter().collect(),
            Reference::SelfRef => Vec::new(),
        }
    }

    /// Returns the objects `reference` currently resolves to.
    #[must_use]
    pub fn get_by_reference(&self, reference: &Reference) -> Vec<&MutableObject> {
        self.resolve(reference)
            .into_iter()
            .filter_map(|id| self.objects.get(id))
            .collect()
    }

    /// Returns the one object `reference` resolves to.
    ///
    /// # Errors
    ///
    /// Fails unless exactly one object matches.
    pub fn get_by_strict_reference(&self, reference: &Reference) -> Result<&MutableObject, EngineError> {
        if matches!(reference, Reference::SelfRef) {
            return Err(EngineError::UnboundSelfReference);
        }
        match self.get_by_reference(reference).as_slice() {
            [object] => Ok(*object),
            [] => Err(EngineError::UnresolvedReference(reference.clone())),
            many => Err(EngineError::AmbiguousReference {
                reference: reference.clone(),
                count: many.len(),
            }),
        }
    }

    /// Turns `reference` into an id reference.
    ///
    /// # Errors
    ///
    /// Fails unless exactly one object matches.
    pub fn strictify(&self, reference: &Reference) -> Result<Reference, EngineError> {
        self.get_by_strict_reference(reference)
            .map(MutableObject::reference)
    }

    /// Like [`strictify`](Self::strictify), resolving self references to `origin`.
    ///
    /// # Errors
    ///
    /// Fails unless exactly one object matches.
    pub fn strictify_from(&self, reference: &Reference, origin: &ObjectId) -> Result<Reference, EngineError> {
        self.strictify(&reference.resolve_self(origin))
    }

    /// Returns the current aliases of `id`, sorted.
    pub fn aliases_of(&self, id: &ObjectId) -> impl Iterator<Item = &str> + '_ {
        self.aliases.get(id).into_iter().flatten().map(String::as_str)
    }

    /// Returns the configured alias path.
    #[must_use]
    pub fn alias_path(&self) -> &PropertyPath {
        &self.alias_path
    }

    /// Returns every stored id, sorted.
    pub fn ids(&self) -> impl Iterator<Item = &ObjectId> + '_ {
        self.objects.keys()
    }

    /// Returns the number of objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns `true` if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> ObjectStore {
        ObjectStore::new(PropertyPath::parse("__.aliases").unwrap())
    }

    fn named(id: &str, aliases: &[&str]) -> MutableObject {
        MutableObject::with_data(id, json!({ "__": { "aliases": aliases } }))
    }

    #[test]
    fn add_reports_id_then_aliases() {
        let mut store = store();
        let events = store.add(named("1", &["b", "a"])).unwrap();
        let references: Vec<String> = events
            .iter()
            .map(|event| match event {
                ReferenceEvent::Added { reference, .. } => reference.to_string(),
                ReferenceEvent::Removed { .. } => panic!("unexpected removal"),
            })
            .collect();
        assert_eq!(references, ["id:1", "alias:a", "alias:b"]);
        assert!(matches!(store.add(named("1", &[])), Err(EngineError::DuplicateObject(_))));
    }

    #[test]
    fn aliases_are_unique() {
        let mut store = store();
        store.add(named("1", &["x"])).unwrap();
        assert!(matches!(
            store.add(named("2", &["x"])),
            Err(EngineError::DuplicateAlias { holder, .. }) if holder.as_str() == "1"
        ));
        assert!(!store.contains(&ObjectId::new("2")));
    }

    #[test]
    fn malformed_alias_lists_are_rejected() {
        let mut store = store();
        let bad = MutableObject::with_data("1", json!({ "__": { "aliases": [1] } }));
        assert!(matches!(store.add(bad), Err(EngineError::InvalidAliases { .. })));
        let bad = MutableObject::with_data("1", json!({ "__": { "aliases": "x" } }));
        assert!(store.add(bad).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn reindex_diffs_alias_sets() {
        let mut store = store();
        let id = ObjectId::new("1");
        store.add(named("1", &["a", "b"])).unwrap();
        store
            .get_mut(&id)
            .unwrap()
            .publish(json!({ "__": { "aliases": ["b", "c"] } }));

        let events = store.reindex(&id).unwrap();
        assert_eq!(
            events,
            [
                ReferenceEvent::Removed { reference: Reference::alias("a"), object: id.clone() },
                ReferenceEvent::Added { reference: Reference::alias("c"), object: id.clone() },
            ]
        );
        assert_eq!(store.aliases_of(&id).collect::<Vec<_>>(), ["b", "c"]);
        assert!(store.get_by_reference(&Reference::alias("a")).is_empty());
    }

    #[test]
    fn strict_resolution() {
        let mut store = store();
        store.add(named("1", &["x"])).unwrap();
        let origin = ObjectId::new("1");

        assert_eq!(store.strictify(&Reference::alias("x")).unwrap(), Reference::id("1"));
        assert_eq!(store.strictify_from(&Reference::SelfRef, &origin).unwrap(), Reference::id("1"));
        assert!(matches!(
            store.get_by_strict_reference(&Reference::alias("y")),
            Err(EngineError::UnresolvedReference(_))
        ));
        assert!(matches!(
            store.get_by_strict_reference(&Reference::SelfRef),
            Err(EngineError::UnboundSelfReference)
        ));
    }

    #[test]
    fn remove_reports_aliases_then_id() {
        let mut store = store();
        store.add(named("1", &["x"])).unwrap();
        let (object, events) = store.remove(&ObjectId::new("1")).unwrap();
        assert_eq!(object.id().as_str(), "1");
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], ReferenceEvent::Removed { reference: Reference::Id(_), .. }));
        assert!(store.get_by_reference(&Reference::alias("x")).is_empty());
        assert!(store.remove(&ObjectId::new("1")).is_none());
    }
}
