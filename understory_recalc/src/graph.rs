// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dependency records and topological priorities.

use std::collections::{BTreeMap, BTreeSet};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::reference::{ObjectId, Reference};
use crate::store::ObjectStore;

/// "The computation of `object` keyed by `integrity_key` reads these references."
///
/// Only used for ordering; correctness never depends on it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEntry {
    /// The object whose computation reads the references.
    pub object: ObjectId,
    /// Integrity key of that computation.
    pub integrity_key: String,
    /// What it reads from.
    pub references: Vec<Reference>,
}

impl DependencyEntry {
    /// Creates a dependency entry.
    #[must_use]
    pub fn new(object: ObjectId, integrity_key: impl Into<String>, references: Vec<Reference>) -> Self {
        Self {
            object,
            integrity_key: integrity_key.into(),
            references,
        }
    }
}

/// Resolved object-to-object edges.
///
/// `depends_on[a]` holds the objects `a` reads from; `depended_on_by[b]`
/// holds the objects reading from `b`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Adjacency {
    /// Edges from each object to what it reads.
    pub depends_on: BTreeMap<ObjectId, BTreeSet<ObjectId>>,
    /// Edges from each object to what reads it.
    pub depended_on_by: BTreeMap<ObjectId, BTreeSet<ObjectId>>,
    /// Every object taking part in the graph, with or without edges.
    pub nodes: BTreeSet<ObjectId>,
}

impl Adjacency {
    fn dependants<'a>(&'a self, id: &ObjectId) -> impl Iterator<Item = &'a ObjectId> + 'a {
        self.depended_on_by.get(id).into_iter().flatten()
    }
}

/// An edge that closed a cycle during prioritization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CircularDependency {
    /// The object being visited.
    pub dependency: ObjectId,
    /// A dependant of it that was already on the visit path.
    pub dependant: ObjectId,
}

/// Execution priority per object; lower runs first.
///
/// Dependencies always get a lower priority than their dependants, except
/// along edges reported in [`circular`](Self::circular).
#[derive(Clone, Debug, Default)]
pub struct Priorities {
    order: HashMap<ObjectId, usize>,
    circular: Vec<CircularDependency>,
}

impl Priorities {
    /// Returns the priority of `id`, if it takes part in the graph.
    #[must_use]
    pub fn get(&self, id: &ObjectId) -> Option<usize> {
        self.order.get(id).copied()
    }

    /// Returns the priority of `id`, sorting unknown objects last.
    #[must_use]
    pub fn rank(&self, id: &ObjectId) -> usize {
        self.get(id).unwrap_or(usize::MAX)
    }

    /// Returns the cycle-closing edges found while ordering.
    #[must_use]
    pub fn circular(&self) -> &[CircularDependency] {
        &self.circular
    }

    /// Returns the number of prioritized objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if no object is prioritized.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Dependency records, per object and per integrity key.
///
/// References are kept as recorded and resolved against the store each time
/// the graph is read, so an edge to an object that does not exist yet
/// appears once that object does.
///
/// # Example
///
/// ```rust
/// use understory_mutation::PropertyPath;
/// use understory_recalc::{DependencyEntry, DependencyGraph, MutableObject, ObjectId, ObjectStore, Reference};
///
/// let mut store = ObjectStore::new(PropertyPath::parse("aliases").unwrap());
/// for id in ["a", "b", "c"] {
///     store.add(MutableObject::new(id)).unwrap();
/// }
///
/// let mut graph = DependencyGraph::new();
/// graph.add(DependencyEntry::new(ObjectId::new("c"), "c::x", vec![Reference::id("b")]));
/// graph.add(DependencyEntry::new(ObjectId::new("b"), "b::x", vec![Reference::id("a")]));
///
/// let priorities = graph.priorities(&store);
/// let rank = |id: &str| priorities.get(&ObjectId::new(id)).unwrap();
/// assert!(rank("a") < rank("b") && rank("b") < rank("c"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    entries: HashMap<ObjectId, BTreeMap<String, Vec<Reference>>>,
    objects_by_key: HashMap<String, BTreeSet<ObjectId>>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `entry`, replacing the previous record for the same object and key.
    ///
    /// Self references are resolved to the entry's object.
    pub fn add(&mut self, entry: DependencyEntry) {
        let DependencyEntry {
            object,
            integrity_key,
            references,
        } = entry;
        let references = references
            .iter()
            .map(|reference| reference.resolve_self(&object))
            .collect();
        self.objects_by_key
            .entry(integrity_key.clone())
            .or_default()
            .insert(object.clone());
        self.entries
            .entry(object)
            .or_default()
            .insert(integrity_key, references);
    }

    /// Drops every record made under `key`. Returns how many went.
    pub fn remove_integrity_key(&mut self, key: &str) -> usize {
        let Some(objects) = self.objects_by_key.remove(key) else {
            return 0;
        };
        let mut removed = 0;
        for object in objects {
            if let Some(records) = self.entries.get_mut(&object) {
                removed += usize::from(records.remove(key).is_some());
                if records.is_empty() {
                    self.entries.remove(&object);
                }
            }
        }
        if removed > 0 {
            debug!(key, removed, "dependency records dropped");
        }
        removed
    }

    /// Drops every record made by `object`.
    pub fn remove_object(&mut self, object: &ObjectId) {
        let Some(records) = self.entries.remove(object) else {
            return;
        };
        for key in records.keys() {
            if let Some(objects) = self.objects_by_key.get_mut(key) {
                objects.remove(object);
                if objects.is_empty() {
                    self.objects_by_key.remove(key);
                }
            }
        }
    }

    /// Returns the references recorded for `object`, by integrity key.
    #[must_use]
    pub fn records_of(&self, object: &ObjectId) -> Option<&BTreeMap<String, Vec<Reference>>> {
        self.entries.get(object)
    }

    /// Returns the number of objects with records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves the records into object-to-object edges.
    ///
    /// References that resolve to nothing are skipped, as are edges from an
    /// object to itself.
    #[must_use]
    pub fn resolve(&self, store: &ObjectStore) -> Adjacency {
        let mut adjacency = Adjacency::default();
        for (object, records) in &self.entries {
            adjacency.nodes.insert(object.clone());
            for reference in records.values().flatten() {
                for target in store.resolve(reference) {
                    if target == object {
                        continue;
                    }
                    adjacency.nodes.insert(target.clone());
                    adjacency
                        .depends_on
                        .entry(object.clone())
                        .or_default()
                        .insert(target.clone());
                    adjacency
                        .depended_on_by
                        .entry(target.clone())
                        .or_default()
                        .insert(object.clone());
                }
            }
        }
        adjacency
    }

    /// Computes execution priorities.
    ///
    /// Runs a depth-first post-order over the "is depended on by" edges,
    /// starting from each node in id order, and reverses it. A dependant
    /// found on the current visit path closes a cycle: the edge is skipped
    /// and reported, and the visit carries on.
    #[must_use]
    pub fn priorities(&self, store: &ObjectStore) -> Priorities {
        let adjacency = self.resolve(store);

        let mut finished: BTreeSet<&ObjectId> = BTreeSet::new();
        let mut on_path: BTreeSet<&ObjectId> = BTreeSet::new();
        let mut post_order: Vec<&ObjectId> = Vec::with_capacity(adjacency.nodes.len());
        let mut circular = Vec::new();

        for root in &adjacency.nodes {
            if finished.contains(root) {
                continue;
            }
            on_path.insert(root);
            let mut stack = vec![(root, adjacency.dependants(root))];
            while let Some((node, dependants)) = stack.last_mut() {
                let node: &ObjectId = *node;
                match dependants.next() {
                    Some(next) if on_path.contains(next) => {
                        warn!(dependency = %node, dependant = %next, "circular dependency");
                        circular.push(CircularDependency {
                            dependency: node.clone(),
                            dependant: next.clone(),
                        });
                    }
                    Some(next) if finished.contains(next) => {}
                    Some(next) => {
                        on_path.insert(next);
                        stack.push((next, adjacency.dependants(next)));
                    }
                    None => {
                        on_path.remove(node);
                        finished.insert(node);
                        post_order.push(node);
                        stack.pop();
                    }
                }
            }
        }

        let order = post_order
            .into_iter()
            .rev()
            .enumerate()
            .map(|(priority, id)| (id.clone(), priority))
            .collect();
        Priorities { order, circular }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::MutableObject;
    use serde_json::json;
    use understory_mutation::PropertyPath;

    fn store(ids: &[&str]) -> ObjectStore {
        let mut store = ObjectStore::new(PropertyPath::parse("aliases").unwrap());
        for id in ids {
            store.add(MutableObject::new(*id)).unwrap();
        }
        store
    }

    fn depends(graph: &mut DependencyGraph, object: &str, on: &[&str]) {
        graph.add(DependencyEntry::new(
            ObjectId::new(object),
            format!("{object}::value"),
            on.iter().map(|id| Reference::id(*id)).collect(),
        ));
    }

    fn rank(priorities: &Priorities, id: &str) -> usize {
        priorities.get(&ObjectId::new(id)).unwrap()
    }

    #[test]
    fn entries_serialize_with_tagged_references() {
        let entry = DependencyEntry::new(
            ObjectId::new("b"),
            "b::value",
            vec![Reference::id("a"), Reference::alias("ST:Base"), Reference::SelfRef],
        );
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            value,
            json!({
                "object": "b",
                "integrity_key": "b::value",
                "references": [
                    { "kind": "id", "value": "a" },
                    { "kind": "alias", "value": "ST:Base" },
                    { "kind": "self" },
                ],
            })
        );
        let back: DependencyEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn chain_orders_dependencies_first() {
        let store = store(&["a", "b", "c"]);
        let mut graph = DependencyGraph::new();
        depends(&mut graph, "c", &["b"]);
        depends(&mut graph, "b", &["a"]);

        let priorities = graph.priorities(&store);
        assert_eq!(
            [rank(&priorities, "a"), rank(&priorities, "b"), rank(&priorities, "c")],
            [0, 1, 2]
        );
        assert!(priorities.circular().is_empty());
    }

    #[test]
    fn diamond_respects_every_edge() {
        let store = store(&["top", "left", "right", "bottom"]);
        let mut graph = DependencyGraph::new();
        depends(&mut graph, "left", &["top"]);
        depends(&mut graph, "right", &["top"]);
        depends(&mut graph, "bottom", &["left", "right"]);

        let priorities = graph.priorities(&store);
        assert!(rank(&priorities, "top") < rank(&priorities, "left"));
        assert!(rank(&priorities, "top") < rank(&priorities, "right"));
        assert!(rank(&priorities, "left") < rank(&priorities, "bottom"));
        assert!(rank(&priorities, "right") < rank(&priorities, "bottom"));
    }

    #[test]
    fn cycles_are_reported_not_fatal() {
        let store = store(&["a", "b"]);
        let mut graph = DependencyGraph::new();
        depends(&mut graph, "a", &["b"]);
        depends(&mut graph, "b", &["a"]);

        let priorities = graph.priorities(&store);
        assert_eq!(priorities.len(), 2);
        assert_eq!(priorities.circular().len(), 1);
    }

    #[test]
    fn unresolved_references_add_no_edges_until_they_resolve() {
        let mut store = store(&["a"]);
        let mut graph = DependencyGraph::new();
        graph.add(DependencyEntry::new(
            ObjectId::new("a"),
            "a::value",
            vec![Reference::alias("later"), Reference::SelfRef],
        ));
        assert!(graph.resolve(&store).depends_on.is_empty());

        store
            .add(MutableObject::with_data("b", json!({ "aliases": ["later"] })))
            .unwrap();
        let adjacency = graph.resolve(&store);
        assert!(adjacency.depends_on[&ObjectId::new("a")].contains(&ObjectId::new("b")));
    }

    #[test]
    fn records_go_with_their_key_or_object() {
        let mut graph = DependencyGraph::new();
        depends(&mut graph, "a", &["b"]);
        depends(&mut graph, "c", &["b"]);
        assert_eq!(graph.remove_integrity_key("a::value"), 1);
        assert!(graph.records_of(&ObjectId::new("a")).is_none());

        graph.remove_object(&ObjectId::new("c"));
        assert!(graph.is_empty());
        assert_eq!(graph.remove_integrity_key("c::value"), 0);
    }

    #[test]
    fn unknown_objects_rank_last() {
        let priorities = DependencyGraph::new().priorities(&store(&[]));
        assert_eq!(priorities.rank(&ObjectId::new("x")), usize::MAX);
    }
}
