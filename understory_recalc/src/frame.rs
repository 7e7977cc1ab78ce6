// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Named computations registered per object.

use core::fmt;
use std::rc::Rc;

use hashbrown::HashMap;
use understory_mutation::Mutation;

use crate::engine::FrameScope;
use crate::error::EngineError;
use crate::graph::DependencyEntry;
use crate::integrity::IntegrityEntry;
use crate::reference::ObjectId;

/// A frame's computation.
///
/// Frames read the object through the scope and return what to change.
/// They may also schedule more work or install listeners through the scope.
pub type FrameFn = Rc<dyn Fn(&mut FrameScope<'_>) -> Result<FrameOutput, EngineError>>;

/// The result of running a frame.
///
/// Mutations are applied to the frame's object as one batch. Integrity
/// entries are upserted and bound to the object before the batch's events
/// fire, and dependency entries feed the priority ordering.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameOutput {
    /// Mutations for the frame's object, applied in order.
    pub mutations: Vec<Mutation>,
    /// Cache signatures of the computations the frame performed.
    pub integrity_entries: Vec<IntegrityEntry>,
    /// What the computations read from.
    pub dependencies: Vec<DependencyEntry>,
}

impl FrameOutput {
    /// Returns an output that changes nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a mutation.
    #[must_use]
    pub fn with_mutation(mut self, mutation: Mutation) -> Self {
        self.mutations.push(mutation);
        self
    }

    /// Appends an integrity entry.
    #[must_use]
    pub fn with_integrity_entry(mut self, entry: IntegrityEntry) -> Self {
        self.integrity_entries.push(entry);
        self
    }

    /// Appends a dependency entry.
    #[must_use]
    pub fn with_dependency(mut self, dependency: DependencyEntry) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Appends everything in `other`.
    pub fn extend(&mut self, other: Self) {
        self.mutations.extend(other.mutations);
        self.integrity_entries.extend(other.integrity_entries);
        self.dependencies.extend(other.dependencies);
    }

    /// Returns `true` if the output carries nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty() && self.integrity_entries.is_empty() && self.dependencies.is_empty()
    }
}

impl From<Mutation> for FrameOutput {
    fn from(value: Mutation) -> Self {
        Self::new().with_mutation(value)
    }
}

impl From<Vec<Mutation>> for FrameOutput {
    fn from(value: Vec<Mutation>) -> Self {
        Self {
            mutations: value,
            ..Self::default()
        }
    }
}

/// A registered frame.
pub struct MutationFrame {
    id: String,
    name: String,
    index: usize,
    func: FrameFn,
}

impl MutationFrame {
    /// Returns the frame id, `"{object}::{name}"`.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the frame name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the registration index of the frame on its object.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn func(&self) -> FrameFn {
        Rc::clone(&self.func)
    }
}

impl fmt::Debug for MutationFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationFrame")
            .field("id", &self.id)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct ObjectFrames {
    frames: HashMap<String, MutationFrame>,
    next_index: usize,
}

/// Table of frames, keyed by object and name.
///
/// Registration and lookup only; scheduling lives in the call queue.
#[derive(Default)]
pub struct FrameRegistry {
    objects: HashMap<ObjectId, ObjectFrames>,
}

impl FrameRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `func` as frame `name` on `object`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateFrame`] if the name is taken on that object.
    pub fn register(
        &mut self,
        object: &ObjectId,
        name: impl Into<String>,
        func: FrameFn,
    ) -> Result<&MutationFrame, EngineError> {
        let name = name.into();
        let slot = self.objects.entry(object.clone()).or_default();
        if slot.frames.contains_key(&name) {
            return Err(EngineError::DuplicateFrame {
                object: object.clone(),
                name,
            });
        }
        let frame = MutationFrame {
            id: format!("{object}::{name}"),
            name: name.clone(),
            index: slot.next_index,
            func,
        };
        slot.next_index += 1;
        Ok(slot.frames.entry(name).or_insert(frame))
    }

    /// Returns frame `name` of `object`.
    #[must_use]
    pub fn get(&self, object: &ObjectId, name: &str) -> Option<&MutationFrame> {
        self.objects.get(object)?.frames.get(name)
    }

    /// Returns `true` if `object` has a frame called `name`.
    #[must_use]
    pub fn has(&self, object: &ObjectId, name: &str) -> bool {
        self.get(object, name).is_some()
    }

    /// Returns the frame names of `object` in registration order.
    #[must_use]
    pub fn names(&self, object: &ObjectId) -> Vec<&str> {
        let Some(slot) = self.objects.get(object) else {
            return Vec::new();
        };
        let mut frames: Vec<&MutationFrame> = slot.frames.values().collect();
        frames.sort_by_key(|frame| frame.index);
        frames.into_iter().map(MutationFrame::name).collect()
    }

    /// Drops every frame of `object`. Returns how many were registered.
    pub fn remove_object(&mut self, object: &ObjectId) -> usize {
        self.objects
            .remove(object)
            .map_or(0, |slot| slot.frames.len())
    }
}

impl fmt::Debug for FrameRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.objects.iter().map(|(object, slot)| (object, slot.frames.len())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> FrameFn {
        Rc::new(|_| Ok(FrameOutput::new()))
    }

    #[test]
    fn names_are_unique_per_object() {
        let mut registry = FrameRegistry::new();
        let a = ObjectId::new("a");
        let b = ObjectId::new("b");

        let frame = registry.register(&a, "level", noop()).unwrap();
        assert_eq!(frame.id(), "a::level");
        assert_eq!(frame.index(), 0);
        assert!(registry.register(&b, "level", noop()).is_ok());
        assert!(matches!(
            registry.register(&a, "level", noop()),
            Err(EngineError::DuplicateFrame { name, .. }) if name == "level"
        ));
    }

    #[test]
    fn names_keep_registration_order() {
        let mut registry = FrameRegistry::new();
        let a = ObjectId::new("a");
        for name in ["zeta", "alpha", "mid"] {
            registry.register(&a, name, noop()).unwrap();
        }
        assert_eq!(registry.names(&a), ["zeta", "alpha", "mid"]);
        assert_eq!(registry.remove_object(&a), 3);
        assert!(!registry.has(&a, "zeta"));
    }

    #[test]
    fn output_builders() {
        let output = FrameOutput::from(Mutation::overriding("level", json!(1)))
            .with_integrity_entry(IntegrityEntry::new("a::level", "x"));
        assert_eq!(output.mutations.len(), 1);
        assert!(!output.is_empty());
        assert!(FrameOutput::from(Vec::new()).is_empty());
    }
}
