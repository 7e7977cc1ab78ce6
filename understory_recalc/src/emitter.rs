// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Listener registry and event matching.
//!
//! Listeners are indexed so that an emitted event only tests the listeners
//! that could plausibly match it:
//!
//! - property listeners whose every pattern names an exact object reference
//!   are filed under those references; the rest go to a shared bucket,
//! - other listeners are filed under their event kind,
//! - listeners bound to integrity entries are also filed under each key, so
//!   invalidation only visits the affected listeners.
//!
//! Candidates are always tested in registration order.

use core::fmt;
use std::collections::BTreeSet;
use std::rc::Rc;

use hashbrown::HashMap;
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::event::{Event, EventKind, IntegrityEvent, Notification, PropertyEvent, TargetEvent};
use crate::integrity::IntegrityEntry;
use crate::pattern::{PatternMatch, PropertyPattern};
use crate::reference::{ObjectId, Reference};

/// Identifier of a registered listener.
///
/// Formatted `"{owner}::{event kind}::{sequence}"`; listeners without an
/// owner use `global` in the first position.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(String);

impl ListenerId {
    /// Returns the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Callback invoked with the engine and the matched notification.
///
/// Callbacks normally enqueue work instead of mutating objects directly.
pub type ListenerCallback = Rc<dyn Fn(&mut Engine, &Notification) -> Result<(), EngineError>>;

/// A registered subscription.
pub struct Listener {
    id: ListenerId,
    owner: Option<ObjectId>,
    target: TargetEvent,
    callback: ListenerCallback,
    integrity_entries: Vec<IntegrityEntry>,
    sequence: u64,
}

impl Listener {
    /// Returns the listener's id.
    #[must_use]
    pub fn id(&self) -> &ListenerId {
        &self.id
    }

    /// Returns the object the listener was installed for, if any.
    #[must_use]
    pub fn owner(&self) -> Option<&ObjectId> {
        self.owner.as_ref()
    }

    /// Returns what the listener waits for, with self references resolved.
    #[must_use]
    pub fn target(&self) -> &TargetEvent {
        &self.target
    }

    /// Returns the integrity entries the listener's lifetime is bound to.
    #[must_use]
    pub fn integrity_entries(&self) -> &[IntegrityEntry] {
        &self.integrity_entries
    }

    /// Returns `true` if `event` makes this listener stale.
    ///
    /// A bound listener goes away when its entry is removed, or when the
    /// entry takes a value other than the one it was bound to.
    fn is_invalidated_by(&self, event: &IntegrityEvent) -> bool {
        let current = event.entry();
        self.integrity_entries
            .iter()
            .filter(|bound| bound.key == current.key)
            .any(|bound| matches!(event, IntegrityEvent::Removed(_)) || bound.value != current.value)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("target", &self.target)
            .field("integrity_entries", &self.integrity_entries)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

/// A listener selected for an event, ready to be invoked.
#[derive(Clone)]
pub(crate) struct Matched {
    pub(crate) id: ListenerId,
    pub(crate) callback: ListenerCallback,
    pub(crate) matches: Vec<PatternMatch>,
}

type Bucket = BTreeSet<u64>;

/// Indexed set of listeners.
pub struct EventEmitter {
    listeners: HashMap<u64, Listener>,
    sequences: HashMap<ListenerId, u64>,
    by_kind: HashMap<EventKind, Bucket>,
    by_reference: HashMap<Reference, Bucket>,
    unindexed_properties: Bucket,
    by_integrity_key: HashMap<String, Bucket>,
    by_owner: HashMap<ObjectId, Bucket>,
    next_sequence: u64,
    bucket_warning: usize,
}

impl EventEmitter {
    /// Creates an empty emitter that warns about buckets above `bucket_warning`.
    #[must_use]
    pub fn new(bucket_warning: usize) -> Self {
        Self {
            listeners: HashMap::new(),
            sequences: HashMap::new(),
            by_kind: HashMap::new(),
            by_reference: HashMap::new(),
            unindexed_properties: Bucket::new(),
            by_integrity_key: HashMap::new(),
            by_owner: HashMap::new(),
            next_sequence: 0,
            bucket_warning,
        }
    }

    /// Registers a listener and returns its id.
    ///
    /// Self references in `target` are resolved against `owner`; without an
    /// owner they never match.
    pub fn add_listener(
        &mut self,
        owner: Option<&ObjectId>,
        target: TargetEvent,
        callback: ListenerCallback,
        integrity_entries: Vec<IntegrityEntry>,
    ) -> ListenerId {
        let target = match owner {
            Some(origin) => target.resolve_self(origin),
            None => target,
        };
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let id = ListenerId(format!(
            "{}::{}::{sequence}",
            owner.map_or("global", ObjectId::as_str),
            target.kind()
        ));

        let listener = Listener {
            id: id.clone(),
            owner: owner.cloned(),
            target,
            callback,
            integrity_entries,
            sequence,
        };
        let threshold = self.bucket_warning;
        self.for_each_bucket(&listener, |bucket| {
            bucket.insert(sequence);
            if bucket.len() == threshold + 1 {
                warn!(listener = %id, threshold, "listener index bucket exceeds warning threshold");
            }
        });
        debug!(listener = %id, "listener added");
        self.sequences.insert(id.clone(), sequence);
        self.listeners.insert(sequence, listener);
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&mut self, id: &ListenerId) -> bool {
        let Some(sequence) = self.sequences.remove(id) else {
            return false;
        };
        let Some(listener) = self.listeners.remove(&sequence) else {
            return false;
        };
        self.for_each_bucket(&listener, |bucket| {
            bucket.remove(&sequence);
        });
        self.prune();
        debug!(listener = %id, "listener removed");
        true
    }

    /// Returns `true` if the listener is registered.
    #[must_use]
    pub fn has(&self, id: &ListenerId) -> bool {
        self.sequences.contains_key(id)
    }

    /// Returns a registered listener.
    #[must_use]
    pub fn get(&self, id: &ListenerId) -> Option<&Listener> {
        self.listeners.get(self.sequences.get(id)?)
    }

    /// Returns the ids of listeners installed for `owner`, in registration order.
    #[must_use]
    pub fn owned_by(&self, owner: &ObjectId) -> Vec<ListenerId> {
        self.by_owner
            .get(owner)
            .into_iter()
            .flatten()
            .filter_map(|sequence| self.listeners.get(sequence))
            .map(|listener| listener.id.clone())
            .collect()
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Returns `true` if no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Returns the listeners matching `event`, in registration order.
    pub(crate) fn matching(&self, event: &Event) -> Vec<Matched> {
        let mut candidates = Bucket::new();
        match event {
            Event::Property(PropertyEvent::Updated(fired)) => {
                if let Some(bucket) = self.by_reference.get(&fired.reference) {
                    candidates.extend(bucket);
                }
                candidates.extend(&self.unindexed_properties);
            }
            Event::Reference(_) | Event::Integrity(_) => {
                if let Some(bucket) = self.by_kind.get(&event.kind()) {
                    candidates.extend(bucket);
                }
            }
        }

        candidates
            .into_iter()
            .filter_map(|sequence| {
                let listener = self.listeners.get(&sequence)?;
                let matches = listener.target.matches(event);
                (!matches.is_empty()).then(|| Matched {
                    id: listener.id.clone(),
                    callback: Rc::clone(&listener.callback),
                    matches,
                })
            })
            .collect()
    }

    /// Removes the listeners made stale by `event` and returns their ids.
    pub fn on_integrity_event(&mut self, event: &IntegrityEvent) -> Vec<ListenerId> {
        let Some(bucket) = self.by_integrity_key.get(&event.entry().key) else {
            return Vec::new();
        };
        let stale: Vec<ListenerId> = bucket
            .iter()
            .filter_map(|sequence| self.listeners.get(sequence))
            .filter(|listener| listener.is_invalidated_by(event))
            .map(|listener| listener.id.clone())
            .collect();
        for id in &stale {
            debug!(listener = %id, key = %event.entry().key, "listener torn down by integrity change");
            self.remove_listener(id);
        }
        stale
    }

    /// Removes every listener installed for `owner`. Returns how many went.
    pub fn remove_by_owner(&mut self, owner: &ObjectId) -> usize {
        let owned = self.owned_by(owner);
        for id in &owned {
            self.remove_listener(id);
        }
        owned.len()
    }

    /// Calls `visit` on every bucket `listener` belongs in.
    fn for_each_bucket(&mut self, listener: &Listener, mut visit: impl FnMut(&mut Bucket)) {
        match &listener.target {
            TargetEvent::PropertyUpdated(patterns) => {
                let exact: Option<BTreeSet<Reference>> = patterns
                    .iter()
                    .map(PropertyPattern::exact_reference)
                    .collect();
                match exact {
                    Some(references) if !references.is_empty() => {
                        for reference in references {
                            visit(self.by_reference.entry(reference).or_default());
                        }
                    }
                    _ => visit(&mut self.unindexed_properties),
                }
            }
            other => visit(self.by_kind.entry(other.kind()).or_default()),
        }

        let keys: BTreeSet<&str> = listener
            .integrity_entries
            .iter()
            .map(|entry| entry.key.as_str())
            .collect();
        for key in keys {
            visit(self.by_integrity_key.entry(key.to_owned()).or_default());
        }

        if let Some(owner) = &listener.owner {
            visit(self.by_owner.entry(owner.clone()).or_default());
        }
    }

    /// Drops empty buckets.
    fn prune(&mut self) {
        self.by_kind.retain(|_, bucket| !bucket.is_empty());
        self.by_reference.retain(|_, bucket| !bucket.is_empty());
        self.by_integrity_key.retain(|_, bucket| !bucket.is_empty());
        self.by_owner.retain(|_, bucket| !bucket.is_empty());
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_LISTENER_BUCKET_WARNING)
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.listeners.len())
            .field("references", &self.by_reference.len())
            .field("unindexed_properties", &self.unindexed_properties.len())
            .field("integrity_keys", &self.by_integrity_key.len())
            .field("next_sequence", &self.next_sequence)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ReferenceEvent;
    use crate::pattern::{ElementPattern, PropertyPattern, ReferencePattern};
    use crate::reference::PropertyReference;
    use understory_mutation::PropertyPath;

    fn noop() -> ListenerCallback {
        Rc::new(|_, _| Ok(()))
    }

    fn level_of(reference: Reference) -> Event {
        PropertyEvent::Updated(PropertyReference::new(
            reference,
            PropertyPath::parse("level").unwrap(),
        ))
        .into()
    }

    fn on_level(reference: ReferencePattern) -> TargetEvent {
        TargetEvent::PropertyUpdated(vec![PropertyPattern::new(
            reference,
            ElementPattern::equals("level"),
        )])
    }

    fn ids(matched: &[Matched]) -> Vec<&str> {
        matched.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn ids_are_deterministic() {
        let mut emitter = EventEmitter::default();
        let owner = ObjectId::new("11290");
        let a = emitter.add_listener(Some(&owner), on_level(ReferencePattern::id("1")), noop(), vec![]);
        let b = emitter.add_listener(None, on_level(ReferencePattern::id("1")), noop(), vec![]);
        assert_eq!(a.as_str(), "11290::property:updated::0");
        assert_eq!(b.as_str(), "global::property:updated::1");
        assert_eq!(emitter.len(), 2);
    }

    #[test]
    fn exact_and_open_listeners_both_match_in_registration_order() {
        let mut emitter = EventEmitter::default();
        let open = TargetEvent::PropertyUpdated(vec![PropertyPattern::new(
            ReferencePattern::new(None, ElementPattern::Any),
            ElementPattern::Any,
        )]);
        emitter.add_listener(None, open, noop(), vec![]);
        emitter.add_listener(None, on_level(ReferencePattern::alias("x")), noop(), vec![]);
        emitter.add_listener(None, on_level(ReferencePattern::alias("y")), noop(), vec![]);

        let matched = emitter.matching(&level_of(Reference::alias("x")));
        assert_eq!(
            ids(&matched),
            ["global::property:updated::0", "global::property:updated::1"]
        );
    }

    #[test]
    fn self_patterns_resolve_to_owner() {
        let mut emitter = EventEmitter::default();
        let owner = ObjectId::new("7");
        let target = TargetEvent::PropertyUpdated(vec![PropertyPattern::on_self(
            ElementPattern::equals("level"),
        )]);
        emitter.add_listener(Some(&owner), target, noop(), vec![]);

        assert_eq!(emitter.matching(&level_of(Reference::id("7"))).len(), 1);
        assert!(emitter.matching(&level_of(Reference::id("8"))).is_empty());
    }

    #[test]
    fn non_property_listeners_are_indexed_by_kind() {
        let mut emitter = EventEmitter::default();
        emitter.add_listener(
            None,
            TargetEvent::ReferenceAdded(vec![ReferencePattern::alias("x")]),
            noop(),
            vec![],
        );
        let added: Event = ReferenceEvent::Added {
            reference: Reference::alias("x"),
            object: ObjectId::new("1"),
        }
        .into();
        assert_eq!(emitter.matching(&added).len(), 1);
        assert!(emitter.matching(&level_of(Reference::alias("x"))).is_empty());
    }

    #[test]
    fn integrity_change_tears_down_bound_listeners() {
        let mut emitter = EventEmitter::default();
        let bound = IntegrityEntry::new("2::level", "a + 1");
        let id = emitter.add_listener(
            None,
            on_level(ReferencePattern::id("1")),
            noop(),
            vec![bound.clone()],
        );
        let survivor = emitter.add_listener(None, on_level(ReferencePattern::id("1")), noop(), vec![]);

        // Re-adding the same value keeps the listener.
        assert!(emitter.on_integrity_event(&IntegrityEvent::Added(bound)).is_empty());

        let updated = IntegrityEvent::Updated {
            entry: IntegrityEntry::new("2::level", "a + 2"),
            previous: "a + 1".into(),
        };
        assert_eq!(emitter.on_integrity_event(&updated), [id.clone()]);
        assert!(!emitter.has(&id));
        assert!(emitter.has(&survivor));
        assert_eq!(ids(&emitter.matching(&level_of(Reference::id("1")))), [survivor.as_str()]);
    }

    #[test]
    fn removal_unbinds_regardless_of_value() {
        let mut emitter = EventEmitter::default();
        let bound = IntegrityEntry::new("k", 1);
        let id = emitter.add_listener(None, on_level(ReferencePattern::id("1")), noop(), vec![bound.clone()]);
        assert_eq!(emitter.on_integrity_event(&IntegrityEvent::Removed(bound)), [id]);
        assert!(emitter.is_empty());
    }

    #[test]
    fn owners_can_be_cleared() {
        let mut emitter = EventEmitter::default();
        let owner = ObjectId::new("1");
        emitter.add_listener(Some(&owner), on_level(ReferencePattern::id("2")), noop(), vec![]);
        emitter.add_listener(Some(&owner), on_level(ReferencePattern::id("3")), noop(), vec![]);
        emitter.add_listener(None, on_level(ReferencePattern::id("2")), noop(), vec![]);

        assert_eq!(emitter.remove_by_owner(&owner), 2);
        assert_eq!(emitter.len(), 1);
        assert!(emitter.owned_by(&owner).is_empty());
        assert!(!emitter.remove_listener(&ListenerId("1::property:updated::0".into())));
    }
}
