// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fired events, listen targets, and dispatch records.
//!
//! Each event family has a fire shape (one concrete value) and a listen shape
//! (a list of patterns). A listener fires when any of its patterns matches,
//! and receives every [`PatternMatch`] so frames can recover structured
//! arguments such as a regex-captured array index.

use core::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::emitter::ListenerId;
use crate::integrity::IntegrityEntry;
use crate::pattern::{
    IntegrityEntryPattern, PatternMatch, PropertyPattern, ReferencePattern, match_all,
};
use crate::reference::{ObjectId, PropertyReference};

/// Property family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertyEvent {
    /// A property of an object changed.
    ///
    /// Fired once per changed path for the object's id and once more for
    /// each of its aliases.
    Updated(PropertyReference),
}

/// Reference family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReferenceEvent {
    /// A reference started resolving to `object`.
    Added {
        /// The id or alias that now resolves.
        reference: crate::Reference,
        /// The object it resolves to.
        object: ObjectId,
    },
    /// A reference stopped resolving to `object`.
    Removed {
        /// The id or alias that no longer resolves.
        reference: crate::Reference,
        /// The object it used to resolve to.
        object: ObjectId,
    },
}

/// Integrity family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IntegrityEvent {
    /// A new entry was registered.
    Added(IntegrityEntry),
    /// An entry's value changed.
    Updated {
        /// The entry with its new value.
        entry: IntegrityEntry,
        /// The value it replaced.
        previous: Value,
    },
    /// An entry was removed.
    Removed(IntegrityEntry),
}

impl IntegrityEvent {
    /// Returns the entry as it stands after the event.
    #[must_use]
    pub fn entry(&self) -> &IntegrityEntry {
        match self {
            Self::Added(entry) | Self::Updated { entry, .. } | Self::Removed(entry) => entry,
        }
    }
}

/// Any fired event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// Property family.
    Property(PropertyEvent),
    /// Reference family.
    Reference(ReferenceEvent),
    /// Integrity family.
    Integrity(IntegrityEvent),
}

impl Event {
    /// Returns the event's kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Property(PropertyEvent::Updated(_)) => EventKind::PropertyUpdated,
            Self::Reference(ReferenceEvent::Added { .. }) => EventKind::ReferenceAdded,
            Self::Reference(ReferenceEvent::Removed { .. }) => EventKind::ReferenceRemoved,
            Self::Integrity(IntegrityEvent::Added(_)) => EventKind::IntegrityEntryAdded,
            Self::Integrity(IntegrityEvent::Updated { .. }) => EventKind::IntegrityEntryUpdated,
            Self::Integrity(IntegrityEvent::Removed(_)) => EventKind::IntegrityEntryRemoved,
        }
    }
}

impl From<PropertyEvent> for Event {
    fn from(value: PropertyEvent) -> Self {
        Self::Property(value)
    }
}

impl From<ReferenceEvent> for Event {
    fn from(value: ReferenceEvent) -> Self {
        Self::Reference(value)
    }
}

impl From<IntegrityEvent> for Event {
    fn from(value: IntegrityEvent) -> Self {
        Self::Integrity(value)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind();
        match self {
            Self::Property(PropertyEvent::Updated(property)) => write!(f, "{kind} {property}"),
            Self::Reference(
                ReferenceEvent::Added { reference, object }
                | ReferenceEvent::Removed { reference, object },
            ) => write!(f, "{kind} {reference} -> {object}"),
            Self::Integrity(event) => {
                let entry = event.entry();
                write!(f, "{kind} {} = {}", entry.key, entry.value)
            }
        }
    }
}

/// Discriminant of [`Event`], used for indexing listeners.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`PropertyEvent::Updated`].
    PropertyUpdated,
    /// [`ReferenceEvent::Added`].
    ReferenceAdded,
    /// [`ReferenceEvent::Removed`].
    ReferenceRemoved,
    /// [`IntegrityEvent::Added`].
    IntegrityEntryAdded,
    /// [`IntegrityEvent::Updated`].
    IntegrityEntryUpdated,
    /// [`IntegrityEvent::Removed`].
    IntegrityEntryRemoved,
}

impl EventKind {
    /// Returns the kind's wire name, e.g. `property:updated`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PropertyUpdated => "property:updated",
            Self::ReferenceAdded => "reference:added",
            Self::ReferenceRemoved => "reference:removed",
            Self::IntegrityEntryAdded => "integrity_entry:added",
            Self::IntegrityEntryUpdated => "integrity_entry:updated",
            Self::IntegrityEntryRemoved => "integrity_entry:removed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a listener waits for: one event kind plus a list of patterns.
#[derive(Clone, Debug)]
pub enum TargetEvent {
    /// Property updates matching any of the patterns.
    PropertyUpdated(Vec<PropertyPattern>),
    /// References added that match any of the patterns.
    ReferenceAdded(Vec<ReferencePattern>),
    /// References removed that match any of the patterns.
    ReferenceRemoved(Vec<ReferencePattern>),
    /// Integrity entries added that match any of the patterns.
    IntegrityEntryAdded(Vec<IntegrityEntryPattern>),
    /// Integrity entries updated that match any of the patterns.
    IntegrityEntryUpdated(Vec<IntegrityEntryPattern>),
    /// Integrity entries removed that match any of the patterns.
    IntegrityEntryRemoved(Vec<IntegrityEntryPattern>),
}

impl TargetEvent {
    /// Returns the kind of event this target listens for.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::PropertyUpdated(_) => EventKind::PropertyUpdated,
            Self::ReferenceAdded(_) => EventKind::ReferenceAdded,
            Self::ReferenceRemoved(_) => EventKind::ReferenceRemoved,
            Self::IntegrityEntryAdded(_) => EventKind::IntegrityEntryAdded,
            Self::IntegrityEntryUpdated(_) => EventKind::IntegrityEntryUpdated,
            Self::IntegrityEntryRemoved(_) => EventKind::IntegrityEntryRemoved,
        }
    }

    /// Replaces self references in property patterns with `origin`.
    #[must_use]
    pub fn resolve_self(&self, origin: &ObjectId) -> Self {
        match self {
            Self::PropertyUpdated(patterns) => Self::PropertyUpdated(
                patterns
                    .iter()
                    .map(|pattern| pattern.resolve_self(origin))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Returns the property patterns, if this is a property target.
    #[must_use]
    pub fn property_patterns(&self) -> &[PropertyPattern] {
        match self {
            Self::PropertyUpdated(patterns) => patterns,
            _ => &[],
        }
    }

    /// Matches `event` against every pattern.
    ///
    /// The result is empty when the kinds differ or no pattern matches.
    #[must_use]
    pub fn matches(&self, event: &Event) -> Vec<PatternMatch> {
        match (self, event) {
            (Self::PropertyUpdated(patterns), Event::Property(PropertyEvent::Updated(fired))) => {
                match_all(patterns, fired, PropertyPattern::matches)
            }
            (
                Self::ReferenceAdded(patterns),
                Event::Reference(ReferenceEvent::Added { reference, .. }),
            )
            | (
                Self::ReferenceRemoved(patterns),
                Event::Reference(ReferenceEvent::Removed { reference, .. }),
            ) => match_all(patterns, reference, ReferencePattern::matches),
            (Self::IntegrityEntryAdded(patterns), Event::Integrity(IntegrityEvent::Added(entry)))
            | (
                Self::IntegrityEntryUpdated(patterns),
                Event::Integrity(IntegrityEvent::Updated { entry, .. }),
            )
            | (
                Self::IntegrityEntryRemoved(patterns),
                Event::Integrity(IntegrityEvent::Removed(entry)),
            ) => match_all(patterns, entry, IntegrityEntryPattern::matches),
            _ => Vec::new(),
        }
    }
}

/// A fired event together with the dispatch that caused it.
///
/// Causes form a chain back to the external update or synthetic event that
/// started the cascade.
#[derive(Debug)]
pub struct EventDispatch {
    event: Event,
    cause: Option<Rc<EventDispatch>>,
}

impl EventDispatch {
    /// Wraps `event` with an optional cause.
    #[must_use]
    pub fn new(event: Event, cause: Option<Rc<Self>>) -> Self {
        Self { event, cause }
    }

    /// Returns the event.
    #[must_use]
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Returns the dispatch that led to this one.
    #[must_use]
    pub fn cause(&self) -> Option<&Rc<Self>> {
        self.cause.as_ref()
    }

    /// Returns the chain of events from the root cause to this one.
    #[must_use]
    pub fn explain(&self) -> Vec<&Event> {
        let mut chain = vec![&self.event];
        let mut current = self.cause.as_deref();
        while let Some(dispatch) = current {
            chain.push(&dispatch.event);
            current = dispatch.cause.as_deref();
        }
        chain.reverse();
        chain
    }
}

/// What a listener callback receives.
#[derive(Clone, Debug)]
pub struct Notification {
    /// The dispatch being delivered.
    pub dispatch: Rc<EventDispatch>,
    /// The listener being invoked.
    pub listener: ListenerId,
    /// The listener's matching patterns, in pattern order.
    pub matches: Vec<PatternMatch>,
}

impl Notification {
    /// Returns the delivered event.
    #[must_use]
    pub fn event(&self) -> &Event {
        self.dispatch.event()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::ElementPattern;
    use crate::reference::Reference;
    use understory_mutation::PropertyPath;

    fn updated(reference: Reference, property: &str) -> Event {
        PropertyEvent::Updated(PropertyReference::new(
            reference,
            PropertyPath::parse(property).unwrap(),
        ))
        .into()
    }

    #[test]
    fn kinds_and_names() {
        let event = updated(Reference::id("1"), "level");
        assert_eq!(event.kind(), EventKind::PropertyUpdated);
        assert_eq!(event.to_string(), "property:updated id:1::level");
        assert_eq!(EventKind::IntegrityEntryUpdated.as_str(), "integrity_entry:updated");
    }

    #[test]
    fn target_requires_matching_kind() {
        let target = TargetEvent::ReferenceAdded(vec![ReferencePattern::alias("x")]);
        let added: Event = ReferenceEvent::Added {
            reference: Reference::alias("x"),
            object: ObjectId::new("1"),
        }
        .into();
        let removed: Event = ReferenceEvent::Removed {
            reference: Reference::alias("x"),
            object: ObjectId::new("1"),
        }
        .into();
        assert_eq!(target.matches(&added).len(), 1);
        assert!(target.matches(&removed).is_empty());
        assert!(target.matches(&updated(Reference::alias("x"), "a")).is_empty());
    }

    #[test]
    fn matches_carry_pattern_index_and_captures() {
        let target = TargetEvent::PropertyUpdated(vec![
            PropertyPattern::new(ReferencePattern::id("1"), ElementPattern::equals("name")),
            PropertyPattern::new(
                ReferencePattern::id("1"),
                ElementPattern::regex(r"^modes\[(\d+)\]$").unwrap(),
            ),
        ]);
        let hits = target.matches(&updated(Reference::id("1"), "modes[3]"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].pattern, 1);
        assert_eq!(hits[0].captures[1].as_deref(), Some("3"));
    }

    #[test]
    fn explain_walks_to_root() {
        let root = Rc::new(EventDispatch::new(updated(Reference::id("1"), "a"), None));
        let child = EventDispatch::new(updated(Reference::id("2"), "b"), Some(root));
        let chain: Vec<String> = child.explain().iter().map(ToString::to_string).collect();
        assert_eq!(chain, ["property:updated id:1::a", "property:updated id:2::b"]);
    }
}
