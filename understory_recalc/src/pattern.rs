// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Listen-side patterns for references, properties, and integrity entries.

use regex::Regex;
use serde_json::Value;
use smallvec::SmallVec;

use crate::integrity::IntegrityEntry;
use crate::reference::{ObjectId, PropertyReference, Reference, ReferenceKind};

/// Capture groups of a regex match; index 0 is the whole match.
pub type Captures = SmallVec<[Option<String>; 2]>;

/// A pattern over a single string element.
#[derive(Clone, Debug)]
pub enum ElementPattern {
    /// Matches anything.
    Any,
    /// Matches exactly this string.
    Equals(String),
    /// Matches any of these strings.
    OneOf(Vec<String>),
    /// Matches when the regex finds a match; its groups become captures.
    Regex(Regex),
}

impl ElementPattern {
    /// Shorthand for [`ElementPattern::Equals`].
    #[must_use]
    pub fn equals(value: impl Into<String>) -> Self {
        Self::Equals(value.into())
    }

    /// Shorthand for [`ElementPattern::OneOf`].
    #[must_use]
    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::OneOf(values.into_iter().map(Into::into).collect())
    }

    /// Compiles a [`ElementPattern::Regex`].
    ///
    /// # Errors
    ///
    /// Returns the regex compilation error.
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self::Regex)
    }

    /// Matches `value`, returning regex captures (empty for other patterns).
    #[must_use]
    pub fn matches(&self, value: &str) -> Option<Captures> {
        match self {
            Self::Any => Some(Captures::new()),
            Self::Equals(expected) => (expected == value).then(Captures::new),
            Self::OneOf(options) => options
                .iter()
                .any(|option| option == value)
                .then(Captures::new),
            Self::Regex(regex) => {
                let captures = regex.captures(value)?;
                Some(
                    captures
                        .iter()
                        .map(|group| group.map(|m| m.as_str().to_owned()))
                        .collect(),
                )
            }
        }
    }

    /// Returns the single string this pattern accepts, if there is one.
    #[must_use]
    pub fn exact(&self) -> Option<&str> {
        match self {
            Self::Equals(value) => Some(value),
            _ => None,
        }
    }
}

/// Pattern over [`Reference`] values.
#[derive(Clone, Debug)]
pub struct ReferencePattern {
    /// Required kind; `None` accepts ids and aliases alike.
    pub kind: Option<ReferenceKind>,
    /// Pattern over the id or alias text.
    pub value: ElementPattern,
}

impl ReferencePattern {
    /// Matches exactly `id`.
    #[must_use]
    pub fn id(id: impl Into<String>) -> Self {
        Self {
            kind: Some(ReferenceKind::Id),
            value: ElementPattern::equals(id),
        }
    }

    /// Matches exactly `alias`.
    #[must_use]
    pub fn alias(alias: impl Into<String>) -> Self {
        Self {
            kind: Some(ReferenceKind::Alias),
            value: ElementPattern::equals(alias),
        }
    }

    /// Matches references of `kind` whose text matches `value`.
    #[must_use]
    pub fn new(kind: Option<ReferenceKind>, value: ElementPattern) -> Self {
        Self { kind, value }
    }

    /// Matches `reference`. Self references never match.
    #[must_use]
    pub fn matches(&self, reference: &Reference) -> Option<Captures> {
        let kind = reference.kind()?;
        if self.kind.is_some_and(|expected| expected != kind) {
            return None;
        }
        self.value.matches(reference.value()?)
    }

    /// Returns the one reference this pattern accepts, if there is one.
    #[must_use]
    pub fn exact(&self) -> Option<Reference> {
        let value = self.value.exact()?;
        match self.kind? {
            ReferenceKind::Id => Some(Reference::id(value)),
            ReferenceKind::Alias => Some(Reference::alias(value)),
        }
    }
}

/// The object side of a [`PropertyPattern`].
#[derive(Clone, Debug)]
pub enum ReferenceTarget {
    /// Objects matching a reference pattern.
    Pattern(ReferencePattern),
    /// The object the listener is installed for. Resolved on installation.
    SelfRef,
}

/// Pattern over `(reference, property)` pairs of property-updated events.
///
/// # Example
///
/// ```rust
/// use understory_mutation::PropertyPath;
/// use understory_recalc::{ElementPattern, PropertyPattern, PropertyReference, Reference, ReferencePattern};
///
/// let pattern = PropertyPattern::new(
///     ReferencePattern::alias("ST:Basic Move"),
///     ElementPattern::regex(r"^modes\[(\d+)\]\.level$").unwrap(),
/// );
/// let fired = PropertyReference::new(
///     Reference::alias("ST:Basic Move"),
///     PropertyPath::parse("modes[2].level").unwrap(),
/// );
/// let captures = pattern.matches(&fired).unwrap();
/// assert_eq!(captures[1].as_deref(), Some("2"));
/// ```
#[derive(Clone, Debug)]
pub struct PropertyPattern {
    /// Which objects to watch.
    pub reference: ReferenceTarget,
    /// Which property paths to watch (matched against canonical path text).
    pub property: ElementPattern,
}

impl PropertyPattern {
    /// Watches `property` on objects matching `reference`.
    #[must_use]
    pub fn new(reference: ReferencePattern, property: ElementPattern) -> Self {
        Self {
            reference: ReferenceTarget::Pattern(reference),
            property,
        }
    }

    /// Watches `property` on the object the listener is installed for.
    #[must_use]
    pub fn on_self(property: ElementPattern) -> Self {
        Self {
            reference: ReferenceTarget::SelfRef,
            property,
        }
    }

    /// Replaces a self target with an exact id pattern for `origin`.
    #[must_use]
    pub fn resolve_self(&self, origin: &ObjectId) -> Self {
        match &self.reference {
            ReferenceTarget::SelfRef => Self::new(
                ReferencePattern::id(origin.as_str()),
                self.property.clone(),
            ),
            ReferenceTarget::Pattern(_) => self.clone(),
        }
    }

    /// Matches a fired property reference; captures come from the property.
    #[must_use]
    pub fn matches(&self, fired: &PropertyReference) -> Option<Captures> {
        let ReferenceTarget::Pattern(reference) = &self.reference else {
            return None;
        };
        reference.matches(&fired.reference)?;
        self.property.matches(&fired.property.to_string())
    }

    /// Returns the one object reference this pattern watches, if exact.
    #[must_use]
    pub fn exact_reference(&self) -> Option<Reference> {
        match &self.reference {
            ReferenceTarget::Pattern(reference) => reference.exact(),
            ReferenceTarget::SelfRef => Some(Reference::SelfRef),
        }
    }
}

/// Pattern over integrity entries.
#[derive(Clone, Debug)]
pub struct IntegrityEntryPattern {
    /// Pattern over the entry key.
    pub key: ElementPattern,
    /// Required value, if any.
    pub value: Option<Value>,
}

impl IntegrityEntryPattern {
    /// Matches entries whose key matches `key`, whatever their value.
    #[must_use]
    pub fn key(key: ElementPattern) -> Self {
        Self { key, value: None }
    }

    /// Additionally requires the entry value to equal `value`.
    #[must_use]
    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Matches `entry`; captures come from the key.
    #[must_use]
    pub fn matches(&self, entry: &IntegrityEntry) -> Option<Captures> {
        if self.value.as_ref().is_some_and(|value| *value != entry.value) {
            return None;
        }
        self.key.matches(&entry.key)
    }
}

/// Which pattern of a listener matched, and what it captured.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatternMatch {
    /// Index of the matching pattern in the listener's pattern list.
    pub pattern: usize,
    /// Regex captures of that pattern, if it was a regex.
    pub captures: Captures,
}

/// Matches `value` against each pattern, collecting every hit.
pub(crate) fn match_all<P, V: ?Sized>(
    patterns: &[P],
    value: &V,
    matches: impl Fn(&P, &V) -> Option<Captures>,
) -> Vec<PatternMatch> {
    patterns
        .iter()
        .enumerate()
        .filter_map(|(pattern, candidate)| {
            matches(candidate, value).map(|captures| PatternMatch { pattern, captures })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use understory_mutation::PropertyPath;

    fn fired(reference: Reference, property: &str) -> PropertyReference {
        PropertyReference::new(reference, PropertyPath::parse(property).unwrap())
    }

    #[test]
    fn element_patterns() {
        assert!(ElementPattern::Any.matches("x").is_some());
        assert!(ElementPattern::equals("a").matches("a").is_some());
        assert!(ElementPattern::equals("a").matches("b").is_none());
        assert!(ElementPattern::one_of(["a", "b"]).matches("b").is_some());
        let captures = ElementPattern::regex(r"^x(\d)?$").unwrap().matches("x").unwrap();
        assert_eq!(captures.as_slice(), [Some("x".to_owned()), None]);
    }

    #[test]
    fn reference_kind_must_agree() {
        let pattern = ReferencePattern::id("1");
        assert!(pattern.matches(&Reference::id("1")).is_some());
        assert!(pattern.matches(&Reference::alias("1")).is_none());
        assert!(pattern.matches(&Reference::SelfRef).is_none());

        let any_kind = ReferencePattern::new(None, ElementPattern::equals("1"));
        assert!(any_kind.matches(&Reference::alias("1")).is_some());
        assert_eq!(any_kind.exact(), None);
    }

    #[test]
    fn property_pattern_uses_canonical_paths() {
        let pattern = PropertyPattern::new(ReferencePattern::id("1"), ElementPattern::equals("modes[0].level"));
        assert!(pattern.matches(&fired(Reference::id("1"), "modes.[0].level")).is_some());
        assert!(pattern.matches(&fired(Reference::id("2"), "modes[0].level")).is_none());
    }

    #[test]
    fn self_target_resolves_on_installation() {
        let pattern = PropertyPattern::on_self(ElementPattern::equals("level"));
        assert!(pattern.matches(&fired(Reference::id("7"), "level")).is_none());

        let resolved = pattern.resolve_self(&ObjectId::new("7"));
        assert!(resolved.matches(&fired(Reference::id("7"), "level")).is_some());
        assert_eq!(resolved.exact_reference(), Some(Reference::id("7")));
    }

    #[test]
    fn integrity_patterns_check_value_when_given() {
        let entry = IntegrityEntry::new("1::level", "a + 1");
        assert!(IntegrityEntryPattern::key(ElementPattern::Any).matches(&entry).is_some());
        assert!(
            IntegrityEntryPattern::key(ElementPattern::Any)
                .with_value("other")
                .matches(&entry)
                .is_none()
        );
    }

    #[test]
    fn match_all_reports_every_hit() {
        let patterns = [
            ReferencePattern::id("1"),
            ReferencePattern::alias("x"),
            ReferencePattern::new(None, ElementPattern::Any),
        ];
        let hits = match_all(&patterns, &Reference::alias("x"), ReferencePattern::matches);
        let indices: Vec<usize> = hits.iter().map(|hit| hit.pattern).collect();
        assert_eq!(indices, [1, 2]);
    }
}
