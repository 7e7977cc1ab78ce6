// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Object identifiers and indirect references.

use core::borrow::Borrow;
use core::fmt;

use serde::{Deserialize, Serialize};
use understory_mutation::PropertyPath;

/// Stable identifier of an object in the store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    /// Creates an identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ObjectId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ObjectId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ObjectId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The two resolvable kinds of [`Reference`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    /// By [`ObjectId`].
    Id,
    /// By alias string.
    Alias,
}

impl ReferenceKind {
    /// Returns the kind's tag as used in reference text (`id`, `alias`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Alias => "alias",
        }
    }
}

/// An indirect handle to an object.
///
/// Objects never hold each other directly. They name each other through
/// references that the store resolves on demand, so forward references (to
/// an object that does not exist yet) and cycles are both representable.
///
/// Only [`Reference::Id`] is strict: it names at most one object. An alias
/// is unique at any instant but may move between objects over time.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Reference {
    /// Reference by identifier.
    Id(ObjectId),
    /// Reference by alias.
    Alias(String),
    /// Placeholder for "the object this is declared on".
    ///
    /// Replaced with an [`Reference::Id`] when a strategy is applied to an
    /// object; it never appears in fired events.
    #[serde(rename = "self")]
    SelfRef,
}

impl Reference {
    /// Shorthand for [`Reference::Id`].
    #[must_use]
    pub fn id(id: impl Into<ObjectId>) -> Self {
        Self::Id(id.into())
    }

    /// Shorthand for [`Reference::Alias`].
    #[must_use]
    pub fn alias(alias: impl Into<String>) -> Self {
        Self::Alias(alias.into())
    }

    /// Returns the kind, or `None` for [`Reference::SelfRef`].
    #[must_use]
    pub fn kind(&self) -> Option<ReferenceKind> {
        match self {
            Self::Id(_) => Some(ReferenceKind::Id),
            Self::Alias(_) => Some(ReferenceKind::Alias),
            Self::SelfRef => None,
        }
    }

    /// Returns the referenced id or alias text.
    #[must_use]
    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Id(id) => Some(id.as_str()),
            Self::Alias(alias) => Some(alias),
            Self::SelfRef => None,
        }
    }

    /// Returns `true` for references that name at most one object.
    #[must_use]
    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Id(_))
    }

    /// Replaces [`Reference::SelfRef`] with a reference to `origin`.
    #[must_use]
    pub fn resolve_self(&self, origin: &ObjectId) -> Self {
        match self {
            Self::SelfRef => Self::Id(origin.clone()),
            other => other.clone(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id:{id}"),
            Self::Alias(alias) => write!(f, "alias:{alias}"),
            Self::SelfRef => f.write_str("self"),
        }
    }
}

impl From<ObjectId> for Reference {
    fn from(value: ObjectId) -> Self {
        Self::Id(value)
    }
}

/// A property of a referenced object.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PropertyReference {
    /// The object holding the property.
    pub reference: Reference,
    /// Path of the property inside the object's data.
    pub property: PropertyPath,
}

impl PropertyReference {
    /// Creates a property reference.
    #[must_use]
    pub fn new(reference: Reference, property: PropertyPath) -> Self {
        Self {
            reference,
            property,
        }
    }
}

impl fmt::Display for PropertyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.reference, self.property)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        assert_eq!(Reference::id("11174").to_string(), "id:11174");
        assert_eq!(Reference::alias("ST:Basic Move").to_string(), "alias:ST:Basic Move");
        let property = PropertyReference::new(Reference::id("1"), PropertyPath::parse("a[0]").unwrap());
        assert_eq!(property.to_string(), "id:1::a[0]");
    }

    #[test]
    fn self_reference_resolution() {
        let origin = ObjectId::new("42");
        assert_eq!(Reference::SelfRef.resolve_self(&origin), Reference::id("42"));
        assert_eq!(Reference::alias("x").resolve_self(&origin), Reference::alias("x"));
        assert!(!Reference::SelfRef.is_strict());
        assert_eq!(Reference::SelfRef.kind(), None);
    }
}
