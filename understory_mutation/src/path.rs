// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dot/bracket property paths.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;

use crate::error::MutationError;

/// One step of a [`PropertyPath`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    /// An object key (`a` in `a.b`).
    Key(String),
    /// An array index (`0` in `a[0]`).
    Index(usize),
}

impl Segment {
    /// Returns the segment as an object key.
    ///
    /// Indices are rendered in decimal so that `a[0]` can address an object
    /// whose key is `"0"`.
    #[must_use]
    pub fn to_key(&self) -> String {
        match self {
            Self::Key(key) => key.clone(),
            Self::Index(index) => index.to_string(),
        }
    }

    /// Returns the segment as an array index, if it is numeric.
    #[must_use]
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Key(key) => key.parse().ok(),
            Self::Index(index) => Some(*index),
        }
    }
}

/// A parsed property path such as `modes[0].level`.
///
/// Paths are written with dots between keys and brackets around array
/// indices. The legacy `modes.[0]` spelling is accepted and normalized on
/// display, so every path has one canonical text form.
///
/// # Example
///
/// ```rust
/// use understory_mutation::{PropertyPath, Segment};
///
/// let path: PropertyPath = "modes.[0].level".parse().unwrap();
/// assert_eq!(path.len(), 3);
/// assert_eq!(path.segments()[1], Segment::Index(0));
/// assert_eq!(path.to_string(), "modes[0].level");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyPath {
    segments: SmallVec<[Segment; 4]>,
}

impl PropertyPath {
    /// The empty path, addressing the whole tree.
    ///
    /// Only useful as a prefix; mutations always target a non-empty path.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses a path from text.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::InvalidPath`] for empty paths, empty
    /// segments (`a..b`, `.a`, `a.`), unterminated or empty brackets, and
    /// text directly following a closing bracket.
    pub fn parse(text: &str) -> Result<Self, MutationError> {
        let invalid = |reason| MutationError::InvalidPath {
            path: text.to_owned(),
            reason,
        };
        if text.is_empty() {
            return Err(invalid("path is empty"));
        }

        let mut segments = SmallVec::new();
        let mut key = String::new();
        let mut needs_segment = true;
        let mut chars = text.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if !key.is_empty() {
                        segments.push(Segment::Key(core::mem::take(&mut key)));
                    } else if needs_segment {
                        return Err(invalid("empty segment"));
                    }
                    needs_segment = true;
                }
                '[' => {
                    if !key.is_empty() {
                        segments.push(Segment::Key(core::mem::take(&mut key)));
                    }
                    let mut inner = String::new();
                    loop {
                        match chars.next() {
                            Some(']') => break,
                            Some(c) => inner.push(c),
                            None => return Err(invalid("unterminated bracket")),
                        }
                    }
                    if inner.is_empty() {
                        return Err(invalid("empty bracket"));
                    }
                    segments.push(match inner.parse::<usize>() {
                        Ok(index) => Segment::Index(index),
                        Err(_) => Segment::Key(inner),
                    });
                    if !matches!(chars.peek(), None | Some('.' | '[')) {
                        return Err(invalid("expected `.` or `[` after `]`"));
                    }
                    needs_segment = false;
                }
                _ => {
                    key.push(c);
                    needs_segment = false;
                }
            }
        }

        if !key.is_empty() {
            segments.push(Segment::Key(key));
        } else if needs_segment {
            return Err(invalid("empty segment"));
        }

        Ok(Self { segments })
    }

    /// Returns the segments of this path.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns `true` for the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns a new path with `key` appended.
    #[must_use]
    pub fn child_key(&self, key: &str) -> Self {
        let mut child = self.clone();
        child.segments.push(Segment::Key(key.to_owned()));
        child
    }

    /// Returns a new path with `index` appended.
    #[must_use]
    pub fn child_index(&self, index: usize) -> Self {
        let mut child = self.clone();
        child.segments.push(Segment::Index(index));
        child
    }

    /// Returns the path without its last segment, or `None` at the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let (_, parent) = self.segments.split_last()?;
        Some(Self {
            segments: parent.iter().cloned().collect(),
        })
    }

    /// Returns the first `len` segments as a path.
    #[must_use]
    pub fn prefix(&self, len: usize) -> Self {
        Self {
            segments: self.segments.iter().take(len).cloned().collect(),
        }
    }

    /// Returns `true` if `prefix` is this path or one of its ancestors.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.segments.starts_with(&prefix.segments)
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Key(key) if i == 0 => f.write_str(key)?,
                Segment::Key(key) => write!(f, ".{key}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

impl FromStr for PropertyPath {
    type Err = MutationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for PropertyPath {
    type Error = MutationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl Serialize for PropertyPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PropertyPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(path: &PropertyPath) -> Vec<String> {
        path.segments().iter().map(Segment::to_key).collect()
    }

    #[test]
    fn parses_dots_and_brackets() {
        let path = PropertyPath::parse("a.b[2].c").unwrap();
        assert_eq!(keys(&path), ["a", "b", "2", "c"]);
        assert_eq!(path.segments()[2], Segment::Index(2));
        assert_eq!(path.to_string(), "a.b[2].c");
    }

    #[test]
    fn legacy_dot_bracket_is_normalized() {
        let path = PropertyPath::parse("modes.[0].form").unwrap();
        assert_eq!(path.to_string(), "modes[0].form");
        assert_eq!(path, PropertyPath::parse("modes[0].form").unwrap());
    }

    #[test]
    fn leading_index_and_nested_brackets() {
        let path = PropertyPath::parse("[1][2]").unwrap();
        assert_eq!(path.segments(), [Segment::Index(1), Segment::Index(2)]);
        assert_eq!(path.to_string(), "[1][2]");
    }

    #[test]
    fn non_numeric_bracket_is_a_key() {
        let path = PropertyPath::parse("a[name]").unwrap();
        assert_eq!(path.segments()[1], Segment::Key("name".into()));
    }

    #[test]
    fn rejects_malformed_paths() {
        for text in ["", ".a", "a.", "a..b", "a[", "a[]", "a[0]b"] {
            assert!(
                matches!(
                    PropertyPath::parse(text),
                    Err(MutationError::InvalidPath { .. })
                ),
                "`{text}` should be rejected"
            );
        }
    }

    #[test]
    fn children_and_parent() {
        let base = PropertyPath::parse("a").unwrap();
        let child = base.child_index(3).child_key("b");
        assert_eq!(child.to_string(), "a[3].b");
        assert!(child.starts_with(&base));
        assert!(!base.starts_with(&child));
        assert_eq!(child.parent().unwrap().to_string(), "a[3]");
        assert_eq!(PropertyPath::root().parent(), None);
    }

    #[test]
    fn serializes_as_canonical_text() {
        let path: PropertyPath = serde_json::from_str("\"a.[1].b\"").unwrap();
        assert_eq!(serde_json::to_string(&path).unwrap(), "\"a[1].b\"");
        assert!(serde_json::from_str::<PropertyPath>("\"a..b\"").is_err());
    }

    #[test]
    fn numeric_key_doubles_as_index() {
        let path = PropertyPath::parse("list.0").unwrap();
        assert_eq!(path.segments()[1].as_index(), Some(0));
        assert_eq!(path.segments()[1], Segment::Key("0".into()));
    }
}
