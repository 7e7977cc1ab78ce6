// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Errors raised while parsing paths or applying mutations.

use thiserror::Error;

/// Error returned when a mutation cannot be applied.
///
/// Every variant denotes a programming error in whoever built the mutation
/// batch. A failed batch leaves the source tree untouched.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum MutationError {
    /// The path string could not be parsed.
    #[error("invalid property path `{path}`: {reason}")]
    InvalidPath {
        /// The offending path text.
        path: String,
        /// What was wrong with it.
        reason: &'static str,
    },
    /// `SET` targeted a property that already holds a value.
    #[error("property `{path}` already exists")]
    AlreadySet {
        /// The targeted path.
        path: String,
    },
    /// `MERGE` needs an object on both sides.
    #[error("property `{path}` cannot be merged: both values must be objects")]
    NotMergeable {
        /// The targeted path.
        path: String,
    },
    /// `MERGE` without the override flag found leaves present on both sides.
    #[error("merge into `{path}` would overwrite leaves {leaves:?}")]
    SharedLeafKeys {
        /// The targeted path.
        path: String,
        /// Leaf paths, relative to `path`, present on both sides.
        leaves: Vec<String>,
    },
    /// A path walks through a primitive value.
    #[error("property `{path}` is blocked by a primitive at `{at}`")]
    Blocked {
        /// The targeted path.
        path: String,
        /// The prefix holding the primitive.
        at: String,
    },
    /// An index would grow an array past the padding limit.
    #[error("index {index} in `{path}` is out of range for an array of length {len}")]
    IndexOutOfRange {
        /// The targeted path.
        path: String,
        /// The requested index.
        index: usize,
        /// Length of the array at the time of the write.
        len: usize,
    },
}
