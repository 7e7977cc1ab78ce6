// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Engine errors.

use thiserror::Error;
use understory_mutation::MutationError;

use crate::reference::{ObjectId, Reference};

/// Error returned by engine operations.
///
/// Every variant is an invariant violation: the code that registers frames,
/// listeners, and objects is inconsistent. A frame that cannot produce a
/// value *yet* is not an error; it reports "not ready" and waits for a proxy
/// listener to wake it up.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An object with this id is already stored.
    #[error("object `{0}` already exists")]
    DuplicateObject(ObjectId),
    /// No object with this id is stored.
    #[error("object `{0}` does not exist")]
    UnknownObject(ObjectId),
    /// Two objects claimed the same alias.
    #[error("alias `{alias}` of object `{claimant}` is already held by `{holder}`")]
    DuplicateAlias {
        /// The contested alias.
        alias: String,
        /// The object currently holding it.
        holder: ObjectId,
        /// The object trying to claim it.
        claimant: ObjectId,
    },
    /// The alias list in an object's data is malformed.
    #[error("aliases of object `{object}` at `{path}` must be an array of strings")]
    InvalidAliases {
        /// The object whose data is malformed.
        object: ObjectId,
        /// The configured alias path.
        path: String,
    },
    /// A strict lookup found no object.
    #[error("reference {0} does not resolve to any object")]
    UnresolvedReference(Reference),
    /// A strict lookup found more than one object.
    #[error("reference {reference} is ambiguous: {count} objects match")]
    AmbiguousReference {
        /// The reference being resolved.
        reference: Reference,
        /// How many objects it resolved to.
        count: usize,
    },
    /// A self reference was resolved without an origin object.
    #[error("self reference used without an origin object")]
    UnboundSelfReference,
    /// A mutation batch failed to apply.
    #[error("mutation of object `{object}` failed")]
    Mutation {
        /// The object being updated.
        object: ObjectId,
        /// The underlying failure.
        #[source]
        source: MutationError,
    },
    /// [`IntegrityRegistry::add`](crate::IntegrityRegistry::add) found the key taken.
    #[error("integrity entry `{0}` already exists")]
    DuplicateIntegrityEntry(String),
    /// An integrity entry was updated or removed before being added.
    #[error("integrity entry `{0}` does not exist")]
    UnknownIntegrityEntry(String),
    /// A frame name was registered twice on one object.
    #[error("frame `{name}` is already registered on object `{object}`")]
    DuplicateFrame {
        /// The object owning the frame.
        object: ObjectId,
        /// The frame name.
        name: String,
    },
    /// A scheduled frame has no registration.
    #[error("frame `{name}` is not registered on object `{object}`")]
    UnknownFrame {
        /// The object the frame was scheduled on.
        object: ObjectId,
        /// The frame name.
        name: String,
    },
    /// An execution argument is missing or malformed.
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument {
        /// The argument name.
        name: String,
        /// What was wrong with it.
        reason: String,
    },
    /// The expression processor failed.
    #[error("processing `{path}` on object `{object}` failed")]
    Processing {
        /// The object being processed.
        object: ObjectId,
        /// The target path of the processed expression.
        path: String,
        /// The processor's error.
        #[source]
        source: Box<dyn core::error::Error + Send + Sync>,
    },
    /// A frame reported a failure of its own.
    #[error("frame `{name}` on object `{object}` failed: {reason}")]
    Frame {
        /// The object the frame ran on.
        object: ObjectId,
        /// The frame name.
        name: String,
        /// Free-form description.
        reason: String,
    },
}
