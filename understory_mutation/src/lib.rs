// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Understory Mutation: typed edits over JSON data trees.
//!
//! This crate is the data layer beneath an incremental recomputation engine.
//! It knows nothing about objects, events, or scheduling; it only answers
//! "given this tree and these edits, what is the new tree and which property
//! paths changed?"
//!
//! - **Paths** ([`PropertyPath`]): dot/bracket addresses such as `modes[0].level`.
//! - **Mutations** ([`Mutation`]): `SET`, `OVERRIDE`, `MERGE`, and `DELETE`.
//! - **Application** ([`apply`]): clone-and-apply a batch, returning the new
//!   tree plus the changed paths ([`Applied`]).
//!
//! Deep-equal `OVERRIDE`/`MERGE` results and deletes of absent paths are
//! no-ops. This is what lets a web of recomputations converge instead of
//! looping forever.
//!
//! ## Example
//!
//! ```rust
//! use serde_json::json;
//! use understory_mutation::{Mutation, apply};
//!
//! let data = json!({});
//! let first = apply(&data, &[Mutation::set("level", 10)]).unwrap();
//! assert!(first.is_changed());
//!
//! // Setting an existing property is a programming error...
//! assert!(apply(&first.data, &[Mutation::set("level", 11)]).is_err());
//!
//! // ...while overriding with the same value changes nothing.
//! let again = apply(&first.data, &[Mutation::overriding("level", 10)]).unwrap();
//! assert!(!again.is_changed());
//! ```

mod error;
mod mutation;
mod path;
pub mod tree;

pub use error::MutationError;
pub use mutation::{Applied, Mutation, apply};
pub use path::{PropertyPath, Segment};
