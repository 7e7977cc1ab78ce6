// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Understory Recalc: an incremental recomputation engine over JSON objects.
//!
//! Objects hold JSON data and name each other through references, either by
//! id or by alias. Changing an object's data emits events; listeners react
//! to events by scheduling frames; frames read objects and return mutations
//! that emit more events, until nothing changes any more.
//!
//! - **Objects** ([`MutableObject`], [`ObjectStore`]): versioned data with
//!   aliases read from the data itself (`__.aliases` by default).
//! - **Events** ([`Event`], [`TargetEvent`], [`EventEmitter`]): property,
//!   reference, and integrity events matched against patterns, with the
//!   causal chain of each dispatch kept in [`EventDispatch`].
//! - **Integrity entries** ([`IntegrityEntry`], [`IntegrityRegistry`]): keyed
//!   values that listeners and dependency records are bound to; when the
//!   value changes, everything bound to the old one is torn down.
//! - **Frames** ([`MutationFrame`], [`FrameOutput`]): named recomputations
//!   registered per object.
//! - **Scheduling** ([`Scheduler`], [`DependencyGraph`]): deduplicated call
//!   queues run in generations, ordered so that dependencies run before the
//!   objects that depend on them.
//! - **Strategies** ([`Strategy`], [`ProxyListener`], [`Processing`]):
//!   reusable bundles of frames and listeners, and expression processing that
//!   waits for missing symbols.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::rc::Rc;
//! use serde_json::json;
//! use understory_mutation::Mutation;
//! use understory_recalc::{
//!     ElementPattern, Engine, EnqueueOptions, FrameOutput, MutableObject, ObjectId,
//!     PropertyPattern, Reference, ReferencePattern, Strategy,
//! };
//!
//! let mut engine = Engine::default();
//! let parent = ObjectId::new("11174");
//! let child = ObjectId::new("11290");
//! engine
//!     .add_object(MutableObject::with_data(
//!         "11174",
//!         json!({ "__": { "aliases": ["ST:Basic Move"] } }),
//!     ))
//!     .unwrap();
//! engine.add_object(MutableObject::new("11290")).unwrap();
//!
//! // The child's level follows its parent's, found through the alias.
//! Strategy::new()
//!     .on_property_updated_enqueue(
//!         vec![PropertyPattern::new(
//!             ReferencePattern::alias("ST:Basic Move"),
//!             ElementPattern::equals("level"),
//!         )],
//!         "level",
//!         Rc::new(|scope| {
//!             let parent = scope
//!                 .engine()
//!                 .store()
//!                 .get_by_strict_reference(&Reference::alias("ST:Basic Move"))?
//!                 .get("level")
//!                 .and_then(|level| level.as_i64())
//!                 .unwrap_or(0);
//!             Ok(FrameOutput::from(Mutation::overriding("level", json!(parent + 1))))
//!         }),
//!         EnqueueOptions::new(),
//!     )
//!     .apply(&mut engine, &child)
//!     .unwrap();
//!
//! engine.update(&parent, [Mutation::set("level", json!(10))]).unwrap();
//! engine.execute().unwrap();
//! assert_eq!(engine.object(&child).unwrap().get("level"), Some(&json!(11)));
//! ```
//!
//! Everything runs synchronously on the caller's thread; [`Engine::execute`]
//! returns once every scheduled recomputation has run.

mod config;
mod emitter;
mod engine;
mod error;
mod event;
mod frame;
mod graph;
mod integrity;
mod object;
mod pattern;
mod queue;
mod reference;
mod store;
mod strategy;

pub use config::{DEFAULT_LISTENER_BUCKET_WARNING, EngineConfig, ExecutionOrder};
pub use emitter::{EventEmitter, Listener, ListenerCallback, ListenerId};
pub use engine::{Engine, ExecutionReport, FrameScope};
pub use error::EngineError;
pub use event::{
    Event, EventDispatch, EventKind, IntegrityEvent, Notification, PropertyEvent, ReferenceEvent,
    TargetEvent,
};
pub use frame::{FrameFn, FrameOutput, FrameRegistry, MutationFrame};
pub use graph::{Adjacency, CircularDependency, DependencyEntry, DependencyGraph, Priorities};
pub use integrity::{IntegrityEntry, IntegrityRegistry};
pub use object::{Metadata, MutableObject};
pub use pattern::{
    Captures, ElementPattern, IntegrityEntryPattern, PatternMatch, PropertyPattern,
    ReferencePattern, ReferenceTarget,
};
pub use queue::{
    ArgumentProvider, Arguments, BareExecutionContext, ContextId, Cursor, ExecutionContext,
    Scheduler,
};
pub use reference::{ObjectId, PropertyReference, Reference, ReferenceKind};
pub use store::ObjectStore;
pub use strategy::{
    CallbackFactory, EnqueueOptions, Processing, ProcessingOutcome, Processor, ProxyListener,
    Resolution, Strategy, SymbolTable, regex_index_argument,
};
