// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The engine: owner of every subsystem, and the update and execution loops.

use core::fmt;
use std::rc::Rc;

use tracing::{debug, trace};
use understory_mutation::{Mutation, apply};

use crate::config::{EngineConfig, ExecutionOrder};
use crate::emitter::{EventEmitter, ListenerCallback, ListenerId};
use crate::error::EngineError;
use crate::event::{Event, EventDispatch, IntegrityEvent, Notification, PropertyEvent, TargetEvent};
use crate::frame::{FrameFn, FrameOutput, FrameRegistry};
use crate::graph::{DependencyGraph, Priorities};
use crate::integrity::{IntegrityEntry, IntegrityRegistry};
use crate::object::{Metadata, MutableObject};
use crate::queue::{BareExecutionContext, ExecutionContext, Scheduler};
use crate::reference::{ObjectId, PropertyReference, Reference};
use crate::store::ObjectStore;

/// What one call to [`Engine::execute`] did.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Queues drained to completion.
    pub queues: usize,
    /// Contexts run.
    pub executed: usize,
}

/// An incremental recomputation engine.
///
/// The engine owns the object store, the integrity registry, the listeners,
/// the frames, the dependency graph, and the scheduler. Everything happens
/// synchronously on the caller's thread:
///
/// 1. [`update`](Self::update) applies mutations to an object and emits a
///    `property:updated` event per changed path, for the object's id and
///    each of its aliases.
/// 2. Listeners react, usually by [`enqueue`](Self::enqueue)-ing frames.
/// 3. [`execute`](Self::execute) runs queued frames and applies their output
///    the same way, until no work is left.
///
/// # Example
///
/// ```rust
/// use std::rc::Rc;
/// use serde_json::json;
/// use understory_mutation::Mutation;
/// use understory_recalc::{
///     BareExecutionContext, ElementPattern, Engine, FrameOutput, MutableObject, ObjectId,
///     PropertyPattern, Reference, ReferencePattern, TargetEvent,
/// };
///
/// let mut engine = Engine::default();
/// let source = ObjectId::new("a");
/// let derived = ObjectId::new("b");
/// engine.add_object(MutableObject::new(source.clone())).unwrap();
/// engine.add_object(MutableObject::new(derived.clone())).unwrap();
///
/// // b.double = a.value * 2
/// engine
///     .register_frame(&derived, "double", Rc::new(|scope| {
///         let value = scope
///             .engine()
///             .object(&ObjectId::new("a"))
///             .and_then(|a| a.get("value"))
///             .and_then(|v| v.as_i64())
///             .unwrap_or(0);
///         Ok(FrameOutput::from(Mutation::overriding("double", json!(value * 2))))
///     }))
///     .unwrap();
/// engine.add_listener(
///     Some(&derived),
///     TargetEvent::PropertyUpdated(vec![PropertyPattern::new(
///         ReferencePattern::id("a"),
///         ElementPattern::equals("value"),
///     )]),
///     Rc::new(|engine, notification| {
///         let bare = BareExecutionContext::new("double").with_notification(notification.clone());
///         engine.enqueue(&Reference::id("b"), &bare).map(drop)
///     }),
///     vec![],
/// );
///
/// engine.update(&source, [Mutation::set("value", json!(21))]).unwrap();
/// engine.execute().unwrap();
/// assert_eq!(engine.object(&derived).unwrap().get("double"), Some(&json!(42)));
/// ```
pub struct Engine {
    config: EngineConfig,
    store: ObjectStore,
    integrity: IntegrityRegistry,
    emitter: EventEmitter,
    frames: FrameRegistry,
    graph: DependencyGraph,
    scheduler: Scheduler,
    cause: Option<Rc<EventDispatch>>,
}

impl Engine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            store: ObjectStore::new(config.alias_path.clone()),
            emitter: EventEmitter::new(config.listener_bucket_warning),
            integrity: IntegrityRegistry::new(),
            frames: FrameRegistry::new(),
            graph: DependencyGraph::new(),
            scheduler: Scheduler::new(),
            cause: None,
            config,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the object store.
    #[must_use]
    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    /// Returns the integrity registry.
    #[must_use]
    pub fn integrity(&self) -> &IntegrityRegistry {
        &self.integrity
    }

    /// Returns the listener registry.
    #[must_use]
    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    /// Returns the frame registry.
    #[must_use]
    pub fn frames(&self) -> &FrameRegistry {
        &self.frames
    }

    /// Returns the dependency graph.
    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Returns the scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Returns the object with `id`.
    #[must_use]
    pub fn object(&self, id: &ObjectId) -> Option<&MutableObject> {
        self.store.get(id)
    }

    /// Returns the metadata slots of `id`.
    pub fn metadata_mut(&mut self, id: &ObjectId) -> Option<&mut Metadata> {
        self.store.get_mut(id).map(MutableObject::metadata_mut)
    }

    /// Adds an object and emits `reference:added` for its id and aliases.
    ///
    /// # Errors
    ///
    /// See [`ObjectStore::add`]. Listener failures are propagated.
    pub fn add_object(&mut self, object: MutableObject) -> Result<(), EngineError> {
        for event in self.store.add(object)? {
            self.emit(event)?;
        }
        Ok(())
    }

    /// Removes an object and everything attached to it.
    ///
    /// Its integrity entries are removed (tearing down the listeners bound to
    /// them), and so are its frames, the listeners installed for it, its
    /// dependency records, and its pending executions. Then the integrity
    /// removals and `reference:removed` events are emitted.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownObject`] if there is no such object.
    pub fn remove_object(&mut self, id: &ObjectId) -> Result<MutableObject, EngineError> {
        let (object, reference_events) = self
            .store
            .remove(id)
            .ok_or_else(|| EngineError::UnknownObject(id.clone()))?;

        let integrity_events = self.integrity.remove_by_object_id(id);
        for event in &integrity_events {
            self.retire(event);
        }
        let frames = self.frames.remove_object(id);
        let listeners = self.emitter.remove_by_owner(id);
        self.graph.remove_object(id);
        let pending = self.scheduler.remove_object(id);
        debug!(object = %id, frames, listeners, pending, "object detached");

        for event in integrity_events {
            self.emit(event)?;
        }
        for event in reference_events {
            self.emit(event)?;
        }
        Ok(object)
    }

    /// Applies `mutations` to object `id`.
    ///
    /// Returns `false`, with nothing published or emitted, if the batch
    /// changed nothing.
    ///
    /// # Errors
    ///
    /// Fails without changing anything if the object is unknown, a mutation
    /// is invalid, or the new data has invalid or conflicting aliases.
    pub fn update(
        &mut self,
        id: &ObjectId,
        mutations: impl IntoIterator<Item = Mutation>,
    ) -> Result<bool, EngineError> {
        self.apply_output(id, FrameOutput::from(mutations.into_iter().collect::<Vec<_>>()))
    }

    /// Applies a frame's output to object `id`.
    ///
    /// In order: the mutations are applied to a copy of the data and the new
    /// aliases validated; integrity entries are upserted and bound to the
    /// object, tearing down listeners and dependency records tied to
    /// previous values; dependency entries are recorded; if the data changed,
    /// the snapshot is published and aliases reindexed. Finally integrity,
    /// reference, and property events are emitted, in that order.
    ///
    /// # Errors
    ///
    /// Same as [`update`](Self::update). Listener failures are propagated.
    pub fn apply_output(&mut self, id: &ObjectId, output: FrameOutput) -> Result<bool, EngineError> {
        let object = self
            .store
            .get(id)
            .ok_or_else(|| EngineError::UnknownObject(id.clone()))?;
        let applied = apply(object.data(), &output.mutations).map_err(|source| EngineError::Mutation {
            object: id.clone(),
            source,
        })?;
        let changed = applied.is_changed();
        let aliases = if changed {
            let aliases = self.store.aliases_in(id, &applied.data)?;
            self.store.check_aliases(id, &aliases)?;
            Some(aliases)
        } else {
            None
        };

        let mut integrity_events = Vec::new();
        for entry in output.integrity_entries {
            self.integrity.index(&entry.key, id);
            if let Some(event) = self.integrity.upsert(entry) {
                self.retire(&event);
                integrity_events.push(event);
            }
        }
        for dependency in output.dependencies {
            self.graph.add(dependency);
        }

        let mut reference_events = Vec::new();
        let mut property_events = Vec::new();
        if let Some(aliases) = aliases {
            let object = self
                .store
                .get_mut(id)
                .ok_or_else(|| EngineError::UnknownObject(id.clone()))?;
            object.publish(applied.data);
            debug!(object = %id, version = object.version(), changed = applied.changed.len(), "object updated");
            reference_events = self.store.reindex_with(id, aliases);

            let mut references = vec![Reference::Id(id.clone())];
            references.extend(self.store.aliases_of(id).map(Reference::alias));
            for path in &applied.changed {
                for reference in &references {
                    property_events.push(PropertyEvent::Updated(PropertyReference::new(
                        reference.clone(),
                        path.clone(),
                    )));
                }
            }
        }

        for event in integrity_events {
            self.emit(event)?;
        }
        for event in reference_events {
            self.emit(event)?;
        }
        for event in property_events {
            self.emit(event)?;
        }
        Ok(changed)
    }

    /// Tears down what an integrity change invalidates.
    fn retire(&mut self, event: &IntegrityEvent) {
        self.emitter.on_integrity_event(event);
        if !matches!(event, IntegrityEvent::Added(_)) {
            self.graph.remove_integrity_key(&event.entry().key);
        }
    }

    /// Registers a listener. See [`EventEmitter::add_listener`].
    pub fn add_listener(
        &mut self,
        owner: Option<&ObjectId>,
        target: TargetEvent,
        callback: ListenerCallback,
        integrity_entries: Vec<IntegrityEntry>,
    ) -> ListenerId {
        self.emitter
            .add_listener(owner, target, callback, integrity_entries)
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&mut self, id: &ListenerId) -> bool {
        self.emitter.remove_listener(id)
    }

    /// Emits `event` to every matching listener.
    ///
    /// This is also the entry point for synthetic events: a constructed
    /// event schedules exactly what the equivalent real change would.
    ///
    /// # Errors
    ///
    /// Stops at the first failing listener and returns its error.
    pub fn emit(&mut self, event: impl Into<Event>) -> Result<(), EngineError> {
        let dispatch = Rc::new(EventDispatch::new(event.into(), self.cause.clone()));
        self.dispatch(dispatch)
    }

    /// Delivers an already built dispatch.
    ///
    /// Listeners removed by an earlier callback of the same dispatch are not
    /// invoked.
    ///
    /// # Errors
    ///
    /// Stops at the first failing listener and returns its error.
    pub fn dispatch(&mut self, dispatch: Rc<EventDispatch>) -> Result<(), EngineError> {
        trace!(event = %dispatch.event(), depth = dispatch.explain().len(), "emit");
        for matched in self.emitter.matching(dispatch.event()) {
            if !self.emitter.has(&matched.id) {
                continue;
            }
            trace!(listener = %matched.id, "invoke listener");
            let notification = Notification {
                dispatch: Rc::clone(&dispatch),
                listener: matched.id,
                matches: matched.matches,
            };
            let previous = self.cause.replace(Rc::clone(&dispatch));
            let result = (matched.callback)(self, &notification);
            self.cause = previous;
            result?;
        }
        Ok(())
    }

    /// Registers frame `name` on `object`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateFrame`] if the name is taken.
    pub fn register_frame(
        &mut self,
        object: &ObjectId,
        name: impl Into<String>,
        func: FrameFn,
    ) -> Result<(), EngineError> {
        self.frames.register(object, name, func).map(drop)
    }

    /// Schedules `bare` on the object `reference` strictly resolves to.
    ///
    /// Returns `None` if the same recomputation is already pending.
    ///
    /// # Errors
    ///
    /// Fails if the reference does not resolve to exactly one object, or an
    /// argument provider fails.
    pub fn enqueue(
        &mut self,
        reference: &Reference,
        bare: &BareExecutionContext,
    ) -> Result<Option<Rc<ExecutionContext>>, EngineError> {
        let id = self.store.get_by_strict_reference(reference)?.id().clone();
        self.scheduler.enqueue(&id, bare)
    }

    /// Unschedules `bare` on the object `reference` strictly resolves to.
    ///
    /// # Errors
    ///
    /// Same as [`enqueue`](Self::enqueue).
    pub fn dequeue(&mut self, reference: &Reference, bare: &BareExecutionContext) -> Result<bool, EngineError> {
        let id = self.store.get_by_strict_reference(reference)?.id().clone();
        self.scheduler.dequeue(&id, bare)
    }

    /// Computes the current execution priorities.
    #[must_use]
    pub fn priorities(&self) -> Priorities {
        self.graph.priorities(&self.store)
    }

    /// Runs queued frames until no work is left.
    ///
    /// Queues drain in order; within a queue, contexts run in the configured
    /// [`ExecutionOrder`]. Work scheduled while a queue runs lands in a later
    /// queue of the same call.
    ///
    /// # Errors
    ///
    /// Stops at the first failure. The failed context counts as run; the
    /// rest stay queued for the next call.
    pub fn execute(&mut self) -> Result<ExecutionReport, EngineError> {
        let mut report = ExecutionReport::default();
        let result = self.drain(&mut report);
        self.scheduler.reset_cursor();
        debug!(queues = report.queues, executed = report.executed, "execution stopped");
        result.map(|()| report)
    }

    fn drain(&mut self, report: &mut ExecutionReport) -> Result<(), EngineError> {
        while self.scheduler.queue_count() > 0 {
            let priorities = match self.config.execution_order {
                ExecutionOrder::DependencyPriority => Some(self.priorities()),
                ExecutionOrder::Insertion => None,
            };
            if self.scheduler.begin(priorities.as_ref()).is_none() {
                break;
            }
            while let Some(context) = self.scheduler.next() {
                report.executed += 1;
                self.run(&context)?;
            }
            if self.scheduler.finish() {
                report.queues += 1;
            }
        }
        Ok(())
    }

    fn run(&mut self, context: &ExecutionContext) -> Result<(), EngineError> {
        let frame = self
            .frames
            .get(context.object(), context.name())
            .ok_or_else(|| EngineError::UnknownFrame {
                object: context.object().clone(),
                name: context.name().to_owned(),
            })?
            .func();
        debug!(context = %context.id(), queue = context.queue(), "running frame");

        let cause = context.notification().map(|notification| Rc::clone(&notification.dispatch));
        let previous = core::mem::replace(&mut self.cause, cause);
        let output = frame(&mut FrameScope {
            engine: self,
            context,
        });
        let result = output.and_then(|output| self.apply_output(context.object(), output));
        self.cause = previous;
        result.map(drop)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("integrity", &self.integrity)
            .field("emitter", &self.emitter)
            .field("frames", &self.frames)
            .field("graph", &self.graph)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

/// What a running frame sees: the engine and its execution context.
pub struct FrameScope<'a> {
    engine: &'a mut Engine,
    context: &'a ExecutionContext,
}

impl FrameScope<'_> {
    /// Returns the execution context.
    #[must_use]
    pub fn context(&self) -> &ExecutionContext {
        self.context
    }

    /// Returns the id of the object the frame runs on.
    #[must_use]
    pub fn object_id(&self) -> &ObjectId {
        self.context.object()
    }

    /// Returns the object the frame runs on.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownObject`] if it has been removed.
    pub fn object(&self) -> Result<&MutableObject, EngineError> {
        self.engine
            .object(self.context.object())
            .ok_or_else(|| EngineError::UnknownObject(self.context.object().clone()))
    }

    /// Returns one execution argument.
    #[must_use]
    pub fn argument(&self, name: &str) -> Option<&serde_json::Value> {
        self.context.argument(name)
    }

    /// Returns the notification that scheduled this run, if any.
    #[must_use]
    pub fn notification(&self) -> Option<&Notification> {
        self.context.notification()
    }

    /// Returns the engine.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        self.engine
    }

    /// Returns the engine mutably.
    pub fn engine_mut(&mut self) -> &mut Engine {
        self.engine
    }

    /// Returns the metadata slots of the frame's object.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownObject`] if it has been removed.
    pub fn metadata_mut(&mut self) -> Result<&mut Metadata, EngineError> {
        let id = self.context.object();
        self.engine
            .metadata_mut(id)
            .ok_or_else(|| EngineError::UnknownObject(id.clone()))
    }

    /// Installs a listener owned by the frame's object.
    pub fn add_listener(
        &mut self,
        target: TargetEvent,
        callback: ListenerCallback,
        integrity_entries: Vec<IntegrityEntry>,
    ) -> ListenerId {
        let owner = self.context.object();
        self.engine
            .add_listener(Some(owner), target, callback, integrity_entries)
    }

    /// Schedules `bare`; self references mean the frame's object.
    ///
    /// # Errors
    ///
    /// See [`Engine::enqueue`].
    pub fn enqueue(
        &mut self,
        reference: &Reference,
        bare: &BareExecutionContext,
    ) -> Result<Option<Rc<ExecutionContext>>, EngineError> {
        let reference = reference.resolve_self(self.context.object());
        self.engine.enqueue(&reference, bare)
    }

    /// Unschedules `bare`; self references mean the frame's object.
    ///
    /// # Errors
    ///
    /// See [`Engine::dequeue`].
    pub fn dequeue(&mut self, reference: &Reference, bare: &BareExecutionContext) -> Result<bool, EngineError> {
        let reference = reference.resolve_self(self.context.object());
        self.engine.dequeue(&reference, bare)
    }
}

impl fmt::Debug for FrameScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameScope")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;
    use serde_json::json;

    use crate::event::ReferenceEvent;
    use crate::pattern::{ElementPattern, PropertyPattern, ReferencePattern};

    type Log = Rc<RefCell<Vec<String>>>;

    fn probe(engine: &mut Engine, target: TargetEvent) -> Log {
        let log = Log::default();
        let sink = Rc::clone(&log);
        engine.add_listener(
            None,
            target,
            Rc::new(move |_, notification| {
                sink.borrow_mut().push(notification.event().to_string());
                Ok(())
            }),
            vec![],
        );
        log
    }

    fn any_property() -> TargetEvent {
        TargetEvent::PropertyUpdated(vec![PropertyPattern::new(
            ReferencePattern::new(None, ElementPattern::Any),
            ElementPattern::Any,
        )])
    }

    fn with_aliases(id: &str, aliases: &[&str]) -> MutableObject {
        MutableObject::with_data(id, json!({ "__": { "aliases": aliases } }))
    }

    #[test]
    fn updates_fan_out_over_id_and_aliases() {
        let mut engine = Engine::default();
        let id = ObjectId::new("1");
        engine.add_object(with_aliases("1", &["one"])).unwrap();
        let log = probe(&mut engine, any_property());

        assert!(engine.update(&id, [Mutation::set("level", json!(3))]).unwrap());
        assert_eq!(
            *log.borrow(),
            ["property:updated id:1::level", "property:updated alias:one::level"]
        );
    }

    #[test]
    fn no_op_updates_emit_nothing() {
        let mut engine = Engine::default();
        let id = ObjectId::new("1");
        engine.add_object(MutableObject::new("1")).unwrap();
        engine.update(&id, [Mutation::set("level", json!(3))]).unwrap();
        let log = probe(&mut engine, any_property());

        assert!(!engine.update(&id, [Mutation::overriding("level", json!(3))]).unwrap());
        assert!(!engine.update(&id, [Mutation::delete("missing")]).unwrap());
        assert!(log.borrow().is_empty());
        assert_eq!(engine.object(&id).unwrap().version(), 1);
    }

    #[test]
    fn alias_changes_are_validated_before_publishing() {
        let mut engine = Engine::default();
        engine.add_object(with_aliases("1", &["x"])).unwrap();
        engine.add_object(MutableObject::new("2")).unwrap();
        let two = ObjectId::new("2");

        let result = engine.update(&two, [Mutation::set("__", json!({ "aliases": ["x"] }))]);
        assert!(matches!(result, Err(EngineError::DuplicateAlias { .. })));
        assert_eq!(engine.object(&two).unwrap().version(), 0);

        let log = probe(
            &mut engine,
            TargetEvent::ReferenceAdded(vec![ReferencePattern::alias("y")]),
        );
        engine
            .update(&two, [Mutation::set("__", json!({ "aliases": ["y"] }))])
            .unwrap();
        assert_eq!(*log.borrow(), ["reference:added alias:y -> 2"]);
    }

    #[test]
    fn integrity_updates_drop_bound_listeners_before_events_fire() {
        let mut engine = Engine::default();
        let id = ObjectId::new("1");
        engine.add_object(MutableObject::new("1")).unwrap();
        let entry = IntegrityEntry::new("1::level", "a");
        engine
            .apply_output(&id, FrameOutput::new().with_integrity_entry(entry.clone()))
            .unwrap();
        let bound = engine.add_listener(None, any_property(), Rc::new(|_, _| Ok(())), vec![entry]);

        let output = FrameOutput::from(Mutation::set("level", json!(1)))
            .with_integrity_entry(IntegrityEntry::new("1::level", "b"));
        engine.apply_output(&id, output).unwrap();
        assert!(!engine.emitter().has(&bound));
        assert_eq!(engine.integrity().objects_for("1::level").count(), 1);
    }

    #[test]
    fn remove_object_cascades() {
        let mut engine = Engine::default();
        let id = ObjectId::new("1");
        engine.add_object(with_aliases("1", &["x"])).unwrap();
        engine
            .register_frame(&id, "f", Rc::new(|_| Ok(FrameOutput::new())))
            .unwrap();
        engine.add_listener(Some(&id), any_property(), Rc::new(|_, _| Ok(())), vec![]);
        engine
            .apply_output(
                &id,
                FrameOutput::new().with_integrity_entry(IntegrityEntry::new("1::f", 1)),
            )
            .unwrap();
        engine.enqueue(&Reference::alias("x"), &BareExecutionContext::new("f")).unwrap();

        let removed = probe(
            &mut engine,
            TargetEvent::ReferenceRemoved(vec![ReferencePattern::new(None, ElementPattern::Any)]),
        );
        engine.remove_object(&id).unwrap();

        assert_eq!(
            *removed.borrow(),
            ["reference:removed alias:x -> 1", "reference:removed id:1 -> 1"]
        );
        assert!(engine.integrity().is_empty());
        assert!(engine.frames().names(&id).is_empty());
        assert!(engine.emitter().owned_by(&id).is_empty());
        assert!(engine.scheduler().is_idle());
        assert!(matches!(engine.remove_object(&id), Err(EngineError::UnknownObject(_))));
    }

    #[test]
    fn unknown_frames_are_fatal() {
        let mut engine = Engine::default();
        engine.add_object(MutableObject::new("1")).unwrap();
        engine
            .enqueue(&Reference::id("1"), &BareExecutionContext::new("missing"))
            .unwrap();
        assert!(matches!(engine.execute(), Err(EngineError::UnknownFrame { .. })));
        assert!(engine.scheduler().current().is_none());
    }

    #[test]
    fn failures_leave_the_rest_of_the_queue_for_later() {
        let mut engine = Engine::new(EngineConfig::new().with_execution_order(ExecutionOrder::Insertion));
        let id = ObjectId::new("1");
        engine.add_object(MutableObject::new("1")).unwrap();
        engine
            .register_frame(
                &id,
                "fail",
                Rc::new(|scope| {
                    Err(EngineError::Frame {
                        object: scope.object_id().clone(),
                        name: "fail".into(),
                        reason: "boom".into(),
                    })
                }),
            )
            .unwrap();
        engine
            .register_frame(
                &id,
                "ok",
                Rc::new(|_| Ok(Mutation::overriding("ok", json!(true)).into())),
            )
            .unwrap();
        engine.enqueue(&Reference::id("1"), &BareExecutionContext::new("fail")).unwrap();
        engine.enqueue(&Reference::id("1"), &BareExecutionContext::new("ok")).unwrap();

        assert!(matches!(engine.execute(), Err(EngineError::Frame { .. })));
        assert_eq!(engine.object(&id).unwrap().get("ok"), None);

        let report = engine.execute().unwrap();
        assert_eq!(report, ExecutionReport { queues: 1, executed: 1 });
        assert_eq!(engine.object(&id).unwrap().get("ok"), Some(&json!(true)));
    }

    #[test]
    fn dispatches_record_their_cause() {
        let mut engine = Engine::default();
        let a = ObjectId::new("a");
        let b = ObjectId::new("b");
        engine.add_object(MutableObject::new("a")).unwrap();
        engine.add_object(MutableObject::new("b")).unwrap();
        engine
            .register_frame(
                &b,
                "copy",
                Rc::new(|_| Ok(Mutation::overriding("copied", json!(true)).into())),
            )
            .unwrap();
        engine.add_listener(
            Some(&b),
            TargetEvent::PropertyUpdated(vec![PropertyPattern::new(
                ReferencePattern::id("a"),
                ElementPattern::equals("source"),
            )]),
            Rc::new(|engine, notification| {
                let bare = BareExecutionContext::new("copy").with_notification(notification.clone());
                engine.enqueue(&Reference::id("b"), &bare).map(drop)
            }),
            vec![],
        );

        let chains: Rc<RefCell<Vec<Vec<String>>>> = Rc::default();
        let sink = Rc::clone(&chains);
        engine.add_listener(
            None,
            TargetEvent::PropertyUpdated(vec![PropertyPattern::new(
                ReferencePattern::id("b"),
                ElementPattern::Any,
            )]),
            Rc::new(move |_, notification| {
                let chain = notification.dispatch.explain().iter().map(ToString::to_string).collect();
                sink.borrow_mut().push(chain);
                Ok(())
            }),
            vec![],
        );

        engine.update(&a, [Mutation::set("source", json!(1))]).unwrap();
        engine.execute().unwrap();
        assert_eq!(
            *chains.borrow(),
            [vec![
                "property:updated id:a::source".to_owned(),
                "property:updated id:b::copied".to_owned(),
            ]]
        );
    }

    #[test]
    fn synthetic_events_use_the_listener_path() {
        let mut engine = Engine::default();
        let log = probe(
            &mut engine,
            TargetEvent::ReferenceAdded(vec![ReferencePattern::alias("late")]),
        );
        engine
            .emit(ReferenceEvent::Added {
                reference: Reference::alias("late"),
                object: ObjectId::new("9"),
            })
            .unwrap();
        assert_eq!(log.borrow().len(), 1);
    }
}
