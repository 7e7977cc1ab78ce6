// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Declarative composition of frames and listeners.
//!
//! A [`Strategy`] is built once and applied to any number of objects. Each
//! application registers the strategy's frames on the object and installs
//! its listeners with self references resolved to that object.
//!
//! Frames that discover dependencies at run time use a [`ProxyListener`] to
//! be woken up once the dependency changes, and the [`Processing`] delegate
//! builds on that to converge expressions over several generations.

mod processing;

pub use processing::{Processing, ProcessingOutcome, Processor, Resolution, SymbolTable};

use core::fmt;
use std::collections::BTreeSet;
use std::rc::Rc;

use serde_json::Value;
use tracing::debug;

use crate::emitter::{ListenerCallback, ListenerId};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::event::{Event, Notification, PropertyEvent, TargetEvent};
use crate::frame::FrameFn;
use crate::integrity::IntegrityEntry;
use crate::pattern::PropertyPattern;
use crate::queue::{ArgumentProvider, Arguments, BareExecutionContext};
use crate::reference::{ObjectId, Reference};

/// Builds the callback of a listener for the object it is installed on.
pub type CallbackFactory = Rc<dyn Fn(&ObjectId) -> ListenerCallback>;

struct ListenerTemplate {
    target: TargetEvent,
    factory: CallbackFactory,
    integrity_entries: Vec<IntegrityEntry>,
}

/// Extra scheduling options for [`Strategy::on_property_updated_enqueue`].
#[derive(Clone, Default)]
pub struct EnqueueOptions {
    /// Fixed arguments for every scheduled execution.
    pub arguments: Arguments,
    /// Argument providers run against each scheduled execution.
    pub providers: Vec<ArgumentProvider>,
    /// Integrity entries the listener's lifetime is bound to.
    pub integrity_entries: Vec<IntegrityEntry>,
}

impl EnqueueOptions {
    /// Returns empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fixed argument.
    #[must_use]
    pub fn with_argument(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    /// Adds an argument provider.
    #[must_use]
    pub fn with_provider(mut self, provider: ArgumentProvider) -> Self {
        self.providers.push(provider);
        self
    }

    /// Binds the listener to integrity entries.
    #[must_use]
    pub fn with_integrity_entries(mut self, entries: Vec<IntegrityEntry>) -> Self {
        self.integrity_entries = entries;
        self
    }
}

impl fmt::Debug for EnqueueOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnqueueOptions")
            .field("arguments", &self.arguments)
            .field("providers", &self.providers.len())
            .field("integrity_entries", &self.integrity_entries)
            .finish()
    }
}

/// A reusable set of frames and listeners.
///
/// # Example
///
/// ```rust
/// use std::rc::Rc;
/// use serde_json::json;
/// use understory_mutation::Mutation;
/// use understory_recalc::{
///     ElementPattern, Engine, EnqueueOptions, FrameOutput, MutableObject, ObjectId,
///     PropertyPattern, Strategy,
/// };
///
/// // Whenever `base` changes, recompute `total = base + 1`.
/// let strategy = Strategy::new().on_property_updated_enqueue(
///     vec![PropertyPattern::on_self(ElementPattern::equals("base"))],
///     "total",
///     Rc::new(|scope| {
///         let base = scope.object()?.get("base").and_then(|v| v.as_i64()).unwrap_or(0);
///         Ok(FrameOutput::from(Mutation::overriding("total", json!(base + 1))))
///     }),
///     EnqueueOptions::new(),
/// );
///
/// let mut engine = Engine::default();
/// let id = ObjectId::new("1");
/// engine.add_object(MutableObject::new(id.clone())).unwrap();
/// strategy.apply(&mut engine, &id).unwrap();
///
/// engine.update(&id, [Mutation::set("base", json!(4))]).unwrap();
/// engine.execute().unwrap();
/// assert_eq!(engine.object(&id).unwrap().get("total"), Some(&json!(5)));
/// ```
#[derive(Default)]
pub struct Strategy {
    frames: Vec<(String, FrameFn)>,
    listeners: Vec<ListenerTemplate>,
}

impl Strategy {
    /// Creates an empty strategy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a frame.
    ///
    /// # Panics
    ///
    /// Panics if the strategy already has a frame called `name`.
    #[must_use]
    pub fn register_frame(mut self, name: impl Into<String>, func: FrameFn) -> Self {
        let name = name.into();
        assert!(
            !self.frames.iter().any(|(existing, _)| *existing == name),
            "frame `{name}` is already part of this strategy"
        );
        self.frames.push((name, func));
        self
    }

    /// Registers the re-processing frame of `processing`.
    ///
    /// # Panics
    ///
    /// Panics if a frame with the same name is already part of the strategy.
    #[must_use]
    pub fn register_processing<P: Processor + 'static>(self, processing: &Processing<P>) -> Self {
        self.register_frame(processing.frame_name(), processing.reprocessing_frame())
    }

    /// Adds a listener whose callback is built per object by `factory`.
    #[must_use]
    pub fn add_listener(
        mut self,
        target: TargetEvent,
        factory: CallbackFactory,
        integrity_entries: Vec<IntegrityEntry>,
    ) -> Self {
        self.listeners.push(ListenerTemplate {
            target,
            factory,
            integrity_entries,
        });
        self
    }

    /// Adds a `property:updated` listener.
    #[must_use]
    pub fn on_property_updated(
        self,
        patterns: Vec<PropertyPattern>,
        factory: CallbackFactory,
        integrity_entries: Vec<IntegrityEntry>,
    ) -> Self {
        self.add_listener(TargetEvent::PropertyUpdated(patterns), factory, integrity_entries)
    }

    /// Adds frame `name` and a `property:updated` listener that schedules it
    /// on the object whenever any of `patterns` matches.
    ///
    /// # Panics
    ///
    /// Panics if the strategy already has a frame called `name`.
    #[must_use]
    pub fn on_property_updated_enqueue(
        self,
        patterns: Vec<PropertyPattern>,
        name: impl Into<String>,
        frame: FrameFn,
        options: EnqueueOptions,
    ) -> Self {
        let name = name.into();
        let EnqueueOptions {
            arguments,
            providers,
            integrity_entries,
        } = options;
        let frame_name = name.clone();
        let factory: CallbackFactory = Rc::new(move |origin: &ObjectId| -> ListenerCallback {
            let origin = Reference::Id(origin.clone());
            let name = frame_name.clone();
            let arguments = arguments.clone();
            let providers = providers.clone();
            Rc::new(move |engine: &mut Engine, notification: &Notification| {
                let bare = providers.iter().fold(
                    BareExecutionContext::new(name.clone())
                        .with_arguments(arguments.clone())
                        .with_notification(notification.clone()),
                    |bare, provider| bare.with_provider(Rc::clone(provider)),
                );
                engine.enqueue(&origin, &bare).map(drop)
            })
        });
        self.register_frame(name, frame)
            .on_property_updated(patterns, factory, integrity_entries)
    }

    /// Returns the frame names, in registration order.
    pub fn frame_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.frames.iter().map(|(name, _)| name.as_str())
    }

    /// Registers every frame on `object` and installs every listener for it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateFrame`] if the object already has one
    /// of the strategy's frames; nothing is installed in that case.
    pub fn apply(&self, engine: &mut Engine, object: &ObjectId) -> Result<Vec<ListenerId>, EngineError> {
        if let Some((name, _)) = self
            .frames
            .iter()
            .find(|(name, _)| engine.frames().has(object, name))
        {
            return Err(EngineError::DuplicateFrame {
                object: object.clone(),
                name: name.clone(),
            });
        }
        for (name, func) in &self.frames {
            engine.register_frame(object, name.clone(), Rc::clone(func))?;
        }
        let listeners = self
            .listeners
            .iter()
            .map(|template| {
                engine.add_listener(
                    Some(object),
                    template.target.clone(),
                    (template.factory)(object),
                    template.integrity_entries.clone(),
                )
            })
            .collect::<Vec<_>>();
        debug!(object = %object, frames = self.frames.len(), listeners = listeners.len(), "strategy applied");
        Ok(listeners)
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strategy")
            .field("frames", &self.frame_names().collect::<Vec<_>>())
            .field(
                "listeners",
                &self
                    .listeners
                    .iter()
                    .map(|template| template.target.kind())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// A listener that schedules a frame on the object that installed it.
///
/// Installed from inside a frame that needs to be re-run once something it
/// does not control changes. The scheduled execution carries the triggering
/// notification, the extra arguments, and an `origin` argument naming the
/// installing object.
#[derive(Clone, Debug)]
pub struct ProxyListener {
    target: TargetEvent,
    frame: String,
    arguments: Arguments,
    integrity_entries: Vec<IntegrityEntry>,
}

impl ProxyListener {
    /// Schedules `frame` whenever `target` fires.
    #[must_use]
    pub fn new(target: TargetEvent, frame: impl Into<String>) -> Self {
        Self {
            target,
            frame: frame.into(),
            arguments: Arguments::new(),
            integrity_entries: Vec::new(),
        }
    }

    /// Adds an argument to the scheduled execution.
    #[must_use]
    pub fn with_argument(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    /// Adds several arguments to the scheduled execution.
    #[must_use]
    pub fn with_arguments(mut self, arguments: Arguments) -> Self {
        self.arguments.extend(arguments);
        self
    }

    /// Binds the listener's lifetime to integrity entries.
    #[must_use]
    pub fn with_integrity_entries(mut self, entries: Vec<IntegrityEntry>) -> Self {
        self.integrity_entries = entries;
        self
    }

    /// Installs the listener on behalf of `origin`.
    pub fn install(self, engine: &mut Engine, origin: &ObjectId) -> ListenerId {
        let Self {
            target,
            frame,
            mut arguments,
            integrity_entries,
        } = self;
        let reference = Reference::Id(origin.clone());
        arguments.insert("origin".to_owned(), Value::String(reference.to_string()));
        let callback: ListenerCallback = Rc::new(move |engine: &mut Engine, notification: &Notification| {
            let bare = BareExecutionContext::new(frame.clone())
                .with_arguments(arguments.clone())
                .with_notification(notification.clone());
            engine.enqueue(&reference, &bare).map(drop)
        });
        engine.add_listener(Some(origin), target, callback, integrity_entries)
    }
}

/// Provider that turns the first capture group of regex property matches
/// into an integer argument named `key`.
///
/// All matches must agree on a single index.
///
/// # Errors
///
/// The provider fails with [`EngineError::InvalidArgument`] when the
/// execution was not triggered by a `property:updated` event, when a match
/// came from a non-regex pattern, when a captured group is not an index, or
/// when the matches yield no index or several.
#[must_use]
pub fn regex_index_argument(key: impl Into<String>) -> ArgumentProvider {
    let key = key.into();
    Rc::new(move |bare: &BareExecutionContext| {
        let invalid = |reason: &str| EngineError::InvalidArgument {
            name: key.clone(),
            reason: reason.to_owned(),
        };
        let notification = bare
            .notification
            .as_ref()
            .filter(|notification| {
                matches!(notification.event(), Event::Property(PropertyEvent::Updated(_)))
            })
            .ok_or_else(|| invalid("execution was not triggered by a property update"))?;

        let mut indices = BTreeSet::new();
        for matched in &notification.matches {
            if matched.captures.is_empty() {
                return Err(invalid("match did not come from a regex pattern"));
            }
            if let Some(Some(text)) = matched.captures.get(1) {
                let index: usize = text
                    .parse()
                    .map_err(|_| invalid("captured group is not an index"))?;
                indices.insert(index);
            }
        }
        let mut indices = indices.into_iter();
        match (indices.next(), indices.next()) {
            (Some(index), None) => {
                let mut arguments = Arguments::new();
                arguments.insert(key.clone(), Value::from(index));
                Ok(arguments)
            }
            (None, _) => Err(invalid("no index was captured")),
            (Some(_), Some(_)) => Err(invalid("matches captured different indices")),
        }
    })
}
