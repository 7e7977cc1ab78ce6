// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Expression processing that converges across generations.
//!
//! A [`Processor`] evaluates expressions whose symbols live on other objects.
//! When a symbol is not known yet the expression is left pending, a
//! [`ProxyListener`] is installed for the property that will provide it, and
//! the re-processing frame runs once that property changes. The expression
//! is the value of an integrity entry, so changing it tears down every
//! listener installed for the old one.

use core::fmt;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use serde_json::Value;
use tracing::{debug, trace};
use understory_mutation::Mutation;

use super::ProxyListener;
use crate::engine::{Engine, FrameScope};
use crate::error::EngineError;
use crate::event::TargetEvent;
use crate::frame::{FrameFn, FrameOutput};
use crate::graph::DependencyEntry;
use crate::integrity::IntegrityEntry;
use crate::pattern::PropertyPattern;
use crate::reference::{ObjectId, Reference};

/// Symbol values handed to a [`Processor`].
pub type SymbolTable = BTreeMap<String, Value>;

/// Looks up the current value of a symbol for an object.
type SymbolResolver = Rc<dyn Fn(&Engine, &ObjectId, &str) -> Option<Value>>;

/// Returns the properties that provide a symbol, or `None` if it cannot be
/// listened for.
type SymbolPatterns = Rc<dyn Fn(&ObjectId, &str) -> Option<Vec<PropertyPattern>>>;

/// Result of one resolution attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    /// The expression evaluated.
    Ready(Value),
    /// Some symbols are still unknown.
    Pending {
        /// The symbols that were needed but not provided.
        missing: BTreeSet<String>,
    },
}

/// An expression language.
pub trait Processor {
    /// Parsed form of an expression.
    type State: 'static;
    /// Evaluation context shared by every expression of an object.
    type Environment: Clone + 'static;
    /// Parse or evaluation failure.
    type Error: core::error::Error + Send + Sync + 'static;

    /// Parses `expression`.
    ///
    /// `known` holds the symbols a previous version of the expression at the
    /// same target asked for, where they currently resolve.
    ///
    /// # Errors
    ///
    /// Returns the processor's error for malformed expressions.
    fn parse(
        &self,
        expression: &str,
        environment: &Self::Environment,
        known: &SymbolTable,
    ) -> Result<Self::State, Self::Error>;

    /// Evaluates the parsed expression against the known symbols.
    ///
    /// # Errors
    ///
    /// Returns the processor's error if evaluation fails for a reason other
    /// than a missing symbol.
    fn resolve(
        &self,
        state: &mut Self::State,
        environment: &Self::Environment,
        known: &SymbolTable,
    ) -> Result<Resolution, Self::Error>;
}

/// What [`Processing::process`] produced.
#[derive(Debug)]
pub struct ProcessingOutcome {
    /// Output for the calling frame to return.
    pub output: FrameOutput,
    /// Whether the expression evaluated.
    pub ready: bool,
    /// Symbols the expression is still waiting for.
    pub missing: BTreeSet<String>,
}

struct ProcessingState<S, E> {
    expression: String,
    environment: E,
    parsed: S,
    integrity: IntegrityEntry,
    requested: BTreeSet<String>,
    pending: BTreeSet<String>,
    listened: BTreeSet<String>,
    value: Option<Value>,
}

/// Drives a [`Processor`] from inside frames.
///
/// The state of each processed target path lives in the object's metadata,
/// under the target path itself.
pub struct Processing<P: Processor> {
    processor: Rc<P>,
    frame: String,
    resolver: SymbolResolver,
    patterns: SymbolPatterns,
}

impl<P: Processor> Clone for Processing<P> {
    fn clone(&self) -> Self {
        Self {
            processor: Rc::clone(&self.processor),
            frame: self.frame.clone(),
            resolver: Rc::clone(&self.resolver),
            patterns: Rc::clone(&self.patterns),
        }
    }
}

impl<P: Processor> fmt::Debug for Processing<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processing")
            .field("frame", &self.frame)
            .finish_non_exhaustive()
    }
}

impl<P: Processor + 'static> Processing<P> {
    /// Creates a delegate whose re-processing frame is called `frame`.
    ///
    /// No symbol resolves and none can be listened for until
    /// [`with_symbol_resolver`](Self::with_symbol_resolver) and
    /// [`with_symbol_patterns`](Self::with_symbol_patterns) are set.
    #[must_use]
    pub fn new(processor: P, frame: impl Into<String>) -> Self {
        Self {
            processor: Rc::new(processor),
            frame: frame.into(),
            resolver: Rc::new(|_, _, _| None),
            patterns: Rc::new(|_, _| None),
        }
    }

    /// Sets how symbol values are looked up.
    #[must_use]
    pub fn with_symbol_resolver(
        mut self,
        resolver: impl Fn(&Engine, &ObjectId, &str) -> Option<Value> + 'static,
    ) -> Self {
        self.resolver = Rc::new(resolver);
        self
    }

    /// Sets which properties provide a symbol.
    #[must_use]
    pub fn with_symbol_patterns(
        mut self,
        patterns: impl Fn(&ObjectId, &str) -> Option<Vec<PropertyPattern>> + 'static,
    ) -> Self {
        self.patterns = Rc::new(patterns);
        self
    }

    /// Name of the re-processing frame.
    #[must_use]
    pub fn frame_name(&self) -> &str {
        &self.frame
    }

    /// Processes `expression` into property `target` of the scope's object.
    ///
    /// The returned output carries the expression's integrity entry, the
    /// dependencies on the objects its symbols come from, and, once every
    /// symbol is known, an override of `target` with the value.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Processing`] if the processor fails, and
    /// [`EngineError::UnknownObject`] if the object has been removed.
    pub fn process(
        &self,
        scope: &mut FrameScope<'_>,
        target: &str,
        expression: &str,
        environment: P::Environment,
    ) -> Result<ProcessingOutcome, EngineError> {
        let id = scope.object_id().clone();
        let previous = scope
            .metadata_mut()?
            .take::<ProcessingState<P::State, P::Environment>>(target);
        let state = match previous {
            Some(mut state) if state.expression == expression => {
                state.environment = environment;
                state
            }
            previous => {
                let known = match &previous {
                    Some(previous) => {
                        debug!(object = %id, target, "expression changed");
                        self.known(scope.engine(), &id, &previous.requested)
                    }
                    None => SymbolTable::new(),
                };
                let prepared = self
                    .processor
                    .parse(expression, &environment, &known)
                    .map_err(|source| processing_error(&id, target, source))
                    .and_then(|parsed| {
                        Ok((parsed, scope.object()?.integrity_entry(target, expression)))
                    });
                // A rejected expression keeps the last good state and its listeners.
                let (parsed, integrity) = match prepared {
                    Ok(prepared) => prepared,
                    Err(error) => {
                        if let Some(previous) = previous {
                            scope.metadata_mut()?.insert(target, previous);
                        }
                        return Err(error);
                    }
                };
                ProcessingState {
                    expression: expression.to_owned(),
                    environment,
                    parsed,
                    integrity,
                    requested: BTreeSet::new(),
                    pending: BTreeSet::new(),
                    listened: BTreeSet::new(),
                    value: None,
                }
            }
        };
        self.advance(scope, target, state)
    }

    /// Returns a frame that re-processes the target path named by its
    /// `path` argument.
    #[must_use]
    pub fn reprocessing_frame(&self) -> FrameFn {
        let processing = self.clone();
        Rc::new(move |scope: &mut FrameScope<'_>| {
            let target = scope
                .argument("path")
                .and_then(Value::as_str)
                .ok_or_else(|| EngineError::InvalidArgument {
                    name: "path".to_owned(),
                    reason: "expected the processed target path".to_owned(),
                })?
                .to_owned();
            processing.reprocess(scope, &target)
        })
    }

    /// Whether the expression at `target` has evaluated.
    ///
    /// `None` if nothing was processed there.
    #[must_use]
    pub fn is_ready(&self, engine: &Engine, object: &ObjectId, target: &str) -> Option<bool> {
        self.state(engine, object, target)
            .map(|state| state.value.is_some())
    }

    /// Symbols the expression at `target` is still waiting for.
    #[must_use]
    pub fn pending_symbols(
        &self,
        engine: &Engine,
        object: &ObjectId,
        target: &str,
    ) -> Option<BTreeSet<String>> {
        self.state(engine, object, target)
            .map(|state| state.pending.clone())
    }

    fn state<'e>(
        &self,
        engine: &'e Engine,
        object: &ObjectId,
        target: &str,
    ) -> Option<&'e ProcessingState<P::State, P::Environment>> {
        engine.object(object)?.metadata().get(target)
    }

    fn reprocess(&self, scope: &mut FrameScope<'_>, target: &str) -> Result<FrameOutput, EngineError> {
        let Some(state) = scope
            .metadata_mut()?
            .take::<ProcessingState<P::State, P::Environment>>(target)
        else {
            debug!(object = %scope.object_id(), target, "nothing to re-process");
            return Ok(FrameOutput::new());
        };
        self.advance(scope, target, state).map(|outcome| outcome.output)
    }

    fn advance(
        &self,
        scope: &mut FrameScope<'_>,
        target: &str,
        mut state: ProcessingState<P::State, P::Environment>,
    ) -> Result<ProcessingOutcome, EngineError> {
        let id = scope.object_id().clone();
        let result = self.resolve(scope.engine(), &id, target, &mut state);
        if let Err(error) = result {
            scope.metadata_mut()?.insert(target, state);
            return Err(error);
        }

        for symbol in state.requested.difference(&state.listened).cloned().collect::<Vec<_>>() {
            let Some(patterns) = (self.patterns)(&id, &symbol) else {
                trace!(object = %id, symbol, "symbol is not listenable");
                continue;
            };
            let listener = ProxyListener::new(TargetEvent::PropertyUpdated(patterns), self.frame.clone())
                .with_argument("path", target)
                .with_integrity_entries(vec![state.integrity.clone()])
                .install(scope.engine_mut(), &id);
            trace!(object = %id, symbol, listener = %listener, "listening for symbol");
            state.listened.insert(symbol);
        }

        let references = state
            .requested
            .iter()
            .filter_map(|symbol| (self.patterns)(&id, symbol))
            .flatten()
            .filter_map(|pattern| pattern.exact_reference())
            .filter(|reference| !matches!(reference, Reference::SelfRef))
            .filter(|reference| *reference != Reference::Id(id.clone()))
            .collect::<BTreeSet<_>>();

        let mut output = FrameOutput::new()
            .with_integrity_entry(state.integrity.clone())
            .with_dependency(DependencyEntry::new(
                id.clone(),
                state.integrity.key.clone(),
                references.into_iter().collect(),
            ));
        if let Some(value) = &state.value {
            output = output.with_mutation(Mutation::overriding(target, value.clone()));
        }

        let outcome = ProcessingOutcome {
            output,
            ready: state.value.is_some(),
            missing: state.pending.clone(),
        };
        scope.metadata_mut()?.insert(target, state);
        Ok(outcome)
    }

    /// Evaluates until the result is ready or no newly requested symbol is
    /// known.
    fn resolve(
        &self,
        engine: &Engine,
        id: &ObjectId,
        target: &str,
        state: &mut ProcessingState<P::State, P::Environment>,
    ) -> Result<(), EngineError> {
        loop {
            let known = self.known(engine, id, &state.requested);
            let resolution = self
                .processor
                .resolve(&mut state.parsed, &state.environment, &known)
                .map_err(|source| processing_error(id, target, source))?;
            match resolution {
                Resolution::Ready(value) => {
                    trace!(object = %id, target, "expression ready");
                    state.pending.clear();
                    state.value = Some(value);
                    return Ok(());
                }
                Resolution::Pending { missing } => {
                    state.value = None;
                    let newly_known = missing
                        .iter()
                        .filter(|symbol| !state.requested.contains(*symbol))
                        .any(|symbol| (self.resolver)(engine, id, symbol).is_some());
                    state.requested.extend(missing.iter().cloned());
                    state.pending = missing;
                    if !newly_known {
                        trace!(object = %id, target, pending = ?state.pending, "expression pending");
                        return Ok(());
                    }
                }
            }
        }
    }
}

impl<P: Processor + 'static> Processing<P> {
    fn known(&self, engine: &Engine, id: &ObjectId, symbols: &BTreeSet<String>) -> SymbolTable {
        symbols
            .iter()
            .filter_map(|symbol| {
                (self.resolver)(engine, id, symbol).map(|value| (symbol.clone(), value))
            })
            .collect()
    }
}

fn processing_error(
    object: &ObjectId,
    target: &str,
    source: impl core::error::Error + Send + Sync + 'static,
) -> EngineError {
    EngineError::Processing {
        object: object.clone(),
        path: target.to_owned(),
        source: Box::new(source),
    }
}
