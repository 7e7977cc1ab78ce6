// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Call queues: batched, deduplicated frame executions.
//!
//! Work is grouped into numbered queues. Enqueueing appends to the last queue
//! unless it has started running, in which case a new queue opens; so work
//! scheduled while queue `n` runs lands in queue `n + 1`. A context whose id
//! is already pending anywhere is dropped.
//!
//! ```rust
//! use understory_recalc::{BareExecutionContext, ObjectId, Scheduler};
//!
//! let mut scheduler = Scheduler::new();
//! let object = ObjectId::new("11290");
//! let bare = BareExecutionContext::new("level");
//!
//! assert!(scheduler.enqueue(&object, &bare).unwrap().is_some());
//! // Same object, frame and arguments: already pending.
//! assert!(scheduler.enqueue(&object, &bare).unwrap().is_none());
//!
//! scheduler.begin(None).unwrap();
//! let context = scheduler.next().unwrap();
//! assert_eq!(context.id().as_str(), "id:11290::level");
//!
//! // It has run, so a new request opens the next generation.
//! assert!(scheduler.enqueue(&object, &bare).unwrap().is_some());
//! ```

use core::fmt;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use hashbrown::HashMap;
use serde_json::Value;
use tracing::debug;

use crate::error::EngineError;
use crate::event::Notification;
use crate::graph::Priorities;
use crate::reference::ObjectId;

/// Named execution arguments, sorted by name.
pub type Arguments = BTreeMap<String, Value>;

/// Computes extra arguments from a bare context before it is hashed.
pub type ArgumentProvider = Rc<dyn Fn(&BareExecutionContext) -> Result<Arguments, EngineError>>;

/// A request to run a frame, before it is bound to an object.
#[derive(Clone)]
pub struct BareExecutionContext {
    /// Name of the frame to run.
    pub name: String,
    /// Explicit arguments.
    pub arguments: Arguments,
    /// The notification that triggered the request, if any.
    pub notification: Option<Notification>,
    providers: Vec<ArgumentProvider>,
}

impl BareExecutionContext {
    /// Requests frame `name` with no arguments.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Arguments::new(),
            notification: None,
            providers: Vec::new(),
        }
    }

    /// Adds one argument.
    #[must_use]
    pub fn with_argument(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    /// Adds several arguments.
    #[must_use]
    pub fn with_arguments(mut self, arguments: Arguments) -> Self {
        self.arguments.extend(arguments);
        self
    }

    /// Attaches the triggering notification.
    #[must_use]
    pub fn with_notification(mut self, notification: Notification) -> Self {
        self.notification = Some(notification);
        self
    }

    /// Adds an argument provider. Providers run in order; later ones win.
    #[must_use]
    pub fn with_provider(mut self, provider: ArgumentProvider) -> Self {
        self.providers.push(provider);
        self
    }

    /// Returns the explicit arguments merged with every provider's output.
    ///
    /// # Errors
    ///
    /// Propagates the first provider failure.
    pub fn resolve_arguments(&self) -> Result<Arguments, EngineError> {
        let mut arguments = self.arguments.clone();
        for provider in &self.providers {
            arguments.extend(provider(self)?);
        }
        Ok(arguments)
    }
}

impl fmt::Debug for BareExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BareExecutionContext")
            .field("name", &self.name)
            .field("arguments", &self.arguments)
            .field("notification", &self.notification)
            .field("providers", &self.providers.len())
            .finish()
    }
}

/// Identity of a logical recomputation: object, frame, and arguments.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(String);

impl ContextId {
    /// Builds the id `"id:{object}::{name}"`, followed by `":k=v,..."` when
    /// there are arguments. Keys and values are written as JSON, so distinct
    /// argument maps always give distinct ids.
    #[must_use]
    pub fn new(object: &ObjectId, name: &str, arguments: &Arguments) -> Self {
        let mut id = format!("id:{object}::{name}");
        for (position, (key, value)) in arguments.iter().enumerate() {
            id.push(if position == 0 { ':' } else { ',' });
            id.push_str(&Value::from(key.as_str()).to_string());
            id.push('=');
            id.push_str(&value.to_string());
        }
        Self(id)
    }

    /// Returns the id text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A scheduled frame execution.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    id: ContextId,
    name: String,
    object: ObjectId,
    arguments: Arguments,
    notification: Option<Notification>,
    queue: usize,
    index: usize,
}

impl ExecutionContext {
    /// Returns the deduplication id.
    #[must_use]
    pub fn id(&self) -> &ContextId {
        &self.id
    }

    /// Returns the frame name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the object the frame runs on.
    #[must_use]
    pub fn object(&self) -> &ObjectId {
        &self.object
    }

    /// Returns the resolved arguments.
    #[must_use]
    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    /// Returns one argument.
    #[must_use]
    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name)
    }

    /// Returns the notification that scheduled this context, if any.
    #[must_use]
    pub fn notification(&self) -> Option<&Notification> {
        self.notification.as_ref()
    }

    /// Returns the number of the queue holding this context.
    #[must_use]
    pub fn queue(&self) -> usize {
        self.queue
    }

    /// Returns the insertion index within its queue.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Where execution currently stands.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Cursor {
    /// Number of the running queue.
    pub queue: usize,
    /// Insertion index of the running context within that queue.
    pub execution_context: usize,
}

#[derive(Debug)]
struct Slot {
    context: Rc<ExecutionContext>,
    consumed: bool,
}

#[derive(Debug)]
struct CallQueue {
    index: usize,
    started: bool,
    contexts: BTreeMap<usize, Slot>,
    slots: HashMap<ContextId, usize>,
    order: VecDeque<usize>,
    next_index: usize,
}

impl CallQueue {
    fn new(index: usize) -> Self {
        Self {
            index,
            started: false,
            contexts: BTreeMap::new(),
            slots: HashMap::new(),
            order: VecDeque::new(),
            next_index: 0,
        }
    }

    fn pending(&self, id: &ContextId) -> Option<usize> {
        let index = *self.slots.get(id)?;
        let slot = self.contexts.get(&index)?;
        (!slot.consumed).then_some(index)
    }

    fn unconsumed(&self) -> impl Iterator<Item = &ExecutionContext> + '_ {
        self.contexts
            .values()
            .filter(|slot| !slot.consumed)
            .map(|slot| &*slot.context)
    }

    fn remove(&mut self, index: usize) {
        if let Some(slot) = self.contexts.remove(&index) {
            self.slots.remove(slot.context.id());
        }
    }
}

/// Owner of every call queue and the execution cursor.
#[derive(Debug, Default)]
pub struct Scheduler {
    queues: VecDeque<CallQueue>,
    next_queue: usize,
    cursor: Option<Cursor>,
}

impl Scheduler {
    /// Creates an idle scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a context with `id` is scheduled and has not run.
    #[must_use]
    pub fn should_skip(&self, id: &ContextId) -> bool {
        self.queues.iter().any(|queue| queue.pending(id).is_some())
    }

    /// Schedules `bare` on `object`.
    ///
    /// Returns `None` if the same logical recomputation is already pending.
    ///
    /// # Errors
    ///
    /// Propagates argument provider failures.
    pub fn enqueue(
        &mut self,
        object: &ObjectId,
        bare: &BareExecutionContext,
    ) -> Result<Option<Rc<ExecutionContext>>, EngineError> {
        let arguments = bare.resolve_arguments()?;
        let id = ContextId::new(object, &bare.name, &arguments);
        if self.should_skip(&id) {
            debug!(context = %id, "enqueue skipped, already pending");
            return Ok(None);
        }

        if self.queues.back().is_none_or(|queue| queue.started) {
            self.queues.push_back(CallQueue::new(self.next_queue));
            self.next_queue += 1;
        }
        let Some(queue) = self.queues.back_mut() else {
            return Ok(None);
        };
        let index = queue.next_index;
        queue.next_index += 1;
        let context = Rc::new(ExecutionContext {
            id: id.clone(),
            name: bare.name.clone(),
            object: object.clone(),
            arguments,
            notification: bare.notification.clone(),
            queue: queue.index,
            index,
        });
        debug!(context = %id, queue = queue.index, index, "enqueued");
        queue.slots.insert(id, index);
        queue.contexts.insert(
            index,
            Slot {
                context: Rc::clone(&context),
                consumed: false,
            },
        );
        Ok(Some(context))
    }

    /// Unschedules `bare` on `object` if it has not run yet.
    ///
    /// Returns `false` if nothing was pending.
    ///
    /// # Errors
    ///
    /// Propagates argument provider failures.
    pub fn dequeue(&mut self, object: &ObjectId, bare: &BareExecutionContext) -> Result<bool, EngineError> {
        let arguments = bare.resolve_arguments()?;
        let id = ContextId::new(object, &bare.name, &arguments);
        for queue in &mut self.queues {
            if let Some(index) = queue.pending(&id) {
                queue.remove(index);
                debug!(context = %id, queue = queue.index, "dequeued");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Starts (or resumes) the front queue and fixes its execution order.
    ///
    /// With priorities, contexts run by ascending object priority, then
    /// insertion order; otherwise in insertion order. Returns the queue
    /// number, or `None` when nothing is queued.
    pub fn begin(&mut self, priorities: Option<&Priorities>) -> Option<usize> {
        let queue = self.queues.front_mut()?;
        let mut order: Vec<(usize, usize)> = queue
            .unconsumed()
            .map(|context| {
                let rank = priorities.map_or(0, |priorities| priorities.rank(&context.object));
                (rank, context.index)
            })
            .collect();
        order.sort_unstable();
        queue.order = order.into_iter().map(|(_, index)| index).collect();
        if !queue.started {
            debug!(queue = queue.index, contexts = queue.order.len(), "queue started");
        }
        queue.started = true;
        Some(queue.index)
    }

    /// Claims the next context of the running queue and moves the cursor to it.
    ///
    /// Returns `None` once the queue is exhausted.
    pub fn next(&mut self) -> Option<Rc<ExecutionContext>> {
        let queue = self.queues.front_mut()?;
        if !queue.started {
            return None;
        }
        while let Some(index) = queue.order.pop_front() {
            let Some(slot) = queue.contexts.get_mut(&index) else {
                continue;
            };
            if slot.consumed {
                continue;
            }
            slot.consumed = true;
            self.cursor = Some(Cursor {
                queue: queue.index,
                execution_context: index,
            });
            return Some(Rc::clone(&slot.context));
        }
        None
    }

    /// Drops the front queue if it has started and has nothing left to run.
    ///
    /// Returns `true` if a queue was dropped.
    pub fn finish(&mut self) -> bool {
        let done = self
            .queues
            .front()
            .is_some_and(|queue| queue.started && queue.unconsumed().next().is_none());
        if done && let Some(queue) = self.queues.pop_front() {
            debug!(queue = queue.index, contexts = queue.contexts.len(), "queue finished");
        }
        done
    }

    /// Clears the cursor once execution stops.
    pub fn reset_cursor(&mut self) {
        self.cursor = None;
    }

    /// Unschedules every pending context of `object`. Returns how many went.
    pub fn remove_object(&mut self, object: &ObjectId) -> usize {
        let mut removed = 0;
        for queue in &mut self.queues {
            let doomed: Vec<usize> = queue
                .unconsumed()
                .filter(|context| &context.object == object)
                .map(|context| context.index)
                .collect();
            removed += doomed.len();
            for index in doomed {
                queue.remove(index);
            }
        }
        self.queues
            .retain(|queue| queue.started || !queue.contexts.is_empty());
        removed
    }

    /// Returns the cursor while a context is running.
    #[must_use]
    pub fn current(&self) -> Option<Cursor> {
        self.cursor
    }

    /// Returns the contexts that have not run yet, queue by queue.
    #[must_use]
    pub fn pending(&self) -> Vec<Rc<ExecutionContext>> {
        self.queues
            .iter()
            .flat_map(|queue| queue.contexts.values())
            .filter(|slot| !slot.consumed)
            .map(|slot| Rc::clone(&slot.context))
            .collect()
    }

    /// Returns the number of queues, including the running one.
    #[must_use]
    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Returns `true` if nothing is left to run.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queues.iter().all(|queue| queue.unconsumed().next().is_none())
    }
}
