//! Event Service - named events with ordered, short-circuitable handler chains.
//!
//! # Dispatch
//!
//! ```text
//! trigger(event, payload, session?)
//!  → unknown event?  register it empty, return payload untouched
//!  → session         caller's token, or a fresh one from the context
//!  → subscribers     ascending order, one at a time, same &mut payload
//!       stop flag set?  attach default error if none, skip the rest
//!       handler Err?    record it on the payload, skip the rest
//!  → end session     when one was used and a context is bound
//!  → payload
//! ```
//!
//! # Example
//!
//! ```ignore
//! use corekit::{handler_fn, EventService, HandlerPayload, Subscriber};
//!
//! let events = EventService::new(Some(container.context()));
//!
//! events.add_subscriber(
//!     "user.created",
//!     Subscriber::new(handler_fn(|payload| {
//!         async move {
//!             payload.result = payload.data.clone();
//!             Ok(())
//!         }
//!         .boxed()
//!     })),
//! );
//!
//! let out = events
//!     .trigger("user.created", HandlerPayload::new(json!({"id": 1})), None)
//!     .await;
//! ```

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use tracing::{debug, trace, warn};

use crate::context::Context;
use crate::error::EventError;
use crate::payload::{HandlerError, HandlerPayload};
use crate::registry::{Dependency, Lifecycle, SessionId};
use crate::service::{Component, Dependencies, Service};

// =============================================================================
// Handlers
// =============================================================================

/// One link of a dispatch chain.
///
/// Handlers edit the shared payload in place. Set
/// [`HandlerPayload::stop_processing`] to skip the remaining handlers;
/// returning `Err` stops the chain as well and records the error on the
/// payload.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, payload: &mut HandlerPayload) -> Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut HandlerPayload) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    async fn handle(&self, payload: &mut HandlerPayload) -> Result<()> {
        (self.0)(payload).await
    }
}

/// Handler from a closure returning a boxed future.
pub fn handler_fn<F>(f: F) -> Arc<dyn EventHandler>
where
    F: for<'a> Fn(&'a mut HandlerPayload) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

// =============================================================================
// Subscriber
// =============================================================================

/// A handler plus its position in the chain.
///
/// Identity is the handler reference: two subscribers built from clones of
/// the same `Arc` are the same subscriber.
#[derive(Clone)]
pub struct Subscriber {
    handler: Arc<dyn EventHandler>,
    order: Option<u32>,
}

impl Subscriber {
    /// Subscriber without an explicit order; it goes to the end of the chain.
    pub fn new(handler: Arc<dyn EventHandler>) -> Self {
        Self {
            handler,
            order: None,
        }
    }

    /// Subscriber owning a fresh handler value.
    pub fn from_handler(handler: impl EventHandler) -> Self {
        Self::new(Arc::new(handler))
    }

    pub fn with_order(mut self, order: u32) -> Self {
        self.order = Some(order);
        self
    }

    /// Position in the chain. Always set once the subscriber is registered.
    pub fn order(&self) -> Option<u32> {
        self.order
    }

    pub fn handler(&self) -> &Arc<dyn EventHandler> {
        &self.handler
    }

    /// Whether both subscribers wrap the same handler.
    pub fn same_handler(&self, other: &Subscriber) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.handler), Arc::as_ptr(&other.handler))
    }

    fn sort_key(&self) -> u32 {
        self.order.unwrap_or(u32::MAX)
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Event Record
// =============================================================================

/// A named event and its subscribers, sorted ascending by order.
#[derive(Debug, Clone)]
pub struct EventRecord {
    name: String,
    subscribers: Vec<Subscriber>,
}

impl EventRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscribers: Vec::new(),
        }
    }

    /// Queue a subscriber. Orders and duplicates are settled by
    /// [`EventService::add_event`].
    pub fn with_subscriber(mut self, subscriber: Subscriber) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscribers(&self) -> &[Subscriber] {
        &self.subscribers
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Append one subscriber and re-sort.
    ///
    /// A subscriber without an order goes after the highest order present,
    /// so it never shares an order with an explicit one.
    fn insert(&mut self, mut subscriber: Subscriber) -> Result<(), EventError> {
        if self.subscribers.iter().any(|s| s.same_handler(&subscriber)) {
            return Err(EventError::DuplicateSubscriber {
                event: self.name.clone(),
            });
        }

        let next = self
            .subscribers
            .iter()
            .filter_map(Subscriber::order)
            .max()
            .map_or(1, |highest| highest.saturating_add(1));
        subscriber.order.get_or_insert(next);
        self.subscribers.push(subscriber);
        self.subscribers.sort_by_key(Subscriber::sort_key);
        Ok(())
    }

    fn remove_order(&mut self, order: u32) -> usize {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.order != Some(order));
        self.subscribers.sort_by_key(Subscriber::sort_key);
        before - self.subscribers.len()
    }

    /// Rebuild through `insert` so queued subscribers follow the same rules.
    fn normalized(self) -> Result<Self, EventError> {
        let mut record = EventRecord::new(self.name);
        for subscriber in self.subscribers {
            record.insert(subscriber)?;
        }
        Ok(record)
    }
}

// =============================================================================
// Event Service
// =============================================================================

/// Registry of named events and their dispatch chains.
///
/// With a bound [`Context`], every trigger without a caller-supplied session
/// runs inside a fresh session that ends when the chain finishes.
pub struct EventService {
    events: DashMap<String, EventRecord>,
    context: Option<Context>,
}

impl EventService {
    pub fn new(context: Option<Context>) -> Self {
        Self {
            events: DashMap::new(),
            context,
        }
    }

    pub fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    /// Register an event. Rejections are logged and ignored.
    pub fn add_event(&self, record: EventRecord) {
        if let Err(err) = self.try_add_event(record) {
            err.report();
        }
    }

    /// Register an event, reporting why it was rejected.
    pub fn try_add_event(&self, record: EventRecord) -> Result<(), EventError> {
        if record.name.is_empty() {
            return Err(EventError::EmptyName);
        }

        match self.events.entry(record.name.clone()) {
            Entry::Occupied(_) => Err(EventError::AlreadyExists { event: record.name }),
            Entry::Vacant(slot) => {
                let record = record.normalized()?;
                debug!(event = %record.name, subscribers = record.len(), "event registered");
                slot.insert(record);
                Ok(())
            }
        }
    }

    /// Subscribe to an event, creating the event when it does not exist yet.
    /// Rejections are logged and ignored.
    pub fn add_subscriber(&self, event: &str, subscriber: Subscriber) {
        if let Err(err) = self.try_add_subscriber(event, subscriber) {
            err.report();
        }
    }

    /// Subscribe to an event, reporting why the subscriber was rejected.
    pub fn try_add_subscriber(&self, event: &str, subscriber: Subscriber) -> Result<(), EventError> {
        if event.is_empty() {
            return Err(EventError::EmptyName);
        }

        match self.events.entry(event.to_string()) {
            Entry::Vacant(slot) => {
                let mut record = EventRecord::new(event);
                record.insert(subscriber)?;
                debug!(event, "event registered by first subscriber");
                slot.insert(record);
            }
            Entry::Occupied(mut slot) => {
                slot.get_mut().insert(subscriber)?;
                trace!(event, subscribers = slot.get().len(), "subscriber added");
            }
        }
        Ok(())
    }

    /// First subscriber at `order`, or the first subscriber at all.
    pub fn get_subscriber(&self, event: &str, order: Option<u32>) -> Option<Subscriber> {
        let record = self.events.get(event)?;
        match order {
            Some(order) => record
                .subscribers
                .iter()
                .find(|s| s.order == Some(order))
                .cloned(),
            None => record.subscribers.first().cloned(),
        }
    }

    /// Remove every subscriber at `order`. Unknown events are ignored.
    pub fn remove_subscriber(&self, event: &str, order: u32) {
        if let Some(mut record) = self.events.get_mut(event) {
            let removed = record.remove_order(order);
            trace!(event, order, removed, "subscribers removed");
        }
    }

    /// Drop an event and its subscribers. Returns whether it existed.
    pub fn remove_event(&self, event: &str) -> bool {
        let removed = self.events.remove(event).is_some();
        if removed {
            debug!(event, "event removed");
        }
        removed
    }

    /// Drop every event.
    pub fn clear(&self) {
        self.events.clear();
    }

    /// Snapshot of one event.
    pub fn get_event(&self, event: &str) -> Option<EventRecord> {
        self.events.get(event).map(|record| record.value().clone())
    }

    /// Registered event names, sorted.
    pub fn events(&self) -> Vec<String> {
        let mut names: Vec<String> = self.events.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn has_event(&self, event: &str) -> bool {
        self.events.contains_key(event)
    }

    /// Number of subscribers on an event; zero for unknown events.
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.events.get(event).map(|record| record.len()).unwrap_or(0)
    }

    /// Run the dispatch chain of `event` over `payload`.
    ///
    /// Never fails: handler errors, stops and unknown events all end up
    /// reflected in the returned payload.
    pub async fn trigger(
        &self,
        event: &str,
        mut payload: HandlerPayload,
        session: Option<SessionId>,
    ) -> HandlerPayload {
        if event.is_empty() {
            EventError::EmptyName.report();
            return payload;
        }

        // Snapshot taken before touching the map again; handlers may edit
        // this event while the chain runs.
        let subscribers = self
            .events
            .get(event)
            .map(|record| record.subscribers.clone());

        let Some(subscribers) = subscribers else {
            self.events
                .entry(event.to_string())
                .or_insert_with(|| EventRecord::new(event));
            debug!(event, "unknown event triggered, registered without subscribers");
            return payload;
        };

        let session = match (session, &self.context) {
            (Some(id), _) => Some(id),
            (None, Some(context)) => context.begin_session(),
            (None, None) => None,
        };
        payload.session_id = session;

        debug!(
            event,
            subscribers = subscribers.len(),
            session = ?session,
            "dispatching event"
        );

        let mut invoked = 0usize;
        for subscriber in &subscribers {
            invoked += 1;
            if let Err(err) = subscriber.handler.handle(&mut payload).await {
                warn!(
                    event,
                    order = ?subscriber.order,
                    error = %err,
                    "event handler failed, stopping chain"
                );
                payload.error = Some(HandlerError::handler_failed(&err));
                payload.stop_processing = true;
                break;
            }

            if payload.stop_processing {
                if payload.error.is_none() {
                    payload.error = Some(HandlerError::processing_stopped());
                }
                debug!(event, order = ?subscriber.order, "event processing stopped");
                break;
            }
        }

        if let (Some(id), Some(context)) = (session, &self.context) {
            context.end_session(id);
        }

        trace!(event, invoked, stopped = payload.stop_processing, "event dispatched");
        payload
    }
}

impl Component for EventService {}

impl Service for EventService {
    fn name() -> &'static str {
        "EventService"
    }

    fn lifecycle() -> Lifecycle {
        Lifecycle::Singleton
    }

    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::Context]
    }

    fn construct(deps: &mut Dependencies) -> Self {
        Self::new(deps.context())
    }
}

impl fmt::Debug for EventService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventService")
            .field("events", &self.events.len())
            .field("context", &self.context)
            .finish()
    }
}
