//! Typed publish/subscribe
//!
//! [`EventBus`] delivers events to subscribers registered for the event's
//! type, either graph-wide or scoped to one resource. Delivery is ordered and
//! awaited: each handler finishes before the next one runs, so a handler can
//! rely on earlier handlers' work being complete.
//!
//! Subscribing does not replay events that were already published. Callers
//! that need the current value of something must read it from its owner
//! (a [`DeferredValue`](crate::deferred::DeferredValue) or
//! [`Expression`](crate::expression::Expression)) rather than rely on having
//! seen the event.
//!
//! # Example
//!
//! ```rust,ignore
//! let bus = EventBus::new();
//! bus.subscribe_resource::<ConnectionStringAvailableEvent, _, _>("pg", |event, _cancel| async move {
//!     tracing::info!(connection_string = %event.connection_string, "pg is reachable");
//!     Ok(())
//! });
//! ```

mod events;

pub use events::{
    AfterResourcesCreatedEvent, BeforeResourceStartedEvent, BeforeStartEvent,
    ConnectionStringAvailableEvent, ResourceEndpointsAllocatedEvent, ResourceReadyEvent,
};

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use std::any::{Any, TypeId};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::panic_message;

/// Marker for types that can travel on the [`EventBus`]
pub trait Event: Send + Sync + 'static {
    /// Resource this event concerns; `None` for graph-wide events.
    fn scope(&self) -> Option<&str> {
        None
    }
}

type Handler<E> = dyn Fn(Arc<E>, CancellationToken) -> BoxFuture<'static, anyhow::Result<()>>
    + Send
    + Sync;

#[derive(Clone)]
struct Entry {
    id: Uuid,
    scope: Option<String>,
    // Holds an `Arc<Handler<E>>` for the `E` this entry is keyed under.
    handler: Arc<dyn Any + Send + Sync>,
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: Uuid,
    event: TypeId,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// A handler that returned an error or panicked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFault {
    pub event: &'static str,
    pub subscription: Uuid,
    pub resource: Option<String>,
    pub message: String,
}

/// Outcome of one `publish` call
#[derive(Debug, Clone, Default)]
pub struct PublishReport {
    pub delivered: usize,
    pub faults: Vec<HandlerFault>,
}

impl PublishReport {
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }
}

/// In-process event bus scoped to one orchestration run
#[derive(Clone, Default)]
pub struct EventBus {
    // Map of Event Type -> subscribers in subscription order
    channels: Arc<DashMap<TypeId, Vec<Entry>>>,
    faults: Arc<Mutex<Vec<HandlerFault>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every event of type `E`.
    pub fn subscribe<E, F, Fut>(&self, handler: F) -> Subscription
    where
        E: Event,
        F: Fn(Arc<E>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.insert(None, handler)
    }

    /// Subscribe to events of type `E` concerning one resource.
    pub fn subscribe_resource<E, F, Fut>(&self, resource: &str, handler: F) -> Subscription
    where
        E: Event,
        F: Fn(Arc<E>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.insert(Some(resource.to_string()), handler)
    }

    fn insert<E, F, Fut>(&self, scope: Option<String>, handler: F) -> Subscription
    where
        E: Event,
        F: Fn(Arc<E>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: Arc<Handler<E>> =
            Arc::new(move |event: Arc<E>, cancel: CancellationToken| handler(event, cancel).boxed());
        let id = Uuid::new_v4();
        let event = TypeId::of::<E>();

        tracing::debug!(event = std::any::type_name::<E>(), scope = ?scope, %id, "Subscribed");
        self.channels.entry(event).or_default().push(Entry {
            id,
            scope,
            handler: Arc::new(handler),
        });
        Subscription { id, event }
    }

    /// Remove a subscription. Returns `false` if it was already removed.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        match self.channels.get_mut(&subscription.event) {
            Some(mut entries) => {
                let before = entries.len();
                entries.retain(|e| e.id != subscription.id);
                entries.len() != before
            }
            None => false,
        }
    }

    pub fn subscriber_count<E: Event>(&self) -> usize {
        self.channels
            .get(&TypeId::of::<E>())
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    /// Deliver `event` to every matching subscriber, one at a time, in
    /// subscription order.
    ///
    /// A failing or panicking handler is recorded and does not stop delivery
    /// to the remaining handlers.
    pub async fn publish<E: Event>(&self, event: E, cancel: &CancellationToken) -> PublishReport {
        let event_name = std::any::type_name::<E>();
        let scope = event.scope().map(str::to_string);
        let event = Arc::new(event);

        // Snapshot the subscriber list so handlers may subscribe or
        // unsubscribe without deadlocking on the map shard.
        let entries: Vec<Entry> = self
            .channels
            .get(&TypeId::of::<E>())
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.scope.is_none() || e.scope == scope)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let mut report = PublishReport::default();
        for entry in entries {
            let Ok(handler) = entry.handler.downcast::<Arc<Handler<E>>>() else {
                continue;
            };
            let delivery = AssertUnwindSafe(handler(Arc::clone(&event), cancel.clone()))
                .catch_unwind()
                .await;
            report.delivered += 1;

            let message = match delivery {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{e:#}"),
                Err(panic) => format!("handler panicked: {}", panic_message(panic.as_ref())),
            };
            tracing::error!(event = event_name, scope = ?scope, subscription = %entry.id, %message, "Event handler failed");
            report.faults.push(HandlerFault {
                event: event_name,
                subscription: entry.id,
                resource: scope.clone(),
                message,
            });
        }

        if !report.faults.is_empty() {
            self.faults
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(report.faults.iter().cloned());
        }
        report
    }

    /// Every handler fault recorded so far.
    pub fn faults(&self) -> Vec<HandlerFault> {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn faults_for(&self, resource: &str) -> Vec<HandlerFault> {
        self.faults()
            .into_iter()
            .filter(|f| f.resource.as_deref() == Some(resource))
            .collect()
    }
}
