//! Resource state notifications
//!
//! [`ResourceNotificationService`] is the single source of truth for the
//! lifecycle state of every resource. Process supervisors report transitions
//! through [`update_state`](ResourceNotificationService::update_state), hooks
//! report progress through
//! [`publish_update`](ResourceNotificationService::publish_update), and any
//! number of tasks can suspend in
//! [`wait_for_state`](ResourceNotificationService::wait_for_state) until a
//! resource reaches the state they care about.
//!
//! Each resource owns a `watch` channel holding its latest snapshot, so
//! waiters are woken without polling. Every accepted change is also sent on a
//! broadcast stream for observers that need the full sequence.

mod state;
mod target;

pub use state::{LifecycleState, ResourceSnapshot, StateChange, StateStyle};
pub use target::{ExitRequirement, StateTarget, TargetCheck};

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::error::{OrchestraError, Result};
use crate::graph::ResourceGraph;

struct Inner {
    resources: DashMap<String, Arc<watch::Sender<ResourceSnapshot>>>,
    changes: broadcast::Sender<StateChange>,
}

/// Tracks the current lifecycle state of every resource
#[derive(Clone)]
pub struct ResourceNotificationService {
    inner: Arc<Inner>,
}

impl ResourceNotificationService {
    /// Create an empty service. `capacity` bounds the change stream buffer.
    pub fn new(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                resources: DashMap::new(),
                changes,
            }),
        }
    }

    /// Create a service with every resource of `graph` registered as `NotStarted`.
    pub fn for_graph(graph: &ResourceGraph, capacity: usize) -> Self {
        let service = Self::new(capacity);
        for resource in graph.resources() {
            service.register(resource.name());
        }
        service
    }

    /// Start tracking a resource. Registering twice keeps the existing state.
    pub fn register(&self, name: &str) {
        self.inner
            .resources
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(watch::channel(ResourceSnapshot::new(name)).0));
    }

    fn channel(&self, name: &str) -> Result<Arc<watch::Sender<ResourceSnapshot>>> {
        self.inner
            .resources
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| OrchestraError::not_found(name))
    }

    pub fn snapshot(&self, name: &str) -> Result<ResourceSnapshot> {
        Ok(self.channel(name)?.borrow().clone())
    }

    pub fn state(&self, name: &str) -> Result<LifecycleState> {
        Ok(self.channel(name)?.borrow().state)
    }

    /// Stream of every accepted change across all resources.
    pub fn subscribe_all(&self) -> broadcast::Receiver<StateChange> {
        self.inner.changes.subscribe()
    }

    /// Move a resource to `state`.
    ///
    /// Re-reporting the current state is a no-op. Regressions (any move out of
    /// a terminal state, or backwards outside the live oscillation) fail with
    /// [`OrchestraError::InvalidStateTransition`].
    pub fn update_state(&self, name: &str, state: LifecycleState) -> Result<bool> {
        self.publish_update(name, |snapshot| {
            if snapshot.state != state {
                snapshot.state = state;
                snapshot.state_text = None;
                snapshot.style = match state {
                    LifecycleState::FailedToStart | LifecycleState::Unhealthy => StateStyle::Error,
                    LifecycleState::Healthy => StateStyle::Success,
                    LifecycleState::Exited(code) if code != 0 => StateStyle::Error,
                    _ => StateStyle::Info,
                };
            }
        })
    }

    /// Move a resource to `state` with descriptive text.
    pub fn update_state_with_text(
        &self,
        name: &str,
        state: LifecycleState,
        text: impl Into<String>,
        style: StateStyle,
    ) -> Result<bool> {
        let text = text.into();
        self.publish_update(name, |snapshot| {
            snapshot.state = state;
            snapshot.state_text = Some(text);
            snapshot.style = style;
        })
    }

    /// Apply an edit to a resource's snapshot.
    ///
    /// The edit runs against a copy. If it changes nothing the update is
    /// dropped and `Ok(false)` is returned, so repeated identical progress
    /// reports produce a single change. A changed `state` is validated like
    /// [`update_state`](Self::update_state).
    pub fn publish_update<F>(&self, name: &str, edit: F) -> Result<bool>
    where
        F: FnOnce(&mut ResourceSnapshot),
    {
        let channel = self.channel(name)?;
        let changes = &self.inner.changes;
        let mut outcome = Ok(false);

        channel.send_if_modified(|current| {
            let mut next = current.clone();
            edit(&mut next);
            next.resource = current.resource.clone();

            if next.same_content(current) {
                return false;
            }
            let previous = current.state;
            if next.state != previous && !previous.can_transition_to(next.state) {
                tracing::warn!(
                    resource = %name,
                    from = %previous,
                    to = %next.state,
                    "Rejected lifecycle state regression"
                );
                outcome = Err(OrchestraError::InvalidStateTransition {
                    resource: name.to_string(),
                    from: previous,
                    to: next.state,
                });
                return false;
            }

            if let LifecycleState::Exited(code) = next.state {
                next.exit_code = Some(code);
            }
            next.version = current.version + 1;
            next.updated_at = Utc::now();
            *current = next;

            if previous != current.state {
                tracing::info!(resource = %name, from = %previous, to = %current.state, "Resource state changed");
            } else {
                tracing::debug!(resource = %name, text = ?current.state_text, "Resource snapshot updated");
            }
            // No receivers is fine; the change stream is optional.
            let _ = changes.send(StateChange {
                resource: name.to_string(),
                previous,
                snapshot: current.clone(),
            });
            outcome = Ok(true);
            true
        });

        outcome
    }

    /// Suspend until `name` satisfies `target`.
    ///
    /// Fails with [`OrchestraError::ResourceFailed`] as soon as the target
    /// becomes unreachable (for example the resource reached `FailedToStart`
    /// while a different state was awaited), and with
    /// [`OrchestraError::Cancelled`] when `cancel` fires.
    pub async fn wait_for_state(
        &self,
        name: &str,
        target: StateTarget,
        cancel: &CancellationToken,
    ) -> Result<ResourceSnapshot> {
        let mut receiver = self.channel(name)?.subscribe();
        tracing::debug!(resource = %name, %target, "Waiting for resource state");

        loop {
            let check = {
                let snapshot = receiver.borrow_and_update();
                match target.check(&snapshot) {
                    TargetCheck::Satisfied => return Ok(snapshot.clone()),
                    other => other,
                }
            };
            if let TargetCheck::Unreachable(reason) = check {
                return Err(OrchestraError::resource_failed(name, reason));
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OrchestraError::Cancelled),
                changed = receiver.changed() => {
                    if changed.is_err() {
                        return Err(OrchestraError::Cancelled);
                    }
                }
            }
        }
    }

    pub fn resource_names(&self) -> Vec<String> {
        self.inner
            .resources
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}
