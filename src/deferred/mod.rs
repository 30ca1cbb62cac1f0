//! Write-once values
//!
//! A [`DeferredValue`] is either known up front or resolved exactly once, later,
//! by a single producer (typically the platform allocator binding a port).
//! Any number of consumers may call [`DeferredValue::get`] before or after
//! resolution; early callers are parked in a FIFO waiter list and woken by the
//! producer's `resolve` call.
//!
//! # Example
//!
//! ```rust,ignore
//! let port = DeferredValue::<u16>::new("pg.tcp.port");
//! let reader = port.clone();
//! tokio::spawn(async move { reader.get(&CancellationToken::new()).await });
//! port.resolve(5432)?;
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{OrchestraError, Result};

type Outcome<T> = std::result::Result<T, String>;

enum Slot<T> {
    Pending {
        waiters: VecDeque<(u64, oneshot::Sender<Outcome<T>>)>,
    },
    Resolved(T),
    Failed(String),
}

struct Inner<T> {
    label: String,
    slot: Mutex<Slot<T>>,
    next_waiter: AtomicU64,
}

/// A value resolved at most once by one producer and read by many consumers
pub struct DeferredValue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for DeferredValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for DeferredValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.lock() {
            Slot::Pending { waiters } => format!("pending({} waiters)", waiters.len()),
            Slot::Resolved(_) => "resolved".to_string(),
            Slot::Failed(reason) => format!("failed({reason})"),
        };
        f.debug_struct("DeferredValue")
            .field("label", &self.inner.label)
            .field("state", &state)
            .finish()
    }
}

impl<T: Clone + Send + 'static> DeferredValue<T> {
    /// Create an unresolved value. The label identifies it in logs and errors.
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_slot(
            label,
            Slot::Pending {
                waiters: VecDeque::new(),
            },
        )
    }

    /// Create a value that is known immediately.
    pub fn ready(label: impl Into<String>, value: T) -> Self {
        Self::with_slot(label, Slot::Resolved(value))
    }

    fn with_slot(label: impl Into<String>, slot: Slot<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                label: label.into(),
                slot: Mutex::new(slot),
                next_waiter: AtomicU64::new(0),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Store the value and wake every parked consumer in registration order.
    ///
    /// Waiters are woken on the calling task; no extra dispatch happens here.
    pub fn resolve(&self, value: T) -> Result<()> {
        let waiters = self.settle(Slot::Resolved(value.clone()))?;
        tracing::debug!(
            label = %self.inner.label,
            waiters = waiters.len(),
            "Deferred value resolved"
        );
        for (_, waiter) in waiters {
            // A waiter whose receiver is gone was cancelled after registration.
            let _ = waiter.send(Ok(value.clone()));
        }
        Ok(())
    }

    /// Settle the value as permanently unavailable.
    ///
    /// Counts as the single resolution: a later `resolve` fails with
    /// [`OrchestraError::AlreadyResolved`].
    pub fn fail(&self, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        let waiters = self.settle(Slot::Failed(reason.clone()))?;
        tracing::warn!(label = %self.inner.label, %reason, "Deferred value failed");
        for (_, waiter) in waiters {
            let _ = waiter.send(Err(reason.clone()));
        }
        Ok(())
    }

    fn settle(&self, next: Slot<T>) -> Result<VecDeque<(u64, oneshot::Sender<Outcome<T>>)>> {
        let mut slot = self.lock();
        match &mut *slot {
            Slot::Pending { waiters } => {
                let waiters = std::mem::take(waiters);
                *slot = next;
                Ok(waiters)
            }
            _ => {
                tracing::error!(label = %self.inner.label, "Deferred value resolved twice");
                Err(OrchestraError::AlreadyResolved)
            }
        }
    }

    /// Return the value, suspending until the producer resolves it.
    ///
    /// Cancelling `cancel` removes this call from the waiter list and fails
    /// with [`OrchestraError::Cancelled`]; other waiters are unaffected.
    pub async fn get(&self, cancel: &CancellationToken) -> Result<T> {
        let (id, receiver) = {
            let mut slot = self.lock();
            match &mut *slot {
                Slot::Resolved(value) => return Ok(value.clone()),
                Slot::Failed(reason) => {
                    return Err(OrchestraError::ProducerFailed {
                        reason: reason.clone(),
                    });
                }
                Slot::Pending { waiters } => {
                    let id = self.inner.next_waiter.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = oneshot::channel();
                    waiters.push_back((id, tx));
                    (id, rx)
                }
            }
        };

        tokio::select! {
            biased;
            outcome = receiver => match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(reason)) => Err(OrchestraError::ProducerFailed { reason }),
                Err(_) => Err(OrchestraError::ProducerFailed {
                    reason: format!("{} was dropped before resolution", self.inner.label),
                }),
            },
            _ = cancel.cancelled() => {
                self.remove_waiter(id);
                Err(OrchestraError::Cancelled)
            }
        }
    }

    /// Current value without waiting.
    pub fn try_get(&self) -> Option<T> {
        match &*self.lock() {
            Slot::Resolved(value) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(&*self.lock(), Slot::Pending { .. })
    }

    /// Number of consumers currently parked in `get`.
    pub fn waiter_count(&self) -> usize {
        match &*self.lock() {
            Slot::Pending { waiters } => waiters.len(),
            _ => 0,
        }
    }

    fn remove_waiter(&self, id: u64) {
        if let Slot::Pending { waiters } = &mut *self.lock() {
            waiters.retain(|(waiter, _)| *waiter != id);
        }
    }
}

impl<T> DeferredValue<T> {
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.inner
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_ready_value_returns_immediately() {
        let value = DeferredValue::ready("host", "localhost".to_string());
        let got = value.get(&CancellationToken::new()).await.unwrap();
        assert_eq!(got, "localhost");
        assert!(value.is_resolved());
    }

    #[tokio::test]
    async fn test_resolve_twice_fails() {
        let value = DeferredValue::<u16>::new("port");
        value.resolve(5432).unwrap();
        assert_eq!(value.resolve(5433), Err(OrchestraError::AlreadyResolved));
        assert_eq!(value.try_get(), Some(5432));

        let failed = DeferredValue::<u16>::new("port");
        failed.fail("bind error").unwrap();
        assert_eq!(failed.resolve(1), Err(OrchestraError::AlreadyResolved));
    }

    #[tokio::test]
    async fn test_pending_and_future_readers_see_the_same_value() {
        let value = DeferredValue::<u16>::new("port");
        let mut readers = Vec::new();
        for _ in 0..4 {
            let reader = value.clone();
            readers.push(tokio::spawn(async move {
                reader.get(&CancellationToken::new()).await
            }));
        }

        while value.waiter_count() < 4 {
            tokio::task::yield_now().await;
        }
        value.resolve(5432).unwrap();

        for reader in readers {
            assert_eq!(reader.await.unwrap().unwrap(), 5432);
        }
        assert_eq!(value.get(&CancellationToken::new()).await.unwrap(), 5432);
        assert_eq!(value.waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_waiters_are_woken_in_fifo_order() {
        let value = DeferredValue::<u8>::new("ordered");
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();

        for i in 0..3 {
            let reader = value.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                reader.get(&CancellationToken::new()).await.unwrap();
                order.lock().unwrap().push(i);
            }));
            while value.waiter_count() < i + 1 {
                tokio::task::yield_now().await;
            }
        }

        value.resolve(1).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_cancelled_get_leaves_other_waiters_intact() {
        let value = DeferredValue::<u16>::new("port");
        let cancel = CancellationToken::new();

        let cancelled = {
            let reader = value.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { reader.get(&cancel).await })
        };
        let survivor = {
            let reader = value.clone();
            tokio::spawn(async move { reader.get(&CancellationToken::new()).await })
        };

        while value.waiter_count() < 2 {
            tokio::task::yield_now().await;
        }
        cancel.cancel();
        assert_eq!(cancelled.await.unwrap(), Err(OrchestraError::Cancelled));
        assert_eq!(value.waiter_count(), 1);

        value.resolve(80).unwrap();
        assert_eq!(survivor.await.unwrap().unwrap(), 80);
    }

    #[tokio::test]
    async fn test_failure_reaches_waiters() {
        let value = DeferredValue::<String>::new("secret");
        let reader = value.clone();
        let handle = tokio::spawn(async move { reader.get(&CancellationToken::new()).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        value.fail("vault unreachable").unwrap();

        assert!(matches!(
            handle.await.unwrap(),
            Err(OrchestraError::ProducerFailed { reason }) if reason == "vault unreachable"
        ));
    }
}
