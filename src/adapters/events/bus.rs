//! In-process handler event bus.
//!
//! Publish/subscribe over [`HandlerEvent`] plus the predicate wait that lets
//! command issuers synchronize with specific asynchronous server events.
//! Delivery is synchronous inside `publish` and iterates a stable snapshot,
//! so subscribers may unsubscribe (including self-unsubscribe from a
//! matching predicate) without corrupting delivery to the rest.
//!
//! Publishing is meant to happen from the single driver task that pumps the
//! transport; waits may be outstanding from any number of tasks.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::domain::foundation::EngineError;
use crate::domain::protocol::HandlerEvent;
use crate::ports::HandlerListener;

/// Handle identifying one subscription, for unsubscribing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A waiter's matcher: returns `true` once it matched and must be removed.
type WaiterFn = Box<dyn FnMut(&HandlerEvent) -> bool + Send>;

enum Subscriber {
    Listener(Arc<dyn HandlerListener>),
    Waiter(WaiterFn),
}

struct BusInner {
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    /// Ids unsubscribed while a publish had the subscriber list checked out.
    removed_during_delivery: HashSet<SubscriptionId>,
    delivering: bool,
    next_id: u64,
}

/// Publish/subscribe registry with predicate-based waiting.
pub struct HandlerEventBus {
    inner: Mutex<BusInner>,
}

impl HandlerEventBus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BusInner {
                subscribers: Vec::new(),
                removed_during_delivery: HashSet::new(),
                delivering: false,
                next_id: 0,
            }),
        }
    }

    /// Registers a listener for every published event.
    pub fn subscribe(&self, listener: Arc<dyn HandlerListener>) -> SubscriptionId {
        let mut inner = self.lock();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.subscribers.push((id, Subscriber::Listener(listener)));
        id
    }

    /// Removes a subscription. Safe to call during delivery.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.lock();
        if inner.delivering {
            inner.removed_during_delivery.insert(id);
        }
        inner.subscribers.retain(|(sid, _)| *sid != id);
    }

    /// Number of live subscriptions (listeners plus pending waiters).
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Publishes one event to all current subscribers, in subscription
    /// order, over a stable snapshot taken at the start of the call.
    ///
    /// Listener errors are logged and isolated; a waiter whose predicate
    /// matches is resolved and deregistered.
    pub fn publish(&self, event: &HandlerEvent) {
        // Check the subscriber list out so callbacks can re-enter the bus
        // (subscribe/unsubscribe) without deadlocking.
        let mut snapshot = {
            let mut inner = self.lock();
            inner.delivering = true;
            inner.removed_during_delivery.clear();
            std::mem::take(&mut inner.subscribers)
        };

        let mut kept = Vec::with_capacity(snapshot.len());
        for (id, subscriber) in snapshot.drain(..) {
            if self.lock().removed_during_delivery.contains(&id) {
                continue;
            }
            match subscriber {
                Subscriber::Listener(listener) => {
                    if let Err(e) = listener.on_event(event) {
                        tracing::warn!(
                            listener = listener.name(),
                            error = %e,
                            event = event.name(),
                            "listener failed, continuing delivery"
                        );
                    }
                    kept.push((id, Subscriber::Listener(listener)));
                }
                Subscriber::Waiter(mut matcher) => {
                    if !matcher(event) {
                        kept.push((id, Subscriber::Waiter(matcher)));
                    }
                }
            }
        }

        // Merge back: kept snapshot first (registration order), then any
        // subscriptions added during delivery. Those do not see this event.
        let mut inner = self.lock();
        for removed in inner.removed_during_delivery.drain().collect::<Vec<_>>() {
            kept.retain(|(id, _)| *id != removed);
        }
        let added = std::mem::take(&mut inner.subscribers);
        kept.extend(added);
        inner.subscribers = kept;
        inner.delivering = false;
    }

    /// Waits for the first event the predicate extracts a payload from.
    ///
    /// The waiter is registered eagerly, before the returned future is first
    /// polled, so a caller can arm the wait, then issue the request whose
    /// response it expects, without a gap. The predicate runs synchronously
    /// against every published event, in subscription order; the first match
    /// resolves the wait and removes it.
    ///
    /// # Errors
    ///
    /// [`EngineError::WaitTimeout`] when `timeout` elapses first, and
    /// [`EngineError::WaitCancelled`] when `cancel` fires first - the two
    /// are distinct and both terminal for this wait only.
    pub fn wait_for<T, F>(
        &self,
        predicate: F,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> impl std::future::Future<Output = Result<T, EngineError>> + '_
    where
        T: Send + 'static,
        F: Fn(&HandlerEvent) -> Option<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<T>();
        let mut tx = Some(tx);
        let cancel = cancel.clone();

        let id = {
            let mut inner = self.lock();
            let id = SubscriptionId(inner.next_id);
            inner.next_id += 1;
            inner.subscribers.push((
                id,
                Subscriber::Waiter(Box::new(move |event| {
                    let Some(sender) = tx.take() else {
                        return true;
                    };
                    match predicate(event) {
                        Some(payload) => {
                            // Receiver may already be gone (timed out); the
                            // waiter is removed either way.
                            let _ = sender.send(payload);
                            true
                        }
                        None => {
                            tx = Some(sender);
                            false
                        }
                    }
                })),
            ));
            id
        };

        async move {
            tokio::select! {
                // A match that raced the timer must win.
                biased;
                matched = rx => match matched {
                    Ok(payload) => Ok(payload),
                    // Sender dropped without a send: the bus went away.
                    Err(_) => {
                        self.unsubscribe(id);
                        Err(EngineError::WaitCancelled)
                    }
                },
                _ = cancel.cancelled() => {
                    self.unsubscribe(id);
                    Err(EngineError::WaitCancelled)
                }
                _ = tokio::time::sleep(timeout) => {
                    self.unsubscribe(id);
                    Err(EngineError::WaitTimeout {
                        waited_ms: timeout.as_millis() as u64,
                    })
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusInner> {
        self.inner.lock().expect("HandlerEventBus: lock poisoned")
    }
}

impl Default for HandlerEventBus {
    fn default() -> Self {
        Self::new()
    }
}
