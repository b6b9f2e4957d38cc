//! Typed event bus.
//!
//! Connection and per-feature state changes fan out through an
//! [`EventBus`]. Each event type gets its own broadcast channel, so a
//! subscriber only sees the type it asked for.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::connection::DeviceIdentity;
use crate::protocol::FeatureId;

/// Default per-type channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Bound satisfied by every event type.
pub trait BusEvent: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> BusEvent for T {}

/// Lifecycle events published by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Plugins were instantiated and started.
    Started {
        device: DeviceIdentity,
        features: Vec<FeatureId>,
    },
    /// An acknowledgement wait timed out and its command was dropped.
    AckTimedOut { device: DeviceIdentity },
    /// The device handed over to a new session endpoint.
    HandedOver { device: DeviceIdentity },
    /// The session stopped and its plugins were dropped.
    Stopped { device: DeviceIdentity },
}

/// A subscription to one event type.
pub struct Subscription<E> {
    receiver: broadcast::Receiver<E>,
}

impl<E: BusEvent> Subscription<E> {
    /// Receives the next event.
    ///
    /// Returns `None` once the bus is dropped. Events missed because the
    /// subscriber lagged are skipped.
    pub async fn recv(&mut self) -> Option<E> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next already-published event without waiting.
    pub fn try_recv(&mut self) -> Option<E> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }

    /// Ends the subscription.
    pub fn unsubscribe(self) {}
}

/// Handle to a handler registered with [`EventBus::subscribe_with`].
///
/// The handler stops running when the handle is unsubscribed or dropped.
#[derive(Debug)]
pub struct SubscriptionHandle {
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Stops the handler.
    pub fn unsubscribe(self) {}

    /// Returns true if the handler is no longer running.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct EventBusInner {
    channels: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    capacity: usize,
}

/// Typed publish/subscribe bus.
///
/// Cloning is cheap; clones share the same channels.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.inner.capacity)
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Creates a bus whose per-type channels hold `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(EventBusInner {
                channels: Mutex::new(HashMap::new()),
                capacity: capacity.max(1),
            }),
        }
    }

    fn sender<E: BusEvent>(&self) -> broadcast::Sender<E> {
        let mut channels = self
            .inner
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = channels
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(broadcast::channel::<E>(self.inner.capacity).0));
        entry
            .downcast_ref::<broadcast::Sender<E>>()
            .map_or_else(|| broadcast::channel(1).0, Clone::clone)
    }

    /// Publishes an event to every current subscriber of its type.
    ///
    /// Returns the number of subscribers reached.
    pub fn publish<E: BusEvent>(&self, event: E) -> usize {
        // no receivers is fine
        self.sender::<E>().send(event).unwrap_or(0)
    }

    /// Subscribes to events of type `E`.
    #[must_use]
    pub fn subscribe<E: BusEvent>(&self) -> Subscription<E> {
        Subscription {
            receiver: self.sender::<E>().subscribe(),
        }
    }

    /// Runs `handler` on a background task for every event of type `E`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe_with<E, F>(&self, mut handler: F) -> SubscriptionHandle
    where
        E: BusEvent,
        F: FnMut(E) + Send + 'static,
    {
        let mut subscription = self.subscribe::<E>();
        let task = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                handler(event);
            }
        });
        SubscriptionHandle { task }
    }

    /// Waits for an event of type `E` matching `filter`, with timeout.
    ///
    /// Returns `None` if the timeout expires or the bus is closed.
    pub async fn wait_for<E, F>(&self, filter: F, timeout: Duration) -> Option<E>
    where
        E: BusEvent,
        F: Fn(&E) -> bool,
    {
        let mut subscription = self.subscribe::<E>();

        tokio::select! {
            biased;
            result = async {
                loop {
                    if let Some(event) = subscription.recv().await {
                        if filter(&event) {
                            return Some(event);
                        }
                    } else {
                        return None;
                    }
                }
            } => result,
            () = tokio::time::sleep(timeout) => None,
        }
    }
}
