// ── Session notifications ──
//
// Typed fan-out from one session to its downstream consumers. Each
// subscriber owns a bounded channel; publishing awaits capacity, so a
// slow consumer back-pressures the publisher instead of losing updates.

mod filter;

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures_core::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::trace;

pub use filter::Topic;

use crate::model::{DeviceActionCall, EntityDescriptor, EntityKey, EntityKind, SessionId};

/// Why an entity should re-read its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateCause {
    /// A new reading arrived.
    State,
    /// Device availability flipped.
    Availability,
}

/// A change published by a session.
#[derive(Debug, Clone)]
pub enum Notification {
    /// One batch per reconciliation pass, after any removals.
    EntitiesAdded {
        kind: EntityKind,
        descriptors: Vec<Arc<EntityDescriptor>>,
    },
    EntityRemoved {
        kind: EntityKind,
        key: EntityKey,
    },
    EntityUpdated {
        kind: EntityKind,
        key: EntityKey,
        cause: UpdateCause,
    },
    DeviceUpdated {
        available: bool,
    },
    /// A call the device asked the host to perform.
    DeviceCall(DeviceActionCall),
    /// Credentials were rejected; the host should prompt for new ones.
    ReauthRequired {
        reason: String,
    },
}

/// A notification tagged with its originating session.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub session: SessionId,
    pub notification: Notification,
}

// ── Hub ──────────────────────────────────────────────────────────────

struct Subscriber {
    topic: Topic,
    tx: mpsc::Sender<SessionEvent>,
}

/// Per-session subscriber registry.
pub struct NotificationHub {
    session: SessionId,
    capacity: usize,
    next_id: AtomicU64,
    subscribers: DashMap<u64, Subscriber>,
}

impl NotificationHub {
    pub fn new(session: SessionId, capacity: usize) -> Self {
        Self {
            session,
            capacity: capacity.max(1),
            next_id: AtomicU64::new(0),
            subscribers: DashMap::new(),
        }
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, Subscriber { topic, tx });
        Subscription { topic, rx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver `notification` to every matching subscriber, in
    /// subscription order. Closed subscriptions are pruned.
    pub async fn publish(&self, notification: Notification) {
        let mut targets: Vec<(u64, mpsc::Sender<SessionEvent>)> = self
            .subscribers
            .iter()
            .filter(|s| s.topic.matches(&notification))
            .map(|s| (*s.key(), s.tx.clone()))
            .collect();
        if targets.is_empty() {
            return;
        }
        targets.sort_by_key(|(id, _)| *id);

        let event = SessionEvent {
            session: self.session.clone(),
            notification,
        };
        for (id, tx) in targets {
            if tx.send(event.clone()).await.is_err() {
                trace!(subscriber = id, "dropping closed subscription");
                self.subscribers.remove(&id);
            }
        }
    }
}

// ── Subscription ─────────────────────────────────────────────────────

/// Receiving end of a hub subscription. Dropping it unsubscribes.
pub struct Subscription {
    topic: Topic,
    rx: mpsc::Receiver<SessionEvent>,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Next event, or `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Non-blocking poll, `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> NotificationStream {
        NotificationStream {
            inner: ReceiverStream::new(self.rx),
        }
    }
}

/// `Stream` adapter over a [`Subscription`].
pub struct NotificationStream {
    inner: ReceiverStream<SessionEvent>,
}

impl Stream for NotificationStream {
    type Item = SessionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
