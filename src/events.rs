//! Store notifications
//!
//! Subscribers register for an event kind and optionally a single title. Each
//! subscriber gets its own unbounded channel, so it sees events in the order
//! they were published.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

use crate::types::{Bag, Tiddler};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Tiddler,
    Bag,
}

#[derive(Clone, Debug)]
pub enum StoreEvent {
    /// A tiddler was added locally or changed on the server
    Tiddler(Tiddler),
    /// A bag was loaded from the server
    Bag(Bag),
}

impl StoreEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            StoreEvent::Tiddler(_) => EventKind::Tiddler,
            StoreEvent::Bag(_) => EventKind::Bag,
        }
    }

    fn name(&self) -> &str {
        match self {
            StoreEvent::Tiddler(t) => &t.title,
            StoreEvent::Bag(b) => &b.name,
        }
    }
}

pub type SubscriptionId = u64;

struct Subscriber {
    id: SubscriptionId,
    kind: EventKind,
    filter: Option<String>,
    tx: mpsc::UnboundedSender<StoreEvent>,
}

impl Subscriber {
    fn wants(&self, event: &StoreEvent) -> bool {
        self.kind == event.kind()
            && self.filter.as_deref().map_or(true, |name| name == event.name())
    }
}

/// Receiving end of a subscription. Dropping it unsubscribes lazily.
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<StoreEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<StoreEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StoreEvent> {
        self.rx.try_recv().ok()
    }
}

#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: EventKind, filter: Option<&str>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                id,
                kind,
                filter: filter.map(str::to_string),
                tx,
            });
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|s| s.id != id);
    }

    /// Deliver to every matching subscriber; closed subscriptions are dropped
    pub fn publish(&self, event: StoreEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|s| {
            if !s.wants(&event) {
                return !s.tx.is_closed();
            }
            s.tx.send(event.clone()).is_ok()
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
