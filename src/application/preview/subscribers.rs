use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};
use uuid::Uuid;

/// Payload pushed to every connected viewer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushMessage {
    pub html: String,
    pub scroll_percent: Option<f64>,
}

/// Registry of live push-channel connections.
///
/// Connections register an unbounded sender; delivery failures are isolated
/// per subscriber, logged, and the stale entry dropped without touching the
/// others.
#[derive(Default, Clone)]
pub struct SubscriberSet {
    inner: Arc<DashMap<Uuid, UnboundedSender<PushMessage>>>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    pub fn register(&self) -> (Uuid, UnboundedReceiver<PushMessage>) {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner.insert(id, sender);
        debug!(
            target = "application::preview::subscribers",
            subscriber = %id,
            total = self.inner.len(),
            "Subscriber connected"
        );
        (id, receiver)
    }

    pub fn remove(&self, id: Uuid) {
        if self.inner.remove(&id).is_some() {
            debug!(
                target = "application::preview::subscribers",
                subscriber = %id,
                total = self.inner.len(),
                "Subscriber disconnected"
            );
        }
    }

    /// Deliver `message` to a single subscriber. Returns false when the
    /// subscriber is unknown or its channel has closed.
    pub fn send_to(&self, id: Uuid, message: PushMessage) -> bool {
        match self.inner.get(&id) {
            Some(entry) => entry.value().send(message).is_ok(),
            None => false,
        }
    }

    /// Deliver `message` to every subscriber independently; failed sends are
    /// logged and the stale entries reaped afterwards. Returns the number of
    /// successful deliveries.
    pub fn broadcast(&self, message: &PushMessage) -> usize {
        let mut delivered = 0;
        let mut stale = Vec::new();

        for entry in self.inner.iter() {
            if entry.value().send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                warn!(
                    target = "application::preview::subscribers",
                    subscriber = %entry.key(),
                    "Dropping stale subscriber after failed delivery"
                );
                stale.push(*entry.key());
            }
        }

        for id in stale {
            self.inner.remove(&id);
        }

        delivered
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
