//! In-process realtime transport: topic-prefixed pub/sub.
//!
//! Change notifications arrive here from whatever pushes them (a
//! websocket pump in production, the test harness in tests) and fan out
//! to batch updaters by topic prefix.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

/// What a change notification says about the touched entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSummary {
    pub entity_id: String,
    /// Parent folder id, when the producer knows it. Parent-scoped views
    /// use it to ignore out-of-scope notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// One realtime change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    /// Dotted topic, e.g. `entity.task.status_changed`.
    pub topic: String,
    pub summary: EventSummary,
}

/// Handle for tearing a subscription down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

struct Subscriber {
    prefix: String,
    tx: mpsc::UnboundedSender<RealtimeEvent>,
}

/// Topic-prefix pub/sub bus.
///
/// Thread-safe; publishing walks the subscriber table and drops
/// subscribers whose receiver side has gone away.
pub struct RealtimeBus {
    next_token: AtomicU64,
    subscribers: DashMap<u64, Subscriber>,
}

impl RealtimeBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_token: AtomicU64::new(0),
            subscribers: DashMap::new(),
        })
    }

    /// Subscribe to every event whose topic starts with `prefix`.
    pub fn subscribe(
        &self,
        prefix: impl Into<String>,
    ) -> (SubscriptionToken, mpsc::UnboundedReceiver<RealtimeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.subscribers.insert(
            token,
            Subscriber {
                prefix: prefix.into(),
                tx,
            },
        );
        (SubscriptionToken(token), rx)
    }

    /// Tear down a subscription. Safe to call twice.
    pub fn unsubscribe(&self, token: SubscriptionToken) {
        if self.subscribers.remove(&token.0).is_some() {
            trace!(token = token.0, "realtime subscription removed");
        }
    }

    /// Fan an event out to every matching subscriber.
    pub fn publish(&self, event: &RealtimeEvent) {
        let mut stale = Vec::new();
        for sub in self.subscribers.iter() {
            if event.topic.starts_with(&sub.prefix)
                && sub.tx.send(event.clone()).is_err()
            {
                stale.push(*sub.key());
            }
        }
        for token in stale {
            self.subscribers.remove(&token);
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
