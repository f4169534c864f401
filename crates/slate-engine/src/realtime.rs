//! Debounced batching of realtime change notifications.
//!
//! One [`BatchUpdater`] per live paginated/grouped cache entry. Incoming
//! notifications only carry entity ids; the updater accumulates them,
//! waits out a debounce window, fetches authoritative data for the batch
//! and merges it into its one entry.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, watch};
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use slate_model::{Entity, EntityKind};
use slate_store::{
    CacheData, CacheKey, QueryStore, RealtimeBus, RealtimeEvent, StoreEvent, SubscriptionToken,
    ViewArgs,
};

use crate::config::EngineConfig;
use crate::reconcile::merge_authoritative;
use crate::source::EntitySource;

/// Ids accumulated since the last flush, plus the flags serializing
/// flushes.
#[derive(Debug, Default)]
struct PendingBatch {
    ids: BTreeSet<String>,
    /// A debounce timer is already running.
    flush_scheduled: bool,
    /// A flush is between take and merge; no second flush may start.
    in_flight: bool,
}

struct Shared {
    store: Arc<QueryStore>,
    source: Arc<dyn EntitySource>,
    bus: Arc<RealtimeBus>,
    token: SubscriptionToken,
    key: CacheKey,
    kind: EntityKind,
    project: String,
    config: EngineConfig,
    pending: Mutex<PendingBatch>,
    shutdown_tx: watch::Sender<bool>,
}

/// Owns the realtime subscription for one cache entry.
///
/// Started when the entry is created and stopped when it is disposed;
/// entry disposal through the store ([`StoreEvent::EntryDropped`]) tears
/// the updater down on its own.
pub struct BatchUpdater {
    shared: Arc<Shared>,
}

impl BatchUpdater {
    /// Subscribe to the entity kind's topic and start listening.
    pub fn start(
        store: Arc<QueryStore>,
        source: Arc<dyn EntitySource>,
        bus: Arc<RealtimeBus>,
        key: CacheKey,
        kind: EntityKind,
        project: impl Into<String>,
        config: EngineConfig,
    ) -> Self {
        let topic = format!("entity.{kind}");
        let (token, events_rx) = bus.subscribe(&topic);
        let store_events = store.subscribe_events();
        let (shutdown_tx, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            store,
            source,
            bus,
            token,
            key,
            kind,
            project: project.into(),
            config,
            pending: Mutex::new(PendingBatch::default()),
            shutdown_tx,
        });

        tokio::spawn(listen(Arc::clone(&shared), events_rx, store_events));
        Self { shared }
    }

    /// Stop the updater: unsubscribe and cancel any pending flush timer.
    /// An in-flight fetch may complete but will not merge into a dead
    /// entry and will not re-schedule.
    pub fn stop(&self) {
        self.shared.shutdown();
    }

    /// The entry this updater feeds.
    pub fn key(&self) -> &CacheKey {
        &self.shared.key
    }

    /// Ids waiting for the next flush (test observability).
    pub async fn pending_len(&self) -> usize {
        self.shared.pending.lock().await.ids.len()
    }
}

async fn listen(
    shared: Arc<Shared>,
    mut events_rx: tokio::sync::mpsc::UnboundedReceiver<RealtimeEvent>,
    mut store_events: broadcast::Receiver<StoreEvent>,
) {
    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    loop {
        tokio::select! {
            maybe = events_rx.recv() => match maybe {
                Some(event) => shared.handle_notification(event).await,
                None => break,
            },
            result = store_events.recv() => match result {
                Ok(StoreEvent::EntryDropped(key)) if key == shared.key => {
                    debug!(key = %key, "entry disposed, stopping batch updater");
                    shared.shutdown();
                    break;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "batch updater lagged behind store events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown_rx.changed() => break,
        }
    }
}

impl Shared {
    fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.bus.unsubscribe(self.token);
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    fn entry_args(&self) -> Option<ViewArgs> {
        self.store.get(&self.key).map(|entry| entry.args)
    }

    async fn handle_notification(self: &Arc<Self>, event: RealtimeEvent) {
        // Parent-scoped views ignore notifications outside their current
        // parent set.
        let Some(args) = self.entry_args() else { return };
        if let Some(parents) = &args.parent_ids {
            let in_scope = event
                .summary
                .parent_id
                .as_ref()
                .is_some_and(|parent| parents.contains(parent));
            if !in_scope {
                trace!(entity = event.summary.entity_id, "notification outside parent scope");
                return;
            }
        }

        let mut pending = self.pending.lock().await;
        pending.ids.insert(event.summary.entity_id);
        if !pending.flush_scheduled && !pending.in_flight {
            pending.flush_scheduled = true;
            drop(pending);
            self.schedule_flush(self.config.debounce());
        }
    }

    fn schedule_flush(self: &Arc<Self>, delay: Duration) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let mut shutdown_rx = shared.shutdown_tx.subscribe();
            if *shutdown_rx.borrow() {
                return;
            }
            tokio::select! {
                () = sleep(delay) => {}
                _ = shutdown_rx.changed() => {
                    trace!("pending flush cancelled");
                    return;
                }
            }
            shared.flush().await;
        });
    }

    async fn flush(self: &Arc<Self>) {
        // Take up to the batch cap; anything beyond waits for the next
        // flush. The in-flight flag keeps flushes from overlapping.
        let batch: Vec<String> = {
            let mut pending = self.pending.lock().await;
            pending.flush_scheduled = false;
            if pending.in_flight {
                return;
            }
            let take: Vec<String> = pending
                .ids
                .iter()
                .take(self.config.max_batch)
                .cloned()
                .collect();
            if take.is_empty() {
                return;
            }
            for id in &take {
                pending.ids.remove(id);
            }
            pending.in_flight = true;
            take
        };

        trace!(batch = batch.len(), kind = %self.kind, "flushing realtime batch");
        let fetched = self
            .source
            .fetch_entities(&self.project, self.kind, &batch)
            .await;

        let mut fetch_failed = false;
        match fetched {
            Ok(entities) if self.is_live() => {
                let result = self.store.update_entry(&self.key, |args, data| {
                    merge_batch(args, data, &batch, &entities);
                });
                if let Err(error) = result {
                    trace!(%error, "batch target dropped before merge");
                }
            }
            Ok(_) => trace!("batch target no longer live, discarding fetch"),
            Err(error) => {
                // Re-queue rather than drop; the next flush retries.
                warn!(%error, ids = batch.len(), "realtime batch fetch failed, re-queueing");
                fetch_failed = true;
                let mut pending = self.pending.lock().await;
                pending.ids.extend(batch);
            }
        }

        let live = self.is_live();
        let reschedule = {
            let mut pending = self.pending.lock().await;
            pending.in_flight = false;
            if !pending.ids.is_empty() && live && !pending.flush_scheduled {
                pending.flush_scheduled = true;
                true
            } else {
                false
            }
        };
        if reschedule {
            // Cap overflow and mid-flight arrivals flush immediately; a
            // failed fetch waits out another debounce window first.
            let delay = if fetch_failed {
                self.config.debounce()
            } else {
                Duration::ZERO
            };
            self.schedule_flush(delay);
        }
    }

    fn is_live(&self) -> bool {
        !self.is_shutdown() && self.store.contains(&self.key)
    }
}

/// Merge one fetched batch into the entry.
///
/// An id we asked for with no row in the result no longer exists or no
/// longer qualifies server-side: drop it from the view. Returned rows
/// follow the same replace/remove/insert-head policy as reconciliation,
/// scoped to this one entry.
fn merge_batch(
    args: &ViewArgs,
    data: &mut CacheData,
    requested: &[String],
    fetched: &[Entity],
) {
    for id in requested {
        if !fetched.iter().any(|e| &e.id == id) {
            data.remove(id);
        }
    }
    merge_authoritative(args, data, fetched);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn task(id: &str, status: &str) -> Entity {
        let mut e = Entity::new(id, EntityKind::Task);
        e.fields.insert("status".to_string(), json!(status));
        e
    }

    #[test]
    fn merge_batch_removes_ids_missing_from_result() {
        let args = ViewArgs::for_project("demo");
        let mut data = CacheData::Flat(vec![task("t1", "todo"), task("t2", "todo")]);
        let requested = vec!["t1".to_string(), "t2".to_string()];

        merge_batch(&args, &mut data, &requested, &[task("t2", "done")]);

        assert_eq!(data.entity_ids(), vec!["t2"]);
        assert_eq!(data.get("t2").unwrap().fields["status"], json!("done"));
    }

    #[test]
    fn merge_batch_is_idempotent() {
        let args = ViewArgs::for_project("demo");
        let mut data = CacheData::Flat(vec![task("t1", "todo")]);
        let requested = vec!["t1".to_string(), "t2".to_string()];
        let fetched = vec![task("t1", "done"), task("t2", "done")];

        merge_batch(&args, &mut data, &requested, &fetched);
        let once = data.clone();
        merge_batch(&args, &mut data, &requested, &fetched);

        assert_eq!(data, once);
    }
}
