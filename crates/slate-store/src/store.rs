//! The query store: entry lifecycle, reversible patches, tag fan-out.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::entry::{CacheEntry, CacheKey, QueryStatus, ViewArgs};
use crate::error::StoreError;
use crate::shape::CacheData;
use crate::tag::Tag;

/// Broadcast capacity for store events. Invalidation bursts from a large
/// operation batch stay well under this.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Events emitted by the store for its collaborators.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// These entries were invalidated and need a refetch.
    Invalidated(Vec<CacheKey>),
    /// The last subscriber of this entry went away; the entry is gone and
    /// anything owning resources for it must tear down.
    EntryDropped(CacheKey),
}

/// A reversible edit applied to one cache entry.
///
/// Holds the entry's full pre-image; undoing restores it iff the entry is
/// still live. Explicit values rather than closures so rollback order and
/// idempotence stay visible to tests.
#[derive(Debug)]
pub struct AppliedPatch {
    key: CacheKey,
    previous: CacheData,
}

impl AppliedPatch {
    /// The entry this patch was applied to.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

/// Snapshot of entry metadata, taken once per orchestrator invocation so
/// tag selection is computed against a stable view of the store.
#[derive(Debug, Clone)]
pub struct StoreView {
    rows: Vec<ViewRow>,
}

/// One entry's metadata inside a [`StoreView`].
#[derive(Debug, Clone)]
pub struct ViewRow {
    pub key: CacheKey,
    pub args: ViewArgs,
    pub status: QueryStatus,
    pub tags: HashSet<Tag>,
}

impl StoreView {
    /// Every fulfilled entry whose tag set intersects the given tags.
    ///
    /// Entries still loading or in error are excluded: there is nothing
    /// coherent to patch in them.
    pub fn select_invalidated_by(&self, tags: &HashSet<Tag>) -> Vec<CacheKey> {
        self.rows
            .iter()
            .filter(|row| row.status == QueryStatus::Fulfilled)
            .filter(|row| !row.tags.is_disjoint(tags))
            .map(|row| row.key.clone())
            .collect()
    }

    /// All rows in the snapshot.
    pub fn rows(&self) -> &[ViewRow] {
        &self.rows
    }
}

/// In-memory store of live query results.
///
/// Thread-safe; every mutation is a synchronous read-modify-write under
/// one map entry guard with no suspension point inside.
pub struct QueryStore {
    entries: DashMap<CacheKey, CacheEntry>,
    events_tx: broadcast::Sender<StoreEvent>,
}

impl QueryStore {
    pub fn new() -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            entries: DashMap::new(),
            events_tx,
        })
    }

    /// Subscribe to store events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<StoreEvent> {
        self.events_tx.subscribe()
    }

    fn emit(&self, event: StoreEvent) {
        if self.events_tx.send(event).is_err() {
            trace!("no subscribers for store event");
        }
    }

    /// Register a new entry for a subscribing view, or add a subscriber
    /// to an existing one. `initial` fixes the entry's shape.
    pub fn register(&self, key: CacheKey, args: ViewArgs, initial: CacheData) {
        match self.entries.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                occupied.get_mut().subscribers += 1;
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                trace!(key = %key, "cache entry created");
                vacant.insert(CacheEntry::new(key, args, initial));
            }
        }
    }

    /// Drop one subscription. When the last subscriber goes away the
    /// entry is removed and `EntryDropped` is emitted.
    pub fn unsubscribe(&self, key: &CacheKey) {
        let dropped = match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.subscribers = entry.subscribers.saturating_sub(1);
                entry.subscribers == 0
            }
            None => false,
        };
        if dropped {
            self.entries.remove(key);
            debug!(key = %key, "cache entry dropped with last subscriber");
            self.emit(StoreEvent::EntryDropped(key.clone()));
        }
    }

    /// Clone out an entry.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.get(key).map(|e| e.clone())
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a successful fetch: data replaced wholesale, tags
    /// re-associated, status fulfilled.
    pub fn fulfill(&self, key: &CacheKey, data: CacheData, tags: HashSet<Tag>) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.data = data;
            entry.tags = tags;
            entry.status = QueryStatus::Fulfilled;
        }
    }

    /// Record a failed fetch.
    pub fn reject(&self, key: &CacheKey) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.status = QueryStatus::Rejected;
        }
    }

    /// Apply a synchronous mutation to one entry's data, returning the
    /// undo-capable patch handle.
    ///
    /// The mutator runs under the entry guard; it must not block.
    pub fn update_entry(
        &self,
        key: &CacheKey,
        mutate: impl FnOnce(&ViewArgs, &mut CacheData),
    ) -> Result<AppliedPatch, StoreError> {
        let mut entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| StoreError::EntryMissing(key.clone()))?;
        let previous = entry.data.clone();
        let args = entry.args.clone();
        mutate(&args, &mut entry.data);
        Ok(AppliedPatch {
            key: key.clone(),
            previous,
        })
    }

    /// Restore an entry to its pre-patch data.
    ///
    /// A patch whose entry has since been dropped is a no-op: there is
    /// nothing left to restore into.
    pub fn undo(&self, patch: AppliedPatch) -> Result<(), StoreError> {
        match self.entries.get_mut(&patch.key) {
            Some(mut entry) => {
                entry.data = patch.previous;
                Ok(())
            }
            None => Err(StoreError::EntryMissing(patch.key)),
        }
    }

    /// Snapshot entry metadata for tag selection.
    pub fn view(&self) -> StoreView {
        StoreView {
            rows: self
                .entries
                .iter()
                .map(|e| ViewRow {
                    key: e.key.clone(),
                    args: e.args.clone(),
                    status: e.status,
                    tags: e.tags.clone(),
                })
                .collect(),
        }
    }

    /// Invalidate every fulfilled entry depending on one of the tags.
    ///
    /// Matching entries flip to `Pending` and an `Invalidated` event is
    /// emitted so the fetch layer refetches them. Returns the affected
    /// keys.
    pub fn invalidate_tags(&self, tags: &HashSet<Tag>) -> Vec<CacheKey> {
        let mut invalidated = Vec::new();
        for mut entry in self.entries.iter_mut() {
            if entry.status == QueryStatus::Fulfilled && !entry.tags.is_disjoint(tags) {
                entry.status = QueryStatus::Pending;
                invalidated.push(entry.key.clone());
            }
        }
        if !invalidated.is_empty() {
            debug!(entries = invalidated.len(), "invalidated cache entries");
            self.emit(StoreEvent::Invalidated(invalidated.clone()));
        } else {
            trace!("no cache entries matched invalidation tags");
        }
        invalidated
    }

    /// Best-effort rollback of a patch list, in reverse application
    /// order. A failing undo never skips the remaining handles.
    pub fn undo_all(&self, patches: Vec<AppliedPatch>) {
        for patch in patches.into_iter().rev() {
            let key = patch.key.clone();
            if let Err(error) = self.undo(patch) {
                warn!(key = %key, %error, "rollback skipped a dropped entry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use slate_model::{Entity, EntityKind};

    fn task(id: &str, status: &str) -> Entity {
        let mut e = Entity::new(id, EntityKind::Task);
        e.fields.insert("status".to_string(), json!(status));
        e
    }

    fn key(name: &str) -> CacheKey {
        CacheKey::new(name, "{}")
    }

    fn fulfilled_entry(store: &QueryStore, name: &str, data: CacheData, tags: &[Tag]) -> CacheKey {
        let k = key(name);
        store.register(k.clone(), ViewArgs::for_project("demo"), data.empty_like());
        store.fulfill(&k, data, tags.iter().cloned().collect());
        k
    }

    #[test]
    fn update_then_undo_restores_pre_patch_value() {
        let store = QueryStore::new();
        let data = CacheData::Flat(vec![task("t1", "todo")]);
        let k = fulfilled_entry(&store, "tasks", data.clone(), &[]);

        let patch = store
            .update_entry(&k, |_, d| {
                d.replace(task("t1", "done"));
            })
            .unwrap();
        assert_eq!(
            store.get(&k).unwrap().data.get("t1").unwrap().fields["status"],
            json!("done")
        );

        store.undo(patch).unwrap();
        assert_eq!(store.get(&k).unwrap().data, data);
    }

    #[test]
    fn select_invalidated_by_skips_unfulfilled_entries() {
        let store = QueryStore::new();
        let tag = Tag::list(EntityKind::Task);
        let k1 = fulfilled_entry(
            &store,
            "tasks",
            CacheData::Flat(vec![]),
            std::slice::from_ref(&tag),
        );

        // Pending entry with the same tag must not be selected.
        let k2 = key("pendingTasks");
        store.register(
            k2.clone(),
            ViewArgs::for_project("demo"),
            CacheData::Flat(vec![]),
        );
        if let Some(mut e) = store.entries.get_mut(&k2) {
            e.tags.insert(tag.clone());
        }

        let selected = store
            .view()
            .select_invalidated_by(&[tag].into_iter().collect());
        assert_eq!(selected, vec![k1]);
    }

    #[test]
    fn invalidate_tags_flips_status_and_emits() {
        let store = QueryStore::new();
        let mut rx = store.subscribe_events();
        let tag = Tag::id(EntityKind::Task, "t1");
        let k = fulfilled_entry(
            &store,
            "taskDetail",
            CacheData::Flat(vec![task("t1", "todo")]),
            std::slice::from_ref(&tag),
        );

        let hit = store.invalidate_tags(&[tag].into_iter().collect());
        assert_eq!(hit, vec![k.clone()]);
        assert_eq!(store.get(&k).unwrap().status, QueryStatus::Pending);
        match rx.try_recv().unwrap() {
            StoreEvent::Invalidated(keys) => assert_eq!(keys, vec![k]),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn last_unsubscribe_drops_entry_and_notifies() {
        let store = QueryStore::new();
        let mut rx = store.subscribe_events();
        let k = key("tasks");
        store.register(
            k.clone(),
            ViewArgs::for_project("demo"),
            CacheData::Flat(vec![]),
        );
        store.register(
            k.clone(),
            ViewArgs::for_project("demo"),
            CacheData::Flat(vec![]),
        );

        store.unsubscribe(&k);
        assert!(store.contains(&k));
        store.unsubscribe(&k);
        assert!(!store.contains(&k));

        match rx.try_recv().unwrap() {
            StoreEvent::EntryDropped(dropped) => assert_eq!(dropped, k),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn undo_after_entry_drop_is_an_error_not_a_panic() {
        let store = QueryStore::new();
        let k = fulfilled_entry(&store, "tasks", CacheData::Flat(vec![task("t1", "todo")]), &[]);
        let patch = store.update_entry(&k, |_, d| {
            d.replace(task("t1", "done"));
        });
        store.unsubscribe(&k);
        assert!(store.undo(patch.unwrap()).is_err());
    }
}
