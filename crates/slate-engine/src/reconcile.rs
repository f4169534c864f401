//! Background reconciliation after a successful write.
//!
//! The optimistic patches only know what the client guessed; server-side
//! computed attributes and filter membership can differ. This pass
//! refetches authoritative data for every touched entity and merges it
//! into every live view. It runs detached from the mutation's caller:
//! all failures here are logged and self-heal on the next natural
//! refetch.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use slate_model::{
    Entity, EntityKind, Operation, OperationKind, entity_matches, filter_keys, ops_touch_keys,
};
use slate_store::{CacheData, QueryStore, StoreView, Tag, ViewArgs};

use crate::source::{EntitySource, SourceError};

/// Reconcile the cache with authoritative data for the given operations.
///
/// Best-effort and idempotent; never surfaces an error.
#[tracing::instrument(skip_all, fields(project = %project, ops = operations.len()))]
pub async fn reconcile(
    store: Arc<QueryStore>,
    source: Arc<dyn EntitySource>,
    project: String,
    operations: Vec<Operation>,
) {
    if let Err(error) = run(&store, &source, &project, &operations).await {
        warn!(%error, "background reconciliation failed");
    }
}

async fn run(
    store: &QueryStore,
    source: &Arc<dyn EntitySource>,
    project: &str,
    operations: &[Operation],
) -> Result<(), SourceError> {
    let view = store.view();

    // Refetch is unconditional: even a filter-neutral change can carry
    // server-computed attributes the optimistic guess missed.
    for (kind, ids) in touched_ids(operations) {
        let ids: Vec<String> = ids.into_iter().collect();
        let entities = source.fetch_entities(project, kind, &ids).await?;
        debug!(kind = %kind, fetched = entities.len(), "merging authoritative rows");

        let mut tags: HashSet<Tag> = ids.iter().map(|id| Tag::id(kind, id.clone())).collect();
        tags.insert(Tag::list(kind));
        tags.insert(Tag::id(kind, project));

        for key in view.select_invalidated_by(&tags) {
            let result = store.update_entry(&key, |args, data| {
                merge_authoritative(args, data, &entities);
            });
            if let Err(error) = result {
                trace!(key = %key, %error, "entry dropped before reconcile merge");
            }
        }
    }

    // Folder changes that may move rows across an active filter boundary
    // additionally refresh the whole folder list.
    let folder_ops: Vec<Operation> = operations
        .iter()
        .filter(|op| op.entity_type == EntityKind::Folder && op.kind != OperationKind::Delete)
        .cloned()
        .collect();
    if !folder_ops.is_empty() && folder_filter_affected(&view, &folder_ops) {
        let folders = source.fetch_folder_list(project).await?;
        debug!(folders = folders.len(), "merging refetched folder list");

        let tags: HashSet<Tag> = [
            Tag::list(EntityKind::Folder),
            Tag::id(EntityKind::Folder, project),
        ]
        .into_iter()
        .collect();
        for key in view.select_invalidated_by(&tags) {
            let result = store.update_entry(&key, |args, data| {
                merge_folder_list(args, data, &folders);
            });
            if let Err(error) = result {
                trace!(key = %key, %error, "entry dropped before folder merge");
            }
        }
    }

    Ok(())
}

/// Entity ids each kind needs refetched: update targets plus creates
/// that received a server-assigned id. Deletes have nothing to fetch.
fn touched_ids(operations: &[Operation]) -> BTreeMap<EntityKind, BTreeSet<String>> {
    let mut by_kind: BTreeMap<EntityKind, BTreeSet<String>> = BTreeMap::new();
    for op in operations {
        if op.kind == OperationKind::Delete {
            continue;
        }
        if let Some(id) = &op.entity_id {
            by_kind.entry(op.entity_type).or_default().insert(id.clone());
        }
    }
    by_kind
}

/// Whether any live view's filter references a field these folder
/// operations change. A malformed filter can never be affected.
fn folder_filter_affected(view: &StoreView, folder_ops: &[Operation]) -> bool {
    view.rows().iter().any(|row| {
        row.args
            .parsed_filter()
            .map(|filter| ops_touch_keys(folder_ops, &filter_keys(&filter)))
            .unwrap_or(false)
    })
}

/// Merge fetched rows into one entry, retention decided by the view's
/// filter:
/// - present and still matching (or unfiltered) - replace in place;
/// - present and no longer matching - remove;
/// - absent, now matching and in parent scope - insert at the head of
///   the first page.
pub(crate) fn merge_authoritative(args: &ViewArgs, data: &mut CacheData, fetched: &[Entity]) {
    let filter = args.parsed_filter();
    for entity in fetched {
        let matches = filter
            .as_ref()
            .map_or(true, |f| entity_matches(entity, f));
        if data.contains(&entity.id) {
            if matches {
                data.replace(entity.clone());
            } else {
                data.remove(&entity.id);
            }
        } else if matches && args.accepts_parent(entity) {
            data.insert_head(entity.clone());
        }
    }
}

/// Folder-list merge. Same retention policy, but `own_attrib` marks
/// present only in the cached row are kept: the server may not have
/// committed an ownership change the optimistic patch already shows.
fn merge_folder_list(args: &ViewArgs, data: &mut CacheData, fetched: &[Entity]) {
    let filter = args.parsed_filter();
    for folder in fetched {
        let matches = filter
            .as_ref()
            .map_or(true, |f| entity_matches(folder, f));
        match data.get(&folder.id) {
            Some(cached) if matches => {
                let mut merged = folder.clone();
                let cached_marks: Vec<String> = cached
                    .own_attrib
                    .difference(&merged.own_attrib)
                    .cloned()
                    .collect();
                merged.own_attrib.extend(cached_marks);
                data.replace(merged);
            }
            Some(_) => {
                data.remove(&folder.id);
            }
            None if matches => data.insert_head(folder.clone()),
            None => {}
        }
    }
}
