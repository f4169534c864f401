//! The optimistic patch engine.
//!
//! Applies an operation batch to every cache entry it can reach, in
//! place, before the network write is issued. Each modified entry yields
//! one reversible [`AppliedPatch`]; the orchestrator holds them until the
//! write settles.

use serde_json::Value;
use tracing::trace;

use slate_model::{Entity, Operation, OperationKind};
use slate_store::{AppliedPatch, CacheData, CacheKey, QueryStore, ViewArgs};

/// Apply a batch of operations to the given cache entries.
///
/// Runs synchronously; patches are visible to readers before any network
/// round-trip begins. Per entry:
/// - `create` appends the new row when the payload carries enough to
///   build one and the entry's parent scope accepts it;
/// - `update` merges `data` into the row with the target id, if present
///   (group annotations survive via the shape's replace);
/// - `delete` never mutates rows - deletions go through tag
///   invalidation instead.
///
/// Entries the batch cannot touch produce no patch handle.
pub fn apply_optimistic(
    store: &QueryStore,
    keys: &[CacheKey],
    operations: &[Operation],
) -> Vec<AppliedPatch> {
    let mut patches = Vec::new();
    for key in keys {
        let Some(entry) = store.get(key) else { continue };
        if !batch_touches(&entry.args, &entry.data, operations) {
            continue;
        }
        let result = store.update_entry(key, |args, data| {
            for op in operations {
                apply_one(args, data, op);
            }
        });
        match result {
            Ok(patch) => patches.push(patch),
            // The entry vanished between snapshot and patch; nothing to
            // roll back for it.
            Err(error) => trace!(key = %key, %error, "entry dropped before patch"),
        }
    }
    trace!(patched = patches.len(), "optimistic patches applied");
    patches
}

fn apply_one(args: &ViewArgs, data: &mut CacheData, op: &Operation) {
    match op.kind {
        OperationKind::Create => {
            if let Some(row) = entity_from_create(op) {
                if args.accepts_parent(&row) && !data.contains(&row.id) {
                    data.append(row);
                }
            }
        }
        OperationKind::Delete => {}
        OperationKind::Update => {
            let (Some(id), Some(payload)) = (op.entity_id.as_deref(), op.data.as_ref()) else {
                return;
            };
            if let Some(existing) = data.get(id) {
                let merged = existing.apply_update(payload);
                data.replace(merged);
            }
        }
    }
}

/// Whether any operation in the batch can change this entry.
fn batch_touches(args: &ViewArgs, data: &CacheData, operations: &[Operation]) -> bool {
    operations.iter().any(|op| match op.kind {
        OperationKind::Create => entity_from_create(op)
            .is_some_and(|row| args.accepts_parent(&row) && !data.contains(&row.id)),
        OperationKind::Delete => false,
        OperationKind::Update => op
            .entity_id
            .as_deref()
            .is_some_and(|id| op.data.is_some() && data.contains(id)),
    })
}

/// Build a row from a create payload, when it carries enough data.
///
/// Creates without a client-assigned id cannot produce a plausible row;
/// the views depending on them are refreshed through invalidation
/// instead.
fn entity_from_create(op: &Operation) -> Option<Entity> {
    let data = op.data.as_ref()?;
    let id = data.get("id").and_then(Value::as_str)?;
    Some(Entity::new(id, op.entity_type).apply_update(data))
}
