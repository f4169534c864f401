//! The mutation orchestrator.
//!
//! Per mutation the state machine is
//! `Idle -> OptimisticallyPatched -> (Fulfilled | RolledBack)`: patches
//! go in synchronously before the write is issued, the write settles,
//! and the patches are either committed (dropped) with a background
//! reconciliation pass, or undone in reverse order.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use slate_model::{EntityKind, Operation, OperationKind, OperationsResponse};
use slate_store::{AppliedPatch, QueryStore, Tag, operation_tags};

use crate::error::MutationError;
use crate::patch::apply_optimistic;
use crate::reconcile;
use crate::source::EntitySource;

/// One batch write plus its optional extra patch list.
#[derive(Debug, Clone)]
pub struct MutationRequest {
    pub project: String,
    /// Operations sent to the write endpoint.
    pub operations: Vec<Operation>,
    /// Caller-supplied patch-only operations, used to propagate changes
    /// to computed or inherited dependents. Applied through the patch
    /// engine but never sent to the server.
    pub patch_operations: Option<Vec<Operation>>,
}

/// Orchestrates a single outgoing write against the cache.
pub struct MutationEngine {
    store: Arc<QueryStore>,
    source: Arc<dyn EntitySource>,
}

impl MutationEngine {
    pub fn new(store: Arc<QueryStore>, source: Arc<dyn EntitySource>) -> Self {
        Self { store, source }
    }

    /// Issue a batch write with optimistic cache updates.
    ///
    /// Returns the per-operation results on full success. Any write
    /// failure (transport or per-operation) rolls every optimistic patch
    /// back before surfacing; reconciliation after success runs in the
    /// background and can never fail the caller.
    #[tracing::instrument(skip_all, fields(project = %request.project, ops = request.operations.len()))]
    pub async fn submit(
        &self,
        request: MutationRequest,
    ) -> Result<OperationsResponse, MutationError> {
        let view = self.store.view();
        let mut patches: Vec<AppliedPatch> = Vec::new();

        // Entity ids the caller already covers with explicit patch ops.
        let covered: HashSet<&str> = request
            .patch_operations
            .iter()
            .flatten()
            .filter_map(|op| op.entity_id.as_deref())
            .collect();

        for (kind, ops) in split_by_kind(&request.operations) {
            let mut patchable: Vec<Operation> = Vec::new();
            let mut deletes: Vec<Operation> = Vec::new();
            for op in ops {
                match op.kind {
                    OperationKind::Delete => deletes.push(op.clone()),
                    OperationKind::Update
                        if op.entity_id.as_deref().is_some_and(|id| covered.contains(id)) => {}
                    OperationKind::Update | OperationKind::Create => patchable.push(op.clone()),
                }
            }

            if !patchable.is_empty() {
                let tags = operation_tags(&request.project, &patchable);
                let keys = view.select_invalidated_by(&tags);
                patches.extend(apply_optimistic(&self.store, &keys, &patchable));
            }

            // Deletes never patch rows; dependent views refetch instead.
            if !deletes.is_empty() {
                debug!(kind = %kind, deletes = deletes.len(), "invalidating for deletes");
                self.store
                    .invalidate_tags(&operation_tags(&request.project, &deletes));
            }
        }

        // Caller-supplied dependents go through the same patch engine.
        if let Some(extra) = &request.patch_operations {
            if !extra.is_empty() {
                let tags = operation_tags(&request.project, extra);
                let keys = view.select_invalidated_by(&tags);
                patches.extend(apply_optimistic(&self.store, &keys, extra));
            }
        }

        match self
            .source
            .submit_operations(&request.project, &request.operations)
            .await
        {
            Ok(response) if response.success => {
                // Commit: the handles are simply discarded.
                drop(patches);
                self.spawn_reconciler(&request, &response);
                Ok(response)
            }
            Ok(response) => {
                warn!("write returned per-operation failures, rolling back");
                self.rollback(patches, &request);
                Err(MutationError::Rejected {
                    response: Box::new(response),
                })
            }
            Err(error) => {
                warn!(%error, "write failed, rolling back");
                self.rollback(patches, &request);
                Err(MutationError::Write(error))
            }
        }
    }

    /// Undo every patch in reverse application order, then re-invalidate
    /// the per-entity caches that were optimistically patched so they
    /// refetch from source. Always runs to completion.
    fn rollback(&self, patches: Vec<AppliedPatch>, request: &MutationRequest) {
        self.store.undo_all(patches);

        let mut tags: HashSet<Tag> = HashSet::new();
        for op in request
            .operations
            .iter()
            .chain(request.patch_operations.iter().flatten())
        {
            if let Some(id) = &op.entity_id {
                tags.insert(Tag::id(op.entity_type, id.clone()));
            }
        }
        if !tags.is_empty() {
            self.store.invalidate_tags(&tags);
        }
    }

    /// Kick off background reconciliation. Never blocks and never fails
    /// the caller; its errors are logged inside.
    fn spawn_reconciler(&self, request: &MutationRequest, response: &OperationsResponse) {
        let store = Arc::clone(&self.store);
        let source = Arc::clone(&self.source);
        let project = request.project.clone();
        let operations = with_assigned_ids(&request.operations, response);
        tokio::spawn(async move {
            reconcile::reconcile(store, source, project, operations).await;
        });
    }
}

fn split_by_kind(operations: &[Operation]) -> BTreeMap<EntityKind, Vec<&Operation>> {
    let mut by_kind: BTreeMap<EntityKind, Vec<&Operation>> = BTreeMap::new();
    for op in operations {
        by_kind.entry(op.entity_type).or_default().push(op);
    }
    by_kind
}

/// Fill in server-assigned entity ids on create operations so the
/// reconciler can fetch the rows they produced.
fn with_assigned_ids(operations: &[Operation], response: &OperationsResponse) -> Vec<Operation> {
    let mut operations = operations.to_vec();
    for op in operations.iter_mut() {
        if op.kind == OperationKind::Create && op.entity_id.is_none() {
            op.entity_id = response
                .operations
                .iter()
                .find(|res| res.id == op.id && res.success)
                .and_then(|res| res.entity_id.clone());
        }
    }
    operations
}
