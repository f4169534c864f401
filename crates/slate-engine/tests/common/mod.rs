//! Shared test harness: an in-memory [`EntitySource`] with scriptable
//! failures and a record of every fetch batch.

#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;

use slate_engine::{EntitySource, SourceError};
use slate_model::{
    Entity, EntityKind, Operation, OperationKind, OperationResult, OperationsResponse,
};

pub struct MockSource {
    entities: DashMap<(EntityKind, String), Entity>,
    fail_writes: AtomicBool,
    reject_writes: AtomicBool,
    fail_next_fetch: AtomicBool,
    next_server_id: AtomicU64,
    fetch_batches: Mutex<Vec<Vec<String>>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            entities: DashMap::new(),
            fail_writes: AtomicBool::new(false),
            reject_writes: AtomicBool::new(false),
            fail_next_fetch: AtomicBool::new(false),
            next_server_id: AtomicU64::new(0),
            fetch_batches: Mutex::new(Vec::new()),
        }
    }

    pub fn seed(&self, entity: Entity) {
        self.entities.insert((entity.kind, entity.id.clone()), entity);
    }

    /// Every write fails at the transport level.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Every write comes back with per-operation failures.
    pub fn reject_writes(&self) {
        self.reject_writes.store(true, Ordering::SeqCst);
    }

    /// The next fetch (only) fails.
    pub fn fail_next_fetch(&self) {
        self.fail_next_fetch.store(true, Ordering::SeqCst);
    }

    pub fn get(&self, kind: EntityKind, id: &str) -> Option<Entity> {
        self.entities.get(&(kind, id.to_string())).map(|e| e.clone())
    }

    /// Every id batch `fetch_entities` was called with, in order.
    pub fn fetch_batches(&self) -> Vec<Vec<String>> {
        self.fetch_batches.lock().unwrap().clone()
    }

    fn apply(&self, op: &Operation) -> OperationResult {
        let entity_id = match op.kind {
            OperationKind::Create => {
                let data = op.data.clone().unwrap_or_default();
                let id = data
                    .get("id")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        format!("srv-{}", self.next_server_id.fetch_add(1, Ordering::SeqCst))
                    });
                let entity = Entity::new(&id, op.entity_type).apply_update(&data);
                self.entities.insert((op.entity_type, id.clone()), entity);
                Some(id)
            }
            OperationKind::Update => {
                let id = op.entity_id.clone().expect("update without target id");
                if let (Some(data), Some(existing)) =
                    (op.data.as_ref(), self.get(op.entity_type, &id))
                {
                    self.entities
                        .insert((op.entity_type, id.clone()), existing.apply_update(data));
                }
                Some(id)
            }
            OperationKind::Delete => {
                let id = op.entity_id.clone().expect("delete without target id");
                self.entities.remove(&(op.entity_type, id.clone()));
                Some(id)
            }
        };
        OperationResult {
            id: op.id.clone(),
            kind: op.kind,
            entity_type: op.entity_type,
            entity_id,
            success: true,
            status: 200,
            error_code: None,
            detail: None,
        }
    }
}

#[async_trait]
impl EntitySource for MockSource {
    async fn submit_operations(
        &self,
        _project: &str,
        operations: &[Operation],
    ) -> Result<OperationsResponse, SourceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SourceError::Transport("connection reset".to_string()));
        }
        if self.reject_writes.load(Ordering::SeqCst) {
            let operations = operations
                .iter()
                .map(|op| OperationResult {
                    id: op.id.clone(),
                    kind: op.kind,
                    entity_type: op.entity_type,
                    entity_id: op.entity_id.clone(),
                    success: false,
                    status: 400,
                    error_code: Some("bad-request".to_string()),
                    detail: Some("rejected by test source".to_string()),
                })
                .collect();
            return Ok(OperationsResponse {
                operations,
                success: false,
            });
        }
        let results: Vec<OperationResult> = operations.iter().map(|op| self.apply(op)).collect();
        Ok(OperationsResponse {
            operations: results,
            success: true,
        })
    }

    async fn fetch_entities(
        &self,
        _project: &str,
        kind: EntityKind,
        ids: &[String],
    ) -> Result<Vec<Entity>, SourceError> {
        if self.fail_next_fetch.swap(false, Ordering::SeqCst) {
            return Err(SourceError::Fetch("simulated fetch failure".to_string()));
        }
        self.fetch_batches.lock().unwrap().push(ids.to_vec());
        Ok(ids
            .iter()
            .filter_map(|id| self.get(kind, id))
            .collect())
    }

    async fn fetch_folder_list(&self, _project: &str) -> Result<Vec<Entity>, SourceError> {
        let mut folders: Vec<Entity> = self
            .entities
            .iter()
            .filter(|e| e.key().0 == EntityKind::Folder)
            .map(|e| e.clone())
            .collect();
        folders.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(folders)
    }
}

pub fn task(id: &str, status: &str) -> Entity {
    let mut e = Entity::new(id, EntityKind::Task);
    e.fields.insert("status".to_string(), json!(status));
    e
}

pub fn status_filter(operator: &str, value: &str) -> String {
    json!({
        "conditions": [{"key": "status", "operator": operator, "value": value}]
    })
    .to_string()
}
