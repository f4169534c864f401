//! Operation types for the batch write endpoint.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::EntityKind;

/// The kind of change an operation requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

/// One requested change to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Caller-assigned id, echoed back in the result.
    pub id: String,
    /// Create, update or delete.
    #[serde(rename = "type")]
    pub kind: OperationKind,
    /// Which entity kind the operation targets.
    pub entity_type: EntityKind,
    /// Target entity id; absent for create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Partial payload: top-level fields plus nested `attrib`,
    /// `links` and `deleteLinks`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl Operation {
    /// Build an update for one entity.
    pub fn update(
        id: impl Into<String>,
        entity_type: EntityKind,
        entity_id: impl Into<String>,
        data: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: OperationKind::Update,
            entity_type,
            entity_id: Some(entity_id.into()),
            data: Some(data),
        }
    }

    /// Build a create; the server assigns the entity id.
    pub fn create(
        id: impl Into<String>,
        entity_type: EntityKind,
        data: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: OperationKind::Create,
            entity_type,
            entity_id: None,
            data: Some(data),
        }
    }

    /// Build a delete for one entity.
    pub fn delete(
        id: impl Into<String>,
        entity_type: EntityKind,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: OperationKind::Delete,
            entity_type,
            entity_id: Some(entity_id.into()),
            data: None,
        }
    }
}

/// Per-operation outcome reported by the write endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub entity_type: EntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub success: bool,
    /// HTTP-style status code for the individual operation.
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Response from the batch write endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationsResponse {
    pub operations: Vec<OperationResult>,
    /// True only when every operation succeeded.
    pub success: bool,
}

impl OperationsResponse {
    /// Entity ids of the operations that succeeded.
    pub fn succeeded_ids(&self) -> Vec<&str> {
        self.operations
            .iter()
            .filter(|op| op.success)
            .filter_map(|op| op.entity_id.as_deref())
            .collect()
    }
}
