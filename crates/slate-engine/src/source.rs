//! The authoritative data source the engine writes to and refetches from.

use async_trait::async_trait;
use thiserror::Error;

use slate_model::{Entity, EntityKind, Operation, OperationsResponse};

/// Errors from the entity source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The batch write was rejected outright.
    #[error("write rejected: {0}")]
    Write(String),

    /// A read of authoritative data failed.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// The transport itself failed.
    #[error("transport error: {0}")]
    Transport(String),
}

/// The external write/read endpoint the engine collaborates with.
///
/// Write failures are fatal to the mutation's caller; fetch failures on
/// the reconciliation and realtime paths are logged and self-heal on the
/// next pass.
#[async_trait]
pub trait EntitySource: Send + Sync {
    /// Submit a batch of operations for execution.
    async fn submit_operations(
        &self,
        project: &str,
        operations: &[Operation],
    ) -> Result<OperationsResponse, SourceError>;

    /// Fetch authoritative snapshots for exactly the given ids.
    ///
    /// Ids with no corresponding entity are simply absent from the
    /// result; callers treat absence as "gone or no longer qualifies".
    async fn fetch_entities(
        &self,
        project: &str,
        kind: EntityKind,
        ids: &[String],
    ) -> Result<Vec<Entity>, SourceError>;

    /// Fetch the full folder list for a project.
    async fn fetch_folder_list(&self, project: &str) -> Result<Vec<Entity>, SourceError>;
}
