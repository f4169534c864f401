//! Error types for the engine.

use thiserror::Error;

use slate_model::OperationsResponse;
use slate_store::StoreError;

use crate::source::SourceError;

/// Errors surfaced to the mutation's caller.
///
/// Only the write itself is fatal; rollback and reconciliation problems
/// are handled internally and never appear here.
#[derive(Debug, Error)]
pub enum MutationError {
    /// The write call failed before producing per-operation results.
    #[error("write failed: {0}")]
    Write(#[from] SourceError),

    /// The write executed but one or more operations failed; the
    /// per-operation results are carried for the caller to inspect.
    #[error("operation batch rejected by the server")]
    Rejected { response: Box<OperationsResponse> },

    /// A store operation failed outside the rollback path.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
