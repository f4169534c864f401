//! Error types for the model crate.

use thiserror::Error;

/// Errors from parsing or validating domain values.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A filter string failed to parse.
    #[error("malformed filter: {0}")]
    FilterParse(#[source] serde_json::Error),

    /// An operation payload was structurally invalid.
    #[error("invalid operation payload: {0}")]
    InvalidOperation(String),
}
