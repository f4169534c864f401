//! Error types for the store.

use thiserror::Error;

use crate::entry::CacheKey;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The addressed entry is not (or no longer) in the store.
    #[error("cache entry not found: {0}")]
    EntryMissing(CacheKey),
}
