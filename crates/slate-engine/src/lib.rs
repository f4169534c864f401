//! The cache consistency engine.
//!
//! Ties the store's primitives together around a single outgoing write:
//! optimistic patches before the network call, rollback on failure,
//! best-effort authoritative reconciliation on success, and debounced
//! batching of unsolicited realtime change notifications.
//!
//! Control flow: [`MutationEngine::submit`] → optimistic patches
//! (synchronous) → network write → on success spawn the reconciler → on
//! failure undo every patch in reverse order. [`BatchUpdater`] runs
//! independently, driven by the realtime bus.

mod config;
mod error;
mod mutation;
mod patch;
mod realtime;
mod reconcile;
mod source;

pub use config::EngineConfig;
pub use error::MutationError;
pub use mutation::{MutationEngine, MutationRequest};
pub use patch::apply_optimistic;
pub use realtime::BatchUpdater;
pub use reconcile::reconcile;
pub use source::{EntitySource, SourceError};
