//! The live query-cache store.
//!
//! Holds one [`CacheEntry`] per subscribed query result, each in one of
//! three shapes (flat list, paged list, grouped list), plus the tag on
//! which invalidation fan-out is computed. All cache mutation goes through
//! [`QueryStore::update_entry`], which returns a reversible
//! [`AppliedPatch`] so optimistic edits can be rolled back.
//!
//! Thread-safe and designed for concurrent access from multiple tasks;
//! every mutation is a synchronous read-modify-write block under one map
//! entry guard, never holding the guard across an await.

mod entry;
mod error;
mod realtime;
mod shape;
mod store;
mod tag;

pub use entry::{CacheEntry, CacheKey, QueryStatus, ViewArgs};
pub use error::StoreError;
pub use realtime::{EventSummary, RealtimeBus, RealtimeEvent, SubscriptionToken};
pub use shape::{CacheData, Page};
pub use store::{AppliedPatch, QueryStore, StoreEvent, StoreView, ViewRow};
pub use tag::{Tag, TagId, operation_tags};
