//! Domain types for the slate cache consistency engine.
//!
//! Entities are immutable snapshots of production records (folders, tasks,
//! products, versions); operations describe requested changes to them;
//! filters are the condition trees views use to scope their queries.
//! Everything here is pure data plus pure functions - no I/O, no store.

mod entity;
mod error;
mod filter;
mod ops;

pub use entity::{AttribMap, Entity, EntityKind, GroupCursor};
pub use error::ModelError;
pub use filter::{
    ConditionOperator, FilterItem, FilterOperator, QueryCondition, QueryFilter, entity_matches,
    filter_keys, ops_touch_keys,
};
pub use ops::{Operation, OperationKind, OperationResult, OperationsResponse};
