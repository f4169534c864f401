//! Cache entries and their keys.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use slate_model::{Entity, QueryFilter};

use crate::shape::CacheData;
use crate::tag::Tag;

/// Key of one live query result: endpoint name plus serialized arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub endpoint: String,
    pub args: String,
}

impl CacheKey {
    pub fn new(endpoint: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            args: args.into(),
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.endpoint, self.args)
    }
}

/// The view parameters the engine needs back out of an entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewArgs {
    /// Project the view is scoped to.
    pub project: String,
    /// Filter expression as the view serialized it, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Parent-folder scoping for the by-folder view; `None` means
    /// unscoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_ids: Option<Vec<String>>,
}

impl ViewArgs {
    pub fn for_project(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            filter: None,
            parent_ids: None,
        }
    }

    /// Parse the view's filter, if it has one.
    ///
    /// A malformed filter is logged and treated as absent: it can then
    /// never be "affected" and never excludes a row.
    pub fn parsed_filter(&self) -> Option<QueryFilter> {
        let text = self.filter.as_deref()?;
        match QueryFilter::parse(text) {
            Ok(filter) => Some(filter),
            Err(error) => {
                warn!(%error, filter = text, "ignoring malformed view filter");
                None
            }
        }
    }

    /// Whether a row belongs to this view's parent scope.
    pub fn accepts_parent(&self, entity: &Entity) -> bool {
        match &self.parent_ids {
            None => true,
            Some(parents) => entity
                .parent_id()
                .is_some_and(|p| parents.iter().any(|id| id == p)),
        }
    }
}

/// Fetch state of an entry. Only `Fulfilled` entries participate in
/// invalidation fan-out or merges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Pending,
    Fulfilled,
    Rejected,
}

/// One live, subscribed query result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub args: ViewArgs,
    pub status: QueryStatus,
    pub data: CacheData,
    /// Tags this entry was last told it depends on.
    pub tags: HashSet<Tag>,
    /// Live view subscriptions; the entry is dropped when this hits zero.
    pub subscribers: usize,
}

impl CacheEntry {
    pub fn new(key: CacheKey, args: ViewArgs, data: CacheData) -> Self {
        Self {
            key,
            args,
            status: QueryStatus::Pending,
            data,
            tags: HashSet::new(),
            subscribers: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use slate_model::EntityKind;

    #[test]
    fn malformed_filter_parses_as_absent() {
        let args = ViewArgs {
            project: "demo".to_string(),
            filter: Some("{broken".to_string()),
            parent_ids: None,
        };
        assert!(args.parsed_filter().is_none());
    }

    #[test]
    fn parent_scope_check() {
        let mut entity = Entity::new("t1", EntityKind::Task);
        entity.fields.insert("folderId".to_string(), json!("f1"));

        let unscoped = ViewArgs::for_project("demo");
        assert!(unscoped.accepts_parent(&entity));

        let scoped = ViewArgs {
            project: "demo".to_string(),
            filter: None,
            parent_ids: Some(vec!["f1".to_string()]),
        };
        assert!(scoped.accepts_parent(&entity));

        let elsewhere = ViewArgs {
            parent_ids: Some(vec!["f2".to_string()]),
            ..scoped
        };
        assert!(!elsewhere.accepts_parent(&entity));
    }
}
