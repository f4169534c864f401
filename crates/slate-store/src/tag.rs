//! Dependency tags: the keys invalidation fan-out is computed on.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use slate_model::{EntityKind, Operation};

/// The id half of a tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagId {
    /// Class-wide sentinel: "any list of this kind".
    List,
    /// A concrete entity id, or a project-name sentinel.
    Id(String),
}

/// A `(type, id)` pair associating cache entries with the entities their
/// data was computed from. Entries re-associate on every successful fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub kind: EntityKind,
    pub id: TagId,
}

impl Tag {
    /// The list sentinel tag for a kind.
    pub fn list(kind: EntityKind) -> Self {
        Self {
            kind,
            id: TagId::List,
        }
    }

    /// A concrete id (or project-name) tag.
    pub fn id(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: TagId::Id(id.into()),
        }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.id {
            TagId::List => write!(f, "{}/LIST", self.kind),
            TagId::Id(id) => write!(f, "{}/{}", self.kind, id),
        }
    }
}

/// The standard tag set for a batch of operations.
///
/// Per-entity tags for every targeted id, plus the `LIST` and
/// project-name sentinels for each kind present, so views that do not yet
/// hold a freshly created entity are still reached.
pub fn operation_tags(project: &str, operations: &[Operation]) -> HashSet<Tag> {
    let mut tags = HashSet::new();
    for op in operations {
        tags.insert(Tag::list(op.entity_type));
        tags.insert(Tag::id(op.entity_type, project));
        if let Some(entity_id) = &op.entity_id {
            tags.insert(Tag::id(op.entity_type, entity_id.clone()));
        }
    }
    tags
}
