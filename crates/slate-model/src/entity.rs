//! Entity snapshots and the update-merge rules applied to them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Attribute bag shared by entities and operation payloads.
pub type AttribMap = Map<String, Value>;

/// The kinds of production entity the engine tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Folder,
    Task,
    Product,
    Version,
    Representation,
    Workfile,
}

impl EntityKind {
    /// Stable lowercase name, used in tags and realtime topics.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Folder => "folder",
            EntityKind::Task => "task",
            EntityKind::Product => "product",
            EntityKind::Version => "version",
            EntityKind::Representation => "representation",
            EntityKind::Workfile => "workfile",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Group-bucket membership carried by rows in grouped cache shapes.
///
/// Encodes which bucket the row belongs to and that bucket's pagination
/// state. Operation payloads never carry this, so merges must preserve it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupCursor {
    /// The grouping value this row belongs to (e.g. a status name).
    pub value: Value,
    /// Pagination cursor within the bucket, if the bucket is paged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Whether the bucket has more rows past the cursor.
    #[serde(default)]
    pub has_next_page: bool,
}

/// An immutable snapshot of one production entity.
///
/// Every change produces a new `Entity` via [`Entity::apply_update`];
/// stale references held by other cache entries stay valid-but-outdated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Opaque id, unique within a project.
    pub id: String,
    /// Entity kind.
    pub kind: EntityKind,
    /// Top-level server fields (`status`, `name`, `folderId`, `links`, ...).
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// Flat attribute bag, inherited values included.
    #[serde(default)]
    pub attrib: AttribMap,
    /// Attribute keys explicitly set on this entity rather than inherited.
    #[serde(default)]
    pub own_attrib: BTreeSet<String>,
    /// Group membership, populated only inside grouped cache shapes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupCursor>,
}

impl Entity {
    /// Create a bare entity with no fields set.
    pub fn new(id: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            id: id.into(),
            kind,
            fields: Map::new(),
            attrib: AttribMap::new(),
            own_attrib: BTreeSet::new(),
            groups: Vec::new(),
        }
    }

    /// Look up a field by flat or dotted key.
    ///
    /// `attrib.<k>` reads the attribute bag; a bare key reads top-level
    /// fields first and falls back to the attribute bag, since views
    /// reference attributes either way.
    pub fn field(&self, key: &str) -> Option<&Value> {
        if let Some(attr_key) = key.strip_prefix("attrib.") {
            return self.attrib.get(attr_key);
        }
        if key == "id" {
            return None;
        }
        self.fields.get(key).or_else(|| self.attrib.get(key))
    }

    /// The parent folder id, when the entity carries one.
    pub fn parent_id(&self) -> Option<&str> {
        self.fields
            .get("folderId")
            .or_else(|| self.fields.get("parentId"))
            .and_then(Value::as_str)
    }

    /// Produce a new snapshot with an operation's `data` merged in.
    ///
    /// Top-level keys are copied 1:1 except three special cases:
    /// - `attrib` merges key-by-key; a `null` value clears the key and its
    ///   own-attribute mark, a non-null value sets the key and marks it owned;
    /// - `links` appends to the existing links array;
    /// - `deleteLinks` removes the listed link ids from the links array.
    ///
    /// The `groups` annotation is carried over untouched.
    pub fn apply_update(&self, data: &Map<String, Value>) -> Entity {
        let mut next = self.clone();
        for (key, value) in data {
            match key.as_str() {
                "attrib" => {
                    if let Some(patch) = value.as_object() {
                        for (attr_key, attr_value) in patch {
                            if attr_value.is_null() {
                                next.attrib.remove(attr_key);
                                next.own_attrib.remove(attr_key);
                            } else {
                                next.attrib.insert(attr_key.clone(), attr_value.clone());
                                next.own_attrib.insert(attr_key.clone());
                            }
                        }
                    }
                }
                "links" => {
                    if let Some(additions) = value.as_array() {
                        let links = next
                            .fields
                            .entry("links".to_string())
                            .or_insert_with(|| Value::Array(Vec::new()));
                        if let Some(existing) = links.as_array_mut() {
                            existing.extend(additions.iter().cloned());
                        }
                    }
                }
                "deleteLinks" => {
                    if let Some(removals) = value.as_array() {
                        if let Some(links) =
                            next.fields.get_mut("links").and_then(Value::as_array_mut)
                        {
                            links.retain(|link| !link_matches_any(link, removals));
                        }
                    }
                }
                "id" | "entityType" => {}
                _ => {
                    next.fields.insert(key.clone(), value.clone());
                }
            }
        }
        next
    }
}

/// Whether a link entry matches one of the removal markers.
///
/// A removal marker is either the link's id string or an equal object.
fn link_matches_any(link: &Value, removals: &[Value]) -> bool {
    removals.iter().any(|removal| {
        if removal == link {
            return true;
        }
        match (removal.as_str(), link.get("id").and_then(Value::as_str)) {
            (Some(removal_id), Some(link_id)) => removal_id == link_id,
            _ => false,
        }
    })
}
