//! Cache shapes and the one traversal written against all of them.
//!
//! Three shapes occur across endpoints: a flat entity list, a paginated
//! page set, and a grouped list where each row carries its group-bucket
//! annotation. Merge and patch logic is written once against this union
//! instead of per endpoint.

use serde::{Deserialize, Serialize};

use slate_model::Entity;

/// One page of a paginated query result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub entities: Vec<Entity>,
    /// Cursor for fetching the page after this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(default)]
    pub has_next_page: bool,
}

impl Page {
    /// A page holding the given rows, with no further pages.
    pub fn of(entities: Vec<Entity>) -> Self {
        Self {
            entities,
            cursor: None,
            has_next_page: false,
        }
    }
}

/// The data held by one cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheData {
    /// Flat entity list.
    Flat(Vec<Entity>),
    /// Paginated page set.
    Paged(Vec<Page>),
    /// Grouped list; rows carry their `groups` annotation.
    Grouped(Vec<Entity>),
}

impl CacheData {
    /// Total number of rows across all pages.
    pub fn len(&self) -> usize {
        match self {
            CacheData::Flat(rows) | CacheData::Grouped(rows) => rows.len(),
            CacheData::Paged(pages) => pages.iter().map(|p| p.entities.len()).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find a row by entity id.
    pub fn get(&self, id: &str) -> Option<&Entity> {
        match self {
            CacheData::Flat(rows) | CacheData::Grouped(rows) => {
                rows.iter().find(|e| e.id == id)
            }
            CacheData::Paged(pages) => pages
                .iter()
                .flat_map(|p| p.entities.iter())
                .find(|e| e.id == id),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Visit every row in order.
    pub fn for_each(&self, mut f: impl FnMut(&Entity)) {
        match self {
            CacheData::Flat(rows) | CacheData::Grouped(rows) => {
                rows.iter().for_each(&mut f);
            }
            CacheData::Paged(pages) => {
                for page in pages {
                    page.entities.iter().for_each(&mut f);
                }
            }
        }
    }

    /// All entity ids in order.
    pub fn entity_ids(&self) -> Vec<String> {
        let mut ids = Vec::with_capacity(self.len());
        self.for_each(|e| ids.push(e.id.clone()));
        ids
    }

    /// Replace the row with the same id, in place.
    ///
    /// On the grouped shape the pre-existing `groups` annotation is kept
    /// across the replace: it encodes bucket pagination state that
    /// refetched payloads do not carry. Last merge wins; both the
    /// reconciler and the batch updater fetch from the same authoritative
    /// source, so concurrent replaces converge.
    pub fn replace(&mut self, entity: Entity) -> bool {
        let preserve_groups = matches!(self, CacheData::Grouped(_));
        let slot = match self {
            CacheData::Flat(rows) | CacheData::Grouped(rows) => {
                rows.iter_mut().find(|e| e.id == entity.id)
            }
            CacheData::Paged(pages) => pages
                .iter_mut()
                .flat_map(|p| p.entities.iter_mut())
                .find(|e| e.id == entity.id),
        };
        match slot {
            Some(slot) => {
                let mut next = entity;
                if preserve_groups && next.groups.is_empty() {
                    next.groups = std::mem::take(&mut slot.groups);
                }
                *slot = next;
                true
            }
            None => false,
        }
    }

    /// Remove the row with the given id, returning it.
    pub fn remove(&mut self, id: &str) -> Option<Entity> {
        match self {
            CacheData::Flat(rows) | CacheData::Grouped(rows) => {
                let idx = rows.iter().position(|e| e.id == id)?;
                Some(rows.remove(idx))
            }
            CacheData::Paged(pages) => {
                for page in pages.iter_mut() {
                    if let Some(idx) = page.entities.iter().position(|e| e.id == id) {
                        return Some(page.entities.remove(idx));
                    }
                }
                None
            }
        }
    }

    /// Append a row: end of the flat/grouped list, end of the FIRST page
    /// of a paged set. Used by the optimistic create path.
    pub fn append(&mut self, entity: Entity) {
        match self {
            CacheData::Flat(rows) | CacheData::Grouped(rows) => rows.push(entity),
            CacheData::Paged(pages) => {
                if pages.is_empty() {
                    pages.push(Page::default());
                }
                pages[0].entities.push(entity);
            }
        }
    }

    /// Insert a row at the head of the list / first page.
    ///
    /// Never mid-page: the client cannot compute a sort position for a
    /// freshly matching row, so the head is the only honest spot.
    pub fn insert_head(&mut self, entity: Entity) {
        match self {
            CacheData::Flat(rows) | CacheData::Grouped(rows) => rows.insert(0, entity),
            CacheData::Paged(pages) => {
                if pages.is_empty() {
                    pages.push(Page::default());
                }
                pages[0].entities.insert(0, entity);
            }
        }
    }

    /// An empty value of the same shape.
    pub fn empty_like(&self) -> CacheData {
        match self {
            CacheData::Flat(_) => CacheData::Flat(Vec::new()),
            CacheData::Paged(_) => CacheData::Paged(Vec::new()),
            CacheData::Grouped(_) => CacheData::Grouped(Vec::new()),
        }
    }
}
