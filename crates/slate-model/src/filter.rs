//! Query filter trees and the pure checks the cache engine runs on them.
//!
//! A filter is a tree of condition leaves joined by `and`/`or`, with
//! arbitrary nesting. The engine needs three things from a filter: the set
//! of field keys it references, whether a batch of operations could change
//! membership under it, and whether a concrete entity satisfies it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::Entity;
use crate::error::ModelError;
use crate::ops::Operation;

/// How a filter node joins its conditions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    #[default]
    And,
    Or,
}

/// Comparison operator on a condition leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Contains,
    Excludes,
    IsNull,
    NotNull,
}

/// A condition leaf: one keyed comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCondition {
    /// Flat or dotted field key (`status`, `attrib.fps`).
    pub key: String,
    pub operator: ConditionOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// A node in the condition list: either a leaf or a nested filter.
///
/// Untagged on purpose: a node exposing a `conditions` array is a nested
/// filter, anything else must be a leaf carrying a `key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterItem {
    Nested(QueryFilter),
    Condition(QueryCondition),
}

/// A filter tree as serialized by the views.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    #[serde(default)]
    pub conditions: Vec<FilterItem>,
    #[serde(default)]
    pub operator: FilterOperator,
}

impl QueryFilter {
    /// Parse a filter from its JSON text form.
    pub fn parse(text: &str) -> Result<QueryFilter, ModelError> {
        serde_json::from_str(text).map_err(ModelError::FilterParse)
    }
}

/// Collect every leaf key reachable through `conditions` arrays.
///
/// Depth-first, bounded by structural recursion; operator nodes never
/// contribute keys themselves.
pub fn filter_keys(filter: &QueryFilter) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    collect_keys(filter, &mut keys);
    keys
}

fn collect_keys(filter: &QueryFilter, keys: &mut BTreeSet<String>) {
    for item in &filter.conditions {
        match item {
            FilterItem::Nested(nested) => collect_keys(nested, keys),
            FilterItem::Condition(cond) => {
                keys.insert(cond.key.clone());
            }
        }
    }
}

/// Whether any operation's payload touches one of the filter's keys.
///
/// An empty key set can never be affected. A payload key named `attrib`
/// is expanded one level, and each nested key is tested both as
/// `attrib.<k>` and as bare `<k>`, since views reference attributes
/// either way.
pub fn ops_touch_keys(operations: &[Operation], keys: &BTreeSet<String>) -> bool {
    if keys.is_empty() {
        return false;
    }
    for op in operations {
        let Some(data) = &op.data else { continue };
        for (field, value) in data {
            if field == "attrib" {
                let Some(attrib) = value.as_object() else {
                    continue;
                };
                for attr_key in attrib.keys() {
                    if keys.contains(attr_key) || keys.contains(&format!("attrib.{attr_key}")) {
                        return true;
                    }
                }
            } else if keys.contains(field) {
                return true;
            }
        }
    }
    false
}

/// Evaluate a filter tree against a live entity.
///
/// Used after a refetch to decide whether a row is retained in a
/// filtered view.
pub fn entity_matches(entity: &Entity, filter: &QueryFilter) -> bool {
    if filter.conditions.is_empty() {
        return true;
    }
    let mut results = filter.conditions.iter().map(|item| match item {
        FilterItem::Nested(nested) => entity_matches(entity, nested),
        FilterItem::Condition(cond) => condition_matches(entity, cond),
    });
    match filter.operator {
        FilterOperator::And => results.all(|r| r),
        FilterOperator::Or => results.any(|r| r),
    }
}

fn condition_matches(entity: &Entity, cond: &QueryCondition) -> bool {
    let field = if cond.key == "id" {
        Some(Value::String(entity.id.clone()))
    } else {
        entity.field(&cond.key).cloned()
    };

    match cond.operator {
        ConditionOperator::IsNull => field.is_none() || field == Some(Value::Null),
        ConditionOperator::NotNull => matches!(field, Some(ref v) if !v.is_null()),
        ConditionOperator::Eq => field.as_ref() == cond.value.as_ref(),
        ConditionOperator::Ne => field.as_ref() != cond.value.as_ref(),
        ConditionOperator::Gt => compare(field.as_ref(), cond.value.as_ref())
            .is_some_and(|ord| ord == std::cmp::Ordering::Greater),
        ConditionOperator::Gte => compare(field.as_ref(), cond.value.as_ref())
            .is_some_and(|ord| ord != std::cmp::Ordering::Less),
        ConditionOperator::Lt => compare(field.as_ref(), cond.value.as_ref())
            .is_some_and(|ord| ord == std::cmp::Ordering::Less),
        ConditionOperator::Lte => compare(field.as_ref(), cond.value.as_ref())
            .is_some_and(|ord| ord != std::cmp::Ordering::Greater),
        ConditionOperator::In => match &cond.value {
            Some(Value::Array(options)) => match field {
                Some(ref v) => options.contains(v),
                None => false,
            },
            _ => false,
        },
        ConditionOperator::NotIn => match &cond.value {
            Some(Value::Array(options)) => match field {
                Some(ref v) => !options.contains(v),
                None => true,
            },
            _ => true,
        },
        ConditionOperator::Contains => match (&field, &cond.value) {
            (Some(Value::Array(items)), Some(needle)) => items.contains(needle),
            (Some(Value::String(haystack)), Some(Value::String(needle))) => {
                haystack.contains(needle.as_str())
            }
            _ => false,
        },
        ConditionOperator::Excludes => match (&field, &cond.value) {
            (Some(Value::Array(items)), Some(needle)) => !items.contains(needle),
            (Some(Value::String(haystack)), Some(Value::String(needle))) => {
                !haystack.contains(needle.as_str())
            }
            (None, _) => true,
            _ => false,
        },
    }
}

/// Order two JSON values when they are comparable (numbers or strings).
fn compare(left: Option<&Value>, right: Option<&Value>) -> Option<std::cmp::Ordering> {
    match (left?, right?) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
