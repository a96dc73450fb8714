//! Entity edits inside collection documents.
//!
//! A collection document is a JSON object holding an array of entities, each
//! identified by a string field. All entities share the document's version
//! token, so every edit here rewrites the whole payload.

use std::collections::HashSet;

use serde_json::{Map, Value};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use super::document::ContentKey;
use super::error::DomainError;

const LAST_UPDATED_FIELD: &str = "lastUpdated";
const UPDATED_AT_FIELD: &str = "updatedAt";

/// Where the entities live inside a collection payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub key: ContentKey,
    pub items_field: String,
    pub id_field: String,
}

impl Collection {
    pub fn new(key: ContentKey, items_field: impl Into<String>) -> Self {
        Self {
            key,
            items_field: items_field.into(),
            id_field: "id".to_string(),
        }
    }
}

/// Result of applying a transform to one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemChange {
    Unchanged,
    Modified,
    Removed,
}

/// Outcome of a collection edit: the new payload plus what happened to
/// each requested id.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionEdit {
    pub payload: Value,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
    pub missing: Vec<String>,
}

impl CollectionEdit {
    pub fn has_changes(&self) -> bool {
        !self.modified.is_empty() || !self.removed.is_empty()
    }
}

/// Apply `transform` to every entity whose id is in `ids`.
///
/// Modified entities get `updatedAt` stamped, and the collection gets
/// `lastUpdated` stamped when anything changed. An absent document is
/// treated as an empty collection.
pub fn edit_items<T>(
    collection: &Collection,
    current: Option<&Value>,
    ids: &[String],
    transform: &T,
    now: OffsetDateTime,
) -> Result<CollectionEdit, DomainError>
where
    T: Fn(&mut Map<String, Value>) -> ItemChange + ?Sized,
{
    let mut root = match current {
        None => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(other) => {
            return Err(DomainError::invariant(format!(
                "collection `{}` must be a JSON object, found {}",
                collection.key,
                kind_of(other)
            )));
        }
    };

    let items = match root.remove(&collection.items_field) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(DomainError::invariant(format!(
                "`{}.{}` must be an array, found {}",
                collection.key,
                collection.items_field,
                kind_of(&other)
            )));
        }
    };

    let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let stamp = format_timestamp(now)?;
    let mut seen: HashSet<String> = HashSet::new();
    let mut modified = Vec::new();
    let mut removed = Vec::new();
    let mut kept = Vec::with_capacity(items.len());

    for item in items {
        let Value::Object(mut entity) = item else {
            kept.push(item);
            continue;
        };
        let Some(id) = entity
            .get(&collection.id_field)
            .and_then(Value::as_str)
            .map(str::to_owned)
        else {
            kept.push(Value::Object(entity));
            continue;
        };
        if !wanted.contains(id.as_str()) {
            kept.push(Value::Object(entity));
            continue;
        }

        seen.insert(id.clone());
        match transform(&mut entity) {
            ItemChange::Unchanged => kept.push(Value::Object(entity)),
            ItemChange::Modified => {
                entity.insert(UPDATED_AT_FIELD.to_string(), Value::String(stamp.clone()));
                kept.push(Value::Object(entity));
                modified.push(id);
            }
            ItemChange::Removed => removed.push(id),
        }
    }

    let missing = ids
        .iter()
        .filter(|id| !seen.contains(id.as_str()))
        .cloned()
        .collect();

    root.insert(collection.items_field.clone(), Value::Array(kept));
    if !modified.is_empty() || !removed.is_empty() {
        root.insert(LAST_UPDATED_FIELD.to_string(), Value::String(stamp));
    }

    Ok(CollectionEdit {
        payload: Value::Object(root),
        modified,
        removed,
        missing,
    })
}

/// Transform that sets a string field, reporting `Unchanged` when it already
/// holds the value.
pub fn set_field(
    field: &'static str,
    value: &'static str,
) -> impl Fn(&mut Map<String, Value>) -> ItemChange + Send + Sync {
    move |entity| {
        if entity.get(field).and_then(Value::as_str) == Some(value) {
            ItemChange::Unchanged
        } else {
            entity.insert(field.to_string(), Value::String(value.to_string()));
            ItemChange::Modified
        }
    }
}

pub(crate) fn format_timestamp(now: OffsetDateTime) -> Result<String, DomainError> {
    now.format(&Rfc3339)
        .map_err(|err| DomainError::invariant(format!("failed to format timestamp: {err}")))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    fn projects() -> Collection {
        Collection::new(ContentKey::new("projects").expect("key"), "projects")
    }

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn modifies_only_requested_items() {
        let current = json!({
            "projects": [
                { "id": "p1", "status": "draft" },
                { "id": "p2", "status": "draft" },
                { "id": "p3", "status": "published" }
            ],
            "lastUpdated": "2024-01-01T00:00:00Z"
        });

        let edit = edit_items(
            &projects(),
            Some(&current),
            &ids(&["p1", "p3", "p9"]),
            &set_field("status", "published"),
            datetime!(2024-06-01 12:00 UTC),
        )
        .expect("edit");

        assert_eq!(edit.modified, ids(&["p1"]));
        assert_eq!(edit.missing, ids(&["p9"]));
        assert!(edit.removed.is_empty());

        let items = edit.payload["projects"].as_array().expect("array");
        assert_eq!(items[0]["status"], "published");
        assert_eq!(items[0]["updatedAt"], "2024-06-01T12:00:00Z");
        assert_eq!(items[1]["status"], "draft");
        assert!(items[1].get("updatedAt").is_none());
        assert!(items[2].get("updatedAt").is_none());
        assert_eq!(edit.payload["lastUpdated"], "2024-06-01T12:00:00Z");
    }

    #[test]
    fn removal_drops_entities() {
        let current = json!({ "projects": [{ "id": "p1" }, { "id": "p2" }] });

        let edit = edit_items(
            &projects(),
            Some(&current),
            &ids(&["p2"]),
            &|_: &mut Map<String, Value>| ItemChange::Removed,
            datetime!(2024-06-01 12:00 UTC),
        )
        .expect("edit");

        assert_eq!(edit.removed, ids(&["p2"]));
        assert_eq!(edit.payload["projects"], json!([{ "id": "p1" }]));
    }

    #[test]
    fn no_changes_leaves_last_updated_alone() {
        let current = json!({
            "projects": [{ "id": "p1", "status": "published" }],
            "lastUpdated": "2024-01-01T00:00:00Z"
        });

        let edit = edit_items(
            &projects(),
            Some(&current),
            &ids(&["p1"]),
            &set_field("status", "published"),
            datetime!(2024-06-01 12:00 UTC),
        )
        .expect("edit");

        assert!(!edit.has_changes());
        assert_eq!(edit.payload, current);
    }

    #[test]
    fn absent_document_is_an_empty_collection() {
        let edit = edit_items(
            &projects(),
            None,
            &ids(&["p1"]),
            &set_field("status", "draft"),
            datetime!(2024-06-01 12:00 UTC),
        )
        .expect("edit");

        assert_eq!(edit.missing, ids(&["p1"]));
        assert_eq!(edit.payload, json!({ "projects": [] }));
    }

    #[test]
    fn rejects_non_object_documents() {
        let err = edit_items(
            &projects(),
            Some(&json!([1, 2, 3])),
            &ids(&["p1"]),
            &set_field("status", "draft"),
            datetime!(2024-06-01 12:00 UTC),
        )
        .expect_err("array payload");
        assert!(matches!(err, DomainError::Invariant { .. }));
    }
}
