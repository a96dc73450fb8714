//! Typed edits of the project collection and featured gallery documents.

use std::fmt;

use folio_types::{
    FEATURED_GALLERY_KEY, FeaturedGallery, PROJECTS_FIELD, PROJECTS_KEY, Project, ProjectStatus,
    ProjectsDocument,
};
use serde_json::{Map, Value};
use slug::slugify;
use time::OffsetDateTime;

use super::collection::{Collection, ItemChange};
use super::document::ContentKey;
use super::error::DomainError;

const MAX_ID_ATTEMPTS: i128 = 1_000;

pub fn projects_key() -> ContentKey {
    ContentKey::well_known(PROJECTS_KEY)
}

pub fn featured_gallery_key() -> ContentKey {
    ContentKey::well_known(FEATURED_GALLERY_KEY)
}

pub fn projects_collection() -> Collection {
    Collection::new(projects_key(), PROJECTS_FIELD)
}

pub fn decode(current: Option<&Value>) -> Result<ProjectsDocument, DomainError> {
    match current {
        None => Ok(ProjectsDocument::default()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|err| {
            DomainError::invariant(format!("projects document does not decode: {err}"))
        }),
    }
}

pub fn encode(document: &ProjectsDocument) -> Result<Value, DomainError> {
    serde_json::to_value(document)
        .map_err(|err| DomainError::invariant(format!("projects document does not encode: {err}")))
}

/// Input for a new project. Presentation fields pass through untouched.
#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub title: String,
    pub year: i32,
    pub status: Option<ProjectStatus>,
    pub fields: Map<String, Value>,
}

/// Append a project, deriving its id, slug and position.
pub fn insert_project(
    document: &mut ProjectsDocument,
    new: &NewProject,
    now: OffsetDateTime,
) -> Result<Project, DomainError> {
    let title = new.title.trim();
    if title.is_empty() {
        return Err(DomainError::validation("project title must not be empty"));
    }
    let slug = slugify(title);
    if slug.is_empty() {
        return Err(DomainError::validation(format!(
            "project title `{title}` does not produce a slug"
        )));
    }

    let id = unique_id(document, now)?;
    let mut fields = new.fields.clone();
    for reserved in ["id", "title", "slug", "year", "order", "status", "createdAt", "updatedAt"] {
        fields.remove(reserved);
    }
    fields.entry("likes").or_insert(Value::from(0));
    fields.entry("shares").or_insert(Value::from(0));
    fields.entry("allowComments").or_insert(Value::Bool(true));

    let project = Project {
        id,
        title: title.to_string(),
        slug,
        year: new.year,
        order: i64::try_from(document.projects.len()).unwrap_or(i64::MAX - 1) + 1,
        status: new.status.unwrap_or_default(),
        created_at: Some(now),
        updated_at: Some(now),
        extra: fields,
    };

    document.projects.push(project.clone());
    document.last_updated = Some(now);
    Ok(project)
}

/// Merge `changes` into the project `id`. The id itself cannot change.
pub fn update_project(
    document: &mut ProjectsDocument,
    id: &str,
    changes: &Map<String, Value>,
    now: OffsetDateTime,
) -> Result<Project, DomainError> {
    let project = document
        .find_mut(id)
        .ok_or_else(|| DomainError::entity_not_found(PROJECTS_KEY, id))?;

    let mut merged = match serde_json::to_value(&*project) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            return Err(DomainError::invariant(format!(
                "project `{id}` does not encode as an object"
            )));
        }
    };
    for (field, value) in changes {
        if field == "id" {
            continue;
        }
        merged.insert(field.clone(), value.clone());
    }

    let mut updated: Project = serde_json::from_value(Value::Object(merged))
        .map_err(|err| DomainError::validation(format!("invalid change for `{id}`: {err}")))?;
    updated.updated_at = Some(now);

    *project = updated.clone();
    document.last_updated = Some(now);
    Ok(updated)
}

pub fn remove_project(
    document: &mut ProjectsDocument,
    id: &str,
    now: OffsetDateTime,
) -> Result<Project, DomainError> {
    let position = document
        .projects
        .iter()
        .position(|project| project.id == id)
        .ok_or_else(|| DomainError::entity_not_found(PROJECTS_KEY, id))?;
    let removed = document.projects.remove(position);
    document.last_updated = Some(now);
    Ok(removed)
}

/// Projects filtered by status, ordered by `order` then newest `year` first.
pub fn listing(document: &ProjectsDocument, status: Option<ProjectStatus>) -> Vec<Project> {
    let mut projects: Vec<Project> = document
        .projects
        .iter()
        .filter(|project| status.is_none_or(|wanted| project.status == wanted))
        .cloned()
        .collect();
    projects.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| b.year.cmp(&a.year)));
    projects
}

/// Replace the featured gallery selection.
pub fn featured_gallery(
    current: Option<&Value>,
    ids: &[String],
    now: OffsetDateTime,
) -> Result<Value, DomainError> {
    let mut gallery: FeaturedGallery = match current {
        None => FeaturedGallery::default(),
        Some(value) => serde_json::from_value(value.clone()).map_err(|err| {
            DomainError::invariant(format!("featured gallery does not decode: {err}"))
        })?,
    };

    let mut selection: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        let id = id.trim();
        if !id.is_empty() && !selection.iter().any(|existing| existing == id) {
            selection.push(id.to_string());
        }
    }

    gallery.featured_project_ids = selection;
    gallery.last_updated = Some(now);
    serde_json::to_value(&gallery)
        .map_err(|err| DomainError::invariant(format!("featured gallery does not encode: {err}")))
}

/// Batch actions available on the project list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAction {
    Publish,
    Draft,
    Delete,
}

impl BulkAction {
    pub fn parse(action: &str) -> Option<Self> {
        match action.trim() {
            "publish" => Some(Self::Publish),
            "draft" => Some(Self::Draft),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BulkAction::Publish => "publish",
            BulkAction::Draft => "draft",
            BulkAction::Delete => "delete",
        }
    }

    /// Per-entity transform for this action.
    pub fn apply(self, entity: &mut Map<String, Value>) -> ItemChange {
        let target = match self {
            BulkAction::Delete => return ItemChange::Removed,
            BulkAction::Publish => ProjectStatus::Published,
            BulkAction::Draft => ProjectStatus::Draft,
        };
        if entity.get("status").and_then(Value::as_str) == Some(target.as_str()) {
            return ItemChange::Unchanged;
        }
        entity.insert(
            "status".to_string(),
            Value::String(target.as_str().to_string()),
        );
        ItemChange::Modified
    }
}

impl fmt::Display for BulkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn unique_id(document: &ProjectsDocument, now: OffsetDateTime) -> Result<String, DomainError> {
    let millis = now.unix_timestamp_nanos() / 1_000_000;
    for offset in 0..MAX_ID_ATTEMPTS {
        let candidate = format!("project-{}", millis + offset);
        if document.find(&candidate).is_none() {
            return Ok(candidate);
        }
    }
    Err(DomainError::invariant("could not allocate a unique project id"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    fn sample() -> ProjectsDocument {
        decode(Some(&json!({
            "projects": [
                { "id": "p1", "title": "Poster", "slug": "poster", "year": 2022, "order": 2, "status": "draft" },
                { "id": "p2", "title": "Brand", "slug": "brand", "year": 2024, "order": 1, "status": "published" },
                { "id": "p3", "title": "Zine", "slug": "zine", "year": 2023, "order": 1, "status": "published" }
            ],
            "lastUpdated": "2024-01-01T00:00:00Z"
        })))
        .expect("decode sample")
    }

    #[test]
    fn named_document_keys_are_valid() {
        for key in [projects_key(), featured_gallery_key()] {
            assert_eq!(ContentKey::new(key.as_str()).ok(), Some(key));
        }
    }

    #[test]
    fn insert_derives_id_slug_and_order() {
        let mut document = sample();
        let now = datetime!(2024-06-01 12:00 UTC);
        let project = insert_project(
            &mut document,
            &NewProject {
                title: "Night Market Identity".to_string(),
                year: 2024,
                status: None,
                fields: Map::from_iter([("client".to_string(), json!("City"))]),
            },
            now,
        )
        .expect("insert");

        assert_eq!(project.id, "project-1717243200000");
        assert_eq!(project.slug, "night-market-identity");
        assert_eq!(project.order, 4);
        assert_eq!(project.status, ProjectStatus::Published);
        assert_eq!(project.text_field("client"), Some("City"));
        assert_eq!(project.extra.get("allowComments"), Some(&json!(true)));
        assert_eq!(document.projects.len(), 4);
        assert_eq!(document.last_updated, Some(now));
    }

    #[test]
    fn insert_rejects_blank_titles() {
        let mut document = sample();
        let err = insert_project(
            &mut document,
            &NewProject::default(),
            datetime!(2024-06-01 12:00 UTC),
        )
        .expect_err("blank title");
        assert!(matches!(err, DomainError::Validation { .. }));
    }

    #[test]
    fn update_merges_fields_and_keeps_id() {
        let mut document = sample();
        let changes = Map::from_iter([
            ("id".to_string(), json!("hijack")),
            ("status".to_string(), json!("published")),
            ("description".to_string(), json!("Screen printed")),
        ]);

        let updated = update_project(&mut document, "p1", &changes, datetime!(2024-06-01 12:00 UTC))
            .expect("update");

        assert_eq!(updated.id, "p1");
        assert_eq!(updated.status, ProjectStatus::Published);
        assert_eq!(updated.text_field("description"), Some("Screen printed"));
        assert_eq!(document.find("p1"), Some(&updated));
    }

    #[test]
    fn update_unknown_project_is_not_found() {
        let mut document = sample();
        let err = update_project(&mut document, "nope", &Map::new(), datetime!(2024-06-01 12:00 UTC))
            .expect_err("missing");
        assert!(matches!(err, DomainError::EntityNotFound { .. }));
    }

    #[test]
    fn listing_filters_and_orders() {
        let document = sample();
        let published: Vec<String> = listing(&document, Some(ProjectStatus::Published))
            .into_iter()
            .map(|project| project.id)
            .collect();
        assert_eq!(published, vec!["p2".to_string(), "p3".to_string()]);

        let all = listing(&document, None);
        assert_eq!(all.last().map(|p| p.id.as_str()), Some("p1"));
    }

    #[test]
    fn bulk_actions_report_changes() {
        let mut entity = json!({ "id": "p1", "status": "draft" })
            .as_object()
            .cloned()
            .expect("object");
        assert_eq!(BulkAction::Draft.apply(&mut entity), ItemChange::Unchanged);
        assert_eq!(BulkAction::Publish.apply(&mut entity), ItemChange::Modified);
        assert_eq!(entity["status"], "published");
        assert_eq!(BulkAction::Delete.apply(&mut entity), ItemChange::Removed);
        assert_eq!(BulkAction::parse("archive"), None);
    }

    #[test]
    fn featured_gallery_dedupes_selection() {
        let value = featured_gallery(
            Some(&json!({ "featuredProjectIds": ["old"], "theme": "dark" })),
            &["p1".to_string(), "p1".to_string(), " ".to_string(), "p2".to_string()],
            datetime!(2024-06-01 12:00 UTC),
        )
        .expect("gallery");

        assert_eq!(value["featuredProjectIds"], json!(["p1", "p2"]));
        assert_eq!(value["theme"], "dark");
        assert_eq!(value["lastUpdated"], "2024-06-01T12:00:00Z");
    }
}
