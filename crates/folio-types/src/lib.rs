//! Document schemas stored by the Folio content store.
//!
//! Every struct keeps the fields it does not model in a flattened `extra`
//! map, so a decode followed by an encode never drops data owned by other
//! editors of the same document.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// Document key of the project collection.
pub const PROJECTS_KEY: &str = "projects";
/// Document key of the featured gallery selection.
pub const FEATURED_GALLERY_KEY: &str = "gallery-featured";
/// Name of the entity array inside the project collection.
pub const PROJECTS_FIELD: &str = "projects";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    #[default]
    Published,
    Draft,
}

impl ProjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Published => "published",
            ProjectStatus::Draft => "draft",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown project status `{}`", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for ProjectStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "published" | "publish" => Ok(Self::Published),
            "draft" => Ok(Self::Draft),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A single portfolio project entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub year: i32,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<OffsetDateTime>,
    /// Presentation fields (cover, gallery, narrative, ...) owned by the UI.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Project {
    /// Look up a string presentation field such as `description` or `client`.
    pub fn text_field(&self, name: &str) -> Option<&str> {
        self.extra.get(name).and_then(Value::as_str)
    }
}

/// The `projects` collection document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProjectsDocument {
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_updated: Option<OffsetDateTime>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProjectsDocument {
    pub fn find(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|project| project.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Project> {
        self.projects.iter_mut().find(|project| project.id == id)
    }
}

/// The featured gallery selection document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FeaturedGallery {
    #[serde(default)]
    pub featured_project_ids: Vec<String>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_updated: Option<OffsetDateTime>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn project_preserves_unknown_fields() {
        let raw = json!({
            "id": "p1",
            "title": "Poster",
            "slug": "poster",
            "year": 2023,
            "order": 2,
            "status": "draft",
            "cover": "https://cdn.example/poster.jpg",
            "narrative": { "challenge": "tight deadline" }
        });

        let project: Project = serde_json::from_value(raw.clone()).expect("decode project");
        assert_eq!(project.status, ProjectStatus::Draft);
        assert_eq!(project.text_field("cover"), Some("https://cdn.example/poster.jpg"));

        let encoded = serde_json::to_value(&project).expect("encode project");
        assert_eq!(encoded, raw);
    }

    #[test]
    fn missing_status_defaults_to_published() {
        let project: Project =
            serde_json::from_value(json!({ "id": "p2" })).expect("decode sparse project");
        assert_eq!(project.status, ProjectStatus::Published);
        assert!(project.created_at.is_none());
    }

    #[test]
    fn projects_document_reads_iso_timestamps() {
        let doc: ProjectsDocument = serde_json::from_value(json!({
            "projects": [{ "id": "p1", "updatedAt": "2024-05-01T10:00:00.000Z" }],
            "lastUpdated": "2024-05-01T10:00:00.000Z"
        }))
        .expect("decode document");

        assert!(doc.last_updated.is_some());
        assert!(doc.find("p1").and_then(|p| p.updated_at).is_some());
        assert!(doc.find("missing").is_none());
    }

    #[test]
    fn status_parses_cli_spellings() {
        assert_eq!("publish".parse::<ProjectStatus>(), Ok(ProjectStatus::Published));
        assert_eq!("draft".parse::<ProjectStatus>(), Ok(ProjectStatus::Draft));
        assert!("archived".parse::<ProjectStatus>().is_err());
    }
}
