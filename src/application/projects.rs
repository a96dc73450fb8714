//! Project collection operations used by the admin surface.

use std::sync::{Arc, Mutex};

use folio_types::{Project, ProjectStatus};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::info;

use crate::cache::DocumentCache;
use crate::cache::lock::mutex_lock;
use crate::domain::error::DomainError;
use crate::domain::projects::{
    self, BulkAction, NewProject, featured_gallery_key, projects_collection, projects_key,
};

use super::bulk::{BulkCoordinator, BulkOutcome};
use super::error::AppError;
use super::mutation::{MutationLayer, MutationOutcome};

const SOURCE: &str = "application::projects";

pub struct ProjectService {
    cache: Arc<DocumentCache>,
    mutations: Arc<MutationLayer>,
    bulk: Arc<BulkCoordinator>,
}

impl ProjectService {
    pub fn new(
        cache: Arc<DocumentCache>,
        mutations: Arc<MutationLayer>,
        bulk: Arc<BulkCoordinator>,
    ) -> Self {
        Self {
            cache,
            mutations,
            bulk,
        }
    }

    /// Projects in display order. A missing document lists as empty.
    pub async fn list(&self, status: Option<ProjectStatus>) -> Result<Vec<Project>, AppError> {
        let entry = self.cache.entry(&projects_key()).await?;
        let document = projects::decode(entry.as_ref().map(|entry| &entry.value))?;
        Ok(projects::listing(&document, status))
    }

    pub async fn get(&self, id: &str) -> Result<Project, AppError> {
        let entry = self.cache.entry(&projects_key()).await?;
        let document = projects::decode(entry.as_ref().map(|entry| &entry.value))?;
        document
            .find(id)
            .cloned()
            .ok_or_else(|| DomainError::entity_not_found(folio_types::PROJECTS_KEY, id).into())
    }

    pub async fn create(&self, new: NewProject) -> Result<Project, AppError> {
        let description = format!("Add project: {}", new.title.trim());
        let now = OffsetDateTime::now_utc();
        let created: Arc<Mutex<Option<Project>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&created);

        let patch = move |current: Option<&Value>| -> Result<Value, DomainError> {
            let mut document = projects::decode(current)?;
            let project = projects::insert_project(&mut document, &new, now)?;
            *mutex_lock(&slot, SOURCE, "create.patch") = Some(project);
            projects::encode(&document)
        };

        self.mutations
            .mutate(&projects_key(), patch, description)
            .await?;

        let project = mutex_lock(&created, SOURCE, "create.result").take();
        let project =
            project.ok_or_else(|| AppError::unexpected("created project was not recorded"))?;
        info!(target = SOURCE, id = %project.id, slug = %project.slug, "Project created");
        Ok(project)
    }

    /// Merge `changes` into project `id`.
    pub async fn update(
        &self,
        id: &str,
        changes: Map<String, Value>,
    ) -> Result<Project, AppError> {
        let title = match changes.get("title").and_then(Value::as_str) {
            Some(title) => title.trim().to_string(),
            None => self.current_title(id).await,
        };
        let description = format!("Update project: {title}");
        let now = OffsetDateTime::now_utc();
        let id_owned = id.to_string();

        let outcome = self
            .mutations
            .mutate(
                &projects_key(),
                move |current: Option<&Value>| -> Result<Value, DomainError> {
                    let mut document = projects::decode(current)?;
                    projects::update_project(&mut document, &id_owned, &changes, now)?;
                    projects::encode(&document)
                },
                description,
            )
            .await?;

        Self::project_in(&outcome, id)
    }

    pub async fn set_status(&self, id: &str, status: ProjectStatus) -> Result<Project, AppError> {
        let mut changes = Map::new();
        changes.insert(
            "status".to_string(),
            Value::String(status.as_str().to_string()),
        );
        self.update(id, changes).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        let description = format!("Delete project ID: {id}");
        let now = OffsetDateTime::now_utc();
        let id_owned = id.to_string();

        self.mutations
            .mutate(
                &projects_key(),
                move |current: Option<&Value>| -> Result<Value, DomainError> {
                    let mut document = projects::decode(current)?;
                    projects::remove_project(&mut document, &id_owned, now)?;
                    projects::encode(&document)
                },
                description,
            )
            .await?;
        info!(target = SOURCE, id, "Project deleted");
        Ok(())
    }

    /// Apply `action` to every listed project in a single commit.
    pub async fn bulk(&self, action: BulkAction, ids: &[String]) -> Result<BulkOutcome, AppError> {
        if ids.is_empty() {
            return Err(AppError::validation("bulk action needs at least one project id"));
        }
        let description = format!("Bulk update {} projects", ids.len());
        let outcome = self
            .bulk
            .bulk_apply(
                &projects_collection(),
                ids,
                move |entity: &mut Map<String, Value>| action.apply(entity),
                &description,
            )
            .await?;
        Ok(outcome)
    }

    /// Replace the featured gallery selection.
    pub async fn set_featured(&self, ids: Vec<String>) -> Result<Value, AppError> {
        let now = OffsetDateTime::now_utc();
        let outcome = self
            .mutations
            .mutate(
                &featured_gallery_key(),
                move |current: Option<&Value>| projects::featured_gallery(current, &ids, now),
                "Update featured gallery",
            )
            .await?;
        Ok(outcome.value)
    }

    async fn current_title(&self, id: &str) -> String {
        self.get(id)
            .await
            .map(|project| project.title)
            .unwrap_or_else(|_| id.to_string())
    }

    fn project_in(outcome: &MutationOutcome, id: &str) -> Result<Project, AppError> {
        let document = projects::decode(Some(&outcome.value))?;
        document
            .find(id)
            .cloned()
            .ok_or_else(|| AppError::unexpected(format!("project `{id}` missing after write")))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::retry::RetryPolicy;
    use crate::application::writer::OptimisticWriter;
    use crate::cache::CacheConfig;
    use crate::infra::memory::MemoryContentRepo;

    fn service(repo: Arc<MemoryContentRepo>) -> ProjectService {
        let cache = Arc::new(DocumentCache::new(repo.clone(), CacheConfig::default()));
        let writer = OptimisticWriter::new(repo, RetryPolicy::default());
        let mutations = Arc::new(MutationLayer::new(cache.clone(), writer.clone()));
        let bulk = Arc::new(BulkCoordinator::new(cache.clone(), writer));
        ProjectService::new(cache, mutations, bulk)
    }

    fn seeded() -> Arc<MemoryContentRepo> {
        let repo = Arc::new(MemoryContentRepo::new());
        repo.insert(
            &projects_key(),
            json!({ "projects": [
                { "id": "p1", "title": "Harbor", "slug": "harbor", "year": 2022, "order": 2, "status": "draft" },
                { "id": "p2", "title": "Dune", "slug": "dune", "year": 2023, "order": 1, "status": "published" }
            ] }),
        );
        repo
    }

    #[tokio::test]
    async fn list_orders_and_filters() {
        let service = service(seeded());

        let all = service.list(None).await.expect("list");
        let ids: Vec<_> = all.iter().map(|project| project.id.as_str()).collect();
        assert_eq!(ids, ["p2", "p1"]);

        let drafts = service
            .list(Some(ProjectStatus::Draft))
            .await
            .expect("drafts");
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].id, "p1");
    }

    #[tokio::test]
    async fn missing_document_lists_as_empty() {
        let service = service(Arc::new(MemoryContentRepo::new()));
        assert!(service.list(None).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn create_commits_with_descriptive_message() {
        let repo = seeded();
        let service = service(repo.clone());

        let project = service
            .create(NewProject {
                title: "  Night Market ".to_string(),
                year: 2024,
                ..Default::default()
            })
            .await
            .expect("create");

        assert_eq!(project.slug, "night-market");
        assert_eq!(project.order, 3);
        assert_eq!(repo.descriptions(), vec!["Add project: Night Market".to_string()]);
        let stored = repo.payload(&projects_key()).expect("stored");
        assert_eq!(stored["projects"].as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn status_change_uses_existing_title() {
        let repo = seeded();
        let service = service(repo.clone());

        let project = service
            .set_status("p1", ProjectStatus::Published)
            .await
            .expect("publish");

        assert_eq!(project.status, ProjectStatus::Published);
        assert_eq!(repo.descriptions(), vec!["Update project: Harbor".to_string()]);
    }

    #[tokio::test]
    async fn unknown_project_is_rejected_without_a_write() {
        let repo = seeded();
        let service = service(repo.clone());

        let err = service.delete("p9").await.expect_err("missing");
        assert!(matches!(err, AppError::Operation(_)));
        assert_eq!(repo.write_calls(), 0);
    }

    #[tokio::test]
    async fn bulk_delete_is_one_commit() {
        let repo = seeded();
        let service = service(repo.clone());

        let outcome = service
            .bulk(BulkAction::Delete, &["p1".to_string(), "p2".to_string()])
            .await
            .expect("bulk");

        assert_eq!(outcome.changed(), 2);
        assert_eq!(repo.commit_count(), 1);
        assert_eq!(repo.descriptions(), vec!["Bulk update 2 projects".to_string()]);
        assert!(service.list(None).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn featured_selection_is_deduplicated() {
        let repo = Arc::new(MemoryContentRepo::new());
        let service = service(repo.clone());

        let gallery = service
            .set_featured(vec!["p2".into(), " p1 ".into(), "p2".into(), "".into()])
            .await
            .expect("feature");

        assert_eq!(gallery["featuredProjectIds"], json!(["p2", "p1"]));
        assert_eq!(repo.descriptions(), vec!["Update featured gallery".to_string()]);
    }
}
