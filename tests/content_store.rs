//! End-to-end behaviour of the content store against the in-memory host:
//! compare-and-swap writes, speculative mutations with rollback, and bulk
//! edits committed as one write.

use std::sync::Arc;
use std::time::Duration;

use folio::{
    application::{
        bulk::{BulkCoordinator, BulkOutcome},
        mutation::MutationLayer,
        repos::{ContentRepo, StoreError},
        retry::RetryPolicy,
        writer::OptimisticWriter,
    },
    cache::{CacheConfig, DocumentCache},
    domain::{
        collection::set_field,
        document::{ContentKey, Replace},
        error::DomainError,
        projects::projects_collection,
    },
    infra::memory::MemoryContentRepo,
};
use serde_json::{Value, json};

struct Harness {
    repo: Arc<MemoryContentRepo>,
    cache: Arc<DocumentCache>,
    mutations: MutationLayer,
    bulk: BulkCoordinator,
}

fn harness() -> Harness {
    let repo = Arc::new(MemoryContentRepo::new());
    let dyn_repo: Arc<dyn ContentRepo> = repo.clone();
    let cache = Arc::new(DocumentCache::new(
        Arc::clone(&dyn_repo),
        CacheConfig::default(),
    ));
    let writer = OptimisticWriter::new(dyn_repo, RetryPolicy::default());
    Harness {
        mutations: MutationLayer::new(Arc::clone(&cache), writer.clone()),
        bulk: BulkCoordinator::new(Arc::clone(&cache), writer),
        repo,
        cache,
    }
}

fn key(raw: &str) -> ContentKey {
    ContentKey::new(raw).expect("key")
}

fn draft_projects() -> Value {
    json!({
        "projects": [
            { "id": "p1", "title": "Harbour", "status": "draft" },
        ]
    })
}

/// Patch that sets the status of one project in the `projects` document.
fn set_status(
    id: &'static str,
    status: &'static str,
) -> impl Fn(Option<&Value>) -> Result<Value, DomainError> + Send + Sync + 'static {
    move |current| {
        let mut value = current
            .cloned()
            .ok_or_else(|| DomainError::validation("projects document is missing"))?;
        let project = value["projects"]
            .as_array_mut()
            .and_then(|items| items.iter_mut().find(|item| item["id"] == id))
            .ok_or_else(|| DomainError::entity_not_found("projects", id))?;
        project["status"] = json!(status);
        Ok(value)
    }
}

/// Patch that sets one top-level field, keeping everything else.
fn set_top(
    field: &'static str,
    value: i64,
) -> impl Fn(Option<&Value>) -> Result<Value, DomainError> + Send + Sync + 'static {
    move |current| {
        let mut doc = current.cloned().unwrap_or_else(|| json!({}));
        doc[field] = json!(value);
        Ok(doc)
    }
}

fn status_of(value: &Value, id: &str) -> Option<String> {
    value["projects"]
        .as_array()?
        .iter()
        .find(|item| item["id"] == id)
        .and_then(|item| item["status"].as_str())
        .map(str::to_string)
}

#[tokio::test]
async fn write_then_read_returns_the_new_token() {
    let h = harness();
    let about = key("about");
    let t0 = h.repo.insert(&about, json!({ "bio": "old" }));

    let t1 = h
        .repo
        .write(&about, &json!({ "bio": "new" }), Some(&t0), "Update about")
        .await
        .expect("write");
    assert_ne!(t0, t1);

    let document = h.repo.read(&about).await.expect("read");
    assert_eq!(document.token, t1);
    assert_eq!(document.payload, json!({ "bio": "new" }));
}

#[tokio::test]
async fn stale_token_is_a_conflict() {
    let h = harness();
    let about = key("about");
    let t0 = h.repo.insert(&about, json!({ "bio": "a" }));
    h.repo
        .write(&about, &json!({ "bio": "b" }), Some(&t0), "first")
        .await
        .expect("first");

    assert_eq!(
        h.repo
            .write(&about, &json!({ "bio": "c" }), Some(&t0), "second")
            .await,
        Err(StoreError::Conflict)
    );
    assert_eq!(h.repo.payload(&about), Some(json!({ "bio": "b" })));
}

#[tokio::test(start_paused = true)]
async fn publish_is_visible_before_the_write_settles() {
    let h = harness();
    let projects = key("projects");
    let t0 = h.repo.insert(&projects, draft_projects());

    let pending = h
        .mutations
        .begin(&projects, set_status("p1", "published"), "Update project: Harbour")
        .await
        .expect("begin");

    let speculative = h.cache.peek(&projects).expect("cached");
    assert!(speculative.is_speculative());
    assert_eq!(
        status_of(&speculative.value, "p1").as_deref(),
        Some("published")
    );

    let outcome = pending.settle().await.expect("settle");
    assert_ne!(outcome.token, t0);

    let entry = h.cache.entry(&projects).await.expect("read").expect("entry");
    assert_eq!(entry.token.as_ref(), Some(&outcome.token));
    assert_eq!(status_of(&entry.value, "p1").as_deref(), Some("published"));
    assert!(!entry.is_speculative());

    let stored = h.repo.read(&projects).await.expect("stored");
    assert_eq!(stored.token, outcome.token);
    assert_eq!(status_of(&stored.payload, "p1").as_deref(), Some("published"));
}

#[tokio::test(start_paused = true)]
async fn three_conflicts_roll_the_cache_back() {
    let h = harness();
    let projects = key("projects");
    let t0 = h.repo.insert(&projects, draft_projects());
    let before = h.cache.entry(&projects).await.expect("read").expect("entry");

    h.repo.fail_next_writes_with_conflict(3);
    let err = h
        .mutations
        .mutate(&projects, set_status("p1", "published"), "Update project: Harbour")
        .await
        .expect_err("conflict");

    assert!(err.is_conflict());
    assert_eq!(err.attempts, 3);
    assert_eq!(h.repo.write_calls(), 3);
    assert_eq!(h.repo.commit_count(), 0);

    let after = h.cache.peek(&projects).expect("restored");
    assert_eq!(after, before);
    assert_eq!(
        serde_json::to_vec(&after.value).expect("encode"),
        serde_json::to_vec(&before.value).expect("encode")
    );
    assert_eq!(status_of(&after.value, "p1").as_deref(), Some("draft"));
    assert_eq!(h.repo.token(&projects), Some(t0));
}

#[tokio::test(start_paused = true)]
async fn unavailable_host_retries_then_commits() {
    let h = harness();
    let about = key("about");
    h.repo.insert(&about, json!({ "bio": "old" }));

    h.repo.fail_next_writes_unavailable(2);
    let outcome = h
        .mutations
        .mutate(&about, Replace(json!({ "bio": "new" })), "Update about")
        .await
        .expect("third attempt commits");

    assert_eq!(outcome.attempts, 3);
    assert_eq!(h.repo.payload(&about), Some(json!({ "bio": "new" })));
}

#[tokio::test(start_paused = true)]
async fn auth_failures_are_not_retried() {
    let h = harness();
    let about = key("about");
    h.repo.insert(&about, json!({ "bio": "old" }));
    h.cache.entry(&about).await.expect("warm");

    h.repo.reject_credentials(true);
    let err = h
        .mutations
        .mutate(&about, Replace(json!({ "bio": "new" })), "Update about")
        .await
        .expect_err("auth");

    assert!(err.is_auth_failure());
    assert_eq!(err.attempts, 1);
    assert_eq!(h.repo.read_calls(), 2);
    assert_eq!(h.repo.write_calls(), 0);
    assert_eq!(
        h.cache.peek(&about).map(|entry| entry.value),
        Some(json!({ "bio": "old" }))
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_mutations_converge() {
    let h = harness();
    let settings = key("settings");
    h.repo.insert(&settings, json!({ "base": 0 }));
    h.cache.entry(&settings).await.expect("warm");
    // Both writes read the same token before either reaches the host.
    h.repo.set_write_delay(Some(Duration::from_millis(50)));

    let first = h
        .mutations
        .begin(&settings, set_top("a", 1), "Set a")
        .await
        .expect("begin a");
    let second = h
        .mutations
        .begin(&settings, set_top("b", 2), "Set b")
        .await
        .expect("begin b");

    let (first, second) = tokio::join!(first.settle(), second.settle());
    let first = first.expect("a commits");
    let second = second.expect("b commits");
    assert_eq!(first.attempts + second.attempts, 3);

    let stored = h.repo.payload(&settings).expect("stored");
    assert_eq!(stored, json!({ "base": 0, "a": 1, "b": 2 }));
    assert_eq!(h.repo.commit_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn foreign_commit_is_merged_on_retry() {
    let h = harness();
    let settings = key("settings");
    h.repo.insert(&settings, json!({ "base": 0 }));
    h.cache.entry(&settings).await.expect("warm");

    h.repo
        .queue_foreign_write(&settings, json!({ "base": 0, "other": true }));
    let outcome = h
        .mutations
        .mutate(&settings, set_top("a", 1), "Set a")
        .await
        .expect("mutate");

    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.value, json!({ "base": 0, "other": true, "a": 1 }));
    assert_eq!(
        h.cache.peek(&settings).map(|entry| entry.value),
        Some(outcome.value)
    );
}

#[tokio::test(start_paused = true)]
async fn rejected_patch_leaves_cache_and_host_alone() {
    let h = harness();
    let projects = key("projects");
    h.repo.insert(&projects, draft_projects());
    let before = h.cache.entry(&projects).await.expect("read");

    let err = h
        .mutations
        .mutate(&projects, set_status("p9", "published"), "Update project")
        .await
        .expect_err("unknown project");

    assert!(!err.is_retryable());
    assert_eq!(h.repo.write_calls(), 0);
    assert_eq!(h.cache.peek(&projects), before);
}

#[tokio::test(start_paused = true)]
async fn bulk_edit_is_a_single_write() {
    let h = harness();
    let projects = key("projects");
    h.repo.insert(
        &projects,
        json!({
            "projects": [
                { "id": "p1", "status": "draft" },
                { "id": "p2", "status": "draft" },
                { "id": "p3", "status": "draft" },
            ]
        }),
    );
    let ids = vec!["p1".to_string(), "p2".to_string(), "p9".to_string()];

    let outcome = h
        .bulk
        .bulk_apply(
            &projects_collection(),
            &ids,
            set_field("status", "published"),
            "Bulk update 3 projects",
        )
        .await
        .expect("bulk");

    assert_eq!(outcome.changed(), 2);
    assert_eq!(outcome.missing(), ["p9".to_string()]);
    assert_eq!(h.repo.write_calls(), 1);
    assert_eq!(h.repo.descriptions(), vec!["Bulk update 3 projects"]);

    let stored = h.repo.payload(&projects).expect("stored");
    assert_eq!(status_of(&stored, "p1").as_deref(), Some("published"));
    assert_eq!(status_of(&stored, "p2").as_deref(), Some("published"));
    assert_eq!(status_of(&stored, "p3").as_deref(), Some("draft"));

    let cached = h.cache.peek(&projects).expect("confirmed");
    assert_eq!(cached.value, stored);
}

#[tokio::test(start_paused = true)]
async fn failed_bulk_edit_changes_nothing() {
    let h = harness();
    let projects = key("projects");
    let t0 = h.repo.insert(
        &projects,
        json!({
            "projects": [
                { "id": "p1", "status": "draft" },
                { "id": "p2", "status": "draft" },
            ]
        }),
    );
    let before = h.cache.entry(&projects).await.expect("warm");
    let stored_before = h.repo.payload(&projects);

    h.repo.fail_next_writes_with_conflict(3);
    let err = h
        .bulk
        .bulk_apply(
            &projects_collection(),
            &["p1".to_string(), "p2".to_string()],
            set_field("status", "published"),
            "Bulk update 2 projects",
        )
        .await
        .expect_err("conflict");

    assert!(err.is_conflict());
    assert_eq!(h.repo.write_calls(), 3);
    assert_eq!(h.repo.payload(&projects), stored_before);
    assert_eq!(h.repo.token(&projects), Some(t0));
    assert_eq!(h.cache.peek(&projects), before);
}

#[tokio::test(start_paused = true)]
async fn bulk_edit_without_changes_skips_the_write() {
    let h = harness();
    let projects = key("projects");
    h.repo.insert(&projects, draft_projects());

    let outcome = h
        .bulk
        .bulk_apply(
            &projects_collection(),
            &["p1".to_string()],
            set_field("status", "draft"),
            "Bulk update 1 projects",
        )
        .await
        .expect("bulk");

    assert_eq!(outcome, BulkOutcome::Unchanged { missing: vec![] });
    assert_eq!(h.repo.write_calls(), 0);
}
