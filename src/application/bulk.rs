//! Batch edits of collection entities as one compare-and-swap write.

use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::info;

use crate::cache::DocumentCache;
use crate::cache::lock::mutex_lock;
use crate::domain::collection::{Collection, CollectionEdit, ItemChange, edit_items};
use crate::domain::document::VersionToken;
use crate::domain::error::DomainError;

use super::error::{Operation, OperationError};
use super::writer::OptimisticWriter;

const SOURCE: &str = "application::bulk";

#[derive(Debug, Clone, PartialEq)]
pub enum BulkOutcome {
    /// No requested entity changed, so nothing was written.
    Unchanged { missing: Vec<String> },
    Applied {
        token: VersionToken,
        modified: Vec<String>,
        removed: Vec<String>,
        missing: Vec<String>,
        attempts: u32,
    },
}

impl BulkOutcome {
    pub fn missing(&self) -> &[String] {
        match self {
            BulkOutcome::Unchanged { missing } | BulkOutcome::Applied { missing, .. } => missing,
        }
    }

    pub fn changed(&self) -> usize {
        match self {
            BulkOutcome::Unchanged { .. } => 0,
            BulkOutcome::Applied {
                modified, removed, ..
            } => modified.len() + removed.len(),
        }
    }
}

pub struct BulkCoordinator {
    cache: Arc<DocumentCache>,
    writer: OptimisticWriter,
}

impl BulkCoordinator {
    pub fn new(cache: Arc<DocumentCache>, writer: OptimisticWriter) -> Self {
        Self { cache, writer }
    }

    /// Apply `transform` to every entity named in `ids` and write the
    /// collection once. On failure neither the store nor the cache changes.
    pub async fn bulk_apply<T>(
        &self,
        collection: &Collection,
        ids: &[String],
        transform: T,
        description: &str,
    ) -> Result<BulkOutcome, OperationError>
    where
        T: Fn(&mut Map<String, Value>) -> ItemChange + Send + Sync,
    {
        let key = &collection.key;
        let now = OffsetDateTime::now_utc();
        let base = self
            .writer
            .read(key)
            .await
            .map_err(|err| err.with_operation(Operation::BulkApply))?;

        let preview = edit_items(
            collection,
            base.as_ref().map(|doc| &doc.payload),
            ids,
            &transform,
            now,
        )
        .map_err(|err| OperationError::rejected(Operation::BulkApply, key, 0, err))?;

        if !preview.has_changes() {
            info!(
                target = SOURCE,
                key = %key,
                requested = ids.len(),
                missing = preview.missing.len(),
                "Bulk edit changed nothing; skipping write"
            );
            return Ok(BulkOutcome::Unchanged {
                missing: preview.missing,
            });
        }

        // Retries re-run the edit against a fresh payload; keep the report of
        // the run that was actually written.
        let last_edit: Mutex<Option<CollectionEdit>> = Mutex::new(None);
        let patch = |current: Option<&Value>| -> Result<Value, DomainError> {
            let edit = edit_items(collection, current, ids, &transform, now)?;
            let payload = edit.payload.clone();
            *mutex_lock(&last_edit, SOURCE, "bulk_apply.patch") = Some(edit);
            Ok(payload)
        };

        let committed = self
            .writer
            .write_from(key, base, &patch, description)
            .await
            .map_err(|err| err.with_operation(Operation::BulkApply))?;

        self.cache.confirm(
            key,
            None,
            committed.payload.clone(),
            committed.token.clone(),
        );

        let edit = mutex_lock(&last_edit, SOURCE, "bulk_apply.report")
            .take()
            .unwrap_or(preview);
        info!(
            target = SOURCE,
            key = %key,
            modified = edit.modified.len(),
            removed = edit.removed.len(),
            missing = edit.missing.len(),
            attempts = committed.attempts,
            "Bulk edit committed"
        );

        Ok(BulkOutcome::Applied {
            token: committed.token,
            modified: edit.modified,
            removed: edit.removed,
            missing: edit.missing,
            attempts: committed.attempts,
        })
    }
}
