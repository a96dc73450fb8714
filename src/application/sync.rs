//! Publishing: content writes followed by a site rebuild.
//!
//! Content and deploy are independent facts. A report can say "content
//! saved, site not rebuilt", and callers decide what to do with that.

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tracing::{info, warn};

use crate::domain::document::{ContentKey, Patch, Replace};

use super::deploy::{DeployOutcome, DeployTrigger};
use super::error::{AppError, OperationError};
use super::mutation::{MutationLayer, MutationOutcome};

const SOURCE: &str = "application::sync";

/// One document change to publish.
pub struct DocumentWrite {
    pub key: ContentKey,
    pub patch: Arc<dyn Patch>,
    pub description: String,
}

impl DocumentWrite {
    pub fn new(key: ContentKey, patch: impl Patch + 'static, description: impl Into<String>) -> Self {
        Self {
            key,
            patch: Arc::new(patch),
            description: description.into(),
        }
    }

    pub fn replace(key: ContentKey, payload: Value, description: impl Into<String>) -> Self {
        Self::new(key, Replace(payload), description)
    }
}

impl fmt::Debug for DocumentWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentWrite")
            .field("key", &self.key)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Shares one patch between the speculative apply and the background write.
struct SharedPatch(Arc<dyn Patch>);

impl Patch for SharedPatch {
    fn apply(
        &self,
        current: Option<&Value>,
    ) -> Result<Value, crate::domain::error::DomainError> {
        self.0.apply(current)
    }
}

#[derive(Debug)]
pub struct DocumentReport {
    pub key: ContentKey,
    pub result: Result<MutationOutcome, OperationError>,
}

#[derive(Debug)]
pub enum DeployReport {
    /// No content committed, so no rebuild was requested.
    NotAttempted,
    Triggered(DeployOutcome),
    Failed(OperationError),
}

#[derive(Debug)]
pub struct SyncReport {
    pub documents: Vec<DocumentReport>,
    pub deploy: DeployReport,
}

impl SyncReport {
    pub fn committed(&self) -> usize {
        self.documents
            .iter()
            .filter(|doc| doc.result.is_ok())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.documents.len() - self.committed()
    }

    /// Collapse the report: full success stays `Ok`, total content failure
    /// returns the first error, anything in between is a partial outcome.
    pub fn into_result(self) -> Result<SyncReport, AppError> {
        let committed = self.committed();
        let failed = self.failed();
        let deploy_failed = matches!(self.deploy, DeployReport::Failed(_));

        if failed == 0 && !deploy_failed {
            return Ok(self);
        }

        if committed == 0 {
            let first = self
                .documents
                .into_iter()
                .find_map(|doc| doc.result.err());
            return Err(match first {
                Some(err) => AppError::from(err),
                None => AppError::unexpected("publish reported failure without an error"),
            });
        }

        let content = if failed == 0 {
            format!("saved {committed} document(s)")
        } else {
            format!("saved {committed} document(s), {failed} failed")
        };
        let deploy = match &self.deploy {
            DeployReport::NotAttempted => "not attempted".to_string(),
            DeployReport::Triggered(outcome) => format!("{outcome:?}"),
            DeployReport::Failed(err) => format!("failed: {err}: {}", err.cause),
        };
        Err(AppError::partial(content, deploy))
    }
}

pub struct SyncCoordinator {
    mutations: Arc<MutationLayer>,
    deploy: Arc<DeployTrigger>,
}

impl SyncCoordinator {
    pub fn new(mutations: Arc<MutationLayer>, deploy: Arc<DeployTrigger>) -> Self {
        Self { mutations, deploy }
    }

    /// Write every document, then rebuild the site if anything committed.
    pub async fn publish(&self, writes: Vec<DocumentWrite>) -> SyncReport {
        let mut documents = Vec::with_capacity(writes.len());
        let mut pending = Vec::with_capacity(writes.len());

        for write in writes {
            let patch = SharedPatch(write.patch);
            match self
                .mutations
                .begin(&write.key, patch, write.description)
                .await
            {
                Ok(mutation) => pending.push(mutation),
                Err(err) => documents.push(DocumentReport {
                    key: write.key,
                    result: Err(err),
                }),
            }
        }

        let settled = join_all(pending.into_iter().map(|mutation| async move {
            let key = mutation.key.clone();
            DocumentReport {
                key,
                result: mutation.settle().await,
            }
        }))
        .await;
        documents.extend(settled);

        let committed = documents.iter().filter(|doc| doc.result.is_ok()).count();
        let deploy = if committed == 0 {
            DeployReport::NotAttempted
        } else {
            match self.deploy.trigger_deploy().await {
                Ok(outcome) => DeployReport::Triggered(outcome),
                Err(err) => DeployReport::Failed(err),
            }
        };

        let report = SyncReport { documents, deploy };
        if report.failed() == 0 && !matches!(report.deploy, DeployReport::Failed(_)) {
            info!(target = SOURCE, committed, "Publish completed");
        } else {
            warn!(
                target = SOURCE,
                committed,
                failed = report.failed(),
                deploy_failed = matches!(report.deploy, DeployReport::Failed(_)),
                "Publish completed with failures"
            );
        }
        report
    }
}
