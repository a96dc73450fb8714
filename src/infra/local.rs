//! Filesystem backend for local development.
//!
//! Documents live as pretty-printed JSON files under a root directory. The
//! version token is the hex SHA-256 of the file bytes, so edits made by hand
//! are detected the same way a concurrent commit would be.
//!
//! Every accepted write appends its description to `.commits.jsonl` under
//! the root, the local counterpart of a Git commit message.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::application::repos::{ConnectionStatus, ContentRepo, StoreError};
use crate::domain::document::{ContentKey, Document, VersionToken};

const SOURCE: &str = "infra::local";
const COMMIT_LOG: &str = ".commits.jsonl";

/// One line of the commit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRecord {
    pub key: String,
    pub token: String,
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub committed_at: OffsetDateTime,
}

#[derive(Debug)]
pub struct LocalContentRepo {
    root: PathBuf,
    // Serializes compare-and-swap sections within this process.
    write_lock: Mutex<()>,
}

impl LocalContentRepo {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Accepted writes, oldest first.
    pub async fn commit_log(&self) -> Result<Vec<CommitRecord>, StoreError> {
        let path = self.root.join(COMMIT_LOG);
        let Some(bytes) = self.current_bytes(&path).await? else {
            return Ok(Vec::new());
        };
        String::from_utf8_lossy(&bytes)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(StoreError::invalid_payload))
            .collect()
    }

    async fn append_commit(&self, record: &CommitRecord) -> Result<(), StoreError> {
        let path = self.root.join(COMMIT_LOG);
        let mut line = serde_json::to_vec(record).map_err(StoreError::invalid_payload)?;
        line.push(b'\n');

        let failed = |err: std::io::Error| {
            StoreError::unavailable(format!("failed to append to {}: {err}", path.display()))
        };
        tokio::fs::create_dir_all(&self.root).await.map_err(failed)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(failed)?;
        file.write_all(&line).await.map_err(failed)?;
        file.flush().await.map_err(failed)
    }

    fn path_for(&self, key: &ContentKey) -> PathBuf {
        self.root.join(key.file_path(""))
    }

    async fn current_bytes(&self, path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::unavailable(format!(
                "failed to read {}: {err}",
                path.display()
            ))),
        }
    }
}

pub fn content_token(bytes: &[u8]) -> VersionToken {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    VersionToken::new(hex::encode(hasher.finalize().to_vec()))
}

/// Replace `path` with `bytes` through a temporary sibling and a rename.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(parent).await?;

    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let temp = parent.join(format!(".{name}.{}.tmp", Uuid::new_v4()));

    if let Err(err) = tokio::fs::write(&temp, bytes).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(err);
    }
    if let Err(err) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(err);
    }
    Ok(())
}

#[async_trait]
impl ContentRepo for LocalContentRepo {
    async fn read(&self, key: &ContentKey) -> Result<Document, StoreError> {
        let path = self.path_for(key);
        let bytes = self
            .current_bytes(&path)
            .await?
            .ok_or(StoreError::NotFound)?;
        let payload = serde_json::from_slice(&bytes).map_err(StoreError::invalid_payload)?;
        debug!(target = SOURCE, key = %key, path = %path.display(), "Document loaded");
        Ok(Document {
            key: key.clone(),
            payload,
            token: content_token(&bytes),
        })
    }

    async fn write(
        &self,
        key: &ContentKey,
        payload: &Value,
        expected: Option<&VersionToken>,
        description: &str,
    ) -> Result<VersionToken, StoreError> {
        let path = self.path_for(key);
        let mut bytes = serde_json::to_vec_pretty(payload).map_err(StoreError::invalid_payload)?;
        bytes.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let current = self.current_bytes(&path).await?.map(|bytes| content_token(&bytes));
        match (current.as_ref(), expected) {
            (None, None) => {}
            (Some(current), Some(expected)) if current == expected => {}
            (None, Some(_)) | (Some(_), _) => return Err(StoreError::Conflict),
        }

        // The label goes in first, so no document change is ever unlabelled.
        let token = content_token(&bytes);
        self.append_commit(&CommitRecord {
            key: key.as_str().to_string(),
            token: token.as_str().to_string(),
            description: description.to_string(),
            committed_at: OffsetDateTime::now_utc(),
        })
        .await?;

        write_atomic(&path, &bytes).await.map_err(|err| {
            StoreError::unavailable(format!("failed to write {}: {err}", path.display()))
        })?;

        info!(
            target = SOURCE,
            key = %key,
            token = %token,
            commit = description,
            "Document committed"
        );
        Ok(token)
    }

    async fn verify(&self) -> ConnectionStatus {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => ConnectionStatus::Connected,
            Ok(_) => ConnectionStatus::Unreachable(format!(
                "{} is not a directory",
                self.root.display()
            )),
            Err(err) if err.kind() == ErrorKind::NotFound => ConnectionStatus::RepoNotFound,
            Err(err) => ConnectionStatus::Unreachable(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn key(raw: &str) -> ContentKey {
        ContentKey::new(raw).expect("key")
    }

    #[tokio::test]
    async fn round_trip_and_token_follows_bytes() {
        let dir = TempDir::new().expect("tempdir");
        let repo = LocalContentRepo::new(dir.path());

        assert_eq!(repo.read(&key("about")).await, Err(StoreError::NotFound));

        let token = repo
            .write(&key("about"), &json!({ "bio": "hi" }), None, "Create about")
            .await
            .expect("create");
        let document = repo.read(&key("about")).await.expect("read");

        assert_eq!(document.payload, json!({ "bio": "hi" }));
        assert_eq!(document.token, token);

        let raw = std::fs::read(dir.path().join("about.json")).expect("file");
        assert_eq!(content_token(&raw), token);
        assert!(String::from_utf8_lossy(&raw).contains("\n  \"bio\""));
    }

    #[tokio::test]
    async fn stale_or_missing_tokens_conflict() {
        let dir = TempDir::new().expect("tempdir");
        let repo = LocalContentRepo::new(dir.path());
        let first = repo
            .write(&key("about"), &json!({ "v": 1 }), None, "Create")
            .await
            .expect("create");

        assert_eq!(
            repo.write(&key("about"), &json!({ "v": 2 }), None, "Create again")
                .await,
            Err(StoreError::Conflict)
        );

        let second = repo
            .write(&key("about"), &json!({ "v": 2 }), Some(&first), "Update")
            .await
            .expect("update");
        assert_ne!(first, second);

        assert_eq!(
            repo.write(&key("about"), &json!({ "v": 3 }), Some(&first), "Stale")
                .await,
            Err(StoreError::Conflict)
        );
        assert_eq!(
            repo.write(&key("contact"), &json!({}), Some(&first), "Gone")
                .await,
            Err(StoreError::Conflict)
        );
    }

    #[tokio::test]
    async fn accepted_writes_are_labelled_in_the_commit_log() {
        let dir = TempDir::new().expect("tempdir");
        let repo = LocalContentRepo::new(dir.path());
        assert!(repo.commit_log().await.expect("empty log").is_empty());

        let first = repo
            .write(&key("about"), &json!({ "v": 1 }), None, "Create about")
            .await
            .expect("create");
        let _ = repo
            .write(&key("about"), &json!({ "v": 2 }), None, "Rejected")
            .await;
        let second = repo
            .write(&key("about"), &json!({ "v": 2 }), Some(&first), "Update about")
            .await
            .expect("update");

        let log = LocalContentRepo::new(dir.path())
            .commit_log()
            .await
            .expect("log");
        let labels: Vec<(&str, &str)> = log
            .iter()
            .map(|record| (record.description.as_str(), record.token.as_str()))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("Create about", first.as_str()),
                ("Update about", second.as_str()),
            ]
        );
        assert!(log.iter().all(|record| record.key == "about"));
    }

    #[tokio::test]
    async fn hand_edits_invalidate_tokens() {
        let dir = TempDir::new().expect("tempdir");
        let repo = LocalContentRepo::new(dir.path());
        let token = repo
            .write(&key("about"), &json!({ "v": 1 }), None, "Create")
            .await
            .expect("create");

        std::fs::write(dir.path().join("about.json"), b"{\"v\": 9}").expect("edit");

        assert_eq!(
            repo.write(&key("about"), &json!({ "v": 2 }), Some(&token), "Update")
                .await,
            Err(StoreError::Conflict)
        );
    }

    #[tokio::test]
    async fn corrupt_files_are_invalid_payloads() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("about.json"), b"not json").expect("write");
        let repo = LocalContentRepo::new(dir.path());

        assert!(matches!(
            repo.read(&key("about")).await,
            Err(StoreError::InvalidPayload(_))
        ));
    }

    #[tokio::test]
    async fn verify_checks_the_root() {
        let dir = TempDir::new().expect("tempdir");
        assert_eq!(
            LocalContentRepo::new(dir.path()).verify().await,
            ConnectionStatus::Connected
        );
        assert_eq!(
            LocalContentRepo::new(dir.path().join("missing")).verify().await,
            ConnectionStatus::RepoNotFound
        );
    }
}
