//! Traits describing the content host and deploy hook adapters.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::domain::document::{ContentKey, Document, VersionToken};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("document not found")]
    NotFound,
    #[error("version token is stale")]
    Conflict,
    #[error("content host rejected credentials: {0}")]
    AuthFailure(String),
    #[error("content host unavailable: {0}")]
    Unavailable(String),
    #[error("stored content could not be decoded: {0}")]
    InvalidPayload(String),
    #[error("invalid content key: {0}")]
    InvalidKey(String),
}

impl StoreError {
    pub fn auth(message: impl Into<String>) -> Self {
        Self::AuthFailure(message.into())
    }

    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }

    pub fn invalid_payload(err: impl std::fmt::Display) -> Self {
        Self::InvalidPayload(err.to_string())
    }

    /// Conflicts and transient transport failures may succeed on a later
    /// attempt; everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict | StoreError::Unavailable(_))
    }
}

/// Result of probing the content host with the configured credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    RepoNotFound,
    InvalidToken,
    Unreachable(String),
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

/// Authenticated whole-document store with compare-and-swap writes.
#[async_trait]
pub trait ContentRepo: Send + Sync {
    async fn read(&self, key: &ContentKey) -> Result<Document, StoreError>;

    /// Replace the document at `key` if the stored token still equals
    /// `expected`. `None` means the document must not exist yet.
    async fn write(
        &self,
        key: &ContentKey,
        payload: &Value,
        expected: Option<&VersionToken>,
        description: &str,
    ) -> Result<VersionToken, StoreError>;

    async fn verify(&self) -> ConnectionStatus;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeployError {
    #[error("deploy hook rejected credentials: {0}")]
    AuthFailure(String),
    #[error("deploy hook unavailable: {0}")]
    Unavailable(String),
    #[error("deploy hook is not configured")]
    NotConfigured,
}

impl DeployError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Fire-and-forget rebuild of the published site.
#[async_trait]
pub trait DeployHook: Send + Sync {
    async fn trigger(&self) -> Result<(), DeployError>;
}
