use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use crate::{
    application::{
        preferences::PreferenceError,
        repos::{DeployError, StoreError},
    },
    domain::{document::ContentKey, error::DomainError},
    infra::error::InfraError,
};

/// Flattened view of an error and its source chain, for operator output.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }

    pub fn from_message(source: &'static str, message: impl Into<String>) -> Self {
        Self {
            source,
            messages: vec![message.into()],
        }
    }

    pub fn summary(&self) -> String {
        self.messages.join(": ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    Mutate,
    BulkApply,
    TriggerDeploy,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Mutate => "mutate",
            Operation::BulkApply => "bulk_apply",
            Operation::TriggerDeploy => "trigger_deploy",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum FailureCause {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Deploy(#[from] DeployError),
    #[error("change rejected: {0}")]
    Rejected(#[source] DomainError),
    #[error("background task did not complete: {0}")]
    Interrupted(String),
}

/// A failed store-level operation together with where and how hard it was
/// tried.
#[derive(Debug)]
pub struct OperationError {
    pub operation: Operation,
    pub key: Option<ContentKey>,
    pub attempts: u32,
    pub cause: FailureCause,
}

impl OperationError {
    pub fn new(
        operation: Operation,
        key: Option<ContentKey>,
        attempts: u32,
        cause: impl Into<FailureCause>,
    ) -> Self {
        Self {
            operation,
            key,
            attempts,
            cause: cause.into(),
        }
    }

    pub fn store(operation: Operation, key: &ContentKey, attempts: u32, err: StoreError) -> Self {
        Self::new(operation, Some(key.clone()), attempts, err)
    }

    pub fn rejected(operation: Operation, key: &ContentKey, attempts: u32, err: DomainError) -> Self {
        Self::new(
            operation,
            Some(key.clone()),
            attempts,
            FailureCause::Rejected(err),
        )
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = operation;
        self
    }

    pub fn store_error(&self) -> Option<&StoreError> {
        match &self.cause {
            FailureCause::Store(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.store_error(), Some(StoreError::NotFound))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self.store_error(), Some(StoreError::Conflict))
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(
            &self.cause,
            FailureCause::Store(StoreError::AuthFailure(_))
                | FailureCause::Deploy(DeployError::AuthFailure(_))
        )
    }

    /// Whether the caller may reasonably try the same operation again.
    pub fn is_retryable(&self) -> bool {
        match &self.cause {
            FailureCause::Store(err) => err.is_retryable(),
            FailureCause::Deploy(DeployError::Unavailable(_)) => true,
            FailureCause::Deploy(_) | FailureCause::Rejected(_) => false,
            FailureCause::Interrupted(_) => true,
        }
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{} `{key}` failed", self.operation)?,
            None => write!(f, "{} failed", self.operation)?,
        }
        if self.attempts > 1 {
            write!(f, " after {} attempts", self.attempts)?;
        }
        Ok(())
    }
}

impl StdError for OperationError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.cause)
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Operation(#[from] OperationError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Preference(#[from] PreferenceError),
    #[error("content {content}; deploy {deploy}")]
    PartialOutcome { content: String, deploy: String },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn partial(content: impl Into<String>, deploy: impl Into<String>) -> Self {
        Self::PartialOutcome {
            content: content.into(),
            deploy: deploy.into(),
        }
    }

    pub fn presentation_message(&self) -> &'static str {
        match self {
            AppError::Operation(err) if err.is_not_found() => "Document not found",
            AppError::Operation(err) if err.is_conflict() => {
                "Content changed elsewhere; reload and try again"
            }
            AppError::Operation(err) if err.is_auth_failure() => "Invalid token",
            AppError::Operation(err) if err.is_retryable() => "Content host unavailable",
            AppError::Operation(_) => "Change could not be applied",
            AppError::Domain(DomainError::EntityNotFound { .. }) => "Entry not found",
            AppError::Domain(DomainError::Validation { .. }) | AppError::Validation(_) => {
                "Request could not be processed"
            }
            AppError::PartialOutcome { .. } => "Saved, but the site was not rebuilt",
            AppError::Infra(InfraError::Configuration { .. }) => "Service misconfigured",
            AppError::Infra(InfraError::Telemetry(_)) => "Logging subsystem could not start",
            AppError::Infra(InfraError::Io(_)) => "I/O failure",
            AppError::Preference(_) => "Preferences could not be saved",
            AppError::Domain(DomainError::Invariant { .. }) | AppError::Unexpected(_) => {
                "Unexpected error occurred"
            }
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from_error("application::error::AppError", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projects() -> ContentKey {
        ContentKey::new("projects").expect("key")
    }

    #[test]
    fn report_walks_the_source_chain() {
        let err = AppError::from(OperationError::store(
            Operation::Write,
            &projects(),
            3,
            StoreError::Conflict,
        ));

        let report = err.report();
        assert_eq!(
            report.messages,
            vec![
                "write `projects` failed after 3 attempts".to_string(),
                "version token is stale".to_string(),
            ]
        );
        assert_eq!(
            err.presentation_message(),
            "Content changed elsewhere; reload and try again"
        );
    }

    #[test]
    fn classification_follows_the_cause() {
        let auth = OperationError::store(
            Operation::Read,
            &projects(),
            1,
            StoreError::auth("bad token"),
        );
        assert!(auth.is_auth_failure());
        assert!(!auth.is_retryable());

        let deploy = OperationError::new(
            Operation::TriggerDeploy,
            None,
            1,
            DeployError::unavailable("502"),
        );
        assert!(deploy.is_retryable());
        assert_eq!(deploy.to_string(), "trigger_deploy failed");

        let rejected = OperationError::rejected(
            Operation::Mutate,
            &projects(),
            1,
            DomainError::entity_not_found("projects", "p9"),
        )
        .with_operation(Operation::BulkApply);
        assert_eq!(rejected.operation, Operation::BulkApply);
        assert!(!rejected.is_retryable());
    }
}
