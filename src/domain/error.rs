use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("`{id}` not found in `{collection}`")]
    EntityNotFound { collection: String, id: String },
    #[error("domain validation failed: {message}")]
    Validation { message: String },
    #[error("document shape invalid: {message}")]
    Invariant { message: String },
}

impl DomainError {
    pub fn entity_not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::EntityNotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }
}
