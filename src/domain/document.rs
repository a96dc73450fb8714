//! Content documents, their keys and version tokens.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::DomainError;

const MAX_KEY_LEN: usize = 128;

/// Stable name of a stored document, e.g. `projects` or `about`.
///
/// Keys are lowercase path-like names: segments of `[a-z0-9_-]` joined by
/// `/`. They never contain `..`, a leading slash or a file extension, so a
/// key maps to exactly one file on the content host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentKey(String);

impl ContentKey {
    pub fn new(raw: impl Into<String>) -> Result<Self, DomainError> {
        let raw = raw.into();
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(DomainError::validation("content key must not be empty"));
        }
        if trimmed.len() > MAX_KEY_LEN {
            return Err(DomainError::validation(format!(
                "content key exceeds {MAX_KEY_LEN} characters"
            )));
        }

        for segment in trimmed.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(DomainError::validation(format!(
                    "content key `{trimmed}` has an empty or relative segment"
                )));
            }
            let valid = segment
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
            if !valid {
                return Err(DomainError::validation(format!(
                    "content key `{trimmed}` may only contain a-z, 0-9, `-`, `_` and `/`"
                )));
            }
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Key for a document the crate itself names. Skips validation, so the
    /// constant must already be a valid key.
    pub(crate) fn well_known(raw: &'static str) -> Self {
        Self(raw.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Repository path of this document below `data_dir`.
    pub fn file_path(&self, data_dir: &str) -> String {
        let dir = data_dir.trim_matches('/');
        if dir.is_empty() {
            format!("{}.json", self.0)
        } else {
            format!("{dir}/{}.json", self.0)
        }
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentKey {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ContentKey> for String {
    fn from(key: ContentKey) -> Self {
        key.0
    }
}

/// Opaque identifier of the exact stored bytes of a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored document together with the token of the bytes it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub key: ContentKey,
    pub payload: Value,
    pub token: VersionToken,
}

/// A pure transformation of a document payload.
///
/// `current` is `None` when the document does not exist yet; the returned
/// value becomes the whole new payload. Patches are re-run against a fresh
/// payload on every write attempt, so they must not capture the payload
/// they were first applied to.
pub trait Patch: Send + Sync {
    fn apply(&self, current: Option<&Value>) -> Result<Value, DomainError>;
}

impl<F> Patch for F
where
    F: Fn(Option<&Value>) -> Result<Value, DomainError> + Send + Sync,
{
    fn apply(&self, current: Option<&Value>) -> Result<Value, DomainError> {
        self(current)
    }
}

/// Patch that replaces the payload wholesale, regardless of what is stored.
#[derive(Debug, Clone)]
pub struct Replace(pub Value);

impl Patch for Replace {
    fn apply(&self, _current: Option<&Value>) -> Result<Value, DomainError> {
        Ok(self.0.clone())
    }
}
