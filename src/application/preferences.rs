//! Per-client preferences kept apart from the content documents.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("preference storage failed: {0}")]
    Storage(String),
    #[error("preference data is corrupt: {0}")]
    Corrupt(String),
}

impl PreferenceError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    pub fn corrupt(err: impl std::fmt::Display) -> Self {
        Self::Corrupt(err.to_string())
    }
}

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, PreferenceError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), PreferenceError>;

    /// Returns whether a value was present.
    async fn remove(&self, key: &str) -> Result<bool, PreferenceError>;
}

pub fn love_key(project_id: &str) -> String {
    format!("love-{project_id}")
}

/// Liked state of one project as seen by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoveState {
    #[serde(rename = "isLoved", default)]
    pub liked: bool,
    #[serde(rename = "likes", default)]
    pub count: u64,
}

impl LoveState {
    /// Flip the liked flag. Unliking never takes the count below zero.
    pub fn toggled(self) -> Self {
        if self.liked {
            Self {
                liked: false,
                count: self.count.saturating_sub(1),
            }
        } else {
            Self {
                liked: true,
                count: self.count.saturating_add(1),
            }
        }
    }
}

pub async fn love_state(
    store: &dyn PreferenceStore,
    project_id: &str,
) -> Result<Option<LoveState>, PreferenceError> {
    match store.get(&love_key(project_id)).await? {
        None => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(PreferenceError::corrupt),
    }
}

/// Toggle the liked state of `project_id`, seeding from `initial_count` when
/// nothing is stored yet.
pub async fn toggle_love(
    store: &dyn PreferenceStore,
    project_id: &str,
    initial_count: u64,
) -> Result<LoveState, PreferenceError> {
    let current = love_state(store, project_id).await?.unwrap_or(LoveState {
        liked: false,
        count: initial_count,
    });
    let next = current.toggled();
    let value = serde_json::to_value(next).map_err(PreferenceError::corrupt)?;
    store.set(&love_key(project_id), value).await?;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggling_counts_up_and_down() {
        let state = LoveState::default().toggled();
        assert_eq!(state, LoveState { liked: true, count: 1 });
        assert_eq!(state.toggled(), LoveState { liked: false, count: 0 });

        let drifted = LoveState { liked: true, count: 0 };
        assert_eq!(drifted.toggled().count, 0);
    }

    #[test]
    fn stored_shape_matches_the_browser_format() {
        let value = serde_json::to_value(LoveState { liked: true, count: 4 }).expect("encode");
        assert_eq!(value, serde_json::json!({ "isLoved": true, "likes": 4 }));
        assert_eq!(love_key("p1"), "love-p1");
    }
}
