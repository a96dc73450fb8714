//! JSON-file preference store.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::debug;

use crate::application::preferences::{PreferenceError, PreferenceStore};

use super::local::write_atomic;

const SOURCE: &str = "infra::preferences";

/// All preferences in one JSON object, rewritten whole on every change.
#[derive(Debug)]
pub struct FilePreferenceStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FilePreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Map<String, Value>, PreferenceError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(err) => return Err(PreferenceError::storage(err)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Map::new());
        }
        match serde_json::from_slice::<Value>(&bytes).map_err(PreferenceError::corrupt)? {
            Value::Object(map) => Ok(map),
            _ => Err(PreferenceError::corrupt("top level is not an object")),
        }
    }

    async fn save(&self, map: Map<String, Value>) -> Result<(), PreferenceError> {
        let bytes =
            serde_json::to_vec_pretty(&Value::Object(map)).map_err(PreferenceError::corrupt)?;
        write_atomic(&self.path, &bytes)
            .await
            .map_err(PreferenceError::storage)
    }
}

#[async_trait]
impl PreferenceStore for FilePreferenceStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, PreferenceError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), PreferenceError> {
        let _guard = self.lock.lock().await;
        let mut map = self.load().await?;
        map.insert(key.to_string(), value);
        self.save(map).await?;
        debug!(target = SOURCE, key, "Preference stored");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, PreferenceError> {
        let _guard = self.lock.lock().await;
        let mut map = self.load().await?;
        if map.remove(key).is_none() {
            return Ok(false);
        }
        self.save(map).await?;
        Ok(true)
    }
}
