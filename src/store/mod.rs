//! Persistent shared store
//!
//! A durable key-value store shared by every context. There is no multi-key
//! atomicity: each key is last-write-wins, and every value is either owned by a
//! single writer or is a set with idempotent insert/delete.

pub mod activity;
pub mod registry;

pub use activity::{ActivityEntry, ActivityLog};
pub use registry::TempFileRegistry;

use crate::utils::error::AppResult;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Key names shared with the control panel and other collaborators
pub mod keys {
    pub const BUTTON_STATE: &str = "bState";
    pub const SESSION_ID: &str = "session_id";
    pub const TEMP_FILES: &str = "tempFiles";
    pub const LAST_RECORD_TIME: &str = "lastRecordTime";
    pub const ACTIVITY_LOG: &str = "extension_logs";
    pub const FORM_VALUES: &str = "inputElementsValue";
    pub const FILE_NAMES: &str = "fileNames";
    pub const SESSION_METADATA: &str = "sessionMetadata";
    pub const CLEANUP_DUE_AT: &str = "cleanupDueAt";
}

/// File name of the store inside the data directory
pub const STORE_FILE_NAME: &str = "store.json";

/// Handle to the shared store. Cheap to clone; all clones see the same data.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl SharedStore {
    /// Open the store backed by `path`, loading any previously persisted values
    pub fn open(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let values = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<Map<String, Value>>(&contents) {
                Ok(values) => values,
                Err(e) => {
                    tracing::warn!("Shared store {:?} is corrupt, starting empty: {}", path, e);
                    Map::new()
                }
            }
        } else {
            Map::new()
        };

        tracing::debug!("Opened shared store {:?} ({} keys)", path, values.len());

        Ok(Self {
            inner: Arc::new(StoreInner {
                path,
                values: Mutex::new(values),
            }),
        })
    }

    /// Open the store file inside a data directory
    pub fn in_dir(dir: &Path) -> AppResult<Self> {
        Self::open(dir.join(STORE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Read a key. A value that no longer matches `T` reads as absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.inner.values.lock().get(key).cloned()?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("Ignoring malformed value for key '{}': {}", key, e);
                None
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.values.lock().contains_key(key)
    }

    /// Write a key and persist
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> AppResult<()> {
        let value = serde_json::to_value(value)?;
        let mut values = self.inner.values.lock();
        values.insert(key.to_string(), value);
        self.persist(&values)
    }

    /// Remove a key and persist
    pub fn remove(&self, key: &str) -> AppResult<()> {
        let mut values = self.inner.values.lock();
        if values.remove(key).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }

    /// Read-modify-write of a single key.
    ///
    /// `f` receives the current value (if any) and returns the new value
    /// (`None` removes the key) together with a result handed back to the caller.
    pub fn update<T, R, F>(&self, key: &str, f: F) -> AppResult<R>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<T>) -> (Option<T>, R),
    {
        self.update_raw(key, |current| {
            let current = current.and_then(|v| match serde_json::from_value(v) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("Replacing malformed value for key '{}': {}", key, e);
                    None
                }
            });
            let (next, result) = f(current);
            let next = next.map(serde_json::to_value).transpose()?;
            Ok((next, result))
        })
    }

    /// Read-modify-write on the stored JSON, for callers that must keep
    /// values they cannot parse.
    pub fn update_raw<R, F>(&self, key: &str, f: F) -> AppResult<R>
    where
        F: FnOnce(Option<Value>) -> AppResult<(Option<Value>, R)>,
    {
        let mut values = self.inner.values.lock();
        let (next, result) = f(values.get(key).cloned())?;
        match next {
            Some(next) => {
                values.insert(key.to_string(), next);
            }
            None => {
                values.remove(key);
            }
        }
        self.persist(&values)?;
        Ok(result)
    }

    /// Write the whole map atomically: temp file in the same directory, then rename
    fn persist(&self, values: &Map<String, Value>) -> AppResult<()> {
        let dir = self
            .inner
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer(&mut tmp, values)?;
        tmp.flush()?;
        tmp.persist(&self.inner.path).map_err(|e| e.error)?;
        Ok(())
    }
}
