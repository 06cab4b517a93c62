//! Temporary-file registry
//!
//! Durable set of artifact names that are not yet uploaded or cleaned. Names
//! are added before any byte is written, so a crash always leaves them
//! discoverable. Insert and delete are idempotent; entries are removed one by
//! one so a name added concurrently by another context is never swept away.

use super::{keys, SharedStore};
use crate::recorder::writer::ArtifactStore;
use crate::utils::error::AppResult;

#[derive(Clone)]
pub struct TempFileRegistry {
    store: SharedStore,
}

impl TempFileRegistry {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Registered names in insertion order
    pub fn list(&self) -> Vec<String> {
        self.store
            .get::<Vec<String>>(keys::TEMP_FILES)
            .unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.list().iter().any(|n| n == name)
    }

    pub fn is_empty(&self) -> bool {
        self.list().is_empty()
    }

    /// Add a name. Returns `false` when it was already registered.
    pub fn add(&self, name: &str) -> AppResult<bool> {
        let added = self.store.update::<Vec<String>, _, _>(keys::TEMP_FILES, |current| {
            let mut names = current.unwrap_or_default();
            if names.iter().any(|n| n == name) {
                (Some(names), false)
            } else {
                names.push(name.to_string());
                (Some(names), true)
            }
        })?;

        if added {
            tracing::debug!("Registered temporary file {}", name);
        } else {
            tracing::debug!("Temporary file {} already registered", name);
        }
        Ok(added)
    }

    /// Remove a name. Removing an absent name is a no-op.
    pub fn remove(&self, name: &str) -> AppResult<()> {
        self.store.update::<Vec<String>, _, _>(keys::TEMP_FILES, |current| {
            let names: Vec<String> = current
                .unwrap_or_default()
                .into_iter()
                .filter(|n| n != name)
                .collect();
            if names.is_empty() {
                (None, ())
            } else {
                (Some(names), ())
            }
        })
    }

    /// Delete every registered file from the durable area and unregister it.
    ///
    /// A file that cannot be deleted stays registered for the next sweep.
    /// Returns the number of names removed from the registry.
    pub async fn purge(&self, artifacts: &ArtifactStore) -> AppResult<usize> {
        let names = self.list();
        let mut removed = 0;

        for name in &names {
            match artifacts.remove(name).await {
                Ok(()) => {
                    self.remove(name)?;
                    removed += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to delete temporary file {}: {}", name, e);
                }
            }
        }

        if removed > 0 {
            tracing::info!("Purged {} temporary file(s)", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn registry(dir: &std::path::Path) -> TempFileRegistry {
        TempFileRegistry::new(SharedStore::in_dir(dir).unwrap())
    }

    #[test]
    fn test_add_is_idempotent_and_ordered() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());

        assert!(registry.add("b.mp4").unwrap());
        assert!(registry.add("a.mp4").unwrap());
        assert!(!registry.add("b.mp4").unwrap());

        assert_eq!(registry.list(), vec!["b.mp4".to_string(), "a.mp4".to_string()]);
    }

    #[test]
    fn test_remove_last_entry_clears_key() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());

        registry.add("a.mp4").unwrap();
        registry.remove("a.mp4").unwrap();
        registry.remove("a.mp4").unwrap();

        assert!(registry.is_empty());
        assert!(!registry.store.contains(keys::TEMP_FILES));
    }

    #[tokio::test]
    async fn test_purge_deletes_files_and_tolerates_missing_ones() {
        let dir = tempdir().unwrap();
        let artifacts = ArtifactStore::new(dir.path().join("artifacts"));
        artifacts.ensure_root().await.unwrap();
        let registry = registry(dir.path());

        tokio::fs::write(artifacts.path_of("present.mp4"), b"data")
            .await
            .unwrap();
        registry.add("present.mp4").unwrap();
        registry.add("never-written.mp4").unwrap();

        let removed = registry.purge(&artifacts).await.unwrap();

        assert_eq!(removed, 2);
        assert!(registry.is_empty());
        assert!(!artifacts.path_of("present.mp4").exists());
    }
}
