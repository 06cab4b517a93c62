//! Durable artifact storage
//!
//! Artifacts live in a private directory under the data root. A
//! [`ChunkWriter`] appends recorder chunks to one artifact in arrival order;
//! finished artifacts are copied to the user's downloads directory.

use crate::utils::error::{AppError, AppResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use sysinfo::Disks;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Directory holding artifacts while they are recorded and until upload
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub async fn ensure_root(&self) -> AppResult<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Create (or truncate) `name` and open it for appending
    pub async fn create_writer(&self, name: &str) -> AppResult<ChunkWriter> {
        self.ensure_root().await?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.path_of(name))
            .await?;

        tracing::debug!("Opened writer for {}", name);
        Ok(ChunkWriter {
            name: name.to_string(),
            file: Some(file),
            bytes_written: 0,
            chunks: 0,
        })
    }

    /// Size as stored on disk
    pub async fn size_of(&self, name: &str) -> AppResult<u64> {
        Ok(fs::metadata(self.path_of(name)).await?.len())
    }

    pub async fn exists(&self, name: &str) -> bool {
        fs::try_exists(self.path_of(name)).await.unwrap_or(false)
    }

    /// Delete `name`. A file that is already gone counts as deleted.
    pub async fn remove(&self, name: &str) -> AppResult<()> {
        match fs::remove_file(self.path_of(name)).await {
            Ok(()) => {
                tracing::debug!("Deleted {}", name);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Copy `name` into `dest_dir`, returning the destination path
    pub async fn export(&self, name: &str, dest_dir: &Path) -> AppResult<PathBuf> {
        fs::create_dir_all(dest_dir).await?;
        let dest = dest_dir.join(name);
        fs::copy(self.path_of(name), &dest).await?;
        tracing::info!("Exported {} to {:?}", name, dest);
        Ok(dest)
    }

    /// Free bytes on the volume holding the artifact directory.
    ///
    /// Picks the disk with the longest mount point that prefixes the root.
    /// `None` when no disk could be matched.
    pub fn available_space(&self) -> Option<u64> {
        let root = self
            .root
            .ancestors()
            .find(|p| p.exists())
            .and_then(|p| p.canonicalize().ok())
            .unwrap_or_else(|| self.root.clone());

        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|d| root.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .map(|d| d.available_space())
    }
}

/// Append-only writer for one artifact
#[derive(Debug)]
pub struct ChunkWriter {
    name: String,
    file: Option<File>,
    bytes_written: u64,
    chunks: u64,
}

impl ChunkWriter {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    pub async fn append(&mut self, chunk: &[u8]) -> AppResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| AppError::ClosedResource(self.name.clone()))?;

        file.write_all(chunk).await?;
        self.bytes_written += chunk.len() as u64;
        self.chunks += 1;
        Ok(())
    }

    /// Flush and sync to disk. Closing twice is a no-op.
    pub async fn close(&mut self) -> AppResult<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
            tracing::debug!(
                "Closed {} ({} chunks, {} bytes)",
                self.name,
                self.chunks,
                self.bytes_written
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_chunks_are_appended_in_order() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("artifacts"));

        let mut writer = store.create_writer("a.mp4").await.unwrap();
        writer.append(b"one,").await.unwrap();
        writer.append(b"two").await.unwrap();
        writer.close().await.unwrap();

        assert_eq!(std::fs::read(store.path_of("a.mp4")).unwrap(), b"one,two");
        assert_eq!(store.size_of("a.mp4").await.unwrap(), 7);
        assert_eq!(writer.chunks(), 2);
    }

    #[tokio::test]
    async fn test_write_after_close_is_rejected() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let mut writer = store.create_writer("a.mp4").await.unwrap();
        writer.close().await.unwrap();
        writer.close().await.unwrap();

        let err = writer.append(b"late").await.unwrap_err();
        assert!(matches!(err, AppError::ClosedResource(name) if name == "a.mp4"));
    }

    #[tokio::test]
    async fn test_remove_missing_file_is_ok() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.remove("missing.mp4").await.unwrap();
    }

    #[tokio::test]
    async fn test_export_copies_file() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("artifacts"));
        let downloads = dir.path().join("downloads");

        let mut writer = store.create_writer("c.mp4").await.unwrap();
        writer.append(b"camera").await.unwrap();
        writer.close().await.unwrap();

        let dest = store.export("c.mp4", &downloads).await.unwrap();
        assert_eq!(std::fs::read(dest).unwrap(), b"camera");
        assert!(store.exists("c.mp4").await);
    }
}
