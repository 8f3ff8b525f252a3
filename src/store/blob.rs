//! Blob area holding the raw bytes of each upload.

use super::types::StorageReference;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failures raised by blob storage backends.
#[derive(Debug, Error)]
pub enum BlobStoreError {
    /// Reference would escape the blob area.
    #[error("invalid storage reference '{0}'")]
    InvalidReference(String),
    /// Underlying filesystem operation failed.
    #[error("blob I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Write-once storage for upload bytes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist `bytes` under `reference`. The object is visible only once fully written.
    async fn put(&self, reference: &StorageReference, bytes: &[u8]) -> Result<(), BlobStoreError>;

    /// Remove the object stored under `reference`; missing objects are not an error.
    async fn delete(&self, reference: &StorageReference) -> Result<(), BlobStoreError>;
}

/// Blob area on the local filesystem.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Store blobs beneath `root`, creating it on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the blobs.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, reference: &StorageReference) -> Result<PathBuf, BlobStoreError> {
        let name = reference.as_str();
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(BlobStoreError::InvalidReference(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, reference: &StorageReference, bytes: &[u8]) -> Result<(), BlobStoreError> {
        let target = self.path_for(reference)?;
        tokio::fs::create_dir_all(&self.root).await?;

        let staging = self.root.join(format!(".{}.partial", reference.as_str()));
        if let Err(error) = tokio::fs::write(&staging, bytes).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(error.into());
        }
        tokio::fs::rename(&staging, &target).await?;
        tracing::debug!(reference = %reference, bytes = bytes.len(), "Blob written");
        Ok(())
    }

    async fn delete(&self, reference: &StorageReference) -> Result<(), BlobStoreError> {
        let target = self.path_for(reference)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = LocalBlobStore::new(dir.path().join("uploads"));
        let reference = StorageReference::generate("note.txt");

        blobs.put(&reference, b"hello world").await.unwrap();
        let path = blobs.root().join(reference.as_str());
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"hello world");

        blobs.delete(&reference).await.unwrap();
        assert!(!path.exists());
        // Deleting twice is fine.
        blobs.delete(&reference).await.unwrap();
    }

    #[tokio::test]
    async fn no_partial_files_remain_after_put() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = LocalBlobStore::new(dir.path());
        blobs
            .put(&StorageReference::generate("a.pdf"), b"%PDF-")
            .await
            .unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(!names[0].starts_with('.'));
    }

    #[tokio::test]
    async fn references_cannot_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = LocalBlobStore::new(dir.path());
        let reference = StorageReference::from_stored("../escape".to_string());
        assert!(matches!(
            blobs.put(&reference, b"x").await,
            Err(BlobStoreError::InvalidReference(_))
        ));
    }
}
