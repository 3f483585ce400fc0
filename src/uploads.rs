//! Upload storage.
//!
//! Uploaded files are written as raw bytes under a server-generated UUID in
//! the uploads directory. The progress log of a run lives next to its upload
//! as `<id>.log`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid upload identifier: {0}")]
    InvalidId(String),

    #[error("Upload {0} not found")]
    NotFound(UploadId),

    #[error("Upload storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque identifier of a stored upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadId(Uuid);

impl UploadId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl FromStr for UploadId {
    type Err = StoreError;

    /// Only canonical UUIDs are accepted so client text never becomes a path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| StoreError::InvalidId(s.to_string()))
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Directory-backed upload store.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open the store, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Persist `bytes` under a freshly generated identifier.
    pub async fn save(&self, bytes: &[u8]) -> Result<UploadId, StoreError> {
        let id = UploadId::generate();
        tokio::fs::write(self.upload_path(id), bytes).await?;
        tracing::info!(upload_id = %id, size = bytes.len(), "Stored upload");
        Ok(id)
    }

    pub async fn exists(&self, id: UploadId) -> bool {
        tokio::fs::try_exists(self.upload_path(id))
            .await
            .unwrap_or(false)
    }

    pub async fn read(&self, id: UploadId) -> Result<Bytes, StoreError> {
        match tokio::fs::read(self.upload_path(id)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn upload_path(&self, id: UploadId) -> PathBuf {
        self.root.join(id.to_string())
    }

    pub fn log_path(&self, id: UploadId) -> PathBuf {
        self.root.join(format!("{}.log", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn saved_bytes_are_readable_by_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::open(dir.path()).await.expect("open store");

        let id = store.save(b"product,sales,amount\nWidget,3,9.5\n").await.expect("save");

        assert!(store.exists(id).await);
        let bytes = store.read(id).await.expect("read");
        assert_eq!(&bytes[..], b"product,sales,amount\nWidget,3,9.5\n");
        assert_eq!(store.log_path(id), dir.path().join(format!("{}.log", id)));
    }

    #[tokio::test]
    async fn generated_ids_are_distinct() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::open(dir.path()).await.expect("open store");

        let a = store.save(b"a").await.expect("save");
        let b = store.save(b"b").await.expect("save");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn missing_upload_reports_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::open(dir.path()).await.expect("open store");
        let id = UploadId::generate();

        assert!(!store.exists(id).await);
        assert!(matches!(
            store.read(id).await,
            Err(StoreError::NotFound(missing)) if missing == id
        ));
    }

    #[test]
    fn path_like_ids_are_rejected() {
        assert!("../etc/passwd".parse::<UploadId>().is_err());
        assert!("report.csv".parse::<UploadId>().is_err());
        assert!("67e55044-10b1-426f-9247-bb680e5fe0c8".parse::<UploadId>().is_ok());
    }
}
