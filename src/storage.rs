//! Blob store boundary for uploaded referral documents.
//!
//! Upload is two-phase: callers obtain an opaque handle, write bytes
//! against it, and record the resulting storage key on the document row.
//! The database never sees file contents, only keys. `resolve_url` is the
//! read side and returns `None` for keys that no longer resolve, so a
//! missing blob degrades to an unavailable download rather than an error.

use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Blob I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One-shot permission to write a single blob.
#[derive(Debug, Clone)]
pub struct UploadHandle {
    pub key: String,
}

pub trait BlobStore {
    /// Mint a fresh handle. No filesystem work happens until `put`.
    fn generate_upload_handle(&self) -> UploadHandle;

    /// Write the blob and return the storage key to persist on the
    /// document row.
    fn put(&self, handle: &UploadHandle, bytes: &[u8]) -> Result<String, StorageError>;

    /// URL for a stored blob, `None` if the key doesn't resolve.
    fn resolve_url(&self, key: &str) -> Result<Option<String>, StorageError>;
}

/// Filesystem-backed store rooted at a single directory, one file per key.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Store under the default blobs directory.
    pub fn default_local() -> Result<Self, StorageError> {
        Self::new(crate::config::blobs_dir())
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl BlobStore for LocalBlobStore {
    fn generate_upload_handle(&self) -> UploadHandle {
        UploadHandle {
            key: Uuid::new_v4().to_string(),
        }
    }

    fn put(&self, handle: &UploadHandle, bytes: &[u8]) -> Result<String, StorageError> {
        fs::write(self.blob_path(&handle.key), bytes)?;
        Ok(handle.key.clone())
    }

    fn resolve_url(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.blob_path(key);
        if path.is_file() {
            Ok(Some(file_url(&path)))
        } else {
            Ok(None)
        }
    }
}

fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_resolve_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).unwrap();

        let handle = store.generate_upload_handle();
        let key = store.put(&handle, b"%PDF-1.7 referral").unwrap();
        assert_eq!(key, handle.key);

        let url = store.resolve_url(&key).unwrap().unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with(&key));

        let stored = fs::read(dir.path().join(&key)).unwrap();
        assert_eq!(stored, b"%PDF-1.7 referral");
    }

    #[test]
    fn unknown_key_resolves_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).unwrap();
        assert!(store.resolve_url("no-such-key").unwrap().is_none());
    }

    #[test]
    fn handles_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).unwrap();
        assert_ne!(
            store.generate_upload_handle().key,
            store.generate_upload_handle().key
        );
    }

    #[test]
    fn new_creates_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = LocalBlobStore::new(&nested).unwrap();
        let handle = store.generate_upload_handle();
        store.put(&handle, b"x").unwrap();
        assert!(nested.join(&handle.key).is_file());
    }
}
