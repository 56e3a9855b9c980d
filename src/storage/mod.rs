//! Original image blob storage.
//!
//! Image bytes live on the filesystem under a per-user directory keyed by
//! the storage key the database records. The store only ever sees keys
//! the server generated, but keys are still validated so a crafted key
//! can never escape the root.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Persistence of original image bytes, keyed by owner and storage key.
pub trait BlobStore: Send + Sync {
    fn save(&self, user_id: i64, key: &str, bytes: &[u8]) -> Result<()>;
    fn read(&self, user_id: i64, key: &str) -> Result<Vec<u8>>;
    fn exists(&self, user_id: i64, key: &str) -> Result<bool>;
    fn delete(&self, user_id: i64, key: &str) -> Result<()>;
}

/// Filesystem-backed store rooted at a single directory.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("creating blob root {}", root.display()))?;
        Ok(Self { root })
    }

    fn blob_path(&self, user_id: i64, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(user_id.to_string()).join(key))
    }
}

/// Reject keys that could resolve outside the store root.
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        bail!("empty storage key");
    }
    let path = Path::new(key);
    if path.is_absolute()
        || path
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)))
    {
        bail!("invalid storage key: {key}");
    }
    if key.contains('/') || key.contains('\\') {
        bail!("invalid storage key: {key}");
    }
    Ok(())
}

impl BlobStore for FsBlobStore {
    fn save(&self, user_id: i64, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.blob_path(user_id, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes).with_context(|| format!("writing blob {}", path.display()))?;
        Ok(())
    }

    fn read(&self, user_id: i64, key: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(user_id, key)?;
        fs::read(&path).with_context(|| format!("reading blob {}", path.display()))
    }

    fn exists(&self, user_id: i64, key: &str) -> Result<bool> {
        Ok(self.blob_path(user_id, key)?.exists())
    }

    fn delete(&self, user_id: i64, key: &str) -> Result<()> {
        let path = self.blob_path(user_id, key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            // Deleting an already-gone blob is fine
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("deleting blob {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, FsBlobStore) {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path().join("blobs")).unwrap();
        (dir, store)
    }

    #[test]
    fn save_read_delete_cycle() {
        let (_dir, store) = store();
        store.save(1, "photo.jpg", b"bytes").unwrap();
        assert!(store.exists(1, "photo.jpg").unwrap());
        assert_eq!(store.read(1, "photo.jpg").unwrap(), b"bytes");

        store.delete(1, "photo.jpg").unwrap();
        assert!(!store.exists(1, "photo.jpg").unwrap());
        // A second delete is a no-op
        store.delete(1, "photo.jpg").unwrap();
    }

    #[test]
    fn blobs_are_scoped_per_user() {
        let (_dir, store) = store();
        store.save(1, "photo.jpg", b"mine").unwrap();
        assert!(!store.exists(2, "photo.jpg").unwrap());
    }

    #[test]
    fn traversal_keys_are_rejected() {
        let (_dir, store) = store();
        for key in ["../escape", "a/b", "/etc/passwd", "..", ""] {
            assert!(store.save(1, key, b"x").is_err(), "key {key:?} accepted");
        }
    }
}
