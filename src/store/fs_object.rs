//! Filesystem-backed object store for standalone deployments

use crate::error::{LifecycleError, Result};
use crate::store::ObjectStore;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Object store that maps keys onto files under a root directory.
///
/// Keys are sanitized to relative paths inside the root; a key that would
/// resolve outside the root is rejected as an integrity violation.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(LifecycleError::IntegrityViolation(format!(
                "object key escapes store root: '{}'",
                key
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;
        debug!(key, "Object written");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        fs::read(&path)
            .await
            .map_err(|_| LifecycleError::NotFound(format!("object '{}'", key)))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(&self.root) {
                    let key = relative.to_string_lossy().replace('\\', "/");
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_list_delete() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());

        store
            .put("archive/events/2024.col.zst", vec![1, 2, 3])
            .await
            .unwrap();
        assert_eq!(
            store.get("archive/events/2024.col.zst").await.unwrap(),
            vec![1, 2, 3]
        );
        assert_eq!(store.list("archive/").await.unwrap().len(), 1);

        store.delete("archive/events/2024.col.zst").await.unwrap();
        assert!(store.get("archive/events/2024.col.zst").await.is_err());
    }

    #[tokio::test]
    async fn test_key_escape_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());

        let err = store
            .put("../outside.bin", vec![1])
            .await
            .unwrap_err();
        assert!(err.is_fatal());

        let err = store.get("/etc/passwd").await.unwrap_err();
        assert!(err.is_fatal());
    }
}
