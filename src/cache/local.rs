// src/cache/local.rs

//! Object store backed by a local directory.
//!
//! Keys map straight onto paths under the base directory, so the on-disk
//! layout matches the key scheme: `<base>/objects/<fp>`, `<base>/meta/...`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::{CacheError, ObjectStore};

#[derive(Debug, Clone)]
pub struct LocalStore {
    base: PathBuf,
}

impl LocalStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Default cache directory for the workspace.
    pub fn default_dir(workspace_root: &Path) -> PathBuf {
        workspace_root.join(".rundag").join("cache")
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base.join(key)
    }

    fn not_found(key: &str) -> CacheError {
        CacheError::NotFound {
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn get_object(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        match fs::read(self.path_for(key)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Self::not_found(key)),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    async fn put_object(&self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        // Write-then-rename so readers never observe a partial object.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(fs::try_exists(self.path_for(key)).await?)
    }

    async fn object_size(&self, key: &str) -> Result<u64, CacheError> {
        match fs::metadata(self.path_for(key)).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Self::not_found(key)),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        // Keys use '/' separators; walk the deepest existing directory of
        // the prefix and filter.
        let mut keys = Vec::new();
        let mut stack = vec![self.base.clone()];

        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(CacheError::Io(e)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.base) {
                    let key = rel.to_string_lossy().replace('\\', "/");
                    if key.starts_with(prefix) && !key.ends_with(".tmp") {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn location(&self) -> String {
        format!("file://{}", self.base.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        store.put_object("objects/abc", b"hello").await.unwrap();
        assert_eq!(store.get_object("objects/abc").await.unwrap(), b"hello");
        assert!(store.exists("objects/abc").await.unwrap());
        assert_eq!(store.object_size("objects/abc").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        assert!(!store.exists("objects/nope").await.unwrap());
        let err = store.get_object("objects/nope").await.unwrap_err();
        assert!(matches!(err, CacheError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        store.put_object("objects/a", b"1").await.unwrap();
        store.put_object("objects/b", b"2").await.unwrap();
        store.put_object("meta/a.json", b"{}").await.unwrap();

        assert_eq!(
            store.list("objects/").await.unwrap(),
            vec!["objects/a".to_string(), "objects/b".to_string()]
        );
        assert_eq!(store.list("meta/").await.unwrap(), vec!["meta/a.json"]);
    }

    #[tokio::test]
    async fn range_read_default_impl() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        store.put_object("objects/r", b"0123456789").await.unwrap();
        assert_eq!(
            store.get_object_range("objects/r", 3, 4).await.unwrap(),
            b"3456"
        );
        // Ranges past the end are clamped.
        assert_eq!(
            store.get_object_range("objects/r", 8, 10).await.unwrap(),
            b"89"
        );
    }
}
