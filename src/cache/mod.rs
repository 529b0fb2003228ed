// src/cache/mod.rs

//! Content-addressed artifact cache.
//!
//! Layout inside an object store:
//! - `objects/<fingerprint>`: the (optionally gzipped) tar bundle of the
//!   task's declared outputs
//! - `meta/<fingerprint>.json`: the [`CacheEntry`] describing the bundle
//!
//! [`ArtifactCache`] sits on top of any [`ObjectStore`]; the store may be a
//! local directory, a single remote endpoint, or the multi-region router.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::exec::retry::Retryable;
use crate::fingerprint::{Fingerprint, build_globset, collect_matching_files};
use crate::fs::FileSystem;

pub mod compress;
pub mod local;
pub mod remote;

pub use compress::CompressionChoice;
pub use local::LocalStore;
pub use remote::HttpObjectStore;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("object not found: {key}")]
    NotFound { key: String },
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache network error: {0}")]
    Network(String),
    #[error("cache endpoint unavailable: {0}")]
    Unavailable(String),
    #[error("cache metadata error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("checksum mismatch for {key}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        key: String,
        expected: String,
        actual: String,
    },
    #[error("invalid cache entry: {0}")]
    InvalidEntry(String),
}

impl Retryable for CacheError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            CacheError::Io(_) | CacheError::Network(_) | CacheError::Unavailable(_)
        )
    }
}

/// Metadata stored next to each cached artifact bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub task: String,
    /// Workspace-relative paths of the files inside the bundle.
    pub artifact_refs: Vec<String>,
    /// Region the bundle was first uploaded to.
    pub region: String,
    pub compression: CompressionChoice,
    /// Size of the stored (compressed) object in bytes.
    pub size: u64,
    /// blake3 hex digest of the stored object bytes, verified on download.
    pub checksum: String,
    pub created_at_epoch_secs: u64,
}

impl CacheEntry {
    pub fn object_key(&self) -> String {
        object_key(&self.fingerprint)
    }
}

pub fn object_key(fp: &Fingerprint) -> String {
    format!("objects/{fp}")
}

pub fn meta_key(fp: &Fingerprint) -> String {
    format!("meta/{fp}.json")
}

/// Minimal object-store surface the cache needs.
///
/// Keys are flat strings; implementations map them onto files, HTTP paths
/// or bucket keys as appropriate.
#[async_trait]
pub trait ObjectStore: Send + Sync + fmt::Debug {
    async fn get_object(&self, key: &str) -> Result<Vec<u8>, CacheError>;

    /// Byte range `[offset, offset + len)` of an object. The default pulls
    /// the whole object; remote stores override this with range requests.
    async fn get_object_range(&self, key: &str, offset: u64, len: u64) -> Result<Vec<u8>, CacheError> {
        let data = self.get_object(key).await?;
        let start = (offset as usize).min(data.len());
        let end = ((offset + len) as usize).min(data.len());
        Ok(data[start..end].to_vec())
    }

    async fn put_object(&self, key: &str, data: &[u8]) -> Result<(), CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    async fn object_size(&self, key: &str) -> Result<u64, CacheError>;

    /// Keys under the given prefix.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, CacheError>;

    /// Human-readable location for log lines.
    fn location(&self) -> String;
}

/// What a cache lookup found.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    Hit(CacheEntry),
    Miss,
}

/// Fingerprint-keyed artifact cache over an [`ObjectStore`].
///
/// A run-local memo absorbs repeated lookups of the same fingerprint, so a
/// diamond-shaped graph probes the store once per distinct fingerprint.
pub struct ArtifactCache {
    store: Arc<dyn ObjectStore>,
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
    region: String,
    compression: CompressionChoice,
    memo: Mutex<HashMap<Fingerprint, Option<CacheEntry>>>,
}

impl fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactCache")
            .field("store", &self.store.location())
            .field("root", &self.root)
            .field("region", &self.region)
            .field("compression", &self.compression)
            .finish_non_exhaustive()
    }
}

impl ArtifactCache {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        fs: Arc<dyn FileSystem>,
        root: PathBuf,
        region: impl Into<String>,
        compression: CompressionChoice,
    ) -> Self {
        Self {
            store,
            fs,
            root,
            region: region.into(),
            compression,
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a fingerprint, consulting the run-local memo first.
    pub async fn lookup(&self, fp: &Fingerprint) -> Result<CacheLookup, CacheError> {
        if let Some(memoized) = self.memo.lock().await.get(fp) {
            return Ok(match memoized {
                Some(entry) => CacheLookup::Hit(entry.clone()),
                None => CacheLookup::Miss,
            });
        }

        let result = self.lookup_store(fp).await?;
        let memo_value = match &result {
            CacheLookup::Hit(entry) => Some(entry.clone()),
            CacheLookup::Miss => None,
        };
        self.memo.lock().await.insert(fp.clone(), memo_value);
        Ok(result)
    }

    async fn lookup_store(&self, fp: &Fingerprint) -> Result<CacheLookup, CacheError> {
        let key = meta_key(fp);
        match self.store.get_object(&key).await {
            Ok(bytes) => {
                let entry: CacheEntry = serde_json::from_slice(&bytes)?;
                if entry.fingerprint != *fp {
                    return Err(CacheError::InvalidEntry(format!(
                        "entry under {key} describes fingerprint {}",
                        entry.fingerprint
                    )));
                }
                debug!(fingerprint = fp.short(), "cache hit");
                Ok(CacheLookup::Hit(entry))
            }
            Err(CacheError::NotFound { .. }) => {
                debug!(fingerprint = fp.short(), "cache miss");
                Ok(CacheLookup::Miss)
            }
            Err(e) => Err(e),
        }
    }

    /// Bundle the task's declared outputs and upload them under `fp`.
    ///
    /// Idempotent: if the object already exists (another worker or an
    /// earlier run uploaded it) only the memo is refreshed.
    pub async fn store_outputs(
        &self,
        fp: &Fingerprint,
        task: &str,
        output_globs: &[String],
    ) -> Result<CacheEntry, CacheError> {
        let object_key = object_key(fp);
        if self.store.exists(&object_key).await? {
            debug!(fingerprint = fp.short(), "artifact already cached");
            if let CacheLookup::Hit(entry) = self.lookup_store(fp).await? {
                self.memo.lock().await.insert(fp.clone(), Some(entry.clone()));
                return Ok(entry);
            }
        }

        let globs = build_globset(output_globs)
            .map_err(|e| CacheError::InvalidEntry(e.to_string()))?;
        let files = collect_matching_files(self.fs.as_ref(), &self.root, &globs)
            .map_err(|e| CacheError::Io(std::io::Error::other(e.to_string())))?;

        let mut artifact_refs = Vec::with_capacity(files.len());
        let mut builder = tar::Builder::new(Vec::new());
        for rel in &files {
            let contents = self
                .fs
                .read(&self.root.join(rel))
                .map_err(|e| CacheError::Io(std::io::Error::other(e.to_string())))?;
            let portable = rel.to_string_lossy().replace('\\', "/");

            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, &portable, contents.as_slice())?;
            artifact_refs.push(portable);
        }
        let bundle = builder.into_inner()?;

        let object = self.compression.compress(&bundle)?;
        let checksum = blake3::hash(&object).to_hex().to_string();

        let entry = CacheEntry {
            fingerprint: fp.clone(),
            task: task.to_string(),
            artifact_refs,
            region: self.region.clone(),
            compression: self.compression,
            size: object.len() as u64,
            checksum,
            created_at_epoch_secs: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };

        self.store.put_object(&object_key, &object).await?;
        self.store
            .put_object(&meta_key(fp), &serde_json::to_vec_pretty(&entry)?)
            .await?;

        info!(
            task,
            fingerprint = fp.short(),
            files = entry.artifact_refs.len(),
            bytes = entry.size,
            "uploaded artifact bundle"
        );

        self.memo.lock().await.insert(fp.clone(), Some(entry.clone()));
        Ok(entry)
    }

    /// Download and unpack a cached bundle into the workspace.
    ///
    /// The object checksum is verified before anything touches the working
    /// tree.
    pub async fn materialize(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let key = entry.object_key();
        let object = self.store.get_object(&key).await?;

        let actual = blake3::hash(&object).to_hex().to_string();
        if actual != entry.checksum {
            return Err(CacheError::ChecksumMismatch {
                key,
                expected: entry.checksum.clone(),
                actual,
            });
        }

        let bundle = entry.compression.decompress(&object)?;
        let mut archive = tar::Archive::new(bundle.as_slice());
        for file in archive.entries()? {
            let mut file = file?;
            let rel = file.path()?.into_owned();
            let mut contents = Vec::new();
            std::io::Read::read_to_end(&mut file, &mut contents)?;
            self.fs
                .write(&self.root.join(&rel), &contents)
                .map_err(|e| CacheError::Io(std::io::Error::other(e.to_string())))?;
        }

        info!(
            task = %entry.task,
            fingerprint = entry.fingerprint.short(),
            files = entry.artifact_refs.len(),
            "materialized outputs from cache"
        );
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use crate::fs::mock::MockFileSystem;

    use super::testing::MemStore;
    use super::*;

    fn cache_over(fs: MockFileSystem, store: Arc<dyn ObjectStore>) -> ArtifactCache {
        ArtifactCache::new(
            store,
            Arc::new(fs),
            PathBuf::from("/ws"),
            "us-east",
            CompressionChoice::Gzip,
        )
    }

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::from(s.to_string())
    }

    #[tokio::test]
    async fn miss_then_store_then_hit() {
        let fs = MockFileSystem::new();
        fs.add_file("/ws/out/bin", "binary bits");
        let store: Arc<dyn ObjectStore> = Arc::new(MemStore::default());
        let cache = cache_over(fs, store.clone());
        let f = fp("abc123");

        assert!(matches!(cache.lookup(&f).await.unwrap(), CacheLookup::Miss));

        let entry = cache
            .store_outputs(&f, "build", &["out/**".to_string()])
            .await
            .unwrap();
        assert_eq!(entry.artifact_refs, vec!["out/bin".to_string()]);
        assert_eq!(entry.region, "us-east");

        // Fresh cache over the same store sees the entry.
        let cache2 = cache_over(MockFileSystem::new(), store);
        match cache2.lookup(&f).await.unwrap() {
            CacheLookup::Hit(found) => assert_eq!(found, entry),
            CacheLookup::Miss => panic!("expected hit"),
        }
    }

    #[tokio::test]
    async fn materialize_restores_outputs() {
        let producer_fs = MockFileSystem::new();
        producer_fs.add_file("/ws/out/a.txt", "alpha");
        producer_fs.add_file("/ws/out/deep/b.txt", "beta");
        let store: Arc<dyn ObjectStore> = Arc::new(MemStore::default());
        let f = fp("feedface");

        let entry = cache_over(producer_fs, store.clone())
            .store_outputs(&f, "gen", &["out/**".to_string()])
            .await
            .unwrap();

        let consumer_fs = MockFileSystem::new();
        let cache = cache_over(consumer_fs.clone(), store);
        cache.materialize(&entry).await.unwrap();

        assert_eq!(
            consumer_fs.read(std::path::Path::new("/ws/out/a.txt")).unwrap(),
            b"alpha"
        );
        assert_eq!(
            consumer_fs
                .read(std::path::Path::new("/ws/out/deep/b.txt"))
                .unwrap(),
            b"beta"
        );
    }

    #[tokio::test]
    async fn corrupted_object_fails_checksum() {
        let fs = MockFileSystem::new();
        fs.add_file("/ws/out/bin", "payload");
        let store = Arc::new(MemStore::default());
        let f = fp("deadbeef");

        let entry = cache_over(fs, store.clone())
            .store_outputs(&f, "build", &["out/**".to_string()])
            .await
            .unwrap();

        store
            .put_object(&entry.object_key(), b"tampered")
            .await
            .unwrap();

        let err = cache_over(MockFileSystem::new(), store)
            .materialize(&entry)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn store_is_idempotent() {
        let fs = MockFileSystem::new();
        fs.add_file("/ws/out/bin", "same bits");
        let store: Arc<dyn ObjectStore> = Arc::new(MemStore::default());
        let f = fp("0011");

        let first = cache_over(fs.clone(), store.clone())
            .store_outputs(&f, "build", &["out/**".to_string()])
            .await
            .unwrap();
        let second = cache_over(fs, store)
            .store_outputs(&f, "build", &["out/**".to_string()])
            .await
            .unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn retryability_of_cache_errors() {
        assert!(CacheError::Network("timeout".into()).is_retryable());
        assert!(CacheError::Unavailable("503".into()).is_retryable());
        assert!(
            !CacheError::NotFound {
                key: "objects/x".into()
            }
            .is_retryable()
        );
        assert!(
            !CacheError::ChecksumMismatch {
                key: "objects/x".into(),
                expected: "a".into(),
                actual: "b".into(),
            }
            .is_retryable()
        );
    }
}
