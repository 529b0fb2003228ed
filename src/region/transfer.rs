// src/region/transfer.rs

//! Resumable chunked object transfer.
//!
//! Objects above a size threshold are copied in fixed-size chunks, with a
//! JSON checkpoint persisted after every chunk. An interrupted transfer
//! resumes from the checkpoint and fetches only the chunks it is missing.
//! On completion the assembled bytes are checksum-verified before they are
//! written to the destination; a mismatch discards the staging data and
//! restarts from chunk zero.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, ObjectStore};

/// Objects at or above this size go through the chunked path.
pub const CHUNK_THRESHOLD: u64 = 4 * 1024 * 1024;
/// Range-request size for chunked transfers.
pub const CHUNK_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Started,
    InProgress,
    Completed,
    Failed,
}

/// Checkpoint state of one chunked transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferJob {
    /// Stable identifier derived from the (source, target, key) triple.
    pub id: String,
    pub key: String,
    pub source_region: String,
    pub target_region: String,
    pub total_bytes: u64,
    pub chunk_size: u64,
    pub total_chunks: u64,
    /// Next chunk to fetch; chunks below this index are already staged.
    pub current_chunk: u64,
    pub transferred_bytes: u64,
    pub status: TransferStatus,
    /// blake3 of the complete object, when known up front.
    pub expected_checksum: Option<String>,
}

impl TransferJob {
    fn new(
        key: &str,
        source_region: &str,
        target_region: &str,
        total_bytes: u64,
        chunk_size: u64,
        expected_checksum: Option<String>,
    ) -> Self {
        let id = blake3::hash(format!("{source_region}:{target_region}:{key}").as_bytes())
            .to_hex()
            .as_str()[..16]
            .to_string();
        Self {
            id,
            key: key.to_string(),
            source_region: source_region.to_string(),
            target_region: target_region.to_string(),
            total_bytes,
            chunk_size,
            total_chunks: total_bytes.div_ceil(chunk_size),
            current_chunk: 0,
            transferred_bytes: 0,
            status: TransferStatus::Started,
            expected_checksum,
        }
    }
}

/// How a completed transfer went, for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOutcome {
    pub bytes: u64,
    /// Chunks fetched in this invocation (0 for the small-object path means
    /// the object moved in one piece).
    pub chunks_fetched: u64,
    /// Whether a previous checkpoint was picked up.
    pub resumed: bool,
}

/// Moves objects between stores, checkpointing large ones.
#[derive(Debug)]
pub struct TransferManager {
    state_dir: PathBuf,
    chunk_size: u64,
    threshold: u64,
}

impl TransferManager {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            chunk_size: CHUNK_SIZE,
            threshold: CHUNK_THRESHOLD,
        }
    }

    /// Override chunk geometry, mainly for tests.
    pub fn with_geometry(mut self, chunk_size: u64, threshold: u64) -> Self {
        self.chunk_size = chunk_size;
        self.threshold = threshold;
        self
    }

    fn slug(key: &str) -> String {
        key.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect()
    }

    fn checkpoint_path(&self, key: &str) -> PathBuf {
        self.state_dir.join(format!("{}.transfer.json", Self::slug(key)))
    }

    fn staging_path(&self, key: &str) -> PathBuf {
        self.state_dir.join(format!("{}.part", Self::slug(key)))
    }

    /// Copy `key` from `src` to `dst`.
    ///
    /// `expected_checksum` is the blake3 of the object when the caller
    /// knows it (cache entries record it); `None` skips verification.
    pub async fn transfer(
        &self,
        src: &dyn ObjectStore,
        dst: &dyn ObjectStore,
        key: &str,
        expected_checksum: Option<&str>,
    ) -> Result<TransferOutcome, CacheError> {
        let total = src.object_size(key).await?;

        if total < self.threshold {
            let data = src.get_object(key).await?;
            verify_checksum(key, &data, expected_checksum)?;
            dst.put_object(key, &data).await?;
            return Ok(TransferOutcome {
                bytes: total,
                chunks_fetched: 0,
                resumed: false,
            });
        }

        fs::create_dir_all(&self.state_dir).await?;

        let mut restarted_once = false;
        loop {
            let outcome = self
                .run_chunked(src, dst, key, total, expected_checksum)
                .await?;
            match outcome {
                ChunkedResult::Done {
                    data,
                    chunks_fetched,
                    resumed,
                } => {
                    dst.put_object(key, &data).await?;
                    self.clear_state(key).await;
                    info!(key, bytes = total, chunks_fetched, resumed, "transfer complete");
                    return Ok(TransferOutcome {
                        bytes: total,
                        chunks_fetched,
                        resumed,
                    });
                }
                ChunkedResult::ChecksumMismatch { expected, actual } => {
                    self.clear_state(key).await;
                    if restarted_once {
                        return Err(CacheError::ChecksumMismatch {
                            key: key.to_string(),
                            expected,
                            actual,
                        });
                    }
                    warn!(key, "assembled object failed verification; restarting transfer");
                    restarted_once = true;
                }
            }
        }
    }

    async fn run_chunked(
        &self,
        src: &dyn ObjectStore,
        dst: &dyn ObjectStore,
        key: &str,
        total: u64,
        expected_checksum: Option<&str>,
    ) -> Result<ChunkedResult, CacheError> {
        let (mut job, resumed) = self
            .load_or_new(key, &src.location(), &dst.location(), total, expected_checksum)
            .await;
        let staging = self.staging_path(key);

        if !resumed {
            // Fresh transfer; make sure no stale staging data survives.
            let _ = fs::remove_file(&staging).await;
        }
        if resumed {
            debug!(
                key,
                transfer_id = %job.id,
                from_chunk = job.current_chunk,
                total_chunks = job.total_chunks,
                "resuming transfer from checkpoint"
            );
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&staging)
            .await?;

        let mut chunks_fetched = 0;
        while job.current_chunk < job.total_chunks {
            let offset = job.current_chunk * job.chunk_size;
            let len = job.chunk_size.min(total - offset);
            let chunk = match src.get_object_range(key, offset, len).await {
                Ok(chunk) if chunk.len() as u64 == len => chunk,
                Ok(chunk) => {
                    self.mark_failed(&mut job).await;
                    return Err(CacheError::Network(format!(
                        "{key}: short range read ({} of {len} bytes at offset {offset})",
                        chunk.len()
                    )));
                }
                Err(e) => {
                    self.mark_failed(&mut job).await;
                    return Err(e);
                }
            };

            file.write_all(&chunk).await?;
            file.flush().await?;
            chunks_fetched += 1;

            job.current_chunk += 1;
            job.transferred_bytes += len;
            job.status = TransferStatus::InProgress;
            self.save_checkpoint(&job).await?;
        }
        drop(file);

        let data = fs::read(&staging).await?;
        match verify_checksum(key, &data, expected_checksum) {
            Ok(()) => {
                job.status = TransferStatus::Completed;
                self.save_checkpoint(&job).await?;
                Ok(ChunkedResult::Done {
                    data,
                    chunks_fetched,
                    resumed,
                })
            }
            Err(CacheError::ChecksumMismatch { expected, actual, .. }) => {
                self.mark_failed(&mut job).await;
                Ok(ChunkedResult::ChecksumMismatch { expected, actual })
            }
            Err(e) => Err(e),
        }
    }

    /// Persist a terminal failure marker. Staged chunks stay valid, so a
    /// later invocation can still resume from this checkpoint.
    async fn mark_failed(&self, job: &mut TransferJob) {
        job.status = TransferStatus::Failed;
        let _ = self.save_checkpoint(job).await;
    }

    /// Existing compatible checkpoint, or a fresh job.
    async fn load_or_new(
        &self,
        key: &str,
        source_region: &str,
        target_region: &str,
        total: u64,
        expected_checksum: Option<&str>,
    ) -> (TransferJob, bool) {
        let path = self.checkpoint_path(key);
        if let Ok(bytes) = fs::read(&path).await {
            if let Ok(mut job) = serde_json::from_slice::<TransferJob>(&bytes) {
                let compatible = job.key == key
                    && job.source_region == source_region
                    && job.target_region == target_region
                    && job.total_bytes == total
                    && job.chunk_size == self.chunk_size
                    && job.status != TransferStatus::Completed
                    && job.expected_checksum.as_deref() == expected_checksum;
                if compatible && fs::try_exists(self.staging_path(key)).await.unwrap_or(false) {
                    job.status = TransferStatus::InProgress;
                    return (job, true);
                }
            }
        }
        (
            TransferJob::new(
                key,
                source_region,
                target_region,
                total,
                self.chunk_size,
                expected_checksum.map(String::from),
            ),
            false,
        )
    }

    async fn save_checkpoint(&self, job: &TransferJob) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec_pretty(job)?;
        fs::write(self.checkpoint_path(&job.key), bytes).await?;
        Ok(())
    }

    async fn clear_state(&self, key: &str) {
        let _ = fs::remove_file(self.checkpoint_path(key)).await;
        let _ = fs::remove_file(self.staging_path(key)).await;
    }
}

enum ChunkedResult {
    Done {
        data: Vec<u8>,
        chunks_fetched: u64,
        resumed: bool,
    },
    ChecksumMismatch {
        expected: String,
        actual: String,
    },
}

fn verify_checksum(key: &str, data: &[u8], expected: Option<&str>) -> Result<(), CacheError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let actual = blake3::hash(data).to_hex().to_string();
    if actual == expected {
        Ok(())
    } else {
        Err(CacheError::ChecksumMismatch {
            key: key.to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;
    use crate::cache::testing::MemStore;

    use super::*;

    /// Wraps a MemStore, recording range-request offsets and optionally
    /// failing after a set number of range reads.
    #[derive(Debug)]
    struct FlakySource {
        inner: MemStore,
        range_offsets: std::sync::Mutex<Vec<u64>>,
        fail_after: AtomicU64,
    }

    impl FlakySource {
        fn new() -> Self {
            Self {
                inner: MemStore::default(),
                range_offsets: std::sync::Mutex::new(Vec::new()),
                fail_after: AtomicU64::new(u64::MAX),
            }
        }

        fn offsets(&self) -> Vec<u64> {
            self.range_offsets.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ObjectStore for FlakySource {
        async fn get_object(&self, key: &str) -> Result<Vec<u8>, CacheError> {
            self.inner.get_object(key).await
        }

        async fn get_object_range(
            &self,
            key: &str,
            offset: u64,
            len: u64,
        ) -> Result<Vec<u8>, CacheError> {
            if self.fail_after.fetch_sub(1, Ordering::SeqCst) == 0 {
                self.fail_after.store(u64::MAX, Ordering::SeqCst);
                return Err(CacheError::Network("link dropped".into()));
            }
            self.range_offsets.lock().unwrap().push(offset);
            self.inner.get_object_range(key, offset, len).await
        }

        async fn put_object(&self, key: &str, data: &[u8]) -> Result<(), CacheError> {
            self.inner.put_object(key, data).await
        }

        async fn exists(&self, key: &str) -> Result<bool, CacheError> {
            self.inner.exists(key).await
        }

        async fn object_size(&self, key: &str) -> Result<u64, CacheError> {
            self.inner.object_size(key).await
        }

        async fn list(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
            self.inner.list(prefix).await
        }

        fn location(&self) -> String {
            "flaky://".to_string()
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn manager(dir: &Path) -> TransferManager {
        // 16-byte chunks over a 64-byte threshold keep the tests tiny.
        TransferManager::new(dir).with_geometry(16, 64)
    }

    #[tokio::test]
    async fn small_objects_move_in_one_piece() {
        let dir = tempfile::tempdir().unwrap();
        let src = FlakySource::new();
        let dst = MemStore::default();
        src.put_object("objects/small", b"tiny").await.unwrap();

        let outcome = manager(dir.path())
            .transfer(&src, &dst, "objects/small", None)
            .await
            .unwrap();

        assert_eq!(outcome.chunks_fetched, 0);
        assert!(!outcome.resumed);
        assert_eq!(dst.get_object("objects/small").await.unwrap(), b"tiny");
        // No range requests on the small path.
        assert!(src.offsets().is_empty());
    }

    #[tokio::test]
    async fn large_objects_move_in_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let src = FlakySource::new();
        let dst = MemStore::default();
        let data = payload(100);
        let checksum = blake3::hash(&data).to_hex().to_string();
        src.put_object("objects/big", &data).await.unwrap();

        let outcome = manager(dir.path())
            .transfer(&src, &dst, "objects/big", Some(&checksum))
            .await
            .unwrap();

        // 100 bytes in 16-byte chunks: 7 chunks, last one short.
        assert_eq!(outcome.chunks_fetched, 7);
        assert_eq!(dst.get_object("objects/big").await.unwrap(), data);
        assert_eq!(src.offsets(), vec![0, 16, 32, 48, 64, 80, 96]);
    }

    #[tokio::test]
    async fn interrupted_transfer_resumes_from_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let src = FlakySource::new();
        let dst = MemStore::default();
        let data = payload(100);
        let checksum = blake3::hash(&data).to_hex().to_string();
        src.put_object("objects/big", &data).await.unwrap();

        // Drop the link after 3 successful chunk reads.
        src.fail_after.store(3, Ordering::SeqCst);
        let err = manager(dir.path())
            .transfer(&src, &dst, "objects/big", Some(&checksum))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Network(_)));
        assert_eq!(src.offsets(), vec![0, 16, 32]);

        // The persisted checkpoint records the full job state.
        let checkpoint = std::fs::read(dir.path().join("objects_big.transfer.json")).unwrap();
        let job: TransferJob = serde_json::from_slice(&checkpoint).unwrap();
        assert!(!job.id.is_empty());
        assert_eq!(job.source_region, src.location());
        assert_eq!(job.target_region, dst.location());
        assert_eq!(job.status, TransferStatus::Failed);
        assert_eq!(job.current_chunk, 3);
        assert_eq!(job.total_chunks, 7);
        assert_eq!(job.transferred_bytes, 48);

        // Second invocation picks up the checkpoint and fetches only the
        // remaining chunks.
        let outcome = manager(dir.path())
            .transfer(&src, &dst, "objects/big", Some(&checksum))
            .await
            .unwrap();

        assert!(outcome.resumed);
        assert_eq!(outcome.chunks_fetched, 4);
        assert_eq!(src.offsets(), vec![0, 16, 32, 48, 64, 80, 96]);
        assert_eq!(dst.get_object("objects/big").await.unwrap(), data);
    }

    #[tokio::test]
    async fn checksum_mismatch_restarts_from_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let src = FlakySource::new();
        let dst = MemStore::default();
        let data = payload(100);
        src.put_object("objects/big", &data).await.unwrap();

        let wrong = blake3::hash(b"other data").to_hex().to_string();
        let err = manager(dir.path())
            .transfer(&src, &dst, "objects/big", Some(&wrong))
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::ChecksumMismatch { .. }));
        // One full pass, then one restart pass.
        assert_eq!(src.offsets().len(), 14);
        assert!(!dst.exists("objects/big").await.unwrap());
    }

    #[tokio::test]
    async fn completed_transfer_leaves_no_state_behind() {
        let dir = tempfile::tempdir().unwrap();
        let src = FlakySource::new();
        let dst = MemStore::default();
        let data = payload(100);
        src.put_object("objects/big", &data).await.unwrap();

        manager(dir.path())
            .transfer(&src, &dst, "objects/big", None)
            .await
            .unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }
}
