// src/region/sync.rs

//! Post-run cross-region replication.
//!
//! Runs after task execution so it never stalls the build. Replication is
//! eventually consistent: objects are copied primary-to-secondary,
//! skip-if-exists, with no locking. Content addressing makes last-write-wins
//! safe (two writers of the same key wrote the same bytes).

use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::{CacheEntry, CacheError, ObjectStore, meta_key};

use super::transfer::TransferManager;

/// Per-secondary replication counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub copied: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SyncReport {
    pub fn merge(&mut self, other: &SyncReport) {
        self.copied += other.copied;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Replicate every cached artifact from `primary` into each secondary.
///
/// Failures are counted, logged and otherwise swallowed; replication is
/// best-effort by design of the cache (any region can be rebuilt from any
/// other).
pub async fn sync_regions(
    primary: &dyn ObjectStore,
    secondaries: &[(String, Arc<dyn ObjectStore>)],
    transfers: &TransferManager,
) -> SyncReport {
    let mut report = SyncReport::default();

    let meta_keys = match primary.list("meta/").await {
        Ok(keys) => keys,
        Err(e) => {
            warn!(error = %e, "cannot list primary region; skipping replication");
            return report;
        }
    };

    for (name, secondary) in secondaries {
        let mut per_region = SyncReport::default();
        for key in &meta_keys {
            match replicate_entry(primary, secondary.as_ref(), key, transfers).await {
                Ok(true) => per_region.copied += 1,
                Ok(false) => per_region.skipped += 1,
                Err(e) => {
                    warn!(region = name, key, error = %e, "replication failed");
                    per_region.failed += 1;
                }
            }
        }
        info!(
            region = name,
            copied = per_region.copied,
            skipped = per_region.skipped,
            failed = per_region.failed,
            "region sync finished"
        );
        report.merge(&per_region);
    }

    report
}

/// Copy one entry (object + metadata) if the secondary lacks it.
///
/// Returns whether anything was copied.
async fn replicate_entry(
    primary: &dyn ObjectStore,
    secondary: &dyn ObjectStore,
    meta_key_str: &str,
    transfers: &TransferManager,
) -> Result<bool, CacheError> {
    let meta_bytes = primary.get_object(meta_key_str).await?;
    let entry: CacheEntry = serde_json::from_slice(&meta_bytes)?;
    let object_key = entry.object_key();

    if secondary.exists(&object_key).await? {
        return Ok(false);
    }

    // Object first; a reader that sees metadata expects the object to be
    // there.
    transfers
        .transfer(primary, secondary, &object_key, Some(&entry.checksum))
        .await?;
    secondary
        .put_object(&meta_key(&entry.fingerprint), &meta_bytes)
        .await?;
    Ok(true)
}
