// src/region/mod.rs

//! Multi-region cache routing.
//!
//! Regions come from the `[region.<name>]` tables of the graph document.
//! At run start each region is probed for latency and bandwidth; the router
//! ranks them and walks the resulting chain on every cache operation,
//! degrading to the local store when no remote region responds.

use crate::config::model::RegionConfig;

pub mod probe;
pub mod router;
pub mod sync;
pub mod transfer;

pub use probe::{ProbeSample, RegionProber};
pub use router::RegionRouter;
pub use sync::{SyncReport, sync_regions};
pub use transfer::{TransferManager, TransferOutcome};

/// One remote cache region and its last measured link quality.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub name: String,
    pub endpoint: String,
    pub bucket: String,
    pub latency_ms: f64,
    pub bandwidth_mbps: f64,
    pub healthy: bool,
}

impl Region {
    pub fn from_config(name: impl Into<String>, cfg: &RegionConfig) -> Self {
        Self {
            name: name.into(),
            endpoint: cfg.endpoint.clone(),
            bucket: cfg.bucket.clone(),
            latency_ms: 0.0,
            bandwidth_mbps: 0.0,
            healthy: true,
        }
    }

    /// Routing score, lower is better.
    ///
    /// Latency is normalized against a 1s ceiling and weighted 0.4;
    /// bandwidth shortfall below 100 Mbps is weighted 0.6.
    pub fn score(&self) -> f64 {
        let latency = (self.latency_ms / 1000.0).clamp(0.0, 1.0);
        let bandwidth_shortfall = ((100.0 - self.bandwidth_mbps) / 100.0).clamp(0.0, 1.0);
        0.4 * latency + 0.6 * bandwidth_shortfall
    }
}
