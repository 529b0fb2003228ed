// src/region/probe.rs

//! Active region probing.

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use super::Region;

/// Result of probing one region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeSample {
    pub latency_ms: f64,
    pub bandwidth_mbps: f64,
    pub healthy: bool,
}

impl ProbeSample {
    pub fn unreachable() -> Self {
        Self {
            latency_ms: f64::MAX,
            bandwidth_mbps: 0.0,
            healthy: false,
        }
    }
}

/// Measures link quality to a region. Faked in tests.
#[async_trait]
pub trait RegionProber: Send + Sync + fmt::Debug {
    async fn probe(&self, region: &Region) -> ProbeSample;
}

/// Payload size for the bandwidth sample. Small enough to be cheap at run
/// start, large enough to not be dominated by the round trip.
const PROBE_PAYLOAD_BYTES: usize = 128 * 1024;

/// Probes over HTTP: one HEAD round trip for latency, one probe-object
/// upload for bandwidth.
#[derive(Debug)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new() -> Result<Self, crate::cache::CacheError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(3))
            .build()
            .map_err(|e| crate::cache::CacheError::Network(e.to_string()))?;
        Ok(Self { client })
    }

    async fn sample(&self, region: &Region) -> Result<ProbeSample, reqwest::Error> {
        let base = format!(
            "{}/{}",
            region.endpoint.trim_end_matches('/'),
            region.bucket
        );

        let started = Instant::now();
        self.client
            .head(&base)
            .send()
            .await?
            .error_for_status()?;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let payload = vec![0u8; PROBE_PAYLOAD_BYTES];
        let started = Instant::now();
        self.client
            .put(format!("{base}/probe/sample"))
            .body(payload)
            .send()
            .await?
            .error_for_status()?;
        let secs = started.elapsed().as_secs_f64().max(1e-6);
        let bandwidth_mbps = (PROBE_PAYLOAD_BYTES as f64 * 8.0) / secs / 1_000_000.0;

        Ok(ProbeSample {
            latency_ms,
            bandwidth_mbps,
            healthy: true,
        })
    }
}

#[async_trait]
impl RegionProber for HttpProber {
    async fn probe(&self, region: &Region) -> ProbeSample {
        match self.sample(region).await {
            Ok(sample) => {
                debug!(
                    region = region.name,
                    latency_ms = sample.latency_ms,
                    bandwidth_mbps = sample.bandwidth_mbps,
                    "region probe"
                );
                sample
            }
            Err(e) => {
                debug!(region = region.name, error = %e, "region unreachable");
                ProbeSample::unreachable()
            }
        }
    }
}

/// Fixed samples keyed by region name, for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct StaticProber {
    pub samples: std::collections::HashMap<String, ProbeSample>,
}

#[cfg(test)]
#[async_trait]
impl RegionProber for StaticProber {
    async fn probe(&self, region: &Region) -> ProbeSample {
        self.samples
            .get(&region.name)
            .copied()
            .unwrap_or_else(ProbeSample::unreachable)
    }
}
