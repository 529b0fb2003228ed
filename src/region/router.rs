// src/region/router.rs

//! Region chain routing for cache operations.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, ObjectStore};
use crate::exec::retry::{Retryable, RetryPolicy};

use super::probe::RegionProber;
use super::Region;

/// Backoff between attempts against a single region endpoint. Separate
/// from task-level retry.
fn endpoint_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(200),
        max_delay: Duration::from_millis(2_000),
        backoff_multiplier: 2.0,
    }
}

struct RegionSlot {
    region: Region,
    store: Arc<dyn ObjectStore>,
}

impl fmt::Debug for RegionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionSlot")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// Routes cache operations across ranked regions with a local fallback.
///
/// Reads walk the chain primary-first and return the first hit. Writes
/// always land in the local store and are then pushed to the primary; a
/// write that reaches no remote region degrades to local-only and is not an
/// error.
#[derive(Debug)]
pub struct RegionRouter {
    slots: RwLock<Vec<RegionSlot>>,
    local: Arc<dyn ObjectStore>,
}

impl RegionRouter {
    pub fn new(
        regions: Vec<(Region, Arc<dyn ObjectStore>)>,
        local: Arc<dyn ObjectStore>,
    ) -> Self {
        let slots = regions
            .into_iter()
            .map(|(region, store)| RegionSlot { region, store })
            .collect();
        Self {
            slots: RwLock::new(slots),
            local,
        }
    }

    /// Probe every region and re-rank the chain.
    ///
    /// `PRIMARY_CACHE` pins the named region to the front regardless of its
    /// score; `BUILD_REGION` wins score ties. Unhealthy regions sink to the
    /// back and are skipped by the chain walk.
    pub async fn refresh(&self, prober: &dyn RegionProber) {
        let regions: Vec<Region> = {
            let slots = self.slots.read().expect("region table lock poisoned");
            slots.iter().map(|s| s.region.clone()).collect()
        };

        let mut samples = Vec::with_capacity(regions.len());
        for region in &regions {
            samples.push((region.name.clone(), prober.probe(region).await));
        }

        let pinned = std::env::var("PRIMARY_CACHE").ok();
        let preferred = std::env::var("BUILD_REGION").ok();

        let mut slots = self.slots.write().expect("region table lock poisoned");
        for slot in slots.iter_mut() {
            if let Some((_, sample)) = samples.iter().find(|(name, _)| *name == slot.region.name) {
                slot.region.latency_ms = sample.latency_ms;
                slot.region.bandwidth_mbps = sample.bandwidth_mbps;
                slot.region.healthy = sample.healthy;
            }
        }

        slots.sort_by(|a, b| {
            let rank = |slot: &RegionSlot| {
                let pin = pinned.as_deref() == Some(slot.region.name.as_str());
                let tie_break = preferred.as_deref() == Some(slot.region.name.as_str());
                (
                    !slot.region.healthy,
                    !pin,
                    slot.region.score(),
                    !tie_break,
                )
            };
            rank(a)
                .partial_cmp(&rank(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if let Some(primary) = slots.first() {
            info!(
                primary = %primary.region.name,
                healthy = primary.region.healthy,
                latency_ms = primary.region.latency_ms,
                bandwidth_mbps = primary.region.bandwidth_mbps,
                "region chain refreshed"
            );
        }
    }

    /// Current primary region, if any healthy region exists.
    pub fn primary(&self) -> Option<Region> {
        let slots = self.slots.read().expect("region table lock poisoned");
        slots
            .iter()
            .find(|s| s.region.healthy)
            .map(|s| s.region.clone())
    }

    /// Healthy chain, primary first, paired stores.
    fn chain(&self) -> Vec<(String, Arc<dyn ObjectStore>)> {
        let slots = self.slots.read().expect("region table lock poisoned");
        slots
            .iter()
            .filter(|s| s.region.healthy)
            .map(|s| (s.region.name.clone(), Arc::clone(&s.store)))
            .collect()
    }

    /// Run one operation against one region, with bounded backoff for
    /// transient errors.
    async fn try_region<T, F, Fut>(&self, name: &str, op: F) -> Result<T, CacheError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CacheError>> + Send,
    {
        let policy = endpoint_policy();
        let mut attempts = 0;
        loop {
            attempts += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempts < policy.max_attempts => {
                    let delay = policy.delay_before(attempts + 1);
                    debug!(region = name, attempts, delay_ms = delay.as_millis() as u64, "region retry");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ObjectStore for RegionRouter {
    async fn get_object(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        for (name, store) in self.chain() {
            match self.try_region(&name, || store.get_object(key)).await {
                Ok(data) => return Ok(data),
                Err(CacheError::NotFound { .. }) => {}
                Err(e) => {
                    warn!(region = name, key, error = %e, "region read failed; falling back");
                }
            }
        }
        self.local.get_object(key).await
    }

    async fn get_object_range(
        &self,
        key: &str,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>, CacheError> {
        for (name, store) in self.chain() {
            match self
                .try_region(&name, || store.get_object_range(key, offset, len))
                .await
            {
                Ok(data) => return Ok(data),
                Err(CacheError::NotFound { .. }) => {}
                Err(e) => {
                    warn!(region = name, key, error = %e, "region range read failed");
                }
            }
        }
        self.local.get_object_range(key, offset, len).await
    }

    async fn put_object(&self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        // Local first so a remote outage never loses the artifact.
        self.local.put_object(key, data).await?;

        for (name, store) in self.chain() {
            match self.try_region(&name, || store.put_object(key, data)).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(region = name, key, error = %e, "region write failed; trying next");
                }
            }
        }

        if !self.chain().is_empty() {
            warn!(key, "no region accepted the write; kept local copy only");
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        for (name, store) in self.chain() {
            match self.try_region(&name, || store.exists(key)).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => {
                    warn!(region = name, key, error = %e, "region existence check failed");
                }
            }
        }
        self.local.exists(key).await
    }

    async fn object_size(&self, key: &str) -> Result<u64, CacheError> {
        for (name, store) in self.chain() {
            match self.try_region(&name, || store.object_size(key)).await {
                Ok(size) => return Ok(size),
                Err(CacheError::NotFound { .. }) => {}
                Err(e) => {
                    warn!(region = name, key, error = %e, "region size check failed");
                }
            }
        }
        self.local.object_size(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        for (name, store) in self.chain() {
            match self.try_region(&name, || store.list(prefix)).await {
                Ok(keys) => return Ok(keys),
                Err(e) => {
                    warn!(region = name, prefix, error = %e, "region listing failed");
                }
            }
        }
        self.local.list(prefix).await
    }

    fn location(&self) -> String {
        let slots = self.slots.read().expect("region table lock poisoned");
        let names: Vec<&str> = slots.iter().map(|s| s.region.name.as_str()).collect();
        format!("router[{}]+{}", names.join(","), self.local.location())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::cache::testing::MemStore;
    use crate::region::probe::{ProbeSample, StaticProber};

    use super::*;

    fn region(name: &str) -> Region {
        Region {
            name: name.to_string(),
            endpoint: format!("https://{name}.example"),
            bucket: "rundag-cache".to_string(),
            latency_ms: 0.0,
            bandwidth_mbps: 0.0,
            healthy: true,
        }
    }

    fn sample(latency_ms: f64, bandwidth_mbps: f64) -> ProbeSample {
        ProbeSample {
            latency_ms,
            bandwidth_mbps,
            healthy: true,
        }
    }

    fn router_with(
        names: &[&str],
    ) -> (RegionRouter, HashMap<String, Arc<MemStore>>, Arc<MemStore>) {
        let mut stores = HashMap::new();
        let mut regions: Vec<(Region, Arc<dyn ObjectStore>)> = Vec::new();
        for name in names {
            let store = Arc::new(MemStore::default());
            stores.insert(name.to_string(), Arc::clone(&store));
            regions.push((region(name), store));
        }
        let local = Arc::new(MemStore::default());
        let router = RegionRouter::new(regions, Arc::clone(&local) as Arc<dyn ObjectStore>);
        (router, stores, local)
    }

    #[tokio::test]
    async fn refresh_ranks_by_score() {
        let (router, _, _) = router_with(&["far", "near"]);
        let prober = StaticProber {
            samples: HashMap::from([
                ("far".to_string(), sample(300.0, 20.0)),
                ("near".to_string(), sample(5.0, 400.0)),
            ]),
        };

        router.refresh(&prober).await;
        assert_eq!(router.primary().unwrap().name, "near");
    }

    #[tokio::test]
    async fn primary_cache_env_pins_primary() {
        let (router, _, _) = router_with(&["far", "near"]);
        let prober = StaticProber {
            samples: HashMap::from([
                ("far".to_string(), sample(300.0, 20.0)),
                ("near".to_string(), sample(5.0, 400.0)),
            ]),
        };

        // Env-dependent tests share process env; set and clean up.
        unsafe { std::env::set_var("PRIMARY_CACHE", "far") };
        router.refresh(&prober).await;
        unsafe { std::env::remove_var("PRIMARY_CACHE") };

        assert_eq!(router.primary().unwrap().name, "far");
    }

    #[tokio::test]
    async fn unreachable_region_sinks_and_reads_fall_back() {
        let (router, stores, _) = router_with(&["a", "b"]);
        stores["b"]
            .put_object("objects/x", b"from-b")
            .await
            .unwrap();

        let prober = StaticProber {
            samples: HashMap::from([
                ("a".to_string(), ProbeSample::unreachable()),
                ("b".to_string(), sample(50.0, 80.0)),
            ]),
        };
        router.refresh(&prober).await;

        assert_eq!(router.primary().unwrap().name, "b");
        assert_eq!(router.get_object("objects/x").await.unwrap(), b"from-b");
    }

    #[tokio::test(start_paused = true)]
    async fn dead_primary_mid_run_falls_through_to_secondary() {
        let (router, stores, _) = router_with(&["a", "b"]);
        let prober = StaticProber {
            samples: HashMap::from([
                ("a".to_string(), sample(5.0, 500.0)),
                ("b".to_string(), sample(50.0, 200.0)),
            ]),
        };
        router.refresh(&prober).await;
        assert_eq!(router.primary().unwrap().name, "a");

        stores["b"]
            .put_object("objects/x", b"replica")
            .await
            .unwrap();
        stores["a"].set_offline(true);

        // Probe said healthy, but the endpoint died afterwards; the chain
        // walk absorbs it.
        assert_eq!(router.get_object("objects/x").await.unwrap(), b"replica");
    }

    #[tokio::test(start_paused = true)]
    async fn writes_land_locally_even_when_all_regions_fail() {
        let (router, stores, local) = router_with(&["a"]);
        let prober = StaticProber {
            samples: HashMap::from([("a".to_string(), sample(5.0, 500.0))]),
        };
        router.refresh(&prober).await;
        stores["a"].set_offline(true);

        router.put_object("objects/x", b"bits").await.unwrap();
        assert_eq!(local.get_object("objects/x").await.unwrap(), b"bits");

        stores["a"].set_offline(false);
        assert!(!stores["a"].exists("objects/x").await.unwrap());
        // Local fallback still serves the read.
        assert_eq!(router.get_object("objects/x").await.unwrap(), b"bits");
    }

    #[tokio::test]
    async fn miss_everywhere_is_not_found() {
        let (router, _, _) = router_with(&["a"]);
        let err = router.get_object("objects/absent").await.unwrap_err();
        assert!(matches!(err, CacheError::NotFound { .. }));
    }
}
