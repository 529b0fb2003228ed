use std::collections::BTreeMap;

use rundag::config::model::{
    ConfigSection, GraphFile, ParallelismConfig, RawGraphFile, RegionConfig, RetryConfig,
    TaskConfig,
};
use rundag::types::{OnFailure, Platform};

/// Builder for `GraphFile` to simplify test setup.
pub struct GraphFileBuilder {
    raw: RawGraphFile,
}

impl GraphFileBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawGraphFile {
                config: ConfigSection::default(),
                env: BTreeMap::new(),
                region: BTreeMap::new(),
                task: BTreeMap::new(),
            },
        }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.raw.task.insert(name.to_string(), task);
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.raw.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_region(mut self, name: &str, endpoint: &str) -> Self {
        self.raw.region.insert(
            name.to_string(),
            RegionConfig {
                endpoint: endpoint.to_string(),
                bucket: "rundag-cache".to_string(),
            },
        );
        self
    }

    pub fn with_on_failure(mut self, on_failure: OnFailure) -> Self {
        self.raw.config.on_failure = on_failure;
        self
    }

    pub fn with_replication(mut self, enabled: bool) -> Self {
        self.raw.config.replicate_regions = enabled;
        self
    }

    pub fn build(self) -> GraphFile {
        GraphFile::try_from(self.raw).expect("Failed to build valid graph from builder")
    }
}

impl Default for GraphFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            task: TaskConfig {
                cmd: cmd.to_string(),
                deps: vec![],
                working_dir: None,
                env: BTreeMap::new(),
                platforms: None,
                inputs: None,
                outputs: None,
                retry: None,
                parallelism: None,
            },
        }
    }

    pub fn dep(mut self, dep: &str) -> Self {
        self.task.deps.push(dep.to_string());
        self
    }

    pub fn working_dir(mut self, dir: &str) -> Self {
        self.task.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.task.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn platform(mut self, platform: Platform) -> Self {
        self.task.platforms.get_or_insert_with(Vec::new).push(platform);
        self
    }

    pub fn input(mut self, pattern: &str) -> Self {
        self.task
            .inputs
            .get_or_insert_with(Vec::new)
            .push(pattern.to_string());
        self
    }

    pub fn output(mut self, pattern: &str) -> Self {
        self.task
            .outputs
            .get_or_insert_with(Vec::new)
            .push(pattern.to_string());
        self
    }

    pub fn retry(mut self, max_attempts: u32, initial_delay_ms: u64) -> Self {
        self.task.retry = Some(RetryConfig {
            max_attempts,
            initial_delay_ms,
            ..RetryConfig::default()
        });
        self
    }

    pub fn max_parallel(mut self, k: usize) -> Self {
        let parallelism = self.task.parallelism.get_or_insert_with(ParallelismConfig::default);
        parallelism.max_parallel = Some(k);
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
