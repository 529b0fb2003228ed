// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::{OnFailure, Platform};

/// Top-level graph document as read from a TOML or JSON file.
///
/// ```toml
/// [config]
/// on_failure = "continue"
///
/// [env]
/// RUSTFLAGS = "-Dwarnings"
///
/// [region.eu-west]
/// endpoint = "https://cache-eu.example.com"
/// bucket = "build-cache"
///
/// [task.build]
/// cmd = "cargo build"
/// deps = ["codegen"]
/// ```
///
/// Unknown fields anywhere in the document are a hard error, so
/// configuration drift is caught at load time rather than silently ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawGraphFile {
    /// Global behaviour config from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// Graph-level environment variables from `[env]`.
    ///
    /// Override order at spawn time: process env < graph env < task env.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Remote cache regions from `[region.<name>]`.
    #[serde(default)]
    pub region: BTreeMap<String, RegionConfig>,

    /// All tasks from `[task.<name>]`. Keys are the task names.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// Validated graph document.
///
/// Constructed only through [`TryFrom<RawGraphFile>`], which runs the
/// reference/cycle checks in `config::validate`.
#[derive(Debug, Clone)]
pub struct GraphFile {
    pub config: ConfigSection,
    pub env: BTreeMap<String, String>,
    pub region: BTreeMap<String, RegionConfig>,
    pub task: BTreeMap<String, TaskConfig>,
}

impl GraphFile {
    /// Used by `validate` after all checks pass.
    pub(crate) fn new_unchecked(raw: RawGraphFile) -> Self {
        Self {
            config: raw.config,
            env: raw.env,
            region: raw.region,
            task: raw.task,
        }
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    /// Behaviour when a task fails (`--on-failure` overrides this).
    #[serde(default)]
    pub on_failure: OnFailure,

    /// Replicate cache objects from the primary region to all secondaries
    /// after the run finishes.
    #[serde(default)]
    pub replicate_regions: bool,
}

/// `[region.<name>]` section: a remote cache endpoint.
///
/// Latency/bandwidth are *not* configured here; they are measured by active
/// probing at the start of each run.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegionConfig {
    /// Base URL of the object store, e.g. `https://cache-eu.example.com`.
    pub endpoint: String,

    /// Bucket/container name. Defaults to `rundag-cache`.
    #[serde(default = "default_bucket")]
    pub bucket: String,
}

fn default_bucket() -> String {
    "rundag-cache".to_string()
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    /// The command to execute. Opaque to rundag; dispatched to `sh -c`
    /// (or `cmd /C` on Windows).
    pub cmd: String,

    /// Dependency list: this task waits for all tasks listed here.
    #[serde(default)]
    pub deps: Vec<String>,

    /// Working directory, relative to the workspace root.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Extra environment variables for this task.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// OS tags this task runs on. Absent = run everywhere.
    #[serde(default)]
    pub platforms: Option<Vec<Platform>>,

    /// Glob patterns for the files that feed this task's fingerprint.
    #[serde(default)]
    pub inputs: Option<Vec<String>>,

    /// Glob patterns for the files this task produces (cached on success).
    #[serde(default)]
    pub outputs: Option<Vec<String>>,

    /// Retry policy for flaky commands.
    #[serde(default)]
    pub retry: Option<RetryConfig>,

    /// Resource hints for the scheduler's admission control.
    #[serde(default)]
    pub parallelism: Option<ParallelismConfig>,
}

/// Per-task retry policy, `retry = { ... }`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Per-task parallelism hints, `parallelism = { ... }`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParallelismConfig {
    /// While this task runs, at most this many tasks run in total.
    #[serde(default)]
    pub max_parallel: Option<usize>,

    /// Advisory memory budget in MiB; surfaced in logs and dry-run output.
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,
}
