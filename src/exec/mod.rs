// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for actually running the commands defined in
//! the tasks, using `tokio::process::Command`, and reporting back to the
//! orchestration runtime via `RuntimeEvent`s.
//!
//! - [`backend`] provides the `ExecutorBackend` trait and a concrete
//!   `RealExecutorBackend` that the runtime uses in production, and which
//!   tests can replace with a fake implementation.
//! - [`executor_loop`] owns the worker pool that bounds task concurrency.
//! - [`task_runner`] runs one task end to end: platform filter, fingerprint,
//!   cache lookup, retried process execution, cache upload.
//! - [`retry`] is the backoff controller shared with the cache layer.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::ArtifactCache;
use crate::fingerprint::FingerprintEngine;
use crate::types::Platform;

pub mod backend;
pub mod executor_loop;
pub mod retry;
pub mod task_runner;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use executor_loop::{ExecutorMsg, spawn_executor};
pub use retry::{AttemptLog, RetryPolicy, Retryable, attempt};

/// Everything a task runner needs besides the task itself.
#[derive(Debug)]
pub struct ExecContext {
    /// Platform of the machine running this process.
    pub host: Platform,
    /// Workspace root; relative `working_dir`s resolve against it.
    pub workspace_root: PathBuf,
    /// Graph-level env, overridden by task-level entries at spawn time.
    pub graph_env: BTreeMap<String, String>,
    pub fingerprints: Arc<FingerprintEngine>,
    pub cache: Arc<ArtifactCache>,
}
