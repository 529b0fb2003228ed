// src/dag/task_info.rs

//! Task metadata and per-run state management.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::model::{ParallelismConfig, RetryConfig, TaskConfig};
use crate::engine::TaskName;
use crate::types::Platform;

/// Per-run state of a task (internal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Waiting on dependencies (in-degree > 0) or on dispatch.
    Pending,
    /// Dispatched to the executor and currently running.
    Running,
    /// Command exited successfully (or succeeded after retries).
    Succeeded,
    /// Fingerprint matched a stored artifact; command never executed.
    CacheHit,
    /// Platform filter excluded this task on the current host. Counts as
    /// success for dependents.
    SkippedPlatform,
    /// Command failed after exhausting its retry policy.
    Failed,
    /// An upstream dependency failed; this task never started.
    FailedUpstream,
    /// The run was stopped (`--on-failure stop` or shutdown) before this
    /// task could start.
    Abandoned,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunState::Pending | RunState::Running)
    }

    /// Terminal states that satisfy dependents.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::CacheHit | RunState::SkippedPlatform
        )
    }
}

/// Public, read-only view of a task's per-run state.
///
/// This is exposed for reporting and tests without leaking the internal
/// `RunState` type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRunState {
    /// The task is not participating in this run.
    NotInRun,
    Pending,
    Running,
    Succeeded,
    CacheHit,
    SkippedPlatform,
    Failed,
    FailedUpstream,
    Abandoned,
}

impl From<Option<RunState>> for TaskRunState {
    fn from(state: Option<RunState>) -> Self {
        match state {
            None => TaskRunState::NotInRun,
            Some(RunState::Pending) => TaskRunState::Pending,
            Some(RunState::Running) => TaskRunState::Running,
            Some(RunState::Succeeded) => TaskRunState::Succeeded,
            Some(RunState::CacheHit) => TaskRunState::CacheHit,
            Some(RunState::SkippedPlatform) => TaskRunState::SkippedPlatform,
            Some(RunState::Failed) => TaskRunState::Failed,
            Some(RunState::FailedUpstream) => TaskRunState::FailedUpstream,
            Some(RunState::Abandoned) => TaskRunState::Abandoned,
        }
    }
}

/// Static task information derived from the graph document, plus per-run
/// state owned by the scheduler.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub name: TaskName,
    pub cmd: String,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub platforms: Option<Vec<Platform>>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub retry: RetryConfig,
    pub parallelism: ParallelismConfig,
    /// Direct dependencies restricted to the tasks selected for this run.
    pub deps: Vec<TaskName>,

    /// Per-run state.
    pub run_state: RunState,
    /// Unresolved dependencies remaining; the task becomes runnable at 0.
    pub remaining_deps: usize,

    /// Filled in at completion, for the end-of-run report.
    pub duration: Option<Duration>,
    pub attempts: u32,
}

impl TaskInfo {
    pub fn from_config(
        name: TaskName,
        cfg: &TaskConfig,
        deps: Vec<TaskName>,
        default_retry: RetryConfig,
    ) -> Self {
        let remaining = deps.len();
        Self {
            name,
            cmd: cfg.cmd.clone(),
            working_dir: cfg.working_dir.clone(),
            env: cfg.env.clone(),
            platforms: cfg.platforms.clone(),
            inputs: cfg.inputs.clone().unwrap_or_default(),
            outputs: cfg.outputs.clone().unwrap_or_default(),
            retry: cfg.retry.unwrap_or(default_retry),
            parallelism: cfg.parallelism.unwrap_or_default(),
            deps,
            run_state: RunState::Pending,
            remaining_deps: remaining,
            duration: None,
            attempts: 0,
        }
    }
}

/// Description of a task that the scheduler wants the executor to run now.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub name: TaskName,
    pub cmd: String,
    pub working_dir: Option<PathBuf>,
    /// Task-level env only; the graph-level env is merged at spawn time.
    pub env: BTreeMap<String, String>,
    pub platforms: Option<Vec<Platform>>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub retry: RetryConfig,
    /// Direct dependencies, needed for dependency-aware fingerprinting.
    pub deps: Vec<TaskName>,
    pub max_parallel: Option<usize>,
    pub memory_limit_mb: Option<u64>,
}

impl ScheduledTask {
    pub fn from_task_info(info: &TaskInfo) -> Self {
        Self {
            name: info.name.clone(),
            cmd: info.cmd.clone(),
            working_dir: info.working_dir.clone(),
            env: info.env.clone(),
            platforms: info.platforms.clone(),
            inputs: info.inputs.clone(),
            outputs: info.outputs.clone(),
            retry: info.retry,
            deps: info.deps.clone(),
            max_parallel: info.parallelism.max_parallel,
            memory_limit_mb: info.parallelism.memory_limit_mb,
        }
    }

    /// Whether this task runs on the given host platform.
    pub fn runs_on(&self, host: Platform) -> bool {
        match &self.platforms {
            None => true,
            Some(tags) => tags.contains(&host),
        }
    }
}
