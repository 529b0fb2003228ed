// src/exec/task_runner.rs

//! Individual task runner.
//!
//! Pipeline for one task: platform filter, fingerprint, cache lookup,
//! retried process execution, cache upload, completion event. Cache failures
//! anywhere in the pipeline degrade to plain execution and are never fatal.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::cache::CacheLookup;
use crate::dag::ScheduledTask;
use crate::engine::{RuntimeEvent, TaskOutcome};
use crate::fingerprint::Fingerprint;

use super::retry::{RetryPolicy, Retryable, attempt};
use super::ExecContext;

#[derive(Debug, Error)]
enum TaskError {
    #[error("spawning process: {0}")]
    Spawn(std::io::Error),
    #[error("exit code {code}")]
    NonZeroExit {
        code: i32,
        stdout: String,
        stderr: String,
    },
}

impl Retryable for TaskError {
    fn is_retryable(&self) -> bool {
        // Spawn failures count as task failures and follow the same policy
        // as non-zero exits.
        true
    }
}

/// Run a single task end to end and report a `TaskFinished` event.
///
/// If the cancel channel fires (shutdown), the in-flight attempt is dropped,
/// which kills the child via `kill_on_drop`, and **no** completion event is
/// sent: the scheduler has already abandoned the run.
pub async fn run_task(
    task: ScheduledTask,
    ctx: Arc<ExecContext>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let started = Instant::now();
    let name = task.name.clone();

    tokio::select! {
        outcome = pipeline(&task, &ctx) => {
            let duration = started.elapsed();
            let _ = runtime_tx
                .send(RuntimeEvent::TaskFinished {
                    task: name,
                    outcome,
                    duration,
                })
                .await;
        }
        _ = &mut cancel_rx => {
            info!(task = %name, "cancelled; killing in-flight process");
        }
    }
}

async fn pipeline(task: &ScheduledTask, ctx: &ExecContext) -> TaskOutcome {
    if !task.runs_on(ctx.host) {
        // Fingerprint anyway so dependents can still compute theirs.
        if let Err(e) = ctx.fingerprints.fingerprint_of(task) {
            warn!(task = %task.name, error = %e, "fingerprinting skipped task failed");
        }
        info!(task = %task.name, host = %ctx.host, "skipped: platform filter");
        return TaskOutcome::PlatformSkipped;
    }

    let fingerprint = match ctx.fingerprints.fingerprint_of(task) {
        Ok(fp) => fp,
        Err(e) => {
            warn!(task = %task.name, error = %e, "fingerprinting failed; running uncached");
            None
        }
    };

    if let Some(fp) = &fingerprint {
        if try_cache_hit(task, ctx, fp).await {
            return TaskOutcome::CacheHit;
        }
    }

    let policy = RetryPolicy::from(&task.retry);
    let (result, log) = attempt(policy, |attempt_no| {
        if attempt_no > 1 {
            info!(task = %task.name, attempt = attempt_no, "retrying");
        }
        execute_once(task, ctx)
    })
    .await;

    match result {
        Ok(()) => {
            if let Some(fp) = &fingerprint {
                upload_outputs(task, ctx, fp).await;
            }
            info!(
                task = %task.name,
                attempts = log.attempts,
                "task succeeded"
            );
            TaskOutcome::Success {
                attempts: log.attempts,
            }
        }
        Err(TaskError::NonZeroExit {
            code,
            stdout,
            stderr,
        }) => {
            error!(
                task = %task.name,
                exit_code = code,
                attempts = log.attempts,
                "task failed"
            );
            report_captured_output(&task.name, &stdout, &stderr);
            TaskOutcome::Failed {
                exit_code: code,
                attempts: log.attempts,
            }
        }
        Err(TaskError::Spawn(e)) => {
            error!(task = %task.name, error = %e, "could not start task process");
            TaskOutcome::Failed {
                exit_code: -1,
                attempts: log.attempts,
            }
        }
    }
}

/// Look the fingerprint up and materialize on a hit. Any cache error is
/// logged and treated as a miss.
async fn try_cache_hit(task: &ScheduledTask, ctx: &ExecContext, fp: &Fingerprint) -> bool {
    match ctx.cache.lookup(fp).await {
        Ok(CacheLookup::Hit(entry)) => match ctx.cache.materialize(&entry).await {
            Ok(()) => {
                info!(task = %task.name, fingerprint = fp.short(), "cache hit");
                true
            }
            Err(e) => {
                warn!(task = %task.name, error = %e, "materializing cached outputs failed; executing");
                false
            }
        },
        Ok(CacheLookup::Miss) => false,
        Err(e) => {
            warn!(task = %task.name, error = %e, "cache lookup failed; executing");
            false
        }
    }
}

async fn upload_outputs(task: &ScheduledTask, ctx: &ExecContext, fp: &Fingerprint) {
    if task.outputs.is_empty() {
        return;
    }
    if let Err(e) = ctx
        .cache
        .store_outputs(fp, &task.name, &task.outputs)
        .await
    {
        warn!(task = %task.name, error = %e, "caching outputs failed; run result unaffected");
    }
}

/// Run the command once, capturing stdout/stderr.
async fn execute_once(task: &ScheduledTask, ctx: &ExecContext) -> Result<(), TaskError> {
    debug!(task = %task.name, cmd = %task.cmd, "starting task process");

    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&task.cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&task.cmd);
        c
    };

    let cwd = match &task.working_dir {
        Some(dir) => ctx.workspace_root.join(dir),
        None => ctx.workspace_root.clone(),
    };

    cmd.current_dir(cwd)
        .envs(&ctx.graph_env)
        .envs(&task.env)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(TaskError::Spawn)?;
    let output = child
        .wait_with_output()
        .await
        .map_err(TaskError::Spawn)?;

    if output.status.success() {
        Ok(())
    } else {
        Err(TaskError::NonZeroExit {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Surface the failing attempt's captured output.
fn report_captured_output(task: &str, stdout: &str, stderr: &str) {
    for line in stdout.lines() {
        info!(task = %task, "stdout: {line}");
    }
    for line in stderr.lines() {
        info!(task = %task, "stderr: {line}");
    }
}
