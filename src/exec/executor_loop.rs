// src/exec/executor_loop.rs

//! Worker-pool executor loop.
//!
//! Concurrency is bounded by a semaphore with one permit per worker. A task
//! with `max_parallel = k` acquires `pool - k + 1` permits, which caps the
//! number of such tasks running at once to `k` while still letting
//! unconstrained tasks fill the rest of the pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::dag::ScheduledTask;
use crate::engine::RuntimeEvent;
use crate::exec::task_runner::run_task;

use super::ExecContext;

/// Messages accepted by the executor loop.
#[derive(Debug)]
pub enum ExecutorMsg {
    Run(ScheduledTask),
    /// Cancel all in-flight tasks; `done` fires when everything is down.
    TerminateAll {
        grace: Duration,
        done: oneshot::Sender<()>,
    },
}

/// Handle for a currently-running task.
struct ActiveTask {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background executor loop with a pool of `pool_size` workers.
///
/// The returned sender is what [`super::RealExecutorBackend`] forwards
/// scheduled tasks over. Each task runs in its own Tokio task once it holds
/// enough pool permits.
pub fn spawn_executor(
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    ctx: Arc<ExecContext>,
    pool_size: usize,
) -> mpsc::Sender<ExecutorMsg> {
    let (tx, mut rx) = mpsc::channel::<ExecutorMsg>(32);
    let pool_size = pool_size.max(1);

    tokio::spawn(async move {
        info!(pool_size, "executor loop started");

        let pool = Arc::new(Semaphore::new(pool_size));
        let mut active: HashMap<String, ActiveTask> = HashMap::new();

        while let Some(msg) = rx.recv().await {
            match msg {
                ExecutorMsg::Run(task) => {
                    active.retain(|_, a| !a.handle.is_finished());
                    dispatch_task(task, pool_size, &pool, &ctx, &runtime_tx, &mut active);
                }
                ExecutorMsg::TerminateAll { grace, done } => {
                    terminate_all(&mut active, grace).await;
                    let _ = done.send(());
                }
            }
        }

        info!("executor loop finished (channel closed)");
    });

    tx
}

/// Permits this task must hold. A task with `max_parallel = k` takes
/// `pool - k + 1` permits, leaving `k - 1` free: total concurrency while it
/// runs is capped at `k`.
fn permits_for(task: &ScheduledTask, pool_size: usize) -> u32 {
    match task.max_parallel {
        Some(k) if k < pool_size => (pool_size - k + 1) as u32,
        _ => 1,
    }
}

fn dispatch_task(
    task: ScheduledTask,
    pool_size: usize,
    pool: &Arc<Semaphore>,
    ctx: &Arc<ExecContext>,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
    active: &mut HashMap<String, ActiveTask>,
) {
    let name = task.name.clone();
    let permits = permits_for(&task, pool_size);
    if let Some(limit) = task.memory_limit_mb {
        debug!(task = %name, memory_limit_mb = limit, "memory hint");
    }
    let pool = Arc::clone(pool);
    let ctx = Arc::clone(ctx);
    let rt_tx = runtime_tx.clone();
    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();

    let spawn_name = name.clone();
    let handle = tokio::spawn(async move {
        // Queue here until the pool has room.
        let _permit = match pool.acquire_many_owned(permits).await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        run_task(task, ctx, rt_tx, cancel_rx).await;
        debug!(task = %spawn_name, "task runner future finished");
    });

    active.insert(
        name,
        ActiveTask {
            cancel: Some(cancel_tx),
            handle,
        },
    );
}

/// Two-phase shutdown: cancel everything, wait up to `grace` for runners to
/// unwind, then abort stragglers (their children die via `kill_on_drop`).
async fn terminate_all(active: &mut HashMap<String, ActiveTask>, grace: Duration) {
    for (name, task) in active.iter_mut() {
        if let Some(cancel) = task.cancel.take() {
            if cancel.send(()).is_err() {
                debug!(task = %name, "already finished while cancelling");
            }
        }
    }

    let deadline = tokio::time::Instant::now() + grace;
    for (name, task) in active.iter_mut() {
        if task.handle.is_finished() {
            continue;
        }
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if tokio::time::timeout(remaining, &mut task.handle).await.is_err() {
            warn!(task = %name, "grace period expired; force-killing");
            task.handle.abort();
        }
    }

    active.clear();
    info!("all in-flight tasks terminated");
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::config::model::RetryConfig;

    use super::*;

    fn task(name: &str, max_parallel: Option<usize>) -> ScheduledTask {
        ScheduledTask {
            name: name.to_string(),
            cmd: "true".to_string(),
            working_dir: None,
            env: BTreeMap::new(),
            platforms: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            retry: RetryConfig::default(),
            deps: Vec::new(),
            max_parallel,
            memory_limit_mb: None,
        }
    }

    #[test]
    fn unconstrained_tasks_hold_one_permit() {
        assert_eq!(permits_for(&task("a", None), 8), 1);
    }

    #[test]
    fn max_parallel_widens_the_hold() {
        // pool = 8, k = 2: the holder takes 7 permits, leaving room for one
        // other task, so total concurrency while it runs is 2.
        assert_eq!(permits_for(&task("a", Some(2)), 8), 7);
        assert_eq!(permits_for(&task("a", Some(1)), 8), 8);
        assert_eq!(permits_for(&task("a", Some(8)), 8), 1);
        // k larger than the pool is a no-op.
        assert_eq!(permits_for(&task("a", Some(30)), 8), 1);
    }
}
