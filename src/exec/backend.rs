// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of a raw mpsc sender.
//! This makes it easy to swap in a fake executor in tests while keeping the
//! production executor implementation in [`executor_loop`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::dag::ScheduledTask;
use crate::engine::RuntimeEvent;
use crate::errors::{Error, Result};

use super::ExecContext;
use super::executor_loop::{ExecutorMsg, spawn_executor};

/// Trait abstracting how scheduled tasks are executed.
///
/// Production code uses [`RealExecutorBackend`]; tests can provide their own
/// implementation that doesn't spawn real processes.
pub trait ExecutorBackend: Send {
    /// Dispatch the given tasks for execution.
    ///
    /// The implementation is free to:
    /// - spawn OS processes (production)
    /// - simulate completion and emit `RuntimeEvent`s (tests)
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Stop every in-flight task, waiting up to `grace` before force-killing
    /// what remains. Resolves when everything is down.
    fn terminate_all(
        &mut self,
        grace: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Real executor backend used in production.
///
/// Internally, this wraps the worker-pool loop in [`spawn_executor`]. The
/// runtime calls `spawn_ready_tasks`, which forwards the tasks to the
/// background executor via an mpsc channel.
pub struct RealExecutorBackend {
    tx: mpsc::Sender<ExecutorMsg>,
}

impl RealExecutorBackend {
    /// Create a new real executor backend, wiring it to the given runtime
    /// event sender.
    ///
    /// This spawns the background executor loop immediately, with a worker
    /// pool of `pool_size` concurrent tasks.
    pub fn new(
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        ctx: Arc<ExecContext>,
        pool_size: usize,
    ) -> Self {
        let tx = spawn_executor(runtime_tx, ctx, pool_size);
        Self { tx }
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            for task in tasks {
                tx.send(ExecutorMsg::Run(task)).await.map_err(Error::from)?;
            }
            Ok(())
        })
    }

    fn terminate_all(
        &mut self,
        grace: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.tx.clone();

        Box::pin(async move {
            let (done_tx, done_rx) = oneshot::channel();
            tx.send(ExecutorMsg::TerminateAll {
                grace,
                done: done_tx,
            })
            .await
            .map_err(Error::from)?;
            // The loop drops the sender once everything is down.
            let _ = done_rx.await;
            Ok(())
        })
    }
}
