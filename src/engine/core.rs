// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - sending `ScheduledTask`s to the executor
//! - handling Ctrl-C / shutdown
//!
//! The core is intended to be extensively unit tested without any Tokio,
//! channels, filesystem, or processes.

use crate::dag::Scheduler;
use crate::engine::event_handlers::{CoreCommand, CoreStep, handle_shutdown, handle_task_finished};
use crate::engine::{RuntimeEvent, RuntimeOptions};

/// Pure core runtime state.
///
/// This owns the DAG scheduler and the runtime options. It has **no**
/// channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
    options: RuntimeOptions,
    interrupted: bool,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler, options: RuntimeOptions) -> Self {
        Self {
            scheduler,
            options,
            interrupted: false,
        }
    }

    pub fn options(&self) -> RuntimeOptions {
        self.options
    }

    /// Whether the run was cut short by a shutdown request.
    pub fn interrupted(&self) -> bool {
        self.interrupted
    }

    /// Scheduler state, for building the end-of-run summary.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Seed the run: dispatch every task with no unresolved dependencies.
    ///
    /// An empty selection (or an all-cache-hit degenerate graph) finishes
    /// immediately.
    pub fn start(&mut self) -> CoreStep {
        let ready = self.scheduler.initial_ready();

        if ready.is_empty() && self.scheduler.is_finished() {
            return CoreStep {
                commands: vec![CoreCommand::RequestExit],
                keep_running: false,
            };
        }

        CoreStep {
            commands: vec![CoreCommand::DispatchTasks(ready)],
            keep_running: true,
        }
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::TaskFinished {
                task,
                outcome,
                duration,
            } => handle_task_finished(&mut self.scheduler, task, outcome, duration),
            RuntimeEvent::ShutdownRequested => {
                self.interrupted = true;
                handle_shutdown(&mut self.scheduler)
            }
        }
    }
}
