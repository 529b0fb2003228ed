// src/engine/mod.rs

//! Orchestration engine for rundag.
//!
//! This module ties together:
//! - the DAG scheduler
//! - the main runtime event loop that reacts to:
//!   - task completion events from the executor
//!   - shutdown signals
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::time::Duration;

use crate::types::SignalMode;

/// Canonical task name type used throughout the engine.
pub type TaskName = String;

/// Outcome of one task for the scheduler.
///
/// Retries are invisible here: a task that failed twice and then succeeded
/// reports a single `Success { attempts: 3 }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Success { attempts: u32 },
    /// Outputs were materialized from the cache; the command never ran.
    CacheHit,
    /// The platform filter excluded this task on the current host.
    PlatformSkipped,
    Failed { exit_code: i32, attempts: u32 },
}

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// How Ctrl-C is handled.
    pub signal_mode: SignalMode,
    /// How long graceful shutdown waits for in-flight children before
    /// force-killing them.
    pub grace_period: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            signal_mode: SignalMode::Graceful,
            grace_period: Duration::from_secs(5),
        }
    }
}

/// Events flowing into the runtime from the executor and signal handlers.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A task reached a terminal state.
    TaskFinished {
        task: TaskName,
        outcome: TaskOutcome,
        duration: Duration,
    },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod core;
pub mod event_handlers;
pub mod runtime;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::Runtime;
