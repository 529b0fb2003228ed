// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::task_info::ScheduledTask;
use crate::engine::TaskName;

/// Structured result of a single scheduler "step".
///
/// This is useful for tests that want to manually step the DAG and make
/// assertions about what changed.
#[derive(Debug, Clone)]
pub struct SchedulerStep {
    /// Tasks that became ready to run as a result of this step.
    pub newly_scheduled: Vec<ScheduledTask>,
    /// Tasks that were newly marked as failed in this step (the task that
    /// failed plus any dependents failed by propagation).
    pub newly_failed: Vec<TaskName>,
    /// Whether this step brought every selected task to a terminal state.
    pub run_finished: bool,
}

impl SchedulerStep {
    pub fn empty(run_finished: bool) -> Self {
        Self {
            newly_scheduled: Vec::new(),
            newly_failed: Vec::new(),
            run_finished,
        }
    }
}
