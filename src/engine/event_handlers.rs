// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use std::time::Duration;

use crate::dag::{ScheduledTask, Scheduler};
use crate::engine::{TaskName, TaskOutcome};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Send these tasks to the executor.
    DispatchTasks(Vec<ScheduledTask>),
    /// Terminate all in-flight task processes (two-phase: signal, wait for
    /// the grace period, force-kill).
    TerminateInFlight,
    /// The run is complete; the loop should exit.
    RequestExit,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// Handle a task completion event: feed the outcome into the scheduler and
/// dispatch anything that became runnable.
pub fn handle_task_finished(
    scheduler: &mut Scheduler,
    task: TaskName,
    outcome: TaskOutcome,
    duration: Duration,
) -> CoreStep {
    let step = scheduler.handle_completion(&task, &outcome, duration);

    let mut commands = Vec::new();
    if !step.newly_scheduled.is_empty() {
        commands.push(CoreCommand::DispatchTasks(step.newly_scheduled));
    }

    let keep_running = !step.run_finished;
    if step.run_finished {
        commands.push(CoreCommand::RequestExit);
    }

    CoreStep {
        commands,
        keep_running,
    }
}

/// Handle a shutdown request: stop admitting work and tell the shell to
/// terminate in-flight processes. Tasks left Running are reported as
/// interrupted by the partial summary.
pub fn handle_shutdown(scheduler: &mut Scheduler) -> CoreStep {
    scheduler.abandon_pending();
    CoreStep {
        commands: vec![CoreCommand::TerminateInFlight],
        keep_running: false,
    }
}
