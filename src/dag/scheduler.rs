// src/dag/scheduler.rs

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::model::{GraphFile, RetryConfig};
use crate::dag::graph::TaskDag;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::task_info::{RunState, ScheduledTask, TaskInfo, TaskRunState};
use crate::engine::{TaskName, TaskOutcome};
use crate::errors::Result;
use crate::types::OnFailure;

/// Scheduler holds the immutable DAG plus mutable per-run state.
///
/// This is an event-driven form of Kahn's algorithm: every selected task
/// carries an in-degree counter (`remaining_deps`); tasks at zero are
/// dispatched immediately, and each terminal state decrements its dependents,
/// dispatching any that reach zero. Independent subtrees therefore overlap
/// regardless of their depth in the graph.
///
/// The scheduler is owned by a single `run` invocation's coordinator; there
/// are no concurrent writers.
#[derive(Debug)]
pub struct Scheduler {
    graph: TaskDag,
    tasks: HashMap<TaskName, TaskInfo>,
    /// Tasks participating in this run (requested roots plus closure).
    selected: BTreeSet<TaskName>,
    on_failure: OnFailure,
    /// Set once a failure occurred in `stop` mode or shutdown was requested;
    /// no further tasks are dispatched.
    stopped: bool,
}

impl Scheduler {
    /// Construct a scheduler from a validated [`GraphFile`].
    ///
    /// `requested` selects the tasks to run (each pulls in its transitive
    /// dependencies); an empty list selects the whole graph. `default_retry`
    /// applies to tasks without an explicit policy.
    pub fn new(
        cfg: &GraphFile,
        requested: &[String],
        default_retry: RetryConfig,
        on_failure: OnFailure,
    ) -> Result<Self> {
        let graph = TaskDag::from_graph(cfg);

        let selected: BTreeSet<TaskName> = if requested.is_empty() {
            graph.tasks().map(|s| s.to_string()).collect()
        } else {
            graph.closure(requested)?
        };

        let mut tasks = HashMap::new();
        for name in &selected {
            // In-degree counts only edges inside the selection; with a full
            // closure every dep is selected, but the guard keeps the counter
            // honest if selection rules ever change.
            let tc = &cfg.task[name];
            let deps: Vec<TaskName> = graph
                .dependencies_of(name)
                .iter()
                .filter(|d| selected.contains(*d))
                .cloned()
                .collect();
            let info = TaskInfo::from_config(name.clone(), tc, deps, default_retry);
            tasks.insert(name.clone(), info);
        }

        Ok(Self {
            graph,
            tasks,
            selected,
            on_failure,
            stopped: false,
        })
    }

    /// Names of tasks participating in this run, in topological order.
    pub fn plan(&self) -> Vec<TaskName> {
        self.graph
            .topo_order()
            .iter()
            .filter(|n| self.selected.contains(*n))
            .cloned()
            .collect()
    }

    /// Read-only view of the given task's run state.
    pub fn run_state_of(&self, task: &str) -> TaskRunState {
        self.tasks.get(task).map(|i| i.run_state).into()
    }

    /// Static info for a selected task (reporting).
    pub fn task_info(&self, task: &str) -> Option<&TaskInfo> {
        self.tasks.get(task)
    }

    /// Iterate over all selected tasks' infos.
    pub fn infos(&self) -> impl Iterator<Item = &TaskInfo> {
        self.tasks.values()
    }

    /// All selected tasks are terminal.
    pub fn is_finished(&self) -> bool {
        self.tasks.values().all(|i| i.run_state.is_terminal())
    }

    /// Whether any selected task terminally failed.
    pub fn any_failed(&self) -> bool {
        self.tasks.values().any(|i| {
            matches!(
                i.run_state,
                RunState::Failed | RunState::FailedUpstream | RunState::Abandoned
            )
        })
    }

    /// Tasks runnable right now (in-degree 0). Marks them Running and
    /// returns them for dispatch; called once to seed the run.
    pub fn initial_ready(&mut self) -> Vec<ScheduledTask> {
        let candidates: Vec<TaskName> = self
            .tasks
            .values()
            .filter(|i| i.run_state == RunState::Pending && i.remaining_deps == 0)
            .map(|i| i.name.clone())
            .collect();

        self.mark_running(candidates)
    }

    /// Handle completion of a task with a concrete outcome.
    pub fn handle_completion(
        &mut self,
        task: &str,
        outcome: &TaskOutcome,
        duration: Duration,
    ) -> SchedulerStep {
        let Some(info) = self.tasks.get_mut(task) else {
            warn!(task = %task, "completion for unknown task; ignoring");
            return SchedulerStep::empty(self.is_finished());
        };

        if info.run_state != RunState::Running {
            warn!(
                task = %task,
                state = ?info.run_state,
                "completion for task that is not running; ignoring"
            );
            return SchedulerStep::empty(self.is_finished());
        }

        info.duration = Some(duration);

        match outcome {
            TaskOutcome::Success { attempts } => {
                info.run_state = RunState::Succeeded;
                info.attempts = *attempts;
                debug!(task = %task, attempts, "task completed successfully");
                self.on_task_success(task)
            }
            TaskOutcome::CacheHit => {
                info.run_state = RunState::CacheHit;
                debug!(task = %task, "task satisfied from cache");
                self.on_task_success(task)
            }
            TaskOutcome::PlatformSkipped => {
                info.run_state = RunState::SkippedPlatform;
                info!(task = %task, "task skipped by platform filter");
                self.on_task_success(task)
            }
            TaskOutcome::Failed {
                exit_code,
                attempts,
            } => {
                info.run_state = RunState::Failed;
                info.attempts = *attempts;
                warn!(
                    task = %task,
                    exit_code,
                    attempts,
                    "task failed"
                );
                self.on_task_failure(task)
            }
        }
    }

    /// Abandon every task that hasn't started; used on shutdown. In-flight
    /// tasks stay Running so the partial summary can report them as
    /// interrupted.
    pub fn abandon_pending(&mut self) {
        self.stopped = true;
        for info in self.tasks.values_mut() {
            if info.run_state == RunState::Pending {
                info.run_state = RunState::Abandoned;
            }
        }
    }

    /// Success path: decrement dependents' in-degree, dispatch those that
    /// reach zero.
    fn on_task_success(&mut self, task: &str) -> SchedulerStep {
        let mut ready = Vec::new();

        if !self.stopped {
            for dep_name in self.graph.dependents_of(task).to_vec() {
                if let Some(dependent) = self.tasks.get_mut(&dep_name) {
                    if dependent.run_state == RunState::Pending {
                        dependent.remaining_deps = dependent.remaining_deps.saturating_sub(1);
                        if dependent.remaining_deps == 0 {
                            ready.push(dep_name);
                        }
                    }
                }
            }
        }

        SchedulerStep {
            newly_scheduled: self.mark_running(ready),
            newly_failed: Vec::new(),
            run_finished: self.is_finished(),
        }
    }

    /// Failure path: either propagate downstream (continue mode) or abandon
    /// everything that hasn't started (stop mode).
    fn on_task_failure(&mut self, task: &str) -> SchedulerStep {
        let mut newly_failed = vec![task.to_string()];

        match self.on_failure {
            OnFailure::Continue => {
                newly_failed.extend(self.fail_dependents(task));
            }
            OnFailure::Stop => {
                info!(task = %task, "stopping run: --on-failure stop");
                self.abandon_pending();
            }
        }

        SchedulerStep {
            newly_scheduled: Vec::new(),
            newly_failed,
            run_finished: self.is_finished(),
        }
    }

    /// Mark all pending transitive dependents of a failed task as
    /// FailedUpstream. Returns the list of newly failed task names.
    fn fail_dependents(&mut self, failed_task: &str) -> Vec<TaskName> {
        let mut stack: Vec<TaskName> = self.graph.dependents_of(failed_task).to_vec();
        let mut newly_failed = Vec::new();

        while let Some(name) = stack.pop() {
            if let Some(info) = self.tasks.get_mut(&name) {
                if info.run_state == RunState::Pending {
                    info.run_state = RunState::FailedUpstream;
                    debug!(task = %name, "failing dependent due to upstream failure");
                    newly_failed.push(name.clone());
                    stack.extend(self.graph.dependents_of(&name).to_vec());
                }
            }
        }

        newly_failed
    }

    fn mark_running(&mut self, names: Vec<TaskName>) -> Vec<ScheduledTask> {
        let mut scheduled = Vec::new();
        for name in names {
            if let Some(info) = self.tasks.get_mut(&name) {
                info.run_state = RunState::Running;
                debug!(task = %info.name, "dependencies satisfied; dispatching");
                scheduled.push(ScheduledTask::from_task_info(info));
            }
        }
        scheduled
    }
}
