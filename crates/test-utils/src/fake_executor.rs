use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rundag::dag::ScheduledTask;
use rundag::engine::{RuntimeEvent, TaskOutcome};
use rundag::errors::Result;
use rundag::exec::ExecutorBackend;
use tokio::sync::mpsc;

/// A fake executor that:
/// - records which tasks were "run", in dispatch order
/// - immediately reports a configurable outcome (default: success) for each
///   scheduled task, without spawning processes.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    executed: Arc<Mutex<Vec<String>>>,
    outcomes: HashMap<String, TaskOutcome>,
    terminated: Arc<AtomicBool>,
}

impl FakeExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, executed: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            runtime_tx,
            executed,
            outcomes: HashMap::new(),
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Report this outcome instead of success when the named task runs.
    pub fn with_outcome(mut self, task: &str, outcome: TaskOutcome) -> Self {
        self.outcomes.insert(task.to_string(), outcome);
        self
    }

    /// Shared flag set when the runtime asks for termination.
    pub fn terminated_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.terminated)
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let executed = Arc::clone(&self.executed);
        let outcomes: Vec<(String, TaskOutcome)> = tasks
            .iter()
            .map(|t| {
                let outcome = self
                    .outcomes
                    .get(&t.name)
                    .copied()
                    .unwrap_or(TaskOutcome::Success { attempts: 1 });
                (t.name.clone(), outcome)
            })
            .collect();

        Box::pin(async move {
            for (name, outcome) in outcomes {
                {
                    let mut guard = executed.lock().unwrap();
                    guard.push(name.clone());
                }

                tx.send(RuntimeEvent::TaskFinished {
                    task: name,
                    outcome,
                    duration: Duration::from_millis(1),
                })
                .await
                .map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }

    fn terminate_all(
        &mut self,
        _grace: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let terminated = Arc::clone(&self.terminated);
        Box::pin(async move {
            terminated.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}
