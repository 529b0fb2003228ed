// tests/property_scheduler.rs

//! Property tests for the scheduler state machine.

use std::collections::{HashSet, VecDeque};

use proptest::prelude::*;

use rundag::config::model::{GraphFile, RetryConfig};
use rundag::dag::{Scheduler, TaskRunState};
use rundag::engine::TaskOutcome;
use rundag::types::OnFailure;
use rundag_test_utils::builders::{GraphFileBuilder, TaskConfigBuilder};

// Strategy to generate a valid DAG configuration.
// Acyclicity is guaranteed by only allowing task N to depend on tasks 0..N-1.
fn dag_graph_strategy(max_tasks: usize) -> impl Strategy<Value = GraphFile> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        let deps_strat = proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_tasks),
            num_tasks,
        );

        deps_strat.prop_map(move |raw_deps| {
            let mut builder = GraphFileBuilder::new();
            for (i, potential_deps) in raw_deps.into_iter().enumerate() {
                let name = format!("task_{i}");
                let mut task_builder = TaskConfigBuilder::new(&format!("echo {name}"));

                // Sanitize dependencies: only allow deps < i.
                let mut valid_deps = HashSet::new();
                for dep_idx in potential_deps {
                    if i > 0 {
                        valid_deps.insert(dep_idx % i);
                    }
                }
                for dep_idx in valid_deps {
                    task_builder = task_builder.dep(&format!("task_{dep_idx}"));
                }
                builder = builder.with_task(&name, task_builder.build());
            }
            builder.build()
        })
    })
}

proptest! {
    /// Whatever the DAG shape and whichever tasks fail, the run terminates
    /// with every selected task in a terminal state, and no task ever ran
    /// before all of its dependencies succeeded.
    #[test]
    fn scheduler_always_terminates_with_terminal_states(
        cfg in dag_graph_strategy(10),
        failing_indices in proptest::collection::vec(0..10usize, 0..5),
        stop_on_failure in any::<bool>(),
    ) {
        let on_failure = if stop_on_failure { OnFailure::Stop } else { OnFailure::Continue };
        let mut scheduler =
            Scheduler::new(&cfg, &[], RetryConfig::default(), on_failure).unwrap();

        let task_names: Vec<String> = scheduler.plan();
        let failing: HashSet<String> = failing_indices
            .iter()
            .filter(|&&i| i < task_names.len())
            .map(|&i| task_names[i].clone())
            .collect();

        let mut executing: VecDeque<String> =
            scheduler.initial_ready().into_iter().map(|t| t.name).collect();
        let mut finished_ok: HashSet<String> = HashSet::new();
        let mut ran: Vec<String> = Vec::new();

        let mut steps = 0;
        while let Some(task) = executing.pop_front() {
            steps += 1;
            prop_assert!(steps <= 1000, "simulation did not terminate");
            ran.push(task.clone());

            // Every dependency of a dispatched task must already have
            // finished successfully.
            let deps = cfg.task[&task].deps.clone();
            for dep in &deps {
                prop_assert!(
                    finished_ok.contains(dep),
                    "task {task} ran before dependency {dep}"
                );
            }

            let outcome = if failing.contains(&task) {
                TaskOutcome::Failed { exit_code: 1, attempts: 1 }
            } else {
                finished_ok.insert(task.clone());
                TaskOutcome::Success { attempts: 1 }
            };

            let step = scheduler.handle_completion(
                &task,
                &outcome,
                std::time::Duration::from_millis(1),
            );
            for scheduled in step.newly_scheduled {
                executing.push_back(scheduled.name);
            }
            if step.run_finished {
                prop_assert!(executing.is_empty());
            }
        }

        prop_assert!(scheduler.is_finished(), "non-terminal tasks remain");

        // Every task either ran, was skipped by propagation, or was
        // abandoned by stop mode; nothing is left pending or running.
        for name in &task_names {
            let state = scheduler.run_state_of(name);
            prop_assert!(
                !matches!(state, TaskRunState::Pending | TaskRunState::Running),
                "task {name} left in {state:?}"
            );
        }

        // A failing run must mark at least one task failed.
        if !failing.is_empty() && ran.iter().any(|t| failing.contains(t)) {
            prop_assert!(scheduler.any_failed());
        }
    }
}
