// src/report/mod.rs

//! End-of-run summaries and graph renderers.
//!
//! Everything here writes to stdout; diagnostics and progress stay on
//! stderr via `tracing`.

use std::time::Duration;

use serde::Serialize;

use crate::config::model::GraphFile;
use crate::dag::{TaskDag, TaskRunState};
use crate::engine::CoreRuntime;
use crate::errors::Result;

/// Final state of one task, for the summary table.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub name: String,
    pub state: TaskRunState,
    pub duration: Option<Duration>,
    pub attempts: u32,
}

/// Aggregated result of one run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub tasks: Vec<TaskReport>,
    pub succeeded: usize,
    pub cache_hits: usize,
    pub skipped: usize,
    pub failed: usize,
    pub interrupted: bool,
    pub wall_time: Duration,
}

impl RunSummary {
    pub fn from_core(core: &CoreRuntime, wall_time: Duration) -> Self {
        let mut tasks: Vec<TaskReport> = core
            .scheduler()
            .infos()
            .map(|info| TaskReport {
                name: info.name.clone(),
                state: core.scheduler().run_state_of(&info.name),
                duration: info.duration,
                attempts: info.attempts,
            })
            .collect();
        tasks.sort_by(|a, b| a.name.cmp(&b.name));

        let count = |state: TaskRunState| tasks.iter().filter(|t| t.state == state).count();

        Self {
            succeeded: count(TaskRunState::Succeeded),
            cache_hits: count(TaskRunState::CacheHit),
            skipped: count(TaskRunState::SkippedPlatform),
            failed: count(TaskRunState::Failed)
                + count(TaskRunState::FailedUpstream)
                + count(TaskRunState::Abandoned),
            interrupted: core.interrupted(),
            wall_time,
            tasks,
        }
    }

    /// Process exit code: 0 clean, 1 on any failure, 130 when interrupted.
    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            130
        } else if self.failed > 0 {
            1
        } else {
            0
        }
    }
}

fn state_label(state: TaskRunState) -> &'static str {
    match state {
        TaskRunState::NotInRun => "not in run",
        TaskRunState::Pending => "pending",
        TaskRunState::Running => "interrupted",
        TaskRunState::Succeeded => "ok",
        TaskRunState::CacheHit => "cached",
        TaskRunState::SkippedPlatform => "skipped (platform)",
        TaskRunState::Failed => "FAILED",
        TaskRunState::FailedUpstream => "failed (upstream)",
        TaskRunState::Abandoned => "abandoned",
    }
}

/// Print the per-task table and the totals line.
pub fn print_summary(summary: &RunSummary) {
    if summary.interrupted {
        println!("run interrupted; partial results:");
    }
    for task in &summary.tasks {
        let timing = match task.duration {
            Some(d) => format!(" ({:.1}s{})", d.as_secs_f64(), attempts_suffix(task.attempts)),
            None => String::new(),
        };
        println!("  {:<24} {}{}", task.name, state_label(task.state), timing);
    }
    println!(
        "{} succeeded, {} cached, {} skipped, {} failed in {:.1}s",
        summary.succeeded,
        summary.cache_hits,
        summary.skipped,
        summary.failed,
        summary.wall_time.as_secs_f64()
    );
}

fn attempts_suffix(attempts: u32) -> String {
    if attempts > 1 {
        format!(", {attempts} attempts")
    } else {
        String::new()
    }
}

/// `rundag list`: every task with its command and dependencies.
pub fn render_list(graph: &GraphFile) -> String {
    let dag = TaskDag::from_graph(graph);
    let mut out = String::new();
    for name in dag.topo_order() {
        let Some(task) = graph.task.get(name) else {
            continue;
        };
        out.push_str(name);
        if !task.deps.is_empty() {
            out.push_str(&format!("  (deps: {})", task.deps.join(", ")));
        }
        out.push('\n');
        out.push_str(&format!("    {}\n", task.cmd));
    }
    out
}

/// `rundag graph <task> --format dot`: dependency closure as Graphviz DOT.
pub fn render_dot(graph: &GraphFile, root: &str) -> Result<String> {
    let dag = TaskDag::from_graph(graph);
    let closure = dag.closure(&[root.to_string()])?;

    let mut out = String::from("digraph tasks {\n  rankdir=BT;\n");
    for name in &closure {
        out.push_str(&format!("  \"{name}\";\n"));
    }
    for name in &closure {
        for dep in dag.dependencies_of(name) {
            out.push_str(&format!("  \"{name}\" -> \"{dep}\";\n"));
        }
    }
    out.push_str("}\n");
    Ok(out)
}

#[derive(Serialize)]
struct JsonNode<'a> {
    name: &'a str,
    cmd: &'a str,
    deps: &'a [String],
}

#[derive(Serialize)]
struct JsonGraph<'a> {
    task: &'a str,
    nodes: Vec<JsonNode<'a>>,
}

/// `rundag graph <task> --format json`: dependency closure as JSON.
pub fn render_graph_json(graph: &GraphFile, root: &str) -> Result<String> {
    let dag = TaskDag::from_graph(graph);
    let closure = dag.closure(&[root.to_string()])?;

    let nodes = dag
        .topo_order()
        .iter()
        .filter(|name| closure.contains(*name))
        .filter_map(|name| {
            graph.task.get(name).map(|task| JsonNode {
                name,
                cmd: &task.cmd,
                deps: &task.deps,
            })
        })
        .collect();

    let doc = JsonGraph { task: root, nodes };
    Ok(serde_json::to_string_pretty(&doc)?)
}

/// `rundag export --format makefile`.
pub fn render_makefile(graph: &GraphFile) -> String {
    let dag = TaskDag::from_graph(graph);
    let order = dag.topo_order();

    let mut out = String::from("# generated by rundag export\n");
    out.push_str(&format!(".PHONY: all {}\n\n", order.join(" ")));
    out.push_str(&format!("all: {}\n", order.join(" ")));

    for name in order {
        let Some(task) = graph.task.get(name) else {
            continue;
        };
        out.push('\n');
        out.push_str(&format!("{name}: {}\n", task.deps.join(" ")));
        for (key, value) in &task.env {
            out.push_str(&format!("\t{key}='{value}' \\\n"));
        }
        out.push_str(&format!("\t{}\n", task.cmd));
    }
    out
}

/// `rundag export --format github-actions`.
pub fn render_github_actions(graph: &GraphFile) -> String {
    let dag = TaskDag::from_graph(graph);

    let mut out = String::from(
        "# generated by rundag export\nname: tasks\non: [push]\n\njobs:\n",
    );
    for name in dag.topo_order() {
        let Some(task) = graph.task.get(name) else {
            continue;
        };
        out.push_str(&format!("  {name}:\n    runs-on: ubuntu-latest\n"));
        if !task.deps.is_empty() {
            out.push_str(&format!("    needs: [{}]\n", task.deps.join(", ")));
        }
        if !task.env.is_empty() {
            out.push_str("    env:\n");
            for (key, value) in &task.env {
                out.push_str(&format!("      {key}: \"{value}\"\n"));
            }
        }
        out.push_str("    steps:\n      - uses: actions/checkout@v4\n");
        out.push_str(&format!("      - run: {}\n", task.cmd));
    }
    out
}

/// `rundag run --dry-run`: the execution plan in topological order.
pub fn render_plan(graph: &GraphFile, plan: &[String]) -> String {
    let mut out = String::from("execution plan:\n");
    for (i, name) in plan.iter().enumerate() {
        let Some(task) = graph.task.get(name) else {
            continue;
        };
        out.push_str(&format!("  {:>3}. {name}: {}\n", i + 1, task.cmd));
        if let Some(platforms) = &task.platforms {
            let tags: Vec<&str> = platforms.iter().map(|p| p.as_str()).collect();
            out.push_str(&format!("       platforms: {}\n", tags.join(", ")));
        }
        if let Some(parallelism) = &task.parallelism {
            if let Some(limit) = parallelism.memory_limit_mb {
                out.push_str(&format!("       memory hint: {limit} MiB\n"));
            }
        }
    }
    out
}
