// src/dag/mod.rs

//! DAG representation and scheduling.
//!
//! - [`graph`] holds the directed acyclic graph of tasks (adjacency plus a
//!   topological order).
//! - [`scheduler`] contains the per-run state machine: an in-degree counter
//!   per task drives an event-driven ready queue (Kahn's algorithm), so a
//!   dependent is dispatched the moment its last dependency reaches a
//!   terminal state.
//! - [`task_info`] provides task metadata and scheduled task types.
//! - [`scheduler_step`] defines the result type for scheduler steps.

pub mod graph;
pub mod scheduler;
pub mod scheduler_step;
pub mod task_info;

pub use graph::TaskDag;
pub use scheduler::Scheduler;
pub use scheduler_step::SchedulerStep;
pub use task_info::{ScheduledTask, TaskRunState};
