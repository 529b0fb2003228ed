// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::types::{CacheBackendKind, CacheMode, OnFailure, SignalMode, parse_concurrency};

/// Command-line arguments for `rundag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "rundag",
    version,
    about = "Run a graph of tasks in dependency order with caching and retries.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the graph document (TOML or JSON).
    ///
    /// Default: `Rundag.toml` in the current working directory.
    #[arg(long, global = true, value_name = "FILE", default_value = "Rundag.toml")]
    pub graph: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `RUNDAG_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Execute tasks (and their dependencies). With no task names, runs the
    /// whole graph.
    Run(RunArgs),

    /// Print the dependency closure of a task as DOT or JSON.
    Graph {
        /// Task whose subgraph to render.
        task: String,

        #[arg(long, value_enum, default_value_t = GraphFormat::Dot)]
        format: GraphFormat,
    },

    /// List all tasks with their dependencies and platform filters.
    List,

    /// Export the whole graph to another build system's format.
    Export {
        #[arg(long, value_enum)]
        format: ExportFormat,
    },

    /// Print the auto-detected worker-pool size for this machine.
    DetectConcurrency,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Tasks to run (each pulls in its transitive dependencies).
    #[arg(value_name = "TASK")]
    pub tasks: Vec<String>,

    /// Directory the graph's relative paths resolve against.
    ///
    /// Defaults to the graph document's directory.
    #[arg(long, value_name = "DIR")]
    pub workspace_root: Option<PathBuf>,

    /// Worker-pool size: a number, or "auto" for the detected core count.
    #[arg(short = 'j', value_name = "N", value_parser = parse_concurrency, default_value = "auto")]
    pub jobs: usize,

    /// Fingerprint/caching strategy.
    #[arg(long, value_enum, default_value_t = CacheMode::Merkle)]
    pub cache: CacheMode,

    /// Object-store driver for remote cache regions.
    ///
    /// The `STORAGE_BACKEND` env var takes precedence.
    #[arg(long, value_enum, default_value_t = CacheBackendKind::Local)]
    pub cache_backend: CacheBackendKind,

    /// Local cache directory (default: `.rundag/cache` under the workspace root).
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Default max attempts for tasks without an explicit retry policy.
    #[arg(long, value_name = "N")]
    pub retry: Option<u32>,

    /// Behaviour when a task fails (defaults to the graph's `[config]`
    /// setting).
    #[arg(long, value_enum)]
    pub on_failure: Option<OnFailure>,

    /// How Ctrl-C is handled mid-run.
    #[arg(long, value_enum, default_value_t = SignalMode::Graceful)]
    pub signal_mode: SignalMode,

    /// Parse + validate, print the execution plan, but don't execute anything.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    Dot,
    Json,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Makefile,
    GithubActions,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
