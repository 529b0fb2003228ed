// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RundagError {
    /// Malformed graph document: schema violation, unknown field, unknown
    /// dependency, bad platform tag. Fatal before any task executes.
    #[error("Graph error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Dependency cycle in task graph: {0}")]
    DagCycle(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Cache/network problem. Never fatal to a run: callers degrade through
    /// the region chain down to local-only execution.
    #[error("Cache backend error: {0}")]
    CacheError(#[from] crate::cache::CacheError),

    /// Artifact transfer gave up after bounded retries. Non-fatal to a run.
    #[error("Transfer error: {0}")]
    TransferError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, RundagError>;
