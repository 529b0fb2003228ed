// src/config/mod.rs

//! Graph document loading and validation.
//!
//! - [`model`] maps the TOML/JSON document into serde types (strict schema).
//! - [`loader`] reads a document from disk and runs validation.
//! - [`validate`] checks references, self-loops and acyclicity before any
//!   task can execute.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{
    ConfigSection, GraphFile, ParallelismConfig, RawGraphFile, RegionConfig, RetryConfig,
    TaskConfig,
};
