// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{GraphFile, RawGraphFile};
use crate::errors::Result;

/// Load a graph document from a given path and return the raw `RawGraphFile`.
///
/// The parser is chosen by extension: `.json` is parsed as JSON, everything
/// else as TOML. This only performs deserialization (which already rejects
/// unknown fields); it does **not** perform semantic validation (dependency
/// references, cycles). Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawGraphFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let raw: RawGraphFile = if path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
    {
        serde_json::from_str(&contents)?
    } else {
        toml::from_str(&contents)?
    };

    Ok(raw)
}

/// Load a graph document from path and run full validation.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML or JSON.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks for:
///   - unknown `deps` references and self-loops,
///   - dependency cycles,
///   - at least one task.
///
/// Any violation aborts before a single task executes — no partial graphs.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<GraphFile> {
    let raw = load_from_path(&path)?;
    let graph = GraphFile::try_from(raw)?;
    Ok(graph)
}
