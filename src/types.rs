use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::Deserialize;

/// Operating-system tag used by per-task platform filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Darwin,
    Windows,
}

impl Platform {
    /// Platform of the host this process is running on.
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::Darwin
        } else if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Linux
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Darwin => "darwin",
            Platform::Windows => "windows",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to the rest of the graph when a task fails.
///
/// - `Continue` (default): downstream dependents of the failed task are
///   marked failed-by-propagation, unrelated branches keep running.
/// - `Stop`: no further tasks are admitted; everything non-terminal is
///   abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OnFailure {
    #[default]
    Continue,
    Stop,
}

impl FromStr for OnFailure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "continue" => Ok(OnFailure::Continue),
            "stop" => Ok(OnFailure::Stop),
            other => Err(format!(
                "invalid on_failure: {other} (expected \"continue\" or \"stop\")"
            )),
        }
    }
}

/// Fingerprint/caching strategy selected with `--cache`.
///
/// - `None`: no fingerprinting, every task always executes.
/// - `Sha256`: SHA-256 over the task's own inputs, command and env.
/// - `Merkle` (default): blake3 over inputs, command, env *and* the
///   fingerprints of all direct dependencies, so a changed leaf invalidates
///   every downstream entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CacheMode {
    None,
    Sha256,
    #[default]
    Merkle,
}

/// Which object-store driver backs the remote cache regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CacheBackendKind {
    #[default]
    Local,
    S3,
    Gs,
    Azure,
}

impl CacheBackendKind {
    /// Backend selection, with the `STORAGE_BACKEND` env var taking
    /// precedence over the given default.
    pub fn from_env_or(default: Self) -> Self {
        match std::env::var("STORAGE_BACKEND").ok().as_deref() {
            Some("s3") => CacheBackendKind::S3,
            Some("gs") | Some("gcs") => CacheBackendKind::Gs,
            Some("azure") => CacheBackendKind::Azure,
            Some("local") => CacheBackendKind::Local,
            _ => default,
        }
    }
}

/// How Ctrl-C / SIGTERM is handled mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SignalMode {
    /// Stop admitting tasks, terminate children, wait a grace period,
    /// force-kill stragglers, then print a partial summary.
    #[default]
    Graceful,
    /// Kill everything and exit right away.
    Immediate,
}

/// Parse the `-j` flag: an explicit worker count or `auto`.
pub fn parse_concurrency(s: &str) -> Result<usize, String> {
    if s.trim().eq_ignore_ascii_case("auto") {
        return Ok(detect_concurrency());
    }
    match s.trim().parse::<usize>() {
        Ok(0) => Err("-j must be >= 1 (got 0)".to_string()),
        Ok(n) => Ok(n),
        Err(_) => Err(format!(
            "invalid -j value: {s} (expected a number or \"auto\")"
        )),
    }
}

/// Detected CPU count, used for `-j auto` and `detect-concurrency`.
pub fn detect_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_failure_from_str() {
        assert_eq!(
            "continue".parse::<OnFailure>().unwrap(),
            OnFailure::Continue
        );
        assert_eq!(" STOP ".parse::<OnFailure>().unwrap(), OnFailure::Stop);
        assert!("abort".parse::<OnFailure>().is_err());
    }

    #[test]
    fn concurrency_parsing() {
        assert_eq!(parse_concurrency("3").unwrap(), 3);
        assert!(parse_concurrency("auto").unwrap() >= 1);
        assert!(parse_concurrency("0").is_err());
        assert!(parse_concurrency("many").is_err());
    }
}
