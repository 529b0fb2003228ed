// src/fingerprint/mod.rs

//! Content-addressed task fingerprints.
//!
//! A fingerprint covers, in a fixed order:
//! - every input file matched by the task's `inputs` globs, as
//!   `(workspace-relative path, contents)` pairs sorted by path
//! - the command string
//! - the task-level environment, sorted by key
//! - in dependency-aware mode, the fingerprints of all direct dependencies
//!
//! Two fingerprints computed on different machines from identical inputs are
//! identical, which is what makes the remote cache shareable.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::Digest;
use tracing::trace;

use crate::dag::ScheduledTask;
use crate::engine::TaskName;
use crate::fs::{FileSystem, walk_files};
use crate::types::CacheMode;

/// Hex-encoded content hash of one task's inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(hex: String) -> Self {
        Fingerprint(hex)
    }
}

/// One hasher interface over the two supported algorithms.
enum ContentHasher {
    Blake3(blake3::Hasher),
    Sha256(sha2::Sha256),
}

impl ContentHasher {
    fn for_mode(mode: CacheMode) -> Self {
        match mode {
            CacheMode::Sha256 => ContentHasher::Sha256(sha2::Sha256::new()),
            _ => ContentHasher::Blake3(blake3::Hasher::new()),
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        match self {
            ContentHasher::Blake3(h) => {
                h.update(bytes);
            }
            ContentHasher::Sha256(h) => {
                h.update(bytes);
            }
        }
    }

    fn finalize(self) -> String {
        match self {
            ContentHasher::Blake3(h) => h.finalize().to_hex().to_string(),
            ContentHasher::Sha256(h) => {
                let digest = h.finalize();
                digest.iter().map(|b| format!("{b:02x}")).collect()
            }
        }
    }
}

/// Compile glob patterns into a single matcher.
pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob =
            Glob::new(pattern).with_context(|| format!("invalid glob pattern {pattern:?}"))?;
        builder.add(glob);
    }
    builder.build().context("building glob set")
}

/// Files under `root` whose workspace-relative path matches `globs`,
/// sorted by relative path.
pub fn collect_matching_files(
    fs: &dyn FileSystem,
    root: &Path,
    globs: &GlobSet,
) -> Result<Vec<PathBuf>> {
    let mut matched: Vec<PathBuf> = walk_files(fs, root)?
        .into_iter()
        .filter_map(|abs| {
            let rel = abs.strip_prefix(root).ok()?.to_path_buf();
            globs.is_match(&rel).then_some(rel)
        })
        .collect();
    matched.sort();
    Ok(matched)
}

/// Computes and memoizes fingerprints for one run.
///
/// The memo is shared across worker tasks; a dependency's fingerprint is
/// always recorded before any of its dependents are dispatched, so lookups
/// for dependency fingerprints never miss.
pub struct FingerprintEngine {
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
    mode: CacheMode,
    memo: Mutex<HashMap<TaskName, Fingerprint>>,
}

impl fmt::Debug for FingerprintEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FingerprintEngine")
            .field("root", &self.root)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl FingerprintEngine {
    pub fn new(root: PathBuf, fs: Arc<dyn FileSystem>, mode: CacheMode) -> Self {
        Self {
            root,
            fs,
            mode,
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Memoized fingerprint of `task`, or `None` with caching disabled.
    ///
    /// In dependency-aware mode every direct dependency must already be
    /// fingerprinted; the scheduler guarantees this by dispatching tasks in
    /// topological order.
    pub fn fingerprint_of(&self, task: &ScheduledTask) -> Result<Option<Fingerprint>> {
        if self.mode == CacheMode::None {
            return Ok(None);
        }

        if let Some(fp) = self.lookup(&task.name) {
            return Ok(Some(fp));
        }

        let dep_fps = self.dependency_fingerprints(task)?;
        let fp = self.compute(task, &dep_fps)?;
        trace!(task = %task.name, fingerprint = fp.short(), "computed fingerprint");

        self.memo
            .lock()
            .expect("fingerprint memo lock poisoned")
            .insert(task.name.clone(), fp.clone());

        Ok(Some(fp))
    }

    fn lookup(&self, task: &str) -> Option<Fingerprint> {
        self.memo
            .lock()
            .expect("fingerprint memo lock poisoned")
            .get(task)
            .cloned()
    }

    fn dependency_fingerprints(
        &self,
        task: &ScheduledTask,
    ) -> Result<BTreeMap<TaskName, Fingerprint>> {
        let mut dep_fps = BTreeMap::new();
        if self.mode != CacheMode::Merkle {
            return Ok(dep_fps);
        }

        let memo = self.memo.lock().expect("fingerprint memo lock poisoned");
        for dep in &task.deps {
            match memo.get(dep) {
                Some(fp) => {
                    dep_fps.insert(dep.clone(), fp.clone());
                }
                None => bail!(
                    "dependency '{dep}' of task '{}' has no recorded fingerprint",
                    task.name
                ),
            }
        }
        Ok(dep_fps)
    }

    fn compute(
        &self,
        task: &ScheduledTask,
        dep_fps: &BTreeMap<TaskName, Fingerprint>,
    ) -> Result<Fingerprint> {
        let mut hasher = ContentHasher::for_mode(self.mode);

        let globs = build_globset(&task.inputs)?;
        let files = collect_matching_files(self.fs.as_ref(), &self.root, &globs)?;
        for rel in &files {
            // Forward slashes so the same tree hashes identically on
            // Windows and Unix.
            let portable = rel.to_string_lossy().replace('\\', "/");
            hasher.update(b"file\0");
            hasher.update(portable.as_bytes());
            hasher.update(b"\0");
            hasher.update(&self.fs.read(&self.root.join(rel))?);
        }

        hasher.update(b"cmd\0");
        hasher.update(task.cmd.as_bytes());

        for (key, value) in &task.env {
            hasher.update(b"env\0");
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }

        for (dep, fp) in dep_fps {
            hasher.update(b"dep\0");
            hasher.update(dep.as_bytes());
            hasher.update(b"\0");
            hasher.update(fp.as_str().as_bytes());
        }

        Ok(Fingerprint(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::config::model::RetryConfig;
    use crate::fs::mock::MockFileSystem;

    use super::*;

    fn task(name: &str, cmd: &str, inputs: &[&str], deps: &[&str]) -> ScheduledTask {
        ScheduledTask {
            name: name.to_string(),
            cmd: cmd.to_string(),
            working_dir: None,
            env: BTreeMap::new(),
            platforms: None,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: Vec::new(),
            retry: RetryConfig::default(),
            deps: deps.iter().map(|s| s.to_string()).collect(),
            max_parallel: None,
            memory_limit_mb: None,
        }
    }

    fn engine_with(mode: CacheMode, fs: MockFileSystem) -> FingerprintEngine {
        FingerprintEngine::new(PathBuf::from("/ws"), Arc::new(fs), mode)
    }

    #[test]
    fn disabled_mode_yields_no_fingerprint() {
        let engine = engine_with(CacheMode::None, MockFileSystem::new());
        let fp = engine.fingerprint_of(&task("a", "true", &[], &[])).unwrap();
        assert!(fp.is_none());
    }

    #[test]
    fn same_inputs_same_fingerprint() {
        let fs = MockFileSystem::new();
        fs.add_file("/ws/src/main.c", "int main(){}");

        let a = engine_with(CacheMode::Merkle, fs.clone())
            .fingerprint_of(&task("build", "cc src/main.c", &["src/**"], &[]))
            .unwrap()
            .unwrap();
        let b = engine_with(CacheMode::Merkle, fs)
            .fingerprint_of(&task("build", "cc src/main.c", &["src/**"], &[]))
            .unwrap()
            .unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn content_change_changes_fingerprint() {
        let fs = MockFileSystem::new();
        fs.add_file("/ws/src/main.c", "int main(){}");
        let engine = engine_with(CacheMode::Merkle, fs.clone());
        let before = engine
            .fingerprint_of(&task("build", "cc", &["src/**"], &[]))
            .unwrap()
            .unwrap();

        fs.add_file("/ws/src/main.c", "int main(){return 1;}");
        let engine = engine_with(CacheMode::Merkle, fs);
        let after = engine
            .fingerprint_of(&task("build", "cc", &["src/**"], &[]))
            .unwrap()
            .unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn removing_an_input_changes_the_fingerprint() {
        let fs = MockFileSystem::new();
        fs.add_file("/ws/src/a.c", "a");
        fs.add_file("/ws/src/b.c", "b");
        let before = engine_with(CacheMode::Merkle, fs.clone())
            .fingerprint_of(&task("build", "cc", &["src/**"], &[]))
            .unwrap()
            .unwrap();

        fs.remove_file(Path::new("/ws/src/b.c"));
        let after = engine_with(CacheMode::Merkle, fs)
            .fingerprint_of(&task("build", "cc", &["src/**"], &[]))
            .unwrap()
            .unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn command_and_env_participate() {
        let engine = engine_with(CacheMode::Merkle, MockFileSystem::new());
        let base = engine
            .fingerprint_of(&task("a", "make", &[], &[]))
            .unwrap()
            .unwrap();

        let engine = engine_with(CacheMode::Merkle, MockFileSystem::new());
        let other_cmd = engine
            .fingerprint_of(&task("a", "make -j", &[], &[]))
            .unwrap()
            .unwrap();
        assert_ne!(base, other_cmd);

        let mut with_env = task("a", "make", &[], &[]);
        with_env.env.insert("CC".into(), "clang".into());
        let engine = engine_with(CacheMode::Merkle, MockFileSystem::new());
        let env_fp = engine.fingerprint_of(&with_env).unwrap().unwrap();
        assert_ne!(base, env_fp);
    }

    #[test]
    fn merkle_mode_propagates_dependency_changes() {
        let fs = MockFileSystem::new();
        fs.add_file("/ws/lib/util.c", "v1");

        let engine = engine_with(CacheMode::Merkle, fs.clone());
        engine
            .fingerprint_of(&task("lib", "cc lib", &["lib/**"], &[]))
            .unwrap();
        let app_v1 = engine
            .fingerprint_of(&task("app", "cc app", &[], &["lib"]))
            .unwrap()
            .unwrap();

        fs.add_file("/ws/lib/util.c", "v2");
        let engine = engine_with(CacheMode::Merkle, fs);
        engine
            .fingerprint_of(&task("lib", "cc lib", &["lib/**"], &[]))
            .unwrap();
        let app_v2 = engine
            .fingerprint_of(&task("app", "cc app", &[], &["lib"]))
            .unwrap()
            .unwrap();

        assert_ne!(app_v1, app_v2);
    }

    #[test]
    fn sha256_mode_ignores_dependency_fingerprints() {
        let fs = MockFileSystem::new();
        fs.add_file("/ws/lib/util.c", "v1");

        let engine = engine_with(CacheMode::Sha256, fs.clone());
        engine
            .fingerprint_of(&task("lib", "cc lib", &["lib/**"], &[]))
            .unwrap();
        let app_v1 = engine
            .fingerprint_of(&task("app", "cc app", &[], &["lib"]))
            .unwrap()
            .unwrap();

        fs.add_file("/ws/lib/util.c", "v2");
        let engine = engine_with(CacheMode::Sha256, fs);
        engine
            .fingerprint_of(&task("lib", "cc lib", &["lib/**"], &[]))
            .unwrap();
        let app_v2 = engine
            .fingerprint_of(&task("app", "cc app", &[], &["lib"]))
            .unwrap()
            .unwrap();

        // The app task has no inputs of its own, so without dependency
        // propagation its fingerprint is stable.
        assert_eq!(app_v1, app_v2);
        assert_eq!(app_v1.as_str().len(), 64);
    }

    #[test]
    fn missing_dependency_fingerprint_is_an_error() {
        let engine = engine_with(CacheMode::Merkle, MockFileSystem::new());
        let err = engine
            .fingerprint_of(&task("app", "cc", &[], &["lib"]))
            .unwrap_err();
        assert!(err.to_string().contains("no recorded fingerprint"));
    }

    #[test]
    fn glob_collection_sorts_and_filters() {
        let fs = MockFileSystem::new();
        fs.add_file("/ws/src/b.c", "b");
        fs.add_file("/ws/src/a.c", "a");
        fs.add_file("/ws/README.md", "docs");

        let globs = build_globset(&["src/**".to_string()]).unwrap();
        let files = collect_matching_files(&fs, Path::new("/ws"), &globs).unwrap();
        assert_eq!(
            files,
            vec![PathBuf::from("src/a.c"), PathBuf::from("src/b.c")]
        );
    }
}
