// src/fs/mock.rs

//! In-memory filesystem for tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};

use super::FileSystem;

/// In-memory [`FileSystem`] backed by a map of file paths to contents.
///
/// Directories are implicit: a path is a directory if any stored file lives
/// under it. Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    files: Arc<Mutex<BTreeMap<PathBuf, Vec<u8>>>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        self.files
            .lock()
            .expect("mock fs lock poisoned")
            .insert(path.into(), contents.into());
    }

    pub fn remove_file(&self, path: &Path) {
        self.files
            .lock()
            .expect("mock fs lock poisoned")
            .remove(path);
    }
}

impl FileSystem for MockFileSystem {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.files
            .lock()
            .expect("mock fs lock poisoned")
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("mock fs: no such file {path:?}"))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.add_file(path, contents.to_vec());
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.is_file(path) || self.is_dir(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.files
            .lock()
            .expect("mock fs lock poisoned")
            .contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        let files = self.files.lock().expect("mock fs lock poisoned");
        files.keys().any(|p| p.starts_with(path) && p != path)
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        Ok(self.read(path)?.len() as u64)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let files = self.files.lock().expect("mock fs lock poisoned");
        let mut entries: Vec<PathBuf> = Vec::new();

        for file in files.keys() {
            let Ok(rest) = file.strip_prefix(path) else {
                continue;
            };
            // First component under `path` (a file or an implicit subdir).
            if let Some(first) = rest.components().next() {
                let child = path.join(first.as_os_str());
                if !entries.contains(&child) {
                    entries.push(child);
                }
            }
        }

        Ok(entries)
    }
}
