//! Filesystem object store: `/`-separated keys mapped under a root directory.
//!
//! Stands in for a bucket. Raw batches are read from it, scored batches and
//! summaries are written back to it.

use crate::storage::{BatchSink, BatchSource, StoreError, SummarySink};
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let well_formed = !key.is_empty()
            && !key.ends_with('/')
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !well_formed {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    pub fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.resolve(key)?;
        fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::NotFound { key: key.to_string() },
            _ => StoreError::Io(e),
        })
    }

    /// Write `body` under `key`, replacing any previous object atomically.
    pub fn put(&self, key: &str, body: &[u8]) -> Result<(), StoreError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_file_name(format!(
            ".{}.{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("object"),
            uuid::Uuid::new_v4()
        ));
        fs::write(&tmp, body)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!(%key, bytes = body.len(), "Object written");
        Ok(())
    }

    /// All keys starting with `prefix`, sorted ascending.
    pub fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        collect_keys(&self.root, &self.root, &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }
}

fn collect_keys(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<(), StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_keys(root, &path, out)?;
            continue;
        }
        // In-flight writes
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if let Ok(relative) = path.strip_prefix(root) {
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(key);
        }
    }
    Ok(())
}

impl BatchSource for FsObjectStore {
    fn fetch_batch(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.get(key)
    }
}

impl BatchSink for FsObjectStore {
    fn put_batch(&self, key: &str, body: &[u8]) -> Result<(), StoreError> {
        self.put(key, body)
    }
}

impl SummarySink for FsObjectStore {
    fn put_summary(&self, key: &str, body: &[u8]) -> Result<(), StoreError> {
        self.put(key, body)
    }
}
