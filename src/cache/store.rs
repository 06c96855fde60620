//! Storage backends - the blob stores tiers are built on
//!
//! Backends are opaque content-addressed stores: a namespace (one cache
//! location) holds blobs addressed by key parts. [`FsStore`] lays them out as
//! `<root>/<namespace>/<part0>/<part1>.json`.

use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::core::util::dir_size;
use crate::error::StoreError;

/// Result type for backend operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Blob storage used by a tier
pub trait StoreBackend: Send + Sync + fmt::Debug {
    /// Whether a blob exists
    fn contains(&self, namespace: &str, parts: &[&str]) -> StoreResult<bool>;

    /// Fetch a blob, `None` if absent
    fn get(&self, namespace: &str, parts: &[&str]) -> StoreResult<Option<Vec<u8>>>;

    /// Store a blob, replacing any previous one
    fn put(&self, namespace: &str, parts: &[&str], bytes: &[u8]) -> StoreResult<()>;

    /// Remove every blob but keep the namespace itself
    fn remove_all(&self, namespace: &str) -> StoreResult<()>;

    /// Remove the namespace entirely
    fn destroy(&self, namespace: &str) -> StoreResult<()>;

    /// Bytes used, `None` if the namespace was never created
    fn estimate_size(&self, namespace: &str) -> StoreResult<Option<u64>>;

    /// Human-readable location of a namespace
    fn describe(&self, namespace: &str) -> String;
}

/// Local filesystem store
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

const BLOB_EXT: &str = "json";

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(namespace)
    }

    fn blob_path(&self, namespace: &str, parts: &[&str]) -> StoreResult<PathBuf> {
        let (last, dirs) = parts
            .split_last()
            .ok_or_else(|| StoreError::Backend("empty key".to_string()))?;
        let mut path = self.namespace_dir(namespace);
        for part in dirs.iter().chain(std::iter::once(last)) {
            if part.is_empty() || part.contains(['/', '\\']) || *part == ".." || *part == "." {
                return Err(StoreError::Backend(format!("invalid key part '{}'", part)));
            }
        }
        for dir in dirs {
            path.push(dir);
        }
        path.push(format!("{}.{}", last, BLOB_EXT));
        Ok(path)
    }
}

impl StoreBackend for FsStore {
    fn contains(&self, namespace: &str, parts: &[&str]) -> StoreResult<bool> {
        let path = self.blob_path(namespace, parts)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    fn get(&self, namespace: &str, parts: &[&str]) -> StoreResult<Option<Vec<u8>>> {
        let path = self.blob_path(namespace, parts)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    fn put(&self, namespace: &str, parts: &[&str], bytes: &[u8]) -> StoreResult<()> {
        let path = self.blob_path(namespace, parts)?;
        let dir = path
            .parent()
            .ok_or_else(|| StoreError::Backend(format!("no parent for {:?}", path)))?;
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

        // Write next to the target and rename, so readers never see a torn blob
        // and concurrent writers of one key resolve to the last rename.
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
        if let Err(e) = tmp.write_all(bytes).and_then(|_| tmp.flush()) {
            return Err(StoreError::io(tmp.path(), e));
        }
        tmp.persist(&path)
            .map_err(|e| StoreError::io(&path, e.error))?;
        Ok(())
    }

    fn remove_all(&self, namespace: &str) -> StoreResult<()> {
        let dir = self.namespace_dir(namespace);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StoreError::io(dir, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            let path = entry.path();
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed.map_err(|e| StoreError::io(&path, e))?;
        }
        Ok(())
    }

    fn destroy(&self, namespace: &str) -> StoreResult<()> {
        let dir = self.namespace_dir(namespace);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(dir, e)),
        }
    }

    fn estimate_size(&self, namespace: &str) -> StoreResult<Option<u64>> {
        let dir = self.namespace_dir(namespace);
        dir_size(&dir).map_err(|e| StoreError::io(dir, e))
    }

    fn describe(&self, namespace: &str) -> String {
        self.namespace_dir(namespace).display().to_string()
    }
}
