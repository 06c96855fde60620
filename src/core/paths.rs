//! Cache naming and location resolution

use std::path::{Path, PathBuf};

use crate::cache::tier::TierKind;
use crate::error::{CacheError, Result};

/// RAM disk used for the volatile tier when it is mounted
pub const TMPFS_ROOT: &str = "/mnt/tmpfs";

/// Canonical directory name for a tier, e.g. `tmp.cache.mem.unit_tests`
pub fn cache_name(kind: TierKind, tag: Option<&str>) -> String {
    let mut name = format!("tmp.cache.{}", kind.as_str());
    if let Some(tag) = tag {
        name.push('.');
        name.push_str(tag);
    }
    name
}

/// Default root for the volatile tier: the RAM disk if present, else the OS temp dir
pub fn default_volatile_root() -> PathBuf {
    let tmpfs = Path::new(TMPFS_ROOT);
    if tmpfs.is_dir() {
        tmpfs.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

/// Default root for the durable tier: the current project directory
pub fn default_durable_root() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Resolve a location string (plain path or `file://` URI) to a local path.
pub fn parse_location(location: &str) -> Result<PathBuf> {
    if let Some(path) = location.strip_prefix("file://") {
        if path.is_empty() {
            return Err(CacheError::UnsupportedLocation(location.to_string()));
        }
        return Ok(PathBuf::from(path));
    }
    if let Some((scheme, _)) = location.split_once("://") {
        if !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+') {
            return Err(CacheError::UnsupportedLocation(location.to_string()));
        }
    }
    if location.trim().is_empty() {
        return Err(CacheError::UnsupportedLocation(location.to_string()));
    }
    Ok(PathBuf::from(location))
}

/// Split a location into (root, namespace) so that `root.join(namespace)` is the location.
pub fn split_location(path: &Path) -> (PathBuf, String) {
    let namespace = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let root = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    (root, namespace)
}
