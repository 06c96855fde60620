//! Cache settings
//!
//! Settings are plain values with defaults; `from_env` layers the
//! `MEMOTIER_*` environment variables on top.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::paths::{default_durable_root, default_volatile_root};
use crate::error::{CacheError, Result};

pub const ENV_VOLATILE_ROOT: &str = "MEMOTIER_VOLATILE_ROOT";
pub const ENV_DURABLE_ROOT: &str = "MEMOTIER_DURABLE_ROOT";
pub const ENV_ENABLED: &str = "MEMOTIER_ENABLED";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Directory holding the volatile tier directories
    pub volatile_root: PathBuf,

    /// Directory holding the durable tier directories
    pub durable_root: PathBuf,

    /// Initial state of the global enable switch
    pub enabled: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            volatile_root: default_volatile_root(),
            durable_root: default_durable_root(),
            enabled: true,
        }
    }
}

impl CacheSettings {
    /// Both tiers under one scratch directory, e.g. for tests
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            volatile_root: root.join("volatile"),
            durable_root: root.join("durable"),
            enabled: true,
        }
    }

    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by `lookup(variable)`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        if let Some(root) = lookup(ENV_VOLATILE_ROOT).filter(|v| !v.is_empty()) {
            settings.volatile_root = PathBuf::from(root);
        }
        if let Some(root) = lookup(ENV_DURABLE_ROOT).filter(|v| !v.is_empty()) {
            settings.durable_root = PathBuf::from(root);
        }
        if let Some(flag) = lookup(ENV_ENABLED) {
            settings.enabled = parse_bool(&flag).ok_or_else(|| {
                CacheError::Config(format!("{}='{}' is not a boolean", ENV_ENABLED, flag))
            })?;
        }
        Ok(settings)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = CacheSettings::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(settings, CacheSettings::default());
        assert!(settings.enabled);
    }

    #[test]
    fn test_env_overrides() {
        let settings = CacheSettings::from_lookup(lookup_from(&[
            (ENV_VOLATILE_ROOT, "/fast"),
            (ENV_DURABLE_ROOT, "/slow"),
            (ENV_ENABLED, "off"),
        ]))
        .unwrap();
        assert_eq!(settings.volatile_root, PathBuf::from("/fast"));
        assert_eq!(settings.durable_root, PathBuf::from("/slow"));
        assert!(!settings.enabled);
    }

    #[test]
    fn test_bad_boolean() {
        let err = CacheSettings::from_lookup(lookup_from(&[(ENV_ENABLED, "maybe")])).unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }

    #[test]
    fn test_rooted_at() {
        let settings = CacheSettings::rooted_at("/scratch");
        assert_eq!(settings.volatile_root, PathBuf::from("/scratch/volatile"));
        assert_eq!(settings.durable_root, PathBuf::from("/scratch/durable"));
    }
}
