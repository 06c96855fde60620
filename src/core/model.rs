//! Report model
//!
//! Operational commands (info, clear) describe the cache state with these
//! types before rendering output.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cache::tier::{SizeInfo, TierKind};

/// State of one tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierReport {
    pub kind: TierKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// Backing location (path or backend URI)
    pub location: String,

    pub size: SizeInfo,
}

impl fmt::Display for TierReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.size {
            SizeInfo::NotCreated => write!(
                f,
                "'{}' cache in '{}' doesn't exist yet",
                self.kind, self.location
            ),
            SizeInfo::Bytes(_) => write!(
                f,
                "'{}' cache in '{}' has size={}",
                self.kind, self.location, self.size
            ),
        }
    }
}

/// State of the caches of one context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheReport {
    pub caching_enabled: bool,

    /// What was done before the report was taken (e.g. `clear`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    pub tiers: Vec<TierReport>,
}

impl CacheReport {
    pub fn new(caching_enabled: bool, tiers: Vec<TierReport>) -> Self {
        Self {
            caching_enabled,
            action: None,
            tiers,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Sum of the sizes of tiers that exist
    pub fn total_bytes(&self) -> u64 {
        self.tiers.iter().filter_map(|t| t.size.bytes()).sum()
    }
}

impl fmt::Display for CacheReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<&str> = self.tiers.iter().map(|t| t.kind.as_str()).collect();
        writeln!(f, "# caching_enabled={}", self.caching_enabled)?;
        if let Some(action) = &self.action {
            writeln!(f, "# action={}", action)?;
        }
        write!(f, "# cache_types=[{}]", kinds.join(", "))?;
        for tier in &self.tiers {
            write!(f, "\n{}", tier)?;
        }
        Ok(())
    }
}
