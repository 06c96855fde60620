//! Stored entry format

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::key::{CacheKey, FunctionIdentity};

/// Entry format version, bumped when the layout changes
pub const ENTRY_VERSION: u32 = 1;

/// One memoized result as written to a backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Entry format version
    pub version: u32,

    pub function_digest: String,
    pub args_digest: String,

    /// Qualified name of the callable that produced the value
    pub qualified_name: String,

    /// Source snippet the value was computed with
    pub source: String,

    /// When the value was computed
    pub created_at: DateTime<Utc>,

    pub value: Value,
}

impl CacheEntry {
    pub fn new(key: &CacheKey, identity: &FunctionIdentity, value: Value) -> Self {
        Self {
            version: ENTRY_VERSION,
            function_digest: key.function_digest.clone(),
            args_digest: key.args_digest.clone(),
            qualified_name: identity.qualified_name().to_string(),
            source: identity.source().to_string(),
            created_at: Utc::now(),
            value,
        }
    }

    /// Whether this entry was produced by the same callable definition under `key`
    pub fn matches(&self, key: &CacheKey, source: &str) -> bool {
        self.version == ENTRY_VERSION
            && self.function_digest == key.function_digest
            && self.args_digest == key.args_digest
            && self.source == source
    }
}
