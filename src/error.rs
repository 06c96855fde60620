//! Error types for the memoization engine
//!
//! Only [`CacheError::Miss`] is ever recovered inside the crate (it turns into a
//! fallthrough to the next tier or to execution). Everything else reaches the
//! caller unchanged.

use std::path::PathBuf;

use thiserror::Error;

/// Failure raised by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem operation failed
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored blob could not be decoded
    #[error("corrupt entry at {location}: {reason}")]
    Corrupt { location: String, reason: String },

    /// Backend-specific failure (e.g. an injected remote store)
    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors surfaced by tiers, the registry and memoizers.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Arguments could not be canonically encoded, or the callable identity is incomplete
    #[error("cannot derive cache key: {0}")]
    KeyDerivation(String),

    /// Entry is absent from a tier
    #[error("cache miss in '{tier}' tier")]
    Miss { tier: String },

    /// Storage I/O failure, distinct from a miss
    #[error("'{tier}' tier I/O error: {source}")]
    TierIo {
        tier: String,
        #[source]
        source: StoreError,
    },

    /// Unknown tier kind requested
    #[error("invalid tier kind '{0}' (expected one of: mem, disk, all)")]
    InvalidTierKind(String),

    /// Location scheme without a backend
    #[error("unsupported cache location '{0}': only local paths and file:// URIs are supported")]
    UnsupportedLocation(String),

    /// Operation needs a function-specific cache
    #[error("function '{0}' has no function-specific cache")]
    NoFunctionCache(String),

    /// Cached value could not be encoded or decoded
    #[error("value serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CacheError {
    pub(crate) fn tier_io(tier: impl Into<String>, source: StoreError) -> Self {
        CacheError::TierIo {
            tier: tier.into(),
            source,
        }
    }

    /// Whether this error is the internal miss signal.
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::Miss { .. })
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, CacheError>;
