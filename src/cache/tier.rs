//! A single cache level over a storage backend

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::memory::MemoryStore;
use crate::cache::meta::CacheEntry;
use crate::cache::store::{FsStore, StoreBackend};
use crate::core::finite::ensure_finite;
use crate::core::key::{CacheKey, FunctionIdentity};
use crate::core::model::TierReport;
use crate::core::paths::{cache_name, parse_location, split_location};
use crate::core::util::format_size;
use crate::error::{CacheError, Result, StoreError};

/// Cache level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TierKind {
    /// Fast, machine-local, cleared with the process
    #[serde(rename = "mem")]
    Volatile,
    /// Survives process restarts
    #[serde(rename = "disk")]
    Durable,
}

impl TierKind {
    /// Lookup order
    pub const ALL: [TierKind; 2] = [TierKind::Volatile, TierKind::Durable];

    pub fn as_str(self) -> &'static str {
        match self {
            TierKind::Volatile => "mem",
            TierKind::Durable => "disk",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TierKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mem" => Ok(TierKind::Volatile),
            "disk" => Ok(TierKind::Durable),
            other => Err(CacheError::InvalidTierKind(other.to_string())),
        }
    }
}

/// One tier kind, or every tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierSelector {
    One(TierKind),
    All,
}

impl TierSelector {
    pub fn kinds(self) -> Vec<TierKind> {
        match self {
            TierSelector::One(kind) => vec![kind],
            TierSelector::All => TierKind::ALL.to_vec(),
        }
    }
}

impl From<TierKind> for TierSelector {
    fn from(kind: TierKind) -> Self {
        TierSelector::One(kind)
    }
}

impl FromStr for TierSelector {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "all" {
            return Ok(TierSelector::All);
        }
        s.parse().map(TierSelector::One)
    }
}

/// Best-effort size of a tier's backing location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "bytes", rename_all = "snake_case")]
pub enum SizeInfo {
    /// Backing location does not exist yet
    NotCreated,
    Bytes(u64),
}

impl SizeInfo {
    pub fn bytes(self) -> Option<u64> {
        match self {
            SizeInfo::NotCreated => None,
            SizeInfo::Bytes(n) => Some(n),
        }
    }
}

impl fmt::Display for SizeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeInfo::NotCreated => f.write_str("not created yet"),
            SizeInfo::Bytes(n) => f.write_str(&format_size(*n)),
        }
    }
}

/// A cache level: one namespace on one backend
pub struct Tier {
    kind: TierKind,
    tag: Option<String>,
    namespace: String,
    backend: Arc<dyn StoreBackend>,
}

impl fmt::Debug for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tier")
            .field("kind", &self.kind)
            .field("tag", &self.tag)
            .field("location", &self.location())
            .finish()
    }
}

impl Tier {
    /// Filesystem tier named `tmp.cache.<kind>[.<tag>]` under `root`
    pub fn new(kind: TierKind, root: &Path, tag: Option<&str>) -> Self {
        Self::with_backend(
            kind,
            tag,
            cache_name(kind, tag),
            Arc::new(FsStore::new(root)),
        )
    }

    /// Filesystem tier at an explicit location (path or `file://` URI)
    pub fn at_location(kind: TierKind, location: &str) -> Result<Self> {
        let path = parse_location(location)?;
        let (root, namespace) = split_location(&path);
        if namespace.is_empty() {
            return Err(CacheError::UnsupportedLocation(location.to_string()));
        }
        Ok(Self::with_backend(
            kind,
            None,
            namespace,
            Arc::new(FsStore::new(root)),
        ))
    }

    /// Tier held in process memory
    pub fn in_memory(kind: TierKind, tag: Option<&str>) -> Self {
        Self::with_backend(
            kind,
            tag,
            cache_name(kind, tag),
            Arc::new(MemoryStore::new()),
        )
    }

    /// Tier over any backend, e.g. a remote object store
    pub fn with_backend(
        kind: TierKind,
        tag: Option<&str>,
        namespace: impl Into<String>,
        backend: Arc<dyn StoreBackend>,
    ) -> Self {
        Self {
            kind,
            tag: tag.map(str::to_string),
            namespace: namespace.into(),
            backend,
        }
    }

    pub fn kind(&self) -> TierKind {
        self.kind
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn location(&self) -> String {
        self.backend.describe(&self.namespace)
    }

    fn io(&self, source: StoreError) -> CacheError {
        CacheError::tier_io(self.kind.as_str(), source)
    }

    fn read_entry(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let Some(bytes) = self
            .backend
            .get(&self.namespace, &key.parts())
            .map_err(|e| self.io(e))?
        else {
            return Ok(None);
        };
        let entry = serde_json::from_slice(&bytes).map_err(|e| {
            self.io(StoreError::Corrupt {
                location: format!("{}/{}", self.location(), key),
                reason: e.to_string(),
            })
        })?;
        Ok(Some(entry))
    }

    /// Whether an entry for `key` exists and was computed from `source`
    pub fn contains(&self, key: &CacheKey, source: &str) -> Result<bool> {
        if !self
            .backend
            .contains(&self.namespace, &key.parts())
            .map_err(|e| self.io(e))?
        {
            return Ok(false);
        }
        let found = match self.read_entry(key)? {
            Some(entry) => entry.matches(key, source),
            None => false,
        };
        if !found {
            debug!(tier = %self.kind, %key, "stored entry is stale");
        }
        Ok(found)
    }

    /// Value stored for `key` if it was computed from `source`.
    ///
    /// The entry is read once; absent and stale entries are both `None`.
    pub fn lookup<R: DeserializeOwned>(&self, key: &CacheKey, source: &str) -> Result<Option<R>> {
        let Some(entry) = self.read_entry(key)? else {
            return Ok(None);
        };
        if !entry.matches(key, source) {
            debug!(tier = %self.kind, %key, "stored entry is stale");
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(entry.value)?))
    }

    /// Fetch the value stored for `key`
    pub fn get<R: DeserializeOwned>(&self, key: &CacheKey) -> Result<R> {
        let entry = self.read_entry(key)?.ok_or_else(|| CacheError::Miss {
            tier: self.kind.as_str().to_string(),
        })?;
        Ok(serde_json::from_value(entry.value)?)
    }

    /// Store `value` for `key`, recording the source it was computed with.
    ///
    /// Values holding NaN or infinite floats are refused with
    /// [`CacheError::Serialization`], since they would decode as `null`.
    pub fn put<R: Serialize>(
        &self,
        key: &CacheKey,
        identity: &FunctionIdentity,
        value: &R,
    ) -> Result<()> {
        ensure_finite(value)?;
        let entry = CacheEntry::new(key, identity, serde_json::to_value(value)?);
        let bytes = serde_json::to_vec(&entry)?;
        self.backend
            .put(&self.namespace, &key.parts(), &bytes)
            .map_err(|e| self.io(e))
    }

    /// Empty the tier; with `destroy` also remove its backing location
    pub fn clear(&self, destroy: bool) -> Result<()> {
        let before = self.size()?;
        warn!("Resetting {} cache '{}'", self.kind, self.location());
        let cleared = if destroy {
            warn!("Destroying ...");
            self.backend.destroy(&self.namespace)
        } else {
            self.backend.remove_all(&self.namespace)
        };
        cleared.map_err(|e| self.io(e))?;
        let after = self.size()?;
        info!("# Info: '{}' cache size {} -> {}", self.kind, before, after);
        Ok(())
    }

    pub fn size(&self) -> Result<SizeInfo> {
        let size = self
            .backend
            .estimate_size(&self.namespace)
            .map_err(|e| self.io(e))?;
        Ok(size.map_or(SizeInfo::NotCreated, SizeInfo::Bytes))
    }

    pub fn info(&self) -> Result<TierReport> {
        Ok(TierReport {
            kind: self.kind,
            tag: self.tag.clone(),
            location: self.location(),
            size: self.size()?,
        })
    }
}
