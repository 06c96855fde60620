//! Registry of shared tiers
//!
//! One tier per `(kind, tag)`, built on first use. The map lock is held while a
//! tier is constructed, so concurrent first access yields a single instance.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::cache::tier::{Tier, TierKind, TierSelector};
use crate::config::CacheSettings;
use crate::core::model::TierReport;
use crate::error::{CacheError, Result};

type Slot = (TierKind, Option<String>);

#[derive(Debug)]
pub struct CacheRegistry {
    volatile_root: PathBuf,
    durable_root: PathBuf,
    tiers: Mutex<HashMap<Slot, Arc<Tier>>>,
}

impl CacheRegistry {
    pub fn new(settings: &CacheSettings) -> Self {
        Self {
            volatile_root: settings.volatile_root.clone(),
            durable_root: settings.durable_root.clone(),
            tiers: Mutex::new(HashMap::new()),
        }
    }

    /// Root directory under which tiers of `kind` are created
    pub fn root(&self, kind: TierKind) -> &Path {
        match kind {
            TierKind::Volatile => &self.volatile_root,
            TierKind::Durable => &self.durable_root,
        }
    }

    /// Shared tier for `(kind, tag)`, constructed on first request
    pub fn get(&self, kind: TierKind, tag: Option<&str>) -> Arc<Tier> {
        let mut tiers = self.tiers.lock();
        tiers
            .entry((kind, tag.map(str::to_string)))
            .or_insert_with(|| {
                debug!(%kind, ?tag, "creating cache tier");
                Arc::new(Tier::new(kind, self.root(kind), tag))
            })
            .clone()
    }

    /// Replace the shared tier for `kind` (and the tier's own tag)
    pub fn set(&self, kind: TierKind, tier: Tier) -> Result<()> {
        if tier.kind() != kind {
            return Err(CacheError::Config(format!(
                "cannot register a '{}' tier as '{}'",
                tier.kind(),
                kind
            )));
        }
        let slot = (kind, tier.tag().map(str::to_string));
        debug!(%kind, location = %tier.location(), "replacing cache tier");
        self.tiers.lock().insert(slot, Arc::new(tier));
        Ok(())
    }

    /// Forget every shared tier; the next `get` builds fresh defaults
    pub fn reset(&self) {
        self.tiers.lock().clear();
    }

    /// Clear (or destroy) the selected tiers for `tag`
    pub fn clear(&self, selector: TierSelector, tag: Option<&str>, destroy: bool) -> Result<()> {
        for kind in selector.kinds() {
            self.get(kind, tag).clear(destroy)?;
        }
        Ok(())
    }

    /// Size report for every tier kind under `tag`
    pub fn reports(&self, tag: Option<&str>) -> Result<Vec<TierReport>> {
        TierKind::ALL
            .iter()
            .map(|kind| self.get(*kind, tag).info())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::key::{CacheKey, FunctionIdentity};
    use crate::SizeInfo;
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn test_same_slot_same_instance() {
        let temp = tempdir().unwrap();
        let registry = CacheRegistry::new(&CacheSettings::rooted_at(temp.path()));

        let a = registry.get(TierKind::Durable, None);
        let b = registry.get(TierKind::Durable, None);
        assert!(Arc::ptr_eq(&a, &b));

        let tagged = registry.get(TierKind::Durable, Some("unit_tests"));
        assert!(!Arc::ptr_eq(&a, &tagged));
        assert!(tagged.location().ends_with("tmp.cache.disk.unit_tests"));
    }

    #[test]
    fn test_concurrent_first_access_builds_one_tier() {
        let temp = tempdir().unwrap();
        let registry = Arc::new(CacheRegistry::new(&CacheSettings::rooted_at(temp.path())));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.get(TierKind::Volatile, None))
            })
            .collect();
        let tiers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for tier in &tiers[1..] {
            assert!(Arc::ptr_eq(&tiers[0], tier));
        }
    }

    #[test]
    fn test_set_replaces_default() {
        let temp = tempdir().unwrap();
        let registry = CacheRegistry::new(&CacheSettings::rooted_at(temp.path()));
        let before = registry.get(TierKind::Volatile, None);

        registry
            .set(TierKind::Volatile, Tier::in_memory(TierKind::Volatile, None))
            .unwrap();
        let after = registry.get(TierKind::Volatile, None);
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(after.location().starts_with("memory://"));

        registry.reset();
        assert!(!registry.get(TierKind::Volatile, None).location().starts_with("memory://"));
    }

    #[test]
    fn test_set_rejects_kind_mismatch() {
        let temp = tempdir().unwrap();
        let registry = CacheRegistry::new(&CacheSettings::rooted_at(temp.path()));
        let err = registry
            .set(TierKind::Durable, Tier::in_memory(TierKind::Volatile, None))
            .unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }

    #[test]
    fn test_clear_all() {
        let temp = tempdir().unwrap();
        let registry = CacheRegistry::new(&CacheSettings::rooted_at(temp.path()));
        let id = FunctionIdentity::new("registry_tests::f", "v1");
        let key = CacheKey::derive(&id, &(1,)).unwrap();
        for kind in TierKind::ALL {
            registry.get(kind, None).put(&key, &id, &1).unwrap();
        }

        registry.clear(TierSelector::All, None, false).unwrap();
        for kind in TierKind::ALL {
            assert!(!registry.get(kind, None).contains(&key, "v1").unwrap());
        }

        registry.clear(TierSelector::One(TierKind::Durable), None, true).unwrap();
        let reports = registry.reports(None).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].size, SizeInfo::Bytes(0));
        assert_eq!(reports[1].size, SizeInfo::NotCreated);
    }
}
