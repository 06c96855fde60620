//! Cache context - the enable switch and tier registry
//!
//! A [`CacheContext`] bundles the state that would otherwise be process-wide:
//! the global enable switch and the registry of shared tiers. Tests build
//! isolated contexts; everything else goes through [`CacheContext::global`],
//! which the free functions in this module operate on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::{debug, warn};

use crate::cache::registry::CacheRegistry;
use crate::cache::tier::{TierKind, TierSelector};
use crate::config::CacheSettings;
use crate::core::model::CacheReport;
use crate::error::Result;

static GLOBAL: Lazy<Arc<CacheContext>> = Lazy::new(|| {
    let settings = CacheSettings::from_env().unwrap_or_else(|e| {
        warn!("ignoring cache environment: {}", e);
        CacheSettings::default()
    });
    Arc::new(CacheContext::new(settings))
});

#[derive(Debug)]
pub struct CacheContext {
    enabled: AtomicBool,
    settings: CacheSettings,
    registry: CacheRegistry,
}

impl CacheContext {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            enabled: AtomicBool::new(settings.enabled),
            registry: CacheRegistry::new(&settings),
            settings,
        }
    }

    /// Shared default context, configured from the environment on first use
    pub fn global() -> Arc<CacheContext> {
        Arc::clone(&GLOBAL)
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn registry(&self) -> &CacheRegistry {
        &self.registry
    }

    /// Enable or disable all caching done through this context
    pub fn set_caching_enabled(&self, enabled: bool) {
        let previous = self.enabled.swap(enabled, Ordering::Relaxed);
        warn!("Setting caching to {} -> {}", previous, enabled);
    }

    pub fn is_caching_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn cache_report(&self, tag: Option<&str>) -> Result<CacheReport> {
        Ok(CacheReport::new(
            self.is_caching_enabled(),
            self.registry.reports(tag)?,
        ))
    }

    /// Human-readable size report across tiers
    pub fn cache_info(&self, tag: Option<&str>) -> Result<String> {
        Ok(self.cache_report(tag)?.to_string())
    }

    pub fn clear_cache(&self, selector: TierSelector, tag: Option<&str>, destroy: bool) -> Result<()> {
        self.registry.clear(selector, tag, destroy)
    }

    /// Guard that destroys the default volatile tier when dropped
    pub fn teardown_on_exit(self: &Arc<Self>) -> TeardownGuard {
        TeardownGuard {
            context: Arc::clone(self),
        }
    }
}

/// Clears and destroys the default volatile tier on drop.
///
/// Hold it in `main` so the volatile tier does not outlive the process.
#[must_use = "the volatile tier is destroyed when the guard is dropped"]
#[derive(Debug)]
pub struct TeardownGuard {
    context: Arc<CacheContext>,
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        debug!("tearing down volatile cache");
        if let Err(e) = self
            .context
            .clear_cache(TierSelector::One(TierKind::Volatile), None, true)
        {
            warn!("failed to destroy volatile cache: {}", e);
        }
    }
}

/// Enable or disable all caching in the default context
pub fn set_caching_enabled(enabled: bool) {
    CacheContext::global().set_caching_enabled(enabled);
}

pub fn is_caching_enabled() -> bool {
    CacheContext::global().is_caching_enabled()
}

/// Size report for the default context's tiers under `tag`
pub fn get_global_cache_info(tag: Option<&str>) -> Result<String> {
    CacheContext::global().cache_info(tag)
}

/// Clear (or destroy) tiers of the default context
pub fn clear_cache(selector: TierSelector, tag: Option<&str>, destroy: bool) -> Result<()> {
    CacheContext::global().clear_cache(selector, tag, destroy)
}

/// Install the volatile-tier teardown for the default context
pub fn teardown_on_exit() -> TeardownGuard {
    CacheContext::global().teardown_on_exit()
}
