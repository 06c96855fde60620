//! Memoizer - wraps a callable with the two-tier cache
//!
//! Each call runs:
//!
//! 1. If caching is disabled in the context, call the function directly.
//! 2. Derive the key (failing the call if the arguments cannot be encoded).
//! 3. Volatile tier hit: return it.
//! 4. Durable tier hit: backfill the volatile tier (if enabled) and return it.
//! 5. Otherwise execute and store the result into every enabled tier.
//!
//! Values are stored serialized, so the owned value returned to the caller
//! never aliases cache state. A result holding NaN or an infinity has no JSON
//! form; it is returned but not stored.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::tier::{Tier, TierKind};
use crate::context::CacheContext;
use crate::core::finite::ensure_finite;
use crate::core::key::{CacheKey, FunctionIdentity};
use crate::core::util::{format_size, truncate_string};
use crate::error::{CacheError, Result};

/// Shared handle to a wrapped function
pub type CachedFn<A, R> = Arc<dyn Fn(&A) -> R + Send + Sync>;

/// Which tier served a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ServedBy {
    #[serde(rename = "mem")]
    Mem,
    #[serde(rename = "disk")]
    Disk,
    /// Executed (cache missed, disabled, or bypassed)
    #[serde(rename = "no_cache")]
    NoCache,
}

impl ServedBy {
    pub fn as_str(self) -> &'static str {
        match self {
            ServedBy::Mem => "mem",
            ServedBy::Disk => "disk",
            ServedBy::NoCache => "no_cache",
        }
    }
}

impl fmt::Display for ServedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that can be called with `&A`
pub trait Invoke<A: ?Sized> {
    type Output;

    fn invoke(&self, args: &A) -> Result<Self::Output>;
}

impl<A: ?Sized, R> Invoke<A> for CachedFn<A, R> {
    type Output = R;

    fn invoke(&self, args: &A) -> Result<R> {
        Ok((**self)(args))
    }
}

/// Configures a [`Memoizer`]
#[derive(Debug, Clone)]
pub struct MemoizerBuilder {
    identity: FunctionIdentity,
    context: Option<Arc<CacheContext>>,
    use_volatile: bool,
    use_durable: bool,
    tag: Option<String>,
    durable_location: Option<String>,
    verbose: bool,
}

impl MemoizerBuilder {
    /// Use `context` instead of the global one
    pub fn context(mut self, context: Arc<CacheContext>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn use_volatile(mut self, enabled: bool) -> Self {
        self.use_volatile = enabled;
        self
    }

    pub fn use_durable(mut self, enabled: bool) -> Self {
        self.use_durable = enabled;
        self
    }

    /// Use the tagged shared tiers (e.g. `unit_tests`) instead of the defaults
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Keep durable entries in a private location instead of the shared tier
    pub fn durable_location(mut self, location: impl Into<String>) -> Self {
        self.durable_location = Some(location.into());
        self
    }

    /// Log the serving tier, elapsed time and value size of every call
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn build<A, R, F>(self, func: F) -> Result<Memoizer<A, R>>
    where
        A: Serialize + ?Sized,
        R: Serialize + DeserializeOwned,
        F: Fn(&A) -> R + Send + Sync + 'static,
    {
        self.build_shared(Arc::new(func))
    }

    /// Build around a function handle that other code also holds
    pub fn build_shared<A, R>(self, func: CachedFn<A, R>) -> Result<Memoizer<A, R>>
    where
        A: Serialize + ?Sized,
        R: Serialize + DeserializeOwned,
    {
        let private_durable = match &self.durable_location {
            Some(location) => Some(Arc::new(Tier::at_location(TierKind::Durable, location)?)),
            None => None,
        };
        Ok(self.assemble(func, private_durable))
    }

    fn assemble<A: ?Sized, R>(
        self,
        func: CachedFn<A, R>,
        private_durable: Option<Arc<Tier>>,
    ) -> Memoizer<A, R> {
        Memoizer {
            func,
            identity: self.identity,
            context: self.context.unwrap_or_else(CacheContext::global),
            use_volatile: self.use_volatile,
            use_durable: self.use_durable,
            tag: self.tag,
            durable_location: self.durable_location,
            private_durable,
            verbose: self.verbose,
            last_served: Mutex::new(ServedBy::NoCache),
        }
    }
}

/// A function wrapped with volatile and durable caching
pub struct Memoizer<A: ?Sized, R> {
    func: CachedFn<A, R>,
    identity: FunctionIdentity,
    context: Arc<CacheContext>,
    use_volatile: bool,
    use_durable: bool,
    tag: Option<String>,
    durable_location: Option<String>,
    private_durable: Option<Arc<Tier>>,
    verbose: bool,
    last_served: Mutex<ServedBy>,
}

impl<A: ?Sized, R> fmt::Debug for Memoizer<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoizer")
            .field("name", &self.identity.qualified_name())
            .field("use_volatile", &self.use_volatile)
            .field("use_durable", &self.use_durable)
            .field("tag", &self.tag)
            .field("durable_location", &self.durable_location)
            .finish_non_exhaustive()
    }
}

impl Memoizer<(), ()> {
    /// Start configuring a memoizer for the callable `qualified_name` whose
    /// definition (or version tag) is `source`.
    pub fn builder(qualified_name: impl Into<String>, source: impl Into<String>) -> MemoizerBuilder {
        MemoizerBuilder {
            identity: FunctionIdentity::new(qualified_name, source),
            context: None,
            use_volatile: true,
            use_durable: true,
            tag: None,
            durable_location: None,
            verbose: false,
        }
    }
}

impl<A, R> Memoizer<A, R>
where
    A: Serialize + ?Sized,
    R: Serialize + DeserializeOwned,
{
    /// Both tiers, global context
    pub fn new<F>(qualified_name: impl Into<String>, source: impl Into<String>, func: F) -> Self
    where
        F: Fn(&A) -> R + Send + Sync + 'static,
    {
        Memoizer::builder(qualified_name, source).assemble(Arc::new(func), None)
    }

    /// Call the wrapped function through the caches
    pub fn invoke(&self, args: &A) -> Result<R> {
        let started = Instant::now();
        *self.last_served.lock() = ServedBy::NoCache;

        let (value, served) = if self.context.is_caching_enabled() {
            self.execute_cached(args)?
        } else {
            debug!("{}: all caching is disabled", self.name());
            ((self.func)(args), ServedBy::NoCache)
        };
        *self.last_served.lock() = served;
        debug!("{}: executed from '{}'", self.name(), served);

        if self.verbose {
            let size = serde_json::to_vec(&value)
                .map(|bytes| format_size(bytes.len() as u64))
                .unwrap_or_else(|_| "?".to_string());
            info!(
                "  --> Cache data for '{}' was retrieved from '{}' cache (size={} time={:.2} s)",
                self.name(),
                served,
                size,
                started.elapsed().as_secs_f64()
            );
        }
        Ok(value)
    }

    fn execute_cached(&self, args: &A) -> Result<(R, ServedBy)> {
        if !self.use_volatile && !self.use_durable {
            debug!("{}: skipping memory and disk cache", self.name());
            return Ok(((self.func)(args), ServedBy::NoCache));
        }

        let key = CacheKey::derive(&self.identity, args)?;
        let source = self.identity.source();
        let volatile = self.use_volatile.then(|| self.volatile_tier());
        let durable = self.use_durable.then(|| self.durable_tier());

        if let Some(tier) = &volatile {
            debug!("{}({}): trying to retrieve from memory", self.name(), key);
            if let Some(value) = tier.lookup(&key, source)? {
                return Ok((value, ServedBy::Mem));
            }
        }

        if let Some(tier) = &durable {
            debug!("{}({}): trying to retrieve from disk", self.name(), key);
            if let Some(value) = tier.lookup(&key, source)? {
                if let Some(fast) = &volatile {
                    fast.put(&key, &self.identity, &value)?;
                }
                return Ok((value, ServedBy::Disk));
            }
        }

        debug!("{}({}): executing the function", self.name(), key);
        let value = (self.func)(args);
        if let Err(e) = ensure_finite(&value) {
            warn!("{}({}): result not cached: {}", self.name(), key, e);
            return Ok((value, ServedBy::NoCache));
        }
        for tier in volatile.iter().chain(durable.iter()) {
            tier.put(&key, &self.identity, &value)?;
        }
        Ok((value, ServedBy::NoCache))
    }
}

impl<A: ?Sized, R> Memoizer<A, R> {
    pub fn name(&self) -> &str {
        self.identity.qualified_name()
    }

    pub fn identity(&self) -> &FunctionIdentity {
        &self.identity
    }

    /// Tier that served the most recent call
    pub fn last_served(&self) -> ServedBy {
        *self.last_served.lock()
    }

    /// The wrapped function, uncached
    pub fn function(&self) -> &CachedFn<A, R> {
        &self.func
    }

    fn volatile_tier(&self) -> Arc<Tier> {
        self.context
            .registry()
            .get(TierKind::Volatile, self.tag.as_deref())
    }

    fn durable_tier(&self) -> Arc<Tier> {
        match &self.private_durable {
            Some(tier) => Arc::clone(tier),
            None => self
                .context
                .registry()
                .get(TierKind::Durable, self.tag.as_deref()),
        }
    }

    pub fn has_function_specific_cache(&self) -> bool {
        self.private_durable.is_some()
    }

    /// Point the durable tier at a private location, or back at the shared one with `None`
    pub fn set_durable_location(&mut self, location: Option<&str>) -> Result<()> {
        self.private_durable = match location {
            Some(location) => Some(Arc::new(Tier::at_location(TierKind::Durable, location)?)),
            None => None,
        };
        self.durable_location = location.map(str::to_string);
        Ok(())
    }

    /// Clear the private durable tier
    pub fn clear_function_cache(&self, destroy: bool) -> Result<()> {
        let tier = self
            .private_durable
            .as_ref()
            .ok_or_else(|| CacheError::NoFunctionCache(self.name().to_string()))?;
        warn!(
            "Resetting 'disk' cache for function '{}' in dir '{}'",
            self.name(),
            tier.location()
        );
        tier.clear(destroy)
    }

    /// Caching properties of this function
    pub fn info(&self) -> String {
        let (source, truncated) = truncate_string(self.identity.source(), 60);
        let mut lines = vec![
            format!("function={}", self.name()),
            format!(
                "source={}{}",
                source.replace('\n', " "),
                if truncated { "..." } else { "" }
            ),
            format!("is global cache enabled={}", self.context.is_caching_enabled()),
            format!("use mem cache={}", self.use_volatile),
            format!("use disk cache={}", self.use_durable),
            format!(
                "has function-specific cache={}",
                self.has_function_specific_cache()
            ),
        ];
        lines.push(format!(
            "global mem cache path={}",
            self.volatile_tier().location()
        ));
        match &self.private_durable {
            Some(tier) => lines.push(format!("local disk cache path={}", tier.location())),
            None => lines.push(format!(
                "global disk cache path={}",
                self.durable_tier().location()
            )),
        }
        lines.join("\n")
    }
}

impl<A, R> Invoke<A> for Memoizer<A, R>
where
    A: Serialize + ?Sized,
    R: Serialize + DeserializeOwned,
{
    type Output = R;

    fn invoke(&self, args: &A) -> Result<R> {
        Memoizer::invoke(self, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheSettings;
    use crate::core::key::CallArgs;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};

    fn context() -> (TempDir, Arc<CacheContext>) {
        let temp = tempdir().unwrap();
        let ctx = Arc::new(CacheContext::new(CacheSettings::rooted_at(temp.path())));
        (temp, ctx)
    }

    fn add_builder(ctx: &Arc<CacheContext>) -> MemoizerBuilder {
        Memoizer::builder("memoizer_tests::add", "x + y").context(Arc::clone(ctx))
    }

    fn add_fn(calls: Arc<AtomicUsize>) -> impl Fn(&(i64, i64)) -> i64 + Send + Sync + 'static {
        move |(x, y): &(i64, i64)| {
            calls.fetch_add(1, Ordering::SeqCst);
            x + y
        }
    }

    #[test]
    fn test_second_call_served_by_mem() {
        let (_temp, ctx) = context();
        let calls = Arc::new(AtomicUsize::new(0));
        let add = add_builder(&ctx)
            .build(add_fn(Arc::clone(&calls)))
            .unwrap();

        assert_eq!(add.invoke(&(2, 3)).unwrap(), 5);
        assert_eq!(add.last_served(), ServedBy::NoCache);
        assert_eq!(add.invoke(&(2, 3)).unwrap(), 5);
        assert_eq!(add.last_served(), ServedBy::Mem);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disk_only() {
        let (_temp, ctx) = context();
        let calls = Arc::new(AtomicUsize::new(0));
        let add = add_builder(&ctx)
            .use_volatile(false)
            .build(add_fn(Arc::clone(&calls)))
            .unwrap();

        add.invoke(&(1, 1)).unwrap();
        assert_eq!(add.last_served(), ServedBy::NoCache);
        add.invoke(&(1, 1)).unwrap();
        assert_eq!(add.last_served(), ServedBy::Disk);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Nothing was backfilled into the volatile tier
        let report = ctx.cache_report(None).unwrap();
        assert_eq!(report.tiers[0].size, crate::SizeInfo::NotCreated);
    }

    #[test]
    fn test_mem_only_does_not_touch_disk() {
        let (_temp, ctx) = context();
        let calls = Arc::new(AtomicUsize::new(0));
        let add = add_builder(&ctx)
            .use_durable(false)
            .build(add_fn(Arc::clone(&calls)))
            .unwrap();

        add.invoke(&(4, 4)).unwrap();
        add.invoke(&(4, 4)).unwrap();
        assert_eq!(add.last_served(), ServedBy::Mem);
        let report = ctx.cache_report(None).unwrap();
        assert_eq!(report.tiers[1].size, crate::SizeInfo::NotCreated);
    }

    #[test]
    fn test_no_tiers_always_executes() {
        let (_temp, ctx) = context();
        let calls = Arc::new(AtomicUsize::new(0));
        let add = add_builder(&ctx)
            .use_volatile(false)
            .use_durable(false)
            .build(add_fn(Arc::clone(&calls)))
            .unwrap();

        for _ in 0..3 {
            assert_eq!(add.invoke(&(1, 2)).unwrap(), 3);
            assert_eq!(add.last_served(), ServedBy::NoCache);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_key_derivation_failure_runs_nothing() {
        let (_temp, ctx) = context();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let lookup = Memoizer::builder("memoizer_tests::lookup", "v1")
            .context(Arc::clone(&ctx))
            .build(move |_: &HashMap<(u8, u8), u8>| {
                counter.fetch_add(1, Ordering::SeqCst);
                0u8
            })
            .unwrap();

        let mut bad = HashMap::new();
        bad.insert((1, 2), 3);
        let err = lookup.invoke(&bad).unwrap_err();
        assert!(matches!(err, CacheError::KeyDerivation(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(lookup.last_served(), ServedBy::NoCache);
    }

    #[test]
    fn test_built_and_new_share_defaults() {
        let built = Memoizer::builder("memoizer_tests::neg", "-x")
            .build(|x: &i32| -x)
            .unwrap();
        let plain = Memoizer::new("memoizer_tests::neg", "-x", |x: &i32| -x);
        assert_eq!(format!("{:?}", built), format!("{:?}", plain));
        assert!(Arc::ptr_eq(&built.context, &plain.context));
        assert!(!plain.verbose && !plain.has_function_specific_cache());
    }

    #[test]
    fn test_non_finite_result_is_returned_uncached() {
        let (_temp, ctx) = context();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let ratio = Memoizer::builder("memoizer_tests::ratio", "x / 0 * 0")
            .context(Arc::clone(&ctx))
            .build(move |x: &f64| {
                counter.fetch_add(1, Ordering::SeqCst);
                x / 0.0 * 0.0
            })
            .unwrap();

        for _ in 0..2 {
            assert!(ratio.invoke(&1.0).unwrap().is_nan());
            assert_eq!(ratio.last_served(), ServedBy::NoCache);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let report = ctx.cache_report(None).unwrap();
        assert!(report.tiers.iter().all(|t| t.size == crate::SizeInfo::NotCreated));
    }

    #[test]
    fn test_call_args() {
        let (_temp, ctx) = context();
        let greet = Memoizer::builder("memoizer_tests::greet", "v1")
            .context(Arc::clone(&ctx))
            .build(|args: &CallArgs| {
                let name = args.positional()[0].as_str().unwrap_or("?").to_string();
                let punct = args
                    .keyword("punct")
                    .and_then(|v| v.as_str())
                    .unwrap_or(".")
                    .to_string();
                format!("hello {}{}", name, punct)
            })
            .unwrap();

        let first = CallArgs::new().arg("ann").kwarg("punct", "!").kwarg("lang", "en");
        let reordered = CallArgs::new().arg("ann").kwarg("lang", "en").kwarg("punct", "!");
        assert_eq!(greet.invoke(&first).unwrap(), "hello ann!");
        assert_eq!(greet.invoke(&reordered).unwrap(), "hello ann!");
        assert_eq!(greet.last_served(), ServedBy::Mem);
    }

    #[test]
    fn test_private_durable_location() {
        let (temp, ctx) = context();
        let location = temp.path().join("private_add");
        let calls = Arc::new(AtomicUsize::new(0));
        let add = add_builder(&ctx)
            .durable_location(location.to_str().unwrap())
            .use_volatile(false)
            .build(add_fn(Arc::clone(&calls)))
            .unwrap();
        assert!(add.has_function_specific_cache());

        add.invoke(&(2, 2)).unwrap();
        assert!(location.is_dir());
        // The shared durable tier is untouched
        let report = ctx.cache_report(None).unwrap();
        assert_eq!(report.tiers[1].size, crate::SizeInfo::NotCreated);

        add.invoke(&(2, 2)).unwrap();
        assert_eq!(add.last_served(), ServedBy::Disk);

        add.clear_function_cache(true).unwrap();
        assert!(!location.exists());
        add.invoke(&(2, 2)).unwrap();
        assert_eq!(add.last_served(), ServedBy::NoCache);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_clear_function_cache_requires_private_location() {
        let (_temp, ctx) = context();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut add = add_builder(&ctx)
            .build(add_fn(Arc::clone(&calls)))
            .unwrap();
        assert!(matches!(
            add.clear_function_cache(false),
            Err(CacheError::NoFunctionCache(_))
        ));
        assert!(add.info().contains("global disk cache path="));

        add.set_durable_location(Some("/tmp/memotier_private_info")).unwrap();
        assert!(add.info().contains("local disk cache path=/tmp/memotier_private_info"));
        add.set_durable_location(None).unwrap();
        assert!(!add.has_function_specific_cache());
    }

    #[test]
    fn test_unsupported_private_location() {
        let (_temp, ctx) = context();
        let err = Memoizer::builder("memoizer_tests::f", "v1")
            .context(ctx)
            .durable_location("s3://bucket/prefix")
            .build(|x: &i32| *x)
            .unwrap_err();
        assert!(matches!(err, CacheError::UnsupportedLocation(_)));
    }

    #[test]
    fn test_invoke_trait_is_uniform() {
        fn call_twice<I: Invoke<(i64, i64), Output = i64>>(f: &I) -> i64 {
            f.invoke(&(1, 2)).unwrap() + f.invoke(&(1, 2)).unwrap()
        }

        let (_temp, ctx) = context();
        let raw: CachedFn<(i64, i64), i64> = Arc::new(|(x, y): &(i64, i64)| x + y);
        let memo = Memoizer::builder("memoizer_tests::raw_add", "x + y")
            .context(ctx)
            .build_shared(Arc::clone(&raw))
            .unwrap();
        assert_eq!(call_twice(&raw), 6);
        assert_eq!(call_twice(&memo), 6);
        assert_eq!(memo.last_served(), ServedBy::Mem);
    }

    #[test]
    fn test_served_by_names() {
        assert_eq!(ServedBy::Mem.to_string(), "mem");
        assert_eq!(ServedBy::Disk.to_string(), "disk");
        assert_eq!(ServedBy::NoCache.to_string(), "no_cache");
    }
}
