//! memotier - two-tier memoization for deterministic computations
//!
//! A [`Memoizer`] wraps a function with a volatile tier (`mem`, a RAM-disk
//! directory by default) and a durable tier (`disk`, the working directory by
//! default). Calls look in the volatile tier, then the durable tier
//! (backfilling the volatile one), and only execute on a miss. Entries are
//! keyed by the function's name and source text plus a canonical encoding of
//! the arguments, so editing the source invalidates old results.
//!
//! ```no_run
//! use memotier::Memoizer;
//!
//! let add = Memoizer::new("demo::add", "x + y", |(x, y): &(i64, i64)| x + y);
//! assert_eq!(add.invoke(&(2, 3))?, 5);
//! # Ok::<(), memotier::CacheError>(())
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod experiment;
pub mod memoizer;

pub use crate::cache::memory::MemoryStore;
pub use crate::cache::registry::CacheRegistry;
pub use crate::cache::store::{FsStore, StoreBackend};
pub use crate::cache::tier::{SizeInfo, Tier, TierKind, TierSelector};
pub use crate::config::CacheSettings;
pub use crate::context::{
    clear_cache, get_global_cache_info, is_caching_enabled, set_caching_enabled,
    teardown_on_exit, CacheContext, TeardownGuard,
};
pub use crate::core::key::{CacheKey, CallArgs, FunctionIdentity};
pub use crate::core::model::{CacheReport, TierReport};
pub use crate::error::{CacheError, Result, StoreError};
pub use crate::memoizer::{CachedFn, Invoke, Memoizer, MemoizerBuilder, ServedBy};
