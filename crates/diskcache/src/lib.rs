//! # diskcache
//!
//! Size-bounded disk cache keyed by any `Display` type.
//!
//! ## Architecture
//! - **FileStore** (`diskstore`): one file per key, named from a digest of the key
//! - **RecencyQueue**: approximate LRU order of entry paths, in memory only
//! - **UsageTracker**: advisory estimate of cache size and volume free space
//! - **Evictor**: two-pass trim, untracked files first, then least recent
//! - **AutoTrimPolicy**: checks the estimate every N mutations
//! - **BackgroundExecutor**: small worker pool for refreshes and trims
//!
//! ## Semantics
//! - The size budget is soft; writes never block on eviction
//! - A missing file is a miss, never an error
//! - Recency is lost on restart; leftover files are trimmed first

#![warn(missing_docs)]

mod cache;
mod codec;
mod config;
mod evictor;
mod executor;
mod policy;
mod recency;
mod stats;
mod usage;

pub use cache::DiskCache;
pub use codec::{BytesCodec, Codec, Utf8Codec};
pub use config::{CacheConfig, DiskCacheBuilder, AUTO_MAX_CACHE_SIZE};
pub use evictor::{desired_size, Evictor, TrimPlan, TrimReport, AUTO_MAX_CACHE_SIZE_DIVISOR};
pub use executor::{BackgroundExecutor, ExecutorConfig, TaskHandle};
pub use policy::{
    trigger_threshold, AutoTrimPolicy, AUTO_TRIM_DISABLED, DEFAULT_AUTO_TRIM_FREQUENCY,
};
pub use recency::RecencyQueue;
pub use stats::CacheStats;
pub use usage::{FixedSpaceProbe, SpaceProbe, UsageEstimate, UsageTracker, VolumeSpaceProbe};

pub use diskstore::{CodecError, DigestAlgorithm, Error, Result, WipeSummary};
