//! Cache configuration and builder

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use diskstore::{DigestAlgorithm, Error, Result};

use crate::cache::DiskCache;
use crate::codec::Codec;
use crate::executor::ExecutorConfig;
use crate::policy::DEFAULT_AUTO_TRIM_FREQUENCY;
use crate::usage::{SpaceProbe, VolumeSpaceProbe};

/// Passing this as the maximum size sizes the cache from free space
pub const AUTO_MAX_CACHE_SIZE: u64 = 0;

/// Everything needed to open a [`DiskCache`]
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding the entry files
    pub base_dir: PathBuf,
    /// File name prefix, if any
    pub prefix: Option<String>,
    /// File name suffix, if any
    pub suffix: Option<String>,
    /// Size budget in bytes; `AUTO_MAX_CACHE_SIZE` derives it from free space
    pub max_disk_usage: u64,
    /// Mutations between auto-trim checks; `AUTO_TRIM_DISABLED` turns it off
    pub auto_trim_frequency: u32,
    /// Digest used for file tokens
    pub digest: DigestAlgorithm,
    /// Background worker pool sizing
    pub executor: ExecutorConfig,
}

impl CacheConfig {
    /// Defaults for a cache rooted at `base_dir`
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            prefix: None,
            suffix: None,
            max_disk_usage: AUTO_MAX_CACHE_SIZE,
            auto_trim_frequency: DEFAULT_AUTO_TRIM_FREQUENCY,
            digest: DigestAlgorithm::default(),
            executor: ExecutorConfig::default(),
        }
    }

    /// Check the configuration for values the cache cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.base_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("base directory is empty".to_string()));
        }
        if self.executor.max_workers == 0 {
            return Err(Error::InvalidConfig(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.executor.min_workers > self.executor.max_workers {
            return Err(Error::InvalidConfig(format!(
                "min_workers ({}) exceeds max_workers ({})",
                self.executor.min_workers, self.executor.max_workers
            )));
        }
        for (what, value) in [("prefix", &self.prefix), ("suffix", &self.suffix)] {
            if let Some(value) = value {
                if value.contains(|c: char| c == '/' || c == '\\') {
                    return Err(Error::InvalidConfig(format!(
                        "{} must not contain path separators: {:?}",
                        what, value
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Builds a [`DiskCache`]
///
/// ```no_run
/// use diskcache::{DiskCacheBuilder, Utf8Codec};
///
/// let cache = DiskCacheBuilder::new("/tmp/thumbnails")
///     .prefix("thumb-")
///     .max_disk_usage(64 * 1024 * 1024)
///     .build::<str, _>(Utf8Codec)
///     .unwrap();
/// cache.put("greeting", &"hello".to_string()).unwrap();
/// ```
pub struct DiskCacheBuilder {
    config: CacheConfig,
    probe: Arc<dyn SpaceProbe>,
}

impl DiskCacheBuilder {
    /// Start from the defaults for `base_dir`
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self::from_config(CacheConfig::new(base_dir))
    }

    /// Start from an existing configuration
    pub fn from_config(config: CacheConfig) -> Self {
        Self {
            config,
            probe: Arc::new(VolumeSpaceProbe),
        }
    }

    /// File name prefix
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.prefix = Some(prefix.into());
        self
    }

    /// File name suffix
    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.suffix = Some(suffix.into());
        self
    }

    /// Size budget in bytes
    pub fn max_disk_usage(mut self, bytes: u64) -> Self {
        self.config.max_disk_usage = bytes;
        self
    }

    /// Mutations between auto-trim checks
    pub fn auto_trim_frequency(mut self, frequency: u32) -> Self {
        self.config.auto_trim_frequency = frequency;
        self
    }

    /// Digest used for file tokens
    pub fn digest(mut self, digest: DigestAlgorithm) -> Self {
        self.config.digest = digest;
        self
    }

    /// Workers kept alive while idle
    pub fn min_workers(mut self, workers: usize) -> Self {
        self.config.executor.min_workers = workers;
        self
    }

    /// Upper bound on background workers
    pub fn max_workers(mut self, workers: usize) -> Self {
        self.config.executor.max_workers = workers;
        self
    }

    /// Idle time before a surplus worker retires
    pub fn worker_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.config.executor.keep_alive = keep_alive;
        self
    }

    /// Replace the volume free-space query
    pub fn space_probe<P: SpaceProbe + 'static>(mut self, probe: P) -> Self {
        self.probe = Arc::new(probe);
        self
    }

    /// Configuration as currently set
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Validate, create the directory, start the executor and schedule the
    /// first usage refresh
    pub fn build<K, C>(self, codec: C) -> Result<DiskCache<K, C>>
    where
        K: Display + ?Sized,
        C: Codec<K>,
    {
        self.config.validate()?;
        DiskCache::open(self.config, self.probe, codec)
    }
}
