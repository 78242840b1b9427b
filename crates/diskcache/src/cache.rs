//! DiskCache: size-bounded cache of serialized values, one file per entry

use std::fmt::Display;
use std::io::Read;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use diskstore::{Error, FileStore, KeyHasher, Result, WipeSummary};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::codec::Codec;
use crate::config::CacheConfig;
use crate::evictor::{Evictor, TrimReport};
use crate::executor::{BackgroundExecutor, TaskHandle};
use crate::policy::AutoTrimPolicy;
use crate::recency::RecencyQueue;
use crate::stats::CacheStats;
use crate::usage::{SpaceProbe, UsageEstimate, UsageTracker};

/// State shared with background tasks
struct Shared {
    store: FileStore,
    queue: RecencyQueue,
    usage: UsageTracker,
    policy: AutoTrimPolicy,
    probe: Arc<dyn SpaceProbe>,
    stats: CacheStats,
    max_disk_usage: AtomicU64,
    refresh_pending: AtomicBool,
    /// Serializes put, get, contains, clear and the delete step of a trim
    lock: Mutex<()>,
    /// One trim at a time
    trim_lock: Mutex<()>,
}

impl Shared {
    fn max_disk_usage(&self) -> u64 {
        self.max_disk_usage.load(Ordering::Relaxed)
    }

    /// Scan without the cache lock, then delete under it
    fn trim(&self, auto: bool) -> Result<TrimReport> {
        let _trimming = self.trim_lock.lock();
        if auto {
            // Mutations from here on need a trim of their own
            self.policy.trim_finished();
        }

        let evictor = Evictor::new(&self.store, &self.queue, self.probe.as_ref());
        let plan = evictor.plan(self.max_disk_usage())?;

        let report = {
            let _guard = self.lock.lock();
            let report = evictor.execute(plan);
            self.usage.record_removal(report.reclaimed);
            report
        };
        self.stats.record_trim(report.files_removed(), report.reclaimed);
        Ok(report)
    }

    /// Scan without the cache lock; keep the result only if no mutation
    /// landed meanwhile
    fn refresh(&self) -> Result<Option<UsageEstimate>> {
        self.refresh_pending.store(false, Ordering::Release);

        let generation = self.usage.generation();
        let fresh = UsageTracker::measure(&self.store, self.probe.as_ref())?;

        let _guard = self.lock.lock();
        Ok(self
            .usage
            .replace_if_current(fresh, generation)
            .then_some(fresh))
    }
}

/// Disk-backed cache
///
/// Values are serialized by a [`Codec`] into one file per key under the
/// base directory. The configured size is a soft cap: writes never wait for
/// eviction, and a background trim brings usage back under budget later.
///
/// # Concurrency
/// All methods take `&self`; share the cache with `Arc`. Reads and writes of
/// the same key are serialized, and `get` never sees a partially written
/// value.
///
/// Dropping the cache cancels queued background work and waits for running
/// work to finish.
pub struct DiskCache<K: ?Sized, C> {
    shared: Arc<Shared>,
    codec: C,
    executor: BackgroundExecutor,
    _key: PhantomData<fn(&K)>,
}

impl<K, C> DiskCache<K, C>
where
    K: Display + ?Sized,
    C: Codec<K>,
{
    /// Open a cache from a validated configuration
    pub(crate) fn open(config: CacheConfig, probe: Arc<dyn SpaceProbe>, codec: C) -> Result<Self> {
        let store = FileStore::open(&config.base_dir)?
            .with_prefix(config.prefix.unwrap_or_default())
            .with_suffix(config.suffix.unwrap_or_default())
            .with_hasher(KeyHasher::new(config.digest));

        let cache = Self {
            shared: Arc::new(Shared {
                store,
                queue: RecencyQueue::new(),
                usage: UsageTracker::new(),
                policy: AutoTrimPolicy::new(config.auto_trim_frequency),
                probe,
                stats: CacheStats::new(),
                max_disk_usage: AtomicU64::new(config.max_disk_usage),
                refresh_pending: AtomicBool::new(false),
                lock: Mutex::new(()),
                trim_lock: Mutex::new(()),
            }),
            codec,
            executor: BackgroundExecutor::new(config.executor),
            _key: PhantomData,
        };

        cache.schedule_refresh()?;
        debug!(
            dir = %cache.base_dir().display(),
            max_disk_usage = config.max_disk_usage,
            auto_trim_frequency = config.auto_trim_frequency,
            "Opened disk cache"
        );
        Ok(cache)
    }

    /// Change the size budget and auto-trim frequency
    ///
    /// Nothing is trimmed until the next auto-trim check or [`DiskCache::trim`].
    pub fn configure(&self, max_disk_usage: u64, auto_trim_frequency: u32) {
        self.set_max_disk_usage(max_disk_usage);
        self.set_auto_trim_frequency(auto_trim_frequency);
    }

    /// Change the size budget; `AUTO_MAX_CACHE_SIZE` sizes from free space
    pub fn set_max_disk_usage(&self, max_disk_usage: u64) {
        self.shared
            .max_disk_usage
            .store(max_disk_usage, Ordering::Relaxed);
    }

    /// Change the auto-trim frequency; `AUTO_TRIM_DISABLED` turns it off
    pub fn set_auto_trim_frequency(&self, frequency: u32) {
        self.shared.policy.set_frequency(frequency);
    }

    /// Configured size budget
    pub fn max_disk_usage(&self) -> u64 {
        self.shared.max_disk_usage()
    }

    /// Configured auto-trim frequency
    pub fn auto_trim_frequency(&self) -> u32 {
        self.shared.policy.frequency()
    }

    /// Store a value
    ///
    /// # Returns
    /// * `Result<u64>` - Bytes written
    ///
    /// # Errors
    /// * `Error::Codec` - The codec failed; a partial file may remain
    /// * `Error::Io` - The file could not be written
    pub fn put(&self, key: &K, value: &C::Value) -> Result<u64> {
        let shared = &self.shared;
        let path = shared.store.path_for(key);

        let written = {
            let _guard = shared.lock.lock();
            let previous = shared.store.size_of(key)?.unwrap_or(0);
            let written = shared.store.write(key, |sink| {
                self.codec.to_disk(key, value, sink).map_err(Error::from_codec)
            })?;
            shared.usage.record_write(previous, written);
            // Tracked before the lock drops so a trim never sees it as a stray
            shared.queue.touch(&path);
            written
        };

        shared.stats.record_insert();
        self.after_mutation();
        Ok(written)
    }

    /// Store bytes copied straight from `source`, bypassing the codec
    ///
    /// The bytes must be in the format the codec reads. They are written to
    /// a temporary file first, so concurrent readers see either the old
    /// entry, no entry, or the complete new one.
    pub fn put_raw<R: Read + ?Sized>(&self, key: &K, source: &mut R) -> Result<u64> {
        let shared = &self.shared;
        let staged = shared.store.stage(key, source)?;
        let path = staged.target().to_path_buf();

        let written = {
            let _guard = shared.lock.lock();
            let previous = shared.store.size_of(key)?.unwrap_or(0);
            let written = match staged.commit() {
                Ok(written) => written,
                Err(e) => {
                    // A failed commit takes the previous entry with it
                    if !path.exists() {
                        shared.usage.record_removal(previous);
                        shared.queue.remove(&path);
                    }
                    return Err(e);
                }
            };
            shared.usage.record_write(previous, written);
            shared.queue.touch(&path);
            written
        };

        shared.stats.record_insert();
        self.after_mutation();
        Ok(written)
    }

    /// Load a value; `None` on a miss
    ///
    /// A hit marks the entry most recently used. A miss never creates a file.
    pub fn get(&self, key: &K) -> Result<Option<C::Value>> {
        let shared = &self.shared;
        let _guard = shared.lock.lock();

        let Some(mut reader) = shared.store.open_reader(key)? else {
            shared.stats.record_miss();
            return Ok(None);
        };
        let value = self
            .codec
            .from_disk(key, &mut reader)
            .map_err(Error::from_codec)?;

        shared.queue.touch(&shared.store.path_for(key));
        shared.stats.record_hit();
        Ok(Some(value))
    }

    /// Is there an entry for `key`? Does not affect eviction order.
    pub fn contains(&self, key: &K) -> bool {
        let _guard = self.shared.lock.lock();
        self.shared.store.exists(key)
    }

    /// Mark `key` as recently used without reading it
    pub fn touch_key(&self, key: &K) {
        self.shared.queue.touch(&self.shared.store.path_for(key));
    }

    /// Remove one entry
    ///
    /// # Returns
    /// * `Ok(true)` - The entry was deleted
    /// * `Ok(false)` - There was nothing to delete
    pub fn clear_entry(&self, key: &K) -> Result<bool> {
        let shared = &self.shared;
        let path = shared.store.path_for(key);

        let removed = {
            let _guard = shared.lock.lock();
            let removed = shared.store.delete_path(&path)?;
            if let Some(len) = removed {
                shared.usage.record_removal(len);
            }
            // Untracked under the lock so a concurrent put keeps its entry
            shared.queue.remove(&path);
            removed
        };

        self.after_mutation();
        Ok(removed.is_some())
    }

    /// Remove every entry
    ///
    /// Files in the base directory that do not carry this cache's prefix and
    /// suffix are left alone. Files that cannot be deleted are logged and
    /// counted in the summary.
    pub fn clear(&self) -> Result<WipeSummary> {
        let shared = &self.shared;

        let summary = {
            let _guard = shared.lock.lock();
            let summary = shared.store.wipe()?;
            shared.queue.clear();
            if summary.is_complete() {
                shared.usage.record_wipe();
            }
            summary
        };

        if !summary.is_complete() {
            warn!(failed = summary.failed, "Cache only partially cleared");
        }
        if let Err(e) = self.schedule_refresh() {
            debug!(error = %e, "Usage refresh not scheduled");
        }
        Ok(summary)
    }

    /// Trim the cache to its budget now, on the calling thread
    ///
    /// # Returns
    /// * `Result<u64>` - Bytes reclaimed
    pub fn trim(&self) -> Result<u64> {
        Ok(self.shared.trim(false)?.reclaimed)
    }

    /// Like [`DiskCache::trim`], returning the full report
    pub fn trim_report(&self) -> Result<TrimReport> {
        self.shared.trim(false)
    }

    /// Queue a trim on the background executor
    pub fn schedule_trim(&self) -> Result<TaskHandle> {
        let shared = Arc::clone(&self.shared);
        self.executor.submit("trim", move || {
            if let Err(e) = shared.trim(false) {
                error!(error = %e, "Background trim failed");
            }
        })
    }

    /// Queue a usage refresh on the background executor
    ///
    /// Returns `None` when a refresh is already queued.
    pub fn schedule_refresh(&self) -> Result<Option<TaskHandle>> {
        if self.shared.refresh_pending.swap(true, Ordering::AcqRel) {
            return Ok(None);
        }

        let shared = Arc::clone(&self.shared);
        let submitted = self.executor.submit("refresh", move || {
            if let Err(e) = shared.refresh() {
                warn!(error = %e, "Disk usage refresh failed");
            }
        });

        match submitted {
            Ok(handle) => Ok(Some(handle)),
            Err(e) => {
                self.shared.refresh_pending.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    /// Bytes used by entries, from a live directory scan
    pub fn cache_disk_usage(&self) -> Result<u64> {
        self.shared.store.disk_usage()
    }

    /// Number of entries, from a live directory scan
    pub fn cache_entry_count(&self) -> Result<usize> {
        self.shared.store.entry_count()
    }

    /// Latest advisory usage estimate
    pub fn usage_estimate(&self) -> UsageEstimate {
        self.shared.usage.estimate()
    }

    /// Activity counters
    pub fn stats(&self) -> &CacheStats {
        &self.shared.stats
    }

    /// Token used in the file name for `key`
    pub fn token_for(&self, key: &K) -> String {
        self.shared.store.token_for(key)
    }

    /// Path of the file backing `key`
    pub fn path_for(&self, key: &K) -> PathBuf {
        self.shared.store.path_for(key)
    }

    /// Directory holding the entries
    pub fn base_dir(&self) -> &Path {
        self.shared.store.base_dir()
    }

    /// Number of entries tracked for recency
    pub fn tracked_entries(&self) -> usize {
        self.shared.queue.len()
    }

    /// Block until no background work is queued or running
    pub fn wait_idle(&self) {
        self.executor.wait_idle();
    }

    /// Cancel queued background work and wait for running work
    ///
    /// The cache stays usable afterwards, without background maintenance.
    pub fn shutdown(&self) {
        self.executor.shutdown();
    }

    fn after_mutation(&self) {
        let shared = &self.shared;

        if shared
            .policy
            .record_mutation(shared.usage.estimate(), shared.max_disk_usage())
        {
            let task_shared = Arc::clone(shared);
            let submitted = self.executor.submit("auto-trim", move || {
                if let Err(e) = task_shared.trim(true) {
                    task_shared.policy.trim_finished();
                    error!(error = %e, "Automatic trim failed");
                }
            });
            if let Err(e) = submitted {
                shared.policy.trim_finished();
                debug!(error = %e, "Automatic trim not scheduled");
            }
        }

        if let Err(e) = self.schedule_refresh() {
            debug!(error = %e, "Usage refresh not scheduled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{BytesCodec, Utf8Codec};
    use crate::config::{DiskCacheBuilder, AUTO_MAX_CACHE_SIZE};
    use crate::policy::AUTO_TRIM_DISABLED;
    use crate::usage::FixedSpaceProbe;
    use std::fs;
    use std::thread;
    use tempfile::TempDir;

    fn text_cache(dir: &TempDir, max: u64, frequency: u32) -> DiskCache<str, Utf8Codec> {
        DiskCacheBuilder::new(dir.path())
            .max_disk_usage(max)
            .auto_trim_frequency(frequency)
            .space_probe(FixedSpaceProbe(1_000_000))
            .build(Utf8Codec)
            .unwrap()
    }

    fn bytes_cache(dir: &TempDir, max: u64, frequency: u32, free: u64) -> DiskCache<str, BytesCodec> {
        DiskCacheBuilder::new(dir.path())
            .max_disk_usage(max)
            .auto_trim_frequency(frequency)
            .space_probe(FixedSpaceProbe(free))
            .build(BytesCodec)
            .unwrap()
    }

    #[test]
    fn test_put_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = text_cache(&dir, 0, AUTO_TRIM_DISABLED);

        let written = cache.put("greeting", &"hello world".to_string()).unwrap();

        assert_eq!(written, 11);
        assert_eq!(cache.get("greeting").unwrap().as_deref(), Some("hello world"));
        assert!(cache.contains("greeting"));
        assert_eq!(cache.stats().inserts(), 1);
        assert_eq!(cache.stats().hits(), 1);
    }

    #[test]
    fn test_miss_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let cache = text_cache(&dir, 0, AUTO_TRIM_DISABLED);

        assert!(cache.get("nope").unwrap().is_none());
        assert!(!cache.contains("nope"));
        assert_eq!(cache.cache_entry_count().unwrap(), 0);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[test]
    fn test_reput_overwrites() {
        let dir = TempDir::new().unwrap();
        let cache = text_cache(&dir, 0, AUTO_TRIM_DISABLED);

        cache.put("k", &"first value".to_string()).unwrap();
        cache.put("k", &"second".to_string()).unwrap();

        assert_eq!(cache.get("k").unwrap().as_deref(), Some("second"));
        assert_eq!(cache.cache_entry_count().unwrap(), 1);
        assert_eq!(cache.cache_disk_usage().unwrap(), 6);
        assert_eq!(cache.tracked_entries(), 1);
    }

    #[test]
    fn test_put_raw_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = text_cache(&dir, 0, AUTO_TRIM_DISABLED);

        let written = cache.put_raw("raw", &mut &b"streamed"[..]).unwrap();

        assert_eq!(written, 8);
        assert_eq!(cache.get("raw").unwrap().as_deref(), Some("streamed"));
    }

    #[test]
    fn test_codec_failure_on_get() {
        let dir = TempDir::new().unwrap();
        let cache = text_cache(&dir, 0, AUTO_TRIM_DISABLED);

        cache.put_raw("bad", &mut &[0xffu8, 0xfe][..]).unwrap();

        assert!(matches!(cache.get("bad"), Err(Error::Codec(_))));
    }

    #[test]
    fn test_codec_failure_on_put() {
        struct Refuses;

        impl Codec<str> for Refuses {
            type Value = u32;

            fn to_disk(
                &self,
                _key: &str,
                _value: &u32,
                _sink: &mut dyn std::io::Write,
            ) -> std::result::Result<(), diskstore::CodecError> {
                Err("cannot encode".into())
            }

            fn from_disk(
                &self,
                _key: &str,
                _source: &mut dyn Read,
            ) -> std::result::Result<u32, diskstore::CodecError> {
                Ok(0)
            }
        }

        let dir = TempDir::new().unwrap();
        let cache = DiskCacheBuilder::new(dir.path())
            .auto_trim_frequency(AUTO_TRIM_DISABLED)
            .build::<str, _>(Refuses)
            .unwrap();

        assert!(matches!(cache.put("k", &7), Err(Error::Codec(_))));
    }

    #[test]
    fn test_clear_entry() {
        let dir = TempDir::new().unwrap();
        let cache = text_cache(&dir, 0, AUTO_TRIM_DISABLED);
        cache.wait_idle();

        // Absent key: success, nothing deleted
        assert!(!cache.clear_entry("absent").unwrap());

        cache.put("k", &"12345".to_string()).unwrap();
        assert_eq!(cache.usage_estimate().disk_usage, 5);

        assert!(cache.clear_entry("k").unwrap());
        assert!(!cache.contains("k"));
        assert_eq!(cache.usage_estimate().disk_usage, 0);
        assert_eq!(cache.tracked_entries(), 0);
    }

    #[test]
    fn test_clear_keeps_foreign_files() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCacheBuilder::new(dir.path())
            .prefix("img-")
            .suffix(".bin")
            .auto_trim_frequency(AUTO_TRIM_DISABLED)
            .build::<str, _>(BytesCodec)
            .unwrap();

        for key in ["a", "b", "c"] {
            cache.put(key, &vec![1u8; 10]).unwrap();
        }
        fs::write(dir.path().join("unrelated.txt"), b"keep").unwrap();
        fs::write(dir.path().join("img-unrelated.txt"), b"keep").unwrap();

        let summary = cache.clear().unwrap();

        assert_eq!(summary.removed, 3);
        assert_eq!(cache.cache_entry_count().unwrap(), 0);
        assert_eq!(cache.cache_disk_usage().unwrap(), 0);
        assert_eq!(cache.tracked_entries(), 0);
        assert!(dir.path().join("unrelated.txt").exists());
        assert!(dir.path().join("img-unrelated.txt").exists());
    }

    #[test]
    fn test_manual_trim_evicts_least_recent() {
        let dir = TempDir::new().unwrap();
        let cache = bytes_cache(&dir, 1000, AUTO_TRIM_DISABLED, 1_000_000);

        cache.put("A", &vec![0; 400]).unwrap();
        cache.put("B", &vec![0; 400]).unwrap();
        cache.put("C", &vec![0; 400]).unwrap();
        assert_eq!(cache.cache_disk_usage().unwrap(), 1200);

        let reclaimed = cache.trim().unwrap();

        assert_eq!(reclaimed, 400);
        assert!(!cache.contains("A"));
        assert!(cache.contains("B"));
        assert!(cache.contains("C"));
        assert_eq!(cache.cache_disk_usage().unwrap(), 800);
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[test]
    fn test_get_refreshes_recency_contains_does_not() {
        let dir = TempDir::new().unwrap();
        let cache = bytes_cache(&dir, 1000, AUTO_TRIM_DISABLED, 1_000_000);

        cache.put("A", &vec![0; 400]).unwrap();
        cache.put("B", &vec![0; 400]).unwrap();
        cache.put("C", &vec![0; 400]).unwrap();

        assert!(cache.contains("B"));
        assert!(cache.get("A").unwrap().is_some());
        cache.trim().unwrap();

        // A was read, so B is now least recent
        assert!(cache.contains("A"));
        assert!(!cache.contains("B"));
        assert!(cache.contains("C"));
    }

    #[test]
    fn test_touch_key_protects_entry() {
        let dir = TempDir::new().unwrap();
        let cache = bytes_cache(&dir, 1000, AUTO_TRIM_DISABLED, 1_000_000);

        cache.put("A", &vec![0; 400]).unwrap();
        cache.put("B", &vec![0; 400]).unwrap();
        cache.put("C", &vec![0; 400]).unwrap();
        cache.touch_key("A");
        cache.trim().unwrap();

        assert!(cache.contains("A"));
        assert!(!cache.contains("B"));
    }

    #[test]
    fn test_auto_trim_after_third_put() {
        let dir = TempDir::new().unwrap();
        let cache = bytes_cache(&dir, 1000, 1, 1_000_000);
        cache.wait_idle();

        for key in ["A", "B", "C"] {
            cache.put(key, &vec![0; 400]).unwrap();
            cache.wait_idle();
        }

        assert!(!cache.contains("A"));
        assert!(cache.contains("B"));
        assert!(cache.contains("C"));
        assert_eq!(cache.cache_disk_usage().unwrap(), 800);
        assert_eq!(cache.usage_estimate().disk_usage, 800);
    }

    #[test]
    fn test_auto_size_from_free_space() {
        let dir = TempDir::new().unwrap();
        let cache = bytes_cache(&dir, AUTO_MAX_CACHE_SIZE, 1, 10_000);
        cache.wait_idle();

        for key in ["A", "B", "C"] {
            cache.put(key, &vec![0; 400]).unwrap();
            cache.wait_idle();
        }

        assert!(!cache.contains("A"));
        assert!(cache.contains("B"));
        assert!(cache.contains("C"));
        assert_eq!(cache.cache_disk_usage().unwrap(), 800);
    }

    #[test]
    fn test_configure_applies_to_next_trim() {
        let dir = TempDir::new().unwrap();
        let cache = bytes_cache(&dir, 10_000, AUTO_TRIM_DISABLED, 1_000_000);

        for key in ["A", "B", "C"] {
            cache.put(key, &vec![0; 400]).unwrap();
        }
        assert_eq!(cache.trim().unwrap(), 0);

        cache.configure(500, 5);
        assert_eq!(cache.max_disk_usage(), 500);
        assert_eq!(cache.auto_trim_frequency(), 5);
        assert_eq!(cache.cache_entry_count().unwrap(), 3);

        assert_eq!(cache.trim().unwrap(), 800);
        assert_eq!(cache.cache_entry_count().unwrap(), 1);
        assert!(cache.contains("C"));
    }

    #[test]
    fn test_leftover_files_trimmed_first() {
        let dir = TempDir::new().unwrap();
        let cache = bytes_cache(&dir, 1000, AUTO_TRIM_DISABLED, 1_000_000);

        // Written by an earlier run, so not tracked
        fs::write(cache.path_for("stale"), vec![0u8; 400]).unwrap();
        cache.put("A", &vec![0; 400]).unwrap();
        cache.put("B", &vec![0; 400]).unwrap();

        let report = cache.trim_report().unwrap();

        assert_eq!(report.unqueued_removed, 1);
        assert_eq!(report.queued_removed, 0);
        assert!(cache.contains("A"));
        assert!(cache.contains("B"));
        assert!(!cache.contains("stale"));
    }

    #[test]
    fn test_initial_refresh_counts_existing_entries() {
        let dir = TempDir::new().unwrap();
        {
            let cache = bytes_cache(&dir, 0, AUTO_TRIM_DISABLED, 1_000_000);
            cache.put("A", &vec![0; 300]).unwrap();
        }

        let cache = bytes_cache(&dir, 0, AUTO_TRIM_DISABLED, 1_000_000);
        cache.wait_idle();

        assert_eq!(
            cache.usage_estimate(),
            UsageEstimate {
                disk_usage: 300,
                free_space: 1_000_000
            }
        );
        assert_eq!(cache.get("A").unwrap().map(|v| v.len()), Some(300));
    }

    #[test]
    fn test_digest_changes_file_names() {
        let dir = TempDir::new().unwrap();
        let sha1 = text_cache(&dir, 0, AUTO_TRIM_DISABLED);
        let sha256 = DiskCacheBuilder::new(dir.path())
            .digest(diskstore::DigestAlgorithm::Sha256)
            .build::<str, _>(Utf8Codec)
            .unwrap();

        assert_ne!(sha1.token_for("k"), sha256.token_for("k"));
        assert_eq!(sha1.token_for("k").len(), 40);
        assert_eq!(sha256.path_for("k").parent().unwrap(), dir.path());
    }

    #[test]
    fn test_shutdown_stops_background_work() {
        let dir = TempDir::new().unwrap();
        let cache = text_cache(&dir, 0, 1);

        cache.shutdown();

        assert!(matches!(cache.schedule_trim(), Err(Error::ShutDown)));
        // Synchronous operations keep working
        cache.put("k", &"v".to_string()).unwrap();
        assert_eq!(cache.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_scheduled_trim_handle() {
        let dir = TempDir::new().unwrap();
        let cache = bytes_cache(&dir, 500, AUTO_TRIM_DISABLED, 1_000_000);

        cache.put("A", &vec![0; 400]).unwrap();
        cache.put("B", &vec![0; 400]).unwrap();

        let handle = cache.schedule_trim().unwrap();
        handle.wait();

        assert!(handle.is_finished());
        assert!(!cache.contains("A"));
        assert_eq!(cache.stats().trim_passes(), 1);
    }

    #[test]
    fn test_get_never_sees_partial_put_raw() {
        const LEN: usize = 256 * 1024;

        let dir = TempDir::new().unwrap();
        let cache = Arc::new(bytes_cache(&dir, 0, AUTO_TRIM_DISABLED, 1_000_000_000));

        let writer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..40u8 {
                    let payload = vec![b'a' + (i % 2); LEN];
                    cache.put_raw("hot", &mut &payload[..]).unwrap();
                }
            })
        };

        let reader = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for _ in 0..200 {
                    if let Some(value) = cache.get("hot").unwrap() {
                        assert_eq!(value.len(), LEN);
                        assert!(value.iter().all(|b| *b == value[0]));
                    }
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(cache.cache_entry_count().unwrap(), 1);
    }

    #[test]
    fn test_concurrent_puts_stay_near_budget() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(bytes_cache(&dir, 4000, 2, 1_000_000));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..25 {
                        let key = format!("{}-{}", t, i);
                        cache.put(&key, &vec![t as u8; 100]).unwrap();
                        let _ = cache.get(&key).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        cache.wait_idle();
        cache.trim().unwrap();

        assert!(cache.cache_disk_usage().unwrap() <= 4000);
        assert_eq!(cache.stats().inserts(), 100);
        assert!(cache.tracked_entries() <= 100);
    }

    #[cfg(unix)]
    #[test]
    fn test_put_disk_full_is_io_error() {
        if !Path::new("/dev/full").exists() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let cache = bytes_cache(&dir, 0, AUTO_TRIM_DISABLED, 1_000_000);
        std::os::unix::fs::symlink("/dev/full", cache.path_for("k")).unwrap();

        let result = cache.put("k", &vec![0u8; 200_000]);

        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_failed_commit_forgets_previous_entry() {
        // Deletes in-flight temp files while being read, so the commit's
        // rename finds nothing to move
        struct LosesTempFile {
            dir: PathBuf,
            data: Vec<u8>,
            pos: usize,
        }

        impl Read for LosesTempFile {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                for entry in fs::read_dir(&self.dir)? {
                    let path = entry?.path();
                    if path.to_string_lossy().ends_with(".temp") {
                        fs::remove_file(&path)?;
                    }
                }
                let n = (&self.data[self.pos..]).read(buf)?;
                self.pos += n;
                Ok(n)
            }
        }

        let dir = TempDir::new().unwrap();
        let cache = bytes_cache(&dir, 0, AUTO_TRIM_DISABLED, 1_000_000);
        cache.put("k", &vec![0u8; 300]).unwrap();
        cache.wait_idle();
        assert_eq!(cache.usage_estimate().disk_usage, 300);

        let mut source = LosesTempFile {
            dir: dir.path().to_path_buf(),
            data: vec![1u8; 100],
            pos: 0,
        };
        assert!(cache.put_raw("k", &mut source).is_err());

        assert!(!cache.contains("k"));
        assert_eq!(cache.usage_estimate().disk_usage, 0);
        assert_eq!(cache.tracked_entries(), 0);
    }

    #[test]
    fn test_clear_entry_racing_put_keeps_tracking_consistent() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(bytes_cache(&dir, 0, AUTO_TRIM_DISABLED, 1_000_000));

        let writer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for _ in 0..300 {
                    cache.put("hot", &vec![7u8; 64]).unwrap();
                }
            })
        };
        let remover = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for _ in 0..300 {
                    cache.clear_entry("hot").unwrap();
                }
            })
        };
        writer.join().unwrap();
        remover.join().unwrap();

        // A file on disk is always in the recency queue, and only then
        let tracked = cache.tracked_entries() == 1;
        assert_eq!(cache.contains("hot"), tracked);
    }

    #[test]
    fn test_auto_size_trims_despite_stale_estimate() {
        let dir = TempDir::new().unwrap();
        let cache = bytes_cache(&dir, AUTO_MAX_CACHE_SIZE, 1, 10_000);
        cache.wait_idle();
        assert_eq!(cache.usage_estimate().disk_usage, 0);

        // Leftovers the estimate knows nothing about
        fs::write(cache.path_for("left-1"), vec![0u8; 1500]).unwrap();
        fs::write(cache.path_for("left-2"), vec![0u8; 1500]).unwrap();

        cache.put("A", &vec![0u8; 10]).unwrap();
        cache.wait_idle();

        // Budget is free / 10 = 1000
        assert!(cache.cache_disk_usage().unwrap() <= 1000);
        assert!(cache.contains("A"));
        assert!(cache.stats().trim_passes() >= 1);
    }
}
