//! Disk usage estimates
//!
//! The estimate is advisory: it steers the auto-trim decision only. Trim
//! itself always rescans.

use std::io;
use std::path::Path;

use diskstore::{FileStore, Result};
use parking_lot::RwLock;
use tracing::debug;

/// Free-space query for the volume holding a directory
pub trait SpaceProbe: Send + Sync {
    /// Bytes available to this process on the volume containing `path`
    fn free_space(&self, path: &Path) -> io::Result<u64>;
}

/// Asks the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeSpaceProbe;

impl SpaceProbe for VolumeSpaceProbe {
    fn free_space(&self, path: &Path) -> io::Result<u64> {
        fs2::available_space(path)
    }
}

/// Reports a fixed amount of free space
#[derive(Debug, Clone, Copy)]
pub struct FixedSpaceProbe(pub u64);

impl SpaceProbe for FixedSpaceProbe {
    fn free_space(&self, _path: &Path) -> io::Result<u64> {
        Ok(self.0)
    }
}

/// Snapshot of cache size and volume free space
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageEstimate {
    /// Bytes used by cache entries
    pub disk_usage: u64,
    /// Bytes free on the cache volume
    pub free_space: u64,
}

#[derive(Debug, Default)]
struct UsageState {
    estimate: UsageEstimate,
    /// Bumped on every incremental update
    generation: u64,
}

/// Holds the latest [`UsageEstimate`]
///
/// A scan can race with writes. Callers read [`UsageTracker::generation`]
/// before scanning and hand it to [`UsageTracker::replace_if_current`], which
/// drops the result if the estimate moved in the meantime.
#[derive(Debug, Default)]
pub struct UsageTracker {
    state: RwLock<UsageState>,
}

impl UsageTracker {
    /// Create a tracker with a zeroed estimate
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest snapshot
    pub fn estimate(&self) -> UsageEstimate {
        self.state.read().estimate
    }

    /// Counter of incremental updates so far
    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    /// Scan the store and query the volume without touching the estimate
    pub fn measure(store: &FileStore, probe: &dyn SpaceProbe) -> Result<UsageEstimate> {
        Ok(UsageEstimate {
            disk_usage: store.disk_usage()?,
            free_space: probe.free_space(store.base_dir())?,
        })
    }

    /// Overwrite the estimate unless it changed since `generation` was read
    ///
    /// Returns false when the measurement was stale and has been dropped.
    pub fn replace_if_current(&self, fresh: UsageEstimate, generation: u64) -> bool {
        let mut state = self.state.write();
        if state.generation != generation {
            debug!(
                seen = generation,
                current = state.generation,
                "Dropped stale disk usage measurement"
            );
            return false;
        }
        state.estimate = fresh;
        debug!(
            disk_usage = fresh.disk_usage,
            free_space = fresh.free_space,
            "Refreshed disk usage estimate"
        );
        true
    }

    /// Measure, then replace the estimate if nothing changed meanwhile
    pub fn refresh(&self, store: &FileStore, probe: &dyn SpaceProbe) -> Result<Option<UsageEstimate>> {
        let generation = self.generation();
        let fresh = Self::measure(store, probe)?;
        Ok(self.replace_if_current(fresh, generation).then_some(fresh))
    }

    /// Account for a file rewritten from `previous` bytes to `written` bytes
    pub fn record_write(&self, previous: u64, written: u64) {
        let mut state = self.state.write();
        state.estimate.disk_usage = state
            .estimate
            .disk_usage
            .saturating_sub(previous)
            .saturating_add(written);
        state.generation += 1;
    }

    /// Account for a removed file
    pub fn record_removal(&self, len: u64) {
        let mut state = self.state.write();
        state.estimate.disk_usage = state.estimate.disk_usage.saturating_sub(len);
        state.generation += 1;
    }

    /// Account for every entry being removed
    pub fn record_wipe(&self) {
        let mut state = self.state.write();
        state.estimate.disk_usage = 0;
        state.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_refresh_replaces_estimate() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let tracker = UsageTracker::new();

        store.write_atomic("a", &mut &[0u8; 300][..]).unwrap();
        store.write_atomic("b", &mut &[0u8; 200][..]).unwrap();
        tracker.record_write(0, 9999);

        let fresh = tracker
            .refresh(&store, &FixedSpaceProbe(10_000))
            .unwrap()
            .unwrap();

        assert_eq!(
            fresh,
            UsageEstimate {
                disk_usage: 500,
                free_space: 10_000
            }
        );
        assert_eq!(tracker.estimate(), fresh);
    }

    #[test]
    fn test_incremental_updates() {
        let tracker = UsageTracker::new();

        tracker.record_write(0, 400);
        tracker.record_write(0, 400);
        tracker.record_write(400, 100); // overwrite shrinks
        assert_eq!(tracker.estimate().disk_usage, 500);

        tracker.record_removal(100);
        assert_eq!(tracker.estimate().disk_usage, 400);

        tracker.record_removal(1000);
        assert_eq!(tracker.estimate().disk_usage, 0);

        tracker.record_write(0, 50);
        tracker.record_wipe();
        assert_eq!(tracker.estimate().disk_usage, 0);
    }

    #[test]
    fn test_volume_probe_reports_space() {
        let dir = TempDir::new().unwrap();
        assert!(VolumeSpaceProbe.free_space(dir.path()).unwrap() > 0);
    }

    #[test]
    fn test_stale_measurement_is_dropped() {
        let tracker = UsageTracker::new();
        let seen = tracker.generation();
        tracker.record_write(0, 400);

        let stale = UsageEstimate {
            disk_usage: 0,
            free_space: 5,
        };
        assert!(!tracker.replace_if_current(stale, seen));
        assert_eq!(tracker.estimate().disk_usage, 400);

        assert!(tracker.replace_if_current(stale, tracker.generation()));
        assert_eq!(tracker.estimate(), stale);
    }
}
