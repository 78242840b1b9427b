//! Size-based eviction
//!
//! A trim pass works out how far over budget the cache is from a live scan
//! (the plan), then deletes in two passes:
//! 1. files not tracked by the recency queue, oldest modification first
//! 2. tracked files, least recently touched first
//!
//! Untracked files are leftovers from earlier runs or files written behind
//! the cache's back; they go before anything in the working set.

use std::path::Path;

use diskstore::{EntryMeta, FileStore, Result};
use tracing::{debug, info, warn};

use crate::recency::RecencyQueue;
use crate::usage::SpaceProbe;

/// In auto-size mode the budget is the volume's free space divided by this
pub const AUTO_MAX_CACHE_SIZE_DIVISOR: u64 = 10;

/// Budget for the cache given the configured maximum and live free space
///
/// `max_disk_usage == 0` means auto-size.
pub fn desired_size(max_disk_usage: u64, free_space: u64) -> u64 {
    if max_disk_usage > 0 {
        max_disk_usage.min(free_space)
    } else {
        free_space / AUTO_MAX_CACHE_SIZE_DIVISOR
    }
}

/// What a trim pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimReport {
    /// Budget the pass aimed for
    pub target: u64,
    /// Live usage before trimming
    pub usage_before: u64,
    /// Bytes the pass needed to reclaim
    pub size_to_trim: u64,
    /// Bytes actually deleted
    pub reclaimed: u64,
    /// Untracked files deleted in the first pass
    pub unqueued_removed: usize,
    /// Tracked files deleted in the second pass
    pub queued_removed: usize,
}

impl TrimReport {
    /// Total files deleted
    pub fn files_removed(&self) -> usize {
        self.unqueued_removed + self.queued_removed
    }
}

/// Outcome of deleting one file during a trim
enum Removal {
    Removed(u64),
    Vanished,
    Failed,
}

/// Scan taken before a trim pass
///
/// Planning only reads the directory, so it can run without the cache lock.
#[derive(Debug, Clone, Default)]
pub struct TrimPlan {
    /// Budget the pass aims for
    pub target: u64,
    /// Live usage at scan time
    pub usage_before: u64,
    /// Entries at scan time, oldest modification first
    pub entries: Vec<EntryMeta>,
}

impl TrimPlan {
    /// Bytes over budget at scan time
    pub fn size_to_trim(&self) -> u64 {
        self.usage_before.saturating_sub(self.target)
    }
}

/// Runs trim passes over a store
pub struct Evictor<'a> {
    store: &'a FileStore,
    queue: &'a RecencyQueue,
    probe: &'a dyn SpaceProbe,
}

impl<'a> Evictor<'a> {
    /// Create an evictor over the given store and queue
    pub fn new(store: &'a FileStore, queue: &'a RecencyQueue, probe: &'a dyn SpaceProbe) -> Self {
        Self {
            store,
            queue,
            probe,
        }
    }

    /// Delete entries until the store fits the budget for `max_disk_usage`
    pub fn trim(&self, max_disk_usage: u64) -> Result<TrimReport> {
        let plan = self.plan(max_disk_usage)?;
        Ok(self.execute(plan))
    }

    /// Scan the store and work out the budget
    pub fn plan(&self, max_disk_usage: u64) -> Result<TrimPlan> {
        let free_space = self.probe.free_space(self.store.base_dir())?;
        let mut entries = self.store.list_entries()?;
        entries.sort_by_key(|e| e.modified);

        Ok(TrimPlan {
            target: desired_size(max_disk_usage, free_space),
            usage_before: entries.iter().map(|e| e.len).sum(),
            entries,
        })
    }

    /// Delete according to `plan`
    ///
    /// Entries that vanished since the scan no longer count toward the
    /// overage.
    pub fn execute(&self, plan: TrimPlan) -> TrimReport {
        let mut report = TrimReport {
            target: plan.target,
            usage_before: plan.usage_before,
            size_to_trim: plan.size_to_trim(),
            ..TrimReport::default()
        };
        if report.size_to_trim == 0 {
            return report;
        }

        for entry in &plan.entries {
            if report.reclaimed >= report.size_to_trim {
                break;
            }
            if self.queue.contains(&entry.path) {
                continue;
            }
            match self.remove(&entry.path) {
                Removal::Removed(len) => {
                    report.reclaimed += len;
                    report.unqueued_removed += 1;
                    debug!(path = %entry.path.display(), len, "Trimmed unqueued file from cache");
                }
                // Gone since the scan, so no longer part of the overage
                Removal::Vanished => {
                    report.size_to_trim = report.size_to_trim.saturating_sub(entry.len)
                }
                Removal::Failed => {}
            }
        }

        while report.reclaimed < report.size_to_trim {
            let Some(path) = self.queue.evict_oldest() else {
                break;
            };
            if let Removal::Removed(len) = self.remove(&path) {
                report.reclaimed += len;
                report.queued_removed += 1;
                debug!(path = %path.display(), len, "Trimmed file from cache");
            }
        }

        info!(
            target = report.target,
            usage_before = report.usage_before,
            reclaimed = report.reclaimed,
            files = report.files_removed(),
            "Trimmed cache"
        );
        report
    }

    fn remove(&self, path: &Path) -> Removal {
        match self.store.delete_path(path) {
            Ok(Some(len)) => Removal::Removed(len),
            Ok(None) => Removal::Vanished,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Error deleting cache file during trim");
                Removal::Failed
            }
        }
    }
}
