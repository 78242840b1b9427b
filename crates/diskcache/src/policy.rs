//! Auto-trim decisions

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::usage::UsageEstimate;

/// Passing this as the frequency turns auto-trim off
pub const AUTO_TRIM_DISABLED: u32 = 0;

/// Default number of mutations between auto-trim checks
pub const DEFAULT_AUTO_TRIM_FREQUENCY: u32 = 10;

/// Decides, after each mutation, whether a background trim is worthwhile
///
/// Every `frequency`-th mutation the latest usage estimate is compared with
/// the budget. Only one auto-scheduled trim is outstanding at a time.
#[derive(Debug)]
pub struct AutoTrimPolicy {
    frequency: AtomicU32,
    counter: Mutex<u32>,
    pending: AtomicBool,
}

impl AutoTrimPolicy {
    /// Create a policy; `AUTO_TRIM_DISABLED` turns it off
    pub fn new(frequency: u32) -> Self {
        Self {
            frequency: AtomicU32::new(frequency),
            counter: Mutex::new(1),
            pending: AtomicBool::new(false),
        }
    }

    /// Current frequency
    pub fn frequency(&self) -> u32 {
        self.frequency.load(Ordering::Relaxed)
    }

    /// Change the frequency; takes effect on the next mutation
    pub fn set_frequency(&self, frequency: u32) {
        self.frequency.store(frequency, Ordering::Relaxed);
    }

    /// Is auto-trim enabled?
    pub fn is_enabled(&self) -> bool {
        self.frequency() != AUTO_TRIM_DISABLED
    }

    /// Advance the counter and decide whether to schedule a trim
    ///
    /// Returns true at most once until [`AutoTrimPolicy::trim_finished`] is
    /// called.
    pub fn record_mutation(&self, estimate: UsageEstimate, max_disk_usage: u64) -> bool {
        let frequency = self.frequency();
        if frequency == AUTO_TRIM_DISABLED {
            return false;
        }

        let wrapped = {
            let mut counter = self.counter.lock();
            *counter = (*counter + 1) % frequency;
            *counter == 0
        };
        if !wrapped {
            return false;
        }

        if estimate.disk_usage <= trigger_threshold(max_disk_usage, estimate.free_space) {
            return false;
        }

        self.pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Mark the outstanding auto-scheduled trim as done
    pub fn trim_finished(&self) {
        self.pending.store(false, Ordering::Release);
    }

    /// Is an auto-scheduled trim queued or running?
    pub fn is_trim_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

/// Usage above which a wrap schedules a trim
///
/// In auto-size mode this is zero, so every wrap with a non-empty cache
/// schedules a trim and the trim works out the budget from a live scan. An
/// estimate that lags behind the disk cannot hold a trim back.
pub fn trigger_threshold(max_disk_usage: u64, free_space: u64) -> u64 {
    max_disk_usage.min(free_space)
}

impl Default for AutoTrimPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_AUTO_TRIM_FREQUENCY)
    }
}
