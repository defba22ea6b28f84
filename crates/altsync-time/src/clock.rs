//! Clock implementations

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use altsync_core::Timestamp;

/// Source of wall-clock time in whole seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Operating system wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Timestamp(secs)
    }
}

/// Manually driven clock; clones share the same time
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    secs: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        ManualClock {
            secs: Arc::new(AtomicU64::new(start.0)),
        }
    }

    /// Move time forward
    pub fn advance(&self, dt: Duration) -> Timestamp {
        let secs = dt.as_secs();
        let prev = self.secs.fetch_add(secs, Ordering::SeqCst);
        Timestamp(prev.saturating_add(secs))
    }

    /// Jump to a specific time. Only moves forward.
    pub fn set(&self, t: Timestamp) {
        self.secs.fetch_max(t.0, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.secs.load(Ordering::SeqCst))
    }
}
