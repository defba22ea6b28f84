//! Time primitives for altsync
//!
//! All protocol timestamps are whole seconds. `Timestamp::ZERO` means
//! "never" and is what an absent profile compares as.

use std::ops::{Add, Sub};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Upper bound for network-sourced timestamps (2100-01-01T00:00:00Z)
pub const MAX_TIMESTAMP: u64 = 4_102_444_800;

/// Wall-clock timestamp in seconds
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);
    pub const MAX: Timestamp = Timestamp(MAX_TIMESTAMP);

    #[inline]
    pub fn from_secs(secs: u64) -> Self {
        Timestamp(secs)
    }

    #[inline]
    pub fn as_secs(self) -> u64 {
        self.0
    }

    /// Reject timestamps a sane peer could not have produced
    pub fn validate(self) -> Result<(), ValidationError> {
        if self.0 > MAX_TIMESTAMP {
            return Err(ValidationError::TimestampOutOfRange(self.0));
        }
        Ok(())
    }

    #[inline]
    pub fn saturating_add(self, duration: Duration) -> Self {
        Timestamp(self.0.saturating_add(duration.as_secs()))
    }

    #[inline]
    pub fn saturating_sub(self, duration: Duration) -> Self {
        Timestamp(self.0.saturating_sub(duration.as_secs()))
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future
    #[inline]
    pub fn since(self, earlier: Timestamp) -> Duration {
        Duration::from_secs(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    #[inline]
    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl Sub<Timestamp> for Timestamp {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: Timestamp) -> Self::Output {
        self.since(rhs)
    }
}

impl std::fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t({}s)", self.0)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
