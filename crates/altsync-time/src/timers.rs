//! Cancellable timers and sampling
//!
//! Each timer is keyed by the action it triggers. Scheduling an action that
//! is already pending replaces the old deadline, so a burst of requests
//! collapses into a single firing.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use altsync_core::Timestamp;

/// One-shot timers keyed by action
#[derive(Clone, Debug)]
pub struct TimerSet<K> {
    deadlines: HashMap<K, Timestamp>,
}

impl<K> Default for TimerSet<K> {
    fn default() -> Self {
        TimerSet {
            deadlines: HashMap::new(),
        }
    }
}

impl<K: Copy + Eq + Hash + Ord> TimerSet<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `action` at `at`, replacing any pending instance.
    /// Returns the replaced deadline.
    pub fn schedule(&mut self, action: K, at: Timestamp) -> Option<Timestamp> {
        self.deadlines.insert(action, at)
    }

    /// Cancel a pending action. Returns whether one was pending.
    pub fn cancel(&mut self, action: K) -> bool {
        self.deadlines.remove(&action).is_some()
    }

    pub fn is_pending(&self, action: K) -> bool {
        self.deadlines.contains_key(&action)
    }

    pub fn deadline(&self, action: K) -> Option<Timestamp> {
        self.deadlines.get(&action).copied()
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.deadlines.values().min().copied()
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Remove and return every action due at `now`, earliest first
    pub fn take_due(&mut self, now: Timestamp) -> Vec<K> {
        let mut due: Vec<(Timestamp, K)> = self
            .deadlines
            .iter()
            .filter(|(_, &at)| at <= now)
            .map(|(&k, &at)| (at, k))
            .collect();
        due.sort();

        for (_, k) in &due {
            self.deadlines.remove(k);
        }
        due.into_iter().map(|(_, k)| k).collect()
    }
}

/// Accepts a signal at most once per `min_interval`
///
/// Used for external events that arrive in bursts: instead of reacting to
/// every one, react to the first and ignore the rest of the window.
#[derive(Clone, Debug)]
pub struct SamplingGate {
    min_interval: Duration,
    last_accepted: Option<Timestamp>,
}

impl SamplingGate {
    pub fn new(min_interval: Duration) -> Self {
        SamplingGate {
            min_interval,
            last_accepted: None,
        }
    }

    /// Returns true and records `now` when the window has elapsed
    pub fn try_accept(&mut self, now: Timestamp) -> bool {
        if let Some(last) = self.last_accepted {
            if now.since(last) < self.min_interval {
                return false;
            }
        }
        self.last_accepted = Some(now);
        true
    }

    pub fn last_accepted(&self) -> Option<Timestamp> {
        self.last_accepted
    }
}
