//! In-memory transport
//!
//! Records every delivery instead of sending it. Outcomes can be scripted to
//! exercise failure paths. Clones share the same log, so a test keeps one
//! handle while the node owns the other.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{Route, SendOutcome, Transport};

/// One recorded delivery attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub bytes: Vec<u8>,
    pub route: Route,
    pub outcome: SendOutcome,
}

#[derive(Debug, Default)]
struct Inner {
    log: Vec<Delivery>,
    scripted: VecDeque<SendOutcome>,
    fallback: Option<SendOutcome>,
}

/// Recording transport for tests and simulation
#[derive(Clone, Debug, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outcome for the next delivery attempt
    pub fn push_outcome(&self, outcome: SendOutcome) {
        self.inner.lock().scripted.push_back(outcome);
    }

    /// Outcome used once the script runs out; `None` means `Sent`
    pub fn set_fallback(&self, outcome: Option<SendOutcome>) {
        self.inner.lock().fallback = outcome;
    }

    /// Every attempt so far, in order
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.inner.lock().log.clone()
    }

    /// Drain the log
    pub fn take_deliveries(&self) -> Vec<Delivery> {
        std::mem::take(&mut self.inner.lock().log)
    }

    /// Drain the log, keeping only what the host accepted
    pub fn take_sent(&self) -> Vec<(Vec<u8>, Route)> {
        self.take_deliveries()
            .into_iter()
            .filter(|d| d.outcome.is_sent())
            .map(|d| (d.bytes, d.route))
            .collect()
    }

    pub fn attempt_count(&self) -> usize {
        self.inner.lock().log.len()
    }
}

impl Transport for MemoryTransport {
    fn deliver(&self, bytes: &[u8], route: &Route) -> SendOutcome {
        let mut inner = self.inner.lock();
        let outcome = match inner.scripted.pop_front() {
            Some(outcome) => outcome,
            None => inner.fallback.clone().unwrap_or(SendOutcome::Sent),
        };
        inner.log.push(Delivery {
            bytes: bytes.to_vec(),
            route: route.clone(),
            outcome: outcome.clone(),
        });
        outcome
    }
}
