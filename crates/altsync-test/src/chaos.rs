//! Chaos network for altsync testing
//!
//! Simulates the kind of channel the protocol is built for:
//! - Latency in whole seconds (so reordering falls out of it)
//! - Random and burst loss
//! - Duplication

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Network chaos configuration
#[derive(Clone, Debug)]
pub struct ChaosConfig {
    /// Latency range in seconds, inclusive
    pub latency_secs: (u64, u64),
    /// Packet loss rate (0.0 - 1.0)
    pub loss_rate: f64,
    /// Burst loss probability
    pub burst_loss_prob: f64,
    /// Burst loss length range
    pub burst_length: (u32, u32),
    /// Duplicate probability
    pub duplicate_prob: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        ChaosConfig {
            latency_secs: (0, 1),
            loss_rate: 0.01,
            burst_loss_prob: 0.01,
            burst_length: (2, 5),
            duplicate_prob: 0.01,
        }
    }
}

impl ChaosConfig {
    /// Instant, lossless delivery
    pub fn perfect() -> Self {
        ChaosConfig {
            latency_secs: (0, 0),
            loss_rate: 0.0,
            burst_loss_prob: 0.0,
            burst_length: (0, 0),
            duplicate_prob: 0.0,
        }
    }

    /// Good network conditions
    pub fn good() -> Self {
        ChaosConfig {
            latency_secs: (0, 1),
            loss_rate: 0.001,
            burst_loss_prob: 0.0,
            burst_length: (1, 2),
            duplicate_prob: 0.001,
        }
    }

    /// Poor network conditions
    pub fn poor() -> Self {
        ChaosConfig {
            latency_secs: (0, 3),
            loss_rate: 0.05,
            burst_loss_prob: 0.02,
            burst_length: (2, 4),
            duplicate_prob: 0.02,
        }
    }

    /// Hostile network conditions
    pub fn hostile() -> Self {
        ChaosConfig {
            latency_secs: (0, 8),
            loss_rate: 0.2,
            burst_loss_prob: 0.05,
            burst_length: (3, 8),
            duplicate_prob: 0.05,
        }
    }
}

/// Packet in the chaos network
#[derive(Clone, Debug)]
struct ChaosPacket<T> {
    item: T,
    delivery_time: Duration,
    send_time: Duration,
    /// Tie-break so equal delivery times keep send order
    seq: u64,
}

/// Chaos network statistics
#[derive(Clone, Debug, Default)]
pub struct ChaosStats {
    pub packets_sent: u64,
    pub packets_delivered: u64,
    pub packets_lost: u64,
    pub packets_duplicated: u64,
    pub total_latency_secs: u64,
    pub max_latency_secs: u64,
}

impl ChaosStats {
    pub fn loss_rate(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.packets_lost as f64 / self.packets_sent as f64
        }
    }

    pub fn avg_latency_secs(&self) -> f64 {
        if self.packets_delivered == 0 {
            0.0
        } else {
            self.total_latency_secs as f64 / self.packets_delivered as f64
        }
    }
}

/// Chaos network simulator
pub struct ChaosNetwork<T> {
    config: ChaosConfig,
    rng: StdRng,
    in_flight: Vec<ChaosPacket<T>>,
    current_time: Duration,
    burst_remaining: u32,
    next_seq: u64,
    stats: ChaosStats,
}

impl<T: Clone> ChaosNetwork<T> {
    /// Create a new chaos network with seed
    pub fn new(config: ChaosConfig, seed: u64) -> Self {
        ChaosNetwork {
            config,
            rng: StdRng::seed_from_u64(seed),
            in_flight: Vec::new(),
            current_time: Duration::ZERO,
            burst_remaining: 0,
            next_seq: 0,
            stats: ChaosStats::default(),
        }
    }

    /// Send an item into the chaos network
    pub fn send(&mut self, item: T) {
        self.stats.packets_sent += 1;

        if self.should_drop() {
            self.stats.packets_lost += 1;
            return;
        }

        if self.rng.gen::<f64>() < self.config.duplicate_prob {
            self.enqueue(item.clone());
            self.stats.packets_duplicated += 1;
        }
        self.enqueue(item);
    }

    fn enqueue(&mut self, item: T) {
        let (min, max) = self.config.latency_secs;
        let latency = Duration::from_secs(self.rng.gen_range(min..=max.max(min)));
        let seq = self.next_seq;
        self.next_seq += 1;
        self.in_flight.push(ChaosPacket {
            item,
            delivery_time: self.current_time + latency,
            send_time: self.current_time,
            seq,
        });
    }

    /// Check if packet should be dropped
    fn should_drop(&mut self) -> bool {
        // Burst loss
        if self.burst_remaining > 0 {
            self.burst_remaining -= 1;
            return true;
        }

        // Start new burst?
        if self.rng.gen::<f64>() < self.config.burst_loss_prob {
            let (min, max) = self.config.burst_length;
            self.burst_remaining = self.rng.gen_range(min..=max.max(min));
            return true;
        }

        // Random loss
        self.rng.gen::<f64>() < self.config.loss_rate
    }

    /// Advance time and receive delivered items
    pub fn tick(&mut self, dt: Duration) -> Vec<T> {
        self.current_time += dt;
        self.drain_due()
    }

    /// Items due at the current time, in delivery order
    pub fn drain_due(&mut self) -> Vec<T> {
        let now = self.current_time;
        let (mut due, pending): (Vec<_>, Vec<_>) = self
            .in_flight
            .drain(..)
            .partition(|p| p.delivery_time <= now);
        self.in_flight = pending;
        due.sort_by_key(|p| (p.delivery_time, p.seq));

        due.into_iter()
            .map(|packet| {
                let latency = (packet.delivery_time - packet.send_time).as_secs();
                self.stats.packets_delivered += 1;
                self.stats.total_latency_secs += latency;
                self.stats.max_latency_secs = self.stats.max_latency_secs.max(latency);
                packet.item
            })
            .collect()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Get current statistics
    pub fn stats(&self) -> &ChaosStats {
        &self.stats
    }

    /// Get current time
    pub fn current_time(&self) -> Duration {
        self.current_time
    }
}
