//! Coordinator - timing of outbound announcements
//!
//! Every announce goes through the same debounce → jitter → send shape:
//! - Local changes: debounced, bursts collapse into one announce
//! - Peer set changes: sampled, then settle delay, then random jitter
//! - Heartbeat: forces an announce after a long quiet period
//!
//! Also owns chunked delta transfer, since chunk sizing is a byte budget
//! decision like the rest of the outbound timing.

use std::time::Duration;

use rand::Rng;

use altsync_core::{CharacterRecord, PeerKey, Timestamp};
use altsync_state::LocalStore;
use altsync_time::{SamplingGate, TimerSet};
use altsync_transport::Route;
use altsync_wire::{Announce, CharsUpdate, Message, MAX_MESSAGE_SIZE};

use crate::{NodeConfig, Outbound};

/// Scheduled coordinator actions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    DebouncedAnnounce,
    Settle,
    Jitter,
    Heartbeat,
}

/// Announcement scheduler
#[derive(Debug)]
pub struct Coordinator {
    debounce_delay: Duration,
    settle_delay: Duration,
    max_jitter: Duration,
    heartbeat_interval: Duration,
    heartbeat_idle: Duration,
    chunk_size: usize,
    timers: TimerSet<TimerKind>,
    peer_change_gate: SamplingGate,
    last_announce_at: Option<Timestamp>,
}

impl Coordinator {
    pub fn new(config: &NodeConfig) -> Self {
        Coordinator {
            debounce_delay: config.debounce_delay,
            settle_delay: config.settle_delay,
            max_jitter: config.max_jitter,
            heartbeat_interval: config.heartbeat_interval,
            heartbeat_idle: config.heartbeat_idle,
            chunk_size: config.chunk_size.max(1),
            timers: TimerSet::new(),
            peer_change_gate: SamplingGate::new(config.peer_change_min_interval),
            last_announce_at: None,
        }
    }

    /// Arm the heartbeat
    pub fn start(&mut self, now: Timestamp) {
        self.timers
            .schedule(TimerKind::Heartbeat, now + self.heartbeat_interval);
    }

    #[inline]
    pub fn last_announce_at(&self) -> Option<Timestamp> {
        self.last_announce_at
    }

    pub fn is_pending(&self, kind: TimerKind) -> bool {
        self.timers.is_pending(kind)
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<Timestamp> {
        self.timers.deadline(kind)
    }

    /// Earliest time `poll` has work to do
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.timers.next_deadline()
    }

    /// Broadcast a summary of the self profile. No-op without one.
    pub fn announce_self(&mut self, store: &LocalStore, out: &mut Outbound<'_>, now: Timestamp) -> bool {
        let Some(me) = store.self_profile() else {
            tracing::debug!("no self profile yet, skipping announce");
            return false;
        };

        let message = Message::Announce(Announce {
            owner_key: me.owner_key().clone(),
            alias: me.alias().to_string(),
            alias_updated_at: me.alias_updated_at(),
            chars_updated_at: me.chars_updated_at(),
            char_count: me.char_count(),
        });

        let sent = out.send(&message, &Route::broadcast());
        if sent {
            self.last_announce_at = Some(now);
            out.stats.announces_sent += 1;
        }
        sent
    }

    /// Replace any pending debounced announce with one `debounce_delay` out
    pub fn announce_self_debounced(&mut self, now: Timestamp) {
        self.timers
            .schedule(TimerKind::DebouncedAnnounce, now + self.debounce_delay);
    }

    /// External signal that the observable peer set changed.
    /// Returns whether the signal was accepted.
    pub fn on_peer_set_changed(&mut self, now: Timestamp) -> bool {
        if !self.peer_change_gate.try_accept(now) {
            tracing::trace!("peer set change inside sampling window, ignored");
            return false;
        }
        self.timers.schedule(TimerKind::Settle, now + self.settle_delay);
        true
    }

    /// Fire everything due at `now`, earliest first. Returns how many fired.
    pub fn poll<R: Rng>(
        &mut self,
        store: &LocalStore,
        out: &mut Outbound<'_>,
        rng: &mut R,
        now: Timestamp,
    ) -> usize {
        let due = self.timers.take_due(now);
        for kind in &due {
            match kind {
                TimerKind::DebouncedAnnounce | TimerKind::Jitter => {
                    self.announce_self(store, out, now);
                }
                TimerKind::Settle => {
                    let jitter = rng.gen_range(0..=self.max_jitter.as_secs());
                    self.timers
                        .schedule(TimerKind::Jitter, now + Duration::from_secs(jitter));
                }
                TimerKind::Heartbeat => {
                    let idle = self
                        .last_announce_at
                        .map_or(true, |last| now.since(last) >= self.heartbeat_idle);
                    if idle {
                        tracing::debug!("heartbeat forcing announce");
                        self.announce_self(store, out, now);
                    }
                    self.timers
                        .schedule(TimerKind::Heartbeat, now + self.heartbeat_interval);
                }
            }
        }
        out.stats.timers_fired += due.len() as u64;
        due.len()
    }

    /// Send `records` of profile `key` as self-contained chunks
    ///
    /// A chunk holds at most `chunk_size` records and is shrunk further until
    /// it encodes within the datagram cap. A single record that cannot fit is
    /// still handed to the transport, which reports it as too large.
    ///
    /// Stops at the first chunk that fails to build or send; chunks already
    /// sent stay sent.
    pub fn send_character_delta(
        &self,
        out: &mut Outbound<'_>,
        key: &PeerKey,
        records: &[CharacterRecord],
        updated_at: Timestamp,
        route: &Route,
    ) -> bool {
        let mut rest = records;
        while !rest.is_empty() {
            let mut take = rest.len().min(self.chunk_size);
            let mut message = chars_chunk(key, &rest[..take], updated_at);
            while take > 1 && !fits(out, &message) {
                take -= 1;
                message = chars_chunk(key, &rest[..take], updated_at);
            }
            if !out.send(&message, route) {
                tracing::debug!(profile = %key, %route, "character delta aborted");
                return false;
            }
            rest = &rest[take..];
        }
        true
    }
}

fn chars_chunk(key: &PeerKey, records: &[CharacterRecord], updated_at: Timestamp) -> Message {
    Message::CharsUpdate(CharsUpdate {
        owner_key: key.clone(),
        records: records.to_vec(),
        chars_updated_at: updated_at,
    })
}

fn fits(out: &Outbound<'_>, message: &Message) -> bool {
    out.codec
        .encode(message)
        .map_or(false, |bytes| bytes.len() <= MAX_MESSAGE_SIZE)
}
