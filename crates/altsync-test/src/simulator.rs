//! Swarm simulator for multi-peer altsync testing
//!
//! Every peer is a real `Node` with an in-memory transport. All peers share
//! one manual clock. Each step the swarm collects what every node sent,
//! fans broadcasts out to the group, pushes everything through a chaos
//! network and hands the survivors to the receivers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use altsync_core::{PeerKey, Profile, Timestamp};
use altsync_runtime::{Node, NodeConfig};
use altsync_time::ManualClock;
use altsync_transport::{Channel, MemoryTransport};
use altsync_wire::{parse, MessageKind};

use crate::chaos::{ChaosConfig, ChaosNetwork, ChaosStats};

/// One message on its way between two peers
#[derive(Clone, Debug)]
pub struct Datagram {
    pub from: PeerKey,
    pub to: PeerKey,
    pub channel: Channel,
    pub bytes: Vec<u8>,
}

/// Drops the next datagram matching all set fields
#[derive(Clone, Debug)]
pub struct DropRule {
    pub from: PeerKey,
    pub to: PeerKey,
    pub kind: MessageKind,
    /// How many more matches to drop
    pub remaining: usize,
}

/// A simulated peer
pub struct SimPeer {
    pub key: PeerKey,
    pub node: Node,
    transport: MemoryTransport,
}

/// Swarm configuration
#[derive(Clone, Debug)]
pub struct SwarmConfig {
    pub node: NodeConfig,
    pub chaos: ChaosConfig,
    pub seed: u64,
    pub start: Timestamp,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        SwarmConfig {
            node: NodeConfig::fast(),
            chaos: ChaosConfig::perfect(),
            seed: 42,
            start: Timestamp(1_700_000_000),
        }
    }
}

impl SwarmConfig {
    pub fn with_chaos(mut self, chaos: ChaosConfig) -> Self {
        self.chaos = chaos;
        self
    }
}

/// Multi-peer simulator
pub struct Swarm {
    config: SwarmConfig,
    clock: ManualClock,
    peers: Vec<SimPeer>,
    network: ChaosNetwork<Datagram>,
    /// Directed pairs that cannot reach each other
    blocked: HashSet<(PeerKey, PeerKey)>,
    drop_rules: Vec<DropRule>,
    delivered: u64,
    /// Deliveries per (from, to, kind)
    delivered_kinds: HashMap<(PeerKey, PeerKey, MessageKind), u64>,
}

impl Swarm {
    pub fn new(config: SwarmConfig) -> Self {
        Swarm {
            clock: ManualClock::new(config.start),
            network: ChaosNetwork::new(config.chaos.clone(), config.seed),
            config,
            peers: Vec::new(),
            blocked: HashSet::new(),
            drop_rules: Vec::new(),
            delivered: 0,
            delivered_kinds: HashMap::new(),
        }
    }

    /// Add a started peer
    pub fn add_peer(&mut self, key: &str) -> PeerKey {
        let key = PeerKey::new_unchecked(key);
        let transport = MemoryTransport::new();
        let seed = self.config.seed.wrapping_add(self.peers.len() as u64);
        let mut node = Node::new(
            key.clone(),
            self.config.node.clone(),
            Box::new(transport.clone()),
            Arc::new(self.clock.clone()),
        )
        .with_rng_seed(seed);
        node.start();

        self.peers.push(SimPeer {
            key: key.clone(),
            node,
            transport,
        });
        key
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    pub fn now(&self) -> Timestamp {
        use altsync_time::Clock;
        self.clock.now()
    }

    pub fn keys(&self) -> Vec<PeerKey> {
        self.peers.iter().map(|p| p.key.clone()).collect()
    }

    pub fn node(&self, key: &PeerKey) -> &Node {
        &self.peer(key).node
    }

    pub fn node_mut(&mut self, key: &PeerKey) -> &mut Node {
        let index = self.index_of(key);
        &mut self.peers[index].node
    }

    fn peer(&self, key: &PeerKey) -> &SimPeer {
        &self.peers[self.index_of(key)]
    }

    fn index_of(&self, key: &PeerKey) -> usize {
        self.peers
            .iter()
            .position(|p| p.key == *key)
            .unwrap_or_else(|| panic!("no peer {}", key))
    }

    /// Cut both directions between `a` and `b`
    pub fn block(&mut self, a: &PeerKey, b: &PeerKey) {
        self.blocked.insert((a.clone(), b.clone()));
        self.blocked.insert((b.clone(), a.clone()));
    }

    pub fn unblock(&mut self, a: &PeerKey, b: &PeerKey) {
        self.blocked.remove(&(a.clone(), b.clone()));
        self.blocked.remove(&(b.clone(), a.clone()));
    }

    /// Lose the next `count` messages of `kind` from `from` to `to`
    pub fn drop_next(&mut self, from: &PeerKey, to: &PeerKey, kind: MessageKind, count: usize) {
        self.drop_rules.push(DropRule {
            from: from.clone(),
            to: to.clone(),
            kind,
            remaining: count,
        });
    }

    /// Signal a peer set change to everyone
    pub fn peer_set_changed_all(&mut self) {
        for peer in &mut self.peers {
            peer.node.on_peer_set_changed();
        }
    }

    /// Advance time by `dt`, fire timers and deliver until quiet
    pub fn step(&mut self, dt: Duration) {
        self.clock.advance(dt);
        for peer in &mut self.peers {
            peer.node.poll();
        }
        self.collect_outbound();
        let mut batch = self.network.tick(dt);

        // Zero-latency replies land in the same step
        let mut rounds = 0;
        while !batch.is_empty() && rounds < 64 {
            for datagram in batch {
                self.deliver(datagram);
            }
            self.collect_outbound();
            batch = self.network.drain_due();
            rounds += 1;
        }
    }

    /// Step in `dt` increments for `total`
    pub fn run_for(&mut self, total: Duration, dt: Duration) {
        let steps = total.as_secs() / dt.as_secs().max(1);
        for _ in 0..steps {
            self.step(dt);
        }
    }

    fn collect_outbound(&mut self) {
        let keys = self.keys();
        let mut outgoing = Vec::new();
        for peer in &self.peers {
            for (bytes, route) in peer.transport.take_sent() {
                match route.channel {
                    Channel::Broadcast => {
                        for to in keys.iter().filter(|k| **k != peer.key) {
                            outgoing.push(Datagram {
                                from: peer.key.clone(),
                                to: to.clone(),
                                channel: Channel::Broadcast,
                                bytes: bytes.clone(),
                            });
                        }
                    }
                    Channel::Direct => {
                        let Some(target) = route.target else { continue };
                        outgoing.push(Datagram {
                            from: peer.key.clone(),
                            to: PeerKey::new_unchecked(target),
                            channel: Channel::Direct,
                            bytes,
                        });
                    }
                }
            }
        }

        for datagram in outgoing {
            if self.blocked.contains(&(datagram.from.clone(), datagram.to.clone())) {
                continue;
            }
            if self.should_drop(&datagram) {
                continue;
            }
            self.network.send(datagram);
        }
    }

    fn should_drop(&mut self, datagram: &Datagram) -> bool {
        let Ok(message) = parse(&datagram.bytes) else {
            return false;
        };
        let kind = message.kind();
        let rule = self.drop_rules.iter_mut().find(|r| {
            r.remaining > 0 && r.from == datagram.from && r.to == datagram.to && r.kind == kind
        });
        match rule {
            Some(rule) => {
                rule.remaining -= 1;
                true
            }
            None => false,
        }
    }

    fn deliver(&mut self, datagram: Datagram) {
        let Some(peer) = self.peers.iter_mut().find(|p| p.key == datagram.to) else {
            return;
        };
        peer.node
            .on_message(&datagram.bytes, datagram.channel, datagram.from.as_str());
        self.delivered += 1;
        if let Ok(message) = parse(&datagram.bytes) {
            *self
                .delivered_kinds
                .entry((datagram.from, datagram.to, message.kind()))
                .or_insert(0) += 1;
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Messages of `kind` that reached `to` from `from`
    pub fn delivered_of(&self, from: &PeerKey, to: &PeerKey, kind: MessageKind) -> u64 {
        self.delivered_kinds
            .get(&(from.clone(), to.clone(), kind))
            .copied()
            .unwrap_or(0)
    }

    pub fn network_stats(&self) -> &ChaosStats {
        self.network.stats()
    }

    /// `observer`'s view of `owner`
    pub fn view(&self, observer: &PeerKey, owner: &PeerKey) -> Option<&Profile> {
        self.node(observer).profile(owner)
    }

    /// Does every peer hold an exact replica of every other self profile?
    pub fn converged(&self) -> bool {
        self.peers.iter().all(|owner| {
            let Some(truth) = owner.node.self_profile() else {
                return true;
            };
            self.peers
                .iter()
                .filter(|p| p.key != owner.key)
                .all(|p| p.node.profile(&owner.key) == Some(truth))
        })
    }
}
