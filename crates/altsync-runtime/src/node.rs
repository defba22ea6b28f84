//! altsync Node - the single owner of a peer's sync state
//!
//! Ties together the store, the reverse index, the coordinator and the
//! gossip engine behind one plain value. Everything runs to completion on
//! the caller's thread:
//! - `on_message` for every inbound datagram
//! - `poll` whenever a timer may be due (see `next_deadline`)
//! - local edits through `register_owned_identity` / `set_own_alias`

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use altsync_core::{PeerKey, Profile, SyncResult, Timestamp};
use altsync_state::{snapshot, LocalStore, ReverseIndex, Snapshot};
use altsync_time::Clock;
use altsync_transport::{Channel, Transport};
use altsync_wire::{Codec, MessageKind};

use crate::{Coordinator, GossipEngine, NodeConfig, Outbound, Protocol};

#[derive(Clone, Debug, Default)]
pub struct RuntimeStats {
    pub messages_in: u64,
    pub messages_dropped: u64,
    pub messages_out: u64,
    pub bytes_out: u64,
    pub send_failures: u64,
    pub encode_failures: u64,
    pub announces_sent: u64,
    pub digests_sent: u64,
    pub corrections_sent: u64,
    pub timers_fired: u64,
}

/// Something the user should hear about
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    /// A message outgrew the channel cap and was never sent
    MessageTooLarge {
        kind: MessageKind,
        len: usize,
        cap: usize,
    },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::MessageTooLarge { kind, len, cap } => write!(
                f,
                "{} message was {} bytes, over the {} byte limit, and was not sent",
                kind, len, cap
            ),
        }
    }
}

/// altsync Node - one peer
pub struct Node {
    config: NodeConfig,
    codec: Codec,
    store: LocalStore,
    index: ReverseIndex,
    coordinator: Coordinator,
    gossip: GossipEngine,
    transport: Box<dyn Transport>,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    stats: RuntimeStats,
    notices: VecDeque<Notice>,
}

impl Node {
    /// Create a node with an empty store
    pub fn new(
        owner_key: PeerKey,
        config: NodeConfig,
        transport: Box<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_store(LocalStore::new(owner_key), config, transport, clock)
    }

    /// Create a node around an existing store
    pub fn with_store(
        store: LocalStore,
        config: NodeConfig,
        transport: Box<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Node {
            codec: Codec::new(config.codec.clone()),
            coordinator: Coordinator::new(&config),
            gossip: GossipEngine::new(config.max_digest_entries),
            index: ReverseIndex::new(),
            store,
            transport,
            clock,
            rng: StdRng::from_entropy(),
            stats: RuntimeStats::default(),
            notices: VecDeque::new(),
            config,
        }
    }

    /// Create a node from the configured snapshot, or empty if there is none
    pub fn load(
        owner_key: PeerKey,
        config: NodeConfig,
        transport: Box<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> SyncResult<Self> {
        let store = match &config.snapshot_path {
            Some(path) => snapshot::load(path, owner_key)?,
            None => LocalStore::new(owner_key),
        };
        tracing::info!(
            peer = %store.owner_key(),
            remotes = store.remote_count(),
            "node loaded"
        );
        Ok(Self::with_store(store, config, transport, clock))
    }

    /// Deterministic jitter, for tests and simulation
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Arm the heartbeat and queue an initial announce
    pub fn start(&mut self) {
        let now = self.clock.now();
        self.coordinator.start(now);
        self.coordinator.announce_self_debounced(now);
    }

    #[inline]
    pub fn owner_key(&self) -> &PeerKey {
        self.store.owner_key()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn gossip(&self) -> &GossipEngine {
        &self.gossip
    }

    pub fn stats(&self) -> &RuntimeStats {
        &self.stats
    }

    /// Self or replica
    pub fn profile(&self, key: &PeerKey) -> Option<&Profile> {
        self.store.get_profile(key)
    }

    pub fn self_profile(&self) -> Option<&Profile> {
        self.store.self_profile()
    }

    pub fn remote_profiles(&self) -> impl Iterator<Item = &Profile> {
        self.store.all_remote_profiles()
    }

    /// Record a character the local player owns; announces if it was new
    pub fn register_owned_identity(&mut self, name: &str, realm: &str) -> SyncResult<bool> {
        let now = self.clock.now();
        let changed = self.store.register_owned_identity(name, realm, now)?;
        if changed {
            self.index.invalidate();
            self.coordinator.announce_self_debounced(now);
        }
        Ok(changed)
    }

    pub fn set_own_alias(&mut self, alias: &str) -> SyncResult<()> {
        let now = self.clock.now();
        self.store.set_own_alias(alias, now)?;
        self.coordinator.announce_self_debounced(now);
        Ok(())
    }

    /// Who owns the character called `name`
    pub fn owner_of_character(&mut self, name: &str) -> Option<PeerKey> {
        self.index.find(&self.store, name)
    }

    /// Forget knowledge about peers outside `valid_peers`
    pub fn prune_knowledge(&mut self, valid_peers: &HashSet<PeerKey>) -> usize {
        self.store.prune_knowledge(valid_peers)
    }

    /// The observable peer set changed (someone joined or left)
    pub fn on_peer_set_changed(&mut self) -> bool {
        let now = self.clock.now();
        self.coordinator.on_peer_set_changed(now)
    }

    /// Take every pending user notice
    pub fn drain_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    /// Earliest time `poll` has work
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.coordinator.next_deadline()
    }

    /// Announce immediately, bypassing debounce
    pub fn announce_now(&mut self) -> bool {
        let now = self.clock.now();
        let mut out = Outbound {
            transport: self.transport.as_ref(),
            codec: &self.codec,
            stats: &mut self.stats,
            notices: &mut self.notices,
        };
        self.coordinator.announce_self(&self.store, &mut out, now)
    }

    /// Fire due timers. Returns how many fired.
    pub fn poll(&mut self) -> usize {
        let now = self.clock.now();
        let mut out = Outbound {
            transport: self.transport.as_ref(),
            codec: &self.codec,
            stats: &mut self.stats,
            notices: &mut self.notices,
        };
        self.coordinator
            .poll(&self.store, &mut out, &mut self.rng, now)
    }

    /// Handle one inbound message from `sender`
    ///
    /// Anything undecodable or invalid is dropped with a debug log.
    pub fn on_message(&mut self, bytes: &[u8], channel: Channel, sender: &str) {
        self.stats.messages_in += 1;

        let sender = match PeerKey::parse(sender) {
            Ok(key) => key,
            Err(e) => {
                self.stats.messages_dropped += 1;
                tracing::debug!(%channel, "dropped message, bad sender: {}", e);
                return;
            }
        };
        if self.store.is_self(&sender) {
            // Our own broadcast echoed back
            return;
        }

        let message = match self.codec.parse(bytes) {
            Ok(message) => message,
            Err(e) => {
                self.stats.messages_dropped += 1;
                tracing::debug!(%sender, %channel, "dropped undecodable message: {}", e);
                return;
            }
        };
        let kind = message.kind();

        let mut protocol = Protocol {
            store: &mut self.store,
            index: &mut self.index,
            coordinator: &self.coordinator,
            gossip: &mut self.gossip,
            out: Outbound {
                transport: self.transport.as_ref(),
                codec: &self.codec,
                stats: &mut self.stats,
                notices: &mut self.notices,
            },
        };
        if let Err(e) = protocol.handle(message, &sender) {
            self.stats.messages_dropped += 1;
            tracing::debug!(%sender, %kind, "dropped invalid message: {}", e);
        }
    }

    /// Capture the persistent state
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(&self.store)
    }

    /// Write the snapshot to the configured path, if any
    pub fn save(&self) -> SyncResult<()> {
        match &self.config.snapshot_path {
            Some(path) => self.save_to(path),
            None => Ok(()),
        }
    }

    pub fn save_to(&self, path: &Path) -> SyncResult<()> {
        snapshot::save(&self.store, path)?;
        tracing::debug!(path = %path.display(), revision = self.store.revision(), "saved snapshot");
        Ok(())
    }
}
