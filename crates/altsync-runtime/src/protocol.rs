//! Protocol - inbound message handling
//!
//! There is no per-peer session state. Every message is validated, then
//! handled against the current store contents:
//! - Announce: adopt alias, pull missing characters, offer a digest back
//! - RequestChars: answer with our own characters after a timestamp
//! - AliasUpdate / CharsUpdate: monotonic merge into the replica
//! - GossipDigest: pull what the sender knows better, correct what it
//!   knows worse
//! - GossipRequest: relay a profile we hold
//!
//! Replies always go straight back to the sender.

use altsync_core::{PeerKey, ProfileSummary, Timestamp, ValidationError};
use altsync_state::{LocalStore, ReverseIndex};
use altsync_transport::Route;
use altsync_wire::{
    AliasUpdate, Announce, CharsUpdate, GossipDigest, GossipRequest, Message, RequestChars,
};

use crate::{Coordinator, GossipEngine, Outbound};

/// Handler context for one inbound message
pub struct Protocol<'a> {
    pub store: &'a mut LocalStore,
    pub index: &'a mut ReverseIndex,
    pub coordinator: &'a Coordinator,
    pub gossip: &'a mut GossipEngine,
    pub out: Outbound<'a>,
}

/// `after` for a pull: our own stamp, or everything when the counts
/// disagree at the same stamp (chunks were lost somewhere)
fn pull_after(local: &ProfileSummary, remote_cu: Timestamp, remote_count: u32) -> Timestamp {
    if remote_cu == local.chars_updated_at && remote_count > local.char_count {
        Timestamp::ZERO
    } else {
        local.chars_updated_at
    }
}

impl Protocol<'_> {
    /// Validate and dispatch one message from `sender`
    pub fn handle(&mut self, message: Message, sender: &PeerKey) -> Result<(), ValidationError> {
        message.validate()?;

        match message {
            Message::Announce(m) => self.on_announce(m, sender),
            Message::RequestChars(m) => self.on_request_chars(m, sender),
            Message::AliasUpdate(m) => self.on_alias_update(m),
            Message::CharsUpdate(m) => self.on_chars_update(m),
            Message::GossipDigest(m) => self.on_gossip_digest(m, sender),
            Message::GossipRequest(m) => self.on_gossip_request(m, sender),
        }
    }

    fn reject_self(&self, owner: &PeerKey) -> Result<(), ValidationError> {
        if self.store.is_self(owner) {
            Err(ValidationError::SelfOwned)
        } else {
            Ok(())
        }
    }

    fn request_chars(&mut self, owner: &PeerKey, after: Timestamp, sender: &PeerKey) {
        let message = Message::RequestChars(RequestChars {
            owner_key: owner.clone(),
            after,
        });
        self.out.send(&message, &Route::direct(sender.as_str()));
    }

    fn on_announce(&mut self, m: Announce, sender: &PeerKey) -> Result<(), ValidationError> {
        self.reject_self(&m.owner_key)?;

        match self.store.summary(&m.owner_key) {
            None => {
                tracing::debug!(peer = %m.owner_key, "discovered new peer");
                self.store
                    .update_remote_alias(&m.owner_key, &m.alias, m.alias_updated_at);
                self.request_chars(&m.owner_key, Timestamp::ZERO, sender);
            }
            Some(local) => {
                if m.alias_updated_at > local.alias_updated_at {
                    self.store
                        .update_remote_alias(&m.owner_key, &m.alias, m.alias_updated_at);
                }
                let lost_chunks = m.chars_updated_at == local.chars_updated_at
                    && m.char_count > local.char_count;
                if m.chars_updated_at > local.chars_updated_at || lost_chunks {
                    let after = pull_after(&local, m.chars_updated_at, m.char_count);
                    self.request_chars(&m.owner_key, after, sender);
                }
            }
        }

        let route = Route::direct(sender.as_str());
        self.gossip
            .send_digest(self.store, &mut self.out, &m.owner_key, &route);
        Ok(())
    }

    fn on_request_chars(&mut self, m: RequestChars, sender: &PeerKey) -> Result<(), ValidationError> {
        if !self.store.is_self(&m.owner_key) {
            tracing::trace!(profile = %m.owner_key, "request for someone else's characters");
            return Ok(());
        }
        let Some(me) = self.store.self_profile() else {
            return Ok(());
        };

        let records = LocalStore::characters_added_after(me, m.after);
        if records.is_empty() {
            return Ok(());
        }
        let route = Route::direct(sender.as_str());
        self.coordinator.send_character_delta(
            &mut self.out,
            &m.owner_key,
            &records,
            me.chars_updated_at(),
            &route,
        );
        Ok(())
    }

    fn on_alias_update(&mut self, m: AliasUpdate) -> Result<(), ValidationError> {
        self.reject_self(&m.owner_key)?;
        self.store
            .update_remote_alias(&m.owner_key, &m.alias, m.alias_updated_at);
        Ok(())
    }

    fn on_chars_update(&mut self, m: CharsUpdate) -> Result<(), ValidationError> {
        self.reject_self(&m.owner_key)?;
        if self.store.add_remote_characters(&m.owner_key, &m.records) {
            self.index.invalidate();
        }
        Ok(())
    }

    fn on_gossip_digest(&mut self, m: GossipDigest, sender: &PeerKey) -> Result<(), ValidationError> {
        self.reject_self(&m.from)?;
        if m.from != *sender {
            return Err(ValidationError::MalformedPeerKey(m.from.to_string()));
        }

        for entry in &m.entries {
            if self.store.is_self(&entry.owner_key) || entry.owner_key == m.from {
                continue;
            }
            self.reconcile_entry(&m.from, entry);
        }
        Ok(())
    }

    fn reconcile_entry(&mut self, from: &PeerKey, entry: &ProfileSummary) {
        let route = Route::direct(from.as_str());

        let Some(local) = self.store.summary(&entry.owner_key) else {
            self.gossip_request(from, &entry.owner_key, Timestamp::ZERO, &route);
            self.record_knowledge(from, entry);
            return;
        };

        let lost_chunks = entry.chars_updated_at == local.chars_updated_at
            && entry.char_count > local.char_count;
        let theirs_fresher = entry.alias_updated_at > local.alias_updated_at
            || entry.chars_updated_at > local.chars_updated_at
            || lost_chunks;
        if theirs_fresher {
            let after = pull_after(&local, entry.chars_updated_at, entry.char_count);
            self.gossip_request(from, &entry.owner_key, after, &route);
        }

        // What the sender holds now, unless a correction raises it below
        self.record_knowledge(from, entry);

        let ours_fresher = local.alias_updated_at > entry.alias_updated_at
            || local.chars_updated_at > entry.chars_updated_at
            || (local.chars_updated_at == entry.chars_updated_at
                && local.char_count > entry.char_count);
        if ours_fresher {
            self.gossip
                .correct_stale(self.store, &mut self.out, self.coordinator, from, entry);
        }
    }

    fn record_knowledge(&mut self, peer: &PeerKey, entry: &ProfileSummary) {
        self.store.update_knowledge(
            peer,
            &entry.owner_key,
            entry.alias_updated_at,
            entry.chars_updated_at,
            entry.char_count,
        );
    }

    fn gossip_request(&mut self, from: &PeerKey, owner: &PeerKey, after: Timestamp, route: &Route) {
        let message = Message::GossipRequest(GossipRequest {
            from: self.store.self_key().clone(),
            owner_key: owner.clone(),
            after,
        });
        tracing::trace!(peer = %from, profile = %owner, %after, "gossip request");
        self.out.send(&message, route);
    }

    fn on_gossip_request(&mut self, m: GossipRequest, sender: &PeerKey) -> Result<(), ValidationError> {
        if m.from != *sender {
            return Err(ValidationError::MalformedPeerKey(m.from.to_string()));
        }

        let route = Route::direct(sender.as_str());
        let sent = self.gossip.send_profile(
            self.store,
            &mut self.out,
            self.coordinator,
            &route,
            &m.owner_key,
            m.after,
        );
        if sent {
            if let Some(summary) = self.store.summary(&m.owner_key) {
                self.record_knowledge(&m.from, &summary);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use altsync_core::CharacterRecord;
    use altsync_transport::MemoryTransport;
    use altsync_wire::{parse, Codec};

    use crate::{Notice, NodeConfig, RuntimeStats};

    fn key(s: &str) -> PeerKey {
        PeerKey::parse(s).unwrap()
    }

    struct Peer {
        store: LocalStore,
        index: ReverseIndex,
        coordinator: Coordinator,
        gossip: GossipEngine,
        transport: MemoryTransport,
        codec: Codec,
        stats: RuntimeStats,
        notices: VecDeque<Notice>,
    }

    impl Peer {
        fn new(owner: &str) -> Self {
            let config = NodeConfig::default();
            Peer {
                store: LocalStore::new(key(owner)),
                index: ReverseIndex::new(),
                coordinator: Coordinator::new(&config),
                gossip: GossipEngine::new(config.max_digest_entries),
                transport: MemoryTransport::new(),
                codec: Codec::default(),
                stats: RuntimeStats::default(),
                notices: VecDeque::new(),
            }
        }

        fn handle(&mut self, message: Message, sender: &str) -> Result<(), ValidationError> {
            let mut protocol = Protocol {
                store: &mut self.store,
                index: &mut self.index,
                coordinator: &self.coordinator,
                gossip: &mut self.gossip,
                out: Outbound {
                    transport: &self.transport,
                    codec: &self.codec,
                    stats: &mut self.stats,
                    notices: &mut self.notices,
                },
            };
            protocol.handle(message, &key(sender))
        }

        fn sent(&self) -> Vec<(Message, Route)> {
            self.transport
                .take_sent()
                .into_iter()
                .map(|(bytes, route)| (parse(&bytes).unwrap(), route))
                .collect()
        }
    }

    fn announce(owner: &str, alias: &str, au: u64, cu: u64, count: u32) -> Message {
        Message::Announce(Announce {
            owner_key: key(owner),
            alias: alias.into(),
            alias_updated_at: Timestamp(au),
            chars_updated_at: Timestamp(cu),
            char_count: count,
        })
    }

    fn summary(owner: &str, au: u64, cu: u64, count: u32) -> ProfileSummary {
        ProfileSummary {
            owner_key: key(owner),
            alias_updated_at: Timestamp(au),
            chars_updated_at: Timestamp(cu),
            char_count: count,
        }
    }

    #[test]
    fn test_announce_from_unknown_peer() {
        let mut b = Peer::new("B#2");
        b.handle(announce("A#1", "Alice", 10, 20, 2), "A#1").unwrap();

        assert_eq!(b.store.get_profile(&key("A#1")).unwrap().alias(), "Alice");
        let sent = b.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, Route::direct("A#1"));
        assert_eq!(
            sent[0].0,
            Message::RequestChars(RequestChars {
                owner_key: key("A#1"),
                after: Timestamp::ZERO
            })
        );
    }

    #[test]
    fn test_announce_requests_delta_or_full() {
        let mut b = Peer::new("B#2");
        let a = key("A#1");
        b.store.update_remote_alias(&a, "Alice", Timestamp(10));
        b.store
            .add_remote_characters(&a, &[CharacterRecord::new("x", "R", Timestamp(20))]);

        // Newer chars: delta after our stamp
        b.handle(announce("A#1", "Alice", 10, 30, 2), "A#1").unwrap();
        assert!(matches!(
            &b.sent()[0].0,
            Message::RequestChars(r) if r.after == Timestamp(20)
        ));

        // Same stamp, more characters: lost chunks, full resync
        b.handle(announce("A#1", "Alice", 10, 20, 3), "A#1").unwrap();
        assert!(matches!(
            &b.sent()[0].0,
            Message::RequestChars(r) if r.after == Timestamp::ZERO
        ));

        // Nothing new: nothing sent
        b.handle(announce("A#1", "Alice", 10, 20, 1), "A#1").unwrap();
        assert!(b.sent().is_empty());
    }

    #[test]
    fn test_announce_adopts_newer_alias_only() {
        let mut b = Peer::new("B#2");
        let a = key("A#1");
        b.store.update_remote_alias(&a, "Alice", Timestamp(10));

        b.handle(announce("A#1", "Old", 5, 0, 0), "A#1").unwrap();
        assert_eq!(b.store.get_profile(&a).unwrap().alias(), "Alice");

        b.handle(announce("A#1", "Ally", 11, 0, 0), "A#1").unwrap();
        assert_eq!(b.store.get_profile(&a).unwrap().alias(), "Ally");
    }

    #[test]
    fn test_announce_sends_digest_back() {
        let mut b = Peer::new("B#2");
        b.store.update_remote_alias(&key("C#3"), "Carol", Timestamp(7));

        b.handle(announce("A#1", "Alice", 1, 0, 0), "A#1").unwrap();
        let digest = b
            .sent()
            .into_iter()
            .find_map(|(m, _)| match m {
                Message::GossipDigest(d) => Some(d),
                _ => None,
            })
            .unwrap();
        assert_eq!(digest.from, key("B#2"));
        assert_eq!(digest.entries.len(), 1);
        assert_eq!(digest.entries[0].owner_key, key("C#3"));
    }

    #[test]
    fn test_self_claims_rejected() {
        let mut me = Peer::new("Me#1");
        me.store
            .register_owned_identity("Hero", "R", Timestamp(1))
            .unwrap();
        let before = me.store.self_profile().cloned();

        let forged_alias = Message::AliasUpdate(AliasUpdate {
            owner_key: key("Me#1"),
            alias: "Hacked".into(),
            alias_updated_at: Timestamp(999),
        });
        assert_eq!(me.handle(forged_alias, "X#9"), Err(ValidationError::SelfOwned));

        let forged_chars = Message::CharsUpdate(CharsUpdate {
            owner_key: key("Me#1"),
            records: vec![CharacterRecord::new("Evil", "R", Timestamp(999))],
            chars_updated_at: Timestamp(999),
        });
        assert_eq!(me.handle(forged_chars, "X#9"), Err(ValidationError::SelfOwned));
        assert_eq!(
            me.handle(announce("Me#1", "Hacked", 999, 0, 0), "X#9"),
            Err(ValidationError::SelfOwned)
        );

        assert_eq!(me.store.self_profile().cloned(), before);
        assert!(me.sent().is_empty());
    }

    #[test]
    fn test_request_chars_replies_from_self_only() {
        let mut a = Peer::new("A#1");
        for (i, name) in ["one", "two", "three"].iter().enumerate() {
            a.store
                .register_owned_identity(name, "R", Timestamp(10 * (i as u64 + 1)))
                .unwrap();
        }

        let request = |owner: &str, after: u64| {
            Message::RequestChars(RequestChars {
                owner_key: key(owner),
                after: Timestamp(after),
            })
        };

        a.handle(request("A#1", 10), "B#2").unwrap();
        let sent = a.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0].0 {
            Message::CharsUpdate(m) => {
                let names: Vec<_> = m.records.iter().map(|r| r.name.as_str()).collect();
                assert_eq!(names, ["two", "three"]);
                assert_eq!(m.chars_updated_at, Timestamp(30));
            }
            other => panic!("unexpected {:?}", other),
        }

        a.handle(request("Z#26", 0), "B#2").unwrap();
        a.handle(request("A#1", 30), "B#2").unwrap();
        assert!(a.sent().is_empty());
    }

    #[test]
    fn test_chars_update_invalidates_index() {
        let mut b = Peer::new("B#2");
        assert_eq!(b.index.find(&b.store, "Thrall"), None);

        b.handle(
            Message::CharsUpdate(CharsUpdate {
                owner_key: key("A#1"),
                records: vec![CharacterRecord::new("Thrall", "R", Timestamp(5))],
                chars_updated_at: Timestamp(5),
            }),
            "A#1",
        )
        .unwrap();
        assert!(b.index.is_dirty());
        assert_eq!(b.index.find(&b.store, "Thrall"), Some(key("A#1")));
    }

    #[test]
    fn test_digest_equal_is_noop_newer_requests() {
        let mut c = Peer::new("C#3");
        let a = key("A#1");
        c.store.update_remote_alias(&a, "OldName", Timestamp(500));

        let digest = |au| {
            Message::GossipDigest(GossipDigest {
                from: key("D#4"),
                entries: vec![summary("A#1", au, 0, 0)],
            })
        };

        c.handle(digest(500), "D#4").unwrap();
        assert!(c.sent().is_empty());

        c.handle(digest(900), "D#4").unwrap();
        let sent = c.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].0,
            Message::GossipRequest(GossipRequest {
                from: key("C#3"),
                owner_key: a.clone(),
                after: Timestamp::ZERO,
            })
        );
        assert_eq!(
            c.store.knowledge_of(&key("D#4"), &a).unwrap().alias_updated_at_known,
            Timestamp(900)
        );
    }

    #[test]
    fn test_digest_correction_once_per_session() {
        let mut c = Peer::new("C#3");
        let a = key("A#1");
        c.store.update_remote_alias(&a, "NewName", Timestamp(900));

        let stale = Message::GossipDigest(GossipDigest {
            from: key("D#4"),
            entries: vec![summary("A#1", 500, 0, 0)],
        });

        c.handle(stale.clone(), "D#4").unwrap();
        let sent = c.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0].0, Message::AliasUpdate(m) if m.alias == "NewName"));

        c.handle(stale, "D#4").unwrap();
        assert!(c.sent().is_empty());
    }

    #[test]
    fn test_digest_unknown_and_skipped_entries() {
        let mut c = Peer::new("C#3");
        let digest = Message::GossipDigest(GossipDigest {
            from: key("D#4"),
            entries: vec![
                summary("C#3", 1, 1, 1),
                summary("D#4", 1, 1, 1),
                summary("E#5", 3, 4, 2),
            ],
        });
        c.handle(digest, "D#4").unwrap();

        let sent = c.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            &sent[0].0,
            Message::GossipRequest(r) if r.owner_key == key("E#5") && r.after == Timestamp::ZERO
        ));
    }

    #[test]
    fn test_digest_from_mismatch_rejected() {
        let mut c = Peer::new("C#3");
        let digest = Message::GossipDigest(GossipDigest {
            from: key("D#4"),
            entries: vec![summary("E#5", 3, 4, 2)],
        });
        assert!(c.handle(digest, "X#9").is_err());
        assert!(c.sent().is_empty());
    }

    #[test]
    fn test_gossip_request_relays_replica() {
        let mut b = Peer::new("B#2");
        let a = key("A#1");
        b.store.update_remote_alias(&a, "Alice", Timestamp(10));
        b.store.add_remote_characters(
            &a,
            &[
                CharacterRecord::new("x", "R", Timestamp(20)),
                CharacterRecord::new("y", "R", Timestamp(30)),
            ],
        );

        b.handle(
            Message::GossipRequest(GossipRequest {
                from: key("C#3"),
                owner_key: a.clone(),
                after: Timestamp::ZERO,
            }),
            "C#3",
        )
        .unwrap();

        let sent = b.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(_, r)| *r == Route::direct("C#3")));
        assert!(matches!(&sent[0].0, Message::AliasUpdate(_)));
        assert!(matches!(&sent[1].0, Message::CharsUpdate(m) if m.records.len() == 2));
        assert_eq!(
            b.store.knowledge_of(&key("C#3"), &a).unwrap().char_count_known,
            2
        );
    }
}
