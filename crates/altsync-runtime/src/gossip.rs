//! Gossip engine - transitive propagation of third-party profiles
//!
//! A digest tells one peer what we know about everybody else, limited to
//! what we believe that peer has not seen yet and to what fits in a single
//! message. The peer pulls what it lacks with gossip requests.
//!
//! Corrections push fresher data back at a peer that advertised something
//! stale. They are sent at most once per (peer, profile) per session, which
//! is what stops two peers with diverging views from bouncing corrections
//! forever. That set lives only in memory; the persisted knowledge hints are
//! a bandwidth heuristic and never decide correctness.

use std::collections::HashSet;

use altsync_core::{KnowledgeHint, PeerKey, Profile, ProfileSummary, Timestamp};
use altsync_state::LocalStore;
use altsync_transport::Route;
use altsync_wire::{AliasUpdate, Codec, GossipDigest, Message, MAX_MESSAGE_SIZE};

use crate::{Coordinator, Outbound};

/// Digest builder and third-party relay
#[derive(Debug)]
pub struct GossipEngine {
    max_digest_entries: usize,
    /// (peer, profile) pairs already corrected this session
    corrected: HashSet<(PeerKey, PeerKey)>,
}

impl GossipEngine {
    pub fn new(max_digest_entries: usize) -> Self {
        GossipEngine {
            max_digest_entries,
            corrected: HashSet::new(),
        }
    }

    pub fn has_corrected(&self, peer: &PeerKey, profile: &PeerKey) -> bool {
        self.corrected.contains(&(peer.clone(), profile.clone()))
    }

    pub fn corrections_sent(&self) -> usize {
        self.corrected.len()
    }

    /// Summaries worth offering to `target`, freshest first, sized to fit
    /// one message
    pub fn build_digest(
        &self,
        store: &LocalStore,
        codec: &Codec,
        target: &PeerKey,
    ) -> Vec<ProfileSummary> {
        let known = store.knowledge(target);

        let mut candidates: Vec<ProfileSummary> = store
            .all_remote_profiles()
            .filter(|p| p.owner_key() != target && !store.is_self(p.owner_key()))
            .map(Profile::summary)
            .filter(|summary| {
                known
                    .and_then(|k| k.get(&summary.owner_key))
                    .map_or(true, |hint| summary.is_ahead_of(hint))
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.freshness()
                .cmp(&a.freshness())
                .then_with(|| a.owner_key.cmp(&b.owner_key))
        });
        candidates.truncate(self.max_digest_entries);

        // Shrink until the whole message fits
        let mut digest = GossipDigest {
            from: store.self_key().clone(),
            entries: candidates,
        };
        while !digest.entries.is_empty() {
            let fits = codec
                .encode(&Message::GossipDigest(digest.clone()))
                .map_or(false, |bytes| bytes.len() <= MAX_MESSAGE_SIZE);
            if fits {
                break;
            }
            digest.entries.pop();
        }
        digest.entries
    }

    /// Offer a digest to `target`. Returns whether one was sent.
    ///
    /// Knowledge for every included entry is updated as soon as the host
    /// accepts the message; delivery itself is never confirmed.
    pub fn send_digest(
        &self,
        store: &mut LocalStore,
        out: &mut Outbound<'_>,
        target: &PeerKey,
        route: &Route,
    ) -> bool {
        let entries = self.build_digest(store, out.codec, target);
        if entries.is_empty() {
            return false;
        }

        let message = Message::GossipDigest(GossipDigest {
            from: store.self_key().clone(),
            entries,
        });
        if !out.send(&message, route) {
            return false;
        }
        out.stats.digests_sent += 1;

        if let Message::GossipDigest(digest) = message {
            for entry in &digest.entries {
                store.update_knowledge(
                    target,
                    &entry.owner_key,
                    entry.alias_updated_at,
                    entry.chars_updated_at,
                    entry.char_count,
                );
            }
        }
        true
    }

    /// Relay profile `key` (self or replica): alias, then characters added
    /// after `after` in chunks
    pub fn send_profile(
        &self,
        store: &LocalStore,
        out: &mut Outbound<'_>,
        coordinator: &Coordinator,
        route: &Route,
        key: &PeerKey,
        after: Timestamp,
    ) -> bool {
        let Some(profile) = store.get_profile(key) else {
            tracing::debug!(profile = %key, "asked to relay an unknown profile");
            return false;
        };

        if !send_alias(out, profile, route) {
            return false;
        }
        let records = LocalStore::characters_added_after(profile, after);
        coordinator.send_character_delta(out, key, &records, profile.chars_updated_at(), route)
    }

    /// Push our fresher view of `entry.owner_key` back at `peer`, at most
    /// once per session for the pair. Returns whether a correction went out.
    ///
    /// On success the knowledge for `peer` is raised to what it now has.
    pub fn correct_stale(
        &mut self,
        store: &mut LocalStore,
        out: &mut Outbound<'_>,
        coordinator: &Coordinator,
        peer: &PeerKey,
        entry: &ProfileSummary,
    ) -> bool {
        let pair = (peer.clone(), entry.owner_key.clone());
        if self.corrected.contains(&pair) {
            tracing::trace!(%peer, profile = %entry.owner_key, "already corrected this session");
            return false;
        }
        let Some(local) = store.summary(&entry.owner_key) else {
            return false;
        };
        let route = Route::direct(peer.as_str());

        let mut sent = false;
        if local.alias_updated_at > entry.alias_updated_at {
            sent |= self.correct_stale_alias(store, out, &route, &entry.owner_key);
        }
        if local.chars_updated_at > entry.chars_updated_at {
            let after = entry.chars_updated_at;
            sent |= self.correct_stale_chars(store, out, coordinator, &route, &entry.owner_key, after);
        } else if local.chars_updated_at == entry.chars_updated_at
            && local.char_count > entry.char_count
        {
            // Same stamp, fewer records: the peer lost chunks, resend all
            let after = Timestamp::ZERO;
            sent |= self.correct_stale_chars(store, out, coordinator, &route, &entry.owner_key, after);
        }

        if sent {
            self.corrected.insert(pair);
            out.stats.corrections_sent += 1;
            let known = KnowledgeHint::new(
                local.alias_updated_at.max(entry.alias_updated_at),
                local.chars_updated_at.max(entry.chars_updated_at),
                local.char_count.max(entry.char_count),
            );
            store.update_knowledge(
                peer,
                &entry.owner_key,
                known.alias_updated_at_known,
                known.chars_updated_at_known,
                known.char_count_known,
            );
            tracing::debug!(%peer, profile = %entry.owner_key, "sent correction");
        }
        sent
    }

    fn correct_stale_alias(
        &self,
        store: &LocalStore,
        out: &mut Outbound<'_>,
        route: &Route,
        key: &PeerKey,
    ) -> bool {
        store
            .get_profile(key)
            .map_or(false, |profile| send_alias(out, profile, route))
    }

    fn correct_stale_chars(
        &self,
        store: &LocalStore,
        out: &mut Outbound<'_>,
        coordinator: &Coordinator,
        route: &Route,
        key: &PeerKey,
        after: Timestamp,
    ) -> bool {
        let Some(profile) = store.get_profile(key) else {
            return false;
        };
        let records = LocalStore::characters_added_after(profile, after);
        !records.is_empty()
            && coordinator.send_character_delta(out, key, &records, profile.chars_updated_at(), route)
    }
}

fn send_alias(out: &mut Outbound<'_>, profile: &Profile, route: &Route) -> bool {
    let message = Message::AliasUpdate(AliasUpdate {
        owner_key: profile.owner_key().clone(),
        alias: profile.alias().to_string(),
        alias_updated_at: profile.alias_updated_at(),
    });
    out.send(&message, route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use altsync_core::CharacterRecord;
    use altsync_transport::MemoryTransport;
    use altsync_wire::parse;

    use crate::{NodeConfig, RuntimeStats};

    fn key(s: &str) -> PeerKey {
        PeerKey::parse(s).unwrap()
    }

    fn store_with_remotes(n: usize) -> LocalStore {
        let mut store = LocalStore::new(key("Me#1"));
        for i in 0..n {
            let k = key(&format!("Peer{:03}#{}", i, 1000 + i));
            store.update_remote_alias(&k, &format!("Alias number {}", i), Timestamp(100 + i as u64));
            store.add_remote_characters(
                &k,
                &[CharacterRecord::new(format!("Char{}", i), "Realm", Timestamp(50 + i as u64))],
            );
        }
        store
    }

    #[test]
    fn test_digest_excludes_target_and_known() {
        let mut store = store_with_remotes(3);
        let target = key("Peer000#1000");
        let codec = Codec::default();
        let engine = GossipEngine::new(24);

        let digest = engine.build_digest(&store, &codec, &target);
        assert_eq!(digest.len(), 2);
        assert!(digest.iter().all(|e| e.owner_key != target));
        // Freshest first
        assert_eq!(digest[0].owner_key, key("Peer002#1002"));

        let p1 = store.summary(&key("Peer001#1001")).unwrap();
        store.update_knowledge(
            &target,
            &p1.owner_key,
            p1.alias_updated_at,
            p1.chars_updated_at,
            p1.char_count,
        );
        let digest = engine.build_digest(&store, &codec, &target);
        assert_eq!(digest.len(), 1);
    }

    #[test]
    fn test_digest_fits_cap() {
        // Keys and stamps that do not compress away
        let mut store = LocalStore::new(key("Me#1"));
        for i in 0..40u64 {
            let scrambled = i.wrapping_mul(2_654_435_761) % 0xffff_ffff;
            let k = key(&format!("{:08x}#{}", scrambled, 1000 + i));
            store.update_remote_alias(&k, &format!("{:x}", scrambled), Timestamp(1_700_000_000 + scrambled % 9973));
        }
        let codec = Codec::default();
        let engine = GossipEngine::new(40);
        let target = key("Other#9");

        let digest = engine.build_digest(&store, &codec, &target);
        assert!(!digest.is_empty());
        assert!(digest.len() < 40);

        let bytes = codec
            .encode(&Message::GossipDigest(GossipDigest {
                from: key("Me#1"),
                entries: digest,
            }))
            .unwrap();
        assert!(bytes.len() <= MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_send_digest_updates_knowledge() {
        let mut store = store_with_remotes(2);
        let transport = MemoryTransport::new();
        let codec = Codec::default();
        let mut stats = RuntimeStats::default();
        let mut notices = VecDeque::new();
        let engine = GossipEngine::new(24);
        let target = key("B#2");

        let mut out = Outbound {
            transport: &transport,
            codec: &codec,
            stats: &mut stats,
            notices: &mut notices,
        };
        assert!(engine.send_digest(&mut store, &mut out, &target, &Route::direct("B#2")));
        // Nothing new for B the second time
        assert!(!engine.send_digest(&mut store, &mut out, &target, &Route::direct("B#2")));

        assert_eq!(store.knowledge(&target).unwrap().len(), 2);
        assert_eq!(transport.take_sent().len(), 1);
    }

    #[test]
    fn test_correction_once_per_pair() {
        let mut store = LocalStore::new(key("Me#1"));
        let a = key("A#1");
        let d = key("D#4");
        store.update_remote_alias(&a, "NewName", Timestamp(900));

        let transport = MemoryTransport::new();
        let codec = Codec::default();
        let mut stats = RuntimeStats::default();
        let mut notices = VecDeque::new();
        let coordinator = Coordinator::new(&NodeConfig::default());
        let mut engine = GossipEngine::new(24);

        let stale = ProfileSummary {
            owner_key: a.clone(),
            alias_updated_at: Timestamp(500),
            chars_updated_at: Timestamp::ZERO,
            char_count: 0,
        };

        let mut out = Outbound {
            transport: &transport,
            codec: &codec,
            stats: &mut stats,
            notices: &mut notices,
        };
        assert!(engine.correct_stale(&mut store, &mut out, &coordinator, &d, &stale));
        assert!(!engine.correct_stale(&mut store, &mut out, &coordinator, &d, &stale));
        assert!(engine.has_corrected(&d, &a));

        let sent = transport.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, Route::direct("D#4"));
        match parse(&sent[0].0).unwrap() {
            Message::AliasUpdate(m) => {
                assert_eq!(m.alias, "NewName");
                assert_eq!(m.alias_updated_at, Timestamp(900));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            store.knowledge_of(&d, &a).map(|k| k.alias_updated_at_known),
            Some(Timestamp(900))
        );
    }

    #[test]
    fn test_send_profile_relays_alias_and_delta() {
        let mut store = LocalStore::new(key("Me#1"));
        let a = key("A#1");
        store.update_remote_alias(&a, "Alice", Timestamp(5));
        store.add_remote_characters(
            &a,
            &[
                CharacterRecord::new("old", "R", Timestamp(10)),
                CharacterRecord::new("new", "R", Timestamp(20)),
            ],
        );

        let transport = MemoryTransport::new();
        let codec = Codec::default();
        let mut stats = RuntimeStats::default();
        let mut notices = VecDeque::new();
        let coordinator = Coordinator::new(&NodeConfig::default());
        let engine = GossipEngine::new(24);

        let mut out = Outbound {
            transport: &transport,
            codec: &codec,
            stats: &mut stats,
            notices: &mut notices,
        };
        let route = Route::direct("B#2");
        assert!(engine.send_profile(&store, &mut out, &coordinator, &route, &a, Timestamp(10)));

        let kinds: Vec<_> = transport
            .take_sent()
            .iter()
            .map(|(bytes, _)| parse(bytes).unwrap())
            .collect();
        assert_eq!(kinds.len(), 2);
        assert!(matches!(&kinds[0], Message::AliasUpdate(m) if m.alias == "Alice"));
        match &kinds[1] {
            Message::CharsUpdate(m) => {
                assert_eq!(m.records.len(), 1);
                assert_eq!(m.records[0].name, "new");
            }
            other => panic!("unexpected {:?}", other),
        }

        let unknown = key("Z#9");
        assert!(!engine.send_profile(&store, &mut out, &coordinator, &route, &unknown, Timestamp::ZERO));
    }

    proptest::proptest! {
        #[test]
        fn test_digest_never_exceeds_cap(
            profiles in proptest::collection::vec(
                ("[A-Za-z0-9]{1,40}", 1000u32..u32::MAX, 0u64..u64::MAX / 2, 0usize..4),
                0..60,
            ),
            max_entries in 1usize..64,
        ) {
            let mut store = LocalStore::new(key("Me#1"));
            for (name, tag, at, chars) in &profiles {
                let k = key(&format!("{}#{}", name, tag));
                store.update_remote_alias(&k, name, Timestamp(*at));
                let records: Vec<_> = (0..*chars)
                    .map(|i| CharacterRecord::new(format!("{}{}", name, i), "Realm", Timestamp(at + i as u64)))
                    .collect();
                store.add_remote_characters(&k, &records);
            }
            let codec = Codec::default();
            let engine = GossipEngine::new(max_entries);

            let digest = engine.build_digest(&store, &codec, &key("Other#9"));
            proptest::prop_assert!(digest.len() <= max_entries);
            let bytes = codec
                .encode(&Message::GossipDigest(GossipDigest {
                    from: key("Me#1"),
                    entries: digest,
                }))
                .unwrap();
            proptest::prop_assert!(bytes.len() <= MAX_MESSAGE_SIZE);
        }
    }
}
