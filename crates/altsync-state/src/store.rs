//! Local store - the single source of truth
//!
//! Holds exactly one authoritative self profile, the replicas of every other
//! peer we have heard about, and our guess of what each peer already knows.
//!
//! INVARIANT: nothing reachable from a network handler writes the self
//! profile. The only writers are `register_owned_identity` and
//! `set_own_alias`. Every remote write path rejects the self key.

use std::collections::{HashMap, HashSet};

use altsync_core::{
    validate_alias, CharacterRecord, KnowledgeHint, PeerKey, Profile, ProfileSummary, SyncError,
    SyncResult, Timestamp,
};

/// Current persisted schema version
pub const SCHEMA_VERSION: u32 = 2;

/// Knowledge hints of one peer, keyed by the profile they describe
pub type KnowledgeMap = HashMap<PeerKey, KnowledgeHint>;

/// Local profile store
#[derive(Debug)]
pub struct LocalStore {
    owner_key: PeerKey,
    self_profile: Option<Profile>,
    remotes: HashMap<PeerKey, Profile>,
    knowledge: HashMap<PeerKey, KnowledgeMap>,
    /// Bumped on every mutation, for change detection by persistence
    revision: u64,
}

impl LocalStore {
    /// Empty store for the local peer `owner_key`
    pub fn new(owner_key: PeerKey) -> Self {
        LocalStore {
            owner_key,
            self_profile: None,
            remotes: HashMap::new(),
            knowledge: HashMap::new(),
            revision: 0,
        }
    }

    pub(crate) fn from_parts(
        owner_key: PeerKey,
        self_profile: Option<Profile>,
        remotes: HashMap<PeerKey, Profile>,
        knowledge: HashMap<PeerKey, KnowledgeMap>,
    ) -> Self {
        LocalStore {
            owner_key,
            self_profile,
            remotes,
            knowledge,
            revision: 0,
        }
    }

    #[inline]
    pub fn owner_key(&self) -> &PeerKey {
        &self.owner_key
    }

    /// Alias of `owner_key`, reads better at call sites about the self profile
    #[inline]
    pub fn self_key(&self) -> &PeerKey {
        &self.owner_key
    }

    #[inline]
    pub fn is_self(&self, key: &PeerKey) -> bool {
        *key == self.owner_key
    }

    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn self_profile(&self) -> Option<&Profile> {
        self.self_profile.as_ref()
    }

    /// Record a character the local peer owns
    ///
    /// Idempotent. Creates the self profile on first call with the owner key
    /// as alias. Returns whether anything changed.
    pub fn register_owned_identity(
        &mut self,
        name: &str,
        realm: &str,
        now: Timestamp,
    ) -> SyncResult<bool> {
        let record = CharacterRecord::new(name, realm, now);
        record.validate()?;

        let mut changed = false;
        let owner_key = &self.owner_key;
        let profile = self.self_profile.get_or_insert_with(|| {
            changed = true;
            Profile::new(owner_key.clone())
        });

        if profile.insert_new_character(record) {
            tracing::info!(name, realm, "registered owned identity");
            changed = true;
        }

        if changed {
            self.revision += 1;
        }
        Ok(changed)
    }

    /// Change the local alias
    pub fn set_own_alias(&mut self, alias: &str, now: Timestamp) -> SyncResult<()> {
        validate_alias(alias)?;
        let profile = self.self_profile.as_mut().ok_or(SyncError::NoSelfProfile)?;
        profile.set_alias(alias, now);
        self.revision += 1;
        Ok(())
    }

    /// Self if `key` is ours, else the replica, else nothing
    pub fn get_profile(&self, key: &PeerKey) -> Option<&Profile> {
        if self.is_self(key) {
            self.self_profile.as_ref()
        } else {
            self.remotes.get(key)
        }
    }

    pub fn contains_remote(&self, key: &PeerKey) -> bool {
        self.remotes.contains_key(key)
    }

    /// Iterate over every replica
    pub fn all_remote_profiles(&self) -> impl Iterator<Item = &Profile> {
        self.remotes.values()
    }

    pub fn remote_count(&self) -> usize {
        self.remotes.len()
    }

    pub fn summary(&self, key: &PeerKey) -> Option<ProfileSummary> {
        self.get_profile(key).map(Profile::summary)
    }

    fn remote_entry(&mut self, key: &PeerKey) -> &mut Profile {
        if !self.remotes.contains_key(key) {
            tracing::debug!(peer = %key, "new remote profile");
            self.revision += 1;
        }
        self.remotes
            .entry(key.clone())
            .or_insert_with(|| Profile::new(key.clone()))
    }

    /// Last-writer-wins alias merge for a remote peer
    ///
    /// Rejects the self key. Creates the replica if absent. Returns whether
    /// the write applied.
    pub fn update_remote_alias(&mut self, key: &PeerKey, alias: &str, updated_at: Timestamp) -> bool {
        if self.is_self(key) {
            tracing::debug!("rejected remote alias write to self profile");
            return false;
        }

        let applied = self.remote_entry(key).merge_alias(alias, updated_at);
        if applied {
            self.revision += 1;
        }
        applied
    }

    /// Per-name last-writer-wins character merge for a remote peer
    ///
    /// Rejects the self key. Creates the replica if absent. Returns whether
    /// any record applied.
    pub fn add_remote_characters(&mut self, key: &PeerKey, records: &[CharacterRecord]) -> bool {
        if self.is_self(key) {
            tracing::debug!("rejected remote character write to self profile");
            return false;
        }

        let applied = self.remote_entry(key).merge_characters(records);
        if applied {
            self.revision += 1;
        }
        applied
    }

    /// Records of `profile` added strictly after `after`, oldest first
    pub fn characters_added_after(profile: &Profile, after: Timestamp) -> Vec<CharacterRecord> {
        profile.characters_added_after(after)
    }

    /// Everything we believe `peer` knows, keyed by profile
    pub fn knowledge(&self, peer: &PeerKey) -> Option<&KnowledgeMap> {
        self.knowledge.get(peer)
    }

    /// What we believe `peer` knows about `profile`
    pub fn knowledge_of(&self, peer: &PeerKey, profile: &PeerKey) -> Option<KnowledgeHint> {
        self.knowledge.get(peer).and_then(|m| m.get(profile)).copied()
    }

    /// Overwrite our belief of what `peer` knows about `profile`
    pub fn update_knowledge(
        &mut self,
        peer: &PeerKey,
        profile: &PeerKey,
        alias_updated_at: Timestamp,
        chars_updated_at: Timestamp,
        char_count: u32,
    ) {
        self.knowledge.entry(peer.clone()).or_default().insert(
            profile.clone(),
            KnowledgeHint::new(alias_updated_at, chars_updated_at, char_count),
        );
        self.revision += 1;
    }

    /// Drop knowledge about peers outside `valid_peers`.
    /// Returns how many peers were dropped.
    pub fn prune_knowledge(&mut self, valid_peers: &HashSet<PeerKey>) -> usize {
        let before = self.knowledge.len();
        self.knowledge.retain(|peer, _| valid_peers.contains(peer));
        let pruned = before - self.knowledge.len();
        if pruned > 0 {
            tracing::debug!(pruned, "pruned gossip knowledge");
            self.revision += 1;
        }
        pruned
    }

    pub(crate) fn remotes(&self) -> &HashMap<PeerKey, Profile> {
        &self.remotes
    }

    pub(crate) fn all_knowledge(&self) -> &HashMap<PeerKey, KnowledgeMap> {
        &self.knowledge
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(s: &str) -> PeerKey {
        PeerKey::parse(s).unwrap()
    }

    fn rec(name: &str, at: u64) -> CharacterRecord {
        CharacterRecord::new(name, format!("realm-{name}-{at}"), Timestamp(at))
    }

    fn store() -> LocalStore {
        LocalStore::new(key("Me#1"))
    }

    #[test]
    fn test_register_creates_self() {
        let mut store = store();
        assert!(store.self_profile().is_none());

        assert!(store.register_owned_identity("Thrall", "Durotar", Timestamp(100)).unwrap());
        let me = store.self_profile().unwrap();
        assert_eq!(me.alias(), "Me#1");
        assert_eq!(me.char_count(), 1);
        assert_eq!(me.chars_updated_at(), Timestamp(100));

        // Idempotent
        assert!(!store.register_owned_identity("Thrall", "Durotar", Timestamp(200)).unwrap());
        assert_eq!(store.self_profile().unwrap().chars_updated_at(), Timestamp(100));
    }

    #[test]
    fn test_register_rejects_empty_name() {
        let mut store = store();
        assert!(store.register_owned_identity("", "Realm", Timestamp(1)).is_err());
        assert!(store.self_profile().is_none());
    }

    #[test]
    fn test_set_own_alias() {
        let mut store = store();
        assert!(matches!(
            store.set_own_alias("Me", Timestamp(5)),
            Err(SyncError::NoSelfProfile)
        ));

        store.register_owned_identity("Jaina", "Theramore", Timestamp(1)).unwrap();
        store.set_own_alias("Me", Timestamp(5)).unwrap();
        let me = store.get_profile(&key("Me#1")).unwrap();
        assert_eq!(me.alias(), "Me");
        assert_eq!(me.alias_updated_at(), Timestamp(5));
    }

    #[test]
    fn test_remote_writes_reject_self() {
        let mut store = store();
        store.register_owned_identity("Jaina", "Theramore", Timestamp(1)).unwrap();
        let before = store.self_profile().cloned();

        assert!(!store.update_remote_alias(&key("Me#1"), "Hacked", Timestamp(999)));
        assert!(!store.add_remote_characters(&key("Me#1"), &[rec("Evil", 999)]));

        assert_eq!(store.self_profile().cloned(), before);
        assert!(!store.contains_remote(&key("Me#1")));
    }

    #[test]
    fn test_remote_alias_monotonic() {
        let mut store = store();
        let a = key("A#1");

        assert!(store.update_remote_alias(&a, "Alice", Timestamp(10)));
        assert!(!store.update_remote_alias(&a, "Alice", Timestamp(10)));
        assert!(!store.update_remote_alias(&a, "Old", Timestamp(9)));
        assert_eq!(store.get_profile(&a).unwrap().alias(), "Alice");
    }

    #[test]
    fn test_remote_created_even_when_write_not_applied() {
        let mut store = store();
        let a = key("A#1");
        assert!(!store.update_remote_alias(&a, "A#1", Timestamp::ZERO));
        assert!(store.contains_remote(&a));
    }

    #[test]
    fn test_add_remote_characters() {
        let mut store = store();
        let a = key("A#1");

        assert!(store.add_remote_characters(&a, &[rec("x", 10), rec("y", 20)]));
        assert!(!store.add_remote_characters(&a, &[rec("x", 10)]));
        assert!(store.add_remote_characters(&a, &[rec("x", 30)]));

        let p = store.get_profile(&a).unwrap();
        assert_eq!(p.char_count(), 2);
        assert_eq!(p.chars_updated_at(), Timestamp(30));
    }

    #[test]
    fn test_knowledge_overwrite_and_prune() {
        let mut store = store();
        let b = key("B#2");
        let c = key("C#3");
        let a = key("A#1");

        store.update_knowledge(&b, &a, Timestamp(5), Timestamp(6), 2);
        store.update_knowledge(&b, &a, Timestamp(1), Timestamp(1), 1);
        store.update_knowledge(&c, &a, Timestamp(5), Timestamp(6), 2);

        assert_eq!(
            store.knowledge_of(&b, &a),
            Some(KnowledgeHint::new(Timestamp(1), Timestamp(1), 1))
        );

        let valid: HashSet<_> = [c.clone()].into_iter().collect();
        assert_eq!(store.prune_knowledge(&valid), 1);
        assert!(store.knowledge(&b).is_none());
        assert!(store.knowledge(&c).is_some());
    }

    #[test]
    fn test_revision_tracks_changes() {
        let mut store = store();
        let r0 = store.revision();
        store.update_remote_alias(&key("A#1"), "Alice", Timestamp(3));
        let r1 = store.revision();
        assert!(r1 > r0);
        store.update_remote_alias(&key("A#1"), "Alice", Timestamp(3));
        assert_eq!(store.revision(), r1);
    }

    fn arb_records() -> impl Strategy<Value = Vec<CharacterRecord>> {
        prop::collection::vec((0u8..6, 1u64..50), 0..20).prop_map(|v| {
            v.into_iter()
                .map(|(n, at)| rec(&format!("c{n}"), at))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_alias_merge_idempotent(at in 0u64..1000, alias in "[a-z]{1,8}") {
            let mut store = store();
            let a = key("A#1");
            store.update_remote_alias(&a, &alias, Timestamp(at));
            let once = store.get_profile(&a).cloned();
            prop_assert!(!store.update_remote_alias(&a, &alias, Timestamp(at)));
            prop_assert_eq!(store.get_profile(&a).cloned(), once);
        }

        #[test]
        fn prop_character_merge_converges(batches in prop::collection::vec(arb_records(), 1..6)) {
            let a = key("A#1");

            let mut forward = store();
            for batch in &batches {
                forward.add_remote_characters(&a, batch);
            }

            let mut backward = store();
            for batch in batches.iter().rev() {
                backward.add_remote_characters(&a, batch);
                // Duplicates never change the outcome
                backward.add_remote_characters(&a, batch);
            }

            let f = forward.get_profile(&a).unwrap();
            let b = backward.get_profile(&a).unwrap();
            prop_assert_eq!(f.characters(), b.characters());
            prop_assert_eq!(f.chars_updated_at(), b.chars_updated_at());

            let max = f.characters().values().map(|c| c.added_at).max().unwrap_or(Timestamp::ZERO);
            prop_assert_eq!(f.chars_updated_at(), max);
        }
    }
}
