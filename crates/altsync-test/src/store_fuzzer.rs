//! Store fuzzer - Property-based testing for replica merges
//!
//! Tests:
//! - Convergence when updates arrive in any order, duplicated or not
//! - The local self profile is never written by remote data
//! - Derived fields stay consistent with the records they derive from

use std::collections::BTreeMap;

use altsync_core::{CharacterRecord, PeerKey, Profile, Timestamp};
use altsync_state::LocalStore;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Fuzzer configuration
#[derive(Clone, Debug)]
pub struct FuzzerConfig {
    /// Number of replicas receiving updates
    pub store_count: usize,
    /// Number of profile owners generating updates
    pub owner_count: usize,
    /// Updates generated per owner
    pub updates_per_owner: usize,
    /// Probability an update is delivered twice
    pub duplicate_prob: f64,
    /// Largest character chunk
    pub chunk_size: usize,
    /// Random seed
    pub seed: u64,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        FuzzerConfig {
            store_count: 4,
            owner_count: 5,
            updates_per_owner: 40,
            duplicate_prob: 0.2,
            chunk_size: 4,
            seed: 42,
        }
    }
}

impl FuzzerConfig {
    /// Light fuzzing for quick tests
    pub fn light() -> Self {
        FuzzerConfig {
            store_count: 3,
            owner_count: 2,
            updates_per_owner: 10,
            duplicate_prob: 0.1,
            chunk_size: 4,
            seed: 42,
        }
    }

    /// Heavy fuzzing for thorough testing
    pub fn heavy() -> Self {
        FuzzerConfig {
            store_count: 8,
            owner_count: 20,
            updates_per_owner: 200,
            duplicate_prob: 0.4,
            chunk_size: 2,
            seed: 42,
        }
    }
}

/// One replicated write as it would arrive off the wire
#[derive(Clone, Debug)]
pub enum FuzzUpdate {
    Alias {
        owner: PeerKey,
        alias: String,
        at: Timestamp,
    },
    Chars {
        owner: PeerKey,
        records: Vec<CharacterRecord>,
    },
}

impl FuzzUpdate {
    pub fn apply(&self, store: &mut LocalStore) -> bool {
        match self {
            FuzzUpdate::Alias { owner, alias, at } => store.update_remote_alias(owner, alias, *at),
            FuzzUpdate::Chars { owner, records } => store.add_remote_characters(owner, records),
        }
    }
}

/// Store fuzzer
pub struct StoreFuzzer {
    config: FuzzerConfig,
    rng: StdRng,
    owners: Vec<PeerKey>,
    stores: Vec<LocalStore>,
    /// What each owner actually authored, for checking the replicas
    truth: BTreeMap<PeerKey, Profile>,
}

impl StoreFuzzer {
    pub fn new(config: FuzzerConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        let owners = (0..config.owner_count)
            .map(|i| PeerKey::new_unchecked(format!("Owner{}#{}", i, 100 + i)))
            .collect();
        let stores = (0..config.store_count)
            .map(|i| LocalStore::new(PeerKey::new_unchecked(format!("Store{}#{}", i, 900 + i))))
            .collect();

        StoreFuzzer {
            config,
            rng,
            owners,
            stores,
            truth: BTreeMap::new(),
        }
    }

    /// Author a history per owner with strictly increasing stamps
    pub fn generate(&mut self) -> Vec<FuzzUpdate> {
        let mut updates = Vec::new();

        for owner in self.owners.clone() {
            let mut profile = Profile::new(owner.clone());
            let mut now = 1_700_000_000u64;
            let mut names: Vec<String> = Vec::new();

            for step in 0..self.config.updates_per_owner {
                now += self.rng.gen_range(1..=30);
                let at = Timestamp(now);

                if self.rng.gen_bool(0.3) {
                    let alias = format!("{}-alias-{}", owner.name(), step);
                    profile.set_alias(alias.clone(), at);
                    updates.push(FuzzUpdate::Alias {
                        owner: owner.clone(),
                        alias,
                        at,
                    });
                    continue;
                }

                // New names mostly, sometimes a re-registration of an old one
                let name = if !names.is_empty() && self.rng.gen_bool(0.2) {
                    names[self.rng.gen_range(0..names.len())].clone()
                } else {
                    let name = format!("Char{}", names.len());
                    names.push(name.clone());
                    name
                };
                let realm = format!("Realm{}", self.rng.gen_range(0..3));
                let record = CharacterRecord::new(name, realm, at);
                profile.merge_characters([&record]);
                updates.push(FuzzUpdate::Chars {
                    owner: owner.clone(),
                    records: vec![record],
                });
            }

            self.truth.insert(owner, profile);
        }

        self.rechunk(updates)
    }

    /// Group some single-record updates into chunks the way deltas travel
    fn rechunk(&self, updates: Vec<FuzzUpdate>) -> Vec<FuzzUpdate> {
        let mut out = Vec::new();
        let mut pending: Option<(PeerKey, Vec<CharacterRecord>)> = None;

        for update in updates {
            match update {
                FuzzUpdate::Chars { owner, mut records } => {
                    let room = self.config.chunk_size;
                    let extend = matches!(
                        &pending,
                        Some((key, batch)) if *key == owner && batch.len() < room
                    );
                    if extend {
                        if let Some((_, batch)) = pending.as_mut() {
                            batch.append(&mut records);
                        }
                    } else if let Some((owner, records)) = pending.replace((owner, records)) {
                        out.push(FuzzUpdate::Chars { owner, records });
                    }
                }
                alias => {
                    if let Some((owner, records)) = pending.take() {
                        out.push(FuzzUpdate::Chars { owner, records });
                    }
                    out.push(alias);
                }
            }
        }
        if let Some((owner, records)) = pending {
            out.push(FuzzUpdate::Chars { owner, records });
        }
        out
    }

    /// Run the fuzzer
    pub fn run(&mut self) -> FuzzResult {
        let updates = self.generate();
        let mut result = FuzzResult::default();

        // Every store gets every update in its own order
        for index in 0..self.stores.len() {
            let mut delivery = updates.clone();
            delivery.shuffle(&mut self.rng);
            for update in delivery {
                if self.rng.gen_bool(self.config.duplicate_prob) {
                    update.apply(&mut self.stores[index]);
                    result.duplicates += 1;
                }
                update.apply(&mut self.stores[index]);
                result.updates_applied += 1;
            }
        }

        // Remote writes aimed at the local key must bounce
        let self_key = self.stores[0].owner_key().clone();
        let hostile = FuzzUpdate::Alias {
            owner: self_key,
            alias: "Hijacked".into(),
            at: Timestamp::MAX,
        };
        if hostile.apply(&mut self.stores[0]) {
            result.self_overwrites += 1;
        }

        result.divergent = self.check_convergence();
        result.derived_violations = self.check_derived();
        result
    }

    /// Owners whose replica differs from what they authored, per store
    fn check_convergence(&self) -> Vec<(usize, PeerKey)> {
        let mut divergent = Vec::new();
        for (index, store) in self.stores.iter().enumerate() {
            for (owner, truth) in &self.truth {
                if store.get_profile(owner) != Some(truth) {
                    divergent.push((index, owner.clone()));
                }
            }
        }
        divergent
    }

    fn check_derived(&self) -> u32 {
        let mut violations = 0;
        for store in &self.stores {
            for profile in store.all_remote_profiles() {
                if !properties::chars_stamp_is_max(profile) {
                    violations += 1;
                }
            }
        }
        violations
    }

    pub fn stores(&self) -> &[LocalStore] {
        &self.stores
    }
}

/// Fuzzing result
#[derive(Debug, Default)]
pub struct FuzzResult {
    pub updates_applied: u64,
    pub duplicates: u64,
    pub divergent: Vec<(usize, PeerKey)>,
    pub self_overwrites: u32,
    pub derived_violations: u32,
}

impl FuzzResult {
    pub fn is_valid(&self) -> bool {
        self.divergent.is_empty() && self.self_overwrites == 0 && self.derived_violations == 0
    }
}

/// Property-based test helpers
pub mod properties {
    use super::*;

    /// `chars_updated_at` equals the newest record's stamp
    pub fn chars_stamp_is_max(profile: &Profile) -> bool {
        let newest = profile
            .characters()
            .values()
            .map(|c| c.added_at)
            .max()
            .unwrap_or(Timestamp::ZERO);
        profile.chars_updated_at() == newest
    }

    /// Applying the same updates in two orders gives the same profile
    pub fn merge_order_independent(owner: &PeerKey, updates: &[FuzzUpdate]) -> bool {
        let mut forward = LocalStore::new(PeerKey::new_unchecked("Left#1"));
        let mut backward = LocalStore::new(PeerKey::new_unchecked("Right#2"));
        for update in updates {
            update.apply(&mut forward);
        }
        for update in updates.iter().rev() {
            update.apply(&mut backward);
        }
        forward.get_profile(owner) == backward.get_profile(owner)
    }

    /// Applying an update twice changes nothing the second time
    pub fn merge_idempotent(update: &FuzzUpdate) -> bool {
        let mut store = LocalStore::new(PeerKey::new_unchecked("Store#1"));
        update.apply(&mut store);
        !update.apply(&mut store)
    }
}
