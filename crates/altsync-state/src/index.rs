//! Character name to owner reverse index
//!
//! Lets observed activity by a character be attributed to a profile.
//! Rebuilt lazily: writers call `invalidate`, the next `find` pays the
//! O(total characters) rebuild, later lookups are O(1).

use std::collections::HashMap;

use altsync_core::{PeerKey, Profile, Timestamp};

use crate::LocalStore;

#[derive(Clone, Debug)]
struct Owner {
    key: PeerKey,
    added_at: Timestamp,
}

/// Lazily rebuilt map from character name to owning peer
#[derive(Debug)]
pub struct ReverseIndex {
    owners: HashMap<String, Owner>,
    dirty: bool,
}

impl Default for ReverseIndex {
    fn default() -> Self {
        ReverseIndex {
            owners: HashMap::new(),
            dirty: true,
        }
    }
}

impl ReverseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark stale; the next lookup rebuilds
    #[inline]
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Owner of the character called `name`, if any profile lists it
    pub fn find(&mut self, store: &LocalStore, name: &str) -> Option<PeerKey> {
        if self.dirty {
            self.rebuild(store);
        }
        self.owners.get(name).map(|o| o.key.clone())
    }

    /// Number of indexed names (after the last rebuild)
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    fn rebuild(&mut self, store: &LocalStore) {
        self.owners.clear();

        // On collision the newer claim wins, then the smaller key
        for profile in store.all_remote_profiles() {
            self.index_profile(profile, false);
        }
        // Our own characters always win
        if let Some(me) = store.self_profile() {
            self.index_profile(me, true);
        }

        self.dirty = false;
        tracing::debug!(names = self.owners.len(), "rebuilt reverse index");
    }

    fn index_profile(&mut self, profile: &Profile, authoritative: bool) {
        for record in profile.characters().values() {
            let candidate = Owner {
                key: profile.owner_key().clone(),
                added_at: record.added_at,
            };
            match self.owners.get_mut(&record.name) {
                Some(existing) => {
                    let wins = authoritative
                        || candidate.added_at > existing.added_at
                        || (candidate.added_at == existing.added_at && candidate.key < existing.key);
                    if wins {
                        *existing = candidate;
                    }
                }
                None => {
                    self.owners.insert(record.name.clone(), candidate);
                }
            }
        }
    }
}
