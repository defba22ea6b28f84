//! Profile records
//!
//! A profile is a display alias plus the set of characters a peer owns.
//! Both halves merge last-writer-wins on their own timestamp:
//! - alias: replaced only by a strictly newer `alias_updated_at`
//! - characters: per name, replaced only by a strictly newer `added_at`
//!
//! `chars_updated_at` is derived. It is always the maximum `added_at` over
//! the character set and is recomputed on every mutation, never assigned.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{PeerKey, Timestamp, ValidationError};

/// Longest accepted alias in bytes
pub const MAX_ALIAS_LEN: usize = 64;

/// Longest accepted character name in bytes
pub const MAX_CHARACTER_NAME_LEN: usize = 48;

/// Longest accepted realm in bytes
pub const MAX_REALM_LEN: usize = 48;

/// Check an alias received from the network
pub fn validate_alias(alias: &str) -> Result<(), ValidationError> {
    if alias.len() > MAX_ALIAS_LEN {
        return Err(ValidationError::TooLong {
            field: "alias",
            len: alias.len(),
            max: MAX_ALIAS_LEN,
        });
    }
    if alias.chars().any(char::is_control) {
        return Err(ValidationError::ControlCharacters("alias"));
    }
    Ok(())
}

/// One owned identity
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacterRecord {
    pub name: String,
    pub realm: String,
    pub added_at: Timestamp,
}

impl CharacterRecord {
    pub fn new(name: impl Into<String>, realm: impl Into<String>, added_at: Timestamp) -> Self {
        CharacterRecord {
            name: name.into(),
            realm: realm.into(),
            added_at,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyCharacterName);
        }
        if self.name.len() > MAX_CHARACTER_NAME_LEN {
            return Err(ValidationError::TooLong {
                field: "character name",
                len: self.name.len(),
                max: MAX_CHARACTER_NAME_LEN,
            });
        }
        if self.realm.len() > MAX_REALM_LEN {
            return Err(ValidationError::TooLong {
                field: "realm",
                len: self.realm.len(),
                max: MAX_REALM_LEN,
            });
        }
        if self.name.chars().any(char::is_control) || self.realm.chars().any(char::is_control) {
            return Err(ValidationError::ControlCharacters("character"));
        }
        self.added_at.validate()
    }
}

/// Compact description of a profile's freshness, used in announces and digests
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub owner_key: PeerKey,
    pub alias_updated_at: Timestamp,
    pub chars_updated_at: Timestamp,
    pub char_count: u32,
}

impl ProfileSummary {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.owner_key.validate()?;
        self.alias_updated_at.validate()?;
        self.chars_updated_at.validate()
    }

    /// Newest of the two field timestamps
    #[inline]
    pub fn freshness(&self) -> Timestamp {
        self.alias_updated_at.max(self.chars_updated_at)
    }

    /// Does this summary describe anything `hint` does not already cover?
    pub fn is_ahead_of(&self, hint: &KnowledgeHint) -> bool {
        self.alias_updated_at > hint.alias_updated_at_known
            || self.chars_updated_at > hint.chars_updated_at_known
            || self.char_count > hint.char_count_known
    }
}

/// Our best guess of what one peer knows about one profile
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeHint {
    pub alias_updated_at_known: Timestamp,
    pub chars_updated_at_known: Timestamp,
    pub char_count_known: u32,
}

impl KnowledgeHint {
    pub fn new(alias_updated_at: Timestamp, chars_updated_at: Timestamp, char_count: u32) -> Self {
        KnowledgeHint {
            alias_updated_at_known: alias_updated_at,
            chars_updated_at_known: chars_updated_at,
            char_count_known: char_count,
        }
    }
}

impl From<&ProfileSummary> for KnowledgeHint {
    fn from(summary: &ProfileSummary) -> Self {
        KnowledgeHint::new(
            summary.alias_updated_at,
            summary.chars_updated_at,
            summary.char_count,
        )
    }
}

/// A peer's alias and owned characters
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    owner_key: PeerKey,
    alias: String,
    alias_updated_at: Timestamp,
    characters: BTreeMap<String, CharacterRecord>,
    chars_updated_at: Timestamp,
}

impl Profile {
    /// Fresh profile: alias defaults to the owner key, nothing timestamped yet
    pub fn new(owner_key: PeerKey) -> Self {
        Profile {
            alias: owner_key.as_str().to_owned(),
            owner_key,
            alias_updated_at: Timestamp::ZERO,
            characters: BTreeMap::new(),
            chars_updated_at: Timestamp::ZERO,
        }
    }

    #[inline]
    pub fn owner_key(&self) -> &PeerKey {
        &self.owner_key
    }

    #[inline]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    #[inline]
    pub fn alias_updated_at(&self) -> Timestamp {
        self.alias_updated_at
    }

    #[inline]
    pub fn chars_updated_at(&self) -> Timestamp {
        self.chars_updated_at
    }

    /// Characters keyed by name
    #[inline]
    pub fn characters(&self) -> &BTreeMap<String, CharacterRecord> {
        &self.characters
    }

    pub fn character(&self, name: &str) -> Option<&CharacterRecord> {
        self.characters.get(name)
    }

    #[inline]
    pub fn char_count(&self) -> u32 {
        self.characters.len() as u32
    }

    /// Unconditional alias write, for the owner's own profile
    pub fn set_alias(&mut self, alias: impl Into<String>, at: Timestamp) {
        self.alias = alias.into();
        self.alias_updated_at = at;
    }

    /// Last-writer-wins alias merge. Returns whether the write applied.
    pub fn merge_alias(&mut self, alias: &str, at: Timestamp) -> bool {
        if at <= self.alias_updated_at {
            return false;
        }
        self.alias = alias.to_owned();
        self.alias_updated_at = at;
        true
    }

    /// Per-name last-writer-wins character merge. Returns whether any
    /// record applied.
    ///
    /// Equal stamps resolve to the record with the greater realm, so every
    /// replica lands on the same record whatever order updates arrive in.
    pub fn merge_characters<'a, I>(&mut self, records: I) -> bool
    where
        I: IntoIterator<Item = &'a CharacterRecord>,
    {
        let mut applied = false;
        for record in records {
            let newer = match self.characters.get(&record.name) {
                Some(existing) => supersedes(record, existing),
                None => true,
            };
            if newer {
                self.characters.insert(record.name.clone(), record.clone());
                applied = true;
            }
        }
        if applied {
            self.recompute_chars_updated_at();
        }
        applied
    }

    /// Insert a character if no record with that name exists yet
    pub fn insert_new_character(&mut self, record: CharacterRecord) -> bool {
        if self.characters.contains_key(&record.name) {
            return false;
        }
        self.characters.insert(record.name.clone(), record);
        self.recompute_chars_updated_at();
        true
    }

    /// Characters strictly newer than `after`, oldest first
    pub fn characters_added_after(&self, after: Timestamp) -> Vec<CharacterRecord> {
        let mut records: Vec<_> = self
            .characters
            .values()
            .filter(|c| c.added_at > after)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.added_at.cmp(&b.added_at).then_with(|| a.name.cmp(&b.name)));
        records
    }

    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            owner_key: self.owner_key.clone(),
            alias_updated_at: self.alias_updated_at,
            chars_updated_at: self.chars_updated_at,
            char_count: self.char_count(),
        }
    }

    /// Re-derive fields after loading from an untrusted source
    pub fn normalize(&mut self) {
        self.characters.retain(|name, record| *name == record.name);
        self.recompute_chars_updated_at();
    }

    fn recompute_chars_updated_at(&mut self) {
        self.chars_updated_at = self
            .characters
            .values()
            .map(|c| c.added_at)
            .max()
            .unwrap_or(Timestamp::ZERO);
    }
}

/// Does `incoming` replace `existing` for the same character name?
fn supersedes(incoming: &CharacterRecord, existing: &CharacterRecord) -> bool {
    (incoming.added_at, &incoming.realm) > (existing.added_at, &existing.realm)
}
