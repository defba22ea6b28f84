//! Persisted store snapshots
//!
//! Layout (JSON):
//! `{ schema_version, self_profile, remotes, gossip_knowledge }`
//!
//! Migration is version-gated and additive only, and runs once at load:
//! - v1 → v2: `gossip_knowledge` added (empty)
//!
//! Loading re-establishes the store invariants instead of trusting the file:
//! derived fields are recomputed and a replica of the local key is dropped.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use altsync_core::{KnowledgeHint, PeerKey, Profile, SyncError, SyncResult};

use crate::{LocalStore, SCHEMA_VERSION};

/// Serialized form of a [`LocalStore`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema_version: u32,
    pub self_profile: Option<Profile>,
    #[serde(default)]
    pub remotes: BTreeMap<PeerKey, Profile>,
    #[serde(default)]
    pub gossip_knowledge: BTreeMap<PeerKey, BTreeMap<PeerKey, KnowledgeHint>>,
}

impl Snapshot {
    /// Capture the persistent parts of a store
    pub fn capture(store: &LocalStore) -> Self {
        Snapshot {
            schema_version: SCHEMA_VERSION,
            self_profile: store.self_profile().cloned(),
            remotes: store
                .remotes()
                .iter()
                .map(|(k, p)| (k.clone(), p.clone()))
                .collect(),
            gossip_knowledge: store
                .all_knowledge()
                .iter()
                .map(|(peer, hints)| {
                    let hints = hints.iter().map(|(k, h)| (k.clone(), *h)).collect();
                    (peer.clone(), hints)
                })
                .collect(),
        }
    }

    /// Rebuild a store for `owner_key`
    ///
    /// A self profile saved under a different key is discarded: the local
    /// identity changed and the old record is no longer ours to publish.
    pub fn into_store(self, owner_key: PeerKey) -> LocalStore {
        let self_profile = match self.self_profile {
            Some(mut profile) if *profile.owner_key() == owner_key => {
                profile.normalize();
                Some(profile)
            }
            Some(profile) => {
                tracing::warn!(
                    saved = %profile.owner_key(),
                    current = %owner_key,
                    "discarding self profile saved under another key"
                );
                None
            }
            None => None,
        };

        let remotes: HashMap<_, _> = self
            .remotes
            .into_iter()
            .filter(|(key, profile)| *key != owner_key && key == profile.owner_key())
            .map(|(key, mut profile)| {
                profile.normalize();
                (key, profile)
            })
            .collect();

        let knowledge = self
            .gossip_knowledge
            .into_iter()
            .map(|(peer, hints)| (peer, hints.into_iter().collect()))
            .collect();

        LocalStore::from_parts(owner_key, self_profile, remotes, knowledge)
    }

    pub fn to_json(&self) -> SyncResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| SyncError::Persistence(e.to_string()))
    }

    /// Parse, migrating older schemas forward
    pub fn from_json(json: &str) -> SyncResult<Self> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| SyncError::Persistence(e.to_string()))?;
        let value = migrate(value)?;
        serde_json::from_value(value).map_err(|e| SyncError::Persistence(e.to_string()))
    }
}

/// Upgrade a raw snapshot to [`SCHEMA_VERSION`]
pub fn migrate(mut value: Value) -> SyncResult<Value> {
    let obj = value
        .as_object_mut()
        .ok_or_else(|| SyncError::Persistence("snapshot is not an object".into()))?;

    let version = obj
        .get("schema_version")
        .and_then(Value::as_u64)
        .unwrap_or(1);

    if version > SCHEMA_VERSION as u64 {
        return Err(SyncError::Persistence(format!(
            "snapshot schema {} is newer than supported {}",
            version, SCHEMA_VERSION
        )));
    }

    if version < 2 {
        obj.entry("gossip_knowledge")
            .or_insert_with(|| Value::Object(Default::default()));
        tracing::info!(from = version, to = 2, "migrated snapshot schema");
    }

    obj.insert("schema_version".into(), Value::from(SCHEMA_VERSION));
    Ok(value)
}

/// Load a store from `path`; a missing file yields an empty store
pub fn load(path: &Path, owner_key: PeerKey) -> SyncResult<LocalStore> {
    match fs::read_to_string(path) {
        Ok(json) => Ok(Snapshot::from_json(&json)?.into_store(owner_key)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LocalStore::new(owner_key)),
        Err(e) => Err(e.into()),
    }
}

/// Write the store to `path` via a temp file and rename
pub fn save(store: &LocalStore, path: &Path) -> SyncResult<()> {
    let json = Snapshot::capture(store).to_json()?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use altsync_core::{CharacterRecord, Timestamp};

    fn key(s: &str) -> PeerKey {
        PeerKey::parse(s).unwrap()
    }

    fn populated() -> LocalStore {
        let mut store = LocalStore::new(key("Me#1"));
        store.register_owned_identity("Mine", "R", Timestamp(5)).unwrap();
        store.set_own_alias("Me", Timestamp(6)).unwrap();
        store.update_remote_alias(&key("A#1"), "Alice", Timestamp(7));
        store.add_remote_characters(&key("A#1"), &[CharacterRecord::new("Al", "R", Timestamp(8))]);
        store.update_knowledge(&key("B#2"), &key("A#1"), Timestamp(7), Timestamp(8), 1);
        store
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let store = populated();
        let json = Snapshot::capture(&store).to_json().unwrap();
        let restored = Snapshot::from_json(&json).unwrap().into_store(key("Me#1"));

        assert_eq!(restored.self_profile(), store.self_profile());
        assert_eq!(restored.get_profile(&key("A#1")), store.get_profile(&key("A#1")));
        assert_eq!(
            restored.knowledge_of(&key("B#2"), &key("A#1")),
            store.knowledge_of(&key("B#2"), &key("A#1"))
        );
    }

    #[test]
    fn test_v1_migration_adds_knowledge() {
        let mut value = serde_json::to_value(Snapshot::capture(&populated())).unwrap();
        let obj = value.as_object_mut().unwrap();
        obj.remove("gossip_knowledge");
        obj.insert("schema_version".into(), Value::from(1));

        let snapshot = Snapshot::from_json(&value.to_string()).unwrap();
        assert_eq!(snapshot.schema_version, SCHEMA_VERSION);
        assert!(snapshot.gossip_knowledge.is_empty());
        assert_eq!(snapshot.remotes.len(), 1);
    }

    #[test]
    fn test_newer_schema_rejected() {
        let json = r#"{"schema_version": 99, "self_profile": null}"#;
        assert!(matches!(
            Snapshot::from_json(json),
            Err(SyncError::Persistence(_))
        ));
    }

    #[test]
    fn test_load_drops_self_replica() {
        let mut snapshot = Snapshot::capture(&populated());
        let me = snapshot.self_profile.clone().unwrap();
        snapshot.remotes.insert(key("Me#1"), me);

        let store = snapshot.into_store(key("Me#1"));
        assert!(!store.contains_remote(&key("Me#1")));
        assert_eq!(store.remote_count(), 1);
    }

    #[test]
    fn test_load_with_new_owner_discards_self() {
        let store = Snapshot::capture(&populated()).into_store(key("Other#9"));
        assert!(store.self_profile().is_none());
        assert_eq!(store.remote_count(), 1);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = std::env::temp_dir().join(format!("altsync-snapshot-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("store.json");

        let missing = load(&path, key("Me#1")).unwrap();
        assert!(missing.self_profile().is_none());

        save(&populated(), &path).unwrap();
        let loaded = load(&path, key("Me#1")).unwrap();
        assert_eq!(loaded.self_profile().unwrap().alias(), "Me");

        fs::remove_dir_all(&dir).unwrap();
    }
}
