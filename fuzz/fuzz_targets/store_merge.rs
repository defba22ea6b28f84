#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use altsync_core::{CharacterRecord, PeerKey, Timestamp};
use altsync_state::LocalStore;

#[derive(Arbitrary, Debug)]
enum Op {
    Alias { owner: u8, alias: String, at: u32 },
    Chars { owner: u8, records: Vec<(u8, u32)> },
    Own { name: u8, at: u32 },
}

fn key(owner: u8) -> PeerKey {
    // Owner 0 is the local key
    PeerKey::new_unchecked(format!("Peer{}#{}", owner % 4, owner % 4))
}

fuzz_target!(|ops: Vec<Op>| {
    let mut store = LocalStore::new(key(0));

    for op in ops {
        match op {
            Op::Alias { owner, alias, at } => {
                store.update_remote_alias(&key(owner), &alias, Timestamp(at as u64));
            }
            Op::Chars { owner, records } => {
                let records: Vec<_> = records
                    .into_iter()
                    .map(|(name, at)| CharacterRecord::new(format!("Char{}", name), "Realm", Timestamp(at as u64)))
                    .collect();
                store.add_remote_characters(&key(owner), &records);
            }
            Op::Own { name, at } => {
                let _ = store.register_owned_identity(&format!("Mine{}", name), "Home", Timestamp(at as u64));
            }
        }
    }

    // Remote data never lands under the local key
    assert!(!store.contains_remote(&key(0)));
    for profile in store.all_remote_profiles() {
        let newest = profile.characters().values().map(|c| c.added_at).max();
        assert_eq!(profile.chars_updated_at(), newest.unwrap_or(Timestamp::ZERO));
    }
});
