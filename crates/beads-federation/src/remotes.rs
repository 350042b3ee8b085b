//! Remote configuration: named pointers at peer endpoints, independent of
//! whether credentials have been set for them yet.
//!
//! This is a thin, credential-free facade over [`PeerVault`] for the common
//! case of registering a remote URL before (or without ever) storing a
//! password for it.

use beads_config::config::Sovereignty;
use beads_storage::SqliteStore;

use crate::error::Result;
use crate::vault::{Peer, PeerVault};

/// Registers `name` pointing at `url` with no stored credentials. Calling
/// this again for an existing name updates its URL and sovereignty tier but
/// leaves any previously-stored credentials untouched only if `username`/
/// `password` are both omitted from a direct [`PeerVault::upsert`] call --
/// this helper always clears credentials, matching "add a remote" semantics
/// rather than "update a peer in place".
pub fn add_remote(store: &SqliteStore, name: &str, url: &str, sovereignty: Sovereignty) -> Result<()> {
    PeerVault::new(store).upsert(name, url, None, None, sovereignty)
}

/// Lists all configured remotes (peers), credentials decrypted.
pub fn list_remotes(store: &SqliteStore) -> Result<Vec<Peer>> {
    PeerVault::new(store).list()
}

/// Removes a named remote.
pub fn remove_remote(store: &SqliteStore, name: &str) -> Result<()> {
    PeerVault::new(store).remove(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_list_remove_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        add_remote(&store, "origin", "dolthub://org/beads", Sovereignty::T1).unwrap();

        let remotes = list_remotes(&store).unwrap();
        assert_eq!(remotes.len(), 1);
        assert_eq!(remotes[0].name, "origin");

        remove_remote(&store, "origin").unwrap();
        assert!(list_remotes(&store).unwrap().is_empty());
    }
}
