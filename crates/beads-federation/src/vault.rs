//! Peer vault: upsert/get/list/remove named peer records with encrypted
//! passwords.
//!
//! This is a thin layer over `beads_storage::sqlite::peers` that encrypts
//! passwords before they reach storage and decrypts them on read. Storage
//! itself never sees plaintext credentials.

use beads_config::config::Sovereignty;
use beads_storage::{PeerRecord, SqliteStore};
use chrono::{DateTime, Utc};

use crate::crypto::{decrypt_password, encrypt_password};
use crate::error::{FederationError, Result};

/// A peer record with its password decrypted, for callers that need to
/// authenticate against the remote.
#[derive(Debug, Clone)]
pub struct Peer {
    pub name: String,
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub sovereignty: Sovereignty,
    pub created_at: DateTime<Utc>,
    pub last_sync: Option<DateTime<Utc>>,
}

fn sovereignty_to_str(s: &Sovereignty) -> &'static str {
    match s {
        Sovereignty::None => "",
        Sovereignty::T1 => "T1",
        Sovereignty::T2 => "T2",
        Sovereignty::T3 => "T3",
        Sovereignty::T4 => "T4",
    }
}

fn sovereignty_from_str(s: &str) -> Sovereignty {
    match s {
        "T1" => Sovereignty::T1,
        "T2" => Sovereignty::T2,
        "T3" => Sovereignty::T3,
        "T4" => Sovereignty::T4,
        _ => Sovereignty::None,
    }
}

/// Manages federation peer records for a single database.
pub struct PeerVault<'a> {
    store: &'a SqliteStore,
}

impl<'a> PeerVault<'a> {
    /// Wraps `store` in a peer vault. The store's `db_path()` (or a fixed
    /// `:memory:` marker for in-memory stores) keys credential encryption.
    pub fn new(store: &'a SqliteStore) -> Self {
        Self { store }
    }

    fn key_path(&self) -> String {
        self.store
            .db_path()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| ":memory:".to_string())
    }

    /// Adds or updates a peer, encrypting `password` if given.
    pub fn upsert(
        &self,
        name: &str,
        url: &str,
        username: Option<&str>,
        password: Option<&str>,
        sovereignty: Sovereignty,
    ) -> Result<()> {
        if !beads_storage::is_valid_peer_name(name) {
            return Err(FederationError::InvalidPeerName(name.to_string()));
        }
        let key_path = self.key_path();
        let password_encrypted = password
            .map(|p| encrypt_password(&key_path, p))
            .transpose()?;

        self.store.upsert_peer_impl(&PeerRecord {
            name: name.to_string(),
            url: url.to_string(),
            username: username.map(str::to_string),
            password_encrypted,
            sovereignty: sovereignty_to_str(&sovereignty).to_string(),
            created_at: Utc::now(),
            last_sync: None,
        })?;
        Ok(())
    }

    /// Returns a peer by name with its password decrypted.
    pub fn get(&self, name: &str) -> Result<Peer> {
        let record = self.store.get_peer_impl(name)?;
        self.decrypt(record)
    }

    /// Returns every configured peer, passwords decrypted.
    pub fn list(&self) -> Result<Vec<Peer>> {
        self.store
            .list_peers_impl()?
            .into_iter()
            .map(|r| self.decrypt(r))
            .collect()
    }

    /// Removes a peer by name.
    pub fn remove(&self, name: &str) -> Result<()> {
        Ok(self.store.remove_peer_impl(name)?)
    }

    /// Records the timestamp of a successful sync with `name`.
    pub fn touch_last_sync(&self, name: &str, at: DateTime<Utc>) -> Result<()> {
        Ok(self.store.touch_peer_last_sync_impl(name, at)?)
    }

    fn decrypt(&self, record: PeerRecord) -> Result<Peer> {
        let key_path = self.key_path();
        let password = record
            .password_encrypted
            .as_deref()
            .map(|blob| decrypt_password(&key_path, blob))
            .transpose()?;

        Ok(Peer {
            name: record.name,
            url: record.url,
            username: record.username,
            password,
            sovereignty: sovereignty_from_str(&record.sovereignty),
            created_at: record.created_at,
            last_sync: record.last_sync,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn upsert_and_get_roundtrips_password() {
        let store = test_store();
        let vault = PeerVault::new(&store);
        vault
            .upsert(
                "origin",
                "dolthub://org/beads",
                Some("alice"),
                Some("hunter2"),
                Sovereignty::T2,
            )
            .unwrap();

        let peer = vault.get("origin").unwrap();
        assert_eq!(peer.password.as_deref(), Some("hunter2"));
        assert_eq!(peer.sovereignty, Sovereignty::T2);
    }

    #[test]
    fn peer_without_password_decrypts_to_none() {
        let store = test_store();
        let vault = PeerVault::new(&store);
        vault
            .upsert("origin", "dolthub://org/beads", None, None, Sovereignty::None)
            .unwrap();

        let peer = vault.get("origin").unwrap();
        assert!(peer.password.is_none());
    }

    #[test]
    fn rejects_invalid_name() {
        let store = test_store();
        let vault = PeerVault::new(&store);
        let err = vault
            .upsert("9bad", "url", None, None, Sovereignty::None)
            .unwrap_err();
        assert!(matches!(err, FederationError::InvalidPeerName(_)));
    }

    #[test]
    fn list_and_remove() {
        let store = test_store();
        let vault = PeerVault::new(&store);
        vault
            .upsert("a", "url-a", None, None, Sovereignty::None)
            .unwrap();
        vault
            .upsert("b", "url-b", None, None, Sovereignty::None)
            .unwrap();

        assert_eq!(vault.list().unwrap().len(), 2);
        vault.remove("a").unwrap();
        assert_eq!(vault.list().unwrap().len(), 1);
    }
}
