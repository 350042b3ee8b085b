//! Federation peer record CRUD for [`SqliteStore`].
//!
//! Passwords are stored as opaque ciphertext blobs -- this module never sees
//! plaintext credentials or performs encryption; that is `beads-federation`'s
//! job, layered on top of [`PeerRecord`].

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::error::{Result, StorageError};
use crate::sqlite::issues::format_datetime;
use crate::sqlite::store::SqliteStore;

/// A valid peer name is a leading letter followed by alphanumerics, `-`, `_`.
pub fn is_valid_peer_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    name.len() <= 64 && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// A federation peer record as stored in `federation_peers`.
///
/// `password_encrypted` is an opaque AES-GCM ciphertext blob (nonce-prefixed)
/// produced by the federation layer; this crate treats it as bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub name: String,
    pub url: String,
    pub username: Option<String>,
    pub password_encrypted: Option<Vec<u8>>,
    pub sovereignty: String,
    pub created_at: DateTime<Utc>,
    pub last_sync: Option<DateTime<Utc>>,
}

fn scan_peer(row: &rusqlite::Row<'_>) -> rusqlite::Result<PeerRecord> {
    let created_at: String = row.get(5)?;
    let last_sync: Option<String> = row.get(6)?;
    Ok(PeerRecord {
        name: row.get(0)?,
        url: row.get(1)?,
        username: row.get(2)?,
        password_encrypted: row.get(3)?,
        sovereignty: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        created_at: crate::sqlite::issues::parse_datetime(&created_at),
        last_sync: last_sync.map(|s| crate::sqlite::issues::parse_datetime(&s)),
    })
}

const PEER_COLUMNS: &str =
    "name, url, username, password_encrypted, sovereignty, created_at, last_sync";

pub(crate) fn upsert_peer_on_conn(conn: &Connection, peer: &PeerRecord) -> Result<()> {
    if !is_valid_peer_name(&peer.name) {
        return Err(StorageError::validation(format!(
            "invalid peer name: {}",
            peer.name
        )));
    }
    conn.execute(
        "INSERT INTO federation_peers (name, url, username, password_encrypted, sovereignty, created_at, last_sync)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(name) DO UPDATE SET
            url = excluded.url,
            username = excluded.username,
            password_encrypted = excluded.password_encrypted,
            sovereignty = excluded.sovereignty,
            last_sync = excluded.last_sync",
        params![
            peer.name,
            peer.url,
            peer.username,
            peer.password_encrypted,
            peer.sovereignty,
            format_datetime(&peer.created_at),
            peer.last_sync.as_ref().map(format_datetime),
        ],
    )?;
    Ok(())
}

pub(crate) fn get_peer_on_conn(conn: &Connection, name: &str) -> Result<PeerRecord> {
    conn.query_row(
        &format!("SELECT {PEER_COLUMNS} FROM federation_peers WHERE name = ?1"),
        params![name],
        scan_peer,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StorageError::not_found("peer", name),
        other => StorageError::Query(other),
    })
}

pub(crate) fn list_peers_on_conn(conn: &Connection) -> Result<Vec<PeerRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PEER_COLUMNS} FROM federation_peers ORDER BY name"
    ))?;
    let rows = stmt.query_map([], scan_peer)?;
    let mut peers = Vec::new();
    for row in rows {
        peers.push(row?);
    }
    Ok(peers)
}

pub(crate) fn remove_peer_on_conn(conn: &Connection, name: &str) -> Result<()> {
    let affected = conn.execute(
        "DELETE FROM federation_peers WHERE name = ?1",
        params![name],
    )?;
    if affected == 0 {
        return Err(StorageError::not_found("peer", name));
    }
    Ok(())
}

pub(crate) fn touch_peer_last_sync_on_conn(
    conn: &Connection,
    name: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    let affected = conn.execute(
        "UPDATE federation_peers SET last_sync = ?1 WHERE name = ?2",
        params![format_datetime(&at), name],
    )?;
    if affected == 0 {
        return Err(StorageError::not_found("peer", name));
    }
    Ok(())
}

impl SqliteStore {
    /// Inserts or updates a peer record by name.
    pub fn upsert_peer_impl(&self, peer: &PeerRecord) -> Result<()> {
        self.with_retry(|conn| upsert_peer_on_conn(conn, peer))
    }

    /// Returns a peer record by name.
    pub fn get_peer_impl(&self, name: &str) -> Result<PeerRecord> {
        let conn = self.lock_conn()?;
        get_peer_on_conn(&conn, name)
    }

    /// Returns all configured peers, ordered by name.
    pub fn list_peers_impl(&self) -> Result<Vec<PeerRecord>> {
        let conn = self.lock_conn()?;
        list_peers_on_conn(&conn)
    }

    /// Removes a peer record by name.
    pub fn remove_peer_impl(&self, name: &str) -> Result<()> {
        self.with_retry(|conn| remove_peer_on_conn(conn, name))
    }

    /// Records the timestamp of the most recent successful sync with a peer.
    pub fn touch_peer_last_sync_impl(&self, name: &str, at: DateTime<Utc>) -> Result<()> {
        self.with_retry(|conn| touch_peer_last_sync_on_conn(conn, name, at))
    }

    /// Returns the filesystem path this store was opened from, if any.
    ///
    /// Used by the federation layer to derive the credential-at-rest
    /// encryption key (SHA-256 of the path plus a version-tagged constant).
    pub fn db_path(&self) -> Option<&std::path::Path> {
        self.db_path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn sample_peer(name: &str) -> PeerRecord {
        PeerRecord {
            name: name.to_string(),
            url: "dolthub://org/beads".to_string(),
            username: Some("alice".to_string()),
            password_encrypted: Some(vec![1, 2, 3, 4]),
            sovereignty: "T2".to_string(),
            created_at: Utc::now(),
            last_sync: None,
        }
    }

    #[test]
    fn upsert_and_get_peer() {
        let store = test_store();
        store.upsert_peer_impl(&sample_peer("origin")).unwrap();

        let got = store.get_peer_impl("origin").unwrap();
        assert_eq!(got.url, "dolthub://org/beads");
        assert_eq!(got.password_encrypted, Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn upsert_is_idempotent_update() {
        let store = test_store();
        store.upsert_peer_impl(&sample_peer("origin")).unwrap();

        let mut updated = sample_peer("origin");
        updated.url = "dolthub://org/beads-v2".to_string();
        store.upsert_peer_impl(&updated).unwrap();

        let got = store.get_peer_impl("origin").unwrap();
        assert_eq!(got.url, "dolthub://org/beads-v2");
    }

    #[test]
    fn rejects_invalid_peer_name() {
        let store = test_store();
        let err = store.upsert_peer_impl(&sample_peer("1bad")).unwrap_err();
        assert!(matches!(err, StorageError::Validation { .. }));
    }

    #[test]
    fn list_peers_sorted_by_name() {
        let store = test_store();
        store.upsert_peer_impl(&sample_peer("zeta")).unwrap();
        store.upsert_peer_impl(&sample_peer("alpha")).unwrap();

        let peers = store.list_peers_impl().unwrap();
        let names: Vec<_> = peers.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn remove_peer() {
        let store = test_store();
        store.upsert_peer_impl(&sample_peer("origin")).unwrap();
        store.remove_peer_impl("origin").unwrap();
        assert!(store.get_peer_impl("origin").unwrap_err().is_not_found());
    }

    #[test]
    fn touch_last_sync() {
        let store = test_store();
        store.upsert_peer_impl(&sample_peer("origin")).unwrap();
        let now = Utc::now();
        store.touch_peer_last_sync_impl("origin", now).unwrap();

        let got = store.get_peer_impl("origin").unwrap();
        assert!(got.last_sync.is_some());
    }
}
