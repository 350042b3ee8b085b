//! [`SqliteStore`] -- SQLite-backed storage implementation.

use std::path::Path;
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{Result, StorageError};
use crate::sqlite::schema;

/// Number of times a `SQLITE_BUSY` write is retried before giving up.
const BUSY_RETRY_ATTEMPTS: u32 = 5;

/// Starting backoff delay between busy retries; doubles each attempt.
const BUSY_RETRY_BASE_DELAY: Duration = Duration::from_millis(10);

/// SQLite-backed implementation of the [`Storage`](crate::traits::Storage) trait.
///
/// Connections are pooled via `r2d2` rather than serialized behind a single
/// mutex, so readers don't block each other while a writer holds `BEGIN
/// IMMEDIATE`. Each checked-out connection still serializes its own writes
/// at the SQLite level; busy errors are retried with exponential backoff.
pub struct SqliteStore {
    /// The connection pool.
    pub(crate) pool: Pool<SqliteConnectionManager>,
    /// The filesystem path this store was opened from, if any (`None` for
    /// in-memory stores). Used by the federation layer to derive the
    /// credential-at-rest encryption key.
    pub(crate) db_path: Option<std::path::PathBuf>,
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at the given path.
    ///
    /// Enables WAL mode and foreign keys, then initialises the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(?path, "opening SQLite database");

        let manager = SqliteConnectionManager::file(path).with_init(configure_new_connection);
        let pool = Pool::builder()
            .max_size(16)
            .build(manager)
            .map_err(|e| StorageError::Connection(format!("failed to open {}: {e}", path.display())))?;

        let store = Self {
            pool,
            db_path: Some(path.to_path_buf()),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Opens an in-memory SQLite database (useful for tests).
    ///
    /// Uses a single-connection pool, since each unnamed `:memory:`
    /// connection is otherwise its own isolated database and a pool of more
    /// than one would not share state.
    pub fn open_in_memory() -> Result<Self> {
        debug!("opening in-memory SQLite database");
        let manager = SqliteConnectionManager::memory().with_init(configure_new_connection);
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StorageError::Connection(format!("failed to open in-memory db: {e}")))?;

        let store = Self {
            pool,
            db_path: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Creates all tables and indexes if they do not exist, then runs
    /// migrations.
    fn init_schema(&self) -> Result<()> {
        let conn = self.checkout()?;

        // Check if schema is already at current version.
        let version: std::result::Result<i32, _> = conn.query_row(
            "SELECT value FROM config WHERE key = 'schema_version'",
            [],
            |row| {
                let v: String = row.get(0)?;
                Ok(v.parse::<i32>().unwrap_or(0))
            },
        );
        if let Ok(v) = version {
            if v >= schema::CURRENT_SCHEMA_VERSION {
                debug!(version = v, "schema already at current version, skipping init");
                return Ok(());
            }
        }

        // Execute DDL statements.
        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt).map_err(|e| StorageError::Migration {
                name: "init_schema".into(),
                reason: format!("{e}\nStatement: {}", truncate(stmt, 120)),
            })?;
        }

        // Insert default config (INSERT OR IGNORE to be idempotent).
        for &(key, value) in schema::DEFAULT_CONFIG {
            conn.execute(
                "INSERT OR IGNORE INTO config (key, value) VALUES (?1, ?2)",
                rusqlite::params![key, value],
            )
            .map_err(|e| StorageError::Migration {
                name: "default_config".into(),
                reason: format!("failed to insert {key}: {e}"),
            })?;
        }

        // Run migrations.
        Self::run_migrations_on_conn(&conn)?;

        // Mark schema version.
        conn.execute(
            "INSERT OR REPLACE INTO config (key, value) VALUES ('schema_version', ?1)",
            rusqlite::params![schema::CURRENT_SCHEMA_VERSION.to_string()],
        )
        .map_err(|e| StorageError::Migration {
            name: "schema_version".into(),
            reason: e.to_string(),
        })?;

        info!("schema initialized (version {})", schema::CURRENT_SCHEMA_VERSION);
        Ok(())
    }

    /// Applies pending migrations tracked via the `metadata` table.
    fn run_migrations_on_conn(conn: &Connection) -> Result<()> {
        for &(name, sql) in schema::MIGRATIONS {
            let key = format!("migration:{name}");
            let already_applied: bool = conn
                .query_row(
                    "SELECT COUNT(*) FROM metadata WHERE key = ?1",
                    rusqlite::params![key],
                    |row| row.get::<_, i32>(0),
                )
                .unwrap_or(0)
                > 0;

            if already_applied {
                debug!(name, "migration already applied, skipping");
                continue;
            }

            debug!(name, "applying migration");
            conn.execute_batch(sql).map_err(|e| StorageError::Migration {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

            conn.execute(
                "INSERT INTO metadata (key, value) VALUES (?1, ?2)",
                rusqlite::params![key, "applied"],
            )
            .map_err(|e| StorageError::Migration {
                name: name.to_string(),
                reason: format!("failed to mark migration: {e}"),
            })?;
        }
        Ok(())
    }

    /// Checks out a pooled connection. Helper used by all operation modules.
    pub(crate) fn lock_conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.checkout()
    }

    fn checkout(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(format!("failed to check out connection: {e}")))
    }

    /// Runs `f` against a fresh connection, retrying `SQLITE_BUSY` with
    /// exponential backoff before surfacing [`StorageError::Busy`].
    pub(crate) fn with_retry<T>(&self, mut f: impl FnMut(&Connection) -> Result<T>) -> Result<T> {
        let mut delay = BUSY_RETRY_BASE_DELAY;
        for attempt in 0..BUSY_RETRY_ATTEMPTS {
            let conn = self.checkout()?;
            match f(&conn) {
                Err(StorageError::Query(rusqlite::Error::SqliteFailure(e, _)))
                    if e.code == rusqlite::ErrorCode::DatabaseBusy =>
                {
                    warn!(attempt, ?delay, "database busy, retrying");
                    std::thread::sleep(delay);
                    delay *= 2;
                    continue;
                }
                other => return other,
            }
        }
        Err(StorageError::Busy(format!(
            "database still locked after {BUSY_RETRY_ATTEMPTS} attempts"
        )))
    }
}

/// Sets per-connection pragmas for every connection the pool creates.
fn configure_new_connection(conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

/// Truncates a string for error messages.
fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        format!("{}...", &s[..max])
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory() {
        let store = SqliteStore::open_in_memory().unwrap();
        // Verify tables exist by querying config.
        let conn = store.lock_conn().unwrap();
        let count: i32 = conn
            .query_row("SELECT COUNT(*) FROM config", [], |row| row.get(0))
            .unwrap();
        assert!(count > 0, "default config should be inserted");
    }

    #[test]
    fn schema_version_set() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        let version: String = conn
            .query_row(
                "SELECT value FROM config WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, schema::CURRENT_SCHEMA_VERSION.to_string());
    }

    #[test]
    fn idempotent_init() {
        let store = SqliteStore::open_in_memory().unwrap();
        // Re-init should succeed without error.
        store.init_schema().unwrap();
    }
}
