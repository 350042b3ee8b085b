//! Dolt-backed ([DOLT](https://www.dolthub.com/)) storage implementation.
//!
//! Dolt speaks the MySQL wire protocol and layers version control on top of
//! ordinary SQL tables: branches, commits and merges are all system
//! procedures and system tables rather than a separate API. This backend
//! therefore looks a lot like [`crate::sqlite`] for the CRUD surface (same
//! `_on_conn`/`*_impl` split, same row-scanning and dynamic query-builder
//! style) plus a [`versioning`] module for the operations that have no
//! sqlite analogue at all.

mod comments;
mod config;
mod dependencies;
mod issues;
mod labels;
mod queries;
pub mod schema;
mod store;
mod transaction;
pub mod versioning;

pub use store::DoltStore;
pub use transaction::DoltTx;
pub use versioning::{Branch, Commit, Conflict, DiffEntry, HistoryEntry};

use mysql::Row;

use crate::error::{Result, StorageError};

/// Reads a named column out of a Dolt result row, turning a missing column
/// or a type mismatch into [`StorageError::Corrupt`] rather than panicking
/// (the way `rusqlite::Row::get` would with `?` on a malformed row).
pub(crate) fn col<T: mysql::prelude::FromValue>(row: &Row, name: &str) -> Result<T> {
    match row.get_opt::<T, _>(name) {
        Some(Ok(v)) => Ok(v),
        Some(Err(e)) => Err(StorageError::Corrupt(format!("column {name}: {e}"))),
        None => Err(StorageError::Corrupt(format!("missing column {name}"))),
    }
}
