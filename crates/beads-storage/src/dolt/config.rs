//! Key/value config and metadata storage, and dirty-issue tracking.
//!
//! Consolidates what `sqlite/config.rs` and `sqlite/dirty.rs` keep as
//! separate files: all three are small single-table key/value helpers with
//! no shared state beyond the connection, so splitting them into their own
//! files here would just be ceremony.

use std::collections::HashMap;

use chrono::Utc;
use mysql::prelude::Queryable;

use crate::dolt::issues::format_datetime;
use crate::dolt::store::DoltConn;
use crate::dolt::DoltStore;
use crate::error::{Result, StorageError};

pub(crate) fn set_config_on_conn<C: DoltConn>(conn: &mut C, key: &str, value: &str) -> Result<()> {
    conn.exec_drop(
        "REPLACE INTO config (`key`, value) VALUES (?, ?)",
        (key, value),
    )
    .map_err(StorageError::DoltQuery)
}

pub(crate) fn get_config_on_conn<C: DoltConn>(conn: &mut C, key: &str) -> Result<String> {
    let value: Option<String> = conn
        .exec_first("SELECT value FROM config WHERE `key` = ?", (key,))
        .map_err(StorageError::DoltQuery)?;
    value.ok_or_else(|| StorageError::not_found("config", key))
}

pub(crate) fn set_metadata_on_conn<C: DoltConn>(conn: &mut C, key: &str, value: &str) -> Result<()> {
    conn.exec_drop(
        "REPLACE INTO metadata (`key`, value) VALUES (?, ?)",
        (key, value),
    )
    .map_err(StorageError::DoltQuery)
}

pub(crate) fn get_metadata_on_conn<C: DoltConn>(conn: &mut C, key: &str) -> Result<String> {
    let value: Option<String> = conn
        .exec_first("SELECT value FROM metadata WHERE `key` = ?", (key,))
        .map_err(StorageError::DoltQuery)?;
    value.ok_or_else(|| StorageError::not_found("metadata", key))
}

pub(crate) fn get_dirty_issues_on_conn<C: DoltConn>(conn: &mut C) -> Result<Vec<String>> {
    conn.query("SELECT id FROM dirty_issues ORDER BY dirtied_at ASC, id ASC")
        .map_err(StorageError::DoltQuery)
}

pub(crate) fn clear_dirty_on_conn<C: DoltConn>(conn: &mut C, ids: &[String]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!("DELETE FROM dirty_issues WHERE id IN ({placeholders})");
    let params: Vec<mysql::Value> = ids.iter().map(|id| id.clone().into()).collect();
    conn.exec_drop(sql, mysql::Params::Positional(params))
        .map_err(StorageError::DoltQuery)
}

pub(crate) fn mark_dirty_on_conn<C: DoltConn>(conn: &mut C, id: &str) -> Result<()> {
    conn.exec_drop(
        "REPLACE INTO dirty_issues (id, dirtied_at) VALUES (?, ?)",
        (id, format_datetime(&Utc::now())),
    )
    .map_err(StorageError::DoltQuery)
}

impl DoltStore {
    pub(crate) fn set_config_impl(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| set_config_on_conn(conn, key, value))
    }

    pub(crate) fn get_config_impl(&self, key: &str) -> Result<String> {
        self.with_conn(|conn| get_config_on_conn(conn, key))
    }

    pub(crate) fn get_all_config_impl(&self) -> Result<HashMap<String, String>> {
        self.with_conn(|conn| {
            let rows: Vec<(String, String)> = conn
                .query("SELECT `key`, value FROM config ORDER BY `key`")
                .map_err(StorageError::DoltQuery)?;
            Ok(rows.into_iter().collect())
        })
    }

    pub(crate) fn get_dirty_issues_impl(&self) -> Result<Vec<String>> {
        self.with_conn(get_dirty_issues_on_conn)
    }

    pub(crate) fn clear_dirty_impl(&self, ids: &[String]) -> Result<()> {
        self.with_conn(|conn| clear_dirty_on_conn(conn, ids))
    }
}
