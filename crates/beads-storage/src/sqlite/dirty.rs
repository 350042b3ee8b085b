//! Dirty-issue tracking for incremental export.
//!
//! Every write path that changes an issue's persisted form (create, update,
//! close, label, dependency) marks the issue dirty here. Deleting an issue
//! clears its mark since there is no longer a persisted form to export.
//! Marks are only recorded on the successful commit path -- a write that
//! errors mid-statement never reaches these calls because `?` propagates
//! before they run.

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::sqlite::issues::format_datetime;

pub(crate) fn mark_dirty_on_conn(conn: &Connection, issue_id: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO dirty_issues (id, dirtied_at) VALUES (?1, ?2)",
        params![issue_id, format_datetime(&chrono::Utc::now())],
    )?;
    Ok(())
}

pub(crate) fn clear_dirty_on_conn(conn: &Connection, ids: &[String]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let placeholders = std::iter::repeat("?")
        .take(ids.len())
        .collect::<Vec<_>>()
        .join(",");
    conn.execute(
        &format!("DELETE FROM dirty_issues WHERE id IN ({placeholders})"),
        rusqlite::params_from_iter(ids.iter()),
    )?;
    Ok(())
}

pub(crate) fn get_dirty_issues_on_conn(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM dirty_issues ORDER BY dirtied_at ASC, id ASC")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

use crate::sqlite::store::SqliteStore;

impl SqliteStore {
    /// Returns the IDs of issues dirtied since the last export, oldest first.
    pub fn get_dirty_issues_impl(&self) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;
        get_dirty_issues_on_conn(&conn)
    }

    /// Clears the dirty mark for the given issue IDs.
    pub fn clear_dirty_impl(&self, ids: &[String]) -> Result<()> {
        self.with_retry(|conn| clear_dirty_on_conn(conn, ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beads_core::issue::IssueBuilder;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn create_marks_dirty() {
        let store = test_store();
        let issue = IssueBuilder::new("Issue").id("bd-dirty1").build();
        store.create_issue_impl(&issue, "alice").unwrap();

        let dirty = store.get_dirty_issues_impl().unwrap();
        assert_eq!(dirty, vec!["bd-dirty1".to_string()]);
    }

    #[test]
    fn clear_dirty_removes_marks() {
        let store = test_store();
        let issue = IssueBuilder::new("Issue").id("bd-dirty2").build();
        store.create_issue_impl(&issue, "alice").unwrap();

        store
            .clear_dirty_impl(&["bd-dirty2".to_string()])
            .unwrap();
        assert!(store.get_dirty_issues_impl().unwrap().is_empty());
    }

    #[test]
    fn update_remarks_dirty_after_clear() {
        let store = test_store();
        let issue = IssueBuilder::new("Issue").id("bd-dirty3").build();
        store.create_issue_impl(&issue, "alice").unwrap();
        store
            .clear_dirty_impl(&["bd-dirty3".to_string()])
            .unwrap();

        let updates = crate::traits::IssueUpdates {
            title: Some("New title".to_string()),
            ..Default::default()
        };
        store
            .update_issue_impl("bd-dirty3", &updates, "alice")
            .unwrap();

        assert_eq!(
            store.get_dirty_issues_impl().unwrap(),
            vec!["bd-dirty3".to_string()]
        );
    }
}
