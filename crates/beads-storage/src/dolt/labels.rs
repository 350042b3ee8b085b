//! Label CRUD, mirroring `sqlite/labels.rs`.

use chrono::Utc;
use mysql::prelude::Queryable;
use mysql::Row;

use beads_core::enums::EventType;
use beads_core::issue::Issue;

use crate::dolt::issues::{emit_event, mark_dirty, scan_issue, ISSUE_COLUMNS};
use crate::dolt::store::DoltConn;
use crate::dolt::DoltStore;
use crate::error::{Result, StorageError};

pub(crate) fn add_label_on_conn<C: DoltConn>(
    conn: &mut C,
    issue_id: &str,
    label: &str,
    actor: &str,
) -> Result<()> {
    conn.exec_drop(
        "INSERT IGNORE INTO labels (issue_id, label) VALUES (?, ?)",
        (issue_id, label),
    )
    .map_err(StorageError::DoltQuery)?;

    emit_event(conn, issue_id, EventType::LabelAdded, actor, None, Some(label), None, &Utc::now())?;
    mark_dirty(conn, issue_id)
}

pub(crate) fn remove_label_on_conn<C: DoltConn>(
    conn: &mut C,
    issue_id: &str,
    label: &str,
    actor: &str,
) -> Result<()> {
    conn.exec_drop(
        "DELETE FROM labels WHERE issue_id = ? AND label = ?",
        (issue_id, label),
    )
    .map_err(StorageError::DoltQuery)?;

    if conn.affected() == 0 {
        return Err(StorageError::not_found("label", format!("{issue_id}:{label}")));
    }

    emit_event(conn, issue_id, EventType::LabelRemoved, actor, Some(label), None, None, &Utc::now())?;
    mark_dirty(conn, issue_id)
}

pub(crate) fn get_labels_on_conn<C: DoltConn>(conn: &mut C, issue_id: &str) -> Result<Vec<String>> {
    conn.exec(
        "SELECT label FROM labels WHERE issue_id = ? ORDER BY label",
        (issue_id,),
    )
    .map_err(StorageError::DoltQuery)
}

impl DoltStore {
    pub(crate) fn add_label_impl(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        self.with_conn(|conn| add_label_on_conn(conn, issue_id, label, actor))
    }

    pub(crate) fn remove_label_impl(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        self.with_conn(|conn| remove_label_on_conn(conn, issue_id, label, actor))
    }

    pub(crate) fn get_labels_impl(&self, issue_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| get_labels_on_conn(conn, issue_id))
    }

    pub(crate) fn get_issues_by_label_impl(&self, label: &str) -> Result<Vec<Issue>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM labels l JOIN issues i ON i.id = l.issue_id \
                 WHERE l.label = ? ORDER BY i.created_at DESC",
                ISSUE_COLUMNS.split(", ").map(|c| format!("i.{c} AS {c}")).collect::<Vec<_>>().join(", ")
            );
            let rows: Vec<Row> = conn.exec(sql, (label,)).map_err(StorageError::DoltQuery)?;
            rows.iter().map(scan_issue).collect()
        })
    }
}
