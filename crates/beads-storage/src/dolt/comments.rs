//! Comment and event (audit trail) CRUD, mirroring `sqlite/comments.rs`.

use chrono::{DateTime, Utc};
use mysql::prelude::Queryable;
use mysql::Row;

use beads_core::comment::{Comment, Event};
use beads_core::enums::EventType;

use crate::dolt::issues::{emit_event, format_datetime, parse_datetime};
use crate::dolt::store::DoltConn;
use crate::dolt::{col, DoltStore};
use crate::error::{Result, StorageError};

fn scan_comment(row: &Row) -> Result<Comment> {
    Ok(Comment {
        id: col(row, "id")?,
        issue_id: col(row, "issue_id")?,
        author: col(row, "author")?,
        text: col(row, "text")?,
        created_at: parse_datetime(&col::<String>(row, "created_at")?),
    })
}

fn scan_event(row: &Row) -> Result<Event> {
    Ok(Event {
        id: col(row, "id")?,
        issue_id: col(row, "issue_id")?,
        event_type: EventType::from(col::<String>(row, "event_type")?.as_str()),
        actor: col(row, "actor")?,
        old_value: col(row, "old_value")?,
        new_value: col(row, "new_value")?,
        comment: col(row, "comment")?,
        created_at: parse_datetime(&col::<String>(row, "created_at")?),
    })
}

/// Inserts a comment and emits a `Commented` event, as `Storage::add_comment` does.
pub(crate) fn add_comment_on_conn<C: DoltConn>(
    conn: &mut C,
    issue_id: &str,
    author: &str,
    text: &str,
) -> Result<Comment> {
    let now = Utc::now();
    conn.exec_drop(
        "INSERT INTO comments (issue_id, author, text, created_at) VALUES (?, ?, ?, ?)",
        (issue_id, author, text, format_datetime(&now)),
    )
    .map_err(StorageError::DoltQuery)?;
    let id = conn.last_id().unwrap_or(0) as i64;

    emit_event(conn, issue_id, EventType::Commented, author, None, None, Some(text), &now)?;

    Ok(Comment {
        id,
        issue_id: issue_id.to_string(),
        author: author.to_string(),
        text: text.to_string(),
        created_at: now,
    })
}

/// Inserts a comment without emitting an event -- used from inside a
/// transaction, which batches its own event emission at commit.
pub(crate) fn add_comment_no_event<C: DoltConn>(
    conn: &mut C,
    issue_id: &str,
    author: &str,
    text: &str,
) -> Result<Comment> {
    let now = Utc::now();
    conn.exec_drop(
        "INSERT INTO comments (issue_id, author, text, created_at) VALUES (?, ?, ?, ?)",
        (issue_id, author, text, format_datetime(&now)),
    )
    .map_err(StorageError::DoltQuery)?;
    let id = conn.last_id().unwrap_or(0) as i64;
    Ok(Comment {
        id,
        issue_id: issue_id.to_string(),
        author: author.to_string(),
        text: text.to_string(),
        created_at: now,
    })
}

/// Inserts a comment with an explicit `created_at` (import path), emitting no event.
pub(crate) fn import_comment_on_conn<C: DoltConn>(
    conn: &mut C,
    issue_id: &str,
    author: &str,
    text: &str,
    created_at: &DateTime<Utc>,
) -> Result<Comment> {
    conn.exec_drop(
        "INSERT INTO comments (issue_id, author, text, created_at) VALUES (?, ?, ?, ?)",
        (issue_id, author, text, format_datetime(created_at)),
    )
    .map_err(StorageError::DoltQuery)?;
    let id = conn.last_id().unwrap_or(0) as i64;
    Ok(Comment {
        id,
        issue_id: issue_id.to_string(),
        author: author.to_string(),
        text: text.to_string(),
        created_at: *created_at,
    })
}

pub(crate) fn get_comments_on_conn<C: DoltConn>(conn: &mut C, issue_id: &str) -> Result<Vec<Comment>> {
    let rows: Vec<Row> = conn
        .exec(
            "SELECT id, issue_id, author, text, created_at FROM comments \
             WHERE issue_id = ? ORDER BY created_at ASC",
            (issue_id,),
        )
        .map_err(StorageError::DoltQuery)?;
    rows.iter().map(scan_comment).collect()
}

impl DoltStore {
    pub(crate) fn add_comment_impl(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment> {
        self.with_conn(|conn| add_comment_on_conn(conn, issue_id, author, text))
    }

    pub(crate) fn get_comments_impl(&self, issue_id: &str) -> Result<Vec<Comment>> {
        self.with_conn(|conn| get_comments_on_conn(conn, issue_id))
    }

    pub(crate) fn get_events_impl(&self, issue_id: &str, limit: i32) -> Result<Vec<Event>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT id, issue_id, event_type, actor, old_value, new_value, comment, created_at \
                 FROM events WHERE issue_id = ? ORDER BY created_at DESC LIMIT {}",
                limit.max(0)
            );
            let rows: Vec<Row> = conn.exec(sql, (issue_id,)).map_err(StorageError::DoltQuery)?;
            rows.iter().map(scan_event).collect()
        })
    }

    pub(crate) fn get_all_events_since_impl(&self, since_id: i64) -> Result<Vec<Event>> {
        self.with_conn(|conn| {
            let rows: Vec<Row> = conn
                .exec(
                    "SELECT id, issue_id, event_type, actor, old_value, new_value, comment, created_at \
                     FROM events WHERE id > ? ORDER BY id ASC",
                    (since_id,),
                )
                .map_err(StorageError::DoltQuery)?;
            rows.iter().map(scan_event).collect()
        })
    }
}
