//! Issue CRUD over a Dolt connection.
//!
//! Mirrors `sqlite/issues.rs`'s split between connection-level `_on_conn`
//! helpers (usable from both a plain connection and a transaction) and
//! `DoltStore` methods that check out a connection and delegate.

use chrono::{DateTime, NaiveDateTime, Utc};
use mysql::prelude::Queryable;
use mysql::{Params, Row, Value};

use beads_core::enums::{EventType, IssueType, Status};
use beads_core::filter::IssueFilter;
use beads_core::issue::Issue;

use crate::dolt::store::DoltConn;
use crate::dolt::{col, DoltStore};
use crate::error::{Result, StorageError};
use crate::traits::IssueUpdates;

/// Column list used by every issue SELECT, in table order.
pub(crate) const ISSUE_COLUMNS: &str = "id, content_hash, title, description, design, \
    acceptance_criteria, notes, status, priority, issue_type, assignee, estimated_minutes, \
    created_at, created_by, owner, updated_at, closed_at, closed_by_session, deleted_at, \
    external_ref, spec_id, ephemeral, pinned, is_template, crystallizes, source_system, \
    metadata, source_repo, close_reason, await_type, await_id, timeout_ns, waiters, \
    hook_bead, role_bead, agent_state, last_activity, due_at, defer_until";

/// Formats a timestamp the same way `sqlite/issues.rs` does, so rows written
/// by one backend sort and parse identically when read by the other.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Parses a timestamp column, tolerating a few legacy formats and never
/// panicking on malformed input -- defaults to "now" rather than erroring,
/// matching the sqlite backend's leniency on read.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return DateTime::from_naive_utc_and_offset(naive, Utc);
        }
    }
    Utc::now()
}

fn opt_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|s| parse_datetime(&s))
}

pub(crate) fn scan_issue(row: &Row) -> Result<Issue> {
    let metadata_raw: String = col(row, "metadata")?;
    let waiters_raw: String = col(row, "waiters")?;
    let timeout_ns: i64 = col(row, "timeout_ns")?;

    Ok(Issue {
        id: col(row, "id")?,
        content_hash: col::<Option<String>>(row, "content_hash")?.unwrap_or_default(),
        title: col(row, "title")?,
        description: col(row, "description")?,
        design: col(row, "design")?,
        acceptance_criteria: col(row, "acceptance_criteria")?,
        notes: col(row, "notes")?,
        spec_id: col(row, "spec_id")?,
        status: Status::from(col::<String>(row, "status")?.as_str()),
        priority: col(row, "priority")?,
        issue_type: IssueType::from(col::<String>(row, "issue_type")?.as_str()),
        assignee: col(row, "assignee")?,
        owner: col(row, "owner")?,
        estimated_minutes: col(row, "estimated_minutes")?,
        created_at: parse_datetime(&col::<String>(row, "created_at")?),
        created_by: col(row, "created_by")?,
        updated_at: parse_datetime(&col::<String>(row, "updated_at")?),
        closed_at: opt_datetime(col(row, "closed_at")?),
        close_reason: col(row, "close_reason")?,
        closed_by_session: col(row, "closed_by_session")?,
        deleted_at: opt_datetime(col(row, "deleted_at")?),
        due_at: opt_datetime(col(row, "due_at")?),
        defer_until: opt_datetime(col(row, "defer_until")?),
        external_ref: col(row, "external_ref")?,
        source_system: col(row, "source_system")?,
        metadata: if metadata_raw.trim().is_empty() {
            None
        } else {
            Some(serde_json::from_str(&metadata_raw)?)
        },
        source_repo: col(row, "source_repo")?,
        labels: Vec::new(),
        dependencies: Vec::new(),
        comments: Vec::new(),
        ephemeral: col::<i8>(row, "ephemeral")? != 0,
        pinned: col::<i8>(row, "pinned")? != 0,
        is_template: col::<i8>(row, "is_template")? != 0,
        crystallizes: col::<i8>(row, "crystallizes")? != 0,
        await_type: col(row, "await_type")?,
        await_id: col(row, "await_id")?,
        timeout: if timeout_ns > 0 {
            Some(std::time::Duration::from_nanos(timeout_ns as u64))
        } else {
            None
        },
        waiters: if waiters_raw.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&waiters_raw)?
        },
        hook_bead: col(row, "hook_bead")?,
        role_bead: col(row, "role_bead")?,
        agent_state: col::<Option<String>>(row, "agent_state")?.unwrap_or_default().into(),
        last_activity: opt_datetime(col(row, "last_activity")?),
    })
}

pub(crate) fn emit_event<C: DoltConn>(
    conn: &mut C,
    issue_id: &str,
    event_type: EventType,
    actor: &str,
    old_value: Option<&str>,
    new_value: Option<&str>,
    comment: Option<&str>,
    created_at: &DateTime<Utc>,
) -> Result<()> {
    conn.exec_drop(
        "INSERT INTO events (issue_id, event_type, actor, old_value, new_value, comment, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        (
            issue_id,
            event_type.as_str(),
            actor,
            old_value,
            new_value,
            comment,
            format_datetime(created_at),
        ),
    )
    .map_err(StorageError::DoltQuery)
}

pub(crate) fn mark_dirty<C: DoltConn>(conn: &mut C, id: &str) -> Result<()> {
    let now = format_datetime(&Utc::now());
    conn.exec_drop(
        "REPLACE INTO dirty_issues (id, dirtied_at) VALUES (?, ?)",
        (id, now),
    )
    .map_err(StorageError::DoltQuery)
}

pub(crate) fn insert_issue<C: DoltConn>(conn: &mut C, issue: &Issue, actor: &str) -> Result<()> {
    let metadata = match &issue.metadata {
        Some(v) => v.get().to_string(),
        None => "{}".to_string(),
    };
    let waiters = serde_json::to_string(&issue.waiters)?;
    let timeout_ns: i64 = issue.timeout.map(|d| d.as_nanos() as i64).unwrap_or(0);

    let params: Vec<Value> = vec![
        issue.id.clone().into(),
        issue.content_hash.clone().into(),
        issue.title.clone().into(),
        issue.description.clone().into(),
        issue.design.clone().into(),
        issue.acceptance_criteria.clone().into(),
        issue.notes.clone().into(),
        issue.status.as_str().into(),
        issue.priority.into(),
        issue.issue_type.as_str().into(),
        issue.assignee.clone().into(),
        issue.estimated_minutes.into(),
        format_datetime(&issue.created_at).into(),
        issue.created_by.clone().into(),
        issue.owner.clone().into(),
        format_datetime(&issue.updated_at).into(),
        issue.closed_at.map(|d| format_datetime(&d)).into(),
        issue.closed_by_session.clone().into(),
        issue.deleted_at.map(|d| format_datetime(&d)).into(),
        issue.external_ref.clone().into(),
        issue.spec_id.clone().into(),
        (issue.ephemeral as i8).into(),
        (issue.pinned as i8).into(),
        (issue.is_template as i8).into(),
        (issue.crystallizes as i8).into(),
        issue.source_system.clone().into(),
        metadata.into(),
        issue.source_repo.clone().into(),
        issue.close_reason.clone().into(),
        issue.await_type.clone().into(),
        issue.await_id.clone().into(),
        timeout_ns.into(),
        waiters.into(),
        issue.hook_bead.clone().into(),
        issue.role_bead.clone().into(),
        issue.agent_state.to_string().into(),
        issue.last_activity.map(|d| format_datetime(&d)).into(),
        issue.due_at.map(|d| format_datetime(&d)).into(),
        issue.defer_until.map(|d| format_datetime(&d)).into(),
    ];

    conn.exec_drop(
        format!(
            "INSERT INTO issues ({ISSUE_COLUMNS}) VALUES ({})",
            "?, ".repeat(39).trim_end_matches(", ")
        ),
        Params::Positional(params),
    )
    .map_err(StorageError::DoltQuery)?;

    emit_event(
        conn,
        &issue.id,
        EventType::Created,
        actor,
        None,
        None,
        None,
        &issue.created_at,
    )?;
    mark_dirty(conn, &issue.id)
}

pub(crate) fn get_issue_on_conn<C: DoltConn>(conn: &mut C, id: &str) -> Result<Issue> {
    let row: Option<Row> = conn
        .exec_first(format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?"), (id,))
        .map_err(StorageError::DoltQuery)?;
    match row {
        Some(r) => scan_issue(&r),
        None => Err(StorageError::not_found("issue", id)),
    }
}

pub(crate) fn update_issue_on_conn<C: DoltConn>(
    conn: &mut C,
    id: &str,
    updates: &IssueUpdates,
    actor: &str,
) -> Result<()> {
    let mut sets: Vec<String> = Vec::new();
    let mut params: Vec<Value> = Vec::new();

    macro_rules! add_field {
        ($col:literal, $val:expr) => {
            if let Some(v) = $val {
                sets.push(format!("{} = ?", $col));
                params.push(v.clone().into());
            }
        };
    }

    macro_rules! add_nested_field {
        ($col:literal, $val:expr) => {
            if let Some(inner) = $val {
                sets.push(format!("{} = ?", $col));
                params.push(inner.clone().into());
            }
        };
    }

    macro_rules! add_bool_field {
        ($col:literal, $val:expr) => {
            if let Some(v) = $val {
                sets.push(format!("{} = ?", $col));
                params.push((*v as i8).into());
            }
        };
    }

    add_field!("title", &updates.title);
    add_field!("description", &updates.description);
    add_field!("design", &updates.design);
    add_field!("acceptance_criteria", &updates.acceptance_criteria);
    add_field!("notes", &updates.notes);
    add_field!("priority", &updates.priority);
    add_field!("assignee", &updates.assignee);
    add_field!("owner", &updates.owner);
    add_field!("spec_id", &updates.spec_id);
    add_field!("source_system", &updates.source_system);
    add_field!("source_repo", &updates.source_repo);
    add_field!("close_reason", &updates.close_reason);
    add_field!("closed_by_session", &updates.closed_by_session);
    add_field!("await_type", &updates.await_type);
    add_field!("await_id", &updates.await_id);
    add_field!("hook_bead", &updates.hook_bead);
    add_field!("role_bead", &updates.role_bead);
    add_field!("agent_state", &updates.agent_state);

    add_nested_field!("estimated_minutes", &updates.estimated_minutes);
    add_nested_field!("external_ref", &updates.external_ref);

    add_bool_field!("pinned", &updates.pinned);
    add_bool_field!("is_template", &updates.is_template);
    add_bool_field!("ephemeral", &updates.ephemeral);
    add_bool_field!("crystallizes", &updates.crystallizes);

    if let Some(status) = &updates.status {
        sets.push("status = ?".to_string());
        params.push(status.as_str().into());
    }
    if let Some(issue_type) = &updates.issue_type {
        sets.push("issue_type = ?".to_string());
        params.push(issue_type.as_str().into());
    }
    if let Some(deleted) = &updates.deleted_at {
        sets.push("deleted_at = ?".to_string());
        params.push(deleted.map(|d| format_datetime(&d)).into());
    }
    if let Some(due) = &updates.due_at {
        sets.push("due_at = ?".to_string());
        params.push(due.map(|d| format_datetime(&d)).into());
    }
    if let Some(defer) = &updates.defer_until {
        sets.push("defer_until = ?".to_string());
        params.push(defer.map(|d| format_datetime(&d)).into());
    }
    if let Some(last_activity) = &updates.last_activity {
        sets.push("last_activity = ?".to_string());
        params.push(last_activity.map(|d| format_datetime(&d)).into());
    }
    if let Some(timeout) = &updates.timeout {
        sets.push("timeout_ns = ?".to_string());
        params.push(timeout.map(|d| d.as_nanos() as i64).unwrap_or(0).into());
    }
    if let Some(waiters) = &updates.waiters {
        sets.push("waiters = ?".to_string());
        params.push(serde_json::to_string(waiters)?.into());
    }
    if let Some(metadata) = &updates.metadata {
        sets.push("metadata = ?".to_string());
        params.push(metadata.clone().unwrap_or_else(|| "{}".to_string()).into());
    }

    if sets.is_empty() {
        return Ok(());
    }

    let now = Utc::now();
    sets.push("updated_at = ?".to_string());
    params.push(format_datetime(&now).into());
    params.push(id.into());

    let sql = format!("UPDATE issues SET {} WHERE id = ?", sets.join(", "));
    conn.exec_drop(sql, Params::Positional(params))
        .map_err(StorageError::DoltQuery)?;

    if conn.affected() == 0 {
        return Err(StorageError::not_found("issue", id));
    }

    emit_event(conn, id, EventType::Updated, actor, None, None, None, &now)?;
    mark_dirty(conn, id)
}

pub(crate) fn close_issue_on_conn<C: DoltConn>(
    conn: &mut C,
    id: &str,
    reason: &str,
    actor: &str,
    session: &str,
) -> Result<()> {
    let current_status: Option<String> = conn
        .exec_first("SELECT status FROM issues WHERE id = ?", (id,))
        .map_err(StorageError::DoltQuery)?;
    let current_status = current_status.ok_or_else(|| StorageError::not_found("issue", id))?;

    if current_status != "closed" && current_status != "tombstone" {
        let now = Utc::now();
        conn.exec_drop(
            "UPDATE issues SET status = 'closed', closed_at = ?, close_reason = ?, \
             closed_by_session = ?, updated_at = ? WHERE id = ?",
            (format_datetime(&now), reason, session, format_datetime(&now), id),
        )
        .map_err(StorageError::DoltQuery)?;
        emit_event(conn, id, EventType::Closed, actor, Some(&current_status), Some("closed"), Some(reason), &now)?;
        mark_dirty(conn, id)?;
    }

    auto_close_tracking_convoys(conn, id, &format_datetime(&Utc::now()))
}

/// Closes any `gt:convoy`-labeled issue that `tracks` `tracked_issue_id`,
/// once all of its tracked issues are closed or tombstoned. Recurses so a
/// chain of nested convoys closes in one call.
pub(crate) fn auto_close_tracking_convoys<C: DoltConn>(
    conn: &mut C,
    tracked_issue_id: &str,
    now_str: &str,
) -> Result<()> {
    let convoys: Vec<String> = conn
        .exec(
            "SELECT DISTINCT d.issue_id
             FROM dependencies d
             JOIN issues c ON c.id = d.issue_id
             JOIN labels l ON l.issue_id = c.id AND l.label = 'gt:convoy'
             WHERE d.depends_on_id = ? AND d.type = 'tracks'
               AND c.status NOT IN ('closed', 'tombstone')
               AND NOT EXISTS (
                   SELECT 1 FROM dependencies d2
                   LEFT JOIN issues t ON t.id = d2.depends_on_id
                   WHERE d2.issue_id = c.id AND d2.type = 'tracks'
                     AND (t.id IS NULL OR t.status NOT IN ('closed', 'tombstone'))
               )",
            (tracked_issue_id,),
        )
        .map_err(StorageError::DoltQuery)?;

    for convoy_id in convoys {
        conn.exec_drop(
            "UPDATE issues SET status = 'closed', closed_at = ?, close_reason = ?, \
             closed_by_session = 'system', updated_at = ? WHERE id = ?",
            (
                now_str,
                "convoy auto-close: all tracked issues closed",
                now_str,
                &convoy_id,
            ),
        )
        .map_err(StorageError::DoltQuery)?;
        emit_event(
            conn,
            &convoy_id,
            EventType::Closed,
            "system",
            None,
            Some("closed"),
            Some("convoy auto-close: all tracked issues closed"),
            &Utc::now(),
        )?;
        mark_dirty(conn, &convoy_id)?;
        auto_close_tracking_convoys(conn, &convoy_id, now_str)?;
    }
    Ok(())
}

pub(crate) fn delete_issue_on_conn<C: DoltConn>(conn: &mut C, id: &str) -> Result<()> {
    conn.exec_drop("DELETE FROM issues WHERE id = ?", (id,))
        .map_err(StorageError::DoltQuery)?;
    if conn.affected() == 0 {
        return Err(StorageError::not_found("issue", id));
    }
    conn.exec_drop("DELETE FROM dirty_issues WHERE id = ?", (id,))
        .map_err(StorageError::DoltQuery)
}

pub(crate) fn search_issues_on_conn<C: DoltConn>(
    conn: &mut C,
    query: &str,
    filter: &IssueFilter,
) -> Result<Vec<Issue>> {
    let mut where_clauses: Vec<String> = vec!["1=1".to_string()];
    let mut params: Vec<Value> = Vec::new();

    if !query.trim().is_empty() {
        where_clauses.push("(title LIKE ? OR description LIKE ? OR notes LIKE ?)".to_string());
        let pat = format!("%{query}%");
        params.push(pat.clone().into());
        params.push(pat.clone().into());
        params.push(pat.into());
    }
    if let Some(status) = &filter.status {
        where_clauses.push("status = ?".to_string());
        params.push(status.as_str().into());
    }
    if let Some(p) = filter.priority {
        where_clauses.push("priority = ?".to_string());
        params.push(p.into());
    }
    if let Some(min) = filter.priority_min {
        where_clauses.push("priority >= ?".to_string());
        params.push(min.into());
    }
    if let Some(max) = filter.priority_max {
        where_clauses.push("priority <= ?".to_string());
        params.push(max.into());
    }
    if let Some(issue_type) = &filter.issue_type {
        where_clauses.push("issue_type = ?".to_string());
        params.push(issue_type.as_str().into());
    }
    if let Some(assignee) = &filter.assignee {
        where_clauses.push("assignee = ?".to_string());
        params.push(assignee.clone().into());
    }
    if filter.no_assignee {
        where_clauses.push("(assignee IS NULL OR assignee = '')".to_string());
    }
    if filter.empty_description {
        where_clauses.push("(description IS NULL OR description = '')".to_string());
    }
    if let Some(p) = &filter.id_prefix {
        where_clauses.push("id LIKE ?".to_string());
        params.push(format!("{p}%").into());
    }
    if let Some(p) = &filter.spec_id_prefix {
        where_clauses.push("spec_id LIKE ?".to_string());
        params.push(format!("{p}%").into());
    }
    if let Some(t) = &filter.title_contains {
        where_clauses.push("title LIKE ?".to_string());
        params.push(format!("%{t}%").into());
    }
    if let Some(t) = &filter.description_contains {
        where_clauses.push("description LIKE ?".to_string());
        params.push(format!("%{t}%").into());
    }
    if let Some(t) = &filter.notes_contains {
        where_clauses.push("notes LIKE ?".to_string());
        params.push(format!("%{t}%").into());
    }
    if let Some(after) = filter.created_after {
        where_clauses.push("created_at >= ?".to_string());
        params.push(format_datetime(&after).into());
    }
    if let Some(before) = filter.created_before {
        where_clauses.push("created_at <= ?".to_string());
        params.push(format_datetime(&before).into());
    }
    if let Some(after) = filter.updated_after {
        where_clauses.push("updated_at >= ?".to_string());
        params.push(format_datetime(&after).into());
    }
    if let Some(before) = filter.updated_before {
        where_clauses.push("updated_at <= ?".to_string());
        params.push(format_datetime(&before).into());
    }
    if let Some(after) = filter.closed_after {
        where_clauses.push("closed_at >= ?".to_string());
        params.push(format_datetime(&after).into());
    }
    if let Some(before) = filter.closed_before {
        where_clauses.push("closed_at <= ?".to_string());
        params.push(format_datetime(&before).into());
    }
    if let Some(repo) = &filter.source_repo {
        where_clauses.push("source_repo = ?".to_string());
        params.push(repo.clone().into());
    }
    if let Some(v) = filter.ephemeral {
        where_clauses.push("ephemeral = ?".to_string());
        params.push((v as i8).into());
    }
    if let Some(v) = filter.pinned {
        where_clauses.push("pinned = ?".to_string());
        params.push((v as i8).into());
    }
    if let Some(v) = filter.is_template {
        where_clauses.push("is_template = ?".to_string());
        params.push((v as i8).into());
    }
    if filter.deferred {
        where_clauses.push("defer_until IS NOT NULL AND defer_until > ?".to_string());
        params.push(format_datetime(&Utc::now()).into());
    }
    if let Some(after) = filter.defer_after {
        where_clauses.push("defer_until >= ?".to_string());
        params.push(format_datetime(&after).into());
    }
    if let Some(before) = filter.defer_before {
        where_clauses.push("defer_until <= ?".to_string());
        params.push(format_datetime(&before).into());
    }
    if let Some(after) = filter.due_after {
        where_clauses.push("due_at >= ?".to_string());
        params.push(format_datetime(&after).into());
    }
    if let Some(before) = filter.due_before {
        where_clauses.push("due_at <= ?".to_string());
        params.push(format_datetime(&before).into());
    }
    if filter.overdue {
        where_clauses.push("(due_at IS NOT NULL AND due_at < ? AND status != 'closed')".to_string());
        params.push(format_datetime(&Utc::now()).into());
    }
    for status in &filter.exclude_status {
        where_clauses.push("status != ?".to_string());
        params.push(status.as_str().into());
    }
    for issue_type in &filter.exclude_types {
        where_clauses.push("issue_type != ?".to_string());
        params.push(issue_type.as_str().into());
    }
    if !filter.ids.is_empty() {
        let placeholders = vec!["?"; filter.ids.len()].join(", ");
        where_clauses.push(format!("id IN ({placeholders})"));
        for id in &filter.ids {
            params.push(id.clone().into());
        }
    }
    for label in &filter.labels {
        where_clauses.push(
            "EXISTS (SELECT 1 FROM labels lb WHERE lb.issue_id = issues.id AND lb.label = ?)"
                .to_string(),
        );
        params.push(label.clone().into());
    }
    if !filter.labels_any.is_empty() {
        let placeholders = vec!["?"; filter.labels_any.len()].join(", ");
        where_clauses.push(format!(
            "EXISTS (SELECT 1 FROM labels lb WHERE lb.issue_id = issues.id AND lb.label IN ({placeholders}))"
        ));
        for label in &filter.labels_any {
            params.push(label.clone().into());
        }
    }
    if filter.no_labels {
        where_clauses.push(
            "NOT EXISTS (SELECT 1 FROM labels lb WHERE lb.issue_id = issues.id)".to_string(),
        );
    }

    let mut sql = format!(
        "SELECT {ISSUE_COLUMNS} FROM issues WHERE {} ORDER BY created_at DESC",
        where_clauses.join(" AND ")
    );
    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    let rows: Vec<Row> = conn
        .exec(sql, Params::Positional(params))
        .map_err(StorageError::DoltQuery)?;
    rows.iter().map(scan_issue).collect()
}

impl DoltStore {
    pub(crate) fn create_issue_impl(&self, issue: &Issue, actor: &str) -> Result<()> {
        self.with_conn(|conn| insert_issue(conn, issue, actor))
    }

    pub(crate) fn create_issues_impl(&self, issues: &[Issue], actor: &str) -> Result<()> {
        self.with_conn(|conn| {
            let mut tx = conn.start_transaction(mysql::TxOpts::default()).map_err(StorageError::DoltQuery)?;
            for issue in issues {
                insert_issue(&mut tx, issue, actor)?;
            }
            tx.commit().map_err(StorageError::DoltQuery)
        })
    }

    pub(crate) fn get_issue_impl(&self, id: &str) -> Result<Issue> {
        self.with_conn(|conn| get_issue_on_conn(conn, id))
    }

    pub(crate) fn get_issue_by_external_ref_impl(&self, external_ref: &str) -> Result<Issue> {
        self.with_conn(|conn| {
            let row: Option<Row> = conn
                .exec_first(
                    format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE external_ref = ?"),
                    (external_ref,),
                )
                .map_err(StorageError::DoltQuery)?;
            match row {
                Some(r) => scan_issue(&r),
                None => Err(StorageError::not_found("issue", external_ref)),
            }
        })
    }

    pub(crate) fn get_issues_by_ids_impl(&self, ids: &[String]) -> Result<Vec<Issue>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            let placeholders = vec!["?"; ids.len()].join(", ");
            let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id IN ({placeholders})");
            let params: Vec<Value> = ids.iter().map(|id| id.clone().into()).collect();
            let rows: Vec<Row> = conn
                .exec(sql, Params::Positional(params))
                .map_err(StorageError::DoltQuery)?;
            rows.iter().map(scan_issue).collect()
        })
    }

    pub(crate) fn update_issue_impl(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()> {
        self.with_conn(|conn| update_issue_on_conn(conn, id, updates, actor))
    }

    pub(crate) fn close_issue_impl(&self, id: &str, reason: &str, actor: &str, session: &str) -> Result<()> {
        self.with_conn(|conn| close_issue_on_conn(conn, id, reason, actor, session))
    }

    pub(crate) fn delete_issue_impl(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| delete_issue_on_conn(conn, id))
    }

    pub(crate) fn search_issues_impl(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        self.with_conn(|conn| search_issues_on_conn(conn, query, filter))
    }
}
