//! Ready-work, blocked-issue, staleness, and statistics queries.
//!
//! Ports `sqlite/queries.rs`'s query shapes verbatim where the dialect
//! allows; MySQL/Dolt has no `strftime`, so relative-time cutoffs are
//! computed in Rust with `chrono` and passed down as bound timestamps
//! instead of being computed in SQL.

use chrono::{Duration, Utc};
use mysql::prelude::Queryable;
use mysql::Row;

use beads_core::filter::{StaleFilter, WorkFilter};
use beads_core::issue::Issue;

use crate::dolt::issues::{format_datetime, scan_issue, ISSUE_COLUMNS};
use crate::dolt::store::DoltConn;
use crate::dolt::{col, DoltStore};
use crate::error::{Result, StorageError};
use crate::traits::{BlockedIssue, EpicStatus, MoleculeProgress, Statistics};

const OPEN_BLOCKER_STATUSES: &str = "'open', 'in_progress', 'blocked', 'deferred', 'hooked'";

pub(crate) fn get_ready_work_on_conn<C: DoltConn>(conn: &mut C, filter: &WorkFilter) -> Result<Vec<Issue>> {
    let mut where_clauses = vec![
        "i.status = 'open'".to_string(),
        "i.is_template = 0".to_string(),
        format!(
            "NOT EXISTS (SELECT 1 FROM dependencies d JOIN issues blocker ON blocker.id = d.depends_on_id \
             WHERE d.issue_id = i.id AND d.type IN ('blocks', 'parent-child') \
             AND blocker.status IN ({OPEN_BLOCKER_STATUSES}))"
        ),
    ];
    let mut params: Vec<mysql::Value> = Vec::new();

    if !filter.include_ephemeral {
        where_clauses.push("i.ephemeral = 0".to_string());
    }
    if !filter.include_deferred {
        where_clauses.push("(i.defer_until IS NULL OR i.defer_until <= ?)".to_string());
        params.push(format_datetime(&Utc::now()).into());
    }
    if let Some(issue_type) = &filter.issue_type {
        where_clauses.push("i.issue_type = ?".to_string());
        params.push(issue_type.clone().into());
    }
    if let Some(priority) = filter.priority {
        where_clauses.push("i.priority = ?".to_string());
        params.push(priority.into());
    }
    if let Some(assignee) = &filter.assignee {
        where_clauses.push("i.assignee = ?".to_string());
        params.push(assignee.clone().into());
    }
    if filter.unassigned {
        where_clauses.push("(i.assignee IS NULL OR i.assignee = '')".to_string());
    }
    if let Some(parent_id) = &filter.parent_id {
        where_clauses.push(
            "EXISTS (SELECT 1 FROM dependencies pd WHERE pd.depends_on_id = ? AND pd.issue_id = i.id AND pd.type = 'parent-child')"
                .to_string(),
        );
        params.push(parent_id.clone().into());
    }
    for label in &filter.labels {
        where_clauses.push("EXISTS (SELECT 1 FROM labels lb WHERE lb.issue_id = i.id AND lb.label = ?)".to_string());
        params.push(label.clone().into());
    }
    if !filter.labels_any.is_empty() {
        let placeholders = vec!["?"; filter.labels_any.len()].join(", ");
        where_clauses.push(format!(
            "EXISTS (SELECT 1 FROM labels lb WHERE lb.issue_id = i.id AND lb.label IN ({placeholders}))"
        ));
        for label in &filter.labels_any {
            params.push(label.clone().into());
        }
    }

    let order_by = match filter.sort_policy.as_str() {
        "priority" => "i.priority ASC, i.created_at ASC",
        "oldest" => "i.created_at ASC",
        _ => {
            let cutoff = format_datetime(&(Utc::now() - Duration::hours(48)));
            params.push(cutoff.clone().into());
            "CASE WHEN i.updated_at >= ? THEN 0 ELSE 1 END, i.priority ASC, i.created_at ASC"
        }
    };

    let mut sql = format!(
        "SELECT {} FROM issues i WHERE {} ORDER BY {order_by}",
        prefixed_issue_columns(),
        where_clauses.join(" AND ")
    );
    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    let rows: Vec<Row> = conn
        .exec(sql, mysql::Params::Positional(params))
        .map_err(StorageError::DoltQuery)?;
    rows.iter().map(scan_issue).collect()
}

pub(crate) fn get_blocked_issues_on_conn<C: DoltConn>(
    conn: &mut C,
    filter: &WorkFilter,
) -> Result<Vec<BlockedIssue>> {
    let mut where_clauses = vec![format!("i.status IN ({OPEN_BLOCKER_STATUSES})")];
    let mut params: Vec<mysql::Value> = Vec::new();

    where_clauses.push(
        "EXISTS (SELECT 1 FROM dependencies d JOIN issues blocker ON blocker.id = d.depends_on_id \
         WHERE d.issue_id = i.id AND d.type = 'blocks' \
         AND blocker.status IN ('open', 'in_progress', 'blocked', 'deferred', 'hooked'))"
            .to_string(),
    );

    if let Some(assignee) = &filter.assignee {
        where_clauses.push("i.assignee = ?".to_string());
        params.push(assignee.clone().into());
    }

    let sql = format!(
        "SELECT {}, (SELECT COUNT(*) FROM dependencies d2 JOIN issues b2 ON b2.id = d2.depends_on_id \
         WHERE d2.issue_id = i.id AND d2.type = 'blocks' \
         AND b2.status IN ('open', 'in_progress', 'blocked', 'deferred', 'hooked')) AS blocked_by_count \
         FROM issues i WHERE {} ORDER BY i.priority ASC, i.created_at ASC",
        prefixed_issue_columns(),
        where_clauses.join(" AND ")
    );

    let rows: Vec<Row> = conn
        .exec(sql, mysql::Params::Positional(params))
        .map_err(StorageError::DoltQuery)?;
    rows.iter()
        .map(|row| {
            Ok(BlockedIssue {
                issue: scan_issue(row)?,
                blocked_by_count: col(row, "blocked_by_count")?,
            })
        })
        .collect()
}

pub(crate) fn get_epics_eligible_for_closure_on_conn<C: DoltConn>(conn: &mut C) -> Result<Vec<EpicStatus>> {
    let sql = format!(
        "SELECT {}, \
         (SELECT COUNT(*) FROM dependencies d WHERE d.depends_on_id = i.id AND d.type = 'parent-child') AS total_children, \
         (SELECT COUNT(*) FROM dependencies d JOIN issues c ON c.id = d.issue_id \
          WHERE d.depends_on_id = i.id AND d.type = 'parent-child' AND c.status = 'closed') AS closed_children \
         FROM issues i WHERE i.issue_type = 'epic' AND i.status != 'closed'",
        prefixed_issue_columns()
    );

    let rows: Vec<Row> = conn.query(sql).map_err(StorageError::DoltQuery)?;
    rows.iter()
        .filter_map(|row| {
            let total: i32 = col(row, "total_children").ok()?;
            let closed: i32 = col(row, "closed_children").ok()?;
            if total > 0 && total == closed {
                Some(scan_issue(row).map(|epic| EpicStatus {
                    epic,
                    total_children: total,
                    closed_children: closed,
                }))
            } else {
                None
            }
        })
        .collect()
}

pub(crate) fn is_blocked_on_conn<C: DoltConn>(conn: &mut C, issue_id: &str) -> Result<bool> {
    let row: Option<i64> = conn
        .exec_first(
            format!(
                "SELECT 1 FROM dependencies d LEFT JOIN issues blocker ON blocker.id = d.depends_on_id \
                 WHERE d.issue_id = ? AND d.type IN ('blocks', 'parent-child') \
                 AND (blocker.id IS NULL OR blocker.status IN ({OPEN_BLOCKER_STATUSES})) LIMIT 1"
            ),
            (issue_id,),
        )
        .map_err(StorageError::DoltQuery)?;
    Ok(row.is_some())
}

pub(crate) fn get_stale_on_conn<C: DoltConn>(conn: &mut C, filter: &StaleFilter) -> Result<Vec<Issue>> {
    let cutoff = format_datetime(&(Utc::now() - Duration::days(filter.days as i64)));
    let mut where_clauses = vec!["updated_at <= ?".to_string()];
    let mut params: Vec<mysql::Value> = vec![cutoff.into()];

    if let Some(status) = &filter.status {
        where_clauses.push("status = ?".to_string());
        params.push(status.clone().into());
    } else {
        where_clauses.push("status NOT IN ('closed', 'tombstone')".to_string());
    }

    let mut sql = format!(
        "SELECT {ISSUE_COLUMNS} FROM issues WHERE {} ORDER BY updated_at ASC",
        where_clauses.join(" AND ")
    );
    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    let rows: Vec<Row> = conn
        .exec(sql, mysql::Params::Positional(params))
        .map_err(StorageError::DoltQuery)?;
    rows.iter().map(scan_issue).collect()
}

pub(crate) fn molecule_progress_on_conn<C: DoltConn>(conn: &mut C, issue_id: &str) -> Result<MoleculeProgress> {
    let row: Option<Row> = conn
        .exec_first(format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?"), (issue_id,))
        .map_err(StorageError::DoltQuery)?;
    let issue = match row {
        Some(r) => scan_issue(&r)?,
        None => return Err(StorageError::not_found("issue", issue_id)),
    };

    let total: i64 = conn
        .exec_first(
            "SELECT COUNT(*) FROM dependencies WHERE issue_id = ? AND type = 'tracks'",
            (issue_id,),
        )
        .map_err(StorageError::DoltQuery)?
        .unwrap_or(0);
    let closed: i64 = conn
        .exec_first(
            "SELECT COUNT(*) FROM dependencies d JOIN issues t ON t.id = d.depends_on_id \
             WHERE d.issue_id = ? AND d.type = 'tracks' AND t.status IN ('closed', 'tombstone')",
            (issue_id,),
        )
        .map_err(StorageError::DoltQuery)?
        .unwrap_or(0);

    Ok(MoleculeProgress {
        issue,
        total_tracked: total as i32,
        closed_tracked: closed as i32,
    })
}

pub(crate) fn newly_unblocked_by_close_on_conn<C: DoltConn>(
    conn: &mut C,
    closed_issue_id: &str,
) -> Result<Vec<Issue>> {
    let sql = format!(
        "SELECT {} FROM issues i \
         JOIN dependencies d ON d.issue_id = i.id \
         WHERE i.status IN ('open', 'in_progress') AND i.pinned = 0 \
           AND d.depends_on_id = ? AND d.type = 'blocks' \
           AND NOT EXISTS ( \
               SELECT 1 FROM dependencies d2 JOIN issues b2 ON b2.id = d2.depends_on_id \
               WHERE d2.issue_id = i.id AND d2.type = 'blocks' \
               AND b2.status IN ({OPEN_BLOCKER_STATUSES}) \
           ) \
         ORDER BY i.priority ASC, i.created_at ASC",
        prefixed_issue_columns()
    );

    let rows: Vec<Row> = conn.exec(sql, (closed_issue_id,)).map_err(StorageError::DoltQuery)?;
    rows.iter().map(scan_issue).collect()
}

pub(crate) fn get_statistics_on_conn<C: DoltConn>(conn: &mut C) -> Result<Statistics> {
    let total: i64 = conn.query_first("SELECT COUNT(*) FROM issues").map_err(StorageError::DoltQuery)?.unwrap_or(0);
    let open: i64 = conn
        .query_first("SELECT COUNT(*) FROM issues WHERE status = 'open'")
        .map_err(StorageError::DoltQuery)?
        .unwrap_or(0);
    let closed: i64 = conn
        .query_first("SELECT COUNT(*) FROM issues WHERE status = 'closed'")
        .map_err(StorageError::DoltQuery)?
        .unwrap_or(0);
    let in_progress: i64 = conn
        .query_first("SELECT COUNT(*) FROM issues WHERE status = 'in_progress'")
        .map_err(StorageError::DoltQuery)?
        .unwrap_or(0);
    let blocked: i64 = conn
        .query_first("SELECT COUNT(*) FROM blocked_issues")
        .map_err(StorageError::DoltQuery)?
        .unwrap_or(0);
    let deferred: i64 = conn
        .query_first("SELECT COUNT(*) FROM issues WHERE status = 'deferred'")
        .map_err(StorageError::DoltQuery)?
        .unwrap_or(0);

    let by_type: Vec<(String, i64)> = conn
        .query("SELECT issue_type, COUNT(*) FROM issues GROUP BY issue_type")
        .map_err(StorageError::DoltQuery)?;
    let by_priority: Vec<(i32, i64)> = conn
        .query("SELECT priority, COUNT(*) FROM issues GROUP BY priority")
        .map_err(StorageError::DoltQuery)?;
    let by_assignee: Vec<(String, i64)> = conn
        .query(
            "SELECT COALESCE(NULLIF(assignee, ''), '(unassigned)'), COUNT(*) \
             FROM issues WHERE status != 'closed' GROUP BY COALESCE(NULLIF(assignee, ''), '(unassigned)')",
        )
        .map_err(StorageError::DoltQuery)?;

    Ok(Statistics {
        total_issues: total,
        open_issues: open,
        closed_issues: closed,
        in_progress_issues: in_progress,
        blocked_issues: blocked,
        deferred_issues: deferred,
        by_type: by_type.into_iter().collect(),
        by_priority,
        by_assignee: by_assignee.into_iter().collect(),
    })
}

fn prefixed_issue_columns() -> String {
    ISSUE_COLUMNS
        .split(", ")
        .map(|c| format!("i.{c} AS {c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl DoltStore {
    pub(crate) fn get_ready_work_impl(&self, filter: &WorkFilter) -> Result<Vec<Issue>> {
        self.with_conn(|conn| get_ready_work_on_conn(conn, filter))
    }

    pub(crate) fn get_blocked_issues_impl(&self, filter: &WorkFilter) -> Result<Vec<BlockedIssue>> {
        self.with_conn(|conn| get_blocked_issues_on_conn(conn, filter))
    }

    pub(crate) fn get_epics_eligible_for_closure_impl(&self) -> Result<Vec<EpicStatus>> {
        self.with_conn(get_epics_eligible_for_closure_on_conn)
    }

    pub(crate) fn is_blocked_impl(&self, issue_id: &str) -> Result<bool> {
        self.with_conn(|conn| is_blocked_on_conn(conn, issue_id))
    }

    pub(crate) fn get_stale_impl(&self, filter: &StaleFilter) -> Result<Vec<Issue>> {
        self.with_conn(|conn| get_stale_on_conn(conn, filter))
    }

    pub(crate) fn molecule_progress_impl(&self, issue_id: &str) -> Result<MoleculeProgress> {
        self.with_conn(|conn| molecule_progress_on_conn(conn, issue_id))
    }

    pub(crate) fn newly_unblocked_by_close_impl(&self, closed_issue_id: &str) -> Result<Vec<Issue>> {
        self.with_conn(|conn| newly_unblocked_by_close_on_conn(conn, closed_issue_id))
    }

    pub(crate) fn get_statistics_impl(&self) -> Result<Statistics> {
        self.with_conn(get_statistics_on_conn)
    }
}
