//! Dependency edge CRUD, cycle detection/enumeration, and tree traversal.
//!
//! Reuses the same iterative BFS cycle-detection and cycle-enumeration
//! algorithms as `sqlite/dependencies.rs`, just driven off Dolt row-fetching
//! instead of rusqlite.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use mysql::prelude::Queryable;
use mysql::Row;

use beads_core::dependency::Dependency;
use beads_core::enums::{DependencyType, EventType};
use beads_core::issue::Issue;

use crate::dolt::issues::{format_datetime, scan_issue, ISSUE_COLUMNS};
use crate::dolt::store::DoltConn;
use crate::dolt::{col, DoltStore};
use crate::error::{Result, StorageError};
use crate::traits::{IssueWithDependencyMetadata, TreeNode};

/// Mirrors `sqlite/dependencies.rs`'s depth cap on the cycle-detection BFS:
/// past this many hops a graph is assumed acyclic rather than walked fully.
const MAX_CYCLE_CHECK_DEPTH: u32 = 100;

fn scan_dependency(row: &Row) -> Result<Dependency> {
    Ok(Dependency {
        issue_id: col(row, "issue_id")?,
        depends_on_id: col(row, "depends_on_id")?,
        dep_type: DependencyType::from(col::<String>(row, "type")?.as_str()),
        created_at: crate::dolt::issues::parse_datetime(&col::<String>(row, "created_at")?),
        created_by: col(row, "created_by")?,
        metadata: col(row, "metadata")?,
        thread_id: col(row, "thread_id")?,
    })
}

/// Iterative BFS from `depends_on_id` looking for a path back to
/// `issue_id`; if one exists, adding `issue_id -> depends_on_id` would close
/// a cycle. `RelatesTo` edges are excluded, matching the sqlite backend.
fn detect_cycle<C: DoltConn>(conn: &mut C, issue_id: &str, depends_on_id: &str) -> Result<()> {
    if issue_id == depends_on_id {
        return Err(StorageError::CycleDetected);
    }

    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(depends_on_id.to_string());
    visited.insert(depends_on_id.to_string());

    let mut depth = 0;
    while let Some(current) = queue.pop_front() {
        depth += 1;
        if depth > MAX_CYCLE_CHECK_DEPTH {
            break;
        }

        let next: Vec<String> = conn
            .exec(
                "SELECT depends_on_id FROM dependencies WHERE issue_id = ? AND type != 'relates-to'",
                (&current,),
            )
            .map_err(StorageError::DoltQuery)?;

        for target in next {
            if target == issue_id {
                return Err(StorageError::CycleDetected);
            }
            if visited.insert(target.clone()) {
                queue.push_back(target);
            }
        }
    }

    Ok(())
}

pub(crate) fn add_dependency_on_conn<C: DoltConn>(
    conn: &mut C,
    dep: &Dependency,
    actor: &str,
) -> Result<()> {
    if !dep.dep_type.is_cycle_exempt() {
        detect_cycle(conn, &dep.issue_id, &dep.depends_on_id)?;
    }

    conn.exec_drop(
        "REPLACE INTO dependencies (issue_id, depends_on_id, type, created_at, created_by, metadata, thread_id) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        (
            &dep.issue_id,
            &dep.depends_on_id,
            dep.dep_type.as_str(),
            format_datetime(&dep.created_at),
            &dep.created_by,
            &dep.metadata,
            &dep.thread_id,
        ),
    )
    .map_err(StorageError::DoltQuery)?;

    let now = Utc::now();
    crate::dolt::issues::emit_event(
        conn,
        &dep.issue_id,
        EventType::DependencyAdded,
        actor,
        None,
        Some(&dep.depends_on_id),
        None,
        &now,
    )?;
    crate::dolt::issues::mark_dirty(conn, &dep.issue_id)?;
    crate::dolt::issues::mark_dirty(conn, &dep.depends_on_id)
}

pub(crate) fn remove_dependency_on_conn<C: DoltConn>(
    conn: &mut C,
    issue_id: &str,
    depends_on_id: &str,
    actor: &str,
) -> Result<()> {
    conn.exec_drop(
        "DELETE FROM dependencies WHERE issue_id = ? AND depends_on_id = ?",
        (issue_id, depends_on_id),
    )
    .map_err(StorageError::DoltQuery)?;

    if conn.affected() == 0 {
        return Err(StorageError::not_found(
            "dependency",
            format!("{issue_id} -> {depends_on_id}"),
        ));
    }

    let now = Utc::now();
    crate::dolt::issues::emit_event(
        conn,
        issue_id,
        EventType::DependencyRemoved,
        actor,
        Some(depends_on_id),
        None,
        None,
        &now,
    )?;
    crate::dolt::issues::mark_dirty(conn, issue_id)?;
    crate::dolt::issues::mark_dirty(conn, depends_on_id)
}

pub(crate) fn get_dependency_records_on_conn<C: DoltConn>(
    conn: &mut C,
    issue_id: &str,
) -> Result<Vec<Dependency>> {
    let rows: Vec<Row> = conn
        .exec(
            "SELECT issue_id, depends_on_id, type, created_at, created_by, metadata, thread_id \
             FROM dependencies WHERE issue_id = ?",
            (issue_id,),
        )
        .map_err(StorageError::DoltQuery)?;
    rows.iter().map(scan_dependency).collect()
}

/// Loads the non-`relates-to` edge list and returns every distinct cycle,
/// each rotated to start at its lexicographically-smallest node.
pub(crate) fn enumerate_cycles_on_conn<C: DoltConn>(conn: &mut C) -> Result<Vec<Vec<String>>> {
    let edges: Vec<(String, String)> = conn
        .query("SELECT issue_id, depends_on_id FROM dependencies WHERE type != 'relates-to'")
        .map_err(StorageError::DoltQuery)?;

    let mut graph: HashMap<String, Vec<String>> = HashMap::new();
    for (from, to) in edges {
        graph.entry(from).or_default().push(to);
    }

    let mut found: HashSet<Vec<String>> = HashSet::new();
    for start in graph.keys().cloned().collect::<Vec<_>>() {
        dfs_find_cycles(&graph, &start, &mut vec![start.clone()], &mut HashSet::from([start.clone()]), &mut found);
    }

    Ok(found.into_iter().collect())
}

fn dfs_find_cycles(
    graph: &HashMap<String, Vec<String>>,
    current: &str,
    path: &mut Vec<String>,
    on_path: &mut HashSet<String>,
    found: &mut HashSet<Vec<String>>,
) {
    let Some(neighbors) = graph.get(current) else {
        return;
    };
    for next in neighbors {
        if next == &path[0] {
            found.insert(normalize_cycle(path));
            continue;
        }
        if on_path.contains(next) {
            continue;
        }
        path.push(next.clone());
        on_path.insert(next.clone());
        dfs_find_cycles(graph, next, path, on_path, found);
        on_path.remove(next);
        path.pop();
    }
}

fn normalize_cycle(path: &[String]) -> Vec<String> {
    let min_idx = path
        .iter()
        .enumerate()
        .min_by_key(|(_, v)| v.as_str())
        .map(|(i, _)| i)
        .unwrap_or(0);
    path[min_idx..].iter().chain(path[..min_idx].iter()).cloned().collect()
}

pub(crate) fn get_deps_with_metadata<C: DoltConn>(
    conn: &mut C,
    issue_id: &str,
    forward: bool,
) -> Result<Vec<IssueWithDependencyMetadata>> {
    let sql = if forward {
        format!(
            "SELECT {}, d.issue_id AS d_issue_id, d.depends_on_id AS d_depends_on_id, \
             d.type AS d_type, d.created_at AS d_created_at, d.created_by AS d_created_by, \
             d.metadata AS d_metadata, d.thread_id AS d_thread_id \
             FROM dependencies d JOIN issues i ON i.id = d.depends_on_id WHERE d.issue_id = ?",
            prefixed_issue_columns()
        )
    } else {
        format!(
            "SELECT {}, d.issue_id AS d_issue_id, d.depends_on_id AS d_depends_on_id, \
             d.type AS d_type, d.created_at AS d_created_at, d.created_by AS d_created_by, \
             d.metadata AS d_metadata, d.thread_id AS d_thread_id \
             FROM dependencies d JOIN issues i ON i.id = d.issue_id WHERE d.depends_on_id = ?",
            prefixed_issue_columns()
        )
    };

    let rows: Vec<Row> = conn.exec(sql, (issue_id,)).map_err(StorageError::DoltQuery)?;
    rows.iter()
        .map(|row| {
            Ok(IssueWithDependencyMetadata {
                issue: scan_issue(row)?,
                dependency: Dependency {
                    issue_id: col(row, "d_issue_id")?,
                    depends_on_id: col(row, "d_depends_on_id")?,
                    dep_type: DependencyType::from(col::<String>(row, "d_type")?.as_str()),
                    created_at: crate::dolt::issues::parse_datetime(&col::<String>(row, "d_created_at")?),
                    created_by: col(row, "d_created_by")?,
                    metadata: col(row, "d_metadata")?,
                    thread_id: col(row, "d_thread_id")?,
                },
            })
        })
        .collect()
}

/// Issue columns aliased with an `i.` qualifier so they can coexist with the
/// `d_*`-prefixed dependency columns in the same result set.
fn prefixed_issue_columns() -> String {
    ISSUE_COLUMNS
        .split(", ")
        .map(|c| format!("i.{c} AS {c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn get_dependency_tree_on_conn<C: DoltConn>(
    conn: &mut C,
    issue_id: &str,
    max_depth: i32,
    show_all_paths: bool,
    reverse: bool,
) -> Result<Vec<TreeNode>> {
    let mut result = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<(String, i32, DependencyType)> = VecDeque::new();
    queue.push_back((issue_id.to_string(), 0, DependencyType::Blocks));

    while let Some((current_id, depth, dep_type)) = queue.pop_front() {
        if depth > 0 {
            if !show_all_paths && visited.contains(&current_id) {
                continue;
            }
            visited.insert(current_id.clone());

            let issue = match get_issue_row(conn, &current_id)? {
                Some(i) => i,
                None => continue,
            };
            result.push(TreeNode {
                issue,
                depth,
                dep_type,
                reverse,
            });
        }

        if max_depth >= 0 && depth >= max_depth {
            continue;
        }

        let sql = if reverse {
            "SELECT issue_id AS next_id, type FROM dependencies WHERE depends_on_id = ?"
        } else {
            "SELECT depends_on_id AS next_id, type FROM dependencies WHERE issue_id = ?"
        };
        let rows: Vec<Row> = conn.exec(sql, (&current_id,)).map_err(StorageError::DoltQuery)?;
        for row in rows {
            let next_id: String = col(&row, "next_id")?;
            let edge_type = DependencyType::from(col::<String>(&row, "type")?.as_str());
            queue.push_back((next_id, depth + 1, edge_type));
        }
    }

    Ok(result)
}

fn get_issue_row<C: DoltConn>(conn: &mut C, id: &str) -> Result<Option<Issue>> {
    let row: Option<Row> = conn
        .exec_first(format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?"), (id,))
        .map_err(StorageError::DoltQuery)?;
    row.map(|r| scan_issue(&r)).transpose()
}

impl DoltStore {
    pub(crate) fn add_dependency_impl(&self, dep: &Dependency, actor: &str) -> Result<()> {
        self.with_conn(|conn| add_dependency_on_conn(conn, dep, actor))
    }

    pub(crate) fn remove_dependency_impl(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()> {
        self.with_conn(|conn| remove_dependency_on_conn(conn, issue_id, depends_on_id, actor))
    }

    pub(crate) fn enumerate_cycles_impl(&self) -> Result<Vec<Vec<String>>> {
        self.with_conn(enumerate_cycles_on_conn)
    }

    pub(crate) fn get_dependencies_impl(&self, issue_id: &str) -> Result<Vec<Issue>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM dependencies d JOIN issues i ON i.id = d.depends_on_id WHERE d.issue_id = ?",
                prefixed_issue_columns()
            );
            let rows: Vec<Row> = conn.exec(sql, (issue_id,)).map_err(StorageError::DoltQuery)?;
            rows.iter().map(scan_issue).collect()
        })
    }

    pub(crate) fn get_dependents_impl(&self, issue_id: &str) -> Result<Vec<Issue>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM dependencies d JOIN issues i ON i.id = d.issue_id WHERE d.depends_on_id = ?",
                prefixed_issue_columns()
            );
            let rows: Vec<Row> = conn.exec(sql, (issue_id,)).map_err(StorageError::DoltQuery)?;
            rows.iter().map(scan_issue).collect()
        })
    }

    pub(crate) fn get_dependencies_with_metadata_impl(
        &self,
        issue_id: &str,
    ) -> Result<Vec<IssueWithDependencyMetadata>> {
        self.with_conn(|conn| get_deps_with_metadata(conn, issue_id, true))
    }

    pub(crate) fn get_dependents_with_metadata_impl(
        &self,
        issue_id: &str,
    ) -> Result<Vec<IssueWithDependencyMetadata>> {
        self.with_conn(|conn| get_deps_with_metadata(conn, issue_id, false))
    }

    pub(crate) fn get_dependency_tree_impl(
        &self,
        issue_id: &str,
        max_depth: i32,
        show_all_paths: bool,
        reverse: bool,
    ) -> Result<Vec<TreeNode>> {
        self.with_conn(|conn| get_dependency_tree_on_conn(conn, issue_id, max_depth, show_all_paths, reverse))
    }

    pub(crate) fn get_dependency_records_impl(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        self.with_conn(|conn| get_dependency_records_on_conn(conn, issue_id))
    }
}
