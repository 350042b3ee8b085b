//! In-process, `RwLock`-guarded storage backend.
//!
//! Useful for tests, ephemeral CLI invocations, and any caller that wants
//! the [`Storage`] contract without a database file. State lives entirely in
//! memory and is lost when the process exits. Concurrency is handled with a
//! single [`RwLock`] over all state rather than pooled connections -- there
//! is no I/O to overlap, so one lock is simpler than sharding by table.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::RwLock;

use chrono::Utc;

use beads_core::comment::{Comment, Event};
use beads_core::content_hash::compute_content_hash;
use beads_core::dependency::Dependency;
use beads_core::enums::{DependencyType, EventType, Status};
use beads_core::filter::{IssueFilter, StaleFilter, WorkFilter};
use beads_core::issue::Issue;

use crate::error::{Result, StorageError};
use crate::sqlite::schema::DEFAULT_CONFIG;
use crate::traits::{
    BlockedIssue, EpicStatus, IssueUpdates, IssueWithDependencyMetadata, MoleculeProgress,
    Statistics, Storage, Transaction, TreeNode,
};

/// Maximum hops the write-time cycle guard traverses, matching the SQLite
/// backend's bound -- pathological depth is treated as safe.
const MAX_CYCLE_CHECK_DEPTH: u32 = 100;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct MemoryState {
    issues: HashMap<String, Issue>,
    /// Keyed by (issue_id, depends_on_id), matching the SQLite table's
    /// primary key -- at most one edge per ordered pair regardless of type.
    dependencies: HashMap<(String, String), Dependency>,
    labels: HashMap<String, BTreeSet<String>>,
    comments: HashMap<String, Vec<Comment>>,
    events: Vec<Event>,
    next_comment_id: i64,
    next_event_id: i64,
    config: HashMap<String, String>,
    metadata: HashMap<String, String>,
    /// IDs dirtied since the last clear, oldest first. Re-dirtying an
    /// already-dirty issue moves it to the back, mirroring `dirtied_at`
    /// ordering in the SQLite backend's `dirty_issues` table.
    dirty: Vec<String>,
}

impl MemoryState {
    fn seeded() -> Self {
        let mut state = Self::default();
        for (key, value) in DEFAULT_CONFIG {
            state.config.insert((*key).to_string(), (*value).to_string());
        }
        state
    }
}

/// In-memory implementation of the [`Storage`] trait.
pub struct MemoryStore {
    inner: RwLock<MemoryState>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store, seeded with the same default config values
    /// the SQLite backend inserts on first init.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryState::seeded()),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryState>> {
        self.inner
            .read()
            .map_err(|_| StorageError::Internal("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryState>> {
        self.inner
            .write()
            .map_err(|_| StorageError::Internal("memory store lock poisoned".into()))
    }
}

// ---------------------------------------------------------------------------
// Shared mutation helpers (used by both MemoryStore and MemoryTx)
// ---------------------------------------------------------------------------

fn mark_dirty_on_state(state: &mut MemoryState, issue_id: &str) {
    state.dirty.retain(|id| id != issue_id);
    state.dirty.push(issue_id.to_string());
}

fn clear_dirty_on_state(state: &mut MemoryState, ids: &[String]) {
    let removed: HashSet<&str> = ids.iter().map(String::as_str).collect();
    state.dirty.retain(|id| !removed.contains(id.as_str()));
}

fn emit_event(
    state: &mut MemoryState,
    issue_id: &str,
    event_type: EventType,
    actor: &str,
    old_value: Option<&str>,
    new_value: Option<&str>,
    comment: Option<&str>,
) {
    state.next_event_id += 1;
    state.events.push(Event {
        id: state.next_event_id,
        issue_id: issue_id.to_string(),
        event_type,
        actor: actor.to_string(),
        old_value: old_value.map(str::to_string),
        new_value: new_value.map(str::to_string),
        comment: comment.map(str::to_string),
        created_at: Utc::now(),
    });
}

fn insert_issue_on_state(state: &mut MemoryState, issue: &Issue, actor: &str) -> Result<()> {
    let mut issue = issue.clone();
    issue.content_hash = compute_content_hash(&issue);
    let id = issue.id.clone();
    state.issues.insert(id.clone(), issue);
    emit_event(state, &id, EventType::Created, actor, None, None, None);
    mark_dirty_on_state(state, &id);
    Ok(())
}

/// Applies partial field updates to an issue in place. `updated_at` is
/// always bumped; `content_hash` is left untouched, matching the SQLite
/// backend (which never recomputes it after the initial insert).
fn apply_updates(issue: &mut Issue, updates: &IssueUpdates) {
    macro_rules! apply {
        ($field:ident) => {
            if let Some(ref val) = updates.$field {
                issue.$field = val.clone();
            }
        };
    }
    apply!(title);
    apply!(description);
    apply!(design);
    apply!(acceptance_criteria);
    apply!(notes);
    apply!(spec_id);
    apply!(status);
    apply!(priority);
    apply!(issue_type);
    apply!(assignee);
    apply!(owner);
    apply!(source_system);
    apply!(close_reason);
    apply!(closed_by_session);
    apply!(await_type);
    apply!(await_id);
    apply!(waiters);
    apply!(hook_bead);
    apply!(role_bead);
    apply!(pinned);
    apply!(is_template);
    apply!(ephemeral);
    apply!(crystallizes);

    // agent_state round-trips through a raw string column in the SQLite
    // backend; mirror that conversion here rather than storing the enum.
    if let Some(ref val) = updates.agent_state {
        issue.agent_state = beads_core::enums::AgentState::from(val.clone());
    }

    if let Some(ref ext) = updates.external_ref {
        issue.external_ref = ext.clone();
    }
    if let Some(est) = updates.estimated_minutes {
        issue.estimated_minutes = est;
    }
    if let Some(ref meta) = updates.metadata {
        // An explicit `None` normalizes to "{}", matching the SQLite
        // backend's column default rather than leaving it NULL.
        let json = meta.clone().unwrap_or_else(|| "{}".to_string());
        issue.metadata = if json.is_empty() || json == "{}" {
            None
        } else {
            serde_json::value::RawValue::from_string(json).ok()
        };
    }
    if let Some(timeout) = updates.timeout {
        issue.timeout = timeout;
    }
    if let Some(due) = updates.due_at {
        issue.due_at = due;
    }
    if let Some(defer) = updates.defer_until {
        issue.defer_until = defer;
    }
    if let Some(deleted) = updates.deleted_at {
        issue.deleted_at = deleted;
    }
    if let Some(la) = updates.last_activity {
        issue.last_activity = la;
    }

    issue.updated_at = Utc::now();
}

fn update_issue_on_state(state: &mut MemoryState, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()> {
    let issue = state
        .issues
        .get_mut(id)
        .ok_or_else(|| StorageError::not_found("issue", id))?;
    apply_updates(issue, updates);
    emit_event(state, id, EventType::Updated, actor, None, None, None);
    mark_dirty_on_state(state, id);
    Ok(())
}

/// Closes an issue, idempotently: closing an already-closed/tombstone issue
/// is a no-op that emits no new event, but convoy auto-close still runs in
/// case an earlier close attempt was interrupted before reaching it.
fn close_issue_on_state(state: &mut MemoryState, id: &str, reason: &str, actor: &str, session: &str) -> Result<()> {
    let Some(issue) = state.issues.get(id) else {
        return Err(StorageError::not_found("issue", id));
    };
    let already_closed = matches!(issue.status, Status::Closed | Status::Tombstone);

    if !already_closed {
        let now = Utc::now();
        let issue = state.issues.get_mut(id).unwrap();
        issue.status = Status::Closed;
        issue.closed_at = Some(now);
        issue.close_reason = reason.to_string();
        issue.closed_by_session = session.to_string();
        issue.updated_at = now;

        emit_event(state, id, EventType::Closed, actor, None, Some(reason), None);
        mark_dirty_on_state(state, id);
    }

    auto_close_tracking_convoys(state, id);
    Ok(())
}

/// Looks for `gt:convoy`-labeled issues tracking `tracked_issue_id` via a
/// `tracks` edge; auto-closes any whose tracked set is now fully
/// closed/tombstone. Recurses so a convoy-of-convoys settles in one pass.
fn auto_close_tracking_convoys(state: &mut MemoryState, tracked_issue_id: &str) {
    let convoy_ids: Vec<String> = state
        .dependencies
        .values()
        .filter(|d| d.depends_on_id == tracked_issue_id && d.dep_type == DependencyType::Tracks)
        .filter(|d| {
            state
                .labels
                .get(&d.issue_id)
                .is_some_and(|labels| labels.contains("gt:convoy"))
        })
        .map(|d| d.issue_id.clone())
        .collect();

    for convoy_id in convoy_ids {
        let all_tracked_closed = state
            .dependencies
            .values()
            .filter(|d| d.issue_id == convoy_id && d.dep_type == DependencyType::Tracks)
            .all(|d| {
                state
                    .issues
                    .get(&d.depends_on_id)
                    .is_some_and(|t| matches!(t.status, Status::Closed | Status::Tombstone))
            });
        if !all_tracked_closed {
            continue;
        }

        let Some(convoy) = state.issues.get(&convoy_id) else {
            continue;
        };
        if matches!(convoy.status, Status::Closed | Status::Tombstone) {
            continue;
        }

        let now = Utc::now();
        let reason = "convoy auto-close: all tracked issues closed";
        let convoy = state.issues.get_mut(&convoy_id).unwrap();
        convoy.status = Status::Closed;
        convoy.closed_at = Some(now);
        convoy.close_reason = reason.to_string();
        convoy.updated_at = now;

        emit_event(state, &convoy_id, EventType::Closed, "system", None, Some(reason), None);
        mark_dirty_on_state(state, &convoy_id);

        auto_close_tracking_convoys(state, &convoy_id);
    }
}

fn delete_issue_on_state(state: &mut MemoryState, id: &str) -> Result<()> {
    if state.issues.remove(id).is_none() {
        return Err(StorageError::not_found("issue", id));
    }
    // Mirrors the SQLite schema's FK: dependencies cascade off `issue_id`
    // (the source) only. Edges where this issue is merely the target are
    // left dangling, same as a SQL backend with no FK on `depends_on_id`.
    state.dependencies.retain(|(issue_id, _), _| issue_id != id);
    state.labels.remove(id);
    state.comments.remove(id);
    clear_dirty_on_state(state, &[id.to_string()]);
    Ok(())
}

fn add_dependency_on_state(state: &mut MemoryState, dep: &Dependency, actor: &str) -> Result<()> {
    if !dep.dep_type.is_cycle_exempt() && detect_cycle(state, &dep.issue_id, &dep.depends_on_id) {
        return Err(StorageError::CycleDetected);
    }

    state
        .dependencies
        .insert((dep.issue_id.clone(), dep.depends_on_id.clone()), dep.clone());

    emit_event(
        state,
        &dep.issue_id,
        EventType::DependencyAdded,
        actor,
        None,
        Some(&dep.depends_on_id),
        Some(dep.dep_type.as_str()),
    );

    mark_dirty_on_state(state, &dep.issue_id);
    mark_dirty_on_state(state, &dep.depends_on_id);
    Ok(())
}

fn remove_dependency_on_state(state: &mut MemoryState, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()> {
    if state
        .dependencies
        .remove(&(issue_id.to_string(), depends_on_id.to_string()))
        .is_none()
    {
        return Err(StorageError::not_found(
            "dependency",
            format!("{issue_id} -> {depends_on_id}"),
        ));
    }

    emit_event(
        state,
        issue_id,
        EventType::DependencyRemoved,
        actor,
        Some(depends_on_id),
        None,
        None,
    );

    mark_dirty_on_state(state, issue_id);
    mark_dirty_on_state(state, depends_on_id);
    Ok(())
}

/// BFS from `depends_on_id` over non-exempt edges, bounded to
/// [`MAX_CYCLE_CHECK_DEPTH`] hops, looking for `issue_id`.
fn detect_cycle(state: &MemoryState, issue_id: &str, depends_on_id: &str) -> bool {
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<(String, u32)> = VecDeque::new();
    queue.push_back((depends_on_id.to_string(), 0));

    while let Some((current, depth)) = queue.pop_front() {
        if current == issue_id {
            return true;
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        if depth >= MAX_CYCLE_CHECK_DEPTH {
            continue;
        }
        for dep in state.dependencies.values() {
            if dep.issue_id == current && !dep.dep_type.is_cycle_exempt() && !visited.contains(&dep.depends_on_id)
            {
                queue.push_back((dep.depends_on_id.clone(), depth + 1));
            }
        }
    }
    false
}

/// Enumerates every cycle in the non-exempt dependency graph via iterative
/// DFS, normalizing each cycle to start at its lexicographically-smallest
/// issue ID and deduplicating rotations found from different start nodes.
fn enumerate_cycles(state: &MemoryState) -> Vec<Vec<String>> {
    let mut edges: HashMap<String, Vec<String>> = HashMap::new();
    for dep in state.dependencies.values() {
        if !dep.dep_type.is_cycle_exempt() {
            edges.entry(dep.issue_id.clone()).or_default().push(dep.depends_on_id.clone());
        }
    }

    let mut found: HashSet<Vec<String>> = HashSet::new();
    let nodes: Vec<String> = edges.keys().cloned().collect();

    for start in &nodes {
        let mut stack: Vec<String> = vec![start.clone()];
        let mut on_stack_index: HashMap<String, usize> = HashMap::new();
        on_stack_index.insert(start.clone(), 0);
        dfs_find_cycles(start, &edges, &mut stack, &mut on_stack_index, &mut found);
    }

    found.into_iter().map(normalize_cycle).collect()
}

fn dfs_find_cycles(
    current: &str,
    edges: &HashMap<String, Vec<String>>,
    stack: &mut Vec<String>,
    on_stack_index: &mut HashMap<String, usize>,
    found: &mut HashSet<Vec<String>>,
) {
    let Some(neighbors) = edges.get(current) else {
        return;
    };
    for next in neighbors {
        if let Some(&idx) = on_stack_index.get(next) {
            let cycle: Vec<String> = stack[idx..].to_vec();
            found.insert(normalize_cycle(cycle));
            continue;
        }
        stack.push(next.clone());
        on_stack_index.insert(next.clone(), stack.len() - 1);
        dfs_find_cycles(next, edges, stack, on_stack_index, found);
        stack.pop();
        on_stack_index.remove(next);
    }
}

fn normalize_cycle(cycle: Vec<String>) -> Vec<String> {
    if cycle.is_empty() {
        return cycle;
    }
    let min_pos = cycle
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let mut rotated = cycle[min_pos..].to_vec();
    rotated.extend_from_slice(&cycle[..min_pos]);
    rotated
}

fn add_label_on_state(state: &mut MemoryState, issue_id: &str, label: &str, actor: &str) -> Result<()> {
    state.labels.entry(issue_id.to_string()).or_default().insert(label.to_string());
    emit_event(state, issue_id, EventType::LabelAdded, actor, None, Some(label), None);
    mark_dirty_on_state(state, issue_id);
    Ok(())
}

fn remove_label_on_state(state: &mut MemoryState, issue_id: &str, label: &str, actor: &str) -> Result<()> {
    let removed = state
        .labels
        .get_mut(issue_id)
        .is_some_and(|labels| labels.remove(label));
    if !removed {
        return Err(StorageError::not_found("label", format!("{issue_id}:{label}")));
    }
    emit_event(state, issue_id, EventType::LabelRemoved, actor, Some(label), None, None);
    mark_dirty_on_state(state, issue_id);
    Ok(())
}

/// Statuses that keep a `blocks` edge "open" -- same set used by the
/// SQLite backend's ready/blocked/stale queries.
fn is_open_blocker_status(status: &Status) -> bool {
    status.is_open_blocker()
}

fn is_blocked_on_state(state: &MemoryState, issue_id: &str) -> bool {
    state.dependencies.values().any(|d| {
        d.issue_id == issue_id
            && d.dep_type == DependencyType::Blocks
            && match state.issues.get(&d.depends_on_id) {
                Some(target) => is_open_blocker_status(&target.status),
                None => true,
            }
    })
}

// ---------------------------------------------------------------------------
// Storage trait implementation
// ---------------------------------------------------------------------------

impl Storage for MemoryStore {
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()> {
        let mut state = self.write()?;
        insert_issue_on_state(&mut state, issue, actor)
    }

    fn create_issues(&self, issues: &[Issue], actor: &str) -> Result<()> {
        let mut state = self.write()?;
        for issue in issues {
            insert_issue_on_state(&mut state, issue, actor)?;
        }
        Ok(())
    }

    fn get_issue(&self, id: &str) -> Result<Issue> {
        self.read()?
            .issues
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("issue", id))
    }

    fn get_issue_by_external_ref(&self, external_ref: &str) -> Result<Issue> {
        self.read()?
            .issues
            .values()
            .find(|i| i.external_ref.as_deref() == Some(external_ref))
            .cloned()
            .ok_or_else(|| StorageError::not_found("issue", format!("external_ref={external_ref}")))
    }

    fn get_issues_by_ids(&self, ids: &[String]) -> Result<Vec<Issue>> {
        let state = self.read()?;
        Ok(ids.iter().filter_map(|id| state.issues.get(id).cloned()).collect())
    }

    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()> {
        let mut state = self.write()?;
        update_issue_on_state(&mut state, id, updates, actor)
    }

    fn close_issue(&self, id: &str, reason: &str, actor: &str, session: &str) -> Result<()> {
        let mut state = self.write()?;
        close_issue_on_state(&mut state, id, reason, actor, session)
    }

    fn delete_issue(&self, id: &str) -> Result<()> {
        let mut state = self.write()?;
        delete_issue_on_state(&mut state, id)
    }

    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        let state = self.read()?;
        let mut issues: Vec<Issue> = state
            .issues
            .values()
            .filter(|issue| matches_search(issue, query, filter, &state))
            .cloned()
            .collect();
        issues.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            issues.truncate(limit.max(0) as usize);
        }
        Ok(issues)
    }

    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()> {
        let mut state = self.write()?;
        add_dependency_on_state(&mut state, dep, actor)
    }

    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()> {
        let mut state = self.write()?;
        remove_dependency_on_state(&mut state, issue_id, depends_on_id, actor)
    }

    fn get_dependencies(&self, issue_id: &str) -> Result<Vec<Issue>> {
        let state = self.read()?;
        Ok(state
            .dependencies
            .values()
            .filter(|d| d.issue_id == issue_id)
            .filter_map(|d| state.issues.get(&d.depends_on_id).cloned())
            .collect())
    }

    fn get_dependents(&self, issue_id: &str) -> Result<Vec<Issue>> {
        let state = self.read()?;
        Ok(state
            .dependencies
            .values()
            .filter(|d| d.depends_on_id == issue_id)
            .filter_map(|d| state.issues.get(&d.issue_id).cloned())
            .collect())
    }

    fn get_dependencies_with_metadata(&self, issue_id: &str) -> Result<Vec<IssueWithDependencyMetadata>> {
        let state = self.read()?;
        Ok(state
            .dependencies
            .values()
            .filter(|d| d.issue_id == issue_id)
            .filter_map(|d| {
                state
                    .issues
                    .get(&d.depends_on_id)
                    .cloned()
                    .map(|issue| IssueWithDependencyMetadata { issue, dependency: d.clone() })
            })
            .collect())
    }

    fn get_dependents_with_metadata(&self, issue_id: &str) -> Result<Vec<IssueWithDependencyMetadata>> {
        let state = self.read()?;
        Ok(state
            .dependencies
            .values()
            .filter(|d| d.depends_on_id == issue_id)
            .filter_map(|d| {
                state
                    .issues
                    .get(&d.issue_id)
                    .cloned()
                    .map(|issue| IssueWithDependencyMetadata { issue, dependency: d.clone() })
            })
            .collect())
    }

    fn get_dependency_tree(
        &self,
        issue_id: &str,
        max_depth: i32,
        _show_all_paths: bool,
        reverse: bool,
    ) -> Result<Vec<TreeNode>> {
        let state = self.read()?;
        let root = state
            .issues
            .get(issue_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("issue", issue_id))?;

        let mut result = vec![TreeNode {
            issue: root,
            depth: 0,
            dep_type: DependencyType::Blocks,
            reverse,
        }];
        let mut visited: HashSet<String> = HashSet::from([issue_id.to_string()]);
        let mut queue: VecDeque<(String, i32)> = VecDeque::from([(issue_id.to_string(), 0)]);

        while let Some((current_id, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let edges: Vec<(String, DependencyType)> = state
                .dependencies
                .values()
                .filter_map(|d| {
                    if reverse && d.depends_on_id == current_id {
                        Some((d.issue_id.clone(), d.dep_type.clone()))
                    } else if !reverse && d.issue_id == current_id {
                        Some((d.depends_on_id.clone(), d.dep_type.clone()))
                    } else {
                        None
                    }
                })
                .collect();

            for (next_id, dep_type) in edges {
                if visited.contains(&next_id) {
                    continue;
                }
                visited.insert(next_id.clone());
                if let Some(issue) = state.issues.get(&next_id).cloned() {
                    result.push(TreeNode {
                        issue,
                        depth: depth + 1,
                        dep_type: dep_type.clone(),
                        reverse,
                    });
                    queue.push_back((next_id, depth + 1));
                }
            }
        }

        Ok(result)
    }

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        let mut state = self.write()?;
        add_label_on_state(&mut state, issue_id, label, actor)
    }

    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        let mut state = self.write()?;
        remove_label_on_state(&mut state, issue_id, label, actor)
    }

    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>> {
        Ok(self
            .read()?
            .labels
            .get(issue_id)
            .map(|labels| labels.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn get_issues_by_label(&self, label: &str) -> Result<Vec<Issue>> {
        let state = self.read()?;
        let mut issues: Vec<Issue> = state
            .labels
            .iter()
            .filter(|(_, labels)| labels.contains(label))
            .filter_map(|(issue_id, _)| state.issues.get(issue_id).cloned())
            .collect();
        issues.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(issues)
    }

    fn get_ready_work(&self, filter: &WorkFilter) -> Result<Vec<Issue>> {
        let state = self.read()?;
        let now = Utc::now();
        let recency_cutoff = now - chrono::Duration::hours(48);

        let mut issues: Vec<Issue> = state
            .issues
            .values()
            .filter(|issue| {
                issue.status == Status::Open
                    && !issue.is_template
                    && !is_blocked_for_ready_work(&state, &issue.id)
                    && (filter.include_ephemeral || !issue.ephemeral)
                    && (filter.include_deferred || issue.defer_until.is_none_or(|d| d <= now))
                    && matches_work_filter(issue, filter, &state)
            })
            .cloned()
            .collect();

        match filter.sort_policy {
            beads_core::enums::SortPolicy::Priority => {
                issues.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));
            }
            beads_core::enums::SortPolicy::Oldest => {
                issues.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            }
            _ => issues.sort_by(|a, b| {
                let a_recent = a.updated_at >= recency_cutoff;
                let b_recent = b.updated_at >= recency_cutoff;
                b_recent
                    .cmp(&a_recent)
                    .then(a.priority.cmp(&b.priority))
                    .then(a.created_at.cmp(&b.created_at))
            }),
        }

        if let Some(limit) = filter.limit {
            issues.truncate(limit.max(0) as usize);
        }
        Ok(issues)
    }

    fn get_blocked_issues(&self, filter: &WorkFilter) -> Result<Vec<BlockedIssue>> {
        let state = self.read()?;
        let mut result: Vec<BlockedIssue> = state
            .issues
            .values()
            .filter(|issue| is_open_blocker_status(&issue.status))
            .filter_map(|issue| {
                let blocked_by_count = state
                    .dependencies
                    .values()
                    .filter(|d| {
                        d.issue_id == issue.id
                            && d.dep_type == DependencyType::Blocks
                            && state
                                .issues
                                .get(&d.depends_on_id)
                                .is_some_and(|t| is_open_blocker_status(&t.status))
                    })
                    .count() as i32;
                if blocked_by_count == 0 {
                    return None;
                }
                if let Some(ref assignee) = filter.assignee {
                    if &issue.assignee != assignee {
                        return None;
                    }
                }
                if let Some(priority) = filter.priority {
                    if issue.priority != priority {
                        return None;
                    }
                }
                Some(BlockedIssue { issue: issue.clone(), blocked_by_count })
            })
            .collect();

        result.sort_by(|a, b| a.issue.priority.cmp(&b.issue.priority).then(a.issue.created_at.cmp(&b.issue.created_at)));
        if let Some(limit) = filter.limit {
            result.truncate(limit.max(0) as usize);
        }
        Ok(result)
    }

    fn get_epics_eligible_for_closure(&self) -> Result<Vec<EpicStatus>> {
        use beads_core::enums::IssueType;

        let state = self.read()?;
        let mut result: Vec<EpicStatus> = state
            .issues
            .values()
            .filter(|epic| epic.issue_type == IssueType::Epic && epic.status != Status::Closed)
            .filter_map(|epic| {
                let children: Vec<&Issue> = state
                    .dependencies
                    .values()
                    .filter(|d| d.depends_on_id == epic.id && d.dep_type == DependencyType::ParentChild)
                    .filter_map(|d| state.issues.get(&d.issue_id))
                    .collect();
                if children.is_empty() {
                    return None;
                }
                let total_children = children.len() as i32;
                let closed_children = children.iter().filter(|c| c.status == Status::Closed).count() as i32;
                if total_children != closed_children {
                    return None;
                }
                Some(EpicStatus { epic: epic.clone(), total_children, closed_children })
            })
            .collect();

        result.sort_by(|a, b| a.epic.created_at.cmp(&b.epic.created_at));
        Ok(result)
    }

    fn is_blocked(&self, issue_id: &str) -> Result<bool> {
        let state = self.read()?;
        Ok(is_blocked_on_state(&state, issue_id))
    }

    fn get_stale(&self, filter: &StaleFilter) -> Result<Vec<Issue>> {
        let state = self.read()?;
        let cutoff = Utc::now() - chrono::Duration::days(filter.days as i64);

        let mut issues: Vec<Issue> = state
            .issues
            .values()
            .filter(|issue| issue.updated_at <= cutoff)
            .filter(|issue| match &filter.status {
                Some(status) => issue.status.as_str() == status,
                None => !matches!(issue.status, Status::Closed | Status::Tombstone),
            })
            .cloned()
            .collect();

        issues.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        if let Some(limit) = filter.limit {
            issues.truncate(limit.max(0) as usize);
        }
        Ok(issues)
    }

    fn molecule_progress(&self, issue_id: &str) -> Result<MoleculeProgress> {
        let state = self.read()?;
        let issue = state
            .issues
            .get(issue_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("issue", issue_id))?;

        let tracked: Vec<&Dependency> = state
            .dependencies
            .values()
            .filter(|d| d.issue_id == issue_id && d.dep_type == DependencyType::Tracks)
            .collect();
        let total_tracked = tracked.len() as i32;
        let closed_tracked = tracked
            .iter()
            .filter(|d| {
                state
                    .issues
                    .get(&d.depends_on_id)
                    .is_some_and(|t| matches!(t.status, Status::Closed | Status::Tombstone))
            })
            .count() as i32;

        Ok(MoleculeProgress { issue, total_tracked, closed_tracked })
    }

    fn newly_unblocked_by_close(&self, closed_issue_id: &str) -> Result<Vec<Issue>> {
        let state = self.read()?;
        let mut issues: Vec<Issue> = state
            .issues
            .values()
            .filter(|issue| matches!(issue.status, Status::Open | Status::InProgress) && !issue.pinned)
            .filter(|issue| {
                state.dependencies.values().any(|d| {
                    d.issue_id == issue.id && d.depends_on_id == closed_issue_id && d.dep_type == DependencyType::Blocks
                })
            })
            .filter(|issue| !is_blocked_on_state(&state, &issue.id))
            .cloned()
            .collect();

        issues.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));
        Ok(issues)
    }

    fn get_dirty_issues(&self) -> Result<Vec<String>> {
        Ok(self.read()?.dirty.clone())
    }

    fn clear_dirty(&self, ids: &[String]) -> Result<()> {
        let mut state = self.write()?;
        clear_dirty_on_state(&mut state, ids);
        Ok(())
    }

    fn add_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment> {
        let mut state = self.write()?;
        state.next_comment_id += 1;
        let comment = Comment {
            id: state.next_comment_id,
            issue_id: issue_id.to_string(),
            author: author.to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
        };
        state.comments.entry(issue_id.to_string()).or_default().push(comment.clone());
        emit_event(&mut state, issue_id, EventType::Commented, author, None, None, Some(text));
        Ok(comment)
    }

    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>> {
        Ok(self.read()?.comments.get(issue_id).cloned().unwrap_or_default())
    }

    fn get_events(&self, issue_id: &str, limit: i32) -> Result<Vec<Event>> {
        let state = self.read()?;
        let mut events: Vec<Event> = state.events.iter().filter(|e| e.issue_id == issue_id).cloned().collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        events.truncate(limit.max(0) as usize);
        Ok(events)
    }

    fn get_all_events_since(&self, since_id: i64) -> Result<Vec<Event>> {
        let state = self.read()?;
        let mut events: Vec<Event> = state.events.iter().filter(|e| e.id > since_id).cloned().collect();
        events.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(events)
    }

    fn get_statistics(&self) -> Result<Statistics> {
        let state = self.read()?;
        let mut stats = Statistics::default();
        stats.total_issues = state.issues.len() as i64;

        let mut by_type: HashMap<String, i64> = HashMap::new();
        let mut by_priority: HashMap<i32, i64> = HashMap::new();
        let mut by_assignee: HashMap<String, i64> = HashMap::new();

        for issue in state.issues.values() {
            match issue.status {
                Status::Open => stats.open_issues += 1,
                Status::Closed => stats.closed_issues += 1,
                Status::InProgress => stats.in_progress_issues += 1,
                Status::Blocked => stats.blocked_issues += 1,
                Status::Deferred => stats.deferred_issues += 1,
                _ => {}
            }
            *by_type.entry(issue.issue_type.as_str().to_string()).or_insert(0) += 1;
            *by_priority.entry(issue.priority).or_insert(0) += 1;
            if issue.status != Status::Closed {
                let assignee = if issue.assignee.is_empty() { "(unassigned)".to_string() } else { issue.assignee.clone() };
                *by_assignee.entry(assignee).or_insert(0) += 1;
            }
        }

        stats.by_type = by_type.into_iter().collect();
        stats.by_type.sort_by(|a, b| b.1.cmp(&a.1));
        stats.by_priority = by_priority.into_iter().collect();
        stats.by_priority.sort_by(|a, b| a.0.cmp(&b.0));
        stats.by_assignee = by_assignee.into_iter().collect();
        stats.by_assignee.sort_by(|a, b| b.1.cmp(&a.1));

        Ok(stats)
    }

    fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.write()?.config.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get_config(&self, key: &str) -> Result<String> {
        self.read()?.config.get(key).cloned().ok_or_else(|| StorageError::not_found("config", key))
    }

    fn get_all_config(&self) -> Result<HashMap<String, String>> {
        Ok(self.read()?.config.clone())
    }

    fn run_in_transaction(&self, f: &dyn Fn(&dyn Transaction) -> Result<()>) -> Result<()> {
        let mut state = self.write()?;
        let snapshot = state.clone();
        let tx = MemoryTx { state: std::cell::RefCell::new(&mut *state) };
        match f(&tx) {
            Ok(()) => Ok(()),
            Err(e) => {
                *state = snapshot;
                Err(e)
            }
        }
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// `get_ready_work`'s open-blocker check also treats `parent-child` edges as
/// blocking, unlike `is_blocked`/`newly_unblocked_by_close` which only look
/// at `blocks` edges -- matching the SQLite backend's two separate
/// predicates.
fn is_blocked_for_ready_work(state: &MemoryState, issue_id: &str) -> bool {
    state.dependencies.values().any(|d| {
        d.issue_id == issue_id
            && matches!(d.dep_type, DependencyType::Blocks | DependencyType::ParentChild)
            && state.issues.get(&d.depends_on_id).is_some_and(|t| is_open_blocker_status(&t.status))
    })
}

fn matches_work_filter(issue: &Issue, filter: &WorkFilter, state: &MemoryState) -> bool {
    if let Some(ref issue_type) = filter.issue_type {
        if issue.issue_type.as_str() != issue_type {
            return false;
        }
    }
    if let Some(priority) = filter.priority {
        if issue.priority != priority {
            return false;
        }
    }
    if let Some(ref assignee) = filter.assignee {
        if &issue.assignee != assignee {
            return false;
        }
    }
    if filter.unassigned && !issue.assignee.is_empty() {
        return false;
    }
    let labels = state.labels.get(&issue.id);
    for label in &filter.labels {
        if !labels.is_some_and(|l| l.contains(label)) {
            return false;
        }
    }
    if !filter.labels_any.is_empty() && !labels.is_some_and(|l| filter.labels_any.iter().any(|lbl| l.contains(lbl))) {
        return false;
    }
    true
}

fn matches_search(issue: &Issue, query: &str, filter: &IssueFilter, state: &MemoryState) -> bool {
    if !query.is_empty() {
        let q = query.to_lowercase();
        let hit = issue.title.to_lowercase().contains(&q)
            || issue.description.to_lowercase().contains(&q)
            || issue.notes.to_lowercase().contains(&q);
        if !hit {
            return false;
        }
    }
    if let Some(ref status) = filter.status {
        if &issue.status != status {
            return false;
        }
    }
    if let Some(priority) = filter.priority {
        if issue.priority != priority {
            return false;
        }
    }
    if let Some(min) = filter.priority_min {
        if issue.priority < min {
            return false;
        }
    }
    if let Some(max) = filter.priority_max {
        if issue.priority > max {
            return false;
        }
    }
    if let Some(ref issue_type) = filter.issue_type {
        if &issue.issue_type != issue_type {
            return false;
        }
    }
    if let Some(ref assignee) = filter.assignee {
        if &issue.assignee != assignee {
            return false;
        }
    }
    if let Some(ref s) = filter.title_contains {
        if !issue.title.contains(s.as_str()) {
            return false;
        }
    }
    if let Some(ref s) = filter.description_contains {
        if !issue.description.contains(s.as_str()) {
            return false;
        }
    }
    if let Some(ref s) = filter.notes_contains {
        if !issue.notes.contains(s.as_str()) {
            return false;
        }
    }
    if let Some(t) = filter.created_after {
        if issue.created_at < t {
            return false;
        }
    }
    if let Some(t) = filter.created_before {
        if issue.created_at > t {
            return false;
        }
    }
    if let Some(t) = filter.updated_after {
        if issue.updated_at < t {
            return false;
        }
    }
    if let Some(t) = filter.updated_before {
        if issue.updated_at > t {
            return false;
        }
    }
    if let Some(t) = filter.closed_after {
        if !issue.closed_at.is_some_and(|c| c >= t) {
            return false;
        }
    }
    if let Some(t) = filter.closed_before {
        if !issue.closed_at.is_some_and(|c| c <= t) {
            return false;
        }
    }
    if filter.no_assignee && !issue.assignee.is_empty() {
        return false;
    }
    if filter.empty_description && !issue.description.is_empty() {
        return false;
    }
    if let Some(ref prefix) = filter.id_prefix {
        if !issue.id.starts_with(prefix.as_str()) {
            return false;
        }
    }
    if let Some(ref prefix) = filter.spec_id_prefix {
        if !issue.spec_id.starts_with(prefix.as_str()) {
            return false;
        }
    }
    if let Some(ephemeral) = filter.ephemeral {
        if issue.ephemeral != ephemeral {
            return false;
        }
    }
    if let Some(pinned) = filter.pinned {
        if issue.pinned != pinned {
            return false;
        }
    }
    if let Some(is_template) = filter.is_template {
        if issue.is_template != is_template {
            return false;
        }
    }
    if let Some(ref source_repo) = filter.source_repo {
        if &issue.source_repo != source_repo {
            return false;
        }
    }
    if filter.deferred && issue.defer_until.is_none() {
        return false;
    }
    if let Some(t) = filter.defer_after {
        if !issue.defer_until.is_some_and(|d| d >= t) {
            return false;
        }
    }
    if let Some(t) = filter.defer_before {
        if !issue.defer_until.is_some_and(|d| d <= t) {
            return false;
        }
    }
    if let Some(t) = filter.due_after {
        if !issue.due_at.is_some_and(|d| d >= t) {
            return false;
        }
    }
    if let Some(t) = filter.due_before {
        if !issue.due_at.is_some_and(|d| d <= t) {
            return false;
        }
    }
    if filter.overdue && !issue.due_at.is_some_and(|d| d < Utc::now() && issue.status != Status::Closed) {
        return false;
    }
    if filter.exclude_status.contains(&issue.status) {
        return false;
    }
    if filter.exclude_types.contains(&issue.issue_type) {
        return false;
    }
    if !filter.ids.is_empty() && !filter.ids.contains(&issue.id) {
        return false;
    }
    let labels = state.labels.get(&issue.id);
    for label in &filter.labels {
        if !labels.is_some_and(|l| l.contains(label)) {
            return false;
        }
    }
    if !filter.labels_any.is_empty() && !labels.is_some_and(|l| filter.labels_any.iter().any(|lbl| l.contains(lbl))) {
        return false;
    }
    if filter.no_labels && labels.is_some_and(|l| !l.is_empty()) {
        return false;
    }
    true
}

// ---------------------------------------------------------------------------
// Transaction implementation
// ---------------------------------------------------------------------------

/// Wraps a mutable borrow of the locked [`MemoryState`] for the duration of
/// one `run_in_transaction` call. The [`RefCell`](std::cell::RefCell) lets
/// every [`Transaction`] method take `&self` (the trait's shape) while still
/// mutating through the single write-lock guard held by the caller.
struct MemoryTx<'a> {
    state: std::cell::RefCell<&'a mut MemoryState>,
}

impl Transaction for MemoryTx<'_> {
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()> {
        insert_issue_on_state(&mut self.state.borrow_mut(), issue, actor)
    }

    fn create_issues(&self, issues: &[Issue], actor: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        for issue in issues {
            insert_issue_on_state(&mut state, issue, actor)?;
        }
        Ok(())
    }

    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()> {
        update_issue_on_state(&mut self.state.borrow_mut(), id, updates, actor)
    }

    fn close_issue(&self, id: &str, reason: &str, actor: &str, session: &str) -> Result<()> {
        close_issue_on_state(&mut self.state.borrow_mut(), id, reason, actor, session)
    }

    fn delete_issue(&self, id: &str) -> Result<()> {
        delete_issue_on_state(&mut self.state.borrow_mut(), id)
    }

    fn get_issue(&self, id: &str) -> Result<Issue> {
        self.state
            .borrow()
            .issues
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("issue", id))
    }

    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        let state = self.state.borrow();
        let mut issues: Vec<Issue> = state
            .issues
            .values()
            .filter(|issue| matches_search(issue, query, filter, &state))
            .cloned()
            .collect();
        issues.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(issues)
    }

    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()> {
        add_dependency_on_state(&mut self.state.borrow_mut(), dep, actor)
    }

    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()> {
        remove_dependency_on_state(&mut self.state.borrow_mut(), issue_id, depends_on_id, actor)
    }

    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        Ok(self
            .state
            .borrow()
            .dependencies
            .values()
            .filter(|d| d.issue_id == issue_id)
            .cloned()
            .collect())
    }

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        add_label_on_state(&mut self.state.borrow_mut(), issue_id, label, actor)
    }

    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        remove_label_on_state(&mut self.state.borrow_mut(), issue_id, label, actor)
    }

    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .borrow()
            .labels
            .get(issue_id)
            .map(|labels| labels.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.state.borrow_mut().config.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get_config(&self, key: &str) -> Result<String> {
        self.state.borrow().config.get(key).cloned().ok_or_else(|| StorageError::not_found("config", key))
    }

    fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.state.borrow_mut().metadata.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get_metadata(&self, key: &str) -> Result<String> {
        self.state.borrow().metadata.get(key).cloned().ok_or_else(|| StorageError::not_found("metadata", key))
    }

    fn add_comment(&self, issue_id: &str, actor: &str, comment: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.next_comment_id += 1;
        let c = Comment {
            id: state.next_comment_id,
            issue_id: issue_id.to_string(),
            author: actor.to_string(),
            text: comment.to_string(),
            created_at: Utc::now(),
        };
        state.comments.entry(issue_id.to_string()).or_default().push(c);
        Ok(())
    }

    fn import_comment(
        &self,
        issue_id: &str,
        author: &str,
        text: &str,
        created_at: chrono::DateTime<Utc>,
    ) -> Result<Comment> {
        let mut state = self.state.borrow_mut();
        state.next_comment_id += 1;
        let comment = Comment {
            id: state.next_comment_id,
            issue_id: issue_id.to_string(),
            author: author.to_string(),
            text: text.to_string(),
            created_at,
        };
        state.comments.entry(issue_id.to_string()).or_default().push(comment.clone());
        Ok(comment)
    }

    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>> {
        Ok(self.state.borrow().comments.get(issue_id).cloned().unwrap_or_default())
    }
}

impl MemoryStore {
    /// Enumerates every cycle currently present in the non-exempt
    /// dependency graph.
    pub fn enumerate_cycles(&self) -> Result<Vec<Vec<String>>> {
        let state = self.read()?;
        Ok(enumerate_cycles(&state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beads_core::enums::{DependencyType, IssueType};
    use beads_core::issue::IssueBuilder;

    fn make_dep(issue_id: &str, depends_on_id: &str, dep_type: DependencyType) -> Dependency {
        Dependency {
            issue_id: issue_id.into(),
            depends_on_id: depends_on_id.into(),
            dep_type,
            created_at: Utc::now(),
            created_by: "test".into(),
            metadata: String::new(),
            thread_id: String::new(),
        }
    }

    #[test]
    fn create_and_get_issue() {
        let store = MemoryStore::new();
        let issue = IssueBuilder::new("Memory issue").id("bd-m1").build();
        store.create_issue(&issue, "alice").unwrap();

        let fetched = store.get_issue("bd-m1").unwrap();
        assert_eq!(fetched.title, "Memory issue");
        assert!(!fetched.content_hash.is_empty());

        let dirty = store.get_dirty_issues().unwrap();
        assert_eq!(dirty, vec!["bd-m1".to_string()]);
    }

    #[test]
    fn dependency_cycle_detection() {
        let store = MemoryStore::new();
        for id in ["bd-mc1", "bd-mc2", "bd-mc3"] {
            store.create_issue(&IssueBuilder::new(id).id(id).build(), "alice").unwrap();
        }
        store.add_dependency(&make_dep("bd-mc1", "bd-mc2", DependencyType::Blocks), "alice").unwrap();
        store.add_dependency(&make_dep("bd-mc2", "bd-mc3", DependencyType::Blocks), "alice").unwrap();

        let err = store
            .add_dependency(&make_dep("bd-mc3", "bd-mc1", DependencyType::Blocks), "alice")
            .unwrap_err();
        assert!(matches!(err, StorageError::CycleDetected));
    }

    #[test]
    fn ready_work_excludes_blocked() {
        let store = MemoryStore::new();
        let blocker = IssueBuilder::new("Blocker").id("bd-mr1").status(Status::Open).build();
        let blocked = IssueBuilder::new("Blocked").id("bd-mr2").status(Status::Open).build();
        store.create_issue(&blocker, "alice").unwrap();
        store.create_issue(&blocked, "alice").unwrap();
        store.add_dependency(&make_dep("bd-mr2", "bd-mr1", DependencyType::Blocks), "alice").unwrap();

        let ready = store.get_ready_work(&WorkFilter::default()).unwrap();
        let ids: Vec<&str> = ready.iter().map(|i| i.id.as_str()).collect();
        assert!(ids.contains(&"bd-mr1"));
        assert!(!ids.contains(&"bd-mr2"));
    }

    #[test]
    fn newly_unblocked_by_close_surfaces_waiting_issue() {
        let store = MemoryStore::new();
        let blocker = IssueBuilder::new("bd-2").id("bd-2").status(Status::Open).build();
        let waiter = IssueBuilder::new("bd-1").id("bd-1").status(Status::Open).build();
        store.create_issue(&blocker, "alice").unwrap();
        store.create_issue(&waiter, "alice").unwrap();
        store.add_dependency(&make_dep("bd-1", "bd-2", DependencyType::Blocks), "alice").unwrap();

        assert!(store.get_ready_work(&WorkFilter::default()).unwrap().iter().all(|i| i.id != "bd-1"));

        store.close_issue("bd-2", "done", "alice", "session-1").unwrap();

        let unblocked = store.newly_unblocked_by_close("bd-2").unwrap();
        assert_eq!(unblocked.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["bd-1"]);

        let ready = store.get_ready_work(&WorkFilter::default()).unwrap();
        assert_eq!(ready.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["bd-1"]);
    }

    #[test]
    fn convoy_auto_closes_when_all_tracked_issues_close() {
        let store = MemoryStore::new();
        let convoy = IssueBuilder::new("Convoy").id("bd-cv1").issue_type(IssueType::Epic).build();
        let tracked = IssueBuilder::new("Tracked").id("bd-cv2").status(Status::Open).build();
        store.create_issue(&convoy, "alice").unwrap();
        store.create_issue(&tracked, "alice").unwrap();
        store.add_label("bd-cv1", "gt:convoy", "alice").unwrap();
        store.add_dependency(&make_dep("bd-cv1", "bd-cv2", DependencyType::Tracks), "alice").unwrap();

        store.close_issue("bd-cv2", "done", "alice", "session-1").unwrap();

        let convoy_after = store.get_issue("bd-cv1").unwrap();
        assert_eq!(convoy_after.status, Status::Closed);
        assert_eq!(convoy_after.close_reason, "convoy auto-close: all tracked issues closed");
    }

    #[test]
    fn epics_eligible_for_closure_requires_all_children_closed() {
        let store = MemoryStore::new();
        let epic = IssueBuilder::new("Epic").id("bd-me1").issue_type(IssueType::Epic).build();
        let child1 = IssueBuilder::new("Child 1").id("bd-me2").status(Status::Closed).closed_at(Utc::now()).build();
        let child2 = IssueBuilder::new("Child 2").id("bd-me3").status(Status::Open).build();
        store.create_issue(&epic, "alice").unwrap();
        store.create_issue(&child1, "alice").unwrap();
        store.create_issue(&child2, "alice").unwrap();
        store.add_dependency(&make_dep("bd-me2", "bd-me1", DependencyType::ParentChild), "alice").unwrap();
        store.add_dependency(&make_dep("bd-me3", "bd-me1", DependencyType::ParentChild), "alice").unwrap();

        assert!(store.get_epics_eligible_for_closure().unwrap().is_empty());

        store.close_issue("bd-me3", "done", "alice", "session-1").unwrap();
        let eligible = store.get_epics_eligible_for_closure().unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].epic.id, "bd-me1");
    }

    #[test]
    fn molecule_progress_counts_tracked_edges() {
        let store = MemoryStore::new();
        let convoy = IssueBuilder::new("Convoy").id("bd-mp1").build();
        let t1 = IssueBuilder::new("T1").id("bd-mp2").status(Status::Closed).closed_at(Utc::now()).build();
        let t2 = IssueBuilder::new("T2").id("bd-mp3").status(Status::Open).build();
        store.create_issue(&convoy, "alice").unwrap();
        store.create_issue(&t1, "alice").unwrap();
        store.create_issue(&t2, "alice").unwrap();
        store.add_dependency(&make_dep("bd-mp1", "bd-mp2", DependencyType::Tracks), "alice").unwrap();
        store.add_dependency(&make_dep("bd-mp1", "bd-mp3", DependencyType::Tracks), "alice").unwrap();

        let progress = store.molecule_progress("bd-mp1").unwrap();
        assert_eq!(progress.total_tracked, 2);
        assert_eq!(progress.closed_tracked, 1);
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let store = MemoryStore::new();
        let result = store.run_in_transaction(&|tx| {
            let issue = IssueBuilder::new("Should rollback").id("bd-mt1").build();
            tx.create_issue(&issue, "alice")?;
            Err(StorageError::Internal("forced rollback".into()))
        });
        assert!(result.is_err());
        assert!(store.get_issue("bd-mt1").unwrap_err().is_not_found());
    }

    #[test]
    fn get_stale_respects_days_and_status() {
        let store = MemoryStore::new();
        let mut old = IssueBuilder::new("Old").id("bd-ms1").status(Status::Open).build();
        old.updated_at = Utc::now() - chrono::Duration::days(60);
        store.create_issue(&old, "alice").unwrap();

        let stale = store.get_stale(&StaleFilter::default()).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, "bd-ms1");

        let stale_wrong_status = store
            .get_stale(&StaleFilter { status: Some("closed".into()), ..StaleFilter::default() })
            .unwrap();
        assert!(stale_wrong_status.is_empty());
    }
}
