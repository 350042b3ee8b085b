//! Push/pull/fetch/sync orchestration against a versioned backend's remote.
//!
//! This module only knows how to drive [`DoltRemoteOps`] under the
//! credential envelope with a bounded deadline; it has no opinion on how a
//! concrete versioned backend talks to Dolt. The versioned (Dolt) storage
//! backend implements [`DoltRemoteOps`] against its own connection.

use std::sync::mpsc;
use std::time::Duration;

use beads_config::config::ConflictStrategy;
use tracing::{info, warn};

use crate::envelope::with_credentials;
use crate::error::{FederationError, Result};
use crate::vault::Peer;

/// Default bound on how long a single peer operation (fetch/pull/push) may
/// hold the credential envelope before it is treated as stuck.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(120);

/// A single conflicting record surfaced by a merge attempt.
#[derive(Debug, Clone)]
pub struct Conflict {
    pub table: String,
    pub id: String,
    pub description: String,
}

/// Outcome of fetching from a remote without merging.
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    pub commits_fetched: u64,
}

/// Outcome of a pull (fetch + merge).
#[derive(Debug, Clone, Default)]
pub struct PullReport {
    pub commits_fetched: u64,
    pub conflicts: Vec<Conflict>,
}

/// Outcome of a full sync (fetch, merge, resolve, push).
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub pull: PullReport,
    pub resolved_conflicts: usize,
    pub push_succeeded: bool,
    pub push_error: Option<String>,
}

/// The subset of a versioned backend's remote operations federation needs
/// to drive. A concrete `mysql`-backed Dolt store implements this against
/// `DOLT_FETCH()`/`DOLT_MERGE()`/`DOLT_PUSH()` and friends.
pub trait DoltRemoteOps: Send {
    /// Fetches remote history without merging it into the working set.
    fn fetch(&self, peer: &Peer) -> std::result::Result<FetchReport, FederationError>;

    /// Merges previously-fetched history into the working set, returning
    /// any conflicts it could not resolve automatically.
    fn merge(&self, peer: &Peer) -> std::result::Result<Vec<Conflict>, FederationError>;

    /// Resolves a conflict by keeping either the local (`ours`) or remote
    /// (`theirs`) version, per `strategy`.
    fn resolve_conflict(
        &self,
        conflict: &Conflict,
        strategy: &ConflictStrategy,
    ) -> std::result::Result<(), FederationError>;

    /// Commits the current working set (e.g. after conflict resolution).
    fn commit_resolution(&self, peer: &Peer) -> std::result::Result<(), FederationError>;

    /// Pushes local history to the remote.
    fn push(&self, peer: &Peer) -> std::result::Result<(), FederationError>;
}

/// Runs `op` inside the credential envelope, failing with
/// [`FederationError::DeadlineExceeded`] if it does not finish within
/// `deadline`.
///
/// The operation itself cannot be cancelled once the underlying blocking
/// call (e.g. a MySQL round-trip) is in flight -- `op` keeps running on its
/// thread even past the deadline, matching the documented "best effort
/// abandon" semantics of a bounded wait around an uncancellable resource.
fn with_deadline<T: Send + 'static>(
    peer: &Peer,
    deadline: Duration,
    op: impl FnOnce() -> std::result::Result<T, FederationError> + Send + 'static,
) -> Result<T> {
    let (tx, rx) = mpsc::channel();
    let peer_name = peer.name.clone();
    let username = peer.username.clone().unwrap_or_default();
    let password = peer.password.clone().unwrap_or_default();

    std::thread::spawn(move || {
        let peer_for_envelope = peer_name.clone();
        let result = with_credentials(&peer_for_envelope, &username, &password, op);
        let _ = tx.send(result);
    });

    match rx.recv_timeout(deadline) {
        Ok(result) => Ok(result?),
        Err(mpsc::RecvTimeoutError::Timeout) => {
            warn!(peer = %peer.name, deadline_secs = deadline.as_secs(), "peer operation exceeded deadline");
            Err(FederationError::DeadlineExceeded {
                peer: peer.name.clone(),
                deadline_secs: deadline.as_secs(),
            })
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(FederationError::Storage(
            beads_storage::StorageError::Internal("peer operation thread panicked".to_string()),
        )),
    }
}

/// Fetches from `peer` without merging.
pub fn fetch(ops: &(impl DoltRemoteOps + Clone + 'static), peer: &Peer, deadline: Duration) -> Result<FetchReport> {
    let ops = ops.clone();
    let peer_owned = peer.clone_for_worker();
    with_deadline(peer, deadline, move || ops.fetch(&peer_owned))
}

/// Pulls from `peer`: fetch, then merge, returning any conflicts.
pub fn pull(ops: &(impl DoltRemoteOps + Clone + 'static), peer: &Peer, deadline: Duration) -> Result<PullReport> {
    let fetch_report = fetch(ops, peer, deadline)?;

    let ops2 = ops.clone();
    let peer_owned = peer.clone_for_worker();
    let conflicts = with_deadline(peer, deadline, move || ops2.merge(&peer_owned))?;

    Ok(PullReport {
        commits_fetched: fetch_report.commits_fetched,
        conflicts,
    })
}

/// Runs a full sync against `peer`: fetch, merge, resolve any conflicts per
/// `strategy`, commit the resolution, then attempt a push. Push failure is
/// reported in [`SyncReport::push_error`] rather than failing the whole
/// operation -- a sync that successfully pulled and resolved conflicts
/// should not be undone just because the push leg failed.
pub fn sync_peer(
    ops: &(impl DoltRemoteOps + Clone + 'static),
    peer: &Peer,
    strategy: &ConflictStrategy,
    deadline: Duration,
) -> Result<SyncReport> {
    let pull_report = pull(ops, peer, deadline)?;

    let mut resolved = 0;
    for conflict in &pull_report.conflicts {
        if matches!(strategy, ConflictStrategy::Manual) {
            return Err(FederationError::UnresolvedConflicts {
                peer: peer.name.clone(),
                count: pull_report.conflicts.len(),
            });
        }
        ops.resolve_conflict(conflict, strategy)?;
        resolved += 1;
    }

    if resolved > 0 {
        info!(peer = %peer.name, resolved, "committing conflict resolution");
        ops.commit_resolution(peer)?;
    }

    let push_result = {
        let ops = ops.clone();
        let peer_owned = peer.clone_for_worker();
        with_deadline(peer, deadline, move || ops.push(&peer_owned))
    };

    let (push_succeeded, push_error) = match push_result {
        Ok(()) => (true, None),
        Err(e) => {
            warn!(peer = %peer.name, error = %e, "push failed after successful pull");
            (false, Some(e.to_string()))
        }
    };

    Ok(SyncReport {
        pull: pull_report,
        resolved_conflicts: resolved,
        push_succeeded,
        push_error,
    })
}

impl Peer {
    /// Clones the fields a worker thread needs, without requiring `Peer`
    /// itself to be `Send`-audited beyond its already-owned `String`/`chrono` fields.
    fn clone_for_worker(&self) -> Peer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beads_config::config::Sovereignty;
    use chrono::Utc;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct MockOps {
        conflicts: Arc<Mutex<Vec<Conflict>>>,
        push_calls: Arc<Mutex<u32>>,
        fail_push: bool,
    }

    impl DoltRemoteOps for MockOps {
        fn fetch(&self, _peer: &Peer) -> std::result::Result<FetchReport, FederationError> {
            Ok(FetchReport { commits_fetched: 3 })
        }

        fn merge(&self, _peer: &Peer) -> std::result::Result<Vec<Conflict>, FederationError> {
            Ok(self.conflicts.lock().unwrap().clone())
        }

        fn resolve_conflict(
            &self,
            _conflict: &Conflict,
            _strategy: &ConflictStrategy,
        ) -> std::result::Result<(), FederationError> {
            Ok(())
        }

        fn commit_resolution(&self, _peer: &Peer) -> std::result::Result<(), FederationError> {
            Ok(())
        }

        fn push(&self, _peer: &Peer) -> std::result::Result<(), FederationError> {
            *self.push_calls.lock().unwrap() += 1;
            if self.fail_push {
                Err(FederationError::Transport {
                    peer: "origin".to_string(),
                    source: Box::new(std::io::Error::other("connection refused")),
                })
            } else {
                Ok(())
            }
        }
    }

    fn test_peer() -> Peer {
        Peer {
            name: "origin".to_string(),
            url: "dolthub://org/beads".to_string(),
            username: Some("alice".to_string()),
            password: Some("hunter2".to_string()),
            sovereignty: Sovereignty::None,
            created_at: Utc::now(),
            last_sync: None,
        }
    }

    #[test]
    fn sync_with_no_conflicts_pushes() {
        let ops = MockOps {
            conflicts: Arc::new(Mutex::new(Vec::new())),
            push_calls: Arc::new(Mutex::new(0)),
            fail_push: false,
        };
        let report = sync_peer(
            &ops,
            &test_peer(),
            &ConflictStrategy::Newest,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(report.resolved_conflicts, 0);
        assert!(report.push_succeeded);
        assert_eq!(*ops.push_calls.lock().unwrap(), 1);
    }

    #[test]
    fn manual_strategy_rejects_conflicts() {
        let ops = MockOps {
            conflicts: Arc::new(Mutex::new(vec![Conflict {
                table: "issues".to_string(),
                id: "bd-1".to_string(),
                description: "diverged status".to_string(),
            }])),
            push_calls: Arc::new(Mutex::new(0)),
            fail_push: false,
        };
        let err = sync_peer(
            &ops,
            &test_peer(),
            &ConflictStrategy::Manual,
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert!(matches!(err, FederationError::UnresolvedConflicts { .. }));
        assert_eq!(*ops.push_calls.lock().unwrap(), 0);
    }

    #[test]
    fn push_failure_is_reported_not_fatal() {
        let ops = MockOps {
            conflicts: Arc::new(Mutex::new(Vec::new())),
            push_calls: Arc::new(Mutex::new(0)),
            fail_push: true,
        };
        let report = sync_peer(
            &ops,
            &test_peer(),
            &ConflictStrategy::Newest,
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(!report.push_succeeded);
        assert!(report.push_error.is_some());
    }
}
