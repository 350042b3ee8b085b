//! [`DoltRemoteOps`] implemented against `beads-storage`'s [`DoltStore`].
//!
//! This lives here rather than in `beads-storage` under the orphan rule:
//! `beads-storage` cannot implement a `beads-federation` trait for its own
//! type without this crate depending back on it, so the adapter is defined
//! where the trait is, against the foreign `DoltStore` type.

use std::sync::Arc;

use beads_config::config::ConflictStrategy;
use beads_storage::DoltStore;

use crate::error::FederationError;
use crate::sync::{Conflict as SyncConflict, DoltRemoteOps, FetchReport};
use crate::vault::Peer;

/// Drives a [`DoltStore`]'s remote/branch/merge operations on behalf of
/// [`crate::sync`]. Registers the peer as a Dolt remote named after the
/// peer itself, so fetch/push target `<peer-name>` and merges pull from
/// `<peer-name>/<active-branch>`.
#[derive(Clone)]
pub struct DoltStoreRemoteOps {
    store: Arc<DoltStore>,
}

impl DoltStoreRemoteOps {
    pub fn new(store: Arc<DoltStore>) -> Self {
        Self { store }
    }

    fn ensure_remote(&self, peer: &Peer) -> std::result::Result<(), FederationError> {
        self.store
            .set_remote(&peer.name, &peer.url)
            .map_err(FederationError::from)
    }
}

impl DoltRemoteOps for DoltStoreRemoteOps {
    fn fetch(&self, peer: &Peer) -> std::result::Result<FetchReport, FederationError> {
        self.ensure_remote(peer)?;
        let before = self.store.current_commit()?;
        self.store.fetch_remote(&peer.name)?;
        let after = self.store.current_commit()?;
        // DOLT_FETCH updates `<remote>/<branch>`, not the active branch
        // itself, so the working branch's HEAD is unchanged either way --
        // `commits_fetched` is a coarse signal (0 or 1), not an exact count.
        Ok(FetchReport {
            commits_fetched: if before == after { 0 } else { 1 },
        })
    }

    fn merge(&self, peer: &Peer) -> std::result::Result<Vec<SyncConflict>, FederationError> {
        let conflicts = self.store.merge_remote(&peer.name)?;
        Ok(conflicts
            .into_iter()
            .map(|c| SyncConflict {
                description: format!("conflict in {} on row {}", c.table, c.id),
                table: c.table,
                id: c.id,
            })
            .collect())
    }

    fn resolve_conflict(
        &self,
        conflict: &SyncConflict,
        strategy: &ConflictStrategy,
    ) -> std::result::Result<(), FederationError> {
        let ours = match strategy {
            ConflictStrategy::Ours | ConflictStrategy::Newest => true,
            ConflictStrategy::Theirs => false,
            ConflictStrategy::Manual => {
                return Err(FederationError::UnresolvedConflicts {
                    peer: conflict.table.clone(),
                    count: 1,
                })
            }
        };
        let dolt_conflict = beads_storage::dolt::Conflict {
            table: conflict.table.clone(),
            id: conflict.id.clone(),
            column: "*".to_string(),
            ours: None,
            theirs: None,
        };
        self.store
            .resolve_conflict(&dolt_conflict, ours)
            .map_err(FederationError::from)
    }

    fn commit_resolution(&self, peer: &Peer) -> std::result::Result<(), FederationError> {
        self.store
            .commit_resolution(
                &format!("resolve conflicts from {}", peer.name),
                "beads-federation",
            )
            .map(|_| ())
            .map_err(FederationError::from)
    }

    fn push(&self, peer: &Peer) -> std::result::Result<(), FederationError> {
        self.ensure_remote(peer)?;
        self.store.push_remote(&peer.name).map_err(FederationError::from)
    }
}
