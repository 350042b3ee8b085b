//! Peer federation for the beads system: remote configuration, an
//! encrypted credential vault, and push/pull/fetch/sync orchestration
//! against a versioned storage backend.
//!
//! Federation is layered entirely on top of `beads-storage`'s
//! `federation_peers` table and a storage-agnostic [`sync::DoltRemoteOps`]
//! trait -- this crate has no SQL or MySQL-wire-protocol code of its own.

pub mod crypto;
pub mod dolt_remote;
pub mod envelope;
pub mod error;
pub mod remotes;
pub mod sync;
pub mod vault;

pub use dolt_remote::DoltStoreRemoteOps;
pub use error::{FederationError, Result};
pub use sync::{fetch, pull, sync_peer, DoltRemoteOps, DEFAULT_DEADLINE};
pub use vault::{Peer, PeerVault};
