//! SQLite-backed storage implementation.

mod comments;
mod config;
mod dependencies;
pub(crate) mod dirty;
mod issues;
mod labels;
pub mod peers;
mod queries;
pub mod schema;
mod store;
mod transaction;

pub use peers::{is_valid_peer_name, PeerRecord};
pub use store::SqliteStore;
