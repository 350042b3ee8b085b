//! Federation error types.

/// Errors that can occur during federation operations.
#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    /// The underlying storage backend returned an error.
    #[error(transparent)]
    Storage(#[from] beads_storage::StorageError),

    /// A peer name failed the `^[A-Za-z][A-Za-z0-9_-]{0,63}$` validation.
    #[error("invalid peer name: {0}")]
    InvalidPeerName(String),

    /// Credential encryption or decryption failed.
    #[error("credential crypto error: {0}")]
    Crypto(String),

    /// A peer has no stored credentials but the operation requires them.
    #[error("peer {peer} has no stored credentials")]
    NoCredentials {
        /// The peer name.
        peer: String,
    },

    /// An HTTP transport error occurred talking to a peer.
    #[error("transport error talking to {peer}: {source}")]
    Transport {
        /// The peer name.
        peer: String,
        /// The underlying transport error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A peer operation did not complete within its deadline.
    #[error("operation with peer {peer} exceeded its deadline of {deadline_secs}s")]
    DeadlineExceeded {
        /// The peer name.
        peer: String,
        /// The configured deadline, in seconds.
        deadline_secs: u64,
    },

    /// A sync produced conflicts that the configured strategy could not resolve.
    #[error("unresolved conflicts with peer {peer}: {count}")]
    UnresolvedConflicts {
        /// The peer name.
        peer: String,
        /// Number of conflicting records.
        count: usize,
    },
}

/// Convenience alias used throughout the federation crate.
pub type Result<T> = std::result::Result<T, FederationError>;

impl FederationError {
    /// Returns `true` if this error represents the peer-side equivalent of
    /// [`beads_storage::StorageError::Busy`] -- contention the caller may
    /// retry after backing off.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
            || matches!(self, Self::Storage(e) if e.is_retryable())
    }
}
