//! Public error surface for the cluster core.
//!
//! Internal plumbing uses `anyhow::Result` and converts to a `ClusterError`
//! variant at the boundary a caller can act on; see `§7` of the design notes
//! for the taxonomy this enum mirrors.

use thiserror::Error;

use grainweave_core::ClusterIdentity;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("cluster configuration error: {0}")]
    Configuration(String),

    #[error("unknown cluster kind: {0}")]
    UnknownKind(String),

    #[error("local member was fenced from the cluster")]
    MemberFenced,

    #[error("cluster is shutting down")]
    ShuttingDown,

    #[error("transport error resolving {identity}: {source}")]
    Transport {
        identity: ClusterIdentity,
        #[source]
        source: anyhow::Error,
    },

    #[error("identity store error for {identity}: {source}")]
    Store {
        identity: ClusterIdentity,
        #[source]
        source: anyhow::Error,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out")]
    Timeout,
}

pub type ClusterResult<T> = Result<T, ClusterError>;
