//! Virtual-actor identity and remote location types.
//!
//! `ClusterIdentity` is the cluster-wide primary key of a grain; `RemoteLocation`
//! is the physical address its current activation lives at. Both are plain,
//! `Copy`-free value types shared across wire messages and in-process lookups.

use serde::{Deserialize, Serialize};
use std::fmt;

/// `(kind, identity)` pair naming a grain cluster-wide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterIdentity {
    pub kind: String,
    pub identity: String,
}

impl ClusterIdentity {
    #[must_use]
    pub fn new(kind: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            identity: identity.into(),
        }
    }

    /// Canonical string used as the rendezvous-hashing and identity-store key.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.kind, self.identity)
    }
}

impl fmt::Display for ClusterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.identity)
    }
}

/// Opaque physical address of a grain activation.
///
/// Compared and hashed by value; the core never interprets `local_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteLocation {
    pub member_address: String,
    pub local_id: String,
}

impl RemoteLocation {
    #[must_use]
    pub fn new(member_address: impl Into<String>, local_id: impl Into<String>) -> Self {
        Self {
            member_address: member_address.into(),
            local_id: local_id.into(),
        }
    }
}

impl fmt::Display for RemoteLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.member_address, self.local_id)
    }
}
