//! Cluster member and topology snapshot types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::hash::combine_hashes;

/// Process-unique, never-reused member identifier.
pub type MemberId = String;

/// Lifecycle state of a member, strictly monotone: joining -> alive -> leaving -> left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberStatus {
    Joining,
    Alive,
    Leaving,
    Left,
}

/// A single cluster participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: MemberId,
    pub address: String,
    pub kinds: BTreeSet<String>,
    pub status: MemberStatus,
}

impl Member {
    #[must_use]
    pub fn new(id: impl Into<String>, address: impl Into<String>, kinds: BTreeSet<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            kinds,
            status: MemberStatus::Joining,
        }
    }
}

impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Member {}

impl std::hash::Hash for Member {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for Member {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Member {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

/// A versioned snapshot of cluster membership, with deltas against the previous snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTopology {
    pub topology_hash: u64,
    pub members: BTreeSet<Member>,
    pub joined: Vec<Member>,
    pub left: Vec<Member>,
    pub blocked: BTreeSet<MemberId>,
}

impl ClusterTopology {
    /// Deterministic hash over the sorted member-id set; independent of member metadata.
    #[must_use]
    pub fn hash_of(members: &BTreeSet<Member>) -> u64 {
        combine_hashes(members.iter().map(|m| m.id.as_str()))
    }

    #[must_use]
    pub fn alive_addresses(&self) -> Vec<&str> {
        self.members
            .iter()
            .filter(|m| m.status == MemberStatus::Alive)
            .map(|m| m.address.as_str())
            .collect()
    }

    #[must_use]
    pub fn contains_alive(&self, id: &str) -> bool {
        self.members
            .iter()
            .any(|m| m.id == id && m.status == MemberStatus::Alive)
    }

    #[must_use]
    pub fn member_by_address(&self, address: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.address == address)
    }
}
