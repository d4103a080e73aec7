//! Gossip state value types: per-member keyed store and vector clocks.
//!
//! The types here are pure data; the running anti-entropy protocol (peer
//! selection, tick loop, consensus evaluation) lives in the node crate. This
//! split mirrors the rest of the core/node boundary: wire-shape and merge
//! rules here, orchestration where the tokio runtime lives.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single versioned value in a member's gossip state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GossipEntry {
    pub value: Vec<u8>,
    pub sequence: u64,
}

/// Per-member keyed state, last-writer-wins by sequence number.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GossipState {
    pub entries: HashMap<String, GossipEntry>,
}

impl GossipState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest sequence number recorded for any key, or 0 if empty.
    #[must_use]
    pub fn max_sequence(&self) -> u64 {
        self.entries.values().map(|e| e.sequence).max().unwrap_or(0)
    }

    /// Inserts or overwrites `key` if `sequence` is newer than what is stored;
    /// returns `true` if the entry changed.
    pub fn apply(&mut self, key: &str, value: Vec<u8>, sequence: u64) -> bool {
        match self.entries.get(key) {
            Some(existing) if existing.sequence >= sequence => false,
            _ => {
                self.entries
                    .insert(key.to_string(), GossipEntry { value, sequence });
                true
            }
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&GossipEntry> {
        self.entries.get(key)
    }
}

/// Vector clock: highest sequence number observed per member.
pub type VectorClock = HashMap<String, u64>;

/// A `(member, key, value, sequence)` tuple shipped during anti-entropy delta exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GossipDeltaItem {
    pub member_id: String,
    pub key: String,
    pub value: Vec<u8>,
    pub sequence: u64,
}

/// The local member's well-known gossip key announcing voluntary departure.
pub const CLUSTER_LEFT_KEY: &str = "cluster:left";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_rejects_stale_sequence() {
        let mut state = GossipState::new();
        assert!(state.apply("heartbeat", b"v1".to_vec(), 5));
        assert!(!state.apply("heartbeat", b"v0".to_vec(), 3));
        assert_eq!(state.get("heartbeat").unwrap().value, b"v1");
    }

    #[test]
    fn apply_accepts_strictly_newer_sequence() {
        let mut state = GossipState::new();
        state.apply("k", b"v1".to_vec(), 1);
        assert!(state.apply("k", b"v2".to_vec(), 2));
        assert_eq!(state.get("k").unwrap().value, b"v2");
    }

    #[test]
    fn sequence_never_reverts_after_convergence() {
        let mut state = GossipState::new();
        state.apply("k", b"v1".to_vec(), 10);
        state.apply("k", b"v0".to_vec(), 1);
        assert_eq!(state.get("k").unwrap().sequence, 10);
    }

    proptest::proptest! {
        /// Applying any sequence of (key, sequence) updates, in any order,
        /// must leave each key's stored sequence monotonically non-decreasing
        /// and equal to the maximum sequence ever applied for that key.
        #[test]
        fn applied_sequence_is_always_the_maximum_seen(
            updates in proptest::collection::vec((0u64..4, 0u64..1000), 1..50),
        ) {
            let mut state = GossipState::new();
            let mut expected_max: HashMap<u64, u64> = HashMap::new();

            for (key, sequence) in updates {
                let key = key.to_string();
                state.apply(&key, sequence.to_le_bytes().to_vec(), sequence);
                let entry = expected_max.entry(key.parse().unwrap()).or_insert(0);
                *entry = (*entry).max(sequence);
            }

            for (key, max_sequence) in expected_max {
                prop_assert_eq!(state.get(&key.to_string()).unwrap().sequence, max_sequence);
            }
        }
    }
}
