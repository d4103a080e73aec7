//! Cluster-wide configuration.
//!
//! A single plain-data struct collecting every tunable the core recognizes.
//! The embedding application constructs this (from env, file, or literals) and
//! hands it to the `Orchestrator`; this crate never reads configuration
//! sources itself.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for membership, gossip, placement, and the identity caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Cadence of gossip anti-entropy ticks.
    pub gossip_interval: Duration,
    /// Peers contacted per gossip tick.
    pub gossip_fan_out: usize,
    /// Cadence of the `PidCache` idle-eviction sweep. Zero disables the task.
    pub pid_cache_clear_interval: Duration,
    /// Idle duration after which a `PidCache` entry is evicted. Zero disables cleanup.
    pub pid_cache_time_to_live: Duration,
    /// How long the provider may report the local member missing before
    /// self-fencing shuts the cluster down.
    pub member_health_timeout: Duration,
    /// Phi-accrual suspicion threshold past which a gossip peer is skipped.
    pub phi_suspect_threshold: f64,
    /// Floor for standard deviation in the phi-accrual estimator (ms).
    pub min_std_deviation_ms: u64,
    /// Number of historical heartbeat intervals retained per peer.
    pub heartbeat_history_size: usize,
    /// Per-attempt timeout for a `ClusterContext` request.
    pub request_timeout: Duration,
    /// Maximum resolve-and-send attempts for a single `ClusterContext` request.
    pub max_resolve_attempts: u32,
    /// TTL granted to an identity-store reservation.
    pub reservation_ttl: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            gossip_interval: Duration::from_millis(300),
            gossip_fan_out: 3,
            pid_cache_clear_interval: Duration::from_secs(60),
            pid_cache_time_to_live: Duration::from_secs(600),
            member_health_timeout: Duration::from_secs(30),
            phi_suspect_threshold: 8.0,
            min_std_deviation_ms: 100,
            heartbeat_history_size: 200,
            request_timeout: Duration::from_secs(5),
            max_resolve_attempts: 3,
            reservation_ttl: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_values() {
        let cfg = ClusterConfig::default();
        assert_eq!(cfg.gossip_interval, Duration::from_millis(300));
        assert_eq!(cfg.gossip_fan_out, 3);
    }
}
