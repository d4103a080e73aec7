//! `PidCache`: bounded identity-to-location memo with topology-driven invalidation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info_span, Instrument};

use grainweave_core::{ClusterIdentity, ClusterTopology, RemoteLocation};

struct CacheEntry {
    pid: RemoteLocation,
    last_touched: Instant,
}

/// Thread-safe forward and by-member indexed cache of resolved identities.
pub struct PidCache {
    forward: DashMap<ClusterIdentity, CacheEntry>,
    by_member: RwLock<HashMap<String, Vec<ClusterIdentity>>>,
}

impl PidCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            forward: DashMap::new(),
            by_member: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn try_get(&self, identity: &ClusterIdentity) -> Option<RemoteLocation> {
        let mut entry = self.forward.get_mut(identity)?;
        entry.last_touched = Instant::now();
        Some(entry.pid.clone())
    }

    /// Insert-if-absent; the first writer wins any race.
    pub fn try_set(&self, identity: ClusterIdentity, pid: RemoteLocation) {
        let member_address = pid.member_address.clone();
        let inserted = match self.forward.entry(identity.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(CacheEntry {
                    pid,
                    last_touched: Instant::now(),
                });
                true
            }
        };
        if inserted {
            self.by_member
                .write()
                .entry(member_address)
                .or_default()
                .push(identity);
        }
    }

    pub fn remove(&self, identity: &ClusterIdentity) {
        if let Some((_, entry)) = self.forward.remove(identity) {
            let mut by_member = self.by_member.write();
            if let Some(ids) = by_member.get_mut(&entry.pid.member_address) {
                ids.retain(|id| id != identity);
            }
        }
    }

    /// Removes every entry owned by `member_address`. Must complete before
    /// the topology publication that triggered it returns.
    pub fn remove_by_member(&self, member_address: &str) {
        let ids = self.by_member.write().remove(member_address).unwrap_or_default();
        for id in ids {
            self.forward.remove(&id);
        }
    }

    /// Evicts entries idle longer than `ttl`.
    pub fn remove_idle_older_than(&self, ttl: Duration) {
        let now = Instant::now();
        let stale: Vec<ClusterIdentity> = self
            .forward
            .iter()
            .filter(|entry| now.duration_since(entry.last_touched) > ttl)
            .map(|entry| entry.key().clone())
            .collect();
        for id in stale {
            self.remove(&id);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Wired as a `MemberList` topology subscriber: evicts every departed
    /// member's entries. Runs synchronously inside the topology publication,
    /// which is what guarantees cache soundness across the eviction boundary.
    pub fn on_topology_changed(&self, topology: &ClusterTopology) {
        if topology.left.is_empty() {
            return;
        }
        let span = info_span!("pid_cache_evict", departed = topology.left.len());
        let _enter = span.enter();
        for member in &topology.left {
            debug!(member_address = %member.address, "evicting pid cache entries for departed member");
            self.remove_by_member(&member.address);
        }
    }

    /// Spawns the periodic idle-eviction task. Both config durations must be
    /// positive for the task to run; returns `None` otherwise.
    pub fn spawn_cleanup_task(
        self: &Arc<Self>,
        clear_interval: Duration,
        ttl: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if clear_interval.is_zero() || ttl.is_zero() {
            return None;
        }
        let cache = self.clone();
        Some(tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(clear_interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            cache.remove_idle_older_than(ttl);
                        }
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            }
            .instrument(info_span!("pid_cache_cleanup_loop")),
        ))
    }
}

impl Default for PidCache {
    fn default() -> Self {
        Self::new()
    }
}
