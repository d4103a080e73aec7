//! `MemberList`: the authoritative local view of cluster membership.
//!
//! Maintains a single current member set, published as `ClusterTopology`
//! snapshots. Publication is synchronous with respect to subscribers: every
//! registered observer finishes handling a snapshot before the next one is
//! accepted, which is what lets `PidCache` guarantee it evicts a departed
//! member's entries before any lookup can observe the new topology.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

use grainweave_core::{ClusterTopology, Member, MemberId, MemberStatus};

use crate::collaborators::MemberEvent;

/// A handle returned by `subscribe`; topology changes arrive on this channel
/// in the same order for every subscriber.
pub type TopologyReceiver = mpsc::UnboundedReceiver<Arc<ClusterTopology>>;

/// Authoritative local view of the cluster.
pub struct MemberList {
    local_id: MemberId,
    current: ArcSwap<ClusterTopology>,
    blocked: ArcSwap<BTreeSet<MemberId>>,
    subscribers: parking_lot::RwLock<Vec<mpsc::UnboundedSender<Arc<ClusterTopology>>>>,
    started: Notify,
    self_seen: AtomicBool,
    last_self_seen: parking_lot::Mutex<Option<Instant>>,
    fenced: Notify,
    is_fenced: AtomicBool,
}

impl MemberList {
    #[must_use]
    pub fn new(local_id: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            current: ArcSwap::from_pointee(ClusterTopology::default()),
            blocked: ArcSwap::from_pointee(BTreeSet::new()),
            subscribers: parking_lot::RwLock::new(Vec::new()),
            started: Notify::new(),
            self_seen: AtomicBool::new(false),
            last_self_seen: parking_lot::Mutex::new(None),
            fenced: Notify::new(),
            is_fenced: AtomicBool::new(false),
        }
    }

    /// Registers a new observer. The returned receiver sees every future
    /// snapshot, starting from the next one published.
    pub fn subscribe(&self) -> TopologyReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().push(tx);
        rx
    }

    #[must_use]
    pub fn current(&self) -> Arc<ClusterTopology> {
        self.current.load_full()
    }

    /// Blocks until the local member has been observed in an `alive` snapshot.
    pub async fn await_started(&self) {
        if self.self_seen.load(std::sync::atomic::Ordering::Acquire) {
            return;
        }
        self.started.notified().await;
    }

    /// Applies a raw provider event, recomputing the candidate set and
    /// publishing a new snapshot if membership actually changed.
    ///
    /// Publication is synchronous: every subscriber's send completes before
    /// this call returns, matching the ordering guarantee subscribers rely on.
    pub async fn apply_event(&self, event: MemberEvent) {
        let previous = self.current.load_full();
        let blocked = self.blocked.load_full();

        let mut candidate: BTreeSet<Member> = previous.members.clone();

        match event {
            MemberEvent::SeenAlive { id, address, kinds } => {
                if blocked.contains(&id) {
                    warn!(member_id = %id, "ignoring seenAlive for blocked member");
                    return;
                }
                candidate.retain(|m| m.id != id);
                let mut member = Member::new(id, address, kinds.into_iter().collect());
                member.status = MemberStatus::Alive;
                candidate.insert(member);
            }
            MemberEvent::SeenDead { id } => {
                candidate.retain(|m| m.id != id);
            }
        }

        let self_reported_alive = candidate
            .iter()
            .any(|m| m.id == self.local_id && m.status == MemberStatus::Alive);
        if self_reported_alive {
            *self.last_self_seen.lock() = Some(Instant::now());
        }

        if candidate == previous.members {
            return;
        }

        let joined: Vec<Member> = candidate.difference(&previous.members).cloned().collect();
        let left: Vec<Member> = previous.members.difference(&candidate).cloned().collect();

        let mut new_blocked = (*blocked).clone();
        for m in &left {
            new_blocked.insert(m.id.clone());
        }

        let topology_hash = ClusterTopology::hash_of(&candidate);
        let snapshot = Arc::new(ClusterTopology {
            topology_hash,
            members: candidate,
            joined,
            left,
            blocked: new_blocked.clone(),
        });

        self.blocked.store(Arc::new(new_blocked));
        self.current.store(snapshot.clone());

        if snapshot.contains_alive(&self.local_id) && !self.self_seen.swap(true, Ordering::AcqRel) {
            info!(member_id = %self.local_id, "local member observed alive, cluster started");
            self.started.notify_waiters();
        }

        info!(
            topology_hash = snapshot.topology_hash,
            joined = snapshot.joined.len(),
            left = snapshot.left.len(),
            "publishing topology snapshot"
        );

        // Deliver to every subscriber before returning, so callers observing
        // this await's completion can rely on downstream eviction having run.
        let subscribers = self.subscribers.read().clone();
        for tx in &subscribers {
            let _ = tx.send(snapshot.clone());
        }
    }

    /// Blocks until self-fencing has triggered (the provider reported the
    /// local member missing for longer than `MemberHealthTimeout`).
    pub async fn await_fenced(&self) {
        if self.is_fenced.load(Ordering::Acquire) {
            return;
        }
        self.fenced.notified().await;
    }

    fn check_self_fencing(&self, timeout: Duration) -> bool {
        let elapsed = match *self.last_self_seen.lock() {
            Some(instant) => instant.elapsed(),
            None => return false,
        };
        if elapsed > timeout && !self.is_fenced.swap(true, Ordering::AcqRel) {
            error!(
                member_id = %self.local_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "local member unreported for longer than member_health_timeout, self-fencing"
            );
            self.fenced.notify_waiters();
            return true;
        }
        false
    }

    /// Spawns the self-fencing sweep: periodically checks whether the local
    /// member has gone unreported by the provider for longer than `timeout`.
    /// `timeout` of zero disables the task.
    pub fn spawn_fencing_task(
        self: &Arc<Self>,
        timeout: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        if timeout.is_zero() {
            return None;
        }
        let list = self.clone();
        let check_interval = (timeout / 4).max(Duration::from_millis(50));
        Some(tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(check_interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if list.check_self_fencing(timeout) {
                                break;
                            }
                        }
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            }
            .instrument(info_span!("member_list_fencing_loop")),
        ))
    }
}
