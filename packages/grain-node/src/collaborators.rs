//! External collaborator contracts: provider, transport, identity store.
//!
//! These are the pluggable back-ends the cluster core consumes but does not
//! implement in production: membership discovery, framed RPC, and a
//! key-value store serializing placement decisions. Each trait is
//! object-safe behind `Arc<dyn Trait>` so concrete back-ends are sibling
//! types selected by configuration, not an inheritance hierarchy.
//!
//! In-memory implementations are provided for tests and for single-process
//! demos; they are not meant for production use.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use grainweave_core::{ClusterIdentity, ClusterMessage, RemoteLocation};

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Raw membership event fed into `MemberList`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberEvent {
    SeenAlive {
        id: String,
        address: String,
        kinds: Vec<String>,
    },
    SeenDead {
        id: String,
    },
}

/// Pluggable membership discovery back-end.
///
/// Must be idempotent under repeated `shutdown` calls.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn start_member(&self, local_id: &str, local_address: &str) -> anyhow::Result<()>;
    async fn start_client(&self, local_id: &str) -> anyhow::Result<()>;
    async fn shutdown(&self, graceful: bool) -> anyhow::Result<()>;

    /// Subscribes to raw member events; each call returns an independent receiver.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<MemberEvent>;
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Outcome of a `Transport::request` call.
#[derive(Debug, Clone)]
pub enum TransportResponse {
    Message(ClusterMessage),
    DeadLetter,
}

/// Pluggable framed RPC between cluster members.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, to: &RemoteLocation, message: ClusterMessage) -> anyhow::Result<()>;

    async fn request(
        &self,
        to: &RemoteLocation,
        message: ClusterMessage,
        timeout: Duration,
    ) -> anyhow::Result<TransportResponse>;

    async fn start(&self) -> anyhow::Result<()>;
    async fn stop(&self) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// IdentityStore
// ---------------------------------------------------------------------------

/// Outcome of a reservation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired,
    HeldBy(String),
}

/// Pluggable key-value back-end serializing placement decisions.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn try_acquire(
        &self,
        identity: &ClusterIdentity,
        owner_address: &str,
        ttl: Duration,
    ) -> anyhow::Result<AcquireOutcome>;

    async fn release(&self, identity: &ClusterIdentity, owner_address: &str) -> anyhow::Result<()>;

    async fn lookup(&self, identity: &ClusterIdentity) -> anyhow::Result<Option<String>>;
}

// ---------------------------------------------------------------------------
// In-memory IdentityStore
// ---------------------------------------------------------------------------

struct Reservation {
    owner_address: String,
    expires_at: Instant,
}

/// Single-process `IdentityStore` for tests: a CAS-guarded map with TTL expiry.
#[derive(Default)]
pub struct InMemoryIdentityStore {
    reservations: RwLock<HashMap<String, Reservation>>,
}

impl InMemoryIdentityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn is_expired(res: &Reservation) -> bool {
        Instant::now() >= res.expires_at
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn try_acquire(
        &self,
        identity: &ClusterIdentity,
        owner_address: &str,
        ttl: Duration,
    ) -> anyhow::Result<AcquireOutcome> {
        let key = identity.key();
        let mut guard = self.reservations.write();
        if let Some(existing) = guard.get(&key) {
            if !Self::is_expired(existing) {
                return Ok(AcquireOutcome::HeldBy(existing.owner_address.clone()));
            }
        }
        guard.insert(
            key,
            Reservation {
                owner_address: owner_address.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(AcquireOutcome::Acquired)
    }

    async fn release(&self, identity: &ClusterIdentity, owner_address: &str) -> anyhow::Result<()> {
        let key = identity.key();
        let mut guard = self.reservations.write();
        if let Some(existing) = guard.get(&key) {
            if existing.owner_address == owner_address {
                guard.remove(&key);
            }
        }
        Ok(())
    }

    async fn lookup(&self, identity: &ClusterIdentity) -> anyhow::Result<Option<String>> {
        let key = identity.key();
        let guard = self.reservations.read();
        Ok(guard.get(&key).filter(|r| !Self::is_expired(r)).map(|r| r.owner_address.clone()))
    }
}

// ---------------------------------------------------------------------------
// In-memory Provider
// ---------------------------------------------------------------------------

/// Single-process `Provider` for tests: a shared broadcast of member events
/// across every handle cloned from the same root.
#[derive(Clone)]
pub struct InMemoryProvider {
    inner: Arc<InMemoryProviderInner>,
}

struct InMemoryProviderInner {
    senders: RwLock<Vec<mpsc::UnboundedSender<MemberEvent>>>,
}

impl InMemoryProvider {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(InMemoryProviderInner {
                senders: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Publishes a member event to every current subscriber.
    pub fn publish(&self, event: MemberEvent) {
        self.inner
            .senders
            .read()
            .iter()
            .for_each(|tx| {
                let _ = tx.send(event.clone());
            });
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for InMemoryProvider {
    async fn start_member(&self, local_id: &str, local_address: &str) -> anyhow::Result<()> {
        self.publish(MemberEvent::SeenAlive {
            id: local_id.to_string(),
            address: local_address.to_string(),
            kinds: Vec::new(),
        });
        Ok(())
    }

    async fn start_client(&self, _local_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn shutdown(&self, _graceful: bool) -> anyhow::Result<()> {
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<MemberEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.senders.write().push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_acquire_is_first_writer_wins() {
        let store = InMemoryIdentityStore::new();
        let id = ClusterIdentity::new("counter", "x");

        let first = store.try_acquire(&id, "a:1", Duration::from_secs(30)).await.unwrap();
        assert_eq!(first, AcquireOutcome::Acquired);

        let second = store.try_acquire(&id, "b:2", Duration::from_secs(30)).await.unwrap();
        assert_eq!(second, AcquireOutcome::HeldBy("a:1".to_string()));
    }

    #[tokio::test]
    async fn release_then_reacquire_by_a_different_owner_succeeds() {
        let store = InMemoryIdentityStore::new();
        let id = ClusterIdentity::new("counter", "x");

        store.try_acquire(&id, "a:1", Duration::from_secs(30)).await.unwrap();
        store.release(&id, "a:1").await.unwrap();

        let second = store.try_acquire(&id, "b:2", Duration::from_secs(30)).await.unwrap();
        assert_eq!(second, AcquireOutcome::Acquired);
    }

    #[tokio::test]
    async fn release_by_non_owner_is_a_no_op() {
        let store = InMemoryIdentityStore::new();
        let id = ClusterIdentity::new("counter", "x");

        store.try_acquire(&id, "a:1", Duration::from_secs(30)).await.unwrap();
        store.release(&id, "b:2").await.unwrap();

        let still_held = store.try_acquire(&id, "b:2", Duration::from_secs(30)).await.unwrap();
        assert_eq!(still_held, AcquireOutcome::HeldBy("a:1".to_string()));
    }

    #[tokio::test]
    async fn expired_reservation_can_be_reacquired() {
        let store = InMemoryIdentityStore::new();
        let id = ClusterIdentity::new("counter", "x");

        store.try_acquire(&id, "a:1", Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = store.try_acquire(&id, "b:2", Duration::from_secs(30)).await.unwrap();
        assert_eq!(second, AcquireOutcome::Acquired);
    }
}
