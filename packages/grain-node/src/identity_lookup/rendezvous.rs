use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use grainweave_core::{owner_candidate, ClusterIdentity, RemoteLocation};

use crate::collaborators::{AcquireOutcome, IdentityStore, Transport, TransportResponse};
use crate::error::{ClusterError, ClusterResult};
use crate::kind_registry::ClusterKindRegistry;
use crate::member_list::MemberList;

use super::IdentityLookup;

/// Production `IdentityLookup`: rendezvous hashing over the alive member set
/// picks an owner candidate, which either activates locally (guarded by a
/// store-backed reservation) or is asked to do so over the transport.
pub struct RendezvousIdentityLookup {
    local_id: String,
    local_address: String,
    member_list: Arc<MemberList>,
    identity_store: Arc<dyn IdentityStore>,
    transport: Arc<dyn Transport>,
    kinds: Arc<ClusterKindRegistry>,
    reservation_ttl: Duration,
    request_timeout: Duration,
    /// Local activation cache (spec §4.3 step 1): identities this member has
    /// itself reserved and spawned, distinct from `PidCache`'s shared memo.
    owned: RwLock<HashMap<ClusterIdentity, RemoteLocation>>,
}

impl RendezvousIdentityLookup {
    #[must_use]
    pub fn new(
        local_id: impl Into<String>,
        local_address: impl Into<String>,
        member_list: Arc<MemberList>,
        identity_store: Arc<dyn IdentityStore>,
        transport: Arc<dyn Transport>,
        kinds: Arc<ClusterKindRegistry>,
        reservation_ttl: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            local_address: local_address.into(),
            member_list,
            identity_store,
            transport,
            kinds,
            reservation_ttl,
            request_timeout,
            owned: RwLock::new(HashMap::new()),
        }
    }

    fn pick_owner_candidate(&self, identity: &ClusterIdentity) -> ClusterResult<String> {
        let topology = self.member_list.current();
        let candidates: Vec<&str> = topology
            .members
            .iter()
            .filter(|m| m.status == grainweave_core::MemberStatus::Alive)
            .filter(|m| m.kinds.contains(&identity.kind))
            .map(|m| m.address.as_str())
            .collect();

        owner_candidate(&identity.key(), &candidates)
            .map(str::to_string)
            .ok_or_else(|| ClusterError::UnknownKind(identity.kind.clone()))
    }

    async fn activate_locally(&self, identity: &ClusterIdentity) -> ClusterResult<RemoteLocation> {
        if let Some(location) = self.owned.read().get(identity).cloned() {
            return Ok(location);
        }

        match self
            .identity_store
            .try_acquire(identity, &self.local_address, self.reservation_ttl)
            .await
            .map_err(|source| ClusterError::Store {
                identity: identity.clone(),
                source,
            })? {
            AcquireOutcome::Acquired => {
                let kind = self.kinds.try_get(&identity.kind)?;
                let local_id = kind
                    .activate(identity)
                    .await
                    .map_err(|source| ClusterError::Store {
                        identity: identity.clone(),
                        source,
                    })?;
                info!(%identity, local_id, "activated grain locally");
                let location = RemoteLocation::new(self.local_address.clone(), local_id);
                self.owned.write().insert(identity.clone(), location.clone());
                Ok(location)
            }
            AcquireOutcome::HeldBy(owner_address) if owner_address == self.local_address => {
                Err(ClusterError::Store {
                    identity: identity.clone(),
                    source: anyhow::anyhow!(
                        "identity store reports this member as owner of {identity} but no local binding exists"
                    ),
                })
            }
            AcquireOutcome::HeldBy(owner_address) => {
                debug!(%identity, owner_address, "reservation already held, asking owner to resolve");
                self.ask_remote_to_resolve(identity, &owner_address).await
            }
        }
    }

    async fn ask_remote_to_resolve(
        &self,
        identity: &ClusterIdentity,
        candidate_address: &str,
    ) -> ClusterResult<RemoteLocation> {
        let target = RemoteLocation::new(candidate_address, "activator");
        let message = grainweave_core::ClusterMessage::ActivationRequest(
            grainweave_core::wire::ActivationRequestPayload {
                identity: identity.clone(),
                requester_id: self.local_id.clone(),
            },
        );

        let response = self
            .transport
            .request(&target, message, self.request_timeout)
            .await
            .map_err(|source| ClusterError::Transport {
                identity: identity.clone(),
                source,
            })?;

        match response {
            TransportResponse::Message(grainweave_core::ClusterMessage::ActivationResponse(payload)) => {
                payload.location.ok_or_else(|| ClusterError::Transport {
                    identity: identity.clone(),
                    source: anyhow::anyhow!("candidate declined to activate {identity}"),
                })
            }
            TransportResponse::Message(_) | TransportResponse::DeadLetter => Err(ClusterError::Transport {
                identity: identity.clone(),
                source: anyhow::anyhow!("unexpected reply resolving {identity}"),
            }),
        }
    }
}

#[async_trait]
impl IdentityLookup for RendezvousIdentityLookup {
    #[instrument(skip(self), fields(identity = %identity))]
    async fn get_or_activate(&self, identity: &ClusterIdentity) -> ClusterResult<RemoteLocation> {
        let candidate_address = self.pick_owner_candidate(identity)?;

        if candidate_address == self.local_address {
            self.activate_locally(identity).await
        } else {
            self.ask_remote_to_resolve(identity, &candidate_address).await
        }
    }

    async fn remove_activation(&self, identity: &ClusterIdentity, location: &RemoteLocation) {
        self.owned.write().remove(identity);
        if let Err(err) = self.identity_store.release(identity, &location.member_address).await {
            warn!(%identity, error = %err, "failed to release identity store reservation");
        }
    }

    async fn shutdown(&self) {
        let owned: Vec<(ClusterIdentity, RemoteLocation)> = self.owned.write().drain().collect();
        for (identity, location) in owned {
            if let Err(err) = self.identity_store.release(&identity, &location.member_address).await {
                warn!(%identity, error = %err, "failed to release identity store reservation during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{InMemoryIdentityStore, MemberEvent};
    use crate::kind_registry::GrainFactory;

    struct NoopTransport;

    #[async_trait]
    impl Transport for NoopTransport {
        async fn send(&self, _to: &RemoteLocation, _message: grainweave_core::ClusterMessage) -> anyhow::Result<()> {
            Ok(())
        }
        async fn request(
            &self,
            _to: &RemoteLocation,
            _message: grainweave_core::ClusterMessage,
            _timeout: Duration,
        ) -> anyhow::Result<TransportResponse> {
            Ok(TransportResponse::DeadLetter)
        }
        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn echo_factory() -> Arc<dyn GrainFactory> {
        Arc::new(|identity: ClusterIdentity| async move { Ok(format!("local:{}", identity.identity)) })
    }

    async fn single_member_setup() -> (Arc<MemberList>, RendezvousIdentityLookup) {
        let member_list = Arc::new(MemberList::new("a"));
        member_list
            .apply_event(MemberEvent::SeenAlive {
                id: "a".to_string(),
                address: "a:1".to_string(),
                kinds: vec!["counter".to_string()],
            })
            .await;

        let kinds = Arc::new(ClusterKindRegistry::builder().with_kind("counter", echo_factory()).build());

        let lookup = RendezvousIdentityLookup::new(
            "a",
            "a:1",
            member_list.clone(),
            Arc::new(InMemoryIdentityStore::new()),
            Arc::new(NoopTransport),
            kinds,
            Duration::from_secs(30),
            Duration::from_secs(1),
        );
        (member_list, lookup)
    }

    #[tokio::test]
    async fn activates_locally_when_local_member_is_the_owner_candidate() {
        let (_member_list, lookup) = single_member_setup().await;
        let identity = ClusterIdentity::new("counter", "x");
        let location = lookup.get_or_activate(&identity).await.unwrap();
        assert_eq!(location.member_address, "a:1");
    }

    #[tokio::test]
    async fn unknown_kind_with_no_candidates_is_an_error() {
        let (_member_list, lookup) = single_member_setup().await;
        let identity = ClusterIdentity::new("ghost", "x");
        let err = lookup.get_or_activate(&identity).await.unwrap_err();
        assert!(matches!(err, ClusterError::UnknownKind(_)));
    }

    #[tokio::test]
    async fn second_activation_returns_the_same_location_from_the_owned_cache() {
        let (_member_list, lookup) = single_member_setup().await;
        let identity = ClusterIdentity::new("counter", "x");
        let first = lookup.get_or_activate(&identity).await.unwrap();

        // The owned cache short-circuits the repeat call before the store
        // CAS, so it returns the existing binding instead of asking the
        // owner (itself) to resolve over a dead-letter transport.
        let second = lookup.get_or_activate(&identity).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn shutdown_releases_every_owned_reservation() {
        let (_member_list, lookup) = single_member_setup().await;
        let identity = ClusterIdentity::new("counter", "x");
        lookup.get_or_activate(&identity).await.unwrap();
        assert!(lookup.owned.read().contains_key(&identity));

        lookup.shutdown().await;

        assert!(lookup.owned.read().is_empty());
        // Released, so a fresh acquire for the same identity succeeds again.
        let outcome = lookup
            .identity_store
            .try_acquire(&identity, "a:1", Duration::from_secs(30))
            .await
            .unwrap();
        assert!(matches!(outcome, AcquireOutcome::Acquired));
    }
}
