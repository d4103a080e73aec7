//! `ClusterContext`: request/response over a virtual identity.
//!
//! Resolves `PidCache` first, falling back to `IdentityLookup` on a miss,
//! then sends through `Transport`. A stale cache entry surfaces as a
//! transport failure, which invalidates the entry and retries against a
//! fresh resolution, bounded by `max_resolve_attempts` and cancellation.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use grainweave_core::{ClusterIdentity, ClusterMessage, RemoteLocation};

use crate::collaborators::{Transport, TransportResponse};
use crate::error::{ClusterError, ClusterResult};
use crate::identity_lookup::IdentityLookup;
use crate::pid_cache::PidCache;

pub struct ClusterContext {
    pid_cache: Arc<PidCache>,
    identity_lookup: Arc<dyn IdentityLookup>,
    transport: Arc<dyn Transport>,
    request_timeout: Duration,
    max_resolve_attempts: u32,
}

impl ClusterContext {
    #[must_use]
    pub fn new(
        pid_cache: Arc<PidCache>,
        identity_lookup: Arc<dyn IdentityLookup>,
        transport: Arc<dyn Transport>,
        request_timeout: Duration,
        max_resolve_attempts: u32,
    ) -> Self {
        Self {
            pid_cache,
            identity_lookup,
            transport,
            request_timeout,
            max_resolve_attempts,
        }
    }

    async fn resolve(&self, identity: &ClusterIdentity, force_refresh: bool) -> ClusterResult<RemoteLocation> {
        if !force_refresh {
            if let Some(location) = self.pid_cache.try_get(identity) {
                return Ok(location);
            }
        }
        let location = self.identity_lookup.get_or_activate(identity).await?;
        self.pid_cache.try_set(identity.clone(), location.clone());
        Ok(location)
    }

    /// Resolves `identity` and sends `message`, invalidating the cache and
    /// retrying on transport failure up to `max_resolve_attempts` times.
    #[instrument(skip(self, message, cancellation), fields(identity = %identity))]
    pub async fn request(
        &self,
        identity: &ClusterIdentity,
        message_factory: impl Fn() -> ClusterMessage,
        cancellation: &CancellationToken,
    ) -> ClusterResult<ClusterMessage> {
        let mut last_err = None;

        for attempt in 0..self.max_resolve_attempts {
            if cancellation.is_cancelled() {
                return Err(ClusterError::Cancelled);
            }

            let force_refresh = attempt > 0;
            let location = self.resolve(identity, force_refresh).await?;
            let message = message_factory();

            let send = self.transport.request(&location, message, self.request_timeout);
            let outcome = tokio::select! {
                result = send => result,
                () = cancellation.cancelled() => return Err(ClusterError::Cancelled),
            };

            match outcome {
                Ok(TransportResponse::Message(reply)) => return Ok(reply),
                Ok(TransportResponse::DeadLetter) => {
                    debug!(%identity, attempt, "dead letter, invalidating cache entry and retrying");
                    self.pid_cache.remove(identity);
                    last_err = Some(ClusterError::Transport {
                        identity: identity.clone(),
                        source: anyhow::anyhow!("message delivered to a dead letter"),
                    });
                }
                Err(source) => {
                    warn!(%identity, attempt, error = %source, "transport request failed, invalidating cache entry");
                    self.pid_cache.remove(identity);
                    last_err = Some(ClusterError::Transport {
                        identity: identity.clone(),
                        source,
                    });
                }
            }
        }

        Err(last_err.unwrap_or(ClusterError::Timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingTransport {
        calls: AtomicU32,
        fail_first_n: u32,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn send(&self, _to: &RemoteLocation, _message: ClusterMessage) -> anyhow::Result<()> {
            Ok(())
        }

        async fn request(
            &self,
            _to: &RemoteLocation,
            _message: ClusterMessage,
            _timeout: Duration,
        ) -> anyhow::Result<TransportResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first_n {
                anyhow::bail!("simulated transport failure");
            }
            Ok(TransportResponse::Message(ClusterMessage::ActivationResponse(
                grainweave_core::wire::ActivationResponsePayload {
                    identity: ClusterIdentity::new("counter", "x"),
                    location: None,
                },
            )))
        }

        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct FixedIdentityLookup(RemoteLocation);

    #[async_trait]
    impl IdentityLookup for FixedIdentityLookup {
        async fn get_or_activate(&self, _identity: &ClusterIdentity) -> ClusterResult<RemoteLocation> {
            Ok(self.0.clone())
        }
        async fn remove_activation(&self, _identity: &ClusterIdentity, _location: &RemoteLocation) {}
        async fn shutdown(&self) {}
    }

    fn context(transport: CountingTransport, max_attempts: u32) -> ClusterContext {
        ClusterContext::new(
            Arc::new(PidCache::new()),
            Arc::new(FixedIdentityLookup(RemoteLocation::new("a:1", "g1"))),
            Arc::new(transport),
            Duration::from_millis(200),
            max_attempts,
        )
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt_with_no_failures() {
        let ctx = context(CountingTransport { calls: AtomicU32::new(0), fail_first_n: 0 }, 3);
        let identity = ClusterIdentity::new("counter", "x");
        let cancellation = CancellationToken::new();
        let reply = ctx
            .request(&identity, || ClusterMessage::OpForward(grainweave_core::wire::OpForwardPayload {
                source_member_id: "a".to_string(),
                identity: ClusterIdentity::new("counter", "x"),
                payload: vec![],
            }), &cancellation)
            .await;
        assert!(reply.is_ok());
    }

    #[tokio::test]
    async fn retries_after_transport_failure_and_eventually_succeeds() {
        let ctx = context(CountingTransport { calls: AtomicU32::new(0), fail_first_n: 2 }, 3);
        let identity = ClusterIdentity::new("counter", "x");
        let cancellation = CancellationToken::new();
        let reply = ctx
            .request(&identity, || ClusterMessage::OpForward(grainweave_core::wire::OpForwardPayload {
                source_member_id: "a".to_string(),
                identity: ClusterIdentity::new("counter", "x"),
                payload: vec![],
            }), &cancellation)
            .await;
        assert!(reply.is_ok());
    }

    #[tokio::test]
    async fn exhausting_attempts_returns_the_last_transport_error() {
        let ctx = context(CountingTransport { calls: AtomicU32::new(0), fail_first_n: 10 }, 3);
        let identity = ClusterIdentity::new("counter", "x");
        let cancellation = CancellationToken::new();
        let reply = ctx
            .request(&identity, || ClusterMessage::OpForward(grainweave_core::wire::OpForwardPayload {
                source_member_id: "a".to_string(),
                identity: ClusterIdentity::new("counter", "x"),
                payload: vec![],
            }), &cancellation)
            .await;
        assert!(matches!(reply, Err(ClusterError::Transport { .. })));
    }

    #[tokio::test]
    async fn cancellation_short_circuits_before_any_attempt() {
        let ctx = context(CountingTransport { calls: AtomicU32::new(0), fail_first_n: 0 }, 3);
        let identity = ClusterIdentity::new("counter", "x");
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let reply = ctx
            .request(&identity, || ClusterMessage::OpForward(grainweave_core::wire::OpForwardPayload {
                source_member_id: "a".to_string(),
                identity: ClusterIdentity::new("counter", "x"),
                payload: vec![],
            }), &cancellation)
            .await;
        assert!(matches!(reply, Err(ClusterError::Cancelled)));
    }
}
