//! `Orchestrator`: explicit start/run/shutdown sequencing for the cluster core.
//!
//! Owns every component and wires their subscriptions together. Holds no
//! cyclic references: components expose plain handles (`Arc`s, channels) and
//! the orchestrator is the only thing that knows the full wiring graph.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, info_span, Instrument};

use crate::collaborators::{IdentityStore, Provider, Transport};
use crate::config::ClusterConfig;
use crate::error::{ClusterError, ClusterResult};
use crate::gossiper::Gossiper;
use crate::identity_lookup::{IdentityLookup, RendezvousIdentityLookup};
use crate::kind_registry::ClusterKindRegistry;
use crate::member_list::MemberList;
use crate::metrics;
use crate::pid_cache::PidCache;

use crate::cluster_context::ClusterContext;

/// Hook onto the actor runtime that hosts user-defined grains. Out of scope
/// for this crate; production embedders provide a real implementation, tests
/// use [`NoopActorHost`].
#[async_trait]
pub trait ActorHost: Send + Sync {
    async fn stop(&self) -> anyhow::Result<()>;
}

pub struct NoopActorHost;

#[async_trait]
impl ActorHost for NoopActorHost {
    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Whether the local member joins as a full participant or a lightweight client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    Member,
    Client,
}

pub struct Orchestrator {
    local_id: String,
    local_address: String,
    config: ClusterConfig,
    kinds: Arc<ClusterKindRegistry>,
    member_list: Arc<MemberList>,
    pid_cache: Arc<PidCache>,
    gossiper: Arc<Gossiper>,
    identity_lookup: Arc<dyn IdentityLookup>,
    cluster_context: Arc<ClusterContext>,
    provider: Arc<dyn Provider>,
    transport: Arc<dyn Transport>,
    actor_host: Arc<dyn ActorHost>,
    /// Shared stop signal for every background sweep started in `start`: the
    /// pid-cache evictor, the self-fencing sweep, and the metrics sampler.
    background_shutdown: tokio::sync::watch::Sender<bool>,
    background_shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

impl Orchestrator {
    /// Step 1-8: builds every component and wires topology subscriptions, but
    /// does not yet start the provider or await cluster readiness.
    #[must_use]
    pub fn build(
        local_id: impl Into<String>,
        local_address: impl Into<String>,
        config: ClusterConfig,
        kinds: ClusterKindRegistry,
        provider: Arc<dyn Provider>,
        transport: Arc<dyn Transport>,
        identity_store: Arc<dyn IdentityStore>,
        actor_host: Arc<dyn ActorHost>,
    ) -> Self {
        let local_id = local_id.into();
        let local_address = local_address.into();
        let kinds = Arc::new(kinds);

        let member_list = Arc::new(MemberList::new(local_id.clone()));
        let pid_cache = Arc::new(PidCache::new());
        let gossiper = Arc::new(Gossiper::new(local_id.clone(), config.clone()));

        let identity_lookup: Arc<dyn IdentityLookup> = Arc::new(RendezvousIdentityLookup::new(
            local_id.clone(),
            local_address.clone(),
            member_list.clone(),
            identity_store,
            transport.clone(),
            kinds.clone(),
            config.reservation_ttl,
            config.request_timeout,
        ));

        let cluster_context = Arc::new(ClusterContext::new(
            pid_cache.clone(),
            identity_lookup.clone(),
            transport.clone(),
            config.request_timeout,
            config.max_resolve_attempts,
        ));

        let (background_shutdown, background_shutdown_rx) = tokio::sync::watch::channel(false);

        Self {
            local_id,
            local_address,
            config,
            kinds,
            member_list,
            pid_cache,
            gossiper,
            identity_lookup,
            cluster_context,
            provider,
            transport,
            actor_host,
            background_shutdown,
            background_shutdown_rx,
        }
    }

    #[must_use]
    pub fn member_list(&self) -> Arc<MemberList> {
        self.member_list.clone()
    }

    #[must_use]
    pub fn pid_cache(&self) -> Arc<PidCache> {
        self.pid_cache.clone()
    }

    #[must_use]
    pub fn cluster_context(&self) -> Arc<ClusterContext> {
        self.cluster_context.clone()
    }

    #[must_use]
    pub fn kinds(&self) -> Arc<ClusterKindRegistry> {
        self.kinds.clone()
    }

    #[must_use]
    pub fn identity_lookup(&self) -> Arc<dyn IdentityLookup> {
        self.identity_lookup.clone()
    }

    /// Runs the 10-step startup sequence and awaits `MemberList`'s started signal.
    pub async fn start(self: &Arc<Self>, mode: JoinMode) -> ClusterResult<()> {
        let span = info_span!("orchestrator_start", local_id = %self.local_id);
        async {
            // 1. Registry already built by `build`; built-in kinds are registered
            //    by the caller via `ClusterKindRegistryBuilder::with_default_topic_kind`.
            // 2. Start the remote transport.
            self.transport.start().await.map_err(|source| ClusterError::Transport {
                identity: grainweave_core::ClusterIdentity::new("orchestrator", &self.local_id),
                source,
            })?;

            // 3. MemberList already instantiated; subscribe PidCache eviction to topology events.
            let mut topology_rx = self.member_list.subscribe();
            let pid_cache = self.pid_cache.clone();
            let gossiper_for_topology = self.gossiper.clone();
            tokio::spawn(
                async move {
                    while let Some(topology) = topology_rx.recv().await {
                        pid_cache.on_topology_changed(&topology);
                        gossiper_for_topology.start_new_generation();
                    }
                }
                .instrument(info_span!("topology_subscriber")),
            );

            // 4. ClusterContext already built by `build`.

            // 5. IdentityLookup already initialized with the registered kind names.
            info!(kinds = ?self.kinds.all_names(), "identity lookup initialized");

            // 6. Spawn the identity-activator supervisor: out of scope (actor
            //    runtime), represented by `ActorHost` which the embedder supplies.

            // 7. Start pub/sub: the topic kind is registered by the caller, no
            //    separate startup step is required by this crate.

            // 8. Start Gossiper and initialize MemberList's consensus generation.
            self.gossiper.start(self.transport.clone(), self.member_list.clone());
            self.gossiper.start_new_generation();

            if let Some(handle) = self.pid_cache.spawn_cleanup_task(
                self.config.pid_cache_clear_interval,
                self.config.pid_cache_time_to_live,
                self.background_shutdown_rx.clone(),
            ) {
                drop(handle);
            }

            // Self-fencing: if the provider stops reporting this member alive
            // for longer than `member_health_timeout`, fence it from the
            // cluster by tearing the orchestrator down ungracefully.
            if let Some(handle) = self
                .member_list
                .spawn_fencing_task(self.config.member_health_timeout, self.background_shutdown_rx.clone())
            {
                drop(handle);
            }
            self.spawn_fencing_supervisor();

            metrics::register();
            self.spawn_metrics_sampler();

            // 9. Start the cluster provider in member or client mode.
            match mode {
                JoinMode::Member => self
                    .provider
                    .start_member(&self.local_id, &self.local_address)
                    .await
                    .map_err(|source| ClusterError::Transport {
                        identity: grainweave_core::ClusterIdentity::new("orchestrator", &self.local_id),
                        source,
                    })?,
                JoinMode::Client => self
                    .provider
                    .start_client(&self.local_id)
                    .await
                    .map_err(|source| ClusterError::Transport {
                        identity: grainweave_core::ClusterIdentity::new("orchestrator", &self.local_id),
                        source,
                    })?,
            }

            self.spawn_provider_bridge();

            // 10. Await MemberList.Started.
            self.member_list.await_started().await;

            Ok(())
        }
        .instrument(span)
        .await
    }

    fn spawn_provider_bridge(self: &Arc<Self>) {
        let mut raw_events = self.provider.subscribe();
        let member_list = self.member_list.clone();
        tokio::spawn(
            async move {
                while let Some(event) = raw_events.recv().await {
                    member_list.apply_event(event).await;
                }
            }
            .instrument(info_span!("provider_bridge")),
        );
    }

    /// Waits for `MemberList` to declare the local member fenced, then tears
    /// the orchestrator down ungracefully.
    fn spawn_fencing_supervisor(self: &Arc<Self>) {
        let member_list = self.member_list.clone();
        let orchestrator = self.clone();
        tokio::spawn(
            async move {
                member_list.await_fenced().await;
                error!(error = %ClusterError::MemberFenced, "self-fenced, shutting down ungracefully");
                if let Err(source) = orchestrator.shutdown(false).await {
                    error!(%source, "ungraceful shutdown after self-fencing failed");
                }
            }
            .instrument(info_span!("fencing_supervisor")),
        );
    }

    /// Periodically samples `MemberList`/`ClusterKindRegistry` into the
    /// `cluster.members.count` / `cluster.virtual_actors.count` gauges.
    fn spawn_metrics_sampler(self: &Arc<Self>) {
        let member_list = self.member_list.clone();
        let kinds = self.kinds.clone();
        let mut shutdown = self.background_shutdown_rx.clone();
        let interval = self.config.gossip_interval;
        tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let alive = member_list.current().members.len();
                            metrics::observe_members_count(alive);
                            metrics::observe_virtual_actors_count(kinds.total_activation_count());
                        }
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            }
            .instrument(info_span!("metrics_sampler")),
        );
    }

    /// Runs the 8-step shutdown sequence, respecting `graceful`.
    pub async fn shutdown(&self, graceful: bool) -> ClusterResult<()> {
        let span = info_span!("orchestrator_shutdown", local_id = %self.local_id, graceful);
        async {
            // 1-2. Announce departure and wait for propagation: handled inside Gossiper::shutdown.

            // 3. Detach metric observers: stop the periodic sampler, along
            //    with the other background sweeps sharing this signal.
            let _ = self.background_shutdown.send(true);

            // 4. Stop the hosting actor system.
            let _ = self.actor_host.stop().await;

            // 5. Shut down the Gossiper (covers steps 1-2 above).
            self.gossiper.shutdown().await;

            // 6. If graceful, release all identity reservations held locally.
            if graceful {
                self.identity_lookup.shutdown().await;
            }

            // 7. Stop the provider.
            let _ = self.provider.shutdown(graceful).await;

            // 8. Stop the remote transport.
            self.transport.stop().await.map_err(|source| ClusterError::Transport {
                identity: grainweave_core::ClusterIdentity::new("orchestrator", &self.local_id),
                source,
            })?;

            Ok(())
        }
        .instrument(span)
        .await
    }
}
