//! Catalog of grain kinds and their activation factories.
//!
//! A `ClusterKindRegistry` is built once at startup and never mutated
//! afterward; lookups are lock-free reads over a plain `HashMap`. Each kind
//! owns a factory that activates a local grain instance for a given identity
//! and returns the opaque local id the transport layer addresses it by.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use grainweave_core::ClusterIdentity;

use crate::error::{ClusterError, ClusterResult};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Activates a local grain instance for `identity`, returning its local id.
pub trait GrainFactory: Send + Sync {
    fn activate(&self, identity: &ClusterIdentity) -> BoxFuture<'_, anyhow::Result<String>>;
}

impl<F, Fut> GrainFactory for F
where
    F: Fn(ClusterIdentity) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
{
    fn activate(&self, identity: &ClusterIdentity) -> BoxFuture<'_, anyhow::Result<String>> {
        Box::pin((self)(identity.clone()))
    }
}

/// A single registered grain kind.
pub struct ClusterKind {
    pub name: String,
    factory: Arc<dyn GrainFactory>,
    activation_count: AtomicU64,
}

impl ClusterKind {
    #[must_use]
    pub fn new(name: impl Into<String>, factory: Arc<dyn GrainFactory>) -> Self {
        Self {
            name: name.into(),
            factory,
            activation_count: AtomicU64::new(0),
        }
    }

    pub async fn activate(&self, identity: &ClusterIdentity) -> anyhow::Result<String> {
        let local_id = self.factory.activate(identity).await?;
        self.activation_count.fetch_add(1, Ordering::Relaxed);
        Ok(local_id)
    }

    #[must_use]
    pub fn activation_count(&self) -> u64 {
        self.activation_count.load(Ordering::Relaxed)
    }
}

/// The built-in pub/sub kind every non-client member registers automatically.
pub const TOPIC_KIND: &str = "topic";

/// Immutable-after-startup catalog of grain kinds.
pub struct ClusterKindRegistry {
    kinds: HashMap<String, ClusterKind>,
}

impl ClusterKindRegistry {
    #[must_use]
    pub fn builder() -> ClusterKindRegistryBuilder {
        ClusterKindRegistryBuilder::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ClusterKind> {
        self.kinds.get(name)
    }

    pub fn try_get(&self, name: &str) -> ClusterResult<&ClusterKind> {
        self.get(name)
            .ok_or_else(|| ClusterError::UnknownKind(name.to_string()))
    }

    #[must_use]
    pub fn all_names(&self) -> Vec<&str> {
        self.kinds.keys().map(String::as_str).collect()
    }

    /// Sum of per-kind activation counts, sampled for `cluster.virtual_actors.count`.
    #[must_use]
    pub fn total_activation_count(&self) -> u64 {
        self.kinds.values().map(ClusterKind::activation_count).sum()
    }
}

#[derive(Default)]
pub struct ClusterKindRegistryBuilder {
    kinds: HashMap<String, ClusterKind>,
}

impl ClusterKindRegistryBuilder {
    #[must_use]
    pub fn with_kind(mut self, name: impl Into<String>, factory: Arc<dyn GrainFactory>) -> Self {
        let name = name.into();
        self.kinds.insert(name.clone(), ClusterKind::new(name, factory));
        self
    }

    /// Registers the built-in `topic` kind unless the caller already provided one.
    #[must_use]
    pub fn with_default_topic_kind(self) -> Self {
        if self.kinds.contains_key(TOPIC_KIND) {
            return self;
        }
        self.with_kind(
            TOPIC_KIND,
            Arc::new(|identity: ClusterIdentity| async move { Ok(format!("topic:{}", identity.identity)) }),
        )
    }

    #[must_use]
    pub fn build(self) -> ClusterKindRegistry {
        ClusterKindRegistry { kinds: self.kinds }
    }
}
