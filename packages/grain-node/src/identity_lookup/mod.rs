//! Identity resolution: activate-on-demand placement of virtual identities.
//!
//! An `IdentityLookup` turns a `ClusterIdentity` into a `RemoteLocation`,
//! activating the grain on its owner candidate if it is not already running
//! anywhere. [`RendezvousIdentityLookup`] is the production realization,
//! backed by a pluggable [`IdentityStore`](crate::collaborators::IdentityStore)
//! for the reservation compare-and-set.

mod rendezvous;

pub use rendezvous::RendezvousIdentityLookup;

use async_trait::async_trait;

use grainweave_core::{ClusterIdentity, RemoteLocation};

use crate::error::ClusterResult;

/// Resolves virtual identities to physical locations, activating on demand.
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    async fn get_or_activate(&self, identity: &ClusterIdentity) -> ClusterResult<RemoteLocation>;

    /// Releases any reservation this member holds for `identity`. Called when
    /// a local activation is removed so the identity can be re-placed.
    async fn remove_activation(&self, identity: &ClusterIdentity, location: &RemoteLocation);

    /// Releases every reservation currently owned by this member. Called
    /// once, during graceful shutdown.
    async fn shutdown(&self);
}
