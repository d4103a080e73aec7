//! Shared cluster domain types for the grainweave virtual-actor runtime.
//!
//! This crate carries only plain data and pure functions consumed by both
//! node-local orchestration and any remote client:
//!
//! - **Identity** ([`identity`]): `ClusterIdentity`, `RemoteLocation`
//! - **Member** ([`member`]): `Member`, `MemberStatus`, `ClusterTopology`
//! - **Hash** ([`hash`]): FNV-1a hashing and rendezvous owner selection
//! - **Gossip** ([`gossip`]): per-member keyed state, vector clocks
//! - **Wire** ([`wire`]): inter-node protocol messages

pub mod gossip;
pub mod hash;
pub mod identity;
pub mod member;
pub mod wire;

pub use gossip::{GossipDeltaItem, GossipEntry, GossipState, VectorClock, CLUSTER_LEFT_KEY};
pub use hash::{combine_hashes, fnv1a_hash, owner_candidate, rank_candidates};
pub use identity::{ClusterIdentity, RemoteLocation};
pub use member::{ClusterTopology, Member, MemberId, MemberStatus};
pub use wire::ClusterMessage;
