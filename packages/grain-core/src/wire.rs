//! Cluster inter-node wire messages.
//!
//! Exchanged between cluster nodes over the transport's dedicated inter-node
//! channel, serialized with `MsgPack` (`rmp_serde::to_vec_named`). Separate
//! from any application-facing request/response payload, which travels
//! opaquely inside `RequestPayload`/`ResponsePayload`.

use serde::{Deserialize, Serialize};

use crate::gossip::{GossipDeltaItem, VectorClock};
use crate::identity::{ClusterIdentity, RemoteLocation};

/// Top-level cluster protocol message.
///
/// Internally tagged on `"type"` with `SCREAMING_SNAKE_CASE` variant names,
/// matching the wire convention used throughout this codebase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterMessage {
    // -- Gossip anti-entropy (2) --------------------------------------------
    GossipVectorClock(GossipVectorClockPayload),
    GossipDelta(GossipDeltaPayload),

    // -- Identity placement (3) ----------------------------------------------
    ActivationRequest(ActivationRequestPayload),
    ActivationResponse(ActivationResponsePayload),
    OpForward(OpForwardPayload),
}

/// A node's summary of the highest sequence it holds for every member, sent
/// to a gossip peer to request a delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GossipVectorClockPayload {
    pub sender_id: String,
    pub clock: VectorClock,
}

/// Reply to a `GossipVectorClockPayload`: every entry strictly newer than the
/// sender's clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GossipDeltaPayload {
    pub responder_id: String,
    pub items: Vec<GossipDeltaItem>,
}

/// Forwarded activation request: the sender believes `target` is the owner
/// candidate for `identity` and asks it to resolve or activate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationRequestPayload {
    pub identity: ClusterIdentity,
    pub requester_id: String,
}

/// Response to an `ActivationRequestPayload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationResponsePayload {
    pub identity: ClusterIdentity,
    pub location: Option<RemoteLocation>,
}

/// Forwards an application request to the current owner of a virtual identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpForwardPayload {
    pub source_member_id: String,
    pub identity: ClusterIdentity,
    /// Opaque, MsgPack-serialized application payload.
    pub payload: Vec<u8>,
}
