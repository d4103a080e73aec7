//! Cluster-wide gauges, registered at orchestrator startup and detached at shutdown.

use metrics::{describe_gauge, gauge};

const MEMBERS_COUNT: &str = "cluster.members.count";
const VIRTUAL_ACTORS_COUNT: &str = "cluster.virtual_actors.count";

/// Registers gauge descriptions. Call once, before the first observation.
pub fn register() {
    describe_gauge!(MEMBERS_COUNT, "Number of alive members in the local topology view");
    describe_gauge!(VIRTUAL_ACTORS_COUNT, "Number of local grain activations across all kinds");
}

pub fn observe_members_count(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!(MEMBERS_COUNT).set(count as f64);
}

pub fn observe_virtual_actors_count(count: u64) {
    #[allow(clippy::cast_precision_loss)]
    gauge!(VIRTUAL_ACTORS_COUNT).set(count as f64);
}
