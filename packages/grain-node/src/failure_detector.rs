//! Phi-accrual failure detection for gossip peers.
//!
//! Statistical failure detection based on heartbeat interval distribution,
//! using the CDF-based phi formula from the phi-accrual failure detector
//! paper (Hayashibara et al., 2004). Used by the `Gossiper` to decide which
//! peers to skip during anti-entropy fan-out.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Suspicion tracking for one peer, observed only through `FailureDetector`.
pub trait FailureDetector: Send + Sync {
    fn heartbeat(&self, node_id: &str, timestamp_ms: u64);
    fn is_alive(&self, node_id: &str, timestamp_ms: u64) -> bool;
    fn last_heartbeat(&self, node_id: &str) -> Option<u64>;
    fn suspicion_level(&self, node_id: &str, timestamp_ms: u64) -> f64;
    fn remove(&self, node_id: &str);
    fn reset(&self);
}

#[derive(Debug, Clone)]
pub struct PhiAccrualConfig {
    pub phi_threshold: f64,
    pub max_sample_size: usize,
    pub min_std_dev_ms: u64,
    pub max_no_heartbeat_ms: u64,
}

impl Default for PhiAccrualConfig {
    fn default() -> Self {
        Self {
            phi_threshold: 8.0,
            max_sample_size: 200,
            min_std_dev_ms: 100,
            max_no_heartbeat_ms: 5000,
        }
    }
}

struct NodeHeartbeatState {
    last_heartbeat_ms: u64,
    intervals: Vec<u64>,
}

/// Statistical failure detector using the phi-accrual algorithm.
pub struct PhiAccrualFailureDetector {
    config: PhiAccrualConfig,
    states: RwLock<HashMap<String, NodeHeartbeatState>>,
}

impl PhiAccrualFailureDetector {
    #[must_use]
    pub fn new(config: PhiAccrualConfig) -> Self {
        Self {
            config,
            states: RwLock::new(HashMap::new()),
        }
    }
}

impl FailureDetector for PhiAccrualFailureDetector {
    fn heartbeat(&self, node_id: &str, timestamp_ms: u64) {
        let mut states = self.states.write();
        let max_samples = self.config.max_sample_size;

        match states.get_mut(node_id) {
            Some(state) => {
                let interval = timestamp_ms.saturating_sub(state.last_heartbeat_ms);
                state.last_heartbeat_ms = timestamp_ms;
                if state.intervals.len() >= max_samples {
                    state.intervals.remove(0);
                }
                state.intervals.push(interval);
            }
            None => {
                states.insert(
                    node_id.to_string(),
                    NodeHeartbeatState {
                        last_heartbeat_ms: timestamp_ms,
                        intervals: Vec::new(),
                    },
                );
            }
        }
    }

    fn is_alive(&self, node_id: &str, timestamp_ms: u64) -> bool {
        self.suspicion_level(node_id, timestamp_ms) < self.config.phi_threshold
    }

    fn last_heartbeat(&self, node_id: &str) -> Option<u64> {
        self.states.read().get(node_id).map(|s| s.last_heartbeat_ms)
    }

    #[allow(clippy::cast_precision_loss)]
    fn suspicion_level(&self, node_id: &str, timestamp_ms: u64) -> f64 {
        let states = self.states.read();
        let Some(state) = states.get(node_id) else {
            return 0.0;
        };

        let elapsed = timestamp_ms.saturating_sub(state.last_heartbeat_ms) as f64;

        if state.intervals.len() < 3 {
            return elapsed / self.config.max_no_heartbeat_ms as f64 * self.config.phi_threshold;
        }

        let n = state.intervals.len() as f64;
        let sum: u64 = state.intervals.iter().sum();
        let mean = sum as f64 / n;

        let variance = state
            .intervals
            .iter()
            .map(|&iv| {
                let diff = iv as f64 - mean;
                diff * diff
            })
            .sum::<f64>()
            / n;
        let std_dev = variance.sqrt().max(self.config.min_std_dev_ms as f64);

        let y = -(elapsed - mean) / (std_dev * std::f64::consts::SQRT_2);
        let cdf = 0.5 * erfc(y);

        let one_minus_cdf = (1.0 - cdf).max(f64::MIN_POSITIVE);
        (-(one_minus_cdf.log10())).max(0.0)
    }

    fn remove(&self, node_id: &str) {
        self.states.write().remove(node_id);
    }

    fn reset(&self) {
        self.states.write().clear();
    }
}

/// Complementary error function (Abramowitz and Stegun, formula 7.1.26).
fn erfc(x: f64) -> f64 {
    let (z, negate) = if x < 0.0 { (-x, true) } else { (x, false) };

    let t = 1.0 / (1.0 + 0.327_591_1 * z);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    let result = poly * (-z * z).exp();

    if negate {
        2.0 - result
    } else {
        result
    }
}
