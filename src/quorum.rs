//! Journal quorum monitoring.
//!
//! Quorum is a pure function of the current joined journal-peer count. There
//! is no hysteresis: peers joining and leaving quickly flap the signal. The
//! monitor only counts flips so the flapping is visible in logs and metrics;
//! restarts downstream are debounced by change fingerprints instead.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Evaluate whether `joined` journal peers satisfy `threshold`.
pub fn evaluate(joined: usize, threshold: usize) -> bool {
    joined >= threshold
}

/// Result of a quorum evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumStatus {
    /// Number of joined journal peers.
    pub joined: usize,
    /// Configured quorum threshold.
    pub threshold: usize,
    /// Whether the quorum is satisfied.
    pub satisfied: bool,
}

/// Tracks the quorum signal across evaluations.
#[derive(Debug)]
pub struct QuorumMonitor {
    threshold: usize,
    last: Option<bool>,
    transitions: u64,
}

impl QuorumMonitor {
    /// Create a new monitor with the given threshold.
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            last: None,
            transitions: 0,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Re-evaluate the signal for the current joined count.
    pub fn observe(&mut self, joined: usize) -> QuorumStatus {
        let satisfied = evaluate(joined, self.threshold);

        match self.last {
            Some(prev) if prev != satisfied => {
                self.transitions += 1;
                info!(
                    joined,
                    threshold = self.threshold,
                    satisfied,
                    transitions = self.transitions,
                    "Journal quorum changed"
                );
            }
            None => {
                debug!(joined, threshold = self.threshold, satisfied, "Journal quorum evaluated");
            }
            _ => {}
        }
        self.last = Some(satisfied);

        QuorumStatus {
            joined,
            threshold: self.threshold,
            satisfied,
        }
    }

    /// Number of times the signal flipped since creation.
    pub fn transitions(&self) -> u64 {
        self.transitions
    }
}
