//! Local consensus policy.

use crate::error::ValidationError;
use crate::threshold::{Threshold, ThresholdRatio};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunable consensus parameters of one node.
///
/// Handlers take an immutable `Arc<LocalPolicy>` snapshot when they
/// activate; runtime changes build a fresh policy and swap the `Arc`, so a
/// round in flight never sees a half-updated configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalPolicy {
    /// Quorum ratio applied to the suffrage size.
    pub threshold_ratio: ThresholdRatio,
    /// Size of the acting set per (height, round).
    pub number_of_acting_suffrage_nodes: usize,
    /// How long the Consensus state waits for a Proposal before advancing
    /// the round.
    pub timeout_waiting_proposal: Duration,
    /// Re-broadcast interval for the current INIT ballot.
    pub interval_broadcasting_init_ballot: Duration,
    /// Re-broadcast interval for the current Proposal.
    pub interval_broadcasting_proposal: Duration,
    /// Delay between processing a Proposal and broadcasting the ACCEPT
    /// ballot, leaving room for SIGN ballots.
    pub wait_broadcasting_accept_ballot: Duration,
    /// Re-broadcast interval for the current ACCEPT ballot.
    pub interval_broadcasting_accept_ballot: Duration,
    /// Accepted clock skew on incoming seals.
    pub timespan_valid_ballot: Duration,
    /// Upper bound on proposal processing.
    pub timeout_process_proposal: Duration,
}

impl Default for LocalPolicy {
    fn default() -> Self {
        LocalPolicy {
            threshold_ratio: ThresholdRatio(67.0),
            number_of_acting_suffrage_nodes: 1,
            timeout_waiting_proposal: Duration::from_secs(5),
            interval_broadcasting_init_ballot: Duration::from_secs(1),
            interval_broadcasting_proposal: Duration::from_secs(1),
            wait_broadcasting_accept_ballot: Duration::from_secs(2),
            interval_broadcasting_accept_ballot: Duration::from_secs(1),
            timespan_valid_ballot: Duration::from_secs(60),
            timeout_process_proposal: Duration::from_secs(30),
        }
    }
}

impl LocalPolicy {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.threshold_ratio.is_valid()?;
        if self.number_of_acting_suffrage_nodes < 1 {
            return Err(ValidationError::invalid_policy(
                "acting suffrage must have at least one node".to_string(),
            ));
        }
        Ok(())
    }

    /// The quorum for a suffrage of `total` nodes under this policy.
    pub fn threshold(&self, total: u64) -> Result<Threshold, ValidationError> {
        Threshold::new(total, self.threshold_ratio)
    }
}
