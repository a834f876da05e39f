//! Vote aggregation for ISAAC consensus.
//!
//! The [`Ballotbox`] is the single entry point for counting ballots: every
//! validated ballot goes through [`Ballotbox::vote`], which returns the
//! current [`Voteproof`](isaac_types::Voteproof) for that ballot's
//! (height, round, stage).
//!
//! # Concurrency
//!
//! The (height, round, stage) → records index is a sharded concurrent map;
//! each [`VoteRecords`] entry carries its own small mutex guarding the tally
//! and the cached voteproof. `vote` never holds a map shard lock while a
//! voteproof is being computed, so concurrent votes on different keys never
//! contend and concurrent votes on one key serialize only on that entry.

mod ballotbox;
mod records;

pub use ballotbox::{Ballotbox, SuffragesFn, ThresholdFn};
pub use records::VoteRecords;

use isaac_types::{Address, ValidationError};
use thiserror::Error;

/// Failures of the voting entry point.
#[derive(Debug, Error)]
pub enum BallotboxError {
    /// The ballot's node is outside the current suffrage snapshot.
    #[error("node {node} is not in suffrages")]
    NotInSuffrage { node: Address },

    /// The ballot failed validation.
    #[error(transparent)]
    InvalidBallot(#[from] ValidationError),

    /// The threshold function could not produce a quorum.
    #[error("no quorum available from threshold function")]
    ThresholdUnavailable,
}
