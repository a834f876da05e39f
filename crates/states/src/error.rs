//! Error taxonomy of the state machine.

use crate::context::State;
use isaac_ballotbox::BallotboxError;
use isaac_network::NetworkError;
use isaac_storage::StorageError;
use isaac_types::{ValidationError, Voteproof};
use thiserror::Error;

/// Classified failures; most are control flow, only `Fatal` breaks a node.
#[derive(Debug, Error)]
pub enum StatesError {
    /// Admission filter dropped the voteproof; not an error for the caller.
    #[error("voteproof should be ignored")]
    IgnoreVoteproof,

    /// A component asks the supervisor to switch states.
    #[error("state needs to be changed to {to}")]
    StateToBeChange {
        to: State,
        voteproof: Option<Box<Voteproof>>,
    },

    /// Idempotent re-insertion; treated as success by ingress.
    #[error("already known")]
    Known,

    /// The seal is older than what the node already decided.
    #[error("seal is old: {0}")]
    OldSeal(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("no handler is active")]
    NoActiveHandler,

    #[error("handler for state {0} is not registered")]
    HandlerNotRegistered(State),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Ballotbox(#[from] BallotboxError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Unrecoverable; the supervisor transitions to Broken.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl StatesError {
    pub fn state_change(to: State, voteproof: Option<Voteproof>) -> Self {
        StatesError::StateToBeChange {
            to,
            voteproof: voteproof.map(Box::new),
        }
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        StatesError::Fatal(msg.into())
    }

    /// Whether this error must bubble to the supervisor as node-breaking.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StatesError::Fatal(_))
    }
}
