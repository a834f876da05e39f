//! Validation errors shared by all value types.

use thiserror::Error;

/// Failure modes of `is_valid` checks across the type layer.
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("invalid ballot: {0}")]
    InvalidBallot(String),

    #[error("invalid proposal: {0}")]
    InvalidProposal(String),

    #[error("invalid voteproof: {0}")]
    InvalidVoteproof(String),

    #[error("invalid fact: {0}")]
    InvalidFact(String),

    #[error("invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("signature verification failed: {0}")]
    SignatureVerification(String),
}

impl ValidationError {
    pub fn invalid_ballot(msg: impl Into<String>) -> Self {
        ValidationError::InvalidBallot(msg.into())
    }

    pub fn invalid_proposal(msg: impl Into<String>) -> Self {
        ValidationError::InvalidProposal(msg.into())
    }

    pub fn invalid_voteproof(msg: impl Into<String>) -> Self {
        ValidationError::InvalidVoteproof(msg.into())
    }

    pub fn invalid_fact(msg: impl Into<String>) -> Self {
        ValidationError::InvalidFact(msg.into())
    }

    pub fn invalid_threshold(msg: impl Into<String>) -> Self {
        ValidationError::InvalidThreshold(msg.into())
    }

    pub fn invalid_policy(msg: impl Into<String>) -> Self {
        ValidationError::InvalidPolicy(msg.into())
    }

    pub fn signature(msg: impl Into<String>) -> Self {
        ValidationError::SignatureVerification(msg.into())
    }
}
