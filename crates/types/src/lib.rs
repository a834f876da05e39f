//! Core types for ISAAC consensus.
//!
//! This crate provides the foundational types used throughout the consensus
//! implementation:
//!
//! - **Primitives**: [`Hash`], key material, [`Address`], [`NetworkId`]
//! - **Chain coordinates**: [`Height`], [`Round`], [`Stage`]
//! - **Voting**: ballot facts, [`Ballot`], [`Voteproof`], [`Threshold`]
//! - **Blocks**: [`Manifest`], [`Block`]
//! - **Membership**: the [`Suffrage`] trait and its variants
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer. Everything
//! here is an immutable value after construction; validation is explicit via
//! `is_valid` and never happens implicitly on access.

mod address;
mod ballot;
mod chain;
mod error;
mod fact;
mod hash;
mod keys;
mod manifest;
mod node;
mod policy;
mod proposal;
mod seal;
mod suffrage;
mod threshold;
mod voteproof;

pub use address::Address;
pub use ballot::Ballot;
pub use chain::{Height, Round, Stage, VoteResult};
pub use error::ValidationError;
pub use fact::{AcceptFact, BallotFact, InitFact, ProposalFact, SignFact};
pub use hash::Hash;
pub use keys::{KeyPair, NetworkId, PublicKey, Signature};
pub use manifest::{Block, Manifest};
pub use node::LocalNode;
pub use policy::LocalPolicy;
pub use proposal::Proposal;
pub use seal::Seal;
pub use suffrage::{ActingSuffrage, FixedSuffrage, RotatingSuffrage, Suffrage};
pub use threshold::{find_majority, Majority, Threshold, ThresholdRatio};
pub use voteproof::{Voteproof, VoteproofNodeFact};

/// Test utilities.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;
    use rand::Rng;

    /// Create a random node address.
    pub fn random_address() -> Address {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..8)
            .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
            .collect();
        Address::new(format!("n-{suffix}")).expect("generated address is valid")
    }

    /// Create a random SHA-256 hash.
    pub fn random_hash() -> Hash {
        let bytes: [u8; 32] = rand::thread_rng().gen();
        Hash::from_bytes(&bytes)
    }

    /// Network id shared by all tests.
    pub fn test_network_id() -> NetworkId {
        NetworkId::new(b"isaac-test-network".to_vec())
    }

    /// Build a finished dummy voteproof for embedding in test ballots.
    ///
    /// The voteproof carries no votes, so it fails `is_valid`; it only
    /// supplies the (height, round, stage, result) coordinates that ballot
    /// construction and the admission checker look at.
    pub fn dummy_voteproof(
        height: Height,
        round: Round,
        stage: Stage,
        result: VoteResult,
    ) -> Voteproof {
        Voteproof::new_dummy(height, round, stage, result)
    }
}
