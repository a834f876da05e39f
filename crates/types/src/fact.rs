//! Ballot facts: the canonical payloads being voted on.
//!
//! Byte layouts here are signature inputs and must stay bit-exact:
//! integers are big-endian fixed width (height: i64, round: u64) and fields
//! concatenate in declaration order.

use crate::address::Address;
use crate::chain::{Height, Round, Stage};
use crate::error::ValidationError;
use crate::hash::Hash;
use serde::{Deserialize, Serialize};

/// Fact of an INIT ballot: agreement on the previous block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitFact {
    pub height: Height,
    pub round: Round,
    pub previous_block: Hash,
}

impl InitFact {
    pub fn new(height: Height, round: Round, previous_block: Hash) -> Self {
        InitFact {
            height,
            round,
            previous_block,
        }
    }

    /// `H ‖ R ‖ previousBlock`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + Hash::SIZE);
        out.extend_from_slice(&self.height.to_be_bytes());
        out.extend_from_slice(&self.round.to_be_bytes());
        out.extend_from_slice(self.previous_block.as_bytes());
        out
    }

    pub fn is_valid(&self) -> Result<(), ValidationError> {
        self.height.is_valid()?;
        if self.previous_block.is_empty() {
            return Err(ValidationError::invalid_fact("empty previous block"));
        }
        Ok(())
    }
}

/// Fact of a SIGN ballot: early agreement on the processed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignFact {
    pub height: Height,
    pub round: Round,
    pub proposal: Hash,
    pub new_block: Hash,
}

impl SignFact {
    pub fn new(height: Height, round: Round, proposal: Hash, new_block: Hash) -> Self {
        SignFact {
            height,
            round,
            proposal,
            new_block,
        }
    }

    /// `H ‖ R ‖ proposal ‖ newBlock`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + Hash::SIZE * 2);
        out.extend_from_slice(&self.height.to_be_bytes());
        out.extend_from_slice(&self.round.to_be_bytes());
        out.extend_from_slice(self.proposal.as_bytes());
        out.extend_from_slice(self.new_block.as_bytes());
        out
    }

    pub fn is_valid(&self) -> Result<(), ValidationError> {
        self.height.is_valid()?;
        if self.proposal.is_empty() {
            return Err(ValidationError::invalid_fact("empty proposal hash"));
        }
        if self.new_block.is_empty() {
            return Err(ValidationError::invalid_fact("empty new block hash"));
        }
        Ok(())
    }
}

/// Fact of an ACCEPT ballot: final agreement on the processed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptFact {
    pub height: Height,
    pub round: Round,
    pub proposal: Hash,
    pub new_block: Hash,
}

impl AcceptFact {
    pub fn new(height: Height, round: Round, proposal: Hash, new_block: Hash) -> Self {
        AcceptFact {
            height,
            round,
            proposal,
            new_block,
        }
    }

    /// `H ‖ R ‖ proposal ‖ newBlock`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + Hash::SIZE * 2);
        out.extend_from_slice(&self.height.to_be_bytes());
        out.extend_from_slice(&self.round.to_be_bytes());
        out.extend_from_slice(self.proposal.as_bytes());
        out.extend_from_slice(self.new_block.as_bytes());
        out
    }

    pub fn is_valid(&self) -> Result<(), ValidationError> {
        self.height.is_valid()?;
        if self.proposal.is_empty() {
            return Err(ValidationError::invalid_fact("empty proposal hash"));
        }
        if self.new_block.is_empty() {
            return Err(ValidationError::invalid_fact("empty new block hash"));
        }
        Ok(())
    }
}

/// The closed set of votable facts.
///
/// The tally path works over this enum directly, so no dynamic dispatch ever
/// happens inside the ballotbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BallotFact {
    Init(InitFact),
    Sign(SignFact),
    Accept(AcceptFact),
}

impl BallotFact {
    pub fn height(&self) -> Height {
        match self {
            BallotFact::Init(f) => f.height,
            BallotFact::Sign(f) => f.height,
            BallotFact::Accept(f) => f.height,
        }
    }

    pub fn round(&self) -> Round {
        match self {
            BallotFact::Init(f) => f.round,
            BallotFact::Sign(f) => f.round,
            BallotFact::Accept(f) => f.round,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            BallotFact::Init(_) => Stage::Init,
            BallotFact::Sign(_) => Stage::Sign,
            BallotFact::Accept(_) => Stage::Accept,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            BallotFact::Init(f) => f.to_bytes(),
            BallotFact::Sign(f) => f.to_bytes(),
            BallotFact::Accept(f) => f.to_bytes(),
        }
    }

    /// Content address of the fact.
    pub fn hash(&self) -> Hash {
        Hash::from_bytes(&self.to_bytes())
    }

    pub fn is_valid(&self) -> Result<(), ValidationError> {
        match self {
            BallotFact::Init(f) => f.is_valid(),
            BallotFact::Sign(f) => f.is_valid(),
            BallotFact::Accept(f) => f.is_valid(),
        }
    }

    /// The INIT payload, when this is an INIT fact.
    pub fn as_init(&self) -> Option<&InitFact> {
        match self {
            BallotFact::Init(f) => Some(f),
            _ => None,
        }
    }

    /// The ACCEPT payload, when this is an ACCEPT fact.
    pub fn as_accept(&self) -> Option<&AcceptFact> {
        match self {
            BallotFact::Accept(f) => Some(f),
            _ => None,
        }
    }
}

/// Fact of a Proposal: the seals the proposer wants in the next block.
///
/// Proposals are published and validated but never voted on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalFact {
    pub height: Height,
    pub round: Round,
    pub proposer: Address,
    /// Hashes of the operation seals to include, in proposer order.
    pub seals: Vec<Hash>,
}

impl ProposalFact {
    pub fn new(height: Height, round: Round, proposer: Address, seals: Vec<Hash>) -> Self {
        ProposalFact {
            height,
            round,
            proposer,
            seals,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.proposer.as_bytes().len() + self.seals.len() * Hash::SIZE);
        out.extend_from_slice(&self.height.to_be_bytes());
        out.extend_from_slice(&self.round.to_be_bytes());
        out.extend_from_slice(self.proposer.as_bytes());
        for seal in &self.seals {
            out.extend_from_slice(seal.as_bytes());
        }
        out
    }

    pub fn hash(&self) -> Hash {
        Hash::from_bytes(&self.to_bytes())
    }

    pub fn is_valid(&self) -> Result<(), ValidationError> {
        self.height.is_valid()?;
        if self.seals.iter().any(Hash::is_empty) {
            return Err(ValidationError::invalid_fact("empty seal hash in proposal"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_fact_bytes_layout() {
        let prev = Hash::from_bytes(b"prev");
        let fact = InitFact::new(Height::new(10), Round::new(3), prev);

        let bytes = fact.to_bytes();
        assert_eq!(bytes.len(), 8 + 8 + 32);
        assert_eq!(&bytes[..8], &10i64.to_be_bytes());
        assert_eq!(&bytes[8..16], &3u64.to_be_bytes());
        assert_eq!(&bytes[16..], prev.as_bytes());
    }

    #[test]
    fn accept_fact_bytes_layout() {
        let proposal = Hash::from_bytes(b"proposal");
        let new_block = Hash::from_bytes(b"block");
        let fact = AcceptFact::new(Height::new(7), Round::new(0), proposal, new_block);

        let bytes = fact.to_bytes();
        assert_eq!(bytes.len(), 8 + 8 + 64);
        assert_eq!(&bytes[16..48], proposal.as_bytes());
        assert_eq!(&bytes[48..], new_block.as_bytes());
    }

    #[test]
    fn fact_hash_tracks_content() {
        let a = BallotFact::Init(InitFact::new(
            Height::new(10),
            Round::new(0),
            Hash::from_bytes(b"a"),
        ));
        let b = BallotFact::Init(InitFact::new(
            Height::new(10),
            Round::new(0),
            Hash::from_bytes(b"b"),
        ));
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), a.clone().hash());
    }

    #[test]
    fn empty_hashes_are_invalid() {
        let fact = InitFact::new(Height::new(1), Round::new(0), Hash::ZERO);
        assert!(fact.is_valid().is_err());

        let fact = AcceptFact::new(
            Height::new(1),
            Round::new(0),
            Hash::ZERO,
            Hash::from_bytes(b"b"),
        );
        assert!(fact.is_valid().is_err());
    }
}
