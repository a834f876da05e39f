//! Seals: the network-level envelope around ballots and proposals.

use crate::address::Address;
use crate::ballot::Ballot;
use crate::error::ValidationError;
use crate::hash::Hash;
use crate::keys::{NetworkId, PublicKey};
use crate::proposal::Proposal;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Anything that travels between nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Seal {
    Ballot(Ballot),
    Proposal(Proposal),
}

impl Seal {
    pub fn hash(&self) -> Hash {
        match self {
            Seal::Ballot(b) => b.hash(),
            Seal::Proposal(p) => p.hash(),
        }
    }

    pub fn node(&self) -> &Address {
        match self {
            Seal::Ballot(b) => b.node(),
            Seal::Proposal(p) => p.node(),
        }
    }

    pub fn signer(&self) -> &PublicKey {
        match self {
            Seal::Ballot(b) => b.signer(),
            Seal::Proposal(p) => p.signer(),
        }
    }

    pub fn signed_at(&self) -> SystemTime {
        match self {
            Seal::Ballot(b) => b.signed_at(),
            Seal::Proposal(p) => p.signed_at(),
        }
    }

    pub fn is_signed_within(&self, timespan: Duration) -> bool {
        match self {
            Seal::Ballot(b) => b.is_signed_within(timespan),
            Seal::Proposal(p) => p.is_signed_within(timespan),
        }
    }

    pub fn is_valid(&self, network_id: &NetworkId) -> Result<(), ValidationError> {
        match self {
            Seal::Ballot(b) => b.is_valid(network_id),
            Seal::Proposal(p) => p.is_valid(network_id),
        }
    }

    pub fn as_ballot(&self) -> Option<&Ballot> {
        match self {
            Seal::Ballot(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_proposal(&self) -> Option<&Proposal> {
        match self {
            Seal::Proposal(p) => Some(p),
            _ => None,
        }
    }

    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Seal::Ballot(_) => "ballot",
            Seal::Proposal(_) => "proposal",
        }
    }
}

impl From<Ballot> for Seal {
    fn from(b: Ballot) -> Self {
        Seal::Ballot(b)
    }
}

impl From<Proposal> for Seal {
    fn from(p: Proposal) -> Self {
        Seal::Proposal(p)
    }
}
