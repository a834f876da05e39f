//! Signed proposals.

use crate::address::Address;
use crate::chain::{Height, Round};
use crate::error::ValidationError;
use crate::fact::ProposalFact;
use crate::hash::Hash;
use crate::keys::{KeyPair, NetworkId, PublicKey, Signature};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// The proposer's published block candidate for one (height, round).
///
/// Structurally a signed envelope like [`crate::Ballot`], but proposals are
/// never voted on and carry no reference voteproof.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    hash: Hash,
    signer: PublicKey,
    signature: Signature,
    signed_at: SystemTime,
    body_hash: Hash,
    fact: ProposalFact,
    fact_hash: Hash,
    fact_signature: Signature,
}

impl Proposal {
    pub fn sign(
        fact: ProposalFact,
        keypair: &KeyPair,
        network_id: &NetworkId,
    ) -> Result<Self, ValidationError> {
        fact.is_valid()?;

        let fact_hash = fact.hash();
        let mut fact_message = fact_hash.as_bytes().to_vec();
        fact_message.extend_from_slice(network_id.as_bytes());
        let fact_signature = keypair.sign(&fact_message);

        let body_hash = Hash::from_slices(&[&fact.to_bytes(), network_id.as_bytes()]);
        let mut body_message = body_hash.as_bytes().to_vec();
        body_message.extend_from_slice(network_id.as_bytes());
        let signature = keypair.sign(&body_message);

        let hash = Hash::from_slices(&[
            fact.proposer.as_bytes(),
            &fact.to_bytes(),
            body_hash.as_bytes(),
            network_id.as_bytes(),
        ]);

        Ok(Proposal {
            hash,
            signer: keypair.public_key(),
            signature,
            signed_at: SystemTime::now(),
            body_hash,
            fact,
            fact_hash,
            fact_signature,
        })
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn node(&self) -> &Address {
        &self.fact.proposer
    }

    pub fn signer(&self) -> &PublicKey {
        &self.signer
    }

    pub fn signed_at(&self) -> SystemTime {
        self.signed_at
    }

    pub fn fact(&self) -> &ProposalFact {
        &self.fact
    }

    pub fn height(&self) -> Height {
        self.fact.height
    }

    pub fn round(&self) -> Round {
        self.fact.round
    }

    /// Seal hashes the proposer wants included.
    pub fn seals(&self) -> &[Hash] {
        &self.fact.seals
    }

    pub fn is_signed_within(&self, timespan: Duration) -> bool {
        let now = SystemTime::now();
        let skew = now
            .duration_since(self.signed_at)
            .or_else(|_| self.signed_at.duration_since(now))
            .unwrap_or_default();
        skew <= timespan
    }

    pub fn is_valid(&self, network_id: &NetworkId) -> Result<(), ValidationError> {
        self.fact.is_valid()?;

        if self.fact.hash() != self.fact_hash {
            return Err(ValidationError::invalid_proposal(format!(
                "fact hash mismatch: recorded={} derived={}",
                self.fact_hash,
                self.fact.hash()
            )));
        }

        let derived_body = Hash::from_slices(&[&self.fact.to_bytes(), network_id.as_bytes()]);
        if derived_body != self.body_hash {
            return Err(ValidationError::invalid_proposal("body hash mismatch"));
        }

        let derived_hash = Hash::from_slices(&[
            self.fact.proposer.as_bytes(),
            &self.fact.to_bytes(),
            self.body_hash.as_bytes(),
            network_id.as_bytes(),
        ]);
        if derived_hash != self.hash {
            return Err(ValidationError::invalid_proposal("proposal hash mismatch"));
        }

        let mut body_message = self.body_hash.as_bytes().to_vec();
        body_message.extend_from_slice(network_id.as_bytes());
        if !self.signer.verify(&body_message, &self.signature) {
            return Err(ValidationError::signature("proposal body signature"));
        }

        let mut fact_message = self.fact_hash.as_bytes().to_vec();
        fact_message.extend_from_slice(network_id.as_bytes());
        if !self.signer.verify(&fact_message, &self.fact_signature) {
            return Err(ValidationError::signature("proposal fact signature"));
        }

        Ok(())
    }
}
