//! Signed ballots.

use crate::address::Address;
use crate::chain::{Height, Round, Stage, VoteResult};
use crate::error::ValidationError;
use crate::fact::BallotFact;
use crate::hash::Hash;
use crate::keys::{KeyPair, NetworkId, PublicKey, Signature};
use crate::voteproof::Voteproof;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// A signed envelope of one [`BallotFact`] by one node.
///
/// Carries a double signature: one over the ballot body (fact bytes plus the
/// embedded reference voteproof), one over the fact hash alone so votes can
/// be re-verified inside a voteproof without the whole ballot.
///
/// The embedded voteproof is the proof that justifies casting this ballot:
/// the INIT voteproof of the same round for SIGN/ACCEPT ballots, the previous
/// ACCEPT voteproof for round-0 INIT ballots, and the prior INIT voteproof
/// for INIT ballots of later rounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ballot {
    hash: Hash,
    node: Address,
    signer: PublicKey,
    signature: Signature,
    signed_at: SystemTime,
    body_hash: Hash,
    fact: BallotFact,
    fact_hash: Hash,
    fact_signature: Signature,
    voteproof: Option<Voteproof>,
}

impl Ballot {
    /// Build and sign a ballot over `fact` for `node`.
    pub fn sign(
        fact: BallotFact,
        voteproof: Option<Voteproof>,
        node: Address,
        keypair: &KeyPair,
        network_id: &NetworkId,
    ) -> Result<Self, ValidationError> {
        fact.is_valid()?;

        let fact_hash = fact.hash();
        let fact_signature = keypair.sign(&concat(fact_hash.as_bytes(), network_id.as_bytes()));

        let body_hash = body_hash(&fact, voteproof.as_ref(), network_id);
        let signature = keypair.sign(&concat(body_hash.as_bytes(), network_id.as_bytes()));

        let hash = ballot_hash(&node, &fact, &body_hash, voteproof.as_ref(), network_id);

        Ok(Ballot {
            hash,
            node,
            signer: keypair.public_key(),
            signature,
            signed_at: SystemTime::now(),
            body_hash,
            fact,
            fact_hash,
            fact_signature,
            voteproof,
        })
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn node(&self) -> &Address {
        &self.node
    }

    pub fn signer(&self) -> &PublicKey {
        &self.signer
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn signed_at(&self) -> SystemTime {
        self.signed_at
    }

    pub fn body_hash(&self) -> Hash {
        self.body_hash
    }

    pub fn fact(&self) -> &BallotFact {
        &self.fact
    }

    pub fn fact_hash(&self) -> Hash {
        self.fact_hash
    }

    pub fn fact_signature(&self) -> &Signature {
        &self.fact_signature
    }

    pub fn voteproof(&self) -> Option<&Voteproof> {
        self.voteproof.as_ref()
    }

    pub fn height(&self) -> Height {
        self.fact.height()
    }

    pub fn round(&self) -> Round {
        self.fact.round()
    }

    pub fn stage(&self) -> Stage {
        self.fact.stage()
    }

    /// Whether `signed_at` lies within `timespan` of now, in either
    /// direction.
    pub fn is_signed_within(&self, timespan: Duration) -> bool {
        let now = SystemTime::now();
        let skew = now
            .duration_since(self.signed_at)
            .or_else(|_| self.signed_at.duration_since(now))
            .unwrap_or_default();
        skew <= timespan
    }

    /// Structural and signature validation.
    ///
    /// Re-derives every hash from the fields and verifies both signatures
    /// under the declared signer; checks that the reference voteproof, when
    /// one is required, is finished and relates to this ballot's
    /// coordinates.
    pub fn is_valid(&self, network_id: &NetworkId) -> Result<(), ValidationError> {
        self.fact.is_valid()?;

        if self.fact.hash() != self.fact_hash {
            return Err(ValidationError::invalid_ballot(format!(
                "fact hash mismatch: recorded={} derived={}",
                self.fact_hash,
                self.fact.hash()
            )));
        }

        let derived_body = body_hash(&self.fact, self.voteproof.as_ref(), network_id);
        if derived_body != self.body_hash {
            return Err(ValidationError::invalid_ballot(format!(
                "body hash mismatch: recorded={} derived={}",
                self.body_hash, derived_body
            )));
        }

        let derived_hash = ballot_hash(
            &self.node,
            &self.fact,
            &self.body_hash,
            self.voteproof.as_ref(),
            network_id,
        );
        if derived_hash != self.hash {
            return Err(ValidationError::invalid_ballot(format!(
                "ballot hash mismatch: recorded={} derived={}",
                self.hash, derived_hash
            )));
        }

        if !self.signer.verify(
            &concat(self.body_hash.as_bytes(), network_id.as_bytes()),
            &self.signature,
        ) {
            return Err(ValidationError::signature("ballot body signature"));
        }
        if !self.signer.verify(
            &concat(self.fact_hash.as_bytes(), network_id.as_bytes()),
            &self.fact_signature,
        ) {
            return Err(ValidationError::signature("ballot fact signature"));
        }

        self.check_reference_voteproof()
    }

    fn check_reference_voteproof(&self) -> Result<(), ValidationError> {
        let vp = match &self.voteproof {
            Some(vp) => vp,
            None => {
                return Err(ValidationError::invalid_ballot(
                    "missing reference voteproof".to_string(),
                ))
            }
        };

        if !vp.is_finished() {
            return Err(ValidationError::invalid_ballot(
                "reference voteproof is not finished".to_string(),
            ));
        }

        let height = self.height();
        let round = self.round();
        match self.stage() {
            Stage::Sign | Stage::Accept => {
                if vp.stage() != Stage::Init || vp.height() != height || vp.round() != round {
                    return Err(ValidationError::invalid_ballot(format!(
                        "{} ballot needs the INIT voteproof of ({height}, {round}); got {}-{}-{}",
                        self.stage(),
                        vp.height(),
                        vp.round(),
                        vp.stage()
                    )));
                }
                if vp.result() != VoteResult::Majority {
                    return Err(ValidationError::invalid_ballot(
                        "reference INIT voteproof is not a majority".to_string(),
                    ));
                }
            }
            Stage::Init if round == Round::new(0) => {
                if vp.stage() != Stage::Accept || vp.height() != height.prev() {
                    return Err(ValidationError::invalid_ballot(format!(
                        "round-0 INIT ballot needs the ACCEPT voteproof of height {}; got {}-{}-{}",
                        height.prev(),
                        vp.height(),
                        vp.round(),
                        vp.stage()
                    )));
                }
            }
            Stage::Init => {
                if vp.stage() != Stage::Init || vp.height() != height || vp.round() >= round {
                    return Err(ValidationError::invalid_ballot(format!(
                        "INIT ballot at round {round} needs a prior INIT voteproof of height {height}; got {}-{}-{}",
                        vp.height(),
                        vp.round(),
                        vp.stage()
                    )));
                }
            }
            Stage::Proposal => {
                return Err(ValidationError::invalid_ballot(
                    "proposal is not a ballot stage".to_string(),
                ))
            }
        }
        Ok(())
    }
}

fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    out.extend_from_slice(a);
    out.extend_from_slice(b);
    out
}

/// `hash(fact.bytes ‖ [voteproof.bytes] ‖ networkID)`
fn body_hash(fact: &BallotFact, voteproof: Option<&Voteproof>, network_id: &NetworkId) -> Hash {
    let vp_bytes = voteproof.map(Voteproof::to_bytes).unwrap_or_default();
    Hash::from_slices(&[&fact.to_bytes(), &vp_bytes, network_id.as_bytes()])
}

fn ballot_hash(
    node: &Address,
    fact: &BallotFact,
    body_hash: &Hash,
    voteproof: Option<&Voteproof>,
    network_id: &NetworkId,
) -> Hash {
    let vp_bytes = voteproof.map(Voteproof::to_bytes).unwrap_or_default();
    Hash::from_slices(&[
        node.as_bytes(),
        &fact.to_bytes(),
        body_hash.as_bytes(),
        &vp_bytes,
        network_id.as_bytes(),
    ])
}
