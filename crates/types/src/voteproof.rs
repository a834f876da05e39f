//! Voteproof: the aggregated result of voting at one (height, round, stage).

use crate::address::Address;
use crate::chain::{Height, Round, Stage, VoteResult};
use crate::error::ValidationError;
use crate::fact::BallotFact;
use crate::hash::Hash;
use crate::keys::{NetworkId, PublicKey, Signature};
use crate::threshold::{find_majority, Majority, Threshold};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// One node's contribution recorded inside a voteproof.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteproofNodeFact {
    /// Hash of the ballot that carried the vote.
    pub ballot: Hash,
    /// Hash of the fact voted for.
    pub fact: Hash,
    /// The voter's signature over `factHash ‖ networkID`.
    pub fact_signature: Signature,
    /// The voter's public key.
    pub signer: PublicKey,
}

impl VoteproofNodeFact {
    pub fn is_valid(&self, network_id: &NetworkId) -> Result<(), ValidationError> {
        let mut message = Vec::with_capacity(Hash::SIZE + network_id.as_bytes().len());
        message.extend_from_slice(self.fact.as_bytes());
        message.extend_from_slice(network_id.as_bytes());

        if !self.signer.verify(&message, &self.fact_signature) {
            return Err(ValidationError::signature(format!(
                "vote fact signature does not verify for fact {}",
                self.fact
            )));
        }
        Ok(())
    }
}

/// Proof of a finished (or still-open) vote at one (height, round, stage).
///
/// Produced by the ballotbox on every admitted vote; immutable once returned
/// except for the `closed` marker, which flips for observers that arrive
/// after the finishing vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voteproof {
    height: Height,
    round: Round,
    stage: Stage,
    threshold: Threshold,
    result: VoteResult,
    closed: bool,
    majority: Option<BallotFact>,
    /// Distinct facts in tally insertion order; the order is the majority
    /// tie-break, so it is part of the value.
    facts: Vec<(Hash, BallotFact)>,
    /// Ballot hash per voting node.
    ballots: BTreeMap<Address, Hash>,
    /// Recorded vote per node.
    votes: BTreeMap<Address, VoteproofNodeFact>,
    finished_at: Option<SystemTime>,
}

impl Voteproof {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        height: Height,
        round: Round,
        stage: Stage,
        threshold: Threshold,
        result: VoteResult,
        majority: Option<BallotFact>,
        facts: Vec<(Hash, BallotFact)>,
        ballots: BTreeMap<Address, Hash>,
        votes: BTreeMap<Address, VoteproofNodeFact>,
        finished_at: Option<SystemTime>,
    ) -> Self {
        Voteproof {
            height,
            round,
            stage,
            threshold,
            result,
            closed: false,
            majority,
            facts,
            ballots,
            votes,
            finished_at,
        }
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn round(&self) -> Round {
        self.round
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    pub fn result(&self) -> VoteResult {
        self.result
    }

    pub fn is_finished(&self) -> bool {
        self.result.is_finished()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Mark this proof as observed after the finishing vote.
    pub fn set_closed(&mut self) {
        self.closed = true;
    }

    pub fn majority(&self) -> Option<&BallotFact> {
        self.majority.as_ref()
    }

    pub fn facts(&self) -> &[(Hash, BallotFact)] {
        &self.facts
    }

    pub fn ballots(&self) -> &BTreeMap<Address, Hash> {
        &self.ballots
    }

    pub fn votes(&self) -> &BTreeMap<Address, VoteproofNodeFact> {
        &self.votes
    }

    pub fn finished_at(&self) -> Option<SystemTime> {
        self.finished_at
    }

    /// Stable byte representation, folded into ballot body hashes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.height.to_be_bytes());
        out.extend_from_slice(&self.round.to_be_bytes());
        out.push(self.stage.as_u8());
        out.extend_from_slice(&self.threshold.to_bytes());
        out.push(match self.result {
            VoteResult::NotYet => 0,
            VoteResult::Majority => 1,
            VoteResult::Draw => 2,
        });
        match &self.majority {
            Some(fact) => out.extend_from_slice(fact.hash().as_bytes()),
            None => out.extend_from_slice(Hash::ZERO.as_bytes()),
        }
        for (hash, _) in &self.facts {
            out.extend_from_slice(hash.as_bytes());
        }
        for (node, ballot) in &self.ballots {
            out.extend_from_slice(node.as_bytes());
            out.extend_from_slice(ballot.as_bytes());
        }
        if let Some(at) = self.finished_at {
            let since = at.duration_since(UNIX_EPOCH).unwrap_or_default();
            out.extend_from_slice(&since.as_secs().to_be_bytes());
            out.extend_from_slice(&since.subsec_nanos().to_be_bytes());
        }
        out
    }

    /// Re-check every §invariant of a finished voteproof, including the
    /// majority recomputation against the threshold rules.
    pub fn is_valid(&self, network_id: &NetworkId) -> Result<(), ValidationError> {
        self.check_fields()?;
        self.check_facts(network_id)?;
        self.check_majority()
    }

    fn check_fields(&self) -> Result<(), ValidationError> {
        self.threshold.is_valid()?;
        self.height.is_valid()?;

        if !self.result.is_finished() {
            return Err(ValidationError::invalid_voteproof(
                "result must be majority or draw".to_string(),
            ));
        }
        if self.finished_at.is_none() {
            return Err(ValidationError::invalid_voteproof("empty finished_at"));
        }

        match (&self.majority, self.result) {
            (None, VoteResult::Draw) => {}
            (None, result) => {
                return Err(ValidationError::invalid_voteproof(format!(
                    "empty majority but result is {result}"
                )))
            }
            (Some(fact), _) => fact.is_valid()?,
        }

        if self.facts.is_empty() {
            return Err(ValidationError::invalid_voteproof("empty facts"));
        }
        if self.ballots.is_empty() {
            return Err(ValidationError::invalid_voteproof("empty ballots"));
        }
        if self.ballots.len() != self.votes.len() {
            return Err(ValidationError::invalid_voteproof(format!(
                "ballot count does not match votes: ballots={} votes={}",
                self.ballots.len(),
                self.votes.len()
            )));
        }
        for node in self.ballots.keys() {
            if !self.votes.contains_key(node) {
                return Err(ValidationError::invalid_voteproof(format!(
                    "ballot from {node} has no matching vote"
                )));
            }
        }
        Ok(())
    }

    fn check_facts(&self, network_id: &NetworkId) -> Result<(), ValidationError> {
        for (hash, fact) in &self.facts {
            if fact.hash() != *hash {
                return Err(ValidationError::invalid_voteproof(format!(
                    "fact key {} does not match fact hash {}",
                    hash,
                    fact.hash()
                )));
            }
            if fact.height() != self.height
                || fact.round() != self.round
                || fact.stage() != self.stage
            {
                return Err(ValidationError::invalid_voteproof(format!(
                    "fact {} does not belong to {}-{}-{}",
                    hash, self.height, self.round, self.stage
                )));
            }
        }

        let mut seen = 0usize;
        for (node, vote) in &self.votes {
            vote.is_valid(network_id)?;
            if !self.facts.iter().any(|(h, _)| h == &vote.fact) {
                return Err(ValidationError::invalid_voteproof(format!(
                    "vote from {node} references unknown fact {}",
                    vote.fact
                )));
            }
            seen += 1;
        }
        debug_assert_eq!(seen, self.votes.len());
        Ok(())
    }

    fn check_majority(&self) -> Result<(), ValidationError> {
        let counts: Vec<u64> = self
            .facts
            .iter()
            .map(|(hash, _)| {
                self.votes.values().filter(|v| &v.fact == hash).count() as u64
            })
            .collect();

        let expected = match find_majority(self.threshold.total, self.threshold.threshold, &counts)
        {
            Majority::NotYet => VoteResult::NotYet,
            Majority::Draw => VoteResult::Draw,
            Majority::Found(index) => {
                let (hash, _) = &self.facts[index];
                match &self.majority {
                    Some(fact) if &fact.hash() == hash => {}
                    Some(fact) => {
                        return Err(ValidationError::invalid_voteproof(format!(
                            "majority fact mismatch: recorded={} computed={}",
                            fact.hash(),
                            hash
                        )))
                    }
                    None => {
                        return Err(ValidationError::invalid_voteproof(
                            "majority reached but fact is empty".to_string(),
                        ))
                    }
                }
                VoteResult::Majority
            }
        };

        if expected != self.result {
            return Err(ValidationError::invalid_voteproof(format!(
                "result mismatch: recorded={} computed={}",
                self.result, expected
            )));
        }
        if expected == VoteResult::Draw && self.majority.is_some() {
            return Err(ValidationError::invalid_voteproof(
                "draw must not carry a majority fact".to_string(),
            ));
        }
        Ok(())
    }

    /// Unvalidated voteproof carrying only coordinates; test scaffolding.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn new_dummy(height: Height, round: Round, stage: Stage, result: VoteResult) -> Self {
        use crate::threshold::ThresholdRatio;

        Voteproof {
            height,
            round,
            stage,
            threshold: Threshold::new(1, ThresholdRatio::new(100.0).expect("valid ratio"))
                .expect("valid threshold"),
            result,
            closed: false,
            majority: None,
            facts: Vec::new(),
            ballots: BTreeMap::new(),
            votes: BTreeMap::new(),
            finished_at: result.is_finished().then(SystemTime::now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::InitFact;
    use crate::keys::KeyPair;
    use crate::threshold::ThresholdRatio;

    fn threshold(total: u64, ratio: f64) -> Threshold {
        Threshold::new(total, ThresholdRatio::new(ratio).unwrap()).unwrap()
    }

    fn vote_for(
        fact: &BallotFact,
        keypair: &KeyPair,
        network_id: &NetworkId,
    ) -> VoteproofNodeFact {
        let fact_hash = fact.hash();
        let mut message = fact_hash.as_bytes().to_vec();
        message.extend_from_slice(network_id.as_bytes());
        VoteproofNodeFact {
            ballot: Hash::from_bytes(b"ballot"),
            fact: fact_hash,
            fact_signature: keypair.sign(&message),
            signer: keypair.public_key(),
        }
    }

    fn majority_voteproof(network_id: &NetworkId) -> Voteproof {
        let fact = BallotFact::Init(InitFact::new(
            Height::new(10),
            Round::new(0),
            Hash::from_bytes(b"prev"),
        ));

        let a = Address::new("a").unwrap();
        let b = Address::new("b").unwrap();
        let kp_a = KeyPair::generate();
        let kp_b = KeyPair::generate();

        let mut ballots = BTreeMap::new();
        ballots.insert(a.clone(), Hash::from_bytes(b"ballot-a"));
        ballots.insert(b.clone(), Hash::from_bytes(b"ballot-b"));

        let mut votes = BTreeMap::new();
        votes.insert(a, vote_for(&fact, &kp_a, network_id));
        votes.insert(b, vote_for(&fact, &kp_b, network_id));

        Voteproof::new(
            Height::new(10),
            Round::new(0),
            Stage::Init,
            threshold(3, 66.0),
            VoteResult::Majority,
            Some(fact.clone()),
            vec![(fact.hash(), fact)],
            ballots,
            votes,
            Some(SystemTime::now()),
        )
    }

    #[test]
    fn valid_majority_voteproof_passes() {
        let network_id = NetworkId::new(b"test".to_vec());
        let vp = majority_voteproof(&network_id);
        assert!(vp.is_valid(&network_id).is_ok());
    }

    #[test]
    fn result_mismatch_is_rejected() {
        let network_id = NetworkId::new(b"test".to_vec());
        let mut vp = majority_voteproof(&network_id);
        vp.result = VoteResult::Draw;
        // A draw carrying a majority fact is inconsistent on its face.
        assert!(vp.is_valid(&network_id).is_err());
    }

    #[test]
    fn missing_vote_for_ballot_is_rejected() {
        let network_id = NetworkId::new(b"test".to_vec());
        let mut vp = majority_voteproof(&network_id);
        let extra = Address::new("c").unwrap();
        vp.ballots.insert(extra, Hash::from_bytes(b"ballot-c"));
        assert!(vp.is_valid(&network_id).is_err());
    }

    #[test]
    fn closed_flag_is_the_only_mutation() {
        let network_id = NetworkId::new(b"test".to_vec());
        let mut vp = majority_voteproof(&network_id);
        assert!(!vp.is_closed());
        vp.set_closed();
        assert!(vp.is_closed());
        assert!(vp.is_valid(&network_id).is_ok());
    }

    #[test]
    fn bytes_are_stable() {
        let network_id = NetworkId::new(b"test".to_vec());
        let vp = majority_voteproof(&network_id);
        assert_eq!(vp.to_bytes(), vp.clone().to_bytes());
        assert!(!vp.to_bytes().is_empty());
    }
}
