//! Per-(height, round, stage) tally.

use isaac_types::{
    find_majority, Address, Ballot, BallotFact, Hash, Height, Majority, Round, Stage, Threshold,
    VoteResult, Voteproof, VoteproofNodeFact,
};
use std::collections::BTreeMap;
use std::time::SystemTime;
use tracing::trace;

/// In-memory vote tally for one (height, round, stage).
///
/// Enforces at-most-one ballot per node and recomputes the cached voteproof
/// on every admitted vote. Once the voteproof finishes, the tally freezes:
/// later votes only flip the `closed` marker on the returned proof.
#[derive(Debug)]
pub struct VoteRecords {
    height: Height,
    round: Round,
    stage: Stage,
    threshold: Threshold,
    /// Suffrage snapshot taken when the first ballot for this key arrived.
    suffrage: Vec<Address>,
    /// One ballot per node.
    ballots: BTreeMap<Address, Ballot>,
    /// Distinct facts in arrival order; this order is the majority
    /// tie-break.
    facts: Vec<(Hash, BallotFact)>,
    votes: BTreeMap<Address, VoteproofNodeFact>,
    voteproof: Voteproof,
    finished: bool,
}

impl VoteRecords {
    pub fn new(
        height: Height,
        round: Round,
        stage: Stage,
        threshold: Threshold,
        suffrage: Vec<Address>,
    ) -> Self {
        let voteproof = Voteproof::new(
            height,
            round,
            stage,
            threshold,
            VoteResult::NotYet,
            None,
            Vec::new(),
            BTreeMap::new(),
            BTreeMap::new(),
            None,
        );

        VoteRecords {
            height,
            round,
            stage,
            threshold,
            suffrage,
            ballots: BTreeMap::new(),
            facts: Vec::new(),
            votes: BTreeMap::new(),
            voteproof,
            finished: false,
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

    /// Whether `node` may vote under the snapshot this tally was opened
    /// with.
    pub fn is_in_suffrage(&self, node: &Address) -> bool {
        self.suffrage.contains(node)
    }

    /// The recorded ballot of `node`, if any.
    pub fn ballot(&self, node: &Address) -> Option<&Ballot> {
        self.ballots.get(node)
    }

    /// Count `ballot` and return the voteproof as of this vote.
    ///
    /// Duplicate votes from a node are ignored silently and observe the
    /// current proof. The first vote that finishes the proof sees
    /// `closed == false`; every vote arriving after that sees
    /// `closed == true`.
    pub fn vote(&mut self, ballot: Ballot) -> Voteproof {
        if self.finished {
            let mut observed = self.voteproof.clone();
            observed.set_closed();
            return observed;
        }

        let node = ballot.node().clone();
        if self.ballots.contains_key(&node) {
            trace!(%node, height = %self.height, round = %self.round, stage = %self.stage,
                "duplicate vote ignored");
            return self.voteproof.clone();
        }

        let fact_hash = ballot.fact_hash();
        if !self.facts.iter().any(|(h, _)| h == &fact_hash) {
            self.facts.push((fact_hash, ballot.fact().clone()));
        }

        self.votes.insert(
            node.clone(),
            VoteproofNodeFact {
                ballot: ballot.hash(),
                fact: fact_hash,
                fact_signature: *ballot.fact_signature(),
                signer: *ballot.signer(),
            },
        );
        self.ballots.insert(node, ballot);

        self.recompute();
        self.voteproof.clone()
    }

    fn recompute(&mut self) {
        let counts: Vec<u64> = self
            .facts
            .iter()
            .map(|(hash, _)| self.votes.values().filter(|v| &v.fact == hash).count() as u64)
            .collect();

        let (result, majority) =
            match find_majority(self.threshold.total, self.threshold.threshold, &counts) {
                Majority::NotYet => (VoteResult::NotYet, None),
                Majority::Draw => (VoteResult::Draw, None),
                Majority::Found(index) => {
                    (VoteResult::Majority, Some(self.facts[index].1.clone()))
                }
            };

        let finished = result.is_finished();
        let ballot_hashes: BTreeMap<Address, Hash> = self
            .ballots
            .iter()
            .map(|(node, ballot)| (node.clone(), ballot.hash()))
            .collect();

        self.voteproof = Voteproof::new(
            self.height,
            self.round,
            self.stage,
            self.threshold,
            result,
            majority,
            self.facts.clone(),
            ballot_hashes,
            self.votes.clone(),
            finished.then(SystemTime::now),
        );
        self.finished = finished;
    }
}
