//! The concurrent ballot registry.

use crate::records::VoteRecords;
use crate::BallotboxError;
use dashmap::DashMap;
use isaac_types::{Address, Ballot, Height, Threshold, ValidationError, Voteproof};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::debug;

/// Current suffrage snapshot provider.
pub type SuffragesFn = Arc<dyn Fn() -> Vec<Address> + Send + Sync>;

/// Current quorum provider; `None` means no quorum can be formed right now.
pub type ThresholdFn = Arc<dyn Fn() -> Option<Threshold> + Send + Sync>;

/// Concurrent registry of [`VoteRecords`] keyed by (height, round, stage).
///
/// Also tracks the latest ballot seen, ordered by (height, round); the state
/// handlers use it to decide where the network currently is.
pub struct Ballotbox {
    suffrages: SuffragesFn,
    threshold: ThresholdFn,
    records: DashMap<String, Arc<Mutex<VoteRecords>>>,
    latest: RwLock<Option<Ballot>>,
}

impl Ballotbox {
    pub fn new(suffrages: SuffragesFn, threshold: ThresholdFn) -> Self {
        Ballotbox {
            suffrages,
            threshold,
            records: DashMap::new(),
            latest: RwLock::new(None),
        }
    }

    /// Count one ballot and return the voteproof as of this vote.
    pub fn vote(&self, ballot: Ballot) -> Result<Voteproof, BallotboxError> {
        if !ballot.stage().can_vote() {
            return Err(BallotboxError::InvalidBallot(
                ValidationError::invalid_ballot(format!(
                    "stage {} cannot vote",
                    ballot.stage()
                )),
            ));
        }

        let suffrage = (self.suffrages)();
        if !suffrage.contains(ballot.node()) {
            return Err(BallotboxError::NotInSuffrage {
                node: ballot.node().clone(),
            });
        }

        let threshold = (self.threshold)().ok_or(BallotboxError::ThresholdUnavailable)?;

        self.update_latest(&ballot);

        let key = records_key(&ballot);
        let entry = self
            .records
            .entry(key)
            .or_insert_with(|| {
                Arc::new(Mutex::new(VoteRecords::new(
                    ballot.height(),
                    ballot.round(),
                    ballot.stage(),
                    threshold,
                    suffrage,
                )))
            })
            .clone();
        // The shard lock is released here; only the per-entry mutex is held
        // while the voteproof is recomputed.

        let result = entry.lock().vote(ballot);
        Ok(result)
    }

    /// Drop every tally at or below `height`.
    pub fn clean(&self, height: Height) {
        let before = self.records.len();
        self.records.retain(|_, entry| entry.lock().height() > height);
        let dropped = before.saturating_sub(self.records.len());
        if dropped > 0 {
            debug!(%height, dropped, "cleaned ballotbox");
        }
    }

    /// Drop all state; used on deactivation and in tests.
    pub fn empty(&self) {
        self.records.clear();
        *self.latest.write() = None;
    }

    /// The latest-seen ballot by (height, round).
    pub fn latest_ballot(&self) -> Option<Ballot> {
        self.latest.read().clone()
    }

    /// Number of live tallies.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn update_latest(&self, ballot: &Ballot) {
        let mut latest = self.latest.write();
        let replace = match latest.as_ref() {
            None => true,
            // (height, round) decides; stage breaks ties within a round.
            Some(current) => {
                (ballot.height(), ballot.round(), ballot.stage())
                    > (current.height(), current.round(), current.stage())
            }
        };
        if replace {
            *latest = Some(ballot.clone());
        }
    }
}

fn records_key(ballot: &Ballot) -> String {
    format!(
        "{}-{}-{}",
        ballot.height(),
        ballot.round(),
        ballot.stage().as_u8()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use isaac_types::test_utils::{dummy_voteproof, random_address, test_network_id};
    use isaac_types::{
        AcceptFact, BallotFact, Hash, InitFact, KeyPair, Round, Stage, ThresholdRatio,
        VoteResult,
    };

    fn threshold_fn(total: u64, ratio: f64) -> ThresholdFn {
        let threshold =
            Threshold::new(total, ThresholdRatio::new(ratio).unwrap()).unwrap();
        Arc::new(move || Some(threshold))
    }

    fn suffrages_fn(nodes: &[Address]) -> SuffragesFn {
        let nodes = nodes.to_vec();
        Arc::new(move || nodes.clone())
    }

    fn new_init_ballot(
        height: Height,
        round: Round,
        node: &Address,
        keypair: &KeyPair,
        previous_block: Option<Hash>,
    ) -> Ballot {
        let previous_block =
            previous_block.unwrap_or_else(isaac_types::test_utils::random_hash);
        let reference = dummy_voteproof(
            height.prev(),
            Round::new(0),
            Stage::Accept,
            VoteResult::Majority,
        );
        Ballot::sign(
            BallotFact::Init(InitFact::new(height, round, previous_block)),
            Some(reference),
            node.clone(),
            keypair,
            &test_network_id(),
        )
        .unwrap()
    }

    fn new_accept_ballot(
        height: Height,
        round: Round,
        node: &Address,
        keypair: &KeyPair,
        proposal: Option<Hash>,
        new_block: Option<Hash>,
    ) -> Ballot {
        let proposal = proposal.unwrap_or_else(isaac_types::test_utils::random_hash);
        let new_block = new_block.unwrap_or_else(isaac_types::test_utils::random_hash);
        let reference = dummy_voteproof(height, round, Stage::Init, VoteResult::Majority);
        Ballot::sign(
            BallotFact::Accept(AcceptFact::new(height, round, proposal, new_block)),
            Some(reference),
            node.clone(),
            keypair,
            &test_network_id(),
        )
        .unwrap()
    }

    #[test]
    fn vote_from_member_is_accepted() {
        let node = random_address();
        let bb = Ballotbox::new(suffrages_fn(&[node.clone()]), threshold_fn(2, 67.0));
        let keypair = KeyPair::generate();

        let vp = bb
            .vote(new_init_ballot(Height::new(10), Round::new(0), &node, &keypair, None))
            .unwrap();
        assert_eq!(vp.height(), Height::new(10));
        assert_eq!(vp.round(), Round::new(0));
        assert_eq!(vp.stage(), Stage::Init);
    }

    #[test]
    fn vote_from_outsider_is_rejected() {
        let node = random_address();
        let bb = Ballotbox::new(suffrages_fn(&[node]), threshold_fn(2, 67.0));

        let other = random_address();
        let err = bb
            .vote(new_init_ballot(
                Height::new(10),
                Round::new(0),
                &other,
                &KeyPair::generate(),
                None,
            ))
            .unwrap_err();
        assert!(matches!(err, BallotboxError::NotInSuffrage { .. }));
    }

    #[test]
    fn unavailable_threshold_is_an_error() {
        let node = random_address();
        let bb = Ballotbox::new(suffrages_fn(&[node.clone()]), Arc::new(|| None));

        let err = bb
            .vote(new_init_ballot(
                Height::new(10),
                Round::new(0),
                &node,
                &KeyPair::generate(),
                None,
            ))
            .unwrap_err();
        assert!(matches!(err, BallotboxError::ThresholdUnavailable));
    }

    // Single node, 1-of-1 quorum: one INIT ballot decides immediately.
    #[test]
    fn single_node_majority() {
        let node = random_address();
        let bb = Ballotbox::new(suffrages_fn(&[node.clone()]), threshold_fn(1, 100.0));

        let previous = Hash::from_bytes(b"h0");
        let vp = bb
            .vote(new_init_ballot(
                Height::new(10),
                Round::new(0),
                &node,
                &KeyPair::generate(),
                Some(previous),
            ))
            .unwrap();

        assert_eq!(vp.result(), VoteResult::Majority);
        let majority = vp.majority().unwrap().as_init().unwrap();
        assert_eq!(majority.previous_block, previous);
    }

    // Three nodes at ratio 67: two conflicting facts make the threshold
    // unreachable, so the second vote already ends in a draw.
    #[test]
    fn split_votes_draw_then_close() {
        let nodes = [random_address(), random_address(), random_address()];
        let bb = Ballotbox::new(suffrages_fn(&nodes), threshold_fn(3, 67.0));
        let keypair = KeyPair::generate();

        let vp = bb
            .vote(new_init_ballot(Height::new(10), Round::new(0), &nodes[0], &keypair, None))
            .unwrap();
        assert_eq!(vp.result(), VoteResult::NotYet);

        let vp = bb
            .vote(new_init_ballot(Height::new(10), Round::new(0), &nodes[1], &keypair, None))
            .unwrap();
        assert_eq!(vp.result(), VoteResult::Draw);
        assert!(vp.is_finished());
        assert!(!vp.is_closed());
        assert!(vp.finished_at().is_some());

        // The record is already finished; a third voter observes it closed.
        let vp = bb
            .vote(new_init_ballot(Height::new(10), Round::new(0), &nodes[2], &keypair, None))
            .unwrap();
        assert_eq!(vp.result(), VoteResult::Draw);
        assert!(vp.is_closed());
    }

    // Total 3 at ratio 66 gives threshold 2: two matching votes reach the
    // majority and a third matching vote only observes it closed.
    #[test]
    fn majority_after_two_matching_votes() {
        let nodes = [random_address(), random_address(), random_address()];
        let bb = Ballotbox::new(suffrages_fn(&nodes), threshold_fn(3, 66.0));
        let keypair = KeyPair::generate();

        let previous = Hash::from_bytes(b"shared");
        let vp = bb
            .vote(new_init_ballot(
                Height::new(10),
                Round::new(0),
                &nodes[0],
                &keypair,
                Some(previous),
            ))
            .unwrap();
        assert_eq!(vp.result(), VoteResult::NotYet);
        assert!(!vp.is_closed());

        let vp = bb
            .vote(new_init_ballot(
                Height::new(10),
                Round::new(0),
                &nodes[1],
                &keypair,
                Some(previous),
            ))
            .unwrap();
        assert_eq!(vp.result(), VoteResult::Majority);
        assert!(!vp.is_closed());

        let vp = bb
            .vote(new_init_ballot(
                Height::new(10),
                Round::new(0),
                &nodes[2],
                &keypair,
                Some(previous),
            ))
            .unwrap();
        assert_eq!(vp.result(), VoteResult::Majority);
        assert!(vp.is_closed());
    }

    #[test]
    fn duplicate_vote_is_ignored() {
        let nodes = [random_address(), random_address()];
        let bb = Ballotbox::new(suffrages_fn(&nodes), threshold_fn(2, 100.0));
        let keypair = KeyPair::generate();

        let first = new_init_ballot(Height::new(10), Round::new(0), &nodes[0], &keypair, None);
        let vp = bb.vote(first).unwrap();
        assert_eq!(vp.result(), VoteResult::NotYet);
        assert_eq!(vp.ballots().len(), 1);

        // Same node, different fact: still one recorded ballot.
        let again = new_init_ballot(Height::new(10), Round::new(0), &nodes[0], &keypair, None);
        let vp = bb.vote(again).unwrap();
        assert_eq!(vp.result(), VoteResult::NotYet);
        assert_eq!(vp.ballots().len(), 1);
    }

    #[test]
    fn accept_ballots_reach_majority() {
        let nodes = [random_address(), random_address()];
        let bb = Ballotbox::new(suffrages_fn(&nodes), threshold_fn(3, 66.0));
        let keypair = KeyPair::generate();

        let proposal = Hash::from_bytes(b"proposal");
        let new_block = Hash::from_bytes(b"block");

        let vp = bb
            .vote(new_accept_ballot(
                Height::new(10),
                Round::new(0),
                &nodes[0],
                &keypair,
                Some(proposal),
                Some(new_block),
            ))
            .unwrap();
        assert_eq!(vp.result(), VoteResult::NotYet);

        let vp = bb
            .vote(new_accept_ballot(
                Height::new(10),
                Round::new(0),
                &nodes[1],
                &keypair,
                Some(proposal),
                Some(new_block),
            ))
            .unwrap();
        assert_eq!(vp.result(), VoteResult::Majority);
        let majority = vp.majority().unwrap().as_accept().unwrap();
        assert_eq!(majority.proposal, proposal);
        assert_eq!(majority.new_block, new_block);
    }

    // After a majority at height 10 with a stray vote at height 9,
    // clean(9) leaves exactly the height-10 entry.
    #[test]
    fn clean_drops_lower_heights() {
        let nodes = [random_address(), random_address()];
        let bb = Ballotbox::new(suffrages_fn(&nodes), threshold_fn(3, 66.0));
        let keypair = KeyPair::generate();

        let previous = Hash::from_bytes(b"shared");
        bb.vote(new_init_ballot(
            Height::new(10),
            Round::new(0),
            &nodes[0],
            &keypair,
            Some(previous),
        ))
        .unwrap();
        bb.vote(new_init_ballot(Height::new(9), Round::new(0), &nodes[0], &keypair, None))
            .unwrap();
        let vp = bb
            .vote(new_init_ballot(
                Height::new(10),
                Round::new(0),
                &nodes[1],
                &keypair,
                Some(previous),
            ))
            .unwrap();
        assert_eq!(vp.result(), VoteResult::Majority);
        assert_eq!(bb.len(), 2);

        bb.clean(Height::new(9));
        assert_eq!(bb.len(), 1);

        // The surviving record is the height-10 one.
        bb.clean(Height::new(10));
        assert_eq!(bb.len(), 0);
    }

    #[test]
    fn empty_drops_everything() {
        let nodes = [random_address()];
        let bb = Ballotbox::new(suffrages_fn(&nodes), threshold_fn(3, 66.0));
        let keypair = KeyPair::generate();

        bb.vote(new_init_ballot(Height::new(10), Round::new(0), &nodes[0], &keypair, None))
            .unwrap();
        assert!(!bb.is_empty());
        assert!(bb.latest_ballot().is_some());

        bb.empty();
        assert!(bb.is_empty());
        assert!(bb.latest_ballot().is_none());
    }

    // (10,0), (10,1), (11,0), then (10,1) again: the peak stays at (11,0).
    #[test]
    fn latest_ballot_tracks_the_peak() {
        let node = random_address();
        let bb = Ballotbox::new(suffrages_fn(&[node.clone()]), threshold_fn(3, 66.0));
        let keypair = KeyPair::generate();

        let reference_draw = |round: u64| {
            dummy_voteproof(Height::new(10), Round::new(round), Stage::Init, VoteResult::Draw)
        };

        let ba0 = new_init_ballot(Height::new(10), Round::new(0), &node, &keypair, None);
        let ba1 = Ballot::sign(
            BallotFact::Init(InitFact::new(
                Height::new(10),
                Round::new(1),
                isaac_types::test_utils::random_hash(),
            )),
            Some(reference_draw(0)),
            node.clone(),
            &keypair,
            &test_network_id(),
        )
        .unwrap();
        let ba2 = new_init_ballot(Height::new(11), Round::new(0), &node, &keypair, None);
        let ba3 = Ballot::sign(
            BallotFact::Init(InitFact::new(
                Height::new(10),
                Round::new(1),
                isaac_types::test_utils::random_hash(),
            )),
            Some(reference_draw(0)),
            node.clone(),
            &keypair,
            &test_network_id(),
        )
        .unwrap();

        bb.vote(ba0.clone()).unwrap();
        assert_eq!(bb.latest_ballot().unwrap().hash(), ba0.hash());

        bb.vote(ba1.clone()).unwrap();
        assert_eq!(bb.latest_ballot().unwrap().hash(), ba1.hash());

        bb.vote(ba2.clone()).unwrap();
        assert_eq!(bb.latest_ballot().unwrap().hash(), ba2.hash());

        bb.vote(ba3).unwrap();
        assert_eq!(bb.latest_ballot().unwrap().hash(), ba2.hash());
    }

    // 49 concurrent duplicate votes from one node out of 50: every returned
    // proof stays NotYet and exactly one ballot is recorded.
    #[test]
    fn concurrent_duplicate_votes_stay_not_yet() {
        let node = random_address();
        let bb = Arc::new(Ballotbox::new(
            suffrages_fn(&[node.clone()]),
            threshold_fn(50, 100.0),
        ));
        let keypair = Arc::new(KeyPair::generate());

        let handles: Vec<_> = (0..49)
            .map(|_| {
                let bb = Arc::clone(&bb);
                let node = node.clone();
                let keypair = Arc::clone(&keypair);
                std::thread::spawn(move || {
                    let ballot =
                        new_init_ballot(Height::new(10), Round::new(0), &node, &keypair, None);
                    bb.vote(ballot).map(|vp| vp.result())
                })
            })
            .collect();

        for handle in handles {
            let result = handle.join().unwrap().unwrap();
            assert_eq!(result, VoteResult::NotYet);
        }
        assert_eq!(bb.len(), 1);
    }
}
