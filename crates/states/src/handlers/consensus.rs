//! The Consensus state: the per-round driver.

use super::{BaseHandler, StateHandler};
use crate::context::{State, StateChangeContext};
use crate::error::StatesError;
use crate::localstate::LocalState;
use crate::proposal::{ProposalMaker, ProposalProcessor};
use crate::timers::{TimerId, TimerManager};
use async_trait::async_trait;
use isaac_storage::{BlockData, Database};
use isaac_types::{
    AcceptFact, Ballot, BallotFact, Block, Proposal, Round, Seal, SignFact, Stage, Suffrage,
    VoteResult, Voteproof,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything scoped to the round currently being driven.
#[derive(Default)]
struct RoundState {
    /// The INIT voteproof that opened this round.
    init_voteproof: Option<Voteproof>,
    /// Cancel token of the in-flight proposal processing.
    processing: Option<CancellationToken>,
    /// The block processed from this round's proposal.
    processed: Option<Block>,
    /// Ballots kept for re-broadcast.
    init_ballot: Option<Ballot>,
    accept_ballot: Option<Ballot>,
}

impl RoundState {
    fn cancel_processing(&mut self) {
        if let Some(token) = self.processing.take() {
            token.cancel();
        }
    }
}

/// Drives proposal, SIGN/ACCEPT voting and round advance for one height at
/// a time.
///
/// Activated with the INIT majority voteproof that opened the height; every
/// later round and the jump to the next height go through
/// [`StateHandler::new_voteproof`].
pub struct ConsensusHandler {
    inner: Arc<ConsensusInner>,
}

struct ConsensusInner {
    base: BaseHandler,
    processor: Arc<dyn ProposalProcessor>,
    proposal_maker: ProposalMaker,
    timers: TimerManager,
    round: Mutex<RoundState>,
}

impl ConsensusHandler {
    pub fn new(
        local: Arc<LocalState>,
        suffrage: Arc<dyn Suffrage>,
        processor: Arc<dyn ProposalProcessor>,
    ) -> Self {
        let proposal_maker = ProposalMaker::new(local.clone());
        ConsensusHandler {
            inner: Arc::new(ConsensusInner {
                base: BaseHandler::new(State::Consensus, local, suffrage),
                processor,
                proposal_maker,
                timers: TimerManager::new(),
                round: Mutex::new(RoundState::default()),
            }),
        }
    }
}

impl ConsensusInner {
    /// Open the round the INIT majority `voteproof` decided.
    fn enter_round(this: &Arc<Self>, voteproof: Voteproof) {
        let height = voteproof.height();
        let round = voteproof.round();
        info!(%height, %round, "entering round");

        this.timers.cancel_all();
        {
            let mut state = this.round.lock();
            state.cancel_processing();
            *state = RoundState {
                init_voteproof: Some(voteproof),
                ..RoundState::default()
            };
        }

        let local_address = this.base.local.node().address().clone();
        if this.base.suffrage.is_proposer(height, round, &local_address) {
            match this.proposal_maker.proposal(height, round) {
                Ok(proposal) => {
                    debug!(%height, %round, proposal = %proposal.hash(),
                        "local node is the proposer");
                    this.base.broadcast_seal(proposal.into());
                    Self::start_proposal_rebroadcast(this, height, round);
                }
                Err(err) => error!(%height, %round, %err, "failed to build proposal"),
            }
        }

        // Without a Proposal in time the round moves on.
        let timeout = this.base.local.policy().timeout_waiting_proposal;
        let inner = Arc::clone(this);
        this.timers
            .set_timeout(TimerId::WaitingProposal, timeout, move || async move {
                if !inner.base.is_active() {
                    return;
                }
                debug!("proposal timed out; advancing round");
                let reference = inner.round.lock().init_voteproof.clone();
                if let Some(reference) = reference {
                    Self::advance_round(&inner, reference);
                }
            });
    }

    fn start_proposal_rebroadcast(this: &Arc<Self>, height: isaac_types::Height, round: Round) {
        let interval = this.base.local.policy().interval_broadcasting_proposal;
        let inner = Arc::clone(this);
        this.timers
            .set_interval(TimerId::BroadcastingProposal, interval, move || {
                let inner = Arc::clone(&inner);
                async move {
                    if !inner.base.is_active() {
                        return;
                    }
                    if let Ok(proposal) = inner.proposal_maker.proposal(height, round) {
                        inner.base.broadcast_seal(proposal.into());
                    }
                }
            });
    }

    /// Broadcast the INIT ballot for the round after `reference`'s round
    /// and keep re-broadcasting it until the next voteproof arrives.
    fn advance_round(this: &Arc<Self>, reference: Voteproof) {
        let next = reference.round().succ();
        let ballot = match this.base.build_init_ballot(next, reference) {
            Ok(ballot) => ballot,
            Err(err) => {
                error!(%err, "failed to build round-advance INIT ballot");
                return;
            }
        };

        info!(height = %ballot.height(), round = %next, "advancing to next round");
        this.timers.cancel(TimerId::WaitingProposal);
        this.timers.cancel(TimerId::BroadcastingAcceptBallot);
        {
            let mut state = this.round.lock();
            state.cancel_processing();
            state.processed = None;
            state.init_ballot = Some(ballot.clone());
            state.accept_ballot = None;
        }
        this.base.broadcast_seal(ballot.into());
        Self::start_init_rebroadcast(this);
    }

    fn start_init_rebroadcast(this: &Arc<Self>) {
        let interval = this.base.local.policy().interval_broadcasting_init_ballot;
        let inner = Arc::clone(this);
        this.timers
            .set_interval(TimerId::BroadcastingInitBallot, interval, move || {
                let inner = Arc::clone(&inner);
                async move {
                    if !inner.base.is_active() {
                        return;
                    }
                    let ballot = inner.round.lock().init_ballot.clone();
                    if let Some(ballot) = ballot {
                        inner.base.broadcast_seal(ballot.into());
                    }
                }
            });
    }

    /// A validated Proposal for the current round: hand it to the
    /// processor, then vote on the result.
    fn process_proposal(this: &Arc<Self>, proposal: Proposal) {
        let init_voteproof = {
            let state = this.round.lock();
            match &state.init_voteproof {
                Some(vp)
                    if vp.height() == proposal.height() && vp.round() == proposal.round() =>
                {
                    vp.clone()
                }
                _ => {
                    debug!(height = %proposal.height(), round = %proposal.round(),
                        "proposal does not belong to the current round");
                    return;
                }
            }
        };

        let cancel = CancellationToken::new();
        {
            let mut state = this.round.lock();
            if state.processed.is_some() || state.processing.is_some() {
                debug!(proposal = %proposal.hash(), "round already has a proposal in work");
                return;
            }
            state.processing = Some(cancel.clone());
        }

        this.timers.cancel(TimerId::WaitingProposal);

        let inner = Arc::clone(this);
        let timeout = this.base.local.policy().timeout_process_proposal;
        tokio::spawn(async move {
            let processed = tokio::time::timeout(
                timeout,
                inner
                    .processor
                    .process_init(proposal, init_voteproof, cancel),
            )
            .await;

            if !inner.base.is_active() {
                return;
            }

            match processed {
                Ok(Ok(block)) => Self::on_block_processed(&inner, block),
                Ok(Err(StatesError::Cancelled)) => {
                    debug!("proposal processing cancelled")
                }
                Ok(Err(StatesError::StateToBeChange { to, voteproof })) => {
                    inner
                        .base
                        .request_state_change(to, voteproof.map(|vp| *vp));
                }
                Ok(Err(err)) => error!(%err, "proposal processing failed"),
                Err(_) => {
                    warn!("proposal processing exceeded its deadline");
                    inner.round.lock().cancel_processing();
                }
            }
        });
    }

    /// The block is ready; after the configured wait, acting nodes vote.
    fn on_block_processed(this: &Arc<Self>, block: Block) {
        debug!(height = %block.height(), block = %block.hash(), "block processed");
        {
            let mut state = this.round.lock();
            state.processing = None;
            state.processed = Some(block.clone());
        }

        let wait = this.base.local.policy().wait_broadcasting_accept_ballot;
        let inner = Arc::clone(this);
        this.timers
            .set_timeout(TimerId::WaitingAcceptBallot, wait, move || async move {
                if !inner.base.is_active() {
                    return;
                }
                Self::broadcast_block_ballots(&inner, block);
            });
    }

    /// Emit SIGN (for non-proposer acting nodes) and ACCEPT ballots over
    /// the processed block.
    fn broadcast_block_ballots(this: &Arc<Self>, block: Block) {
        let init_voteproof = match this.round.lock().init_voteproof.clone() {
            Some(vp) => vp,
            None => return,
        };
        let height = block.height();
        let round = block.round();
        let local_address = this.base.local.node().address().clone();

        let acting = this.base.suffrage.acting(height, round);
        if !acting.contains(&local_address) {
            debug!(%height, %round, "not in the acting set; no block ballots");
            return;
        }

        if acting.proposer != local_address {
            let sign_fact = BallotFact::Sign(SignFact::new(
                height,
                round,
                block.proposal(),
                block.hash(),
            ));
            match Ballot::sign(
                sign_fact,
                Some(init_voteproof.clone()),
                local_address.clone(),
                this.base.local.node().keypair(),
                this.base.local.network_id(),
            ) {
                Ok(ballot) => this.base.broadcast_seal(ballot.into()),
                Err(err) => error!(%err, "failed to sign SIGN ballot"),
            }
        }

        let accept_fact = BallotFact::Accept(AcceptFact::new(
            height,
            round,
            block.proposal(),
            block.hash(),
        ));
        let ballot = match Ballot::sign(
            accept_fact,
            Some(init_voteproof),
            local_address,
            this.base.local.node().keypair(),
            this.base.local.network_id(),
        ) {
            Ok(ballot) => ballot,
            Err(err) => {
                error!(%err, "failed to sign ACCEPT ballot");
                return;
            }
        };

        debug!(%height, %round, new_block = %block.hash(), "broadcasting ACCEPT ballot");
        this.round.lock().accept_ballot = Some(ballot.clone());
        this.base.broadcast_seal(ballot.into());
        Self::start_accept_rebroadcast(this);
    }

    fn start_accept_rebroadcast(this: &Arc<Self>) {
        let interval = this.base.local.policy().interval_broadcasting_accept_ballot;
        let inner = Arc::clone(this);
        this.timers
            .set_interval(TimerId::BroadcastingAcceptBallot, interval, move || {
                let inner = Arc::clone(&inner);
                async move {
                    if !inner.base.is_active() {
                        return;
                    }
                    let ballot = inner.round.lock().accept_ballot.clone();
                    if let Some(ballot) = ballot {
                        inner.base.broadcast_seal(ballot.into());
                    }
                }
            });
    }

    /// An ACCEPT majority: commit our processed block when it matches, or
    /// fall back to syncing when it does not.
    fn on_accept_majority(this: &Arc<Self>, voteproof: Voteproof) -> Result<(), StatesError> {
        let fact = voteproof
            .majority()
            .and_then(|f| f.as_accept())
            .cloned()
            .ok_or_else(|| StatesError::fatal("ACCEPT majority without an ACCEPT fact"))?;

        let (processed, init_voteproof) = {
            let state = this.round.lock();
            (state.processed.clone(), state.init_voteproof.clone())
        };

        let block = match processed {
            Some(block) if block.hash() == fact.new_block => block,
            Some(block) => {
                warn!(processed = %block.hash(), decided = %fact.new_block,
                    "network decided a different block; syncing");
                this.base
                    .request_state_change(State::Syncing, Some(voteproof));
                return Ok(());
            }
            None => {
                warn!(decided = %fact.new_block, "no processed block to compare; syncing");
                this.base
                    .request_state_change(State::Syncing, Some(voteproof));
                return Ok(());
            }
        };

        let init_voteproof = init_voteproof
            .ok_or_else(|| StatesError::fatal("ACCEPT majority without a round INIT voteproof"))?;

        this.base
            .local
            .database()
            .commit_block(block.clone(), init_voteproof, voteproof.clone())?;
        this.base.local.blockdata().save(&block)?;
        info!(height = %block.height(), block = %block.hash(), "new block committed");

        // Move straight into the next height's round 0.
        this.timers.cancel_all();
        let ballot = this.base.build_init_ballot(Round::new(0), voteproof)?;
        {
            let mut state = this.round.lock();
            state.cancel_processing();
            *state = RoundState {
                init_ballot: Some(ballot.clone()),
                ..RoundState::default()
            };
        }
        this.base.broadcast_seal(ballot.into());
        Self::start_init_rebroadcast(this);
        Ok(())
    }
}

#[async_trait]
impl StateHandler for ConsensusHandler {
    fn state(&self) -> State {
        State::Consensus
    }

    async fn activate(&self, ctx: StateChangeContext) -> Result<(), StatesError> {
        self.inner.base.set_active(true);

        let voteproof = ctx.voteproof.ok_or_else(|| {
            StatesError::fatal("consensus state requires an INIT voteproof to activate")
        })?;
        if voteproof.stage() != Stage::Init || voteproof.result() != VoteResult::Majority {
            return Err(StatesError::fatal(format!(
                "consensus state activated with {}-{} voteproof",
                voteproof.stage(),
                voteproof.result()
            )));
        }

        ConsensusInner::enter_round(&self.inner, voteproof);
        Ok(())
    }

    async fn deactivate(&self, _ctx: StateChangeContext) -> Result<(), StatesError> {
        self.inner.base.set_active(false);
        self.inner.timers.cancel_all();
        let mut state = self.inner.round.lock();
        state.cancel_processing();
        *state = RoundState::default();
        Ok(())
    }

    async fn new_seal(&self, seal: Seal) -> Result<(), StatesError> {
        if let Seal::Proposal(proposal) = seal {
            ConsensusInner::process_proposal(&self.inner, proposal);
        }
        Ok(())
    }

    async fn new_voteproof(&self, voteproof: Voteproof) -> Result<(), StatesError> {
        match (voteproof.stage(), voteproof.result()) {
            (Stage::Init, VoteResult::Majority) => {
                ConsensusInner::enter_round(&self.inner, voteproof);
                Ok(())
            }
            (Stage::Init, VoteResult::Draw) => {
                debug!(height = %voteproof.height(), round = %voteproof.round(),
                    "INIT draw; advancing round");
                ConsensusInner::advance_round(&self.inner, voteproof);
                Ok(())
            }
            (Stage::Accept, VoteResult::Majority) => {
                ConsensusInner::on_accept_majority(&self.inner, voteproof)
            }
            (Stage::Accept, VoteResult::Draw) => {
                debug!(height = %voteproof.height(), round = %voteproof.round(),
                    "ACCEPT draw; advancing round");
                let reference = self.inner.round.lock().init_voteproof.clone();
                if let Some(reference) = reference {
                    ConsensusInner::advance_round(&self.inner, reference);
                }
                Ok(())
            }
            (stage, result) => {
                debug!(%stage, %result, "voteproof not handled by consensus");
                Ok(())
            }
        }
    }

    fn set_state_chan(&self, tx: UnboundedSender<StateChangeContext>) {
        self.inner.base.set_state_chan(tx);
    }

    fn set_seal_chan(&self, tx: UnboundedSender<Seal>) {
        self.inner.base.set_seal_chan(tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::DefaultProposalProcessor;
    use isaac_network::NodePool;
    use isaac_storage::{MemoryBlockData, MemoryDatabase};
    use isaac_types::test_utils::{random_hash, test_network_id};
    use isaac_types::{
        Address, FixedSuffrage, Hash, Height, InitFact, KeyPair, LocalNode, LocalPolicy,
        Manifest, ProposalFact, Threshold, ThresholdRatio, VoteproofNodeFact,
    };
    use std::collections::BTreeMap;
    use std::time::{Duration, SystemTime};
    use tokio::sync::mpsc;

    struct Fixture {
        local: Arc<LocalState>,
        manifest: Manifest,
        keypair_remote: KeyPair,
        remote: Address,
    }

    fn fixture(policy: LocalPolicy) -> Fixture {
        let database = Arc::new(MemoryDatabase::new());
        let manifest = Manifest::new(
            Height::new(9),
            Round::new(0),
            random_hash(),
            random_hash(),
            Hash::ZERO,
        );
        database.seed_manifest(manifest.clone());

        let local = LocalState::new(
            LocalNode::new(Address::new("local").unwrap(), KeyPair::generate()),
            test_network_id(),
            policy,
            database,
            Arc::new(MemoryBlockData::new()),
            Arc::new(NodePool::new()),
        );

        Fixture {
            local,
            manifest,
            keypair_remote: KeyPair::generate(),
            remote: Address::new("remote").unwrap(),
        }
    }

    /// A real INIT majority voteproof over the local chain tip.
    fn init_majority(fx: &Fixture, round: Round) -> Voteproof {
        let fact = BallotFact::Init(InitFact::new(
            fx.manifest.height.succ(),
            round,
            fx.manifest.hash(),
        ));
        let fact_hash = fact.hash();
        let network_id = test_network_id();

        let mut message = fact_hash.as_bytes().to_vec();
        message.extend_from_slice(network_id.as_bytes());

        let mut ballots = BTreeMap::new();
        let mut votes = BTreeMap::new();
        for (address, keypair) in [
            (fx.local.node().address().clone(), fx.local.node().keypair().clone()),
            (fx.remote.clone(), fx.keypair_remote.clone()),
        ] {
            ballots.insert(address.clone(), random_hash());
            votes.insert(
                address,
                VoteproofNodeFact {
                    ballot: random_hash(),
                    fact: fact_hash,
                    fact_signature: keypair.sign(&message),
                    signer: keypair.public_key(),
                },
            );
        }

        Voteproof::new(
            fx.manifest.height.succ(),
            round,
            Stage::Init,
            Threshold::new(2, ThresholdRatio::new(100.0).unwrap()).unwrap(),
            VoteResult::Majority,
            Some(fact.clone()),
            vec![(fact_hash, fact)],
            ballots,
            votes,
            Some(SystemTime::now()),
        )
    }

    fn handler(fx: &Fixture, proposer: &str) -> ConsensusHandler {
        let suffrage = Arc::new(FixedSuffrage::new(
            Address::new(proposer).unwrap(),
            vec![fx.local.node().address().clone(), fx.remote.clone()],
        ));
        let processor = Arc::new(DefaultProposalProcessor::new(fx.local.clone()));
        ConsensusHandler::new(fx.local.clone(), suffrage, processor)
    }

    fn activate_ctx(vp: Voteproof) -> StateChangeContext {
        StateChangeContext::new(State::Joining, State::Consensus).with_voteproof(vp)
    }

    #[tokio::test]
    async fn proposal_timeout_advances_the_round() {
        let fx = fixture(LocalPolicy {
            timeout_waiting_proposal: Duration::from_millis(10),
            interval_broadcasting_init_ballot: Duration::from_secs(10),
            ..LocalPolicy::default()
        });
        // Remote proposes, so the local node just waits.
        let handler = handler(&fx, "remote");

        let (seal_tx, mut seal_rx) = mpsc::unbounded_channel();
        let (state_tx, _state_rx) = mpsc::unbounded_channel();
        handler.set_seal_chan(seal_tx);
        handler.set_state_chan(state_tx);

        let vp = init_majority(&fx, Round::new(0));
        handler.activate(activate_ctx(vp.clone())).await.unwrap();

        let seal = tokio::time::timeout(Duration::from_millis(500), seal_rx.recv())
            .await
            .expect("round-advance ballot expected")
            .unwrap();
        let ballot = seal.as_ballot().unwrap();
        assert_eq!(ballot.stage(), Stage::Init);
        assert_eq!(ballot.height(), vp.height());
        assert_eq!(ballot.round(), Round::new(1));

        handler
            .deactivate(StateChangeContext::new(State::Consensus, State::Stopped))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn proposer_broadcasts_its_proposal() {
        let fx = fixture(LocalPolicy {
            timeout_waiting_proposal: Duration::from_secs(10),
            interval_broadcasting_proposal: Duration::from_secs(10),
            ..LocalPolicy::default()
        });
        let handler = handler(&fx, "local");

        let (seal_tx, mut seal_rx) = mpsc::unbounded_channel();
        let (state_tx, _state_rx) = mpsc::unbounded_channel();
        handler.set_seal_chan(seal_tx);
        handler.set_state_chan(state_tx);

        let vp = init_majority(&fx, Round::new(0));
        handler.activate(activate_ctx(vp.clone())).await.unwrap();

        let seal = tokio::time::timeout(Duration::from_millis(200), seal_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let proposal = seal.as_proposal().expect("proposer should publish a proposal");
        assert_eq!(proposal.height(), vp.height());
        assert_eq!(proposal.round(), Round::new(0));

        handler
            .deactivate(StateChangeContext::new(State::Consensus, State::Stopped))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn proposal_leads_to_sign_and_accept_ballots() {
        let fx = fixture(LocalPolicy {
            timeout_waiting_proposal: Duration::from_secs(10),
            wait_broadcasting_accept_ballot: Duration::from_millis(5),
            interval_broadcasting_accept_ballot: Duration::from_secs(10),
            ..LocalPolicy::default()
        });
        // Remote is the proposer; local is acting, so it emits SIGN first.
        let handler = handler(&fx, "remote");

        let (seal_tx, mut seal_rx) = mpsc::unbounded_channel();
        let (state_tx, _state_rx) = mpsc::unbounded_channel();
        handler.set_seal_chan(seal_tx);
        handler.set_state_chan(state_tx);

        let vp = init_majority(&fx, Round::new(0));
        handler.activate(activate_ctx(vp.clone())).await.unwrap();

        let proposal = Proposal::sign(
            ProposalFact::new(vp.height(), Round::new(0), fx.remote.clone(), vec![]),
            &fx.keypair_remote,
            &test_network_id(),
        )
        .unwrap();
        handler
            .new_seal(Seal::Proposal(proposal.clone()))
            .await
            .unwrap();

        let sign_seal = tokio::time::timeout(Duration::from_millis(500), seal_rx.recv())
            .await
            .expect("SIGN ballot expected")
            .unwrap();
        let sign = sign_seal.as_ballot().unwrap();
        assert_eq!(sign.stage(), Stage::Sign);

        let accept_seal = tokio::time::timeout(Duration::from_millis(500), seal_rx.recv())
            .await
            .expect("ACCEPT ballot expected")
            .unwrap();
        let accept = accept_seal.as_ballot().unwrap();
        assert_eq!(accept.stage(), Stage::Accept);
        assert_eq!(accept.height(), vp.height());
        assert_eq!(accept.round(), Round::new(0));

        let fact = accept.fact().as_accept().unwrap();
        assert_eq!(fact.proposal, proposal.hash());

        handler
            .deactivate(StateChangeContext::new(State::Consensus, State::Stopped))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn matching_accept_majority_commits_and_opens_next_height() {
        let fx = fixture(LocalPolicy {
            timeout_waiting_proposal: Duration::from_secs(10),
            wait_broadcasting_accept_ballot: Duration::from_millis(5),
            interval_broadcasting_accept_ballot: Duration::from_secs(10),
            interval_broadcasting_init_ballot: Duration::from_secs(10),
            ..LocalPolicy::default()
        });
        let handler = handler(&fx, "remote");

        let (seal_tx, mut seal_rx) = mpsc::unbounded_channel();
        let (state_tx, _state_rx) = mpsc::unbounded_channel();
        handler.set_seal_chan(seal_tx);
        handler.set_state_chan(state_tx);

        let vp = init_majority(&fx, Round::new(0));
        handler.activate(activate_ctx(vp.clone())).await.unwrap();

        let proposal = Proposal::sign(
            ProposalFact::new(vp.height(), Round::new(0), fx.remote.clone(), vec![]),
            &fx.keypair_remote,
            &test_network_id(),
        )
        .unwrap();
        handler.new_seal(Seal::Proposal(proposal)).await.unwrap();

        // Wait for the local ACCEPT ballot; its fact carries the processed
        // block hash.
        let accept = loop {
            let seal = tokio::time::timeout(Duration::from_millis(500), seal_rx.recv())
                .await
                .expect("ballot expected")
                .unwrap();
            if let Some(ballot) = seal.as_ballot() {
                if ballot.stage() == Stage::Accept {
                    break ballot.clone();
                }
            }
        };
        let accept_fact = accept.fact().as_accept().unwrap().clone();

        // The network agrees with our processed block.
        let accept_vp = {
            let fact = BallotFact::Accept(accept_fact.clone());
            let fact_hash = fact.hash();
            let network_id = test_network_id();
            let mut message = fact_hash.as_bytes().to_vec();
            message.extend_from_slice(network_id.as_bytes());

            let mut ballots = BTreeMap::new();
            let mut votes = BTreeMap::new();
            for (address, keypair) in [
                (fx.local.node().address().clone(), fx.local.node().keypair().clone()),
                (fx.remote.clone(), fx.keypair_remote.clone()),
            ] {
                ballots.insert(address.clone(), random_hash());
                votes.insert(
                    address,
                    VoteproofNodeFact {
                        ballot: random_hash(),
                        fact: fact_hash,
                        fact_signature: keypair.sign(&message),
                        signer: keypair.public_key(),
                    },
                );
            }
            Voteproof::new(
                vp.height(),
                Round::new(0),
                Stage::Accept,
                Threshold::new(2, ThresholdRatio::new(100.0).unwrap()).unwrap(),
                VoteResult::Majority,
                Some(fact.clone()),
                vec![(fact_hash, fact)],
                ballots,
                votes,
                Some(SystemTime::now()),
            )
        };

        handler.new_voteproof(accept_vp).await.unwrap();

        // The block is committed and the INIT ballot for the next height
        // goes out.
        let committed = fx.local.last_manifest().unwrap();
        assert_eq!(committed.height, vp.height());
        assert_eq!(committed.hash(), accept_fact.new_block);

        let next_init = loop {
            let seal = tokio::time::timeout(Duration::from_millis(500), seal_rx.recv())
                .await
                .expect("INIT ballot for next height expected")
                .unwrap();
            if let Some(ballot) = seal.as_ballot() {
                if ballot.stage() == Stage::Init {
                    break ballot.clone();
                }
            }
        };
        assert_eq!(next_init.height(), vp.height().succ());
        assert_eq!(next_init.round(), Round::new(0));
        let init_fact = next_init.fact().as_init().unwrap();
        assert_eq!(init_fact.previous_block, accept_fact.new_block);

        handler
            .deactivate(StateChangeContext::new(State::Consensus, State::Stopped))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn mismatched_accept_majority_requests_syncing() {
        let fx = fixture(LocalPolicy {
            timeout_waiting_proposal: Duration::from_secs(10),
            ..LocalPolicy::default()
        });
        let handler = handler(&fx, "remote");

        let (seal_tx, _seal_rx) = mpsc::unbounded_channel();
        let (state_tx, mut state_rx) = mpsc::unbounded_channel();
        handler.set_seal_chan(seal_tx);
        handler.set_state_chan(state_tx);

        let vp = init_majority(&fx, Round::new(0));
        handler.activate(activate_ctx(vp.clone())).await.unwrap();

        // An ACCEPT majority for a block we never processed.
        let fact = BallotFact::Accept(AcceptFact::new(
            vp.height(),
            Round::new(0),
            random_hash(),
            random_hash(),
        ));
        let fact_hash = fact.hash();
        let network_id = test_network_id();
        let mut message = fact_hash.as_bytes().to_vec();
        message.extend_from_slice(network_id.as_bytes());
        let keypair = fx.keypair_remote.clone();

        let mut ballots = BTreeMap::new();
        let mut votes = BTreeMap::new();
        ballots.insert(fx.remote.clone(), random_hash());
        votes.insert(
            fx.remote.clone(),
            VoteproofNodeFact {
                ballot: random_hash(),
                fact: fact_hash,
                fact_signature: keypair.sign(&message),
                signer: keypair.public_key(),
            },
        );
        let accept_vp = Voteproof::new(
            vp.height(),
            Round::new(0),
            Stage::Accept,
            Threshold::new(1, ThresholdRatio::new(100.0).unwrap()).unwrap(),
            VoteResult::Majority,
            Some(fact.clone()),
            vec![(fact_hash, fact)],
            ballots,
            votes,
            Some(SystemTime::now()),
        );

        handler.new_voteproof(accept_vp).await.unwrap();

        let ctx = tokio::time::timeout(Duration::from_millis(100), state_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ctx.to, State::Syncing);

        handler
            .deactivate(StateChangeContext::new(State::Consensus, State::Stopped))
            .await
            .unwrap();
    }
}
