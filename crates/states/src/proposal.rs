//! Proposal making, validation and processing.

use crate::error::StatesError;
use crate::localstate::LocalState;
use async_trait::async_trait;
use isaac_storage::Database;
use isaac_types::{
    Block, Height, Proposal, ProposalFact, Round, Suffrage, VoteResult, Voteproof,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Builds and caches this node's Proposal per (height, round).
///
/// Caching keeps re-broadcasts byte-identical: signing twice would produce a
/// second, conflicting proposal for the same slot.
pub struct ProposalMaker {
    local: Arc<LocalState>,
    cached: Mutex<Option<Proposal>>,
}

impl ProposalMaker {
    pub fn new(local: Arc<LocalState>) -> Self {
        ProposalMaker {
            local,
            cached: Mutex::new(None),
        }
    }

    /// The Proposal for (height, round), built once.
    pub fn proposal(&self, height: Height, round: Round) -> Result<Proposal, StatesError> {
        let mut cached = self.cached.lock();
        if let Some(p) = cached.as_ref() {
            if p.height() == height && p.round() == round {
                return Ok(p.clone());
            }
        }

        let seals = self.local.database().staged_operation_hashes()?;
        let fact = ProposalFact::new(
            height,
            round,
            self.local.node().address().clone(),
            seals,
        );
        let proposal = Proposal::sign(fact, self.local.node().keypair(), self.local.network_id())?;

        debug!(%height, %round, proposal = %proposal.hash(), seals = proposal.seals().len(),
            "proposal built");
        *cached = Some(proposal.clone());
        Ok(proposal)
    }
}

/// Turns an accepted Proposal plus its INIT voteproof into a candidate
/// block.
///
/// Implementations must be deterministic and honor `cancel` within one
/// scheduling tick: a higher-round INIT voteproof invalidates the work.
#[async_trait]
pub trait ProposalProcessor: Send + Sync {
    async fn process_init(
        &self,
        proposal: Proposal,
        init_voteproof: Voteproof,
        cancel: CancellationToken,
    ) -> Result<Block, StatesError>;
}

/// Block production against local storage.
pub struct DefaultProposalProcessor {
    local: Arc<LocalState>,
}

impl DefaultProposalProcessor {
    pub fn new(local: Arc<LocalState>) -> Self {
        DefaultProposalProcessor { local }
    }
}

#[async_trait]
impl ProposalProcessor for DefaultProposalProcessor {
    async fn process_init(
        &self,
        proposal: Proposal,
        init_voteproof: Voteproof,
        cancel: CancellationToken,
    ) -> Result<Block, StatesError> {
        if cancel.is_cancelled() {
            return Err(StatesError::Cancelled);
        }

        let manifest = self
            .local
            .last_manifest()
            .ok_or_else(|| StatesError::fatal("no last manifest to build on"))?;

        // The proposal must extend the block the INIT voteproof agreed on.
        if init_voteproof.result() == VoteResult::Majority {
            let previous = init_voteproof
                .majority()
                .and_then(|f| f.as_init())
                .map(|f| f.previous_block)
                .ok_or_else(|| {
                    StatesError::fatal("INIT voteproof majority is not an INIT fact")
                })?;
            if previous != manifest.hash() {
                return Err(StatesError::state_change(
                    crate::context::State::Syncing,
                    Some(init_voteproof.clone()),
                ));
            }
        }

        let seals = proposal.seals().to_vec();
        let operations = Block::operations_root(&seals);
        let new_manifest = isaac_types::Manifest::new(
            proposal.height(),
            proposal.round(),
            proposal.hash(),
            manifest.hash(),
            operations,
        );

        if cancel.is_cancelled() {
            return Err(StatesError::Cancelled);
        }

        let block = Block::new(new_manifest, seals);
        debug!(height = %block.height(), round = %block.round(), block = %block.hash(),
            "proposal processed");
        Ok(block)
    }
}

/// Ordered validation of an incoming Proposal at seal ingress.
pub struct ProposalValidationChecker<'a> {
    local: &'a LocalState,
    suffrage: &'a dyn Suffrage,
    proposal: &'a Proposal,
}

impl<'a> ProposalValidationChecker<'a> {
    pub fn new(
        local: &'a LocalState,
        suffrage: &'a dyn Suffrage,
        proposal: &'a Proposal,
    ) -> Self {
        ProposalValidationChecker {
            local,
            suffrage,
            proposal,
        }
    }

    /// Run every check in the ingress order.
    pub fn check(&self) -> Result<(), StatesError> {
        self.is_known()?;
        self.check_signing()?;
        self.is_proposer()?;
        self.save_proposal()?;
        self.is_old()
    }

    /// A proposal registered for this (height, round) was validated before.
    fn is_known(&self) -> Result<(), StatesError> {
        if self
            .local
            .database()
            .proposal(self.proposal.height(), self.proposal.round())?
            .is_some()
        {
            return Err(StatesError::Known);
        }
        Ok(())
    }

    fn check_signing(&self) -> Result<(), StatesError> {
        self.proposal.is_valid(self.local.network_id())?;
        Ok(())
    }

    fn is_proposer(&self) -> Result<(), StatesError> {
        let height = self.proposal.height();
        let round = self.proposal.round();
        let node = self.proposal.node();

        if !self.suffrage.is_proposer(height, round, node) {
            warn!(%height, %round, %node, "proposal from a non-proposer");
            return Err(StatesError::Validation(
                isaac_types::ValidationError::invalid_proposal(format!(
                    "{node} is not the proposer of ({height}, {round})"
                )),
            ));
        }
        Ok(())
    }

    fn save_proposal(&self) -> Result<(), StatesError> {
        match self.local.database().save_proposal(self.proposal.clone()) {
            Ok(()) | Err(isaac_storage::StorageError::Duplicated) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Proposals at or below the committed height are useless.
    fn is_old(&self) -> Result<(), StatesError> {
        if let Some(manifest) = self.local.last_manifest() {
            if self.proposal.height() <= manifest.height {
                return Err(StatesError::OldSeal(format!(
                    "proposal height {} is at or below committed height {}",
                    self.proposal.height(),
                    manifest.height
                )));
            }
        }
        Ok(())
    }
}
