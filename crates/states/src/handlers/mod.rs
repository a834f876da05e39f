//! State handlers.
//!
//! One handler per consensus state; the supervisor keeps exactly one of
//! them active. Handlers publish outbound seals on the seal channel and
//! request transitions on the state channel, never switching states
//! themselves.

mod booting;
mod broken;
mod consensus;
mod joining;
mod syncing;

pub use booting::BootingHandler;
pub use broken::BrokenHandler;
pub use consensus::ConsensusHandler;
pub use joining::JoiningHandler;
pub use syncing::SyncingHandler;

use crate::context::{State, StateChangeContext};
use crate::error::StatesError;
use crate::localstate::LocalState;
use async_trait::async_trait;
use isaac_types::{
    Ballot, BallotFact, Height, InitFact, Round, Seal, Suffrage, Voteproof,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, warn};

/// One consensus state's behavior.
///
/// Handlers are reentrant across height boundaries: deactivate followed by
/// activate must leave no trace of the previous activation.
#[async_trait]
pub trait StateHandler: Send + Sync {
    fn state(&self) -> State;

    async fn activate(&self, ctx: StateChangeContext) -> Result<(), StatesError>;

    async fn deactivate(&self, ctx: StateChangeContext) -> Result<(), StatesError>;

    async fn new_seal(&self, seal: Seal) -> Result<(), StatesError>;

    async fn new_voteproof(&self, voteproof: Voteproof) -> Result<(), StatesError>;

    fn set_state_chan(&self, tx: UnboundedSender<StateChangeContext>);

    fn set_seal_chan(&self, tx: UnboundedSender<Seal>);
}

/// Shared plumbing of every handler.
pub(crate) struct BaseHandler {
    state: State,
    pub(crate) local: Arc<LocalState>,
    pub(crate) suffrage: Arc<dyn Suffrage>,
    active: AtomicBool,
    state_tx: RwLock<Option<UnboundedSender<StateChangeContext>>>,
    seal_tx: RwLock<Option<UnboundedSender<Seal>>>,
}

impl BaseHandler {
    pub(crate) fn new(state: State, local: Arc<LocalState>, suffrage: Arc<dyn Suffrage>) -> Self {
        BaseHandler {
            state,
            local,
            suffrage,
            active: AtomicBool::new(false),
            state_tx: RwLock::new(None),
            seal_tx: RwLock::new(None),
        }
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn set_state_chan(&self, tx: UnboundedSender<StateChangeContext>) {
        *self.state_tx.write() = Some(tx);
    }

    pub(crate) fn set_seal_chan(&self, tx: UnboundedSender<Seal>) {
        *self.seal_tx.write() = Some(tx);
    }

    /// Ask the supervisor for a transition.
    pub(crate) fn request_state_change(&self, to: State, voteproof: Option<Voteproof>) {
        let mut ctx = StateChangeContext::new(self.state, to);
        if let Some(vp) = voteproof {
            ctx = ctx.with_voteproof(vp);
        }
        match self.state_tx.read().as_ref() {
            Some(tx) => {
                if tx.send(ctx).is_err() {
                    error!(from = %self.state, %to, "state channel closed");
                }
            }
            None => warn!(from = %self.state, %to, "state channel not wired"),
        }
    }

    /// Publish a seal for broadcast (local node included).
    pub(crate) fn broadcast_seal(&self, seal: Seal) {
        match self.seal_tx.read().as_ref() {
            Some(tx) => {
                if tx.send(seal).is_err() {
                    error!(state = %self.state, "seal channel closed");
                }
            }
            None => warn!(state = %self.state, "seal channel not wired"),
        }
    }

    /// The height consensus is currently deciding.
    pub(crate) fn expected_height(&self) -> Height {
        self.local
            .last_manifest()
            .map(|m| m.height.succ())
            .unwrap_or(Height::GENESIS)
    }

    /// Build and sign an INIT ballot for `round` at the expected height,
    /// embedding `reference` per the ballot rules.
    pub(crate) fn build_init_ballot(
        &self,
        round: Round,
        reference: Voteproof,
    ) -> Result<Ballot, StatesError> {
        let manifest = self
            .local
            .last_manifest()
            .ok_or_else(|| StatesError::fatal("cannot build INIT ballot without a block"))?;

        let fact = BallotFact::Init(InitFact::new(
            manifest.height.succ(),
            round,
            manifest.hash(),
        ));
        let ballot = Ballot::sign(
            fact,
            Some(reference),
            self.local.node().address().clone(),
            self.local.node().keypair(),
            self.local.network_id(),
        )?;
        Ok(ballot)
    }
}
