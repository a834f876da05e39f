//! The Joining state.

use super::{BaseHandler, StateHandler};
use crate::context::{State, StateChangeContext};
use crate::error::StatesError;
use crate::localstate::LocalState;
use crate::timers::{TimerId, TimerManager};
use async_trait::async_trait;
use isaac_storage::Database;
use isaac_types::{
    Ballot, Round, Seal, Stage, Suffrage, VoteResult, Voteproof,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Rejoining the voting schedule after boot or sync.
///
/// Broadcasts an INIT ballot for the height right above the local chain tip
/// until the network answers with an INIT majority, which moves the node
/// into Consensus.
pub struct JoiningHandler {
    inner: Arc<JoiningInner>,
}

struct JoiningInner {
    base: BaseHandler,
    timers: TimerManager,
    current_ballot: Mutex<Option<Ballot>>,
}

impl JoiningHandler {
    pub fn new(local: Arc<LocalState>, suffrage: Arc<dyn Suffrage>) -> Self {
        JoiningHandler {
            inner: Arc::new(JoiningInner {
                base: BaseHandler::new(State::Joining, local, suffrage),
                timers: TimerManager::new(),
                current_ballot: Mutex::new(None),
            }),
        }
    }
}

impl JoiningInner {
    /// Build this height's INIT ballot and keep re-broadcasting it.
    fn start_broadcasting(this: &Arc<Self>) -> Result<(), StatesError> {
        let reference = match this.base.local.last_accept_voteproof().or_else(|| {
            this.base
                .local
                .database()
                .last_voteproof(Stage::Accept)
                .ok()
                .flatten()
        }) {
            Some(vp) => vp,
            None => {
                warn!("no ACCEPT voteproof available; joining waits silently");
                return Ok(());
            }
        };

        let ballot = this.base.build_init_ballot(Round::new(0), reference)?;
        debug!(height = %ballot.height(), "joining broadcasts INIT ballot");
        this.base.broadcast_seal(ballot.clone().into());
        *this.current_ballot.lock() = Some(ballot);

        let interval = this.base.local.policy().interval_broadcasting_init_ballot;
        let inner = Arc::clone(this);
        this.timers
            .set_interval(TimerId::BroadcastingInitBallot, interval, move || {
                let inner = Arc::clone(&inner);
                async move {
                    if !inner.base.is_active() {
                        return;
                    }
                    let ballot = inner.current_ballot.lock().clone();
                    if let Some(ballot) = ballot {
                        inner.base.broadcast_seal(ballot.into());
                    }
                }
            });
        Ok(())
    }
}

#[async_trait]
impl StateHandler for JoiningHandler {
    fn state(&self) -> State {
        State::Joining
    }

    async fn activate(&self, _ctx: StateChangeContext) -> Result<(), StatesError> {
        self.inner.base.set_active(true);
        info!(height = %self.inner.base.expected_height(), "joining consensus");
        JoiningInner::start_broadcasting(&self.inner)
    }

    async fn deactivate(&self, _ctx: StateChangeContext) -> Result<(), StatesError> {
        self.inner.base.set_active(false);
        self.inner.timers.cancel_all();
        *self.inner.current_ballot.lock() = None;
        Ok(())
    }

    async fn new_seal(&self, seal: Seal) -> Result<(), StatesError> {
        debug!(seal = %seal.hash(), kind = seal.kind(), "joining observes seal");
        Ok(())
    }

    async fn new_voteproof(&self, voteproof: Voteproof) -> Result<(), StatesError> {
        if voteproof.stage() == Stage::Init && voteproof.result() == VoteResult::Majority {
            info!(height = %voteproof.height(), round = %voteproof.round(),
                "INIT majority seen; moving to consensus");
            self.inner
                .base
                .request_state_change(State::Consensus, Some(voteproof));
            return Ok(());
        }

        debug!(height = %voteproof.height(), stage = %voteproof.stage(),
            result = %voteproof.result(), "joining keeps waiting");
        Ok(())
    }

    fn set_state_chan(&self, tx: UnboundedSender<StateChangeContext>) {
        self.inner.base.set_state_chan(tx);
    }

    fn set_seal_chan(&self, tx: UnboundedSender<Seal>) {
        self.inner.base.set_seal_chan(tx);
    }
}
