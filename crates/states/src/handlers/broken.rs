//! The Broken state.

use super::{BaseHandler, StateHandler};
use crate::context::{State, StateChangeContext};
use crate::error::StatesError;
use crate::localstate::LocalState;
use async_trait::async_trait;
use isaac_types::{Seal, Suffrage, Voteproof};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, warn};

/// Terminal state after a fatal error; inert until an operator intervenes.
pub struct BrokenHandler {
    base: BaseHandler,
}

impl BrokenHandler {
    pub fn new(local: Arc<LocalState>, suffrage: Arc<dyn Suffrage>) -> Self {
        BrokenHandler {
            base: BaseHandler::new(State::Broken, local, suffrage),
        }
    }
}

#[async_trait]
impl StateHandler for BrokenHandler {
    fn state(&self) -> State {
        State::Broken
    }

    async fn activate(&self, ctx: StateChangeContext) -> Result<(), StatesError> {
        self.base.set_active(true);
        error!(from = %ctx.from, "node is broken; refusing further consensus work");
        Ok(())
    }

    async fn deactivate(&self, _ctx: StateChangeContext) -> Result<(), StatesError> {
        self.base.set_active(false);
        Ok(())
    }

    async fn new_seal(&self, seal: Seal) -> Result<(), StatesError> {
        warn!(seal = %seal.hash(), "broken node drops seal");
        Ok(())
    }

    async fn new_voteproof(&self, voteproof: Voteproof) -> Result<(), StatesError> {
        warn!(height = %voteproof.height(), "broken node drops voteproof");
        Ok(())
    }

    fn set_state_chan(&self, tx: UnboundedSender<StateChangeContext>) {
        self.base.set_state_chan(tx);
    }

    fn set_seal_chan(&self, tx: UnboundedSender<Seal>) {
        self.base.set_seal_chan(tx);
    }
}
