//! The Booting state.

use super::{BaseHandler, StateHandler};
use crate::context::{State, StateChangeContext};
use crate::error::StatesError;
use crate::localstate::LocalState;
use async_trait::async_trait;
use isaac_ballotbox::Ballotbox;
use isaac_storage::BlockData;
use isaac_types::{Seal, Suffrage, Voteproof};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

/// First state after `Start()`: decides where this node belongs.
///
/// With a committed chain the node joins (or syncs, when outside the
/// suffrage); with no blocks it can only sync from peers, and having no
/// peers either is unrecoverable.
pub struct BootingHandler {
    base: BaseHandler,
    ballotbox: Arc<Ballotbox>,
}

impl BootingHandler {
    pub fn new(
        local: Arc<LocalState>,
        suffrage: Arc<dyn Suffrage>,
        ballotbox: Arc<Ballotbox>,
    ) -> Self {
        BootingHandler {
            base: BaseHandler::new(State::Booting, local, suffrage),
            ballotbox,
        }
    }
}

#[async_trait]
impl StateHandler for BootingHandler {
    fn state(&self) -> State {
        State::Booting
    }

    async fn activate(&self, _ctx: StateChangeContext) -> Result<(), StatesError> {
        self.base.set_active(true);

        // Stale tallies from a previous run must not leak into this one.
        self.ballotbox.empty();

        match self.base.local.last_manifest() {
            Some(manifest) => {
                manifest.is_valid()?;

                let local_address = self.base.local.node().address();
                if self.base.suffrage.is_inside(local_address) {
                    debug!(height = %manifest.height, "blocks checked; moving to joining");
                    self.base.request_state_change(State::Joining, None);
                } else {
                    debug!(height = %manifest.height,
                        "blocks checked; non-suffrage node moves to syncing");
                    self.base.request_state_change(State::Syncing, None);
                }
            }
            None => {
                // No blocks at all: drop stray block data and sync from
                // scratch, which needs at least one live peer.
                self.base.local.blockdata().clean(false)?;

                if self.base.local.nodes().len_remote_alives() < 1 {
                    return Err(StatesError::fatal(
                        "empty blocks, but no channels for syncing",
                    ));
                }
                info!("empty blocks; will sync");
                self.base.request_state_change(State::Syncing, None);
            }
        }
        Ok(())
    }

    async fn deactivate(&self, _ctx: StateChangeContext) -> Result<(), StatesError> {
        self.base.set_active(false);
        Ok(())
    }

    async fn new_seal(&self, seal: Seal) -> Result<(), StatesError> {
        debug!(seal = %seal.hash(), "booting ignores seals");
        Ok(())
    }

    async fn new_voteproof(&self, voteproof: Voteproof) -> Result<(), StatesError> {
        debug!(height = %voteproof.height(), "booting ignores voteproofs");
        Ok(())
    }

    fn set_state_chan(&self, tx: UnboundedSender<StateChangeContext>) {
        self.base.set_state_chan(tx);
    }

    fn set_seal_chan(&self, tx: UnboundedSender<Seal>) {
        self.base.set_seal_chan(tx);
    }
}
