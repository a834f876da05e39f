//! Voteproof admission.
//!
//! Every finished voteproof coming out of the ballotbox passes through
//! [`VoteproofStateChecker`] before it may touch the active handler. The
//! checker compares the proof against the local chain tip and either admits
//! it, drops it, or asks for a state change via a typed error.

use crate::context::State;
use crate::error::StatesError;
use isaac_types::{Height, Manifest, Stage, VoteResult, Voteproof};
use tracing::debug;

/// Admission filter for one incoming voteproof.
pub struct VoteproofStateChecker<'a> {
    last_manifest: Option<&'a Manifest>,
    last_init_voteproof: Option<&'a Voteproof>,
    voteproof: &'a Voteproof,
}

impl<'a> VoteproofStateChecker<'a> {
    pub fn new(
        last_manifest: Option<&'a Manifest>,
        last_init_voteproof: Option<&'a Voteproof>,
        voteproof: &'a Voteproof,
    ) -> Self {
        VoteproofStateChecker {
            last_manifest,
            last_init_voteproof,
            voteproof,
        }
    }

    /// Run all admission checks in order.
    pub fn check(&self) -> Result<(), StatesError> {
        self.check_height()?;
        self.check_init_voteproof()?;
        self.check_accept_voteproof()
    }

    /// The proof must be exactly one height above the local chain tip:
    /// ahead means we are behind (sync), behind means it is stale (drop).
    fn check_height(&self) -> Result<(), StatesError> {
        let local = self
            .last_manifest
            .map(|m| m.height)
            .unwrap_or(Height::NIL);
        let d = self.voteproof.height().0 - (local.0 + 1);

        if d > 0 {
            debug!(voteproof = %self.voteproof.height(), local = %local,
                "voteproof is ahead of the local block; syncing");
            return Err(StatesError::state_change(
                State::Syncing,
                Some(self.voteproof.clone()),
            ));
        }
        if d < 0 {
            debug!(voteproof = %self.voteproof.height(), local = %local,
                "voteproof is behind the local block; ignored");
            return Err(StatesError::IgnoreVoteproof);
        }
        Ok(())
    }

    /// An INIT majority must agree with our last block; disagreement means
    /// the network is on a chain we do not have.
    fn check_init_voteproof(&self) -> Result<(), StatesError> {
        if self.voteproof.stage() != Stage::Init
            || self.voteproof.result() != VoteResult::Majority
        {
            return Ok(());
        }
        let manifest = match self.last_manifest {
            Some(m) => m,
            None => return Ok(()),
        };

        let fact = self
            .voteproof
            .majority()
            .and_then(|f| f.as_init())
            .ok_or_else(|| {
                StatesError::fatal("INIT majority voteproof without an INIT fact")
            })?;

        if fact.previous_block != manifest.hash() {
            debug!(voteproof_previous = %fact.previous_block, local = %manifest.hash(),
                "INIT voteproof disagrees with the local block; syncing");
            return Err(StatesError::state_change(
                State::Syncing,
                Some(self.voteproof.clone()),
            ));
        }
        Ok(())
    }

    /// An ACCEPT proof must belong to the round our last INIT proof opened.
    fn check_accept_voteproof(&self) -> Result<(), StatesError> {
        if self.voteproof.stage() != Stage::Accept {
            return Ok(());
        }
        let last_init = match self.last_init_voteproof {
            Some(vp) => vp,
            None => return Ok(()),
        };

        if last_init.round() != self.voteproof.round() {
            return Err(StatesError::fatal(format!(
                "ACCEPT voteproof round {} does not match last INIT round {}",
                self.voteproof.round(),
                last_init.round()
            )));
        }
        Ok(())
    }
}
