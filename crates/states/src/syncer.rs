//! The syncing collaborator contract.

use crate::error::StatesError;
use crate::localstate::LocalState;
use async_trait::async_trait;
use isaac_types::Height;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Fetches and commits blocks up to a target height.
///
/// Block transfer itself is outside the consensus core; the Syncing state
/// only depends on this contract. `sync_to` returns the height actually
/// reached, which may be short of the target when peers cannot serve it.
#[async_trait]
pub trait Syncer: Send + Sync {
    async fn sync_to(
        &self,
        target: Height,
        cancel: CancellationToken,
    ) -> Result<Height, StatesError>;
}

/// A syncer that cannot fetch: it reports the local chain tip.
///
/// Useful when no block-data transport is wired up; the Syncing state then
/// simply waits for the network to come back into reach.
pub struct PassiveSyncer {
    local: Arc<LocalState>,
}

impl PassiveSyncer {
    pub fn new(local: Arc<LocalState>) -> Self {
        PassiveSyncer { local }
    }
}

#[async_trait]
impl Syncer for PassiveSyncer {
    async fn sync_to(
        &self,
        target: Height,
        _cancel: CancellationToken,
    ) -> Result<Height, StatesError> {
        let reached = self
            .local
            .last_manifest()
            .map(|m| m.height)
            .unwrap_or(Height::NIL);
        debug!(%target, %reached, "passive syncer cannot fetch blocks");
        Ok(reached)
    }
}
