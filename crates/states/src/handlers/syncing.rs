//! The Syncing state.

use super::{BaseHandler, StateHandler};
use crate::context::{State, StateChangeContext};
use crate::error::StatesError;
use crate::localstate::LocalState;
use crate::syncer::Syncer;
use crate::timers::{TimerId, TimerManager};
use async_trait::async_trait;
use isaac_types::{Height, Seal, Stage, Suffrage, Voteproof};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PEER_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const SYNC_RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// Catching up to the network.
///
/// The target height comes from the voteproof that pushed us here (an INIT
/// proof needs blocks up to its height minus one, an ACCEPT proof up to its
/// height) and from probing peer node-info; incoming voteproofs may raise
/// it. Once the local chain reaches the target, a suffrage member rejoins.
pub struct SyncingHandler {
    inner: Arc<SyncingInner>,
}

struct SyncingInner {
    base: BaseHandler,
    syncer: Arc<dyn Syncer>,
    timers: TimerManager,
    target: Mutex<Option<Height>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl SyncingHandler {
    pub fn new(
        local: Arc<LocalState>,
        suffrage: Arc<dyn Suffrage>,
        syncer: Arc<dyn Syncer>,
    ) -> Self {
        SyncingHandler {
            inner: Arc::new(SyncingInner {
                base: BaseHandler::new(State::Syncing, local, suffrage),
                syncer,
                timers: TimerManager::new(),
                target: Mutex::new(None),
                cancel: Mutex::new(None),
            }),
        }
    }
}

impl SyncingInner {
    fn target_from_voteproof(voteproof: &Voteproof) -> Height {
        // Joining INIT voting at height H only needs blocks up to H - 1.
        match voteproof.stage() {
            Stage::Init => voteproof.height().prev(),
            _ => voteproof.height(),
        }
    }

    /// Raise the sync target; returns true when it actually grew.
    fn raise_target(&self, candidate: Height) -> bool {
        let mut target = self.target.lock();
        match *target {
            Some(current) if current >= candidate => false,
            _ => {
                *target = Some(candidate);
                true
            }
        }
    }

    /// Ask every live peer for its chain tip and fold it into the target.
    async fn probe_peers(&self) {
        let channels: Vec<_> = {
            let mut collected = Vec::new();
            self.base.local.nodes().traverse(|node| {
                if let Some(channel) = node.channel() {
                    collected.push((node.address.clone(), channel));
                }
                true
            });
            collected
        };

        for (address, channel) in channels {
            match tokio::time::timeout(PEER_PROBE_TIMEOUT, channel.node_info()).await {
                Ok(Ok(info)) => {
                    debug!(peer = %address, height = %info.last_height, "peer probed");
                    self.raise_target(info.last_height);
                }
                Ok(Err(err)) => warn!(peer = %address, %err, "peer probe failed"),
                Err(_) => warn!(peer = %address, "peer probe timed out"),
            }
        }
    }

    /// One sync attempt against the current target.
    async fn sync_once(&self) -> Result<(), StatesError> {
        let target = match *self.target.lock() {
            Some(t) => t,
            None => return Ok(()),
        };

        let local_tip = self
            .base
            .local
            .last_manifest()
            .map(|m| m.height)
            .unwrap_or(Height::NIL);
        if local_tip >= target {
            self.caught_up();
            return Ok(());
        }

        let cancel = CancellationToken::new();
        *self.cancel.lock() = Some(cancel.clone());

        let reached = self.syncer.sync_to(target, cancel).await?;
        info!(%target, %reached, "sync attempt finished");

        if reached >= target {
            self.caught_up();
        }
        Ok(())
    }

    fn caught_up(&self) {
        let local_address = self.base.local.node().address();
        if self.base.suffrage.is_inside(local_address) {
            info!("caught up; rejoining consensus");
            self.base.request_state_change(State::Joining, None);
        } else {
            debug!("caught up, but not in suffrage; keep following");
        }
    }

    /// Drive sync attempts until caught up or deactivated.
    fn spawn_sync_task(this: &Arc<Self>) {
        let inner = Arc::clone(this);
        tokio::spawn(async move {
            if !inner.base.is_active() {
                return;
            }
            inner.probe_peers().await;
            if let Err(err) = inner.sync_once().await {
                warn!(%err, "sync attempt failed");
            }
        });

        // Retry on a fixed cadence; progress checks are idempotent.
        let inner = Arc::clone(this);
        this.timers
            .set_interval(TimerId::SyncingProgress, SYNC_RETRY_INTERVAL, move || {
                let inner = Arc::clone(&inner);
                async move {
                    if !inner.base.is_active() {
                        return;
                    }
                    if let Err(err) = inner.sync_once().await {
                        warn!(%err, "sync attempt failed");
                    }
                }
            });
    }
}

#[async_trait]
impl StateHandler for SyncingHandler {
    fn state(&self) -> State {
        State::Syncing
    }

    async fn activate(&self, ctx: StateChangeContext) -> Result<(), StatesError> {
        self.inner.base.set_active(true);

        if let Some(vp) = &ctx.voteproof {
            let target = SyncingInner::target_from_voteproof(vp);
            self.inner.raise_target(target);
            info!(%target, "syncing towards voteproof height");
        } else {
            info!("syncing without a target; probing peers");
        }

        SyncingInner::spawn_sync_task(&self.inner);
        Ok(())
    }

    async fn deactivate(&self, _ctx: StateChangeContext) -> Result<(), StatesError> {
        self.inner.base.set_active(false);
        self.inner.timers.cancel_all();
        if let Some(cancel) = self.inner.cancel.lock().take() {
            cancel.cancel();
        }
        *self.inner.target.lock() = None;
        Ok(())
    }

    async fn new_seal(&self, seal: Seal) -> Result<(), StatesError> {
        debug!(seal = %seal.hash(), kind = seal.kind(), "syncing observes seal");
        Ok(())
    }

    async fn new_voteproof(&self, voteproof: Voteproof) -> Result<(), StatesError> {
        let candidate = SyncingInner::target_from_voteproof(&voteproof);
        if self.inner.raise_target(candidate) {
            debug!(target = %candidate, "sync target raised by voteproof");
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                if inner.base.is_active() {
                    if let Err(err) = inner.sync_once().await {
                        warn!(%err, "sync attempt failed");
                    }
                }
            });
        }
        Ok(())
    }

    fn set_state_chan(&self, tx: UnboundedSender<StateChangeContext>) {
        self.inner.base.set_state_chan(tx);
    }

    fn set_seal_chan(&self, tx: UnboundedSender<Seal>) {
        self.inner.base.set_seal_chan(tx);
    }
}
