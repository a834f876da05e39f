//! The ConsensusStates supervisor.

use crate::checker::VoteproofStateChecker;
use crate::context::{State, StateChangeContext};
use crate::error::StatesError;
use crate::handlers::StateHandler;
use crate::localstate::LocalState;
use crate::proposal::ProposalValidationChecker;
use isaac_ballotbox::{Ballotbox, BallotboxError};
use isaac_storage::Database;
use isaac_types::{Height, Seal, Stage, Suffrage, Voteproof};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const BALLOTBOX_CLEAN_INTERVAL: Duration = Duration::from_secs(10);
/// Keep tallies for a few heights below the tip; stragglers re-vote.
const BALLOTBOX_KEEP_HEIGHTS: i64 = 3;

/// Top-level owner of the consensus state machine.
///
/// Exactly one handler is active at any time; handler switches serialize on
/// an internal lock so a deactivate/activate pair can never interleave with
/// another. All seal ingress goes through [`ConsensusStates::new_seal`].
pub struct ConsensusStates {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    local: Arc<LocalState>,
    ballotbox: Arc<Ballotbox>,
    suffrage: Arc<dyn Suffrage>,
    handlers: HashMap<State, Arc<dyn StateHandler>>,
    active: RwLock<Option<Arc<dyn StateHandler>>>,
    /// Held across deactivate(old) .. activate(new).
    activation: tokio::sync::Mutex<()>,
    state_tx: UnboundedSender<StateChangeContext>,
    seal_tx: UnboundedSender<Seal>,
    state_rx: Mutex<Option<UnboundedReceiver<StateChangeContext>>>,
    seal_rx: Mutex<Option<UnboundedReceiver<Seal>>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConsensusStates {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local: Arc<LocalState>,
        ballotbox: Arc<Ballotbox>,
        suffrage: Arc<dyn Suffrage>,
        booting: Arc<dyn StateHandler>,
        joining: Arc<dyn StateHandler>,
        consensus: Arc<dyn StateHandler>,
        syncing: Arc<dyn StateHandler>,
        broken: Arc<dyn StateHandler>,
    ) -> Self {
        let (state_tx, state_rx) = mpsc::unbounded_channel();
        let (seal_tx, seal_rx) = mpsc::unbounded_channel();

        let mut handlers: HashMap<State, Arc<dyn StateHandler>> = HashMap::new();
        handlers.insert(State::Booting, booting);
        handlers.insert(State::Joining, joining);
        handlers.insert(State::Consensus, consensus);
        handlers.insert(State::Syncing, syncing);
        handlers.insert(State::Broken, broken);

        ConsensusStates {
            inner: Arc::new(SupervisorInner {
                local,
                ballotbox,
                suffrage,
                handlers,
                active: RwLock::new(None),
                activation: tokio::sync::Mutex::new(()),
                state_tx,
                seal_tx,
                state_rx: Mutex::new(Some(state_rx)),
                seal_rx: Mutex::new(Some(seal_rx)),
                cancel: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Wire the handlers, start the channel loops and the ballotbox GC,
    /// then activate Booting.
    pub async fn start(&self) -> Result<(), StatesError> {
        info!("starting consensus states");

        for handler in self.inner.handlers.values() {
            handler.set_state_chan(self.inner.state_tx.clone());
            handler.set_seal_chan(self.inner.seal_tx.clone());
        }

        let mut state_rx = self
            .inner
            .state_rx
            .lock()
            .take()
            .ok_or_else(|| StatesError::fatal("consensus states started twice"))?;
        let inner = Arc::clone(&self.inner);
        let state_loop = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    ctx = state_rx.recv() => match ctx {
                        Some(ctx) => {
                            if let Err(err) = inner.activate_handler(ctx).await {
                                error!(%err, "failed to activate handler");
                                if err.is_fatal() {
                                    inner.to_broken(None).await;
                                }
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        let mut seal_rx = self
            .inner
            .seal_rx
            .lock()
            .take()
            .ok_or_else(|| StatesError::fatal("consensus states started twice"))?;
        let inner = Arc::clone(&self.inner);
        let seal_loop = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    seal = seal_rx.recv() => match seal {
                        Some(seal) => SupervisorInner::broadcast_seal(&inner, seal),
                        None => break,
                    },
                }
            }
        });

        let inner = Arc::clone(&self.inner);
        let gc_loop = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(BALLOTBOX_CLEAN_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    _ = ticker.tick() => inner.clean_ballotbox(),
                }
            }
        });

        self.inner
            .tasks
            .lock()
            .extend([state_loop, seal_loop, gc_loop]);

        self.inner
            .activate_handler(StateChangeContext::new(State::Stopped, State::Booting))
            .await
    }

    /// Cancel the loops and deactivate whatever is active.
    pub async fn stop(&self) -> Result<(), StatesError> {
        info!("stopping consensus states");
        self.inner.cancel.cancel();
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }

        let active = self.inner.active.write().take();
        if let Some(handler) = active {
            handler
                .deactivate(StateChangeContext::new(handler.state(), State::Stopped))
                .await?;
        }
        Ok(())
    }

    /// The state of the currently active handler.
    pub fn active_state(&self) -> Option<State> {
        self.inner.active.read().as_ref().map(|h| h.state())
    }

    /// Ask for a transition from outside (tests, operator tooling).
    pub fn request_state_change(&self, ctx: StateChangeContext) {
        let _ = self.inner.state_tx.send(ctx);
    }

    /// Ingress for every seal, local or remote.
    pub async fn new_seal(&self, seal: Seal) -> Result<(), StatesError> {
        self.inner.new_seal(seal).await
    }
}

impl SupervisorInner {
    async fn activate_handler(&self, ctx: StateChangeContext) -> Result<(), StatesError> {
        let _guard = self.activation.lock().await;

        if let Some(active) = self.active.read().clone() {
            if active.state() == ctx.to {
                debug!(state = %ctx.to, "handler already active");
                return Ok(());
            }
        }

        let next = self
            .handlers
            .get(&ctx.to)
            .cloned()
            .ok_or(StatesError::HandlerNotRegistered(ctx.to))?;

        let previous = self.active.read().clone();
        if let Some(previous) = previous {
            previous.deactivate(ctx.clone()).await?;
            debug!(handler = %previous.state(), "deactivated");
        }

        *self.active.write() = Some(next.clone());
        next.activate(ctx.clone()).await?;
        info!(from = %ctx.from, to = %ctx.to, "state changed");
        Ok(())
    }

    async fn to_broken(&self, voteproof: Option<Voteproof>) {
        let from = self
            .active
            .read()
            .as_ref()
            .map(|h| h.state())
            .unwrap_or(State::Stopped);
        let mut ctx = StateChangeContext::new(from, State::Broken);
        if let Some(vp) = voteproof {
            ctx = ctx.with_voteproof(vp);
        }
        if let Err(err) = self.activate_handler(ctx).await {
            error!(%err, "failed to enter broken state");
        }
    }

    async fn new_seal(&self, seal: Seal) -> Result<(), StatesError> {
        let active = self
            .active
            .read()
            .clone()
            .ok_or(StatesError::NoActiveHandler)?;

        debug!(seal = %seal.hash(), kind = seal.kind(), handler = %active.state(),
            "seal received");

        // Idempotent ingress: a known seal stops here.
        let added = self.local.database().new_seals(vec![seal.clone()])?;
        if added == 0 {
            debug!(seal = %seal.hash(), "seal already known");
            return Ok(());
        }

        let from_local = seal.signer() == &self.local.node().public_key();
        if !from_local {
            self.validate_seal(&seal)?;
        }

        if let Seal::Ballot(ballot) = &seal {
            if ballot.stage().can_vote() {
                match self.ballotbox.vote(ballot.clone()) {
                    Ok(voteproof) => {
                        if voteproof.is_finished() && !voteproof.is_closed() {
                            self.new_voteproof(voteproof).await?;
                        }
                    }
                    Err(BallotboxError::NotInSuffrage { node }) => {
                        debug!(%node, "ballot from outside the suffrage dropped");
                        return Ok(());
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }

        // Hand off to whichever handler is active now; its failures are its
        // own.
        let handler = match self.active.read().clone() {
            Some(handler) => handler,
            None => return Ok(()),
        };
        tokio::spawn(async move {
            if let Err(err) = handler.new_seal(seal).await {
                error!(%err, "active handler could not take the seal");
            }
        });
        Ok(())
    }

    fn validate_seal(&self, seal: &Seal) -> Result<(), StatesError> {
        let policy = self.local.policy();
        if !seal.is_signed_within(policy.timespan_valid_ballot) {
            return Err(StatesError::Validation(
                isaac_types::ValidationError::invalid_ballot(format!(
                    "seal {} signed outside the valid timespan",
                    seal.hash()
                )),
            ));
        }

        seal.is_valid(self.local.network_id())?;

        // When the sender is a known peer, the seal must carry its
        // registered key.
        if let Some(peer) = self.local.nodes().node(seal.node()) {
            if seal.signer() != &peer.public_key {
                return Err(StatesError::Validation(
                    isaac_types::ValidationError::signature(format!(
                        "seal from {} signed with an unregistered key",
                        seal.node()
                    )),
                ));
            }
        }

        if let Seal::Proposal(proposal) = seal {
            match ProposalValidationChecker::new(&self.local, self.suffrage.as_ref(), proposal)
                .check()
            {
                Ok(()) | Err(StatesError::Known) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    async fn new_voteproof(&self, voteproof: Voteproof) -> Result<(), StatesError> {
        debug!(height = %voteproof.height(), round = %voteproof.round(),
            stage = %voteproof.stage(), result = %voteproof.result(), "new voteproof");

        let manifest = self.local.last_manifest();
        let last_init = self.local.last_init_voteproof();
        let admission =
            VoteproofStateChecker::new(manifest.as_ref(), last_init.as_ref(), &voteproof)
                .check();

        match admission {
            Ok(()) => {}
            Err(StatesError::IgnoreVoteproof) => return Ok(()),
            Err(StatesError::StateToBeChange { to, voteproof: vp }) => {
                let from = self
                    .active
                    .read()
                    .as_ref()
                    .map(|h| h.state())
                    .unwrap_or(State::Stopped);
                let mut ctx = StateChangeContext::new(from, to);
                if let Some(vp) = vp {
                    ctx = ctx.with_voteproof(*vp);
                }
                self.activate_handler(ctx).await?;
            }
            Err(err) if err.is_fatal() => {
                error!(%err, "fatal voteproof; breaking");
                self.to_broken(Some(voteproof)).await;
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        match voteproof.stage() {
            Stage::Init => self.local.set_last_init_voteproof(voteproof.clone()),
            Stage::Accept => self.local.set_last_accept_voteproof(voteproof.clone()),
            _ => {}
        }

        let active = match self.active.read().clone() {
            Some(handler) => handler,
            None => return Ok(()),
        };
        match active.new_voteproof(voteproof).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_fatal() => {
                error!(%err, "handler failed fatally on voteproof");
                self.to_broken(None).await;
                Ok(())
            }
            Err(err) => {
                warn!(%err, "handler rejected voteproof");
                Ok(())
            }
        }
    }

    /// Fan a seal out to the local node and every live peer.
    fn broadcast_seal(this: &Arc<Self>, seal: Seal) {
        debug!(seal = %seal.hash(), kind = seal.kind(), "broadcasting seal");

        let local_delivery = Arc::clone(this);
        let local_seal = seal.clone();
        tokio::spawn(async move {
            if let Err(err) = local_delivery.new_seal(local_seal).await {
                error!(%err, "failed to deliver seal locally");
            }
        });

        this.local.nodes().traverse(|node| {
            if let Some(channel) = node.channel() {
                let seal = seal.clone();
                let peer = node.address.clone();
                tokio::spawn(async move {
                    if let Err(err) = channel.send_seal(seal).await {
                        // Per-peer failures never interrupt the fan-out.
                        warn!(%peer, %err, "failed to send seal");
                    }
                });
            }
            true
        });
    }

    fn clean_ballotbox(&self) {
        let manifest = match self.local.last_manifest() {
            Some(m) => m,
            None => return,
        };
        let height = Height::new(manifest.height.0 - BALLOTBOX_KEEP_HEIGHTS);
        if height.0 < 1 {
            return;
        }
        self.ballotbox.clean(height);
    }
}
