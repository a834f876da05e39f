//! The ISAAC consensus state machine.
//!
//! A node is always in exactly one state: Booting, Joining, Consensus,
//! Syncing, Broken or Stopped. The [`ConsensusStates`] supervisor owns the
//! active [`StateHandler`], routes incoming seals through storage, the
//! ballotbox and the voteproof admission checks, and fans broadcast seals
//! out to the node pool.
//!
//! ```text
//! seals ──► ConsensusStates::new_seal
//!             ├─ Database::new_seals (dedup)
//!             ├─ seal validation (signatures, clock skew, proposal checks)
//!             ├─ Ballotbox::vote ──► Voteproof ──► admission checks
//!             │                                     ├─ state change
//!             │                                     └─ active handler
//!             └─ active handler (fire and forget)
//! ```
//!
//! Handlers never talk to each other; they ask the supervisor to switch
//! states over the state channel and publish ballots over the seal channel.

mod checker;
mod context;
mod error;
pub mod handlers;
mod localstate;
mod proposal;
mod supervisor;
mod syncer;
mod timers;

pub use checker::VoteproofStateChecker;
pub use context::{State, StateChangeContext};
pub use error::StatesError;
pub use handlers::{
    BrokenHandler, BootingHandler, ConsensusHandler, JoiningHandler, StateHandler,
    SyncingHandler,
};
pub use localstate::LocalState;
pub use proposal::{
    DefaultProposalProcessor, ProposalMaker, ProposalProcessor, ProposalValidationChecker,
};
pub use supervisor::ConsensusStates;
pub use syncer::{PassiveSyncer, Syncer};
pub use timers::{TimerId, TimerManager};
