//! Network collaborator contracts for ISAAC consensus.
//!
//! Consensus broadcasts seals through per-node [`Channel`]s collected in a
//! [`NodePool`]. Real transports live outside this workspace; the
//! [`LocalChannel`] here is the in-process transport used by tests and
//! single-process wiring.

mod channel;
mod nodepool;

pub use channel::{Channel, LocalChannel, NodeInfo};
pub use nodepool::{NodePool, RemoteNode};

use thiserror::Error;

/// Network failure modes.
#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    #[error("channel closed")]
    ChannelClosed,

    #[error("request timed out")]
    Timeout,

    #[error("operation not supported by this channel")]
    NotSupported,
}
