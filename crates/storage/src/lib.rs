//! Storage collaborator contracts for ISAAC consensus.
//!
//! Consensus only ever talks to storage through the [`Database`] and
//! [`BlockData`] traits; persistent backends live outside this workspace.
//! The in-memory implementations here back the test suites and single-process
//! wiring.

mod blockdata;
mod database;
mod memory;

pub use blockdata::BlockData;
pub use database::Database;
pub use memory::{MemoryBlockData, MemoryDatabase};

use thiserror::Error;

/// Storage failure modes.
///
/// `Duplicated` is an idempotent-write marker, not a failure; write paths
/// that can observe it treat it as success.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("already stored")]
    Duplicated,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("block height {got} does not follow last height {last}")]
    HeightMismatch { last: i64, got: i64 },

    #[error("storage corrupted: {0}")]
    Corrupted(String),
}
