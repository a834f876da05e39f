//! The indexed-database contract.

use crate::StorageError;
use isaac_types::{Block, Hash, Height, Manifest, Proposal, Round, Seal, Stage, Voteproof};

/// Indexed storage consumed by consensus.
///
/// Implementations must be safe to call from multiple tasks; calls are
/// expected to be fast (an on-disk backend would run them on a blocking
/// pool). Every write is idempotent: re-inserting known data is success.
pub trait Database: Send + Sync {
    /// Store seals, skipping ones already known.
    ///
    /// Returns how many of `seals` were new; `Ok(0)` means everything was a
    /// duplicate.
    fn new_seals(&self, seals: Vec<Seal>) -> Result<usize, StorageError>;

    /// Look up a seal by hash.
    fn seal(&self, hash: &Hash) -> Result<Option<Seal>, StorageError>;

    /// Whether a seal is already stored.
    fn has_seal(&self, hash: &Hash) -> Result<bool, StorageError> {
        Ok(self.seal(hash)?.is_some())
    }

    /// Batch lookup preserving input order; missing hashes are skipped.
    fn seals(&self, hashes: &[Hash]) -> Result<Vec<Seal>, StorageError>;

    /// Hashes of staged operation seals awaiting inclusion in a proposal.
    fn staged_operation_hashes(&self) -> Result<Vec<Hash>, StorageError>;

    /// Stage an operation seal hash for the next proposal.
    fn stage_operation(&self, hash: Hash) -> Result<(), StorageError>;

    /// The proposal registered for one (height, round), if any.
    fn proposal(&self, height: Height, round: Round) -> Result<Option<Proposal>, StorageError>;

    /// Register the proposal of one (height, round); the first one wins.
    fn save_proposal(&self, proposal: Proposal) -> Result<(), StorageError>;

    /// The manifest of the highest committed block.
    fn last_manifest(&self) -> Result<Option<Manifest>, StorageError>;

    /// The highest committed block.
    fn last_block(&self) -> Result<Option<Block>, StorageError>;

    /// Manifest at an exact height.
    fn manifest(&self, height: Height) -> Result<Option<Manifest>, StorageError>;

    /// The last finished voteproof stored for `stage`.
    fn last_voteproof(&self, stage: Stage) -> Result<Option<Voteproof>, StorageError>;

    /// Commit a block with the voteproofs that decided it.
    ///
    /// The block's height must directly follow the last manifest.
    fn commit_block(
        &self,
        block: Block,
        init_voteproof: Voteproof,
        accept_voteproof: Voteproof,
    ) -> Result<(), StorageError>;

    /// Drop everything.
    fn clean(&self) -> Result<(), StorageError>;

    /// Drop blocks and manifests above `height`, keeping `height` itself.
    fn clean_by_height(&self, height: Height) -> Result<(), StorageError>;
}
