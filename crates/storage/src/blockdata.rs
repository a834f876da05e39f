//! The out-of-band block-data contract.

use crate::StorageError;
use isaac_types::{Block, Height};

/// Heavy block payload storage, kept separate from the indexed database.
pub trait BlockData: Send + Sync {
    /// Whether payload data exists for `height`.
    fn exists(&self, height: Height) -> Result<bool, StorageError>;

    /// Store the payload of a committed block.
    fn save(&self, block: &Block) -> Result<(), StorageError>;

    /// Remove the payload of one height.
    fn remove_all(&self, height: Height) -> Result<(), StorageError>;

    /// Drop all payloads; with `remove` the backing files go too.
    fn clean(&self, remove: bool) -> Result<(), StorageError>;
}
