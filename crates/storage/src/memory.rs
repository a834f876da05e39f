//! In-memory storage backends.

use crate::{BlockData, Database, StorageError};
use isaac_types::{Block, Hash, Height, Manifest, Proposal, Round, Seal, Stage, Voteproof};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

#[derive(Default)]
struct DatabaseInner {
    seals: HashMap<Hash, Seal>,
    staged_operations: Vec<Hash>,
    proposals: HashMap<(i64, u64), Proposal>,
    manifests: BTreeMap<i64, Manifest>,
    blocks: BTreeMap<i64, Block>,
    voteproofs: HashMap<u8, Voteproof>,
}

/// Process-local [`Database`]; the backend used by tests and single-process
/// nodes.
#[derive(Default)]
pub struct MemoryDatabase {
    inner: RwLock<DatabaseInner>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a committed manifest chain without going through consensus;
    /// test scaffolding for boot and sync paths.
    pub fn seed_manifest(&self, manifest: Manifest) {
        let mut inner = self.inner.write();
        inner
            .blocks
            .insert(manifest.height.0, Block::new(manifest.clone(), Vec::new()));
        inner.manifests.insert(manifest.height.0, manifest);
    }
}

impl Database for MemoryDatabase {
    fn new_seals(&self, seals: Vec<Seal>) -> Result<usize, StorageError> {
        let mut inner = self.inner.write();
        let mut added = 0usize;
        for seal in seals {
            let hash = seal.hash();
            if inner.seals.contains_key(&hash) {
                continue;
            }
            inner.seals.insert(hash, seal);
            added += 1;
        }
        Ok(added)
    }

    fn seal(&self, hash: &Hash) -> Result<Option<Seal>, StorageError> {
        Ok(self.inner.read().seals.get(hash).cloned())
    }

    fn seals(&self, hashes: &[Hash]) -> Result<Vec<Seal>, StorageError> {
        let inner = self.inner.read();
        Ok(hashes
            .iter()
            .filter_map(|h| inner.seals.get(h).cloned())
            .collect())
    }

    fn staged_operation_hashes(&self) -> Result<Vec<Hash>, StorageError> {
        Ok(self.inner.read().staged_operations.clone())
    }

    fn stage_operation(&self, hash: Hash) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        if inner.staged_operations.contains(&hash) {
            return Ok(());
        }
        inner.staged_operations.push(hash);
        Ok(())
    }

    fn proposal(&self, height: Height, round: Round) -> Result<Option<Proposal>, StorageError> {
        Ok(self
            .inner
            .read()
            .proposals
            .get(&(height.0, round.0))
            .cloned())
    }

    fn save_proposal(&self, proposal: Proposal) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        let key = (proposal.height().0, proposal.round().0);
        if inner.proposals.contains_key(&key) {
            return Err(StorageError::Duplicated);
        }
        inner.proposals.insert(key, proposal);
        Ok(())
    }

    fn last_manifest(&self) -> Result<Option<Manifest>, StorageError> {
        Ok(self
            .inner
            .read()
            .manifests
            .last_key_value()
            .map(|(_, m)| m.clone()))
    }

    fn last_block(&self) -> Result<Option<Block>, StorageError> {
        Ok(self
            .inner
            .read()
            .blocks
            .last_key_value()
            .map(|(_, b)| b.clone()))
    }

    fn manifest(&self, height: Height) -> Result<Option<Manifest>, StorageError> {
        Ok(self.inner.read().manifests.get(&height.0).cloned())
    }

    fn last_voteproof(&self, stage: Stage) -> Result<Option<Voteproof>, StorageError> {
        Ok(self.inner.read().voteproofs.get(&stage.as_u8()).cloned())
    }

    fn commit_block(
        &self,
        block: Block,
        init_voteproof: Voteproof,
        accept_voteproof: Voteproof,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.write();

        let last = inner
            .manifests
            .last_key_value()
            .map(|(h, _)| *h)
            .unwrap_or(Height::NIL.0);
        if block.height().0 != last + 1 {
            return Err(StorageError::HeightMismatch {
                last,
                got: block.height().0,
            });
        }

        // Included operations leave the staged pool.
        inner
            .staged_operations
            .retain(|h| !block.seals.contains(h));

        inner.manifests.insert(block.height().0, block.manifest.clone());
        inner.blocks.insert(block.height().0, block.clone());
        inner
            .voteproofs
            .insert(Stage::Init.as_u8(), init_voteproof);
        inner
            .voteproofs
            .insert(Stage::Accept.as_u8(), accept_voteproof);

        debug!(height = %block.height(), block = %block.hash(), "block committed");
        Ok(())
    }

    fn clean(&self) -> Result<(), StorageError> {
        *self.inner.write() = DatabaseInner::default();
        Ok(())
    }

    fn clean_by_height(&self, height: Height) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        inner.manifests.retain(|h, _| *h <= height.0);
        inner.blocks.retain(|h, _| *h <= height.0);
        Ok(())
    }
}

/// Process-local [`BlockData`].
#[derive(Default)]
pub struct MemoryBlockData {
    heights: RwLock<HashSet<i64>>,
}

impl MemoryBlockData {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockData for MemoryBlockData {
    fn exists(&self, height: Height) -> Result<bool, StorageError> {
        Ok(self.heights.read().contains(&height.0))
    }

    fn save(&self, block: &Block) -> Result<(), StorageError> {
        self.heights.write().insert(block.height().0);
        Ok(())
    }

    fn remove_all(&self, height: Height) -> Result<(), StorageError> {
        self.heights.write().remove(&height.0);
        Ok(())
    }

    fn clean(&self, _remove: bool) -> Result<(), StorageError> {
        self.heights.write().clear();
        Ok(())
    }
}
