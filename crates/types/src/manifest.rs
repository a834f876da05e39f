//! Block manifests and blocks.

use crate::chain::{Height, Round};
use crate::error::ValidationError;
use crate::hash::Hash;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Block header: everything consensus needs to identify a block.
///
/// The manifest hash derives from the deterministic fields only, so every
/// honest node processing the same proposal produces the same block hash
/// regardless of when it ran the processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    hash: Hash,
    pub height: Height,
    pub round: Round,
    /// Hash of the proposal this block was built from.
    pub proposal: Hash,
    pub previous_block: Hash,
    /// Root over the included operation seals.
    pub operations: Hash,
    pub created_at: SystemTime,
}

impl Manifest {
    pub fn new(
        height: Height,
        round: Round,
        proposal: Hash,
        previous_block: Hash,
        operations: Hash,
    ) -> Self {
        let hash = Hash::from_slices(&[
            &height.to_be_bytes(),
            &round.to_be_bytes(),
            proposal.as_bytes(),
            previous_block.as_bytes(),
            operations.as_bytes(),
        ]);
        Manifest {
            hash,
            height,
            round,
            proposal,
            previous_block,
            operations,
            created_at: SystemTime::now(),
        }
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn is_valid(&self) -> Result<(), ValidationError> {
        self.height.is_valid()?;
        let derived = Hash::from_slices(&[
            &self.height.to_be_bytes(),
            &self.round.to_be_bytes(),
            self.proposal.as_bytes(),
            self.previous_block.as_bytes(),
            self.operations.as_bytes(),
        ]);
        if derived != self.hash {
            return Err(ValidationError::invalid_fact(format!(
                "manifest hash mismatch: recorded={} derived={}",
                self.hash, derived
            )));
        }
        Ok(())
    }
}

/// A processed block: manifest plus the operation seals it carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub manifest: Manifest,
    /// Hashes of the operation seals included in this block.
    pub seals: Vec<Hash>,
}

impl Block {
    pub fn new(manifest: Manifest, seals: Vec<Hash>) -> Self {
        Block { manifest, seals }
    }

    pub fn hash(&self) -> Hash {
        self.manifest.hash()
    }

    pub fn height(&self) -> Height {
        self.manifest.height
    }

    pub fn round(&self) -> Round {
        self.manifest.round
    }

    pub fn proposal(&self) -> Hash {
        self.manifest.proposal
    }

    /// Deterministic root over the seal hashes of a block body.
    pub fn operations_root(seals: &[Hash]) -> Hash {
        if seals.is_empty() {
            return Hash::ZERO;
        }
        let parts: Vec<&[u8]> = seals.iter().map(|h| h.as_bytes() as &[u8]).collect();
        Hash::from_slices(&parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_hash_ignores_creation_time() {
        let a = Manifest::new(
            Height::new(5),
            Round::new(1),
            Hash::from_bytes(b"proposal"),
            Hash::from_bytes(b"prev"),
            Hash::ZERO,
        );
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = Manifest::new(
            Height::new(5),
            Round::new(1),
            Hash::from_bytes(b"proposal"),
            Hash::from_bytes(b"prev"),
            Hash::ZERO,
        );
        assert_eq!(a.hash(), b.hash());
        assert!(a.is_valid().is_ok());
    }

    #[test]
    fn manifest_hash_tracks_fields() {
        let a = Manifest::new(
            Height::new(5),
            Round::new(0),
            Hash::from_bytes(b"p1"),
            Hash::from_bytes(b"prev"),
            Hash::ZERO,
        );
        let b = Manifest::new(
            Height::new(5),
            Round::new(0),
            Hash::from_bytes(b"p2"),
            Hash::from_bytes(b"prev"),
            Hash::ZERO,
        );
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn operations_root_is_order_sensitive() {
        let s1 = Hash::from_bytes(b"s1");
        let s2 = Hash::from_bytes(b"s2");
        assert_ne!(
            Block::operations_root(&[s1, s2]),
            Block::operations_root(&[s2, s1])
        );
        assert_eq!(Block::operations_root(&[]), Hash::ZERO);
    }
}
