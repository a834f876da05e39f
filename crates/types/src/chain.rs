//! Chain coordinates: height, round, stage and vote results.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Block height.
///
/// Signed so that the pre-genesis sentinel [`Height::NIL`] is representable.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Height(pub i64);

impl Height {
    /// Height before any block exists.
    pub const NIL: Height = Height(-1);

    /// Height of the genesis block.
    pub const GENESIS: Height = Height(0);

    pub fn new(h: i64) -> Self {
        Height(h)
    }

    pub fn is_nil(&self) -> bool {
        self.0 < 0
    }

    /// The previous height.
    pub fn prev(&self) -> Height {
        Height(self.0 - 1)
    }

    /// The next height.
    pub fn succ(&self) -> Height {
        Height(self.0 + 1)
    }

    /// Big-endian bytes for signing payloads.
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn is_valid(&self) -> Result<(), ValidationError> {
        if self.0 < Height::NIL.0 {
            return Err(ValidationError::invalid_fact(format!(
                "height below nil: {}",
                self.0
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Height {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Height {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Height({})", self.0)
    }
}

/// Voting round within a height; resets to 0 when the height advances.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Round(pub u64);

impl Round {
    pub fn new(r: u64) -> Self {
        Round(r)
    }

    /// The next round.
    pub fn succ(&self) -> Round {
        Round(self.0 + 1)
    }

    /// Big-endian bytes for signing payloads.
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Round({})", self.0)
    }
}

/// Protocol stage within one height.
///
/// PROPOSAL is published but never voted on; the other three stages vote.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Stage {
    Init = 1,
    Proposal = 2,
    Sign = 3,
    Accept = 4,
}

impl Stage {
    /// Whether ballots of this stage are counted by the ballotbox.
    pub fn can_vote(&self) -> bool {
        matches!(self, Stage::Init | Stage::Sign | Stage::Accept)
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Init => "INIT",
            Stage::Proposal => "PROPOSAL",
            Stage::Sign => "SIGN",
            Stage::Accept => "ACCEPT",
        };
        write!(f, "{s}")
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// Result of voting at one (height, round, stage).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteResult {
    /// Not enough votes yet; a majority is still reachable.
    NotYet,
    /// One fact reached the threshold.
    Majority,
    /// No fact can reach the threshold any more.
    Draw,
}

impl VoteResult {
    pub fn is_finished(&self) -> bool {
        !matches!(self, VoteResult::NotYet)
    }
}

impl fmt::Display for VoteResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VoteResult::NotYet => "NOT-YET",
            VoteResult::Majority => "MAJORITY",
            VoteResult::Draw => "DRAW",
        };
        write!(f, "{s}")
    }
}

impl fmt::Debug for VoteResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_ordering_spans_nil() {
        assert!(Height::NIL < Height::GENESIS);
        assert!(Height::GENESIS < Height::new(10));
        assert_eq!(Height::new(10).succ(), Height::new(11));
        assert_eq!(Height::GENESIS.prev(), Height::NIL);
    }

    #[test]
    fn only_three_stages_vote() {
        assert!(Stage::Init.can_vote());
        assert!(Stage::Sign.can_vote());
        assert!(Stage::Accept.can_vote());
        assert!(!Stage::Proposal.can_vote());
    }

    #[test]
    fn stage_numbering_is_stable() {
        // The ballotbox key format depends on these values.
        assert_eq!(Stage::Init.as_u8(), 1);
        assert_eq!(Stage::Proposal.as_u8(), 2);
        assert_eq!(Stage::Sign.as_u8(), 3);
        assert_eq!(Stage::Accept.as_u8(), 4);
    }
}
