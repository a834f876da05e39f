//! Quorum arithmetic and the majority finder.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Quorum ratio in percent, valid over (0, 100].
#[derive(Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdRatio(pub f64);

impl ThresholdRatio {
    pub fn new(ratio: f64) -> Result<Self, ValidationError> {
        let r = ThresholdRatio(ratio);
        r.is_valid()?;
        Ok(r)
    }

    pub fn is_valid(&self) -> Result<(), ValidationError> {
        if !(self.0 > 0.0 && self.0 <= 100.0) {
            return Err(ValidationError::invalid_threshold(format!(
                "ratio must be in (0, 100]: {}",
                self.0
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ThresholdRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ThresholdRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThresholdRatio({})", self.0)
    }
}

/// Quorum requirement for one vote: total voters, ratio, derived threshold.
#[derive(Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub total: u64,
    pub ratio: ThresholdRatio,
    pub threshold: u64,
}

impl Threshold {
    /// Derive `threshold = ceil(total * ratio / 100)`.
    pub fn new(total: u64, ratio: ThresholdRatio) -> Result<Self, ValidationError> {
        ratio.is_valid()?;
        if total < 1 {
            return Err(ValidationError::invalid_threshold(
                "total must be at least 1",
            ));
        }

        let threshold = ((total as f64) * ratio.0 / 100.0).ceil() as u64;
        debug_assert!(threshold >= 1 && threshold <= total);

        Ok(Threshold {
            total,
            ratio,
            threshold,
        })
    }

    pub fn is_valid(&self) -> Result<(), ValidationError> {
        self.ratio.is_valid()?;
        if self.threshold < 1 || self.threshold > self.total {
            return Err(ValidationError::invalid_threshold(format!(
                "threshold out of range: threshold={} total={}",
                self.threshold, self.total
            )));
        }
        Ok(())
    }

    /// Bytes folded into voteproof digests.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(24);
        out.extend_from_slice(&self.total.to_be_bytes());
        out.extend_from_slice(&self.ratio.0.to_be_bytes());
        out.extend_from_slice(&self.threshold.to_be_bytes());
        out
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}({}%)", self.threshold, self.total, self.ratio)
    }
}

impl fmt::Debug for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Threshold({self})")
    }
}

/// Outcome of classifying a count multiset against a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Majority {
    /// A majority is still reachable with the outstanding votes.
    NotYet,
    /// No count can reach the threshold any more.
    Draw,
    /// The count at this index reached the threshold.
    Found(usize),
}

/// Classify vote counts against a quorum.
///
/// `counts[i]` is the number of votes for the i-th distinct fact, in the
/// aggregator's insertion order; the first count reaching `threshold` wins,
/// which makes the decision deterministic for a fixed insertion order.
pub fn find_majority(total: u64, threshold: u64, counts: &[u64]) -> Majority {
    if threshold > total {
        return Majority::Draw;
    }

    let sum: u64 = counts.iter().sum();
    if sum > total {
        return Majority::Draw;
    }

    for (index, &count) in counts.iter().enumerate() {
        if count >= threshold {
            return Majority::Found(index);
        }
    }

    let best = counts.iter().copied().max().unwrap_or(0);
    if (total - sum) + best >= threshold {
        Majority::NotYet
    } else {
        Majority::Draw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ratio(r: f64) -> ThresholdRatio {
        ThresholdRatio::new(r).unwrap()
    }

    #[test]
    fn threshold_is_ceiling() {
        assert_eq!(Threshold::new(3, ratio(66.0)).unwrap().threshold, 2);
        assert_eq!(Threshold::new(3, ratio(67.0)).unwrap().threshold, 3);
        assert_eq!(Threshold::new(1, ratio(100.0)).unwrap().threshold, 1);
        assert_eq!(Threshold::new(10, ratio(50.0)).unwrap().threshold, 5);
    }

    #[test]
    fn ratio_bounds() {
        assert!(ThresholdRatio::new(0.0).is_err());
        assert!(ThresholdRatio::new(-1.0).is_err());
        assert!(ThresholdRatio::new(100.1).is_err());
        assert!(ThresholdRatio::new(100.0).is_ok());
        assert!(Threshold::new(0, ratio(50.0)).is_err());
    }

    #[test]
    fn majority_found_at_first_reaching_index() {
        assert_eq!(find_majority(3, 2, &[2, 1]), Majority::Found(0));
        assert_eq!(find_majority(3, 2, &[1, 2]), Majority::Found(1));
        // First-past-the-post on equal counts: insertion order decides.
        assert_eq!(find_majority(4, 2, &[2, 2]), Majority::Found(0));
    }

    #[test]
    fn majority_not_yet_while_reachable() {
        assert_eq!(find_majority(3, 2, &[1]), Majority::NotYet);
        // Two outstanding voters could still push the first fact to 4.
        assert_eq!(find_majority(5, 3, &[2, 1]), Majority::NotYet);
        assert_eq!(find_majority(3, 2, &[]), Majority::NotYet);
    }

    #[test]
    fn draw_when_threshold_unreachable() {
        // Every voter has spoken and nobody reached 3-of-3.
        assert_eq!(find_majority(3, 3, &[1, 1]), Majority::Draw);
        // One voter left; best fact can only reach 2 of 3.
        assert_eq!(find_majority(4, 3, &[1, 1, 1]), Majority::Draw);
    }

    #[test]
    fn draw_on_inconsistent_inputs() {
        assert_eq!(find_majority(2, 3, &[1]), Majority::Draw);
        assert_eq!(find_majority(2, 2, &[2, 1]), Majority::Draw);
    }

    #[test]
    fn classification_ignores_count_permutation() {
        // Permuting an undecided multiset never changes the classification.
        assert_eq!(find_majority(5, 3, &[2, 1]), find_majority(5, 3, &[1, 2]));
        assert_eq!(find_majority(3, 3, &[1, 1]), find_majority(3, 3, &[1, 1]));
    }
}
