//! Suffrage: who may vote, who acts, who proposes.

use crate::address::Address;
use crate::chain::{Height, Round};
use crate::hash::Hash;
use std::collections::BTreeSet;

/// The selected broadcasters for one (height, round), proposer included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActingSuffrage {
    pub height: Height,
    pub round: Round,
    pub proposer: Address,
    pub nodes: Vec<Address>,
}

impl ActingSuffrage {
    pub fn contains(&self, node: &Address) -> bool {
        self.nodes.contains(node)
    }
}

/// Membership and acting-set selection.
///
/// Implementations must be deterministic: every honest node asking about the
/// same (height, round) has to see the same proposer and acting set.
pub trait Suffrage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Every voting-eligible node address.
    fn nodes(&self) -> Vec<Address>;

    /// The acting set for one (height, round).
    fn acting(&self, height: Height, round: Round) -> ActingSuffrage;

    fn is_inside(&self, node: &Address) -> bool;

    fn is_proposer(&self, height: Height, round: Round, node: &Address) -> bool {
        &self.acting(height, round).proposer == node
    }

    fn is_acting(&self, height: Height, round: Round, node: &Address) -> bool {
        self.acting(height, round).contains(node)
    }
}

/// Static proposer and member set; test wiring and single-node networks.
pub struct FixedSuffrage {
    proposer: Address,
    nodes: Vec<Address>,
    members: BTreeSet<Address>,
}

impl FixedSuffrage {
    /// `nodes` need not repeat the proposer; it is always included.
    pub fn new(proposer: Address, nodes: Vec<Address>) -> Self {
        let mut members: BTreeSet<Address> = nodes.iter().cloned().collect();
        members.insert(proposer.clone());
        let mut all: Vec<Address> = members.iter().cloned().collect();
        all.sort();
        FixedSuffrage {
            proposer,
            nodes: all,
            members,
        }
    }
}

impl Suffrage for FixedSuffrage {
    fn name(&self) -> &'static str {
        "fixed-suffrage"
    }

    fn nodes(&self) -> Vec<Address> {
        self.nodes.clone()
    }

    fn acting(&self, height: Height, round: Round) -> ActingSuffrage {
        ActingSuffrage {
            height,
            round,
            proposer: self.proposer.clone(),
            nodes: self.nodes.clone(),
        }
    }

    fn is_inside(&self, node: &Address) -> bool {
        self.members.contains(node)
    }
}

/// Production rotation: proposer = SHA-256(H ‖ R) mod |nodes|, acting set =
/// the first `num_acting` nodes starting from the proposer in sorted order.
pub struct RotatingSuffrage {
    nodes: Vec<Address>,
    members: BTreeSet<Address>,
    num_acting: usize,
}

impl RotatingSuffrage {
    pub fn new(nodes: Vec<Address>, num_acting: usize) -> Self {
        let members: BTreeSet<Address> = nodes.iter().cloned().collect();
        let mut sorted: Vec<Address> = members.iter().cloned().collect();
        sorted.sort();
        let num_acting = num_acting.clamp(1, sorted.len().max(1));
        RotatingSuffrage {
            nodes: sorted,
            members,
            num_acting,
        }
    }

    fn proposer_index(&self, height: Height, round: Round) -> usize {
        let digest = Hash::from_slices(&[&height.to_be_bytes(), &round.to_be_bytes()]);
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest.as_bytes()[..8]);
        (u64::from_be_bytes(prefix) % self.nodes.len() as u64) as usize
    }
}

impl Suffrage for RotatingSuffrage {
    fn name(&self) -> &'static str {
        "rotating-suffrage"
    }

    fn nodes(&self) -> Vec<Address> {
        self.nodes.clone()
    }

    fn acting(&self, height: Height, round: Round) -> ActingSuffrage {
        let start = self.proposer_index(height, round);
        let acting: Vec<Address> = (0..self.num_acting)
            .map(|i| self.nodes[(start + i) % self.nodes.len()].clone())
            .collect();

        ActingSuffrage {
            height,
            round,
            proposer: self.nodes[start].clone(),
            nodes: acting,
        }
    }

    fn is_inside(&self, node: &Address) -> bool {
        self.members.contains(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::new(s).unwrap()
    }

    #[test]
    fn fixed_suffrage_always_includes_proposer() {
        let sf = FixedSuffrage::new(addr("p"), vec![addr("a"), addr("b")]);
        assert!(sf.is_inside(&addr("p")));
        assert!(sf.is_proposer(Height::new(1), Round::new(0), &addr("p")));
        assert!(!sf.is_proposer(Height::new(1), Round::new(0), &addr("a")));
        assert_eq!(sf.nodes().len(), 3);
    }

    #[test]
    fn rotating_suffrage_is_deterministic() {
        let nodes = vec![addr("a"), addr("b"), addr("c"), addr("d")];
        let sf1 = RotatingSuffrage::new(nodes.clone(), 3);
        let sf2 = RotatingSuffrage::new(nodes, 3);

        for h in 0..20i64 {
            for r in 0..3u64 {
                let one = sf1.acting(Height::new(h), Round::new(r));
                let two = sf2.acting(Height::new(h), Round::new(r));
                assert_eq!(one, two);
                assert_eq!(one.nodes.len(), 3);
                assert!(one.contains(&one.proposer.clone()));
            }
        }
    }

    #[test]
    fn rotating_suffrage_rotates_proposers() {
        let nodes = vec![addr("a"), addr("b"), addr("c"), addr("d"), addr("e")];
        let sf = RotatingSuffrage::new(nodes, 2);

        let mut seen = BTreeSet::new();
        for h in 0..50i64 {
            seen.insert(sf.acting(Height::new(h), Round::new(0)).proposer);
        }
        // 50 heights over 5 nodes; the rotation must not be constant.
        assert!(seen.len() > 1);
    }

    #[test]
    fn acting_set_is_clamped() {
        let sf = RotatingSuffrage::new(vec![addr("a"), addr("b")], 10);
        let acting = sf.acting(Height::new(3), Round::new(0));
        assert_eq!(acting.nodes.len(), 2);
    }
}
