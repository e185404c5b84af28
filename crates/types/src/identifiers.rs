//! Identifier newtypes shared across the consensus core.

use sbor::prelude::*;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Monotonically increasing round counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BasicSbor)]
#[sbor(transparent)]
pub struct View(pub u64);

impl View {
    /// The genesis view.
    pub const GENESIS: Self = View(0);

    /// Get the next view.
    pub fn next(self) -> Self {
        View(self.0 + 1)
    }

    /// Get the previous view (returns None at genesis).
    pub fn prev(self) -> Option<Self> {
        if self.0 > 0 {
            Some(View(self.0 - 1))
        } else {
            None
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque 32-byte replica identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, BasicSbor)]
pub struct NodeId(pub [u8; 32]);

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}..)", &hex::encode(self.0)[..8])
    }
}

/// Stake-denominated voting weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BasicSbor)]
#[sbor(transparent)]
pub struct Weight(pub u64);

impl Weight {
    /// Zero weight.
    pub const ZERO: Self = Weight(0);

    /// Check whether `accumulated` reaches the supermajority quorum for
    /// `total` committee weight (strictly more than two thirds).
    pub fn has_quorum(accumulated: Weight, total: Weight) -> bool {
        accumulated.0 * 3 > total.0 * 2
    }
}

impl Add for Weight {
    type Output = Weight;

    fn add(self, rhs: Weight) -> Weight {
        Weight(self.0 + rhs.0)
    }
}

impl AddAssign for Weight {
    fn add_assign(&mut self, rhs: Weight) {
        self.0 += rhs.0;
    }
}

impl Sum for Weight {
    fn sum<I: Iterator<Item = Weight>>(iter: I) -> Weight {
        Weight(iter.map(|w| w.0).sum())
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_next_prev() {
        assert_eq!(View(4).next(), View(5));
        assert_eq!(View(5).prev(), Some(View(4)));
        assert_eq!(View::GENESIS.prev(), None);
    }

    #[test]
    fn test_quorum_boundary() {
        // 4 replicas of weight 1: quorum is 3.
        assert!(!Weight::has_quorum(Weight(2), Weight(4)));
        assert!(Weight::has_quorum(Weight(3), Weight(4)));
        // 7 replicas: quorum is 5.
        assert!(!Weight::has_quorum(Weight(4), Weight(7)));
        assert!(Weight::has_quorum(Weight(5), Weight(7)));
    }

    #[test]
    fn test_weight_sum() {
        let total: Weight = [Weight(1), Weight(2), Weight(3)].into_iter().sum();
        assert_eq!(total, Weight(6));
    }
}
