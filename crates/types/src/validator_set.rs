//! Validator set: the ordered committee membership for one epoch.

use crate::{NodeId, PublicKey, Weight};
use std::collections::HashMap;

/// A single committee member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorInfo {
    /// The member's replica identifier.
    pub node_id: NodeId,
    /// Key the member signs consensus messages with.
    pub public_key: PublicKey,
    /// The member's voting weight.
    pub weight: Weight,
}

/// An ordered, indexed set of validators with cached total weight.
#[derive(Debug, Clone)]
pub struct ValidatorSet {
    members: Vec<ValidatorInfo>,
    by_id: HashMap<NodeId, usize>,
    total_weight: Weight,
}

impl ValidatorSet {
    /// Build a validator set from members in canonical committee order.
    pub fn new(members: Vec<ValidatorInfo>) -> Self {
        let by_id = members
            .iter()
            .enumerate()
            .map(|(i, m)| (m.node_id, i))
            .collect();
        let total_weight = members.iter().map(|m| m.weight).sum();
        Self {
            members,
            by_id,
            total_weight,
        }
    }

    /// Look up a member by replica identifier.
    pub fn get(&self, node_id: &NodeId) -> Option<&ValidatorInfo> {
        self.by_id.get(node_id).map(|&i| &self.members[i])
    }

    /// Look up a member by committee index.
    pub fn by_index(&self, index: usize) -> Option<&ValidatorInfo> {
        self.members.get(index)
    }

    /// Whether `node_id` is a member.
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.by_id.contains_key(node_id)
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Combined weight of all members.
    pub fn total_weight(&self) -> Weight {
        self.total_weight
    }

    /// Iterate members in committee order.
    pub fn iter(&self) -> impl Iterator<Item = &ValidatorInfo> {
        self.members.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_node, test_validators};

    #[test]
    fn test_lookup_and_total_weight() {
        let (_, set) = test_validators(4);
        assert_eq!(set.len(), 4);
        assert_eq!(set.total_weight(), Weight(4));
        assert!(set.contains(&test_node(2)));
        assert!(!set.contains(&test_node(9)));
        assert_eq!(set.get(&test_node(1)).unwrap().node_id, test_node(1));
        assert_eq!(set.by_index(3).unwrap().node_id, test_node(3));
        assert!(set.by_index(4).is_none());
    }
}
