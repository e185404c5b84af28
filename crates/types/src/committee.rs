//! Committee trait and static implementation.
//!
//! The committee answers "who may sign at view V": membership, leader
//! selection and the weight thresholds. Committees are fixed within an epoch;
//! the trait takes a view so implementations backed by an epoch schedule can
//! resolve the right membership snapshot.

use crate::{NodeId, ValidatorInfo, ValidatorSet, View, Weight};
use std::fmt;

/// Errors from committee lookups.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommitteeError {
    /// The node is not an authorized signer at the given view.
    #[error("node {node:?} is not an authorized signer at view {view}")]
    InvalidSigner {
        /// The unknown or unauthorized node.
        node: NodeId,
        /// The queried view.
        view: View,
    },

    /// The view does not fall within any known epoch.
    #[error("view {0} is not within a known epoch")]
    ViewForUnknownEpoch(View),
}

/// Authorized-signer lookup for the consensus core.
pub trait Committee: Send + Sync {
    /// This replica's own identifier.
    fn self_id(&self) -> NodeId;

    /// The leader authorized to propose at `view`.
    fn leader_for_view(&self, view: View) -> Result<NodeId, CommitteeError>;

    /// The full validator set active at `view`.
    fn validators_by_epoch(&self, view: View) -> Result<&ValidatorSet, CommitteeError>;

    /// A single validator's info at `view`.
    fn validator_by_epoch(
        &self,
        view: View,
        node: &NodeId,
    ) -> Result<ValidatorInfo, CommitteeError> {
        self.validators_by_epoch(view)?
            .get(node)
            .cloned()
            .ok_or(CommitteeError::InvalidSigner { node: *node, view })
    }

    /// Total committee weight at `view`.
    fn total_weight_for_view(&self, view: View) -> Result<Weight, CommitteeError> {
        Ok(self.validators_by_epoch(view)?.total_weight())
    }

    /// Minimum weight for a supermajority quorum at `view` (2f+1 of 3f+1).
    fn quorum_threshold_for_view(&self, view: View) -> Result<Weight, CommitteeError> {
        let total = self.total_weight_for_view(view)?;
        Ok(Weight(total.0 * 2 / 3 + 1))
    }

    /// Minimum weight guaranteeing at least one honest signer at `view`
    /// (f+1 of 3f+1). This is the partial-TC amplification threshold.
    fn timeout_threshold_for_view(&self, view: View) -> Result<Weight, CommitteeError> {
        let total = self.total_weight_for_view(view)?;
        Ok(Weight(total.0 / 3 + 1))
    }

    /// Whether `node` is a committee member at `view`.
    fn is_member(&self, view: View, node: &NodeId) -> bool {
        self.validators_by_epoch(view)
            .map(|set| set.contains(node))
            .unwrap_or(false)
    }
}

/// A committee with a single, fixed validator set and round-robin leader
/// rotation. Suitable for deployments without epoch switchover and for tests.
pub struct StaticCommittee {
    self_id: NodeId,
    validators: ValidatorSet,
}

impl StaticCommittee {
    /// Create a static committee for the local replica `self_id`.
    pub fn new(self_id: NodeId, validators: ValidatorSet) -> Self {
        Self {
            self_id,
            validators,
        }
    }
}

impl fmt::Debug for StaticCommittee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCommittee")
            .field("self_id", &self.self_id)
            .field("committee_size", &self.validators.len())
            .field("total_weight", &self.validators.total_weight())
            .finish()
    }
}

impl Committee for StaticCommittee {
    fn self_id(&self) -> NodeId {
        self.self_id
    }

    fn leader_for_view(&self, view: View) -> Result<NodeId, CommitteeError> {
        if self.validators.is_empty() {
            return Err(CommitteeError::ViewForUnknownEpoch(view));
        }
        let index = (view.0 as usize) % self.validators.len();
        self.validators
            .by_index(index)
            .map(|v| v.node_id)
            .ok_or(CommitteeError::ViewForUnknownEpoch(view))
    }

    fn validators_by_epoch(&self, _view: View) -> Result<&ValidatorSet, CommitteeError> {
        Ok(&self.validators)
    }
}
