//! Aggregated certificates: quorum and timeout.

use crate::{Hash, NodeId, Signature, View};
use sbor::prelude::*;

/// Evidence that a supermajority (by weight) of the view's committee voted
/// for `block_id` at `view`.
///
/// Well-formedness (checked by the validator, not enforced here):
/// the signer set is a duplicate-free subset of the committee active at
/// `view`, and the signers' weight reaches the view's quorum threshold.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct QuorumCertificate {
    /// View the certified block belongs to.
    pub view: View,
    /// Identifier of the certified block.
    pub block_id: Hash,
    /// Replicas whose signatures are aggregated, in canonical order.
    pub signer_ids: Vec<NodeId>,
    /// Aggregated signature over the shared vote message.
    pub sig_data: Signature,
}

impl QuorumCertificate {
    /// The genesis certificate: view 0, zero block id, no signers.
    ///
    /// Used to bootstrap a fresh chain; validation treats it as trusted.
    pub fn genesis() -> Self {
        Self {
            view: View::GENESIS,
            block_id: Hash::ZERO,
            signer_ids: Vec::new(),
            sig_data: Signature::zero(),
        }
    }

    /// Whether this is the genesis certificate.
    pub fn is_genesis(&self) -> bool {
        self.view == View::GENESIS && self.signer_ids.is_empty()
    }
}

/// Evidence that a supermajority (by weight) of the view's committee
/// abandoned `view`.
///
/// Entry `i` of `newest_qc_views` is the view of signer `i`'s highest known
/// QC at the time it timed out; `newest_qc` is the highest QC among all
/// contributions. A replica holding a TC for view `v` may safely enter view
/// `v + 1`.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct TimeoutCertificate {
    /// View that was abandoned.
    pub view: View,
    /// Per-signer newest-QC views, index-aligned with `signer_ids`.
    pub newest_qc_views: Vec<View>,
    /// The highest QC among the signers' contributions.
    pub newest_qc: QuorumCertificate,
    /// Replicas whose signatures are aggregated, in canonical order.
    pub signer_ids: Vec<NodeId>,
    /// Aggregated multi-message signature.
    pub sig_data: Signature,
}
