//! Block and proposal types.

use crate::{
    vote_message, Hash, KeyPair, NodeId, QuorumCertificate, Signature, TimeoutCertificate, View,
    Vote,
};
use sbor::prelude::*;

/// A consensus block.
///
/// Immutable after construction: the identifier is computed over all other
/// fields (including the embedded parent QC), so any mutation would orphan
/// the block.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Block {
    block_id: Hash,
    /// View this block was proposed in.
    pub view: View,
    /// QC certifying the parent block.
    pub qc: QuorumCertificate,
    /// Replica that proposed this block.
    pub proposer_id: NodeId,
    /// Commitment to the (externally produced) payload.
    pub payload_hash: Hash,
}

impl Block {
    /// Construct a block, computing its identifier from the remaining fields.
    pub fn new(
        view: View,
        qc: QuorumCertificate,
        proposer_id: NodeId,
        payload_hash: Hash,
    ) -> Self {
        let block_id = Self::compute_id(view, &qc, &proposer_id, &payload_hash);
        Self {
            block_id,
            view,
            qc,
            proposer_id,
            payload_hash,
        }
    }

    /// The block's content-derived identifier.
    pub fn block_id(&self) -> Hash {
        self.block_id
    }

    fn compute_id(
        view: View,
        qc: &QuorumCertificate,
        proposer_id: &NodeId,
        payload_hash: &Hash,
    ) -> Hash {
        let mut bytes = Vec::with_capacity(128);
        bytes.extend_from_slice(&view.0.to_le_bytes());
        bytes.extend_from_slice(&qc.view.0.to_le_bytes());
        bytes.extend_from_slice(qc.block_id.as_bytes());
        bytes.extend_from_slice(qc.sig_data.as_bytes());
        bytes.extend_from_slice(&proposer_id.0);
        bytes.extend_from_slice(payload_hash.as_bytes());
        Hash::digest(&bytes)
    }
}

/// A leader's signed block proposal.
///
/// `last_view_tc` is present exactly when the leader entered the block's view
/// through a timeout certificate rather than a QC, i.e.
/// `block.view != block.qc.view + 1`.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Proposal {
    /// The proposed block.
    pub block: Block,
    /// TC for the previous view when the leader entered via timeout.
    pub last_view_tc: Option<TimeoutCertificate>,
    /// Proposer signature over the block's vote message.
    pub proposer_sig: Signature,
}

impl Proposal {
    /// Build and sign a proposal for `block`.
    pub fn new(
        block: Block,
        last_view_tc: Option<TimeoutCertificate>,
        signing_key: &KeyPair,
    ) -> Self {
        let proposer_sig = signing_key.sign(&vote_message(block.view, &block.block_id()));
        Self {
            block,
            last_view_tc,
            proposer_sig,
        }
    }

    /// The proposer's signature viewed as a vote for its own block.
    pub fn proposer_vote(&self) -> Vote {
        Vote {
            block_id: self.block.block_id(),
            view: self.block.view,
            signer_id: self.block.proposer_id,
            sig_data: self.proposer_sig.clone(),
        }
    }
}
