//! Core types for rondo consensus.
//!
//! This crate provides the foundational types used throughout the consensus
//! implementation:
//!
//! - **Primitives**: Hash, cryptographic keys and signatures
//! - **Identifiers**: NodeId, View, Weight
//! - **Consensus types**: Block, Proposal, QuorumCertificate, TimeoutCertificate
//! - **Committee**: the authorized-signer lookup trait and a static implementation
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend on
//! any other workspace crates, making it the foundation layer.

mod crypto;
mod hash;
mod identifiers;
mod signing;

// Consensus types
mod block;
mod certificates;
mod committee;
mod validator_set;

pub use crypto::{
    verify_aggregate, verify_aggregate_multi, AggregateError, KeyPair, KeyType, PublicKey,
    Signature,
};
pub use hash::{Hash, HexError};
pub use identifiers::{NodeId, View, Weight};
pub use signing::{timeout_message, vote_message, DOMAIN_TIMEOUT, DOMAIN_VOTE};

pub use block::{Block, Proposal};
pub use certificates::{QuorumCertificate, TimeoutCertificate};
pub use committee::{Committee, CommitteeError, StaticCommittee};
pub use validator_set::{ValidatorInfo, ValidatorSet};

use sbor::prelude::BasicSbor;

/// A single replica's vote for a block at a view.
///
/// The signature covers the domain-separated [`vote_message`] of
/// `(view, block_id)`.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Vote {
    /// Identifier of the block being voted for.
    pub block_id: Hash,
    /// View the vote belongs to. Always equals the block's view.
    pub view: View,
    /// Replica that cast this vote.
    pub signer_id: NodeId,
    /// Signature over the vote message.
    pub sig_data: Signature,
}

impl Vote {
    /// Create and sign a new vote.
    pub fn new(block_id: Hash, view: View, signer_id: NodeId, signing_key: &KeyPair) -> Self {
        let sig_data = signing_key.sign(&vote_message(view, &block_id));
        Self {
            block_id,
            view,
            signer_id,
            sig_data,
        }
    }
}

/// A single replica's signed statement that a view has timed out.
///
/// `newest_qc` is the highest-view QC the signer has observed. When the
/// signer entered `view` through a timeout rather than a QC, `last_view_tc`
/// carries the TC for `view - 1`.
///
/// The signature covers the [`timeout_message`] of `(view, newest_qc.view)`,
/// which is what the multi-message TC aggregation verifies per signer.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct TimeoutObject {
    /// View that timed out.
    pub view: View,
    /// Highest QC known to the signer.
    pub newest_qc: QuorumCertificate,
    /// TC for the previous view, present iff `newest_qc.view < view - 1`.
    pub last_view_tc: Option<TimeoutCertificate>,
    /// Replica that produced this timeout.
    pub signer_id: NodeId,
    /// Signature over the timeout message.
    pub sig_data: Signature,
}

impl TimeoutObject {
    /// Create and sign a new timeout object.
    pub fn new(
        view: View,
        newest_qc: QuorumCertificate,
        last_view_tc: Option<TimeoutCertificate>,
        signer_id: NodeId,
        signing_key: &KeyPair,
    ) -> Self {
        let sig_data = signing_key.sign(&timeout_message(view, newest_qc.view));
        Self {
            view,
            newest_qc,
            last_view_tc,
            signer_id,
            sig_data,
        }
    }
}

/// Test utilities.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;

    /// Create a test NodeId from a seed byte.
    pub fn test_node(seed: u8) -> NodeId {
        NodeId([seed; 32])
    }

    /// Create a deterministic BLS keypair from a seed byte.
    pub fn test_keypair(seed: u8) -> KeyPair {
        KeyPair::from_seed(KeyType::Bls12381, &[seed.wrapping_add(1); 32])
    }

    /// Build a validator set of `n` equal-weight validators with
    /// deterministic keys. Returns the keypairs in committee order.
    pub fn test_validators(n: u8) -> (Vec<KeyPair>, ValidatorSet) {
        let keys: Vec<KeyPair> = (0..n).map(test_keypair).collect();
        let validators: Vec<ValidatorInfo> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| ValidatorInfo {
                node_id: test_node(i as u8),
                public_key: k.public_key(),
                weight: Weight(1),
            })
            .collect();
        (keys, ValidatorSet::new(validators))
    }
}
