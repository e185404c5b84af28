//! Stateless structural and cryptographic validation of consensus messages.
//!
//! Check ordering follows one rule: cheap structural checks first, committee
//! resolution second, signature verification last.

use rondo_core::{Verifier, VerifierError};
use rondo_types::{
    Committee, CommitteeError, NodeId, Proposal, QuorumCertificate, TimeoutCertificate,
    TimeoutObject, ValidatorInfo, View, Vote, Weight,
};
use std::collections::HashSet;
use std::sync::Arc;

/// Reasons a QC is invalid.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InvalidQcError {
    /// A signer is duplicated or not a committee member at the QC's view.
    #[error("signer {0:?} is duplicated or not a committee member")]
    InvalidSignerSet(NodeId),

    /// The signers do not reach the view's quorum threshold.
    #[error("signers have insufficient weight {weight} (required {threshold})")]
    InsufficientWeight {
        /// Accumulated signer weight.
        weight: Weight,
        /// Required quorum threshold.
        threshold: Weight,
    },

    /// The aggregated signature does not verify.
    #[error("invalid aggregated signature: {0}")]
    InvalidSignature(#[from] VerifierError),

    /// Committee lookup failed for the QC's view.
    #[error(transparent)]
    Committee(#[from] CommitteeError),
}

/// Reasons a TC is invalid.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InvalidTcError {
    /// Signer list and contributed newest-QC views are not aligned.
    #[error("expected {signers} contributed views, got {views}")]
    MisalignedViews {
        /// Number of signers.
        signers: usize,
        /// Number of contributed views.
        views: usize,
    },

    /// The TC's QC is newer than the TC itself.
    #[error("TC's newest QC (view {qc_view}) is newer than the TC (view {view})")]
    QcNewerThanTc {
        /// The TC's view.
        view: View,
        /// The embedded QC's view.
        qc_view: View,
    },

    /// The embedded QC's view is not the maximum contributed view.
    #[error("embedded QC view {qc_view} is not the highest contributed view {highest}")]
    QcNotHighestContributed {
        /// The embedded QC's view.
        qc_view: View,
        /// The maximum of the contributed views.
        highest: View,
    },

    /// A signer is duplicated or not a committee member at the TC's view.
    #[error("signer {0:?} is duplicated or not a committee member")]
    InvalidSignerSet(NodeId),

    /// The signers do not reach the view's quorum threshold.
    #[error("signers have insufficient weight {weight} (required {threshold})")]
    InsufficientWeight {
        /// Accumulated signer weight.
        weight: Weight,
        /// Required quorum threshold.
        threshold: Weight,
    },

    /// The embedded QC is invalid.
    #[error("included QC is invalid")]
    InvalidQc(#[source] Box<InvalidQcError>),

    /// The aggregated multi-message signature does not verify.
    #[error("invalid aggregated signature: {0}")]
    InvalidSignature(#[from] VerifierError),

    /// Committee lookup failed for the TC's view.
    #[error(transparent)]
    Committee(#[from] CommitteeError),
}

/// Reasons a proposal is invalid.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InvalidProposalError {
    /// The proposer's signature over its own block does not validate.
    #[error("invalid proposer signature")]
    InvalidProposerSignature(#[source] InvalidVoteError),

    /// The proposer is not the leader for the block's view.
    #[error("proposer {proposer:?} is not leader ({leader:?}) for view {view}")]
    NotLeader {
        /// The block's proposer.
        proposer: NodeId,
        /// The expected leader.
        leader: NodeId,
        /// The block's view.
        view: View,
    },

    /// The previous view timed out but the proposal carries no TC.
    #[error("last view ended with a timeout but the proposal carries no TC")]
    MissingLastViewTc,

    /// The previous view ended with a QC, so carrying a TC is a violation.
    #[error("last view ended with a QC but the proposal carries a TC")]
    UnexpectedLastViewTc,

    /// The carried TC is not for the previous view.
    #[error("expected TC for view {expected}, got view {actual}")]
    TcForWrongView {
        /// The required TC view (block view - 1).
        expected: View,
        /// The carried TC's view.
        actual: View,
    },

    /// The block's QC is older than the TC's newest QC, so the proposal
    /// fails to extend the highest certified block.
    #[error("proposal's QC (view {qc_view}) is older than the TC's newest QC (view {tc_qc_view})")]
    QcBelowTcNewestQc {
        /// View of the block's embedded QC.
        qc_view: View,
        /// View of the TC's newest QC.
        tc_qc_view: View,
    },

    /// The embedded QC is invalid.
    #[error("included QC is invalid")]
    InvalidQc(#[source] Box<InvalidQcError>),

    /// The carried TC is invalid.
    #[error("included TC is invalid")]
    InvalidTc(#[source] Box<InvalidTcError>),

    /// Committee lookup failed.
    #[error(transparent)]
    Committee(#[from] CommitteeError),
}

/// Reasons a vote is invalid.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InvalidVoteError {
    /// The voter is not an authorized signer at the vote's view.
    #[error(transparent)]
    InvalidSigner(#[from] CommitteeError),

    /// The vote signature does not verify.
    #[error("invalid vote signature: {0}")]
    InvalidSignature(#[from] VerifierError),
}

/// Reasons a timeout object is invalid.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InvalidTimeoutError {
    /// The timeout's QC is newer than the timeout's view.
    #[error("timeout's QC (view {qc_view}) cannot be newer than the timeout's view {view}")]
    QcNewerThanTimeout {
        /// The timeout's view.
        view: View,
        /// The embedded QC's view.
        qc_view: View,
    },

    /// The carried TC is not for the previous view.
    #[error("carried TC (view {tc_view}) is not for the view before {view}")]
    TcForWrongView {
        /// The timeout's view.
        view: View,
        /// The carried TC's view.
        tc_view: View,
    },

    /// The timeout's newest QC is older than the QC inside its carried TC.
    #[error("timeout's newest QC is older than the QC inside its carried TC")]
    QcBelowTcNewestQc,

    /// No QC for the previous view and no TC carried: the signer cannot
    /// prove it legitimately entered the timed-out view.
    #[error("timeout must carry a TC when its QC is not for the previous view")]
    MissingLastViewTc,

    /// The embedded QC is invalid.
    #[error("included QC is invalid")]
    InvalidQc(#[source] Box<InvalidQcError>),

    /// The carried TC is invalid.
    #[error("included TC is invalid")]
    InvalidTc(#[source] Box<InvalidTcError>),
}

/// Stateless validator for proposals, votes, QCs, TCs and timeouts.
pub struct Validator {
    committee: Arc<dyn Committee>,
    verifier: Arc<dyn Verifier>,
}

impl Validator {
    /// Create a validator over the given committee and signature verifier.
    pub fn new(committee: Arc<dyn Committee>, verifier: Arc<dyn Verifier>) -> Self {
        Self {
            committee,
            verifier,
        }
    }

    /// Validate a quorum certificate: signer set, weight threshold and
    /// aggregated signature.
    ///
    /// The genesis certificate is trusted by construction.
    pub fn validate_qc(&self, qc: &QuorumCertificate) -> Result<(), InvalidQcError> {
        if qc.is_genesis() {
            return Ok(());
        }

        let signers = self.resolve_signers(qc.view, &qc.signer_ids, InvalidQcError::InvalidSignerSet)?;

        let weight: Weight = signers.iter().map(|s| s.weight).sum();
        let threshold = self.committee.quorum_threshold_for_view(qc.view)?;
        if weight < threshold {
            return Err(InvalidQcError::InsufficientWeight { weight, threshold });
        }

        self.verifier
            .verify_qc(&signers, &qc.sig_data, qc.view, &qc.block_id)?;
        Ok(())
    }

    /// Validate a timeout certificate: structure, signer set, weight
    /// threshold, embedded QC and the multi-message aggregated signature.
    pub fn validate_tc(&self, tc: &TimeoutCertificate) -> Result<(), InvalidTcError> {
        if tc.newest_qc_views.len() != tc.signer_ids.len() {
            return Err(InvalidTcError::MisalignedViews {
                signers: tc.signer_ids.len(),
                views: tc.newest_qc_views.len(),
            });
        }
        if tc.view < tc.newest_qc.view {
            return Err(InvalidTcError::QcNewerThanTc {
                view: tc.view,
                qc_view: tc.newest_qc.view,
            });
        }

        let highest = tc
            .newest_qc_views
            .iter()
            .copied()
            .max()
            .unwrap_or(View::GENESIS);
        if highest != tc.newest_qc.view {
            return Err(InvalidTcError::QcNotHighestContributed {
                qc_view: tc.newest_qc.view,
                highest,
            });
        }

        let signers = self.resolve_signers(tc.view, &tc.signer_ids, InvalidTcError::InvalidSignerSet)?;

        let weight: Weight = signers.iter().map(|s| s.weight).sum();
        let threshold = self.committee.quorum_threshold_for_view(tc.view)?;
        if weight < threshold {
            return Err(InvalidTcError::InsufficientWeight { weight, threshold });
        }

        self.validate_qc(&tc.newest_qc)
            .map_err(|e| InvalidTcError::InvalidQc(Box::new(e)))?;

        self.verifier
            .verify_tc(&signers, &tc.sig_data, tc.view, &tc.newest_qc_views)?;
        Ok(())
    }

    /// Validate a block proposal: proposer signature, leader identity, view
    /// evidence (QC xor TC for the previous view) and the embedded
    /// certificates.
    pub fn validate_proposal(&self, proposal: &Proposal) -> Result<(), InvalidProposalError> {
        let block = &proposal.block;

        self.validate_vote(&proposal.proposer_vote())
            .map_err(InvalidProposalError::InvalidProposerSignature)?;

        let leader = self.committee.leader_for_view(block.view)?;
        if leader != block.proposer_id {
            return Err(InvalidProposalError::NotLeader {
                proposer: block.proposer_id,
                leader,
                view: block.view,
            });
        }

        // The proposal must prove the leader legitimately entered the
        // block's view: a QC for the previous view, or a TC for the previous
        // view extending at least the TC's newest QC.
        let last_view_successful = block.view == block.qc.view.next();
        match (&proposal.last_view_tc, last_view_successful) {
            (Some(_), true) => return Err(InvalidProposalError::UnexpectedLastViewTc),
            (None, false) => return Err(InvalidProposalError::MissingLastViewTc),
            (Some(tc), false) => {
                if tc.view.next() != block.view {
                    return Err(InvalidProposalError::TcForWrongView {
                        expected: block.view.prev().unwrap_or(View::GENESIS),
                        actual: tc.view,
                    });
                }
                if block.qc.view < tc.newest_qc.view {
                    return Err(InvalidProposalError::QcBelowTcNewestQc {
                        qc_view: block.qc.view,
                        tc_qc_view: tc.newest_qc.view,
                    });
                }
            }
            (None, true) => {}
        }

        // Signature checks last, most expensive first-to-fail avoided.
        self.validate_qc(&block.qc)
            .map_err(|e| InvalidProposalError::InvalidQc(Box::new(e)))?;
        if let Some(tc) = &proposal.last_view_tc {
            self.validate_tc(tc)
                .map_err(|e| InvalidProposalError::InvalidTc(Box::new(e)))?;
        }
        Ok(())
    }

    /// Validate a vote; returns the voter's identity on success.
    pub fn validate_vote(&self, vote: &Vote) -> Result<ValidatorInfo, InvalidVoteError> {
        let voter = self
            .committee
            .validator_by_epoch(vote.view, &vote.signer_id)?;
        self.verifier
            .verify_vote(&voter, &vote.sig_data, vote.view, &vote.block_id)?;
        Ok(voter)
    }

    /// Validate a timeout object's structure and embedded certificates.
    ///
    /// The timeout's own signature is checked by the timeout signature
    /// aggregator, not here.
    pub fn validate_timeout(&self, timeout: &TimeoutObject) -> Result<(), InvalidTimeoutError> {
        if timeout.view < timeout.newest_qc.view {
            return Err(InvalidTimeoutError::QcNewerThanTimeout {
                view: timeout.view,
                qc_view: timeout.newest_qc.view,
            });
        }

        // A carried TC must be for the previous view, no matter whether a QC
        // for the previous view is also present.
        if let Some(tc) = &timeout.last_view_tc {
            if timeout.view != tc.view.next() {
                return Err(InvalidTimeoutError::TcForWrongView {
                    view: timeout.view,
                    tc_view: tc.view,
                });
            }
            if timeout.newest_qc.view < tc.newest_qc.view {
                return Err(InvalidTimeoutError::QcBelowTcNewestQc);
            }
        }

        // The signer must prove it legitimately entered the timed-out view.
        let last_view_successful = timeout.view == timeout.newest_qc.view.next();
        if !last_view_successful && timeout.last_view_tc.is_none() {
            return Err(InvalidTimeoutError::MissingLastViewTc);
        }

        self.validate_qc(&timeout.newest_qc)
            .map_err(|e| InvalidTimeoutError::InvalidQc(Box::new(e)))?;
        if let Some(tc) = &timeout.last_view_tc {
            self.validate_tc(tc)
                .map_err(|e| InvalidTimeoutError::InvalidTc(Box::new(e)))?;
        }
        Ok(())
    }

    /// Resolve signer ids into identities at `view`, rejecting duplicates
    /// and non-members via `invalid`.
    fn resolve_signers<E>(
        &self,
        view: View,
        signer_ids: &[NodeId],
        invalid: impl Fn(NodeId) -> E,
    ) -> Result<Vec<ValidatorInfo>, E>
    where
        E: From<CommitteeError>,
    {
        let mut seen = HashSet::with_capacity(signer_ids.len());
        let mut signers = Vec::with_capacity(signer_ids.len());
        for id in signer_ids {
            if !seen.insert(*id) {
                return Err(invalid(*id));
            }
            match self.committee.validator_by_epoch(view, id) {
                Ok(info) => signers.push(info),
                Err(CommitteeError::InvalidSigner { .. }) => return Err(invalid(*id)),
                Err(e) => return Err(E::from(e)),
            }
        }
        Ok(signers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{make_qc, make_tc, test_committee};
    use crate::verifier::BlsVerifier;
    use rondo_types::test_utils::{test_node, test_validators};
    use rondo_types::{Block, Hash, KeyPair, Signature};

    fn make_validator() -> (Vec<KeyPair>, rondo_types::ValidatorSet, Validator) {
        let (keys, validators) = test_validators(4);
        let committee = test_committee(0, &validators);
        let validator = Validator::new(committee, Arc::new(BlsVerifier::new()));
        (keys, validators, validator)
    }

    #[test]
    fn test_built_qc_round_trips() {
        let (keys, validators, validator) = make_validator();
        let qc = make_qc(View(5), Hash::digest(b"b5"), &validators, &keys, &[0, 1, 2]);
        validator.validate_qc(&qc).unwrap();
    }

    #[test]
    fn test_qc_insufficient_weight() {
        let (keys, validators, validator) = make_validator();
        let qc = make_qc(View(5), Hash::digest(b"b5"), &validators, &keys, &[0, 1]);
        assert!(matches!(
            validator.validate_qc(&qc),
            Err(InvalidQcError::InsufficientWeight { .. })
        ));
    }

    #[test]
    fn test_qc_duplicate_signer_rejected() {
        let (keys, validators, validator) = make_validator();
        let mut qc = make_qc(View(5), Hash::digest(b"b5"), &validators, &keys, &[0, 1, 2]);
        qc.signer_ids[2] = qc.signer_ids[0];
        assert!(matches!(
            validator.validate_qc(&qc),
            Err(InvalidQcError::InvalidSignerSet(_))
        ));
    }

    #[test]
    fn test_qc_tampered_block_id_rejected() {
        let (keys, validators, validator) = make_validator();
        let mut qc = make_qc(View(5), Hash::digest(b"b5"), &validators, &keys, &[0, 1, 2]);
        qc.block_id = Hash::digest(b"other");
        assert!(matches!(
            validator.validate_qc(&qc),
            Err(InvalidQcError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_built_tc_round_trips() {
        let (keys, validators, validator) = make_validator();
        let qc = make_qc(View(6), Hash::digest(b"b6"), &validators, &keys, &[0, 1, 2]);
        let tc = make_tc(View(7), &qc, &validators, &keys, &[0, 1, 2]);
        validator.validate_tc(&tc).unwrap();
    }

    #[test]
    fn test_tc_qc_must_be_highest_contributed() {
        let (keys, validators, validator) = make_validator();
        let qc = make_qc(View(6), Hash::digest(b"b6"), &validators, &keys, &[0, 1, 2]);
        let mut tc = make_tc(View(7), &qc, &validators, &keys, &[0, 1, 2]);
        tc.newest_qc_views[0] = View(9);
        assert!(matches!(
            validator.validate_tc(&tc),
            Err(InvalidTcError::QcNotHighestContributed { .. })
        ));
    }

    #[test]
    fn test_proposal_with_qc_evidence() {
        let (keys, validators, validator) = make_validator();
        let qc = make_qc(View(4), Hash::digest(b"b4"), &validators, &keys, &[0, 1, 2]);

        // Leader of view 5 is replica 1 (round-robin).
        let block = Block::new(View(5), qc, test_node(1), Hash::digest(b"p"));
        let proposal = rondo_types::Proposal::new(block, None, &keys[1]);
        validator.validate_proposal(&proposal).unwrap();
    }

    #[test]
    fn test_proposal_from_non_leader_rejected() {
        let (keys, validators, validator) = make_validator();
        let qc = make_qc(View(4), Hash::digest(b"b4"), &validators, &keys, &[0, 1, 2]);
        let block = Block::new(View(5), qc, test_node(2), Hash::digest(b"p"));
        let proposal = rondo_types::Proposal::new(block, None, &keys[2]);
        assert!(matches!(
            validator.validate_proposal(&proposal),
            Err(InvalidProposalError::NotLeader { .. })
        ));
    }

    #[test]
    fn test_proposal_after_timeout_requires_tc() {
        let (keys, validators, validator) = make_validator();
        let qc = make_qc(View(4), Hash::digest(b"b4"), &validators, &keys, &[0, 1, 2]);

        // View 6 entered without a QC for view 5: needs a TC for view 5.
        let block = Block::new(View(6), qc.clone(), test_node(2), Hash::digest(b"p"));
        let missing = rondo_types::Proposal::new(block.clone(), None, &keys[2]);
        assert!(matches!(
            validator.validate_proposal(&missing),
            Err(InvalidProposalError::MissingLastViewTc)
        ));

        let tc = make_tc(View(5), &qc, &validators, &keys, &[0, 1, 2]);
        let ok = rondo_types::Proposal::new(block, Some(tc), &keys[2]);
        validator.validate_proposal(&ok).unwrap();
    }

    #[test]
    fn test_proposal_with_both_qc_and_tc_rejected() {
        let (keys, validators, validator) = make_validator();
        let qc = make_qc(View(4), Hash::digest(b"b4"), &validators, &keys, &[0, 1, 2]);
        let tc = make_tc(View(4), &qc, &validators, &keys, &[0, 1, 2]);

        let block = Block::new(View(5), qc, test_node(1), Hash::digest(b"p"));
        let proposal = rondo_types::Proposal::new(block, Some(tc), &keys[1]);
        assert!(matches!(
            validator.validate_proposal(&proposal),
            Err(InvalidProposalError::UnexpectedLastViewTc)
        ));
    }

    #[test]
    fn test_vote_validation() {
        let (keys, _validators, validator) = make_validator();
        let vote = rondo_types::Vote::new(Hash::digest(b"b"), View(3), test_node(2), &keys[2]);
        let voter = validator.validate_vote(&vote).unwrap();
        assert_eq!(voter.node_id, test_node(2));

        // Outsider's vote is rejected at the committee lookup.
        let outsider = rondo_types::test_utils::test_keypair(9);
        let bad = rondo_types::Vote::new(Hash::digest(b"b"), View(3), test_node(9), &outsider);
        assert!(matches!(
            validator.validate_vote(&bad),
            Err(InvalidVoteError::InvalidSigner(_))
        ));

        // Tampered signature is rejected.
        let mut forged = vote;
        forged.sig_data = Signature::zero();
        assert!(matches!(
            validator.validate_vote(&forged),
            Err(InvalidVoteError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_timeout_structure() {
        let (keys, validators, validator) = make_validator();
        let qc6 = make_qc(View(6), Hash::digest(b"b6"), &validators, &keys, &[0, 1, 2]);

        // Timed out view 7 right after QC for view 6: no TC needed.
        let to = rondo_types::TimeoutObject::new(View(7), qc6.clone(), None, test_node(0), &keys[0]);
        validator.validate_timeout(&to).unwrap();

        // Timed out view 8 with newest QC at view 6: must carry TC for view 7.
        let gap = rondo_types::TimeoutObject::new(View(8), qc6.clone(), None, test_node(0), &keys[0]);
        assert!(matches!(
            validator.validate_timeout(&gap),
            Err(InvalidTimeoutError::MissingLastViewTc)
        ));

        let tc7 = make_tc(View(7), &qc6, &validators, &keys, &[0, 1, 2]);
        let bridged =
            rondo_types::TimeoutObject::new(View(8), qc6, Some(tc7), test_node(0), &keys[0]);
        validator.validate_timeout(&bridged).unwrap();
    }
}
