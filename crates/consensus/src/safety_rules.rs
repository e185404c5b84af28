//! Durable safety rules preventing equivocation.
//!
//! Holds the minimal per-replica safety state: the highest view voted in and
//! the two-chain locked view. Both are persisted **before** any signed vote
//! or timeout leaves this module, so a crash between signing and sending can
//! never lead to a conflicting signature after restart.

use rondo_core::{Persister, SafetyData};
use rondo_types::{
    Block, Committee, KeyPair, Proposal, QuorumCertificate, TimeoutCertificate, TimeoutObject,
    View, Vote,
};
use std::sync::Arc;
use tracing::debug;

/// Benign reasons for declining to vote. Not errors in the operational
/// sense; the caller logs and moves on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NoVoteError {
    /// A vote or timeout was already produced at this view or later.
    #[error("already voted in view {highest_voted_view}, not voting in view {view}")]
    AlreadyVoted {
        /// The requested vote view.
        view: View,
        /// The highest view already voted in.
        highest_voted_view: View,
    },

    /// The proposal is not for the replica's current view.
    #[error("proposal is for view {proposal_view}, current view is {current_view}")]
    NotCurrentView {
        /// The proposal's view.
        proposal_view: View,
        /// The replica's current view.
        current_view: View,
    },

    /// The proposal's QC does not reach the locked view.
    #[error("proposal's QC (view {qc_view}) is below the locked view {locked_view}")]
    LockedViewViolated {
        /// View of the proposal's embedded QC.
        qc_view: View,
        /// The replica's locked view.
        locked_view: View,
    },
}

/// Benign reasons for declining to produce a timeout.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NoTimeoutError {
    /// This replica is not in the active committee for the view.
    #[error("not a committee member at view {0}")]
    NotCommitteeMember(View),

    /// The provided evidence cannot justify a timeout for the view.
    #[error("timeout evidence does not cover view {0}")]
    InsufficientEvidence(View),
}

/// The durable anti-equivocation state machine.
pub struct SafetyRules {
    committee: Arc<dyn Committee>,
    persister: Arc<dyn Persister>,
    signing_key: KeyPair,
    safety_data: SafetyData,
}

impl SafetyRules {
    /// Restore safety rules from a recovered [`SafetyData`] record.
    pub fn new(
        committee: Arc<dyn Committee>,
        persister: Arc<dyn Persister>,
        signing_key: KeyPair,
        recovered: SafetyData,
    ) -> Self {
        Self {
            committee,
            persister,
            signing_key,
            safety_data: recovered,
        }
    }

    /// The current safety record.
    pub fn safety_data(&self) -> SafetyData {
        self.safety_data
    }

    /// Decide whether to vote for `proposal` at `current_view`.
    ///
    /// `parent` is the block certified by the proposal's embedded QC; the
    /// caller guarantees it is present in Forks, or passes `None` when the
    /// proposal extends the genesis certificate. On success the safety
    /// record is persisted before the signed vote is returned.
    pub fn produce_vote(
        &mut self,
        proposal: &Proposal,
        parent: Option<&Block>,
        current_view: View,
    ) -> Result<Vote, NoVoteError> {
        let block = &proposal.block;
        if block.view != current_view {
            return Err(NoVoteError::NotCurrentView {
                proposal_view: block.view,
                current_view,
            });
        }
        if current_view <= self.safety_data.highest_voted_view {
            return Err(NoVoteError::AlreadyVoted {
                view: current_view,
                highest_voted_view: self.safety_data.highest_voted_view,
            });
        }
        if block.qc.view < self.safety_data.locked_view {
            return Err(NoVoteError::LockedViewViolated {
                qc_view: block.qc.view,
                locked_view: self.safety_data.locked_view,
            });
        }

        // Two-chain lock update: voting for this block acknowledges the
        // one-chain on its parent, so the lock advances to the grandparent
        // link (the view of the QC embedded in the parent).
        self.safety_data.highest_voted_view = current_view;
        if let Some(parent) = parent {
            if parent.qc.view > self.safety_data.locked_view {
                self.safety_data.locked_view = parent.qc.view;
            }
        }
        self.persister.put_safety_data(&self.safety_data);

        debug!(
            view = current_view.0,
            block_id = ?block.block_id(),
            locked_view = self.safety_data.locked_view.0,
            "producing vote"
        );

        Ok(Vote::new(
            block.block_id(),
            current_view,
            self.committee.self_id(),
            &self.signing_key,
        ))
    }

    /// Produce a signed timeout for `view`, justified by the newest QC and,
    /// when the QC is not for the previous view, the previous view's TC.
    ///
    /// A no-op (`NoTimeoutError`) when this replica is not in the active
    /// committee for `view`, for example right after an epoch switchover.
    pub fn produce_timeout(
        &mut self,
        view: View,
        newest_qc: &QuorumCertificate,
        last_view_tc: Option<&TimeoutCertificate>,
    ) -> Result<TimeoutObject, NoTimeoutError> {
        let self_id = self.committee.self_id();
        if !self.committee.is_member(view, &self_id) {
            return Err(NoTimeoutError::NotCommitteeMember(view));
        }

        // The timeout must prove the signer legitimately occupies `view`.
        if view < newest_qc.view {
            return Err(NoTimeoutError::InsufficientEvidence(view));
        }
        if view > newest_qc.view.next() {
            match last_view_tc {
                Some(tc) if tc.view.next() == view => {}
                _ => return Err(NoTimeoutError::InsufficientEvidence(view)),
            }
        }

        if view > self.safety_data.highest_voted_view {
            self.safety_data.highest_voted_view = view;
            self.persister.put_safety_data(&self.safety_data);
        }

        debug!(view = view.0, newest_qc_view = newest_qc.view.0, "producing timeout");

        Ok(TimeoutObject::new(
            view,
            newest_qc.clone(),
            last_view_tc.cloned(),
            self_id,
            &self.signing_key,
        ))
    }
}
