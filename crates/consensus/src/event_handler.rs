//! Single-threaded orchestrator of the consensus state machine.
//!
//! The EventHandler reacts to proposals, certificates, local timeouts and
//! partial-TC notifications. It performs no crypto and no aggregation; it
//! routes events, updates the PaceMaker and decides when to produce its own
//! vote, proposal or timeout.
//!
//! Three actions can originate here:
//! - **vote**: only while processing a proposal for the current view, since
//!   that is the moment all information for a valid vote is available;
//! - **timeout**: on the local round deadline, or early when a partial TC
//!   shows f+1 weight of peers already timed out (Bracha amplification);
//! - **proposal**: after a QC or TC admits a view this replica leads, or
//!   after a proposal delivers the parent the newest QC references.
//!
//! Not concurrency safe: all methods must be called from the single event
//! loop task. Non-fatal anomalies are logged and swallowed; only internal
//! state corruption surfaces as an error.

use crate::config::ConsensusConfig;
use crate::pacemaker::PaceMaker;
use crate::safety_rules::{NoTimeoutError, SafetyRules};
use crate::timeout_collector::TimeoutCollectors;
use crate::vote_collector::VoteCollectors;
use rondo_core::{BlockProducer, ConsensusObserver, Forks, PartialTcCreated};
use rondo_types::{Committee, Proposal, QuorumCertificate, TimeoutCertificate};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Unrecoverable internal inconsistency. Terminates the event loop.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FatalError {
    /// An internal invariant no longer holds.
    #[error("state corruption: {0}")]
    StateCorruption(String),
}

/// The single-threaded event orchestrator.
pub struct EventHandler {
    committee: Arc<dyn Committee>,
    pacemaker: PaceMaker,
    forks: Arc<dyn Forks>,
    block_producer: Arc<dyn BlockProducer>,
    safety_rules: SafetyRules,
    vote_collectors: Arc<VoteCollectors>,
    timeout_collectors: Arc<TimeoutCollectors>,
    observer: Arc<dyn ConsensusObserver>,
    config: ConsensusConfig,
}

impl EventHandler {
    /// Assemble an event handler from its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        committee: Arc<dyn Committee>,
        pacemaker: PaceMaker,
        forks: Arc<dyn Forks>,
        block_producer: Arc<dyn BlockProducer>,
        safety_rules: SafetyRules,
        vote_collectors: Arc<VoteCollectors>,
        timeout_collectors: Arc<TimeoutCollectors>,
        observer: Arc<dyn ConsensusObserver>,
        config: ConsensusConfig,
    ) -> Self {
        Self {
            committee,
            pacemaker,
            forks,
            block_producer,
            safety_rules,
            vote_collectors,
            timeout_collectors,
            observer,
            config,
        }
    }

    /// The PaceMaker's current view.
    pub fn current_view(&self) -> rondo_types::View {
        self.pacemaker.current_view()
    }

    /// Mutable access to the PaceMaker (event-loop wiring only).
    pub fn pacemaker_mut(&mut self) -> &mut PaceMaker {
        &mut self.pacemaker
    }

    /// Start the handler: replay proposals that were persisted but never
    /// processed (crash recovery), propose if this replica leads the
    /// recovered view, then start the round timer.
    pub fn start(&mut self) -> Result<(), FatalError> {
        self.process_pending_proposals();
        self.propose_if_primary()?;
        self.pacemaker.start();
        Ok(())
    }

    /// Process a proposal received from the compliance layer.
    ///
    /// The proposal has already passed full validation on its way into
    /// Forks; this method only drives the state transitions it causes.
    pub fn on_receive_proposal(&mut self, proposal: &Proposal) -> Result<(), FatalError> {
        let block = &proposal.block;
        debug!(
            cur_view = self.pacemaker.current_view().0,
            block_view = block.view.0,
            block_id = ?block.block_id(),
            proposer = ?block.proposer_id,
            "proposal received"
        );

        // Stale proposals carry nothing new.
        if block.view < self.forks.finalized_view() {
            debug!(block_view = block.view.0, "stale proposal dropped");
            self.observer.on_event_processed();
            return Ok(());
        }

        // Forks performs full validation; a rejection is an anomaly of the
        // sender, not of this replica.
        if let Err(e) = self.forks.add_proposal(proposal) {
            warn!(block_id = ?block.block_id(), error = %e, "proposal rejected by fork store");
            self.observer.on_event_processed();
            return Ok(());
        }

        self.pacemaker.process_qc(&block.qc);
        self.pacemaker.process_tc(proposal.last_view_tc.as_ref());

        // Let the vote collector start verifying votes for this block.
        self.vote_collectors.add_block(proposal);

        // Vote if the proposal is for the view we are in.
        self.process_block_for_current_view(proposal)?;

        if block.view == self.pacemaker.current_view() {
            // Still in the proposal's view: voting was the only duty.
            self.observer.on_event_processed();
            return Ok(());
        }

        let result = self.propose_if_primary();
        self.observer.on_event_processed();
        result
    }

    /// Process a validated QC constructed by the vote collector or
    /// discovered inside a timeout object.
    pub fn on_receive_qc(&mut self, qc: &QuorumCertificate) -> Result<(), FatalError> {
        debug!(
            cur_view = self.pacemaker.current_view().0,
            qc_view = qc.view.0,
            qc_block_id = ?qc.block_id,
            "QC received"
        );
        self.observer
            .on_qc_constructed(self.pacemaker.current_view(), qc);

        let result = if self.pacemaker.process_qc(qc).is_some() {
            self.propose_if_primary()
        } else {
            debug!("QC did not trigger a view change");
            Ok(())
        };
        self.observer.on_event_processed();
        result
    }

    /// Process a validated TC constructed by the timeout collector,
    /// discovered inside a timeout object or observed standalone.
    pub fn on_receive_tc(&mut self, tc: &TimeoutCertificate) -> Result<(), FatalError> {
        debug!(
            cur_view = self.pacemaker.current_view().0,
            tc_view = tc.view.0,
            tc_newest_qc_view = tc.newest_qc.view.0,
            "TC received"
        );
        self.observer.on_tc_constructed(tc);

        let result = if self.pacemaker.process_tc(Some(tc)).is_some() {
            self.propose_if_primary()
        } else {
            debug!("TC did not trigger a view change");
            Ok(())
        };
        self.observer.on_event_processed();
        result
    }

    /// React to the local round deadline: produce and broadcast a timeout
    /// for the current view.
    pub fn on_local_timeout(&mut self) -> Result<(), FatalError> {
        debug!(
            cur_view = self.pacemaker.current_view().0,
            "local timeout fired"
        );
        let result = self.broadcast_timeout_if_authorized();
        self.observer.on_event_processed();
        result
    }

    /// React to a partial TC: catch up on the embedded evidence, then - if
    /// still in the partial TC's view - broadcast this replica's own timeout
    /// even though the round timer has not fired yet.
    pub fn on_partial_tc_created(&mut self, partial: &PartialTcCreated) -> Result<(), FatalError> {
        debug!(
            cur_view = self.pacemaker.current_view().0,
            partial_view = partial.view.0,
            "partial TC received"
        );

        self.on_receive_qc(&partial.newest_qc)?;
        if let Some(tc) = &partial.last_view_tc {
            self.on_receive_tc(tc)?;
        }

        if self.pacemaker.current_view() != partial.view {
            self.observer.on_event_processed();
            return Ok(());
        }

        let result = self.broadcast_timeout_if_authorized();
        self.observer.on_event_processed();
        result
    }

    /// Replay proposals sitting in Forks for views the PaceMaker has not
    /// passed yet. Their QCs and TCs are trusted (Forks validated them), so
    /// processing duplicates is harmless.
    fn process_pending_proposals(&mut self) {
        let newest_view = self.forks.newest_view();
        let mut view = self.pacemaker.current_view();
        loop {
            let active = self.pacemaker.current_view();
            if view < active {
                view = active;
            }
            if view > newest_view {
                return;
            }
            for proposal in self.forks.proposals_for_view(view) {
                self.pacemaker.process_qc(&proposal.block.qc);
                self.pacemaker.process_tc(proposal.last_view_tc.as_ref());
            }
            view = view.next();
        }
    }

    /// Vote for the proposal if it is for the current view and SafetyRules
    /// permits. The vote goes to the next leader, or straight into the local
    /// collector when this replica leads the next view.
    fn process_block_for_current_view(&mut self, proposal: &Proposal) -> Result<(), FatalError> {
        let cur_view = self.pacemaker.current_view();
        let block = &proposal.block;
        if block.view != cur_view {
            // The PaceMaker moved past this proposal while absorbing its
            // certificates; nothing to vote on.
            return Ok(());
        }

        // The compliance layer delivers proposals strictly after their
        // parents, so the next view's epoch must be known.
        let next_leader = self.committee.leader_for_view(cur_view.next()).map_err(|e| {
            FatalError::StateCorruption(format!(
                "cannot resolve leader for next view {}: {e}",
                cur_view.next()
            ))
        })?;

        let parent = if block.qc.is_genesis() {
            None
        } else {
            match self.forks.get_proposal(&block.qc.block_id) {
                Some(parent) => Some(parent),
                None => {
                    // Voting requires the parent: without it the payload's
                    // validity chain is unknown. The compliance layer
                    // guarantees parents arrive first.
                    return Err(FatalError::StateCorruption(format!(
                        "no parent block {:?} for proposal at view {cur_view}",
                        block.qc.block_id
                    )));
                }
            }
        };

        match self
            .safety_rules
            .produce_vote(proposal, parent.as_ref().map(|p| &p.block), cur_view)
        {
            Ok(vote) => {
                if next_leader == self.committee.self_id() {
                    debug!(view = cur_view.0, "feeding own vote to local collector");
                    self.vote_collectors.add_vote(vote);
                } else {
                    debug!(view = cur_view.0, next_leader = ?next_leader, "unicasting own vote");
                    self.observer.on_own_vote(&vote, next_leader);
                }
            }
            Err(no_vote) => {
                // Declining to vote is a normal outcome.
                debug!(view = cur_view.0, reason = %no_vote, "not voting for this block");
            }
        }
        Ok(())
    }

    /// Propose when this replica is the primary for the current view, has
    /// not proposed yet and knows the block its newest QC certifies.
    fn propose_if_primary(&mut self) -> Result<(), FatalError> {
        let start = Instant::now();
        let cur_view = self.pacemaker.current_view();
        let leader = self.committee.leader_for_view(cur_view).map_err(|e| {
            FatalError::StateCorruption(format!(
                "cannot resolve leader for current view {cur_view}: {e}"
            ))
        })?;

        if leader != self.committee.self_id() {
            return Ok(());
        }
        if self
            .forks
            .proposals_for_view(cur_view)
            .iter()
            .any(|p| p.block.proposer_id == self.committee.self_id())
        {
            debug!(view = cur_view.0, "already proposed for current view");
            return Ok(());
        }

        self.observer.on_entering_view(cur_view, leader);
        let newest_qc = self.pacemaker.newest_qc().clone();
        let mut last_view_tc = self.pacemaker.last_view_tc().cloned();

        if !newest_qc.is_genesis() && self.forks.get_proposal(&newest_qc.block_id).is_none() {
            // The newest QC references a block this replica has not synced;
            // without the parent no valid payload can be built on it.
            warn!(
                qc_view = newest_qc.view.0,
                block_id = ?newest_qc.block_id,
                "newest QC's block not yet known; cannot propose"
            );
            return Ok(());
        }

        // The proposal must carry evidence for entering the current view:
        // a QC for the previous view, else a TC for the previous view. Both
        // are processed together, so missing evidence is state corruption.
        if newest_qc.view.next() != cur_view {
            match &last_view_tc {
                None => {
                    return Err(FatalError::StateCorruption(format!(
                        "entered view {cur_view} without QC or TC for the previous view"
                    )));
                }
                Some(tc) if tc.view.next() != cur_view => {
                    return Err(FatalError::StateCorruption(format!(
                        "have QC for view {} and TC for view {} but neither admits view {cur_view}",
                        newest_qc.view, tc.view
                    )));
                }
                Some(_) => {}
            }
        } else {
            // The previous view ended with a QC; including a TC as well
            // would make the proposal invalid.
            last_view_tc = None;
        }

        let proposal = self
            .block_producer
            .make_block_proposal(cur_view, &newest_qc, last_view_tc);
        debug!(
            view = cur_view.0,
            block_id = ?proposal.block.block_id(),
            parent_view = newest_qc.view.0,
            "proposing as leader"
        );

        // Storing the proposal first prevents re-proposing if this replica
        // is asked to propose again for the same view.
        self.forks.add_proposal(&proposal).map_err(|e| {
            FatalError::StateCorruption(format!("own proposal rejected by fork store: {e}"))
        })?;
        self.vote_collectors.add_block(&proposal);

        let delay = self.config.block_rate_delay.saturating_sub(start.elapsed());
        self.observer.on_own_proposal(&proposal, delay);
        Ok(())
    }

    /// Produce a timeout for the current view, feed it to the local
    /// collector and hand it to the observer for broadcast. A no-op when
    /// this replica is not in the active committee.
    fn broadcast_timeout_if_authorized(&mut self) -> Result<(), FatalError> {
        let cur_view = self.pacemaker.current_view();
        let newest_qc = self.pacemaker.newest_qc().clone();
        let mut last_view_tc = self.pacemaker.last_view_tc().cloned();

        if newest_qc.view.next() == cur_view {
            // The previous view ended with both a QC and a TC: only the QC
            // may be included, otherwise the timeout is invalid.
            last_view_tc = None;
        }

        match self
            .safety_rules
            .produce_timeout(cur_view, &newest_qc, last_view_tc.as_ref())
        {
            Ok(timeout) => {
                self.timeout_collectors.add_timeout(timeout.clone());
                self.observer.on_own_timeout(&timeout);
                debug!(view = cur_view.0, "own timeout broadcast");
                Ok(())
            }
            Err(NoTimeoutError::NotCommitteeMember(view)) => {
                warn!(
                    view = view.0,
                    "not in the active committee; no timeout produced"
                );
                Ok(())
            }
            Err(NoTimeoutError::InsufficientEvidence(view)) => {
                // The PaceMaker guarantees its own evidence; failing here
                // means the view/evidence pairing is inconsistent.
                Err(FatalError::StateCorruption(format!(
                    "pacemaker evidence cannot justify a timeout for view {view}"
                )))
            }
        }
    }
}
