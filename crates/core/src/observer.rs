//! Outbound notification surface of the consensus core.

use rondo_types::{
    NodeId, Proposal, QuorumCertificate, TimeoutCertificate, TimeoutObject, View, Vote,
};
use std::time::Duration;

/// Observer of consensus progress and outbound messages.
///
/// The embedding node wires this to its networking and monitoring layers.
/// For liveness an implementation MUST handle at least [`on_own_proposal`],
/// [`on_own_vote`] and [`on_own_timeout`]; everything else is informational
/// and defaults to a no-op.
///
/// Callbacks are invoked from the event-loop task and from collector threads;
/// implementations must be cheap and non-blocking.
///
/// [`on_own_proposal`]: ConsensusObserver::on_own_proposal
/// [`on_own_vote`]: ConsensusObserver::on_own_vote
/// [`on_own_timeout`]: ConsensusObserver::on_own_timeout
#[allow(unused_variables)]
pub trait ConsensusObserver: Send + Sync {
    /// This replica's own proposal, to broadcast after `delay`.
    fn on_own_proposal(&self, proposal: &Proposal, delay: Duration) {}

    /// This replica's own vote, to unicast to the next leader.
    fn on_own_vote(&self, vote: &Vote, next_leader: NodeId) {}

    /// This replica's own timeout object, to broadcast.
    fn on_own_timeout(&self, timeout: &TimeoutObject) {}

    /// A QC was constructed from votes or observed standalone.
    fn on_qc_constructed(&self, view: View, qc: &QuorumCertificate) {}

    /// A TC was constructed from timeouts or observed standalone.
    fn on_tc_constructed(&self, tc: &TimeoutCertificate) {}

    /// f+1 weight of timeouts was collected for a view.
    fn on_partial_tc(&self, view: View) {}

    /// A signer voted for two different blocks at the same view.
    fn on_double_vote(&self, first: &Vote, conflicting: &Vote) {}

    /// A signer produced two conflicting timeouts for the same view.
    fn on_double_timeout(&self, first: &TimeoutObject, conflicting: &TimeoutObject) {}

    /// A vote failed signature verification inside a collector.
    fn on_invalid_vote(&self, vote: &Vote) {}

    /// A timeout failed validation inside a collector.
    fn on_invalid_timeout(&self, timeout: &TimeoutObject) {}

    /// The replica entered a new view with the given leader.
    fn on_entering_view(&self, view: View, leader: NodeId) {}

    /// An event finished processing in the event loop.
    fn on_event_processed(&self) {}
}

/// An observer that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ConsensusObserver for NoopObserver {}
