//! Event types for the consensus event loop.

use rondo_types::{Proposal, QuorumCertificate, TimeoutCertificate, TimeoutObject, View, Vote};

/// Notification that a superminority (f+1 weight) of timeouts has been
/// collected for a view.
///
/// Carries the best recovery evidence observed so far so the receiving
/// replica can catch up before amplifying the timeout.
#[derive(Debug, Clone)]
pub struct PartialTcCreated {
    /// View the partial TC was collected for.
    pub view: View,
    /// Highest QC embedded in the contributing timeouts.
    pub newest_qc: QuorumCertificate,
    /// TC for the previous view, if any contributor carried one.
    pub last_view_tc: Option<TimeoutCertificate>,
}

/// All inputs the event loop can receive.
///
/// Events are **passive data** - they describe something that happened.
/// The loop processes them strictly in FIFO order over the merged stream.
#[derive(Debug, Clone)]
pub enum ConsensusEvent {
    /// A block proposal, pre-validated by the compliance layer.
    Proposal(Box<Proposal>),

    /// A vote destined for this replica's vote collectors.
    Vote(Vote),

    /// A timeout object destined for this replica's timeout collectors.
    Timeout(Box<TimeoutObject>),

    /// A quorum certificate, constructed locally or observed standalone.
    Qc(QuorumCertificate),

    /// A timeout certificate, constructed locally or observed standalone.
    Tc(Box<TimeoutCertificate>),

    /// A collector observed f+1 weight of timeouts for a view.
    PartialTc(Box<PartialTcCreated>),

    /// The round timer fired for the given view.
    LocalTimeout {
        /// The view the timer was armed for; stale fires are dropped.
        view: View,
    },

    /// Drain pending events and stop the loop.
    Shutdown,
}

impl ConsensusEvent {
    /// Get the event type name for telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            ConsensusEvent::Proposal(_) => "Proposal",
            ConsensusEvent::Vote(_) => "Vote",
            ConsensusEvent::Timeout(_) => "Timeout",
            ConsensusEvent::Qc(_) => "Qc",
            ConsensusEvent::Tc(_) => "Tc",
            ConsensusEvent::PartialTc(_) => "PartialTc",
            ConsensusEvent::LocalTimeout { .. } => "LocalTimeout",
            ConsensusEvent::Shutdown => "Shutdown",
        }
    }

    /// Check if this event came off the wire (as opposed to a local timer or
    /// control signal).
    pub fn is_message(&self) -> bool {
        !matches!(
            self,
            ConsensusEvent::LocalTimeout { .. } | ConsensusEvent::Shutdown
        )
    }
}
