//! BFT consensus voting core.
//!
//! This crate drives a committee of replicas through a monotonically
//! increasing sequence of views. In each view a designated leader proposes a
//! block; replicas either vote for it, forming a quorum certificate (QC), or
//! time out, forming a timeout certificate (TC).
//!
//! # Architecture
//!
//! - [`EventHandler`]: single-threaded orchestrator reacting to proposals,
//!   certificates, local timeouts and partial-TC notifications. Performs no
//!   crypto and no aggregation.
//! - [`PaceMaker`]: owns the current view, the newest QC/TC and the round
//!   timer. Views advance only on a QC or TC for a view at least as high as
//!   the current one.
//! - [`Validator`]: stateless structural and cryptographic validation of
//!   proposals, votes, QCs and TCs.
//! - [`VoteCollectors`] / [`TimeoutCollectors`]: concurrent aggregators that
//!   turn signed votes and timeouts into certificates and publish
//!   partial-quorum notifications.
//! - [`SafetyRules`]: the durable state preventing equivocation.
//!
//! # Protocol
//!
//! ## Safety
//!
//! - **Single vote per view**: a replica votes at most once per view and
//!   produces at most one timeout, persisted before release.
//! - **Two-chain lock**: a replica only votes for proposals whose embedded
//!   QC is at least its locked view; the lock advances to the grandparent
//!   link of each block it votes for.
//! - **Quorum intersection**: any two supermajority quorums overlap in an
//!   honest replica, so conflicting blocks cannot both be certified.
//!
//! ## Liveness
//!
//! - **Round timer**: each view runs a single-round deadline with
//!   exponential back-off across consecutive timed-out views.
//! - **Timeout certificates**: 2f+1 weight of timeouts forms a TC, which
//!   carries the signers' newest QCs so the next leader extends the highest
//!   certified block.
//! - **Bracha-style amplification**: at f+1 weight of timeouts a replica
//!   broadcasts its own timeout even before its local timer fires.

mod aggregation;
mod config;
mod event_handler;
mod pacemaker;
mod safety_rules;
mod timeout_collector;
mod trackers;
mod validation;
mod verifier;
mod vote_collector;

pub use aggregation::{AggregatorError, TimeoutSignatureAggregator, VoteSignatureAggregator};
pub use config::ConsensusConfig;
pub use event_handler::{EventHandler, FatalError};
pub use pacemaker::{NewViewEvent, PaceMaker, RoundTimeout};
pub use safety_rules::{NoTimeoutError, NoVoteError, SafetyRules};
pub use timeout_collector::{TimeoutCallbacks, TimeoutCollector, TimeoutCollectors};
pub use trackers::{MonotonicCounter, NewestQcTracker, WeightTracker};
pub use validation::{
    InvalidProposalError, InvalidQcError, InvalidTcError, InvalidTimeoutError, InvalidVoteError,
    Validator,
};
pub use verifier::BlsVerifier;
pub use vote_collector::{OnQcConstructed, VoteCollector, VoteCollectors};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
