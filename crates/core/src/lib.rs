//! Core interfaces for rondo consensus.
//!
//! This crate defines the seams between the consensus core and its
//! environment:
//!
//! - [`ConsensusEvent`]: the tagged union the event loop drains
//! - [`ConsensusObserver`]: outbound notifications (own votes, proposals,
//!   timeouts, constructed certificates, diagnostics)
//! - [`Forks`], [`BlockProducer`], [`Persister`], [`Verifier`]: collaborator
//!   interfaces provided by the embedding node
//!
//! # Architecture
//!
//! A single event-loop task owns the EventHandler and PaceMaker. Concurrent
//! collectors aggregate votes and timeouts, posting constructed certificates
//! back into the loop as [`ConsensusEvent`]s. Collectors never name the
//! EventHandler type; the callback set is passed at construction.

mod event;
mod observer;
mod traits;

pub use event::{ConsensusEvent, PartialTcCreated};
pub use observer::{ConsensusObserver, NoopObserver};
pub use traits::{
    BlockProducer, Forks, ForksError, LivenessData, Persister, SafetyData, Verifier, VerifierError,
};
