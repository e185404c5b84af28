//! Collaborator interfaces provided by the embedding node.

use rondo_types::{
    Hash, Proposal, QuorumCertificate, Signature, TimeoutCertificate, ValidatorInfo, View,
};

/// Durable per-replica safety state.
///
/// Written through [`Persister::put_safety_data`] **before** the vote or
/// timeout that depends on it is released; this is what prevents
/// equivocation across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyData {
    /// Highest view this replica has voted or timed out in.
    pub highest_voted_view: View,
    /// Two-chain lock: the replica only votes for proposals whose embedded
    /// QC is at least this view.
    pub locked_view: View,
}

/// Durable per-replica liveness state, written on every view change.
#[derive(Debug, Clone)]
pub struct LivenessData {
    /// The view the replica is currently in.
    pub current_view: View,
    /// Highest QC the replica has observed.
    pub newest_qc: QuorumCertificate,
    /// TC for `current_view - 1` when the view was entered via timeout.
    pub last_view_tc: Option<TimeoutCertificate>,
}

/// Errors from the fork store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ForksError {
    /// The proposal failed the fork store's validation.
    #[error("invalid proposal: {0}")]
    InvalidProposal(String),

    /// The proposal's parent is unknown to the store.
    #[error("unknown parent block {0:?}")]
    UnknownParent(Hash),
}

/// The block store holding all known, not-yet-finalized proposals.
///
/// Forks performs full proposal validation on insertion; the consensus core
/// trusts a successful `add_proposal`.
pub trait Forks: Send + Sync {
    /// Validate and store a proposal.
    fn add_proposal(&self, proposal: &Proposal) -> Result<(), ForksError>;

    /// Fetch a stored proposal by block identifier.
    fn get_proposal(&self, block_id: &Hash) -> Option<Proposal>;

    /// All stored proposals for a view.
    fn proposals_for_view(&self, view: View) -> Vec<Proposal>;

    /// View of the latest finalized block; proposals below it are stale.
    fn finalized_view(&self) -> View;

    /// Highest view any stored proposal occupies.
    fn newest_view(&self) -> View;
}

/// Produces this replica's block proposals.
///
/// The payload selection is entirely external; the consensus core only
/// supplies the evidence the block must embed.
pub trait BlockProducer: Send + Sync {
    /// Build a signed proposal for `view` on top of `newest_qc`, carrying
    /// `last_view_tc` when the view was entered via timeout.
    fn make_block_proposal(
        &self,
        view: View,
        newest_qc: &QuorumCertificate,
        last_view_tc: Option<TimeoutCertificate>,
    ) -> Proposal;
}

/// Durable storage for safety and liveness records.
///
/// Writes must be atomic and complete before the call returns: the core
/// releases votes and enters views only after the corresponding record is
/// persisted.
pub trait Persister: Send + Sync {
    /// Persist the safety record.
    fn put_safety_data(&self, data: &SafetyData);

    /// Persist the liveness record.
    fn put_liveness_data(&self, data: &LivenessData);
}

/// Errors from signature verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifierError {
    /// The signature does not verify against the given signers.
    #[error("invalid signature")]
    InvalidSignature,

    /// The signature bytes are structurally malformed.
    #[error("malformed signature data: {0}")]
    InvalidFormat(String),
}

/// Signature-only checks over explicit signer sets and signed payloads.
///
/// Structural and membership validation happens in the validator; the
/// verifier is handed already-resolved identities.
pub trait Verifier: Send + Sync {
    /// Verify a single-signer vote signature.
    fn verify_vote(
        &self,
        voter: &ValidatorInfo,
        sig_data: &Signature,
        view: View,
        block_id: &Hash,
    ) -> Result<(), VerifierError>;

    /// Verify a QC's aggregated signature over the shared vote message.
    fn verify_qc(
        &self,
        signers: &[ValidatorInfo],
        sig_data: &Signature,
        view: View,
        block_id: &Hash,
    ) -> Result<(), VerifierError>;

    /// Verify a TC's multi-message aggregated signature; signer `i` signed
    /// `(view, newest_qc_views[i])`.
    fn verify_tc(
        &self,
        signers: &[ValidatorInfo],
        sig_data: &Signature,
        view: View,
        newest_qc_views: &[View],
    ) -> Result<(), VerifierError>;
}
