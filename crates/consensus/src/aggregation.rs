//! Signature aggregators for vote and timeout collection.
//!
//! Both aggregators verify each contribution against the committee snapshot
//! taken at construction and keep a running weight total behind their own
//! lock, so callers never hold a collector-wide lock across crypto work.

use parking_lot::Mutex;
use rondo_types::{
    timeout_message, vote_message, AggregateError, Hash, NodeId, Signature, ValidatorSet, View,
    Weight,
};
use std::collections::BTreeMap;

/// Errors from adding a signature to an aggregator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AggregatorError {
    /// The signer is not a member of the committee snapshot.
    #[error("signer {0:?} is not in the committee")]
    InvalidSigner(NodeId),

    /// The signer already contributed.
    #[error("signer {0:?} already contributed a signature")]
    DuplicateSigner(NodeId),

    /// The signature does not verify.
    #[error("invalid signature from {0:?}")]
    InvalidSignature(NodeId),

    /// Final aggregation failed.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

/// Aggregates same-message signatures into a QC's signature.
///
/// Every signer signs the identical vote message for `(view, block_id)`.
#[derive(Debug)]
pub struct VoteSignatureAggregator {
    view: View,
    block_id: Hash,
    message: Vec<u8>,
    validators: ValidatorSet,
    inner: Mutex<AggregatorState<Signature>>,
}

#[derive(Debug)]
struct AggregatorState<T> {
    contributions: BTreeMap<NodeId, T>,
    total_weight: Weight,
}

impl<T> Default for AggregatorState<T> {
    fn default() -> Self {
        Self {
            contributions: BTreeMap::new(),
            total_weight: Weight::ZERO,
        }
    }
}

impl VoteSignatureAggregator {
    /// Create an aggregator for votes on `block_id` at `view`, against the
    /// committee active at that view.
    pub fn new(view: View, block_id: Hash, validators: ValidatorSet) -> Self {
        Self {
            view,
            block_id,
            message: vote_message(view, &block_id),
            validators,
            inner: Mutex::new(AggregatorState::default()),
        }
    }

    /// The view this aggregator serves.
    pub fn view(&self) -> View {
        self.view
    }

    /// The block this aggregator serves.
    pub fn block_id(&self) -> Hash {
        self.block_id
    }

    /// Verify one signature and add it. Returns the new total weight.
    pub fn verify_and_add(
        &self,
        signer_id: NodeId,
        sig_data: Signature,
    ) -> Result<Weight, AggregatorError> {
        let info = self
            .validators
            .get(&signer_id)
            .ok_or(AggregatorError::InvalidSigner(signer_id))?;

        // Crypto outside the lock: verification dominates, insertion is cheap.
        if !info.public_key.verify(&self.message, &sig_data) {
            return Err(AggregatorError::InvalidSignature(signer_id));
        }

        let mut state = self.inner.lock();
        if state.contributions.contains_key(&signer_id) {
            return Err(AggregatorError::DuplicateSigner(signer_id));
        }
        state.contributions.insert(signer_id, sig_data);
        state.total_weight += info.weight;
        Ok(state.total_weight)
    }

    /// Total weight accumulated so far.
    pub fn total_weight(&self) -> Weight {
        self.inner.lock().total_weight
    }

    /// Aggregate all contributions into `(signer_ids, aggregated_sig)`.
    pub fn aggregate(&self) -> Result<(Vec<NodeId>, Signature), AggregatorError> {
        let state = self.inner.lock();
        let signer_ids: Vec<NodeId> = state.contributions.keys().copied().collect();
        let signatures: Vec<Signature> = state.contributions.values().cloned().collect();
        let aggregated = Signature::aggregate_bls(&signatures)?;
        Ok((signer_ids, aggregated))
    }
}

/// Aggregates multi-message signatures into a TC's signature.
///
/// Signer `i` signs the timeout message for `(view, newest_qc_views[i])`,
/// committing to its own newest-QC view.
#[derive(Debug)]
pub struct TimeoutSignatureAggregator {
    view: View,
    validators: ValidatorSet,
    inner: Mutex<AggregatorState<(View, Signature)>>,
}

impl TimeoutSignatureAggregator {
    /// Create an aggregator for timeouts of `view`, against the committee
    /// active at that view.
    pub fn new(view: View, validators: ValidatorSet) -> Self {
        Self {
            view,
            validators,
            inner: Mutex::new(AggregatorState::default()),
        }
    }

    /// The view this aggregator serves.
    pub fn view(&self) -> View {
        self.view
    }

    /// Verify one timeout signature and add it. Returns the new total weight.
    pub fn verify_and_add(
        &self,
        signer_id: NodeId,
        sig_data: Signature,
        newest_qc_view: View,
    ) -> Result<Weight, AggregatorError> {
        let info = self
            .validators
            .get(&signer_id)
            .ok_or(AggregatorError::InvalidSigner(signer_id))?;

        let message = timeout_message(self.view, newest_qc_view);
        if !info.public_key.verify(&message, &sig_data) {
            return Err(AggregatorError::InvalidSignature(signer_id));
        }

        let mut state = self.inner.lock();
        if state.contributions.contains_key(&signer_id) {
            return Err(AggregatorError::DuplicateSigner(signer_id));
        }
        state
            .contributions
            .insert(signer_id, (newest_qc_view, sig_data));
        state.total_weight += info.weight;
        Ok(state.total_weight)
    }

    /// Total weight accumulated so far.
    pub fn total_weight(&self) -> Weight {
        self.inner.lock().total_weight
    }

    /// Aggregate all contributions into
    /// `(signer_ids, newest_qc_views, aggregated_sig)`, index-aligned.
    pub fn aggregate(&self) -> Result<(Vec<NodeId>, Vec<View>, Signature), AggregatorError> {
        let state = self.inner.lock();
        let signer_ids: Vec<NodeId> = state.contributions.keys().copied().collect();
        let newest_qc_views: Vec<View> =
            state.contributions.values().map(|(view, _)| *view).collect();
        let signatures: Vec<Signature> = state
            .contributions
            .values()
            .map(|(_, sig)| sig.clone())
            .collect();
        let aggregated = Signature::aggregate_bls(&signatures)?;
        Ok((signer_ids, newest_qc_views, aggregated))
    }
}
