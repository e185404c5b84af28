//! Test doubles and certificate builders shared across crates.
//!
//! Gated behind the `test-utils` feature so integration harnesses can reuse
//! them without shipping test code in production builds.

use parking_lot::Mutex;
use rondo_core::{
    BlockProducer, ConsensusObserver, Forks, ForksError, LivenessData, Persister, SafetyData,
};
use rondo_types::{
    Block, Hash, KeyPair, NodeId, Proposal, QuorumCertificate, StaticCommittee, TimeoutCertificate,
    TimeoutObject, ValidatorSet, View, Vote,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// A static committee for the replica at `self_index` of `validators`.
pub fn test_committee(self_index: usize, validators: &ValidatorSet) -> Arc<StaticCommittee> {
    let self_id = validators
        .by_index(self_index)
        .expect("self_index within committee")
        .node_id;
    Arc::new(StaticCommittee::new(self_id, validators.clone()))
}

/// Build a fully signed QC for `(view, block_id)` from the listed signers.
pub fn make_qc(
    view: View,
    block_id: Hash,
    validators: &ValidatorSet,
    keys: &[KeyPair],
    signer_indexes: &[usize],
) -> QuorumCertificate {
    let message = rondo_types::vote_message(view, &block_id);
    let mut signer_ids = Vec::with_capacity(signer_indexes.len());
    let mut signatures = Vec::with_capacity(signer_indexes.len());
    for &index in signer_indexes {
        let info = validators.by_index(index).expect("signer index in range");
        signer_ids.push(info.node_id);
        signatures.push(keys[index].sign(&message));
    }
    QuorumCertificate {
        view,
        block_id,
        signer_ids,
        sig_data: rondo_types::Signature::aggregate_bls(&signatures)
            .expect("test signers are all BLS"),
    }
}

/// Build a fully signed TC for `view` where every signer contributes
/// `newest_qc` as its highest certificate.
pub fn make_tc(
    view: View,
    newest_qc: &QuorumCertificate,
    validators: &ValidatorSet,
    keys: &[KeyPair],
    signer_indexes: &[usize],
) -> TimeoutCertificate {
    let message = rondo_types::timeout_message(view, newest_qc.view);
    let mut signer_ids = Vec::with_capacity(signer_indexes.len());
    let mut signatures = Vec::with_capacity(signer_indexes.len());
    for &index in signer_indexes {
        let info = validators.by_index(index).expect("signer index in range");
        signer_ids.push(info.node_id);
        signatures.push(keys[index].sign(&message));
    }
    TimeoutCertificate {
        view,
        newest_qc_views: vec![newest_qc.view; signer_indexes.len()],
        newest_qc: newest_qc.clone(),
        signer_ids,
        sig_data: rondo_types::Signature::aggregate_bls(&signatures)
            .expect("test signers are all BLS"),
    }
}

/// In-memory fork store. Stores proposals without validation; tests control
/// exactly what the handler gets to see.
#[derive(Default)]
pub struct InMemoryForks {
    inner: Mutex<ForksState>,
}

#[derive(Default)]
struct ForksState {
    proposals: HashMap<Hash, Proposal>,
    by_view: BTreeMap<View, Vec<Hash>>,
    finalized_view: View,
}

impl InMemoryForks {
    /// Mark everything below `view` as finalized.
    pub fn set_finalized(&self, view: View) {
        self.inner.lock().finalized_view = view;
    }

    /// Number of stored proposals.
    pub fn len(&self) -> usize {
        self.inner.lock().proposals.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Forks for InMemoryForks {
    fn add_proposal(&self, proposal: &Proposal) -> Result<(), ForksError> {
        let block_id = proposal.block.block_id();
        let mut state = self.inner.lock();
        if state.proposals.insert(block_id, proposal.clone()).is_none() {
            state
                .by_view
                .entry(proposal.block.view)
                .or_default()
                .push(block_id);
        }
        Ok(())
    }

    fn get_proposal(&self, block_id: &Hash) -> Option<Proposal> {
        self.inner.lock().proposals.get(block_id).cloned()
    }

    fn proposals_for_view(&self, view: View) -> Vec<Proposal> {
        let state = self.inner.lock();
        state
            .by_view
            .get(&view)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.proposals.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn finalized_view(&self) -> View {
        self.inner.lock().finalized_view
    }

    fn newest_view(&self) -> View {
        self.inner
            .lock()
            .by_view
            .keys()
            .next_back()
            .copied()
            .unwrap_or(View::GENESIS)
    }
}

/// Block producer emitting empty-payload blocks bound to the given evidence.
pub struct TestBlockProducer {
    self_id: NodeId,
    signing_key: KeyPair,
}

impl TestBlockProducer {
    /// Create a producer signing as `self_id`.
    pub fn new(self_id: NodeId, signing_key: KeyPair) -> Self {
        Self {
            self_id,
            signing_key,
        }
    }
}

impl BlockProducer for TestBlockProducer {
    fn make_block_proposal(
        &self,
        view: View,
        newest_qc: &QuorumCertificate,
        last_view_tc: Option<TimeoutCertificate>,
    ) -> Proposal {
        let payload_hash = Hash::digest(format!("payload-{view}").as_bytes());
        let block = Block::new(view, newest_qc.clone(), self.self_id, payload_hash);
        Proposal::new(block, last_view_tc, &self.signing_key)
    }
}

/// Persister retaining the latest records in memory.
#[derive(Default)]
pub struct MemoryPersister {
    safety: Mutex<Option<SafetyData>>,
    liveness: Mutex<Option<LivenessData>>,
}

impl MemoryPersister {
    /// The last persisted safety record.
    pub fn safety(&self) -> Option<SafetyData> {
        *self.safety.lock()
    }

    /// The last persisted liveness record.
    pub fn liveness(&self) -> Option<LivenessData> {
        self.liveness.lock().clone()
    }
}

impl Persister for MemoryPersister {
    fn put_safety_data(&self, data: &SafetyData) {
        *self.safety.lock() = Some(*data);
    }

    fn put_liveness_data(&self, data: &LivenessData) {
        *self.liveness.lock() = Some(data.clone());
    }
}

/// Observer recording every notification for later assertions.
#[derive(Default)]
pub struct RecordingObserver {
    inner: Mutex<Recorded>,
}

#[derive(Default)]
struct Recorded {
    own_proposals: Vec<(Proposal, Duration)>,
    own_votes: Vec<(Vote, NodeId)>,
    own_timeouts: Vec<TimeoutObject>,
    qcs: Vec<(View, QuorumCertificate)>,
    tcs: Vec<TimeoutCertificate>,
    partial_tcs: Vec<View>,
    double_votes: Vec<(Vote, Vote)>,
    double_timeouts: Vec<(TimeoutObject, TimeoutObject)>,
    invalid_votes: Vec<Vote>,
    invalid_timeouts: Vec<TimeoutObject>,
    entered_views: Vec<(View, NodeId)>,
}

impl RecordingObserver {
    /// Own proposals with their broadcast delays.
    pub fn own_proposals(&self) -> Vec<(Proposal, Duration)> {
        self.inner.lock().own_proposals.clone()
    }

    /// Own votes with their next-leader targets.
    pub fn own_votes(&self) -> Vec<(Vote, NodeId)> {
        self.inner.lock().own_votes.clone()
    }

    /// Own timeouts.
    pub fn own_timeouts(&self) -> Vec<TimeoutObject> {
        self.inner.lock().own_timeouts.clone()
    }

    /// Constructed/observed QCs.
    pub fn qcs(&self) -> Vec<(View, QuorumCertificate)> {
        self.inner.lock().qcs.clone()
    }

    /// Constructed/observed TCs.
    pub fn tcs(&self) -> Vec<TimeoutCertificate> {
        self.inner.lock().tcs.clone()
    }

    /// Views whose partial-TC threshold was reached.
    pub fn partial_tcs(&self) -> Vec<View> {
        self.inner.lock().partial_tcs.clone()
    }

    /// Detected double votes.
    pub fn double_votes(&self) -> Vec<(Vote, Vote)> {
        self.inner.lock().double_votes.clone()
    }

    /// Detected double timeouts.
    pub fn double_timeouts(&self) -> Vec<(TimeoutObject, TimeoutObject)> {
        self.inner.lock().double_timeouts.clone()
    }

    /// Votes rejected inside collectors.
    pub fn invalid_votes(&self) -> Vec<Vote> {
        self.inner.lock().invalid_votes.clone()
    }

    /// Timeouts rejected inside collectors.
    pub fn invalid_timeouts(&self) -> Vec<TimeoutObject> {
        self.inner.lock().invalid_timeouts.clone()
    }

    /// Views entered with their leaders.
    pub fn entered_views(&self) -> Vec<(View, NodeId)> {
        self.inner.lock().entered_views.clone()
    }
}

impl ConsensusObserver for RecordingObserver {
    fn on_own_proposal(&self, proposal: &Proposal, delay: Duration) {
        self.inner.lock().own_proposals.push((proposal.clone(), delay));
    }
    fn on_own_vote(&self, vote: &Vote, next_leader: NodeId) {
        self.inner.lock().own_votes.push((vote.clone(), next_leader));
    }
    fn on_own_timeout(&self, timeout: &TimeoutObject) {
        self.inner.lock().own_timeouts.push(timeout.clone());
    }
    fn on_qc_constructed(&self, view: View, qc: &QuorumCertificate) {
        self.inner.lock().qcs.push((view, qc.clone()));
    }
    fn on_tc_constructed(&self, tc: &TimeoutCertificate) {
        self.inner.lock().tcs.push(tc.clone());
    }
    fn on_partial_tc(&self, view: View) {
        self.inner.lock().partial_tcs.push(view);
    }
    fn on_double_vote(&self, first: &Vote, conflicting: &Vote) {
        self.inner
            .lock()
            .double_votes
            .push((first.clone(), conflicting.clone()));
    }
    fn on_double_timeout(&self, first: &TimeoutObject, conflicting: &TimeoutObject) {
        self.inner
            .lock()
            .double_timeouts
            .push((first.clone(), conflicting.clone()));
    }
    fn on_invalid_vote(&self, vote: &Vote) {
        self.inner.lock().invalid_votes.push(vote.clone());
    }
    fn on_invalid_timeout(&self, timeout: &TimeoutObject) {
        self.inner.lock().invalid_timeouts.push(timeout.clone());
    }
    fn on_entering_view(&self, view: View, leader: NodeId) {
        self.inner.lock().entered_views.push((view, leader));
    }
}
