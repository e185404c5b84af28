//! Concurrent vote collection and QC construction.
//!
//! One [`VoteCollector`] serves one view; the [`VoteCollectors`] registry
//! creates collectors lazily, routes votes by view and prunes everything
//! below the finalized view. Collectors may be invoked from any number of
//! threads; constructed QCs are handed to a callback so collectors never
//! name the event-handler type.

use crate::aggregation::{AggregatorError, VoteSignatureAggregator};
use crate::trackers::WeightTracker;
use parking_lot::Mutex;
use rondo_core::ConsensusObserver;
use rondo_types::{Committee, CommitteeError, Hash, Proposal, QuorumCertificate, View, Vote};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Callback invoked with each QC constructed from votes.
pub type OnQcConstructed = dyn Fn(QuorumCertificate) + Send + Sync;

/// Per-block aggregation state within one view.
struct BlockVotes {
    aggregator: VoteSignatureAggregator,
    qc_tracker: WeightTracker,
}

/// Collects and aggregates votes for a single view.
///
/// Deduplicates by signer, detects double voting across blocks of the view
/// and emits at most one QC per `(view, block_id)` via the one-shot weight
/// tracker, even under concurrent `add_vote` calls.
pub struct VoteCollector {
    view: View,
    quorum_threshold: rondo_types::Weight,
    validators: rondo_types::ValidatorSet,
    observer: Arc<dyn ConsensusObserver>,
    on_qc: Arc<OnQcConstructed>,
    /// First vote seen per signer; the basis for equivocation detection.
    votes_cache: Mutex<HashMap<rondo_types::NodeId, Vote>>,
    /// Aggregation state per block id.
    blocks: Mutex<HashMap<Hash, Arc<BlockVotes>>>,
}

impl VoteCollector {
    /// Create a collector for `view`, snapshotting the committee active at
    /// that view.
    pub fn new(
        view: View,
        committee: &Arc<dyn Committee>,
        observer: Arc<dyn ConsensusObserver>,
        on_qc: Arc<OnQcConstructed>,
    ) -> Result<Self, CommitteeError> {
        let validators = committee.validators_by_epoch(view)?.clone();
        let quorum_threshold = committee.quorum_threshold_for_view(view)?;
        Ok(Self {
            view,
            quorum_threshold,
            validators,
            observer,
            on_qc,
            votes_cache: Mutex::new(HashMap::new()),
            blocks: Mutex::new(HashMap::new()),
        })
    }

    /// The view this collector serves.
    pub fn view(&self) -> View {
        self.view
    }

    /// Add a vote. Externally received votes are assumed validated by the
    /// compliance layer; the signature is nevertheless verified during
    /// aggregation so a forged vote can never reach a QC.
    pub fn add_vote(&self, vote: Vote) {
        debug_assert_eq!(vote.view, self.view, "registry routes votes by view");

        {
            let mut cache = self.votes_cache.lock();
            match cache.entry(vote.signer_id) {
                Entry::Occupied(entry) => {
                    let first = entry.get();
                    if first.block_id == vote.block_id {
                        trace!(signer = ?vote.signer_id, view = self.view.0, "repeated vote dropped");
                        return;
                    }
                    warn!(
                        signer = ?vote.signer_id,
                        view = self.view.0,
                        first_block = ?first.block_id,
                        second_block = ?vote.block_id,
                        "double vote detected"
                    );
                    self.observer.on_double_vote(first, &vote);
                    return;
                }
                Entry::Vacant(entry) => {
                    entry.insert(vote.clone());
                }
            }
        }

        let block_votes = {
            let mut blocks = self.blocks.lock();
            blocks
                .entry(vote.block_id)
                .or_insert_with(|| {
                    Arc::new(BlockVotes {
                        aggregator: VoteSignatureAggregator::new(
                            self.view,
                            vote.block_id,
                            self.validators.clone(),
                        ),
                        qc_tracker: WeightTracker::new(self.quorum_threshold),
                    })
                })
                .clone()
        };

        // Signature verification runs outside the collector locks; the
        // aggregator carries its own synchronization.
        match block_votes
            .aggregator
            .verify_and_add(vote.signer_id, vote.sig_data.clone())
        {
            Ok(weight) => {
                if block_votes.qc_tracker.track(weight) {
                    self.build_qc(&block_votes, vote.block_id);
                }
            }
            Err(AggregatorError::DuplicateSigner(signer)) => {
                // Two copies of the same vote raced past the cache check.
                trace!(signer = ?signer, view = self.view.0, "concurrent duplicate ignored");
            }
            Err(e) => {
                warn!(signer = ?vote.signer_id, view = self.view.0, error = %e, "invalid vote");
                self.observer.on_invalid_vote(&vote);
                // Forget the cached entry so a correct copy of this signer's
                // vote can still be counted.
                self.votes_cache.lock().remove(&vote.signer_id);
            }
        }
    }

    /// Assemble the QC once the quorum tracker has fired. Runs on exactly
    /// one thread per `(view, block_id)`.
    fn build_qc(&self, block_votes: &BlockVotes, block_id: Hash) {
        match block_votes.aggregator.aggregate() {
            Ok((signer_ids, sig_data)) => {
                let qc = QuorumCertificate {
                    view: self.view,
                    block_id,
                    signer_ids,
                    sig_data,
                };
                debug!(view = self.view.0, block_id = ?block_id, "QC constructed from votes");
                (self.on_qc)(qc);
            }
            Err(e) => {
                // Every aggregated signature was individually verified, so
                // aggregation itself cannot fail on honest input.
                warn!(view = self.view.0, error = %e, "QC aggregation failed");
            }
        }
    }
}

/// Registry of per-view vote collectors.
///
/// Owns each collector exclusively; callers interact through the registry
/// only. Each `(view, block_id)` reports its QC exactly once through the
/// per-block one-shot tracker, independent of other views' delivery order;
/// the PaceMaker absorbs stale QCs on its own.
pub struct VoteCollectors {
    committee: Arc<dyn Committee>,
    observer: Arc<dyn ConsensusObserver>,
    on_qc: Arc<OnQcConstructed>,
    inner: Mutex<RegistryState>,
}

struct RegistryState {
    collectors: BTreeMap<View, Arc<VoteCollector>>,
    lowest_retained_view: View,
}

impl VoteCollectors {
    /// Create the registry.
    pub fn new(
        committee: Arc<dyn Committee>,
        observer: Arc<dyn ConsensusObserver>,
        on_qc: Arc<OnQcConstructed>,
    ) -> Self {
        Self {
            committee,
            observer,
            on_qc,
            inner: Mutex::new(RegistryState {
                collectors: BTreeMap::new(),
                lowest_retained_view: View::GENESIS,
            }),
        }
    }

    /// Register a proposal so votes for its block can be aggregated.
    pub fn add_block(&self, proposal: &Proposal) {
        let view = proposal.block.view;
        let _ = self.collector_for(view);
    }

    /// Route a vote to its view's collector.
    pub fn add_vote(&self, vote: Vote) {
        if let Some(collector) = self.collector_for(vote.view) {
            collector.add_vote(vote);
        }
    }

    /// Drop all collectors below `view` and reject future votes below it.
    pub fn prune_up_to_view(&self, view: View) {
        let mut state = self.inner.lock();
        if view <= state.lowest_retained_view {
            return;
        }
        state.lowest_retained_view = view;
        state.collectors.retain(|v, _| *v >= view);
        trace!(lowest_retained_view = view.0, "vote collectors pruned");
    }

    fn collector_for(&self, view: View) -> Option<Arc<VoteCollector>> {
        let mut state = self.inner.lock();
        if view < state.lowest_retained_view {
            trace!(
                view = view.0,
                lowest = state.lowest_retained_view.0,
                "vote below retained range dropped"
            );
            return None;
        }
        if let Some(existing) = state.collectors.get(&view) {
            return Some(existing.clone());
        }
        match VoteCollector::new(
            view,
            &self.committee,
            self.observer.clone(),
            self.on_qc.clone(),
        ) {
            Ok(collector) => {
                let collector = Arc::new(collector);
                state.collectors.insert(view, collector.clone());
                Some(collector)
            }
            Err(e) => {
                warn!(view = view.0, error = %e, "cannot create vote collector");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_committee;
    use rondo_types::test_utils::{test_node, test_validators};
    use rondo_types::{KeyPair, NodeId, Signature};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    struct Recording {
        qcs: Mutex<Vec<QuorumCertificate>>,
        double_votes: AtomicUsize,
        invalid_votes: AtomicUsize,
    }

    impl Default for Recording {
        fn default() -> Self {
            Self {
                qcs: Mutex::new(Vec::new()),
                double_votes: AtomicUsize::new(0),
                invalid_votes: AtomicUsize::new(0),
            }
        }
    }

    impl ConsensusObserver for Recording {
        fn on_double_vote(&self, _first: &Vote, _conflicting: &Vote) {
            self.double_votes.fetch_add(1, Ordering::SeqCst);
        }
        fn on_invalid_vote(&self, _vote: &Vote) {
            self.invalid_votes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn make_registry() -> (Vec<KeyPair>, Arc<Recording>, VoteCollectors) {
        let (keys, validators) = test_validators(4);
        let committee = test_committee(0, &validators);
        let recording = Arc::new(Recording::default());
        let sink = recording.clone();
        let on_qc: Arc<OnQcConstructed> = Arc::new(move |qc| sink.qcs.lock().push(qc));
        let registry = VoteCollectors::new(committee, recording.clone(), on_qc);
        (keys, recording, registry)
    }

    fn vote_from(keys: &[KeyPair], index: u8, view: u64, block_id: Hash) -> Vote {
        Vote::new(block_id, View(view), test_node(index), &keys[index as usize])
    }

    #[traced_test]
    #[test]
    fn test_quorum_emits_qc_exactly_once() {
        let (keys, recording, registry) = make_registry();
        let block_id = Hash::digest(b"b5");

        registry.add_vote(vote_from(&keys, 0, 5, block_id));
        registry.add_vote(vote_from(&keys, 1, 5, block_id));
        assert!(recording.qcs.lock().is_empty());

        registry.add_vote(vote_from(&keys, 2, 5, block_id));
        {
            let qcs = recording.qcs.lock();
            assert_eq!(qcs.len(), 1);
            assert_eq!(qcs[0].view, View(5));
            assert_eq!(qcs[0].block_id, block_id);
            assert_eq!(qcs[0].signer_ids.len(), 3);
        }

        // The fourth vote must not re-emit.
        registry.add_vote(vote_from(&keys, 3, 5, block_id));
        assert_eq!(recording.qcs.lock().len(), 1);
    }

    #[traced_test]
    #[test]
    fn test_double_vote_detected_and_not_counted() {
        let (keys, recording, registry) = make_registry();
        let block_a = Hash::digest(b"a");
        let block_b = Hash::digest(b"b");

        registry.add_vote(vote_from(&keys, 0, 11, block_a));
        registry.add_vote(vote_from(&keys, 1, 11, block_a));

        // Replica 2 equivocates: first for A, then for B.
        registry.add_vote(vote_from(&keys, 2, 11, block_a));
        registry.add_vote(vote_from(&keys, 2, 11, block_b));

        assert_eq!(recording.double_votes.load(Ordering::SeqCst), 1);
        // The equivocating vote for B contributes nothing towards B.
        assert!(recording
            .qcs
            .lock()
            .iter()
            .all(|qc| qc.block_id != block_b));
    }

    #[traced_test]
    #[test]
    fn test_repeated_vote_is_silent() {
        let (keys, recording, registry) = make_registry();
        let block_id = Hash::digest(b"b");

        let vote = vote_from(&keys, 1, 5, block_id);
        registry.add_vote(vote.clone());
        registry.add_vote(vote);

        assert_eq!(recording.double_votes.load(Ordering::SeqCst), 0);
        assert!(recording.qcs.lock().is_empty());
    }

    #[traced_test]
    #[test]
    fn test_forged_signature_reported() {
        let (keys, recording, registry) = make_registry();
        let block_id = Hash::digest(b"b");

        let mut forged = vote_from(&keys, 1, 5, block_id);
        forged.sig_data = Signature::zero();
        registry.add_vote(forged);

        assert_eq!(recording.invalid_votes.load(Ordering::SeqCst), 1);

        // A correct copy from the same signer is still counted afterwards.
        registry.add_vote(vote_from(&keys, 1, 5, block_id));
        registry.add_vote(vote_from(&keys, 0, 5, block_id));
        registry.add_vote(vote_from(&keys, 2, 5, block_id));
        assert_eq!(recording.qcs.lock().len(), 1);
    }

    #[traced_test]
    #[test]
    fn test_votes_below_pruned_bound_rejected() {
        let (keys, recording, registry) = make_registry();
        registry.prune_up_to_view(View(10));

        let block_id = Hash::digest(b"old");
        for i in 0..3 {
            registry.add_vote(vote_from(&keys, i, 9, block_id));
        }
        assert!(recording.qcs.lock().is_empty());
    }

    #[traced_test]
    #[test]
    fn test_outsider_vote_rejected() {
        let (_, recording, registry) = make_registry();
        let outsider_key = rondo_types::test_utils::test_keypair(9);
        let vote = Vote::new(
            Hash::digest(b"b"),
            View(5),
            NodeId([9u8; 32]),
            &outsider_key,
        );
        registry.add_vote(vote);
        assert_eq!(recording.invalid_votes.load(Ordering::SeqCst), 1);
    }

    #[traced_test]
    #[test]
    fn test_late_quorum_for_older_view_still_reported() {
        let (keys, recording, registry) = make_registry();

        // Quorum at view 6 first.
        let block6 = Hash::digest(b"b6");
        for i in 0..3 {
            registry.add_vote(vote_from(&keys, i, 6, block6));
        }
        // A straggler quorum at view 5 completes afterwards; it is a
        // distinct (view, block) and must be reported exactly once too.
        let block5 = Hash::digest(b"b5");
        for i in 0..3 {
            registry.add_vote(vote_from(&keys, i, 5, block5));
        }

        let qcs = recording.qcs.lock();
        assert_eq!(qcs.len(), 2);
        assert_eq!(qcs[0].view, View(6));
        assert_eq!(qcs[1].view, View(5));
        assert_eq!(qcs[1].block_id, block5);
    }

    #[traced_test]
    #[test]
    fn test_concurrent_votes_single_qc() {
        let (keys, recording, registry) = make_registry();
        let registry = Arc::new(registry);
        let block_id = Hash::digest(b"concurrent");

        let handles: Vec<_> = (0..4u8)
            .map(|i| {
                let registry = registry.clone();
                let vote = vote_from(&keys, i, 5, block_id);
                std::thread::spawn(move || registry.add_vote(vote))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(recording.qcs.lock().len(), 1);
    }

    #[traced_test]
    #[test]
    fn test_add_block_registers_collector() {
        let (keys, _, registry) = make_registry();
        let block = rondo_types::Block::new(
            View(5),
            QuorumCertificate::genesis(),
            test_node(1),
            Hash::digest(b"p"),
        );
        let proposal = Proposal::new(block, None, &keys[1]);
        registry.add_block(&proposal);

        assert!(registry.inner.lock().collectors.contains_key(&View(5)));
    }
}
