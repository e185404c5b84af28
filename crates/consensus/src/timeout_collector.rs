//! Concurrent timeout collection, partial-TC detection and TC construction.
//!
//! One [`TimeoutCollector`] serves one view. Two one-shot events are
//! surfaced per view: a partial TC at f+1 weight (the amplification
//! threshold) and the TC itself at quorum weight. The collector also
//! reports every newly seen highest QC and TC embedded in timeout objects,
//! so the PaceMaker receives the freshest evidence even when it only ever
//! appears inside timeouts.

use crate::aggregation::{AggregatorError, TimeoutSignatureAggregator};
use crate::trackers::{MonotonicCounter, NewestQcTracker, WeightTracker};
use crate::validation::Validator;
use parking_lot::Mutex;
use rondo_core::{ConsensusObserver, PartialTcCreated};
use rondo_types::{
    Committee, CommitteeError, NodeId, QuorumCertificate, TimeoutCertificate, TimeoutObject, View,
};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Callback set handed to the timeout collectors at construction.
///
/// Keeps the collector ignorant of the event-handler type; the runtime wires
/// these to post events into the loop.
#[derive(Clone)]
pub struct TimeoutCallbacks {
    /// Fired once per view at f+1 weight.
    pub on_partial_tc: Arc<dyn Fn(PartialTcCreated) + Send + Sync>,
    /// Fired once per view with the constructed TC.
    pub on_tc: Arc<dyn Fn(TimeoutCertificate) + Send + Sync>,
    /// Fired for each newly seen highest QC embedded in a timeout.
    pub on_new_qc: Arc<dyn Fn(QuorumCertificate) + Send + Sync>,
    /// Fired for each newly seen highest TC embedded in a timeout.
    pub on_new_tc: Arc<dyn Fn(TimeoutCertificate) + Send + Sync>,
}

impl TimeoutCallbacks {
    /// Callbacks that discard every notification (tests, standalone use).
    pub fn noop() -> Self {
        Self {
            on_partial_tc: Arc::new(|_| {}),
            on_tc: Arc::new(|_| {}),
            on_new_qc: Arc::new(|_| {}),
            on_new_tc: Arc::new(|_| {}),
        }
    }
}

/// Collects and aggregates timeout objects for a single view.
pub struct TimeoutCollector {
    view: View,
    observer: Arc<dyn ConsensusObserver>,
    validator: Arc<Validator>,
    callbacks: TimeoutCallbacks,
    aggregator: TimeoutSignatureAggregator,
    partial_tracker: WeightTracker,
    tc_tracker: WeightTracker,
    newest_qc_tracker: NewestQcTracker,
    /// First timeout seen per signer, for equivocation detection.
    cache: Mutex<HashMap<NodeId, TimeoutObject>>,
    newest_reported_qc: MonotonicCounter,
    newest_reported_tc: MonotonicCounter,
}

impl TimeoutCollector {
    /// Create a collector for `view`, snapshotting the committee active at
    /// that view. The partial threshold is f+1 computed from the view's
    /// total weight; the TC threshold is the quorum.
    pub fn new(
        view: View,
        committee: &Arc<dyn Committee>,
        validator: Arc<Validator>,
        observer: Arc<dyn ConsensusObserver>,
        callbacks: TimeoutCallbacks,
    ) -> Result<Self, CommitteeError> {
        let validators = committee.validators_by_epoch(view)?.clone();
        let partial_threshold = committee.timeout_threshold_for_view(view)?;
        let quorum_threshold = committee.quorum_threshold_for_view(view)?;
        Ok(Self {
            view,
            observer,
            validator,
            callbacks,
            aggregator: TimeoutSignatureAggregator::new(view, validators),
            partial_tracker: WeightTracker::new(partial_threshold),
            tc_tracker: WeightTracker::new(quorum_threshold),
            newest_qc_tracker: NewestQcTracker::new(),
            cache: Mutex::new(HashMap::new()),
            newest_reported_qc: MonotonicCounter::new(0),
            newest_reported_tc: MonotonicCounter::new(0),
        })
    }

    /// The view this collector serves.
    pub fn view(&self) -> View {
        self.view
    }

    /// Add a timeout object: dedup, validate, aggregate, and fire the
    /// partial-TC and TC events when their thresholds are crossed.
    pub fn add_timeout(&self, timeout: TimeoutObject) {
        debug_assert_eq!(timeout.view, self.view, "registry routes timeouts by view");

        {
            let mut cache = self.cache.lock();
            match cache.entry(timeout.signer_id) {
                Entry::Occupied(entry) => {
                    let first = entry.get();
                    if first == &timeout {
                        trace!(signer = ?timeout.signer_id, view = self.view.0, "repeated timeout dropped");
                    } else {
                        warn!(
                            signer = ?timeout.signer_id,
                            view = self.view.0,
                            "double timeout detected"
                        );
                        self.observer.on_double_timeout(first, &timeout);
                    }
                    return;
                }
                Entry::Vacant(entry) => {
                    entry.insert(timeout.clone());
                }
            }
        }

        // Once the TC exists, additional timeouts carry no new information
        // for this view; only the evidence reporting below still matters.
        if !self.tc_tracker.done() {
            if let Err(e) = self.validator.validate_timeout(&timeout) {
                warn!(signer = ?timeout.signer_id, view = self.view.0, error = %e, "invalid timeout");
                self.observer.on_invalid_timeout(&timeout);
                self.cache.lock().remove(&timeout.signer_id);
                return;
            }

            match self.aggregator.verify_and_add(
                timeout.signer_id,
                timeout.sig_data.clone(),
                timeout.newest_qc.view,
            ) {
                Ok(weight) => {
                    self.newest_qc_tracker.track(&timeout.newest_qc);

                    if self.partial_tracker.track(weight) {
                        debug!(view = self.view.0, weight = weight.0, "partial TC threshold reached");
                        self.observer.on_partial_tc(self.view);
                        (self.callbacks.on_partial_tc)(PartialTcCreated {
                            view: self.view,
                            newest_qc: self
                                .newest_qc_tracker
                                .newest_qc()
                                .unwrap_or_else(|| timeout.newest_qc.clone()),
                            last_view_tc: timeout.last_view_tc.clone(),
                        });
                    }

                    if self.tc_tracker.track(weight) {
                        self.build_tc(weight);
                    }
                }
                Err(AggregatorError::DuplicateSigner(signer)) => {
                    trace!(signer = ?signer, view = self.view.0, "concurrent duplicate ignored");
                    return;
                }
                Err(e) => {
                    warn!(signer = ?timeout.signer_id, view = self.view.0, error = %e, "invalid timeout signature");
                    self.observer.on_invalid_timeout(&timeout);
                    self.cache.lock().remove(&timeout.signer_id);
                    return;
                }
            }
        }

        // Surface newly seen highest evidence carried inside the timeout.
        if self.newest_reported_qc.set(timeout.newest_qc.view.0) {
            (self.callbacks.on_new_qc)(timeout.newest_qc.clone());
        }
        if let Some(tc) = &timeout.last_view_tc {
            if self.newest_reported_tc.set(tc.view.0) {
                (self.callbacks.on_new_tc)(tc.clone());
            }
        }
    }

    /// Assemble the TC once the quorum tracker has fired. Runs on exactly
    /// one thread per view.
    fn build_tc(&self, weight: rondo_types::Weight) {
        let Some(newest_qc) = self.newest_qc_tracker.newest_qc() else {
            // Every aggregated timeout tracked its QC first; an empty
            // tracker here would mean the aggregator accepted nothing.
            warn!(view = self.view.0, "TC threshold crossed without any tracked QC");
            return;
        };
        match self.aggregator.aggregate() {
            Ok((signer_ids, newest_qc_views, sig_data)) => {
                let tc = TimeoutCertificate {
                    view: self.view,
                    newest_qc_views,
                    newest_qc,
                    signer_ids,
                    sig_data,
                };
                debug!(view = self.view.0, weight = weight.0, "TC constructed from timeouts");
                (self.callbacks.on_tc)(tc);
            }
            Err(e) => {
                warn!(view = self.view.0, error = %e, "TC aggregation failed");
            }
        }
    }
}

/// Registry of per-view timeout collectors.
pub struct TimeoutCollectors {
    committee: Arc<dyn Committee>,
    validator: Arc<Validator>,
    observer: Arc<dyn ConsensusObserver>,
    callbacks: TimeoutCallbacks,
    inner: Mutex<RegistryState>,
}

struct RegistryState {
    collectors: BTreeMap<View, Arc<TimeoutCollector>>,
    lowest_retained_view: View,
}

impl TimeoutCollectors {
    /// Create the registry.
    pub fn new(
        committee: Arc<dyn Committee>,
        validator: Arc<Validator>,
        observer: Arc<dyn ConsensusObserver>,
        callbacks: TimeoutCallbacks,
    ) -> Self {
        Self {
            committee,
            validator,
            observer,
            callbacks,
            inner: Mutex::new(RegistryState {
                collectors: BTreeMap::new(),
                lowest_retained_view: View::GENESIS,
            }),
        }
    }

    /// Route a timeout to its view's collector, creating it lazily.
    pub fn add_timeout(&self, timeout: TimeoutObject) {
        if let Some(collector) = self.collector_for(timeout.view) {
            collector.add_timeout(timeout);
        }
    }

    /// Drop all collectors below `view` and reject future timeouts below it.
    pub fn prune_up_to_view(&self, view: View) {
        let mut state = self.inner.lock();
        if view <= state.lowest_retained_view {
            return;
        }
        state.lowest_retained_view = view;
        state.collectors.retain(|v, _| *v >= view);
        trace!(lowest_retained_view = view.0, "timeout collectors pruned");
    }

    fn collector_for(&self, view: View) -> Option<Arc<TimeoutCollector>> {
        let mut state = self.inner.lock();
        if view < state.lowest_retained_view {
            trace!(
                view = view.0,
                lowest = state.lowest_retained_view.0,
                "timeout below retained range dropped"
            );
            return None;
        }
        if let Some(existing) = state.collectors.get(&view) {
            return Some(existing.clone());
        }
        match TimeoutCollector::new(
            view,
            &self.committee,
            self.validator.clone(),
            self.observer.clone(),
            self.callbacks.clone(),
        ) {
            Ok(collector) => {
                let collector = Arc::new(collector);
                state.collectors.insert(view, collector.clone());
                Some(collector)
            }
            Err(e) => {
                warn!(view = view.0, error = %e, "cannot create timeout collector");
                None
            }
        }
    }
}
