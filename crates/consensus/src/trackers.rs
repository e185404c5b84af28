//! Concurrency-safe one-shot and monotonic trackers used by the collectors.

use parking_lot::RwLock;
use rondo_types::{QuorumCertificate, Weight};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Tracks the one-time event of accumulated weight reaching a threshold.
///
/// Safe to call from any number of threads; exactly one caller observes the
/// crossing.
#[derive(Debug)]
pub struct WeightTracker {
    min_required_weight: Weight,
    done: AtomicBool,
}

impl WeightTracker {
    /// Create a tracker firing at `min_required_weight`.
    pub fn new(min_required_weight: Weight) -> Self {
        Self {
            min_required_weight,
            done: AtomicBool::new(false),
        }
    }

    /// Whether the threshold has already been reached.
    pub fn done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Record the current accumulated weight. Returns true exactly once,
    /// for the call that first reaches the threshold.
    pub fn track(&self, weight: Weight) -> bool {
        if weight < self.min_required_weight {
            return false;
        }
        self.done
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Keeps the highest QC (by view) seen so far.
///
/// Readers take a cheap snapshot first; the write lock is only contended on
/// an actual improvement.
#[derive(Debug, Default)]
pub struct NewestQcTracker {
    newest_qc: RwLock<Option<QuorumCertificate>>,
}

impl NewestQcTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the tracked QC if `qc` is newer (by view). Returns true when
    /// the update was installed.
    pub fn track(&self, qc: &QuorumCertificate) -> bool {
        {
            let current = self.newest_qc.read();
            if let Some(existing) = current.as_ref() {
                if existing.view >= qc.view {
                    return false;
                }
            }
        }
        let mut guard = self.newest_qc.write();
        match guard.as_ref() {
            Some(existing) if existing.view >= qc.view => false,
            _ => {
                *guard = Some(qc.clone());
                true
            }
        }
    }

    /// The newest QC tracked so far.
    pub fn newest_qc(&self) -> Option<QuorumCertificate> {
        self.newest_qc.read().clone()
    }
}

/// Strictly monotonic counter with an atomic compare-and-swap loop.
///
/// `set` succeeds only for values strictly greater than the current one, so
/// concurrent reporters publish each value at most once.
#[derive(Debug, Default)]
pub struct MonotonicCounter(AtomicU64);

impl MonotonicCounter {
    /// Create a counter starting at `initial`.
    pub fn new(initial: u64) -> Self {
        Self(AtomicU64::new(initial))
    }

    /// Current value.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Install `value` if it is strictly greater than the current value.
    /// Returns true when the install succeeded.
    pub fn set(&self, value: u64) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if value <= current {
                return false;
            }
            match self
                .0
                .compare_exchange(current, value, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rondo_types::{Hash, NodeId, Signature, View};
    use std::sync::Arc;

    fn qc_at_view(view: u64) -> QuorumCertificate {
        QuorumCertificate {
            view: View(view),
            block_id: Hash::digest(&view.to_le_bytes()),
            signer_ids: vec![NodeId([1u8; 32])],
            sig_data: Signature::zero(),
        }
    }

    #[test]
    fn test_weight_tracker_fires_once() {
        let tracker = WeightTracker::new(Weight(3));
        assert!(!tracker.track(Weight(1)));
        assert!(!tracker.track(Weight(2)));
        assert!(tracker.track(Weight(3)));
        assert!(!tracker.track(Weight(4)));
        assert!(tracker.done());
    }

    #[test]
    fn test_weight_tracker_concurrent_single_winner() {
        let tracker = Arc::new(WeightTracker::new(Weight(1)));
        let winners: usize = (0..8)
            .map(|_| {
                let t = tracker.clone();
                std::thread::spawn(move || t.track(Weight(5)) as usize)
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .sum();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_newest_qc_tracker_monotonic() {
        let tracker = NewestQcTracker::new();
        assert!(tracker.track(&qc_at_view(3)));
        assert!(!tracker.track(&qc_at_view(2)));
        assert!(!tracker.track(&qc_at_view(3)));
        assert!(tracker.track(&qc_at_view(5)));
        assert_eq!(tracker.newest_qc().unwrap().view, View(5));
    }

    #[test]
    fn test_monotonic_counter() {
        let counter = MonotonicCounter::new(0);
        assert!(counter.set(4));
        assert!(!counter.set(4));
        assert!(!counter.set(2));
        assert!(counter.set(9));
        assert_eq!(counter.get(), 9);
    }
}
