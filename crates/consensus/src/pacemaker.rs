//! PaceMaker: view ownership, certificate tracking and the round timer.
//!
//! The PaceMaker is the only writer of `current_view`, which is strictly
//! monotonically increasing over its entire lifetime. Views advance solely
//! upon observing a QC or TC for a view at least as high as the current one;
//! all inputs are assumed validated.

use crate::config::ConsensusConfig;
use rondo_core::{LivenessData, Persister};
use rondo_types::{QuorumCertificate, TimeoutCertificate, View};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Emitted when the PaceMaker advances into a new view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewViewEvent {
    /// The view just entered.
    pub view: View,
}

/// A round-timer deadline fire, tagged with the view it was armed for.
///
/// A view change supersedes the pending fire: the event loop drops fires
/// whose view is no longer current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundTimeout {
    /// The view whose deadline elapsed.
    pub view: View,
}

/// Single-round deadline timer.
///
/// Each view arms one tokio sleep task that posts a [`RoundTimeout`] into
/// the timer channel. Re-arming aborts the previous task, so at most one
/// fire per view reaches the loop.
struct RoundTimer {
    fire_tx: mpsc::Sender<RoundTimeout>,
    fire_rx: Option<mpsc::Receiver<RoundTimeout>>,
    handle: Option<JoinHandle<()>>,
}

impl RoundTimer {
    fn new() -> Self {
        // Two slots: a stale fire may still sit in the channel while the
        // fresh one is posted.
        let (fire_tx, fire_rx) = mpsc::channel(2);
        Self {
            fire_tx,
            fire_rx: Some(fire_rx),
            handle: None,
        }
    }

    /// Arm the timer for `view`, superseding any earlier deadline.
    fn restart(&mut self, view: View, duration: Duration) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        let fire_tx = self.fire_tx.clone();
        self.handle = Some(tokio::spawn(async move {
            trace!(view = view.0, ?duration, "round timer armed");
            tokio::time::sleep(duration).await;
            trace!(view = view.0, "round timer fired");
            // Loop gone means shutdown; nothing to do.
            let _ = fire_tx.send(RoundTimeout { view }).await;
        }));
    }
}

impl Drop for RoundTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Owns the current view, the newest certificates and the round timer.
pub struct PaceMaker {
    current_view: View,
    newest_qc: QuorumCertificate,
    last_view_tc: Option<TimeoutCertificate>,
    /// Consecutive views entered via TC; drives the timeout back-off.
    timeouts_in_a_row: u32,
    config: ConsensusConfig,
    persister: Arc<dyn Persister>,
    timer: RoundTimer,
}

impl PaceMaker {
    /// Restore a PaceMaker from a recovered [`LivenessData`] record.
    pub fn new(recovered: LivenessData, config: ConsensusConfig, persister: Arc<dyn Persister>) -> Self {
        Self {
            current_view: recovered.current_view,
            newest_qc: recovered.newest_qc,
            last_view_tc: recovered.last_view_tc,
            timeouts_in_a_row: 0,
            config,
            persister,
            timer: RoundTimer::new(),
        }
    }

    /// The view this replica is currently in.
    pub fn current_view(&self) -> View {
        self.current_view
    }

    /// The highest QC observed so far.
    pub fn newest_qc(&self) -> &QuorumCertificate {
        &self.newest_qc
    }

    /// The TC that admitted the current view, if it was entered via timeout.
    pub fn last_view_tc(&self) -> Option<&TimeoutCertificate> {
        self.last_view_tc.as_ref()
    }

    /// Take the receiver of round-timer deadline fires.
    ///
    /// Yields the channel exactly once; the event loop owns it afterwards.
    pub fn take_timeout_channel(&mut self) -> Option<mpsc::Receiver<RoundTimeout>> {
        self.timer.fire_rx.take()
    }

    /// Begin the round timer for the current view.
    pub fn start(&mut self) {
        self.timer
            .restart(self.current_view, self.current_round_duration());
    }

    /// The deadline applied to the current round, with exponential back-off
    /// across consecutive timed-out views.
    pub fn current_round_duration(&self) -> Duration {
        let exponent = self.timeouts_in_a_row.min(self.config.max_backoff_exponent);
        self.config.round_timeout * 2u32.pow(exponent)
    }

    /// Process a validated QC. Advances the view when `qc.view` is at least
    /// the current view; always absorbs a newer QC.
    ///
    /// Infallible: a stale certificate is silently absorbed.
    pub fn process_qc(&mut self, qc: &QuorumCertificate) -> Option<NewViewEvent> {
        if qc.view > self.newest_qc.view {
            self.newest_qc = qc.clone();
        }

        if qc.view < self.current_view {
            trace!(
                qc_view = qc.view.0,
                current_view = self.current_view.0,
                "stale QC absorbed without view change"
            );
            return None;
        }

        // Entering via QC: the QC itself is the evidence for the new view,
        // so any TC held for an older view is stale.
        self.timeouts_in_a_row = 0;
        self.last_view_tc = None;
        self.enter_view(qc.view.next());
        Some(NewViewEvent {
            view: self.current_view,
        })
    }

    /// Process a validated TC (absent TCs pass through). Advances the view
    /// when `tc.view` is at least the current view; always absorbs the TC's
    /// newest QC.
    ///
    /// Infallible: a stale certificate is silently absorbed.
    pub fn process_tc(&mut self, tc: Option<&TimeoutCertificate>) -> Option<NewViewEvent> {
        let tc = tc?;

        // The TC's newest QC may advance the view on its own; a well-formed
        // TC is at least as new as its QC, so a TC entry below supersedes it.
        let qc_event = self.process_qc(&tc.newest_qc);

        if tc.view < self.current_view {
            trace!(
                tc_view = tc.view.0,
                current_view = self.current_view.0,
                "stale TC absorbed without view change"
            );
            return qc_event;
        }

        self.timeouts_in_a_row = self.timeouts_in_a_row.saturating_add(1);
        self.last_view_tc = Some(tc.clone());
        self.enter_view(tc.view.next());
        Some(NewViewEvent {
            view: self.current_view,
        })
    }

    /// Enter `new_view`, persisting liveness state before the view becomes
    /// externally observable and re-arming the round timer.
    fn enter_view(&mut self, new_view: View) {
        debug_assert!(new_view > self.current_view, "views only move forward");
        self.current_view = new_view;

        self.persister.put_liveness_data(&LivenessData {
            current_view: self.current_view,
            newest_qc: self.newest_qc.clone(),
            last_view_tc: self.last_view_tc.clone(),
        });

        self.timer
            .restart(self.current_view, self.current_round_duration());

        debug!(
            view = self.current_view.0,
            newest_qc_view = self.newest_qc.view.0,
            via_tc = self.last_view_tc.is_some(),
            "entered new view"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MemoryPersister;
    use rondo_types::{Hash, NodeId, Signature};

    fn qc_at_view(view: u64) -> QuorumCertificate {
        QuorumCertificate {
            view: View(view),
            block_id: Hash::digest(&view.to_le_bytes()),
            signer_ids: vec![NodeId([1u8; 32])],
            sig_data: Signature::zero(),
        }
    }

    fn tc_at_view(view: u64, qc_view: u64) -> TimeoutCertificate {
        TimeoutCertificate {
            view: View(view),
            newest_qc_views: vec![View(qc_view)],
            newest_qc: qc_at_view(qc_view),
            signer_ids: vec![NodeId([1u8; 32])],
            sig_data: Signature::zero(),
        }
    }

    fn make_pacemaker(view: u64) -> (PaceMaker, Arc<MemoryPersister>) {
        let persister = Arc::new(MemoryPersister::default());
        let pacemaker = PaceMaker::new(
            LivenessData {
                current_view: View(view),
                newest_qc: QuorumCertificate::genesis(),
                last_view_tc: None,
            },
            ConsensusConfig::default(),
            persister.clone(),
        );
        (pacemaker, persister)
    }

    #[tokio::test]
    async fn test_views_strictly_increase() {
        let (mut pacemaker, _) = make_pacemaker(3);
        let mut seen = vec![pacemaker.current_view()];

        for qc_view in [3, 5, 4, 9, 9, 2] {
            pacemaker.process_qc(&qc_at_view(qc_view));
            seen.push(pacemaker.current_view());
        }
        for window in seen.windows(2) {
            assert!(window[0] <= window[1]);
        }
        assert_eq!(pacemaker.current_view(), View(10));
    }

    #[tokio::test]
    async fn test_qc_entry_clears_stale_tc() {
        let (mut pacemaker, _) = make_pacemaker(3);

        let event = pacemaker.process_tc(Some(&tc_at_view(3, 2)));
        assert_eq!(event, Some(NewViewEvent { view: View(4) }));
        assert!(pacemaker.last_view_tc().is_some());

        let event = pacemaker.process_qc(&qc_at_view(4));
        assert_eq!(event, Some(NewViewEvent { view: View(5) }));
        assert!(pacemaker.last_view_tc().is_none());
    }

    #[tokio::test]
    async fn test_stale_qc_still_updates_newest() {
        let (mut pacemaker, _) = make_pacemaker(10);

        assert!(pacemaker.process_qc(&qc_at_view(4)).is_none());
        assert_eq!(pacemaker.newest_qc().view, View(4));
        assert_eq!(pacemaker.current_view(), View(10));

        // An even older QC changes nothing.
        assert!(pacemaker.process_qc(&qc_at_view(2)).is_none());
        assert_eq!(pacemaker.newest_qc().view, View(4));
    }

    #[tokio::test]
    async fn test_tc_absorbs_embedded_qc() {
        let (mut pacemaker, _) = make_pacemaker(3);

        let event = pacemaker.process_tc(Some(&tc_at_view(6, 5)));
        assert_eq!(event, Some(NewViewEvent { view: View(7) }));
        assert_eq!(pacemaker.newest_qc().view, View(5));
        assert_eq!(pacemaker.last_view_tc().unwrap().view, View(6));
    }

    #[tokio::test]
    async fn test_backoff_grows_and_resets() {
        let (mut pacemaker, _) = make_pacemaker(3);
        let base = pacemaker.config.round_timeout;
        assert_eq!(pacemaker.current_round_duration(), base);

        pacemaker.process_tc(Some(&tc_at_view(3, 2)));
        assert_eq!(pacemaker.current_round_duration(), base * 2);
        pacemaker.process_tc(Some(&tc_at_view(4, 2)));
        assert_eq!(pacemaker.current_round_duration(), base * 4);

        // A successful round resets the back-off.
        pacemaker.process_qc(&qc_at_view(5));
        assert_eq!(pacemaker.current_round_duration(), base);
    }

    #[tokio::test]
    async fn test_backoff_is_capped() {
        let (mut pacemaker, _) = make_pacemaker(0);
        let config = ConsensusConfig::default();
        for view in 0..20 {
            pacemaker.process_tc(Some(&tc_at_view(view, 0)));
        }
        assert_eq!(
            pacemaker.current_round_duration(),
            config.round_timeout * 2u32.pow(config.max_backoff_exponent)
        );
    }

    #[tokio::test]
    async fn test_liveness_persisted_on_view_change() {
        let (mut pacemaker, persister) = make_pacemaker(3);
        pacemaker.process_qc(&qc_at_view(5));

        let liveness = persister.liveness().unwrap();
        assert_eq!(liveness.current_view, View(6));
        assert_eq!(liveness.newest_qc.view, View(5));
        assert!(liveness.last_view_tc.is_none());
    }

    #[tokio::test]
    async fn test_timer_fires_with_armed_view() {
        let (mut pacemaker, _) = make_pacemaker(3);
        let mut fire_rx = pacemaker.take_timeout_channel().unwrap();
        assert!(pacemaker.take_timeout_channel().is_none());

        // Shrink the deadline so the test stays fast.
        pacemaker.config.round_timeout = Duration::from_millis(10);
        pacemaker.start();

        let fire = tokio::time::timeout(Duration::from_millis(500), fire_rx.recv())
            .await
            .expect("timer should fire")
            .expect("channel open");
        assert_eq!(fire.view, View(3));
    }

    #[tokio::test]
    async fn test_view_change_supersedes_pending_fire() {
        let (mut pacemaker, _) = make_pacemaker(3);
        let mut fire_rx = pacemaker.take_timeout_channel().unwrap();
        pacemaker.config.round_timeout = Duration::from_millis(40);
        pacemaker.start();

        // Advance the view before the deadline elapses.
        pacemaker.process_qc(&qc_at_view(3));

        let fire = tokio::time::timeout(Duration::from_millis(500), fire_rx.recv())
            .await
            .expect("timer should fire")
            .expect("channel open");
        // Only the re-armed view's fire arrives; the old task was aborted.
        assert_eq!(fire.view, View(4));
    }
}
