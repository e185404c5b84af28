//! The consensus event loop.
//!
//! A single task owns the EventHandler and drains a bounded channel of
//! [`ConsensusEvent`]s merged with the PaceMaker's round-timer fires.
//! Processing is strictly FIFO over the merged stream; re-entrancy is
//! impossible because collectors post their results into the same channel
//! instead of calling back into the handler.

use rondo_consensus::{
    BlsVerifier, ConsensusConfig, EventHandler, FatalError, PaceMaker, RoundTimeout, SafetyRules,
    TimeoutCallbacks, TimeoutCollectors, Validator, VoteCollectors,
};
use rondo_core::{
    BlockProducer, ConsensusEvent, ConsensusObserver, Forks, LivenessData, NoopObserver, Persister,
    SafetyData,
};
use rondo_types::{Committee, KeyPair, QuorumCertificate, View};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Errors from driving the event loop from outside.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EventLoopError {
    /// The loop has stopped and its channel is closed.
    #[error("event channel closed")]
    ChannelClosed,

    /// The loop's bounded channel is full.
    #[error("event channel full")]
    ChannelFull,

    /// A required builder component was not supplied.
    #[error("missing component: {0}")]
    MissingComponent(&'static str),
}

/// Cloneable sender used by the compliance/network layer to feed the loop.
#[derive(Clone)]
pub struct EventLoopHandle {
    event_tx: mpsc::Sender<ConsensusEvent>,
}

impl EventLoopHandle {
    /// Enqueue an event, waiting for channel capacity.
    pub async fn send(&self, event: ConsensusEvent) -> Result<(), EventLoopError> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| EventLoopError::ChannelClosed)
    }

    /// Enqueue an event without waiting; drops the event when the loop is
    /// saturated.
    pub fn try_send(&self, event: ConsensusEvent) -> Result<(), EventLoopError> {
        self.event_tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(ev) => {
                warn!(event = ev.type_name(), "event dropped; loop saturated");
                EventLoopError::ChannelFull
            }
            mpsc::error::TrySendError::Closed(ev) => {
                warn!(event = ev.type_name(), "event dropped; loop stopped");
                EventLoopError::ChannelClosed
            }
        })
    }

    /// Ask the loop to drain pending events and stop.
    pub async fn shutdown(&self) -> Result<(), EventLoopError> {
        self.send(ConsensusEvent::Shutdown).await
    }
}

/// The single-threaded consensus driver.
pub struct EventLoop {
    handler: EventHandler,
    events_rx: mpsc::Receiver<ConsensusEvent>,
    timer_rx: mpsc::Receiver<RoundTimeout>,
    vote_collectors: Arc<VoteCollectors>,
    timeout_collectors: Arc<TimeoutCollectors>,
    forks: Arc<dyn Forks>,
}

impl EventLoop {
    /// Run until shutdown or a fatal error. Consumes the loop.
    pub async fn run(mut self) -> Result<(), FatalError> {
        self.handler.start()?;
        loop {
            tokio::select! {
                event = self.events_rx.recv() => match event {
                    None => {
                        debug!("event channel closed; stopping");
                        break;
                    }
                    Some(ConsensusEvent::Shutdown) => {
                        self.drain_pending()?;
                        debug!("shutdown complete");
                        break;
                    }
                    Some(event) => self.dispatch(event)?,
                },
                Some(fire) = self.timer_rx.recv() => self.on_timer_fire(fire)?,
            }
            self.prune_collectors();
        }
        Ok(())
    }

    /// Process events already queued at shutdown, ignoring late arrivals.
    fn drain_pending(&mut self) -> Result<(), FatalError> {
        while let Ok(event) = self.events_rx.try_recv() {
            if matches!(event, ConsensusEvent::Shutdown) {
                continue;
            }
            self.dispatch(event)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, event: ConsensusEvent) -> Result<(), FatalError> {
        trace!(event = event.type_name(), "dispatching");
        match event {
            ConsensusEvent::Proposal(proposal) => self.handler.on_receive_proposal(&proposal),
            ConsensusEvent::Vote(vote) => {
                self.vote_collectors.add_vote(vote);
                Ok(())
            }
            ConsensusEvent::Timeout(timeout) => {
                self.timeout_collectors.add_timeout(*timeout);
                Ok(())
            }
            ConsensusEvent::Qc(qc) => self.handler.on_receive_qc(&qc),
            ConsensusEvent::Tc(tc) => self.handler.on_receive_tc(&tc),
            ConsensusEvent::PartialTc(partial) => self.handler.on_partial_tc_created(&partial),
            ConsensusEvent::LocalTimeout { view } => {
                if view == self.handler.current_view() {
                    self.handler.on_local_timeout()
                } else {
                    trace!(fired = view.0, current = self.handler.current_view().0, "stale timeout event");
                    Ok(())
                }
            }
            ConsensusEvent::Shutdown => Ok(()),
        }
    }

    fn on_timer_fire(&mut self, fire: RoundTimeout) -> Result<(), FatalError> {
        if fire.view == self.handler.current_view() {
            self.handler.on_local_timeout()
        } else {
            trace!(
                fired = fire.view.0,
                current = self.handler.current_view().0,
                "stale round-timer fire dropped"
            );
            Ok(())
        }
    }

    fn prune_collectors(&self) {
        let finalized = self.forks.finalized_view();
        if finalized > View::GENESIS {
            self.vote_collectors.prune_up_to_view(finalized);
            self.timeout_collectors.prune_up_to_view(finalized);
        }
    }
}

/// Builder assembling the event loop and its collaborators.
///
/// Required: `committee`, `forks`, `block_producer`, `persister`,
/// `signing_key`. Optional: `observer` (defaults to [`NoopObserver`]),
/// `config`, and the recovered safety/liveness records (default to a fresh
/// start at view 1 on top of the genesis certificate).
pub struct EventLoopBuilder {
    committee: Option<Arc<dyn Committee>>,
    forks: Option<Arc<dyn Forks>>,
    block_producer: Option<Arc<dyn BlockProducer>>,
    persister: Option<Arc<dyn Persister>>,
    observer: Arc<dyn ConsensusObserver>,
    signing_key: Option<KeyPair>,
    config: ConsensusConfig,
    recovered_safety: Option<SafetyData>,
    recovered_liveness: Option<LivenessData>,
}

impl Default for EventLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoopBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            committee: None,
            forks: None,
            block_producer: None,
            persister: None,
            observer: Arc::new(NoopObserver),
            signing_key: None,
            config: ConsensusConfig::default(),
            recovered_safety: None,
            recovered_liveness: None,
        }
    }

    /// Set the committee.
    pub fn committee(mut self, committee: Arc<dyn Committee>) -> Self {
        self.committee = Some(committee);
        self
    }

    /// Set the fork store.
    pub fn forks(mut self, forks: Arc<dyn Forks>) -> Self {
        self.forks = Some(forks);
        self
    }

    /// Set the block producer.
    pub fn block_producer(mut self, producer: Arc<dyn BlockProducer>) -> Self {
        self.block_producer = Some(producer);
        self
    }

    /// Set the persister.
    pub fn persister(mut self, persister: Arc<dyn Persister>) -> Self {
        self.persister = Some(persister);
        self
    }

    /// Set the outbound observer.
    pub fn observer(mut self, observer: Arc<dyn ConsensusObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Set this replica's signing key.
    pub fn signing_key(mut self, key: KeyPair) -> Self {
        self.signing_key = Some(key);
        self
    }

    /// Set the consensus configuration.
    pub fn config(mut self, config: ConsensusConfig) -> Self {
        self.config = config;
        self
    }

    /// Restore the recovered safety record.
    pub fn recovered_safety(mut self, data: SafetyData) -> Self {
        self.recovered_safety = Some(data);
        self
    }

    /// Restore the recovered liveness record.
    pub fn recovered_liveness(mut self, data: LivenessData) -> Self {
        self.recovered_liveness = Some(data);
        self
    }

    /// Assemble the loop and its handle.
    pub fn build(self) -> Result<(EventLoop, EventLoopHandle), EventLoopError> {
        let committee = self
            .committee
            .ok_or(EventLoopError::MissingComponent("committee"))?;
        let forks = self.forks.ok_or(EventLoopError::MissingComponent("forks"))?;
        let block_producer = self
            .block_producer
            .ok_or(EventLoopError::MissingComponent("block_producer"))?;
        let persister = self
            .persister
            .ok_or(EventLoopError::MissingComponent("persister"))?;
        let signing_key = self
            .signing_key
            .ok_or(EventLoopError::MissingComponent("signing_key"))?;

        let (event_tx, events_rx) = mpsc::channel(self.config.channel_capacity);
        let handle = EventLoopHandle {
            event_tx: event_tx.clone(),
        };

        let liveness = self.recovered_liveness.unwrap_or_else(|| LivenessData {
            current_view: View(1),
            newest_qc: QuorumCertificate::genesis(),
            last_view_tc: None,
        });
        let safety = self.recovered_safety.unwrap_or(SafetyData {
            highest_voted_view: View::GENESIS,
            locked_view: View::GENESIS,
        });

        let mut pacemaker = PaceMaker::new(liveness, self.config.clone(), persister.clone());
        let timer_rx = pacemaker
            .take_timeout_channel()
            .expect("fresh pacemaker always yields its timer channel");

        let validator = Arc::new(Validator::new(committee.clone(), Arc::new(BlsVerifier::new())));

        let vote_collectors = {
            let tx = event_tx.clone();
            Arc::new(VoteCollectors::new(
                committee.clone(),
                self.observer.clone(),
                Arc::new(move |qc| {
                    if tx.try_send(ConsensusEvent::Qc(qc)).is_err() {
                        warn!("constructed QC dropped; event loop saturated or stopped");
                    }
                }),
            ))
        };

        let timeout_collectors = {
            let partial_tx = event_tx.clone();
            let tc_tx = event_tx.clone();
            let qc_tx = event_tx.clone();
            let new_tc_tx = event_tx;
            Arc::new(TimeoutCollectors::new(
                committee.clone(),
                validator,
                self.observer.clone(),
                TimeoutCallbacks {
                    on_partial_tc: Arc::new(move |partial| {
                        if partial_tx
                            .try_send(ConsensusEvent::PartialTc(Box::new(partial)))
                            .is_err()
                        {
                            warn!("partial TC dropped; event loop saturated or stopped");
                        }
                    }),
                    on_tc: Arc::new(move |tc| {
                        if tc_tx.try_send(ConsensusEvent::Tc(Box::new(tc))).is_err() {
                            warn!("constructed TC dropped; event loop saturated or stopped");
                        }
                    }),
                    on_new_qc: Arc::new(move |qc| {
                        let _ = qc_tx.try_send(ConsensusEvent::Qc(qc));
                    }),
                    on_new_tc: Arc::new(move |tc| {
                        let _ = new_tc_tx.try_send(ConsensusEvent::Tc(Box::new(tc)));
                    }),
                },
            ))
        };

        let safety_rules = SafetyRules::new(committee.clone(), persister, signing_key, safety);
        let handler = EventHandler::new(
            committee,
            pacemaker,
            forks.clone(),
            block_producer,
            safety_rules,
            vote_collectors.clone(),
            timeout_collectors.clone(),
            self.observer,
            self.config,
        );

        Ok((
            EventLoop {
                handler,
                events_rx,
                timer_rx,
                vote_collectors,
                timeout_collectors,
                forks,
            },
            handle,
        ))
    }
}
