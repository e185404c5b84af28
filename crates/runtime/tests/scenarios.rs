//! End-to-end scenarios for the consensus event loop.
//!
//! Each test spawns a single replica's event loop against in-memory
//! collaborators and drives it by feeding events through the handle, the
//! way the compliance layer would. The other committee members exist only
//! as keypairs whose votes and timeouts are forged locally.

use rondo_consensus::test_utils::{
    make_qc, test_committee, InMemoryForks, MemoryPersister, RecordingObserver, TestBlockProducer,
};
use rondo_consensus::ConsensusConfig;
use rondo_core::{ConsensusEvent, Forks, LivenessData};
use rondo_runtime::{EventLoopBuilder, EventLoopHandle};
use rondo_types::test_utils::{test_node, test_validators};
use rondo_types::{
    Block, Hash, KeyPair, Proposal, QuorumCertificate, TimeoutObject, ValidatorSet, View, Vote,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing_test::traced_test;

struct Node {
    keys: Vec<KeyPair>,
    validators: ValidatorSet,
    forks: Arc<InMemoryForks>,
    observer: Arc<RecordingObserver>,
    handle: EventLoopHandle,
    task: JoinHandle<Result<(), rondo_consensus::FatalError>>,
}

/// Spawn the event loop for replica `self_index` of a 4-replica committee.
fn spawn_node(self_index: usize, liveness: LivenessData, config: ConsensusConfig) -> Node {
    let (keys, validators) = test_validators(4);
    let committee = test_committee(self_index, &validators);
    let forks = Arc::new(InMemoryForks::default());
    let observer = Arc::new(RecordingObserver::default());
    let persister = Arc::new(MemoryPersister::default());
    let producer = Arc::new(TestBlockProducer::new(
        test_node(self_index as u8),
        keys[self_index].clone(),
    ));

    let (event_loop, handle) = EventLoopBuilder::new()
        .committee(committee)
        .forks(forks.clone())
        .block_producer(producer)
        .persister(persister)
        .observer(observer.clone())
        .signing_key(keys[self_index].clone())
        .config(config)
        .recovered_liveness(liveness)
        .build()
        .expect("all components supplied");

    let task = tokio::spawn(event_loop.run());
    Node {
        keys,
        validators,
        forks,
        observer,
        handle,
        task,
    }
}

fn quiet_config() -> ConsensusConfig {
    // Long deadline: these scenarios drive progress through events, never
    // through the local timer.
    ConsensusConfig {
        round_timeout: Duration::from_secs(30),
        ..ConsensusConfig::default()
    }
}

fn liveness_at(view: u64, newest_qc: QuorumCertificate) -> LivenessData {
    LivenessData {
        current_view: View(view),
        newest_qc,
        last_view_tc: None,
    }
}

/// Store a proposal for `view` (extending genesis) in the node's forks and
/// return it.
fn seed_proposal(node: &Node, view: u64) -> Proposal {
    let proposer = (view % 4) as usize;
    let block = Block::new(
        View(view),
        QuorumCertificate::genesis(),
        test_node(proposer as u8),
        Hash::digest(format!("seed-{view}").as_bytes()),
    );
    let proposal = Proposal::new(block, None, &node.keys[proposer]);
    node.forks.add_proposal(&proposal).unwrap();
    proposal
}

/// Poll until `probe` yields a value or a generous deadline passes.
async fn wait_until<T>(what: &str, mut probe: impl FnMut() -> Option<T>) -> T {
    for _ in 0..500 {
        if let Some(value) = probe() {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[traced_test]
#[tokio::test]
async fn scenario_happy_path_qc() {
    // Replica 2 leads view 6; feed it a proposal for view 5 plus the other
    // replicas' votes and watch it form a QC and propose for view 6.
    let node = spawn_node(2, liveness_at(5, QuorumCertificate::genesis()), quiet_config());

    // The view-5 proposal extends the seeded view-4 block.
    let parent = seed_proposal(&node, 4);
    let qc4 = make_qc(
        View(4),
        parent.block.block_id(),
        &node.validators,
        &node.keys,
        &[0, 1, 2],
    );
    let block5 = Block::new(View(5), qc4, test_node(1), Hash::digest(b"payload-5"));
    let proposal5 = Proposal::new(block5.clone(), None, &node.keys[1]);

    node.handle
        .send(ConsensusEvent::Proposal(Box::new(proposal5)))
        .await
        .unwrap();

    // The node votes for the proposal; as next leader it keeps the vote in
    // its own collector, so two more votes complete the quorum of three.
    for index in [0u8, 1] {
        let vote = Vote::new(
            block5.block_id(),
            View(5),
            test_node(index),
            &node.keys[index as usize],
        );
        node.handle.send(ConsensusEvent::Vote(vote)).await.unwrap();
    }

    let (qc_view, qc) = wait_until("QC for view 5", || {
        node.observer.qcs().into_iter().find(|(_, qc)| qc.view == View(5))
    })
    .await;
    assert_eq!(qc.block_id, block5.block_id());
    assert!(qc_view >= View(5));

    let (proposal6, _) = wait_until("own proposal for view 6", || {
        node.observer.own_proposals().into_iter().next()
    })
    .await;
    assert_eq!(proposal6.block.view, View(6));
    assert_eq!(proposal6.block.qc.view, View(5));
    assert!(proposal6.last_view_tc.is_none());

    // Exactly one QC was constructed for (view 5, block 5).
    assert_eq!(
        node.observer
            .qcs()
            .iter()
            .filter(|(_, qc)| qc.view == View(5))
            .count(),
        1
    );

    node.handle.shutdown().await.unwrap();
    node.task.await.unwrap().unwrap();
}

#[traced_test]
#[tokio::test]
async fn scenario_timeout_and_tc() {
    // Replica 0 sits in view 7 with a QC for view 6; no proposal arrives,
    // the round timer fires, peers time out too, and the resulting TC
    // carries the node into view 8 where it leads.
    let config = ConsensusConfig {
        round_timeout: Duration::from_millis(50),
        ..ConsensusConfig::default()
    };
    let (keys, validators) = test_validators(4);
    let node = {
        let parent_block = Block::new(
            View(6),
            QuorumCertificate::genesis(),
            test_node(2),
            Hash::digest(b"seed-6"),
        );
        let qc6 = make_qc(View(6), parent_block.block_id(), &validators, &keys, &[0, 1, 2]);
        let node = spawn_node(0, liveness_at(7, qc6), config);
        // The node must know the block its newest QC certifies to propose.
        let parent = Proposal::new(parent_block, None, &node.keys[2]);
        node.forks.add_proposal(&parent).unwrap();
        node
    };
    let qc6 = {
        let parent = node.forks.proposals_for_view(View(6)).remove(0);
        make_qc(
            View(6),
            parent.block.block_id(),
            &node.validators,
            &node.keys,
            &[0, 1, 2],
        )
    };

    // Local deadline elapses: the node broadcasts its own timeout.
    let own_timeout = wait_until("own timeout for view 7", || {
        node.observer.own_timeouts().into_iter().next()
    })
    .await;
    assert_eq!(own_timeout.view, View(7));
    assert_eq!(own_timeout.newest_qc.view, View(6));

    // Peers time out as well: weight 2 reaches the partial threshold,
    // weight 3 the quorum.
    for index in [1u8, 2] {
        let timeout = TimeoutObject::new(
            View(7),
            qc6.clone(),
            None,
            test_node(index),
            &node.keys[index as usize],
        );
        node.handle
            .send(ConsensusEvent::Timeout(Box::new(timeout)))
            .await
            .unwrap();
    }

    let partial_view = wait_until("partial TC for view 7", || {
        node.observer.partial_tcs().into_iter().next()
    })
    .await;
    assert_eq!(partial_view, View(7));

    let tc = wait_until("TC for view 7", || {
        node.observer.tcs().into_iter().find(|tc| tc.view == View(7))
    })
    .await;
    assert_eq!(tc.newest_qc.view, View(6));

    // Replica 0 leads view 8 and proposes on top of the TC.
    let (proposal8, _) = wait_until("own proposal for view 8", || {
        node.observer.own_proposals().into_iter().next()
    })
    .await;
    assert_eq!(proposal8.block.view, View(8));
    assert_eq!(proposal8.block.qc.view, View(6));
    assert_eq!(proposal8.last_view_tc.as_ref().unwrap().view, View(7));

    node.handle.shutdown().await.unwrap();
    node.task.await.unwrap().unwrap();
}

#[traced_test]
#[tokio::test]
async fn scenario_partial_tc_amplification() {
    // Replica 3 has a long round deadline; two peers' timeouts (f+1 weight)
    // must trigger its own timeout broadcast before the timer ever fires.
    let (keys, validators) = test_validators(4);
    let parent_block = Block::new(
        View(8),
        QuorumCertificate::genesis(),
        test_node(0),
        Hash::digest(b"seed-8"),
    );
    let qc8 = make_qc(View(8), parent_block.block_id(), &validators, &keys, &[0, 1, 2]);
    let node = spawn_node(3, liveness_at(9, qc8.clone()), quiet_config());

    for index in [0u8, 1] {
        let timeout = TimeoutObject::new(
            View(9),
            qc8.clone(),
            None,
            test_node(index),
            &node.keys[index as usize],
        );
        node.handle
            .send(ConsensusEvent::Timeout(Box::new(timeout)))
            .await
            .unwrap();
    }

    let own_timeout = wait_until("amplified own timeout", || {
        node.observer.own_timeouts().into_iter().next()
    })
    .await;
    assert_eq!(own_timeout.view, View(9));
    assert_eq!(node.observer.partial_tcs(), vec![View(9)]);

    node.handle.shutdown().await.unwrap();
    node.task.await.unwrap().unwrap();
}

#[traced_test]
#[tokio::test]
async fn scenario_double_vote_detection() {
    // Replica X (index 1) votes for two different blocks at view 11; the
    // second vote is reported and contributes to no quorum.
    let node = spawn_node(0, liveness_at(11, QuorumCertificate::genesis()), quiet_config());

    let block_a = Hash::digest(b"block-a");
    let block_b = Hash::digest(b"block-b");

    node.handle
        .send(ConsensusEvent::Vote(Vote::new(
            block_a,
            View(11),
            test_node(1),
            &node.keys[1],
        )))
        .await
        .unwrap();
    node.handle
        .send(ConsensusEvent::Vote(Vote::new(
            block_b,
            View(11),
            test_node(1),
            &node.keys[1],
        )))
        .await
        .unwrap();

    let double_votes = wait_until("double vote report", || {
        let reports = node.observer.double_votes();
        if reports.is_empty() {
            None
        } else {
            Some(reports)
        }
    })
    .await;
    assert_eq!(double_votes.len(), 1);
    assert_eq!(double_votes[0].0.signer_id, test_node(1));
    assert_eq!(double_votes[0].0.block_id, block_a);
    assert_eq!(double_votes[0].1.block_id, block_b);
    assert!(node.observer.qcs().is_empty());

    node.handle.shutdown().await.unwrap();
    node.task.await.unwrap().unwrap();
}

#[traced_test]
#[tokio::test]
async fn scenario_shutdown_drains_cleanly() {
    let node = spawn_node(0, liveness_at(3, QuorumCertificate::genesis()), quiet_config());

    // A vote queued before the shutdown is still processed.
    node.handle
        .send(ConsensusEvent::Vote(Vote::new(
            Hash::digest(b"b"),
            View(3),
            test_node(1),
            &node.keys[1],
        )))
        .await
        .unwrap();
    node.handle.shutdown().await.unwrap();

    node.task.await.unwrap().unwrap();
}

#[traced_test]
#[tokio::test]
async fn builder_requires_all_components() {
    let err = EventLoopBuilder::new().build();
    assert!(err.is_err());
}
