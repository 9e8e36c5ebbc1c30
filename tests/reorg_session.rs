//! Scripted reorg sessions.
//!
//! These tests drive [`ReorgSession`] end to end with in-process fakes:
//! headers are pushed through a [`ChannelHeaderSource`] in exactly the order a
//! test chooses, and partition calls are recorded by a
//! [`RecordingPartitionController`].
//!
//! # Header Layout
//!
//! Three nodes. Node 0 is the reorg node. Canonical blocks use hash
//! `0x0n..`, alternative blocks mined by node 0 while partitioned use
//! `0x8n..`.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::B256;
use eth_reorg_chaos::{
    config::ReorgConfig,
    error::ReorgError,
    observability,
    reorg::{Phase, ReorgSession, ReorgVerifier},
    testing::{header, ChannelHeaderSource, InMemoryChain, RecordingPartitionController},
};

fn canonical(number: u64) -> B256 {
    B256::repeat_byte(number as u8)
}

fn alternative(number: u64) -> B256 {
    B256::repeat_byte(0x80 | number as u8)
}

/// Node 0 reports an alternative block, nodes 1 and 2 the canonical one.
fn push_fork(source: &ChannelHeaderSource, number: u64) {
    source.push(header(0, number, alternative(number)));
    source.push(header(1, number, canonical(number)));
    source.push(header(2, number, canonical(number)));
}

fn push_canonical(source: &ChannelHeaderSource, numbers: std::ops::RangeInclusive<u64>) {
    for number in numbers {
        source.push_agreeing(number, canonical(number));
    }
}

struct Harness {
    source: Arc<ChannelHeaderSource>,
    partitions: Arc<RecordingPartitionController>,
    session: ReorgSession,
}

async fn start(nodes: usize, timeout: Duration) -> Harness {
    observability::init_test_tracing();

    let source = Arc::new(ChannelHeaderSource::new(nodes));
    let partitions = Arc::new(RecordingPartitionController::new());
    let config = ReorgConfig::default().with_timeout(timeout);

    let session = ReorgSession::start(config, source.clone(), partitions.clone())
        .await
        .unwrap();

    Harness {
        source,
        partitions,
        session,
    }
}

/// Three nodes agreeing on five blocks makes the network ready.
#[tokio::test]
async fn test_simple_convergence() {
    let Harness {
        source,
        partitions,
        session,
    } = start(3, Duration::from_secs(10)).await;

    push_canonical(&source, 1..=5);
    session.wait_ready().await.unwrap();

    let snapshot = session.snapshot().await;
    assert!(snapshot.ready);
    assert_eq!(snapshot.phase, Phase::AwaitingInitialConsensus);
    assert!(snapshot.depth_requested.is_none());

    session.cancel();
    let err = session.wait().await.unwrap_err();
    assert!(matches!(err, ReorgError::StateError { .. }));
    assert_eq!(partitions.create_calls(), 0);
    assert_eq!(partitions.remove_calls(), 0);
    assert_eq!(source.unsubscriptions().len(), 1);
}

/// Depth-2 reorg: node 0 diverges at 6 and 7, the network reconverges at 8.
#[tokio::test]
async fn test_depth_two_reorg_and_verification() {
    let Harness {
        source,
        partitions,
        session,
    } = start(3, Duration::from_secs(10)).await;

    push_canonical(&source, 1..=5);
    session.wait_ready().await.unwrap();
    session.reorg(2).await.unwrap();

    push_fork(&source, 6);
    push_fork(&source, 7);

    session.wait_reorg_started().await.unwrap();
    session.wait_depth_reached().await.unwrap();

    // Block 8 has not been delivered yet
    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.phase, Phase::AwaitingFinalConsensus);
    assert_eq!(snapshot.alt_blocks, vec![6, 7]);
    assert!(snapshot.fork_block.is_some_and(|block| block <= 6));
    assert_eq!(partitions.create_calls(), 1);
    assert_eq!(partitions.remove_calls(), 1);

    let created = partitions.created();
    assert_eq!(created[0].from, "tx-nodes");
    assert_eq!(created[0].to, "miner-nodes");

    push_canonical(&source, 8..=10);
    let report = session.wait().await.unwrap();

    assert_eq!(report.phase, Phase::Complete);
    assert_eq!(report.depth_requested, 2);
    assert_eq!(report.alt_blocks, vec![6, 7]);
    assert_eq!(report.forked_hash(6), Some(alternative(6)));
    assert_eq!(report.forked_hash(7), Some(alternative(7)));
    assert_eq!(partitions.remove_calls(), 1);
    assert_eq!(source.unsubscriptions().len(), 1);

    let chain: InMemoryChain = [(6, canonical(6)), (7, canonical(7))].into_iter().collect();
    let summary = ReorgVerifier::new(chain, report)
        .verify_all_replaced()
        .await
        .unwrap();
    assert_eq!(summary.replaced, vec![6]);
    assert_eq!(summary.required, 1);
}

/// A session needs at least three node connections.
#[tokio::test]
async fn test_insufficient_nodes() {
    let source = Arc::new(ChannelHeaderSource::new(1));
    let partitions = Arc::new(RecordingPartitionController::new());

    let err = ReorgSession::start(ReorgConfig::default(), source.clone(), partitions)
        .await
        .unwrap_err();

    assert!(err.is_config());
    assert!(source.subscriptions().is_empty());
}

/// Never reaching consensus times out and releases waiters.
#[tokio::test]
async fn test_timeout_before_consensus() {
    let Harness {
        source,
        partitions,
        session,
    } = start(3, Duration::from_secs(1)).await;

    source.push_agreeing(1, canonical(1));

    let err = session.wait_ready().await.unwrap_err();
    assert!(err.is_timeout());
    assert!(session.wait_reorg_started().await.unwrap_err().is_timeout());

    let err = session.wait().await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(partitions.create_calls(), 0);
    assert_eq!(partitions.remove_calls(), 0);
}

/// A timeout while partitioned still heals the network, exactly once.
#[tokio::test]
async fn test_timeout_while_partitioned_removes_partition() {
    let Harness {
        source,
        partitions,
        session,
    } = start(3, Duration::from_secs(1)).await;

    push_canonical(&source, 1..=5);
    session.wait_ready().await.unwrap();
    session.reorg(3).await.unwrap();
    push_fork(&source, 6);
    session.wait_reorg_started().await.unwrap();

    let err = session.wait_depth_reached().await.unwrap_err();
    assert!(err.is_timeout());

    let err = session.wait().await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(partitions.create_calls(), 1);
    assert_eq!(partitions.remove_calls(), 1);
    assert_eq!(partitions.removed()[0], partitions.created()[0]);
}

/// Cleanup removal failures are logged, the timeout is still what surfaces.
#[tokio::test]
async fn test_cleanup_removal_failure_keeps_original_error() {
    let Harness {
        source,
        partitions,
        session,
    } = start(3, Duration::from_secs(1)).await;

    push_canonical(&source, 1..=5);
    session.wait_ready().await.unwrap();
    session.reorg(2).await.unwrap();
    push_fork(&source, 6);
    session.wait_reorg_started().await.unwrap();
    partitions.fail_removes(true);

    let err = session.wait().await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(partitions.remove_calls(), 1);
}

/// A timeout after healing does not remove the partition a second time.
#[tokio::test]
async fn test_timeout_after_healing_removes_once() {
    let Harness {
        source,
        partitions,
        session,
    } = start(3, Duration::from_secs(1)).await;

    push_canonical(&source, 1..=5);
    session.wait_ready().await.unwrap();
    session.reorg(1).await.unwrap();
    push_fork(&source, 6);
    session.wait_depth_reached().await.unwrap();

    let err = session.wait().await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(partitions.create_calls(), 1);
    assert_eq!(partitions.remove_calls(), 1);
}

/// A failed node stream ends the session with a subscription error.
#[tokio::test]
async fn test_node_stream_error_propagates() {
    let Harness {
        source,
        partitions,
        session,
    } = start(3, Duration::from_secs(10)).await;

    push_canonical(&source, 1..=5);
    session.wait_ready().await.unwrap();
    session.reorg(2).await.unwrap();
    push_fork(&source, 6);
    session.wait_reorg_started().await.unwrap();
    source.push_error(ReorgError::subscription("node 2 header stream closed", None));

    let err = session.wait().await.unwrap_err();
    assert!(matches!(err, ReorgError::SubscriptionError { .. }));
    assert!(err.to_string().contains("node 2"));
    assert_eq!(partitions.remove_calls(), 1);
}

/// The header stream ending is an error, not a silent stop.
#[tokio::test]
async fn test_closed_stream_is_subscription_error() {
    let Harness {
        source, session, ..
    } = start(3, Duration::from_secs(10)).await;

    source.push_agreeing(1, canonical(1));
    source.close();

    let err = session.wait_ready().await.unwrap_err();
    assert!(matches!(err, ReorgError::StateError { .. }));

    let err = session.wait().await.unwrap_err();
    assert!(matches!(err, ReorgError::SubscriptionError { .. }));
}

/// Extra alternative blocks after the requested depth are not counted.
#[tokio::test]
async fn test_signals_fire_once_and_depth_is_bounded() {
    let Harness {
        source,
        partitions,
        session,
    } = start(3, Duration::from_secs(10)).await;

    push_canonical(&source, 1..=5);
    session.wait_ready().await.unwrap();
    session.reorg(1).await.unwrap();

    push_fork(&source, 6);
    push_fork(&source, 7);
    push_fork(&source, 8);

    session.wait_reorg_started().await.unwrap();
    session.wait_reorg_started().await.unwrap();
    session.wait_depth_reached().await.unwrap();

    push_canonical(&source, 9..=11);
    let report = session.wait().await.unwrap();

    assert_eq!(report.alt_blocks, vec![6]);
    assert_eq!(report.phase, Phase::Complete);
    assert_eq!(partitions.create_calls(), 1);
    assert_eq!(partitions.remove_calls(), 1);
}

/// Only one reorg per session, and depth must be positive.
#[tokio::test]
async fn test_second_reorg_request_rejected() {
    let Harness {
        source, session, ..
    } = start(3, Duration::from_secs(10)).await;

    assert!(session.reorg(0).await.unwrap_err().is_config());

    push_canonical(&source, 1..=3);
    session.wait_ready().await.unwrap();

    session.reorg(2).await.unwrap();
    let err = session.reorg(1).await.unwrap_err();
    assert!(matches!(err, ReorgError::StateError { .. }));

    session.cancel();
    assert!(session.wait().await.is_err());
}

/// A reorg requested before readiness forks on the first header after it.
#[tokio::test]
async fn test_reorg_requested_before_ready_is_deferred() {
    let Harness {
        source,
        partitions,
        session,
    } = start(3, Duration::from_secs(10)).await;

    session.reorg(2).await.unwrap();
    assert_eq!(session.snapshot().await.phase, Phase::AwaitingInitialConsensus);

    push_canonical(&source, 1..=5);
    push_fork(&source, 6);
    push_fork(&source, 7);
    session.wait_depth_reached().await.unwrap();

    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.fork_block, Some(4));
    assert_eq!(snapshot.alt_blocks, vec![6, 7]);

    push_canonical(&source, 8..=10);
    session.wait().await.unwrap();
    assert_eq!(partitions.remove_calls(), 1);
}

/// A failed partition request fails the session without a removal.
#[tokio::test]
async fn test_partition_create_failure() {
    let Harness {
        source,
        partitions,
        session,
    } = start(3, Duration::from_secs(10)).await;

    partitions.fail_creates(true);
    session.reorg(1).await.unwrap();
    push_canonical(&source, 1..=4);

    let err = session.wait().await.unwrap_err();
    assert!(matches!(err, ReorgError::PartitionError { .. }));
    assert_eq!(partitions.remove_calls(), 0);
}

/// Headers arriving out of order across nodes produce the same outcome.
#[tokio::test]
async fn test_out_of_order_delivery() {
    let Harness {
        source, session, ..
    } = start(3, Duration::from_secs(10)).await;

    // Node 2 lags one block behind the others
    for number in 1..=5 {
        source.push(header(0, number, canonical(number)));
        source.push(header(1, number, canonical(number)));
        if number > 1 {
            source.push(header(2, number - 1, canonical(number - 1)));
        }
    }
    source.push(header(2, 5, canonical(5)));
    session.wait_ready().await.unwrap();
    session.reorg(2).await.unwrap();

    source.push(header(1, 6, canonical(6)));
    source.push(header(0, 6, alternative(6)));
    source.push(header(0, 7, alternative(7)));
    source.push(header(2, 6, canonical(6)));
    source.push(header(1, 7, canonical(7)));
    source.push(header(2, 7, canonical(7)));
    session.wait_depth_reached().await.unwrap();

    push_canonical(&source, 8..=10);
    let report = session.wait().await.unwrap();
    assert_eq!(report.alt_blocks, vec![6, 7]);
}

/// After healing the reorg node re-announces canonical headers at the forked
/// numbers. The report keeps the alternative hashes it saw during the fork.
#[tokio::test]
async fn test_reorg_node_redelivers_canonical_headers_after_healing() {
    let Harness {
        source, session, ..
    } = start(3, Duration::from_secs(10)).await;

    push_canonical(&source, 1..=5);
    session.wait_ready().await.unwrap();
    session.reorg(2).await.unwrap();
    push_fork(&source, 6);
    push_fork(&source, 7);
    session.wait_depth_reached().await.unwrap();

    source.push(header(0, 6, canonical(6)));
    source.push(header(0, 7, canonical(7)));
    push_canonical(&source, 8..=10);
    let report = session.wait().await.unwrap();

    assert_eq!(report.phase, Phase::Complete);
    assert_eq!(report.forked_hash(6), Some(alternative(6)));
    assert_eq!(report.forked_hash(7), Some(alternative(7)));

    let chain: InMemoryChain = (1..=10).map(|n| (n, canonical(n))).collect();
    let summary = ReorgVerifier::new(chain, report)
        .verify_all_replaced()
        .await
        .unwrap();
    assert_eq!(summary.replaced, vec![6]);
}

/// A partition backend that never answers cannot hold the session past its
/// deadline.
#[tokio::test]
async fn test_hanging_partition_create_times_out() {
    let Harness {
        source,
        partitions,
        session,
    } = start(3, Duration::from_secs(1)).await;

    push_canonical(&source, 1..=5);
    session.wait_ready().await.unwrap();
    partitions.hang_creates(true);
    session.reorg(2).await.unwrap();
    source.push(header(0, 6, alternative(6)));

    let started = tokio::time::timeout(Duration::from_secs(5), session.wait_reorg_started())
        .await
        .unwrap();
    assert!(started.unwrap_err().is_timeout());

    let result = tokio::time::timeout(Duration::from_secs(5), session.wait())
        .await
        .unwrap();
    assert!(result.unwrap_err().is_timeout());
    assert_eq!(partitions.create_calls(), 0);
    assert_eq!(partitions.remove_calls(), 0);
    assert_eq!(source.unsubscriptions().len(), 1);
}

/// A removal that never answers at depth is retried once during cleanup,
/// bounded by the cleanup timeout.
#[tokio::test]
async fn test_hanging_partition_remove_is_bounded() {
    observability::init_test_tracing();

    let source = Arc::new(ChannelHeaderSource::new(3));
    let partitions = Arc::new(RecordingPartitionController::new());
    let config = ReorgConfig::default()
        .with_timeout(Duration::from_secs(1))
        .with_cleanup_timeout(Duration::from_millis(200));
    let session = ReorgSession::start(config, source.clone(), partitions.clone())
        .await
        .unwrap();

    push_canonical(&source, 1..=5);
    session.wait_ready().await.unwrap();
    partitions.hang_removes(true);
    session.reorg(2).await.unwrap();
    push_fork(&source, 6);
    push_fork(&source, 7);

    let depth = tokio::time::timeout(Duration::from_secs(5), session.wait_depth_reached())
        .await
        .unwrap();
    assert!(depth.unwrap_err().is_timeout());

    let result = tokio::time::timeout(Duration::from_secs(5), session.wait())
        .await
        .unwrap();
    assert!(result.unwrap_err().is_timeout());
    assert_eq!(partitions.create_calls(), 1);
    assert_eq!(partitions.remove_calls(), 2);
    assert_eq!(source.unsubscriptions().len(), 1);
}

/// Cancelling while a partition request is stuck still ends the session.
#[tokio::test]
async fn test_cancel_during_hanging_create() {
    let Harness {
        source,
        partitions,
        session,
    } = start(3, Duration::from_secs(30)).await;

    push_canonical(&source, 1..=5);
    session.wait_ready().await.unwrap();
    partitions.hang_creates(true);
    session.reorg(1).await.unwrap();
    source.push(header(0, 6, alternative(6)));

    // Let the consumer block on the partition request
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), session.wait())
        .await
        .unwrap();
    assert!(matches!(result.unwrap_err(), ReorgError::StateError { .. }));
}
