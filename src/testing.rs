//! In-process fakes for driving reorg sessions without a network.
//!
//! ## Features
//!
//! - **Scripted headers**: [`ChannelHeaderSource`] delivers exactly the
//!   headers a test pushes, in the order pushed
//! - **Fault recording**: [`RecordingPartitionController`] records every
//!   create/remove call and can be told to fail or to never answer
//! - **Canonical chain**: [`InMemoryChain`] answers hash lookups from a map
//!
//! ## Example
//!
//! ```ignore
//! use eth_reorg_chaos::testing::{ChannelHeaderSource, RecordingPartitionController};
//!
//! let source = Arc::new(ChannelHeaderSource::new(3));
//! let partitions = Arc::new(RecordingPartitionController::new());
//! let session = ReorgSession::start(config, source.clone(), partitions.clone()).await?;
//!
//! for number in 1..=5 {
//!     source.push_agreeing(number, B256::repeat_byte(number as u8));
//! }
//! session.wait_ready().await?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use alloy::primitives::B256;
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;

use crate::chaos::{PartitionController, PartitionHandle};
use crate::error::{ReorgError, ReorgResult};
use crate::header::{unix_timestamp, NodeHeader, NodeId};
use crate::reorg::verifier::CanonicalChain;
use crate::rpc::{HeaderSource, HeaderStream};

/// Lock a std mutex, recovering the data if a panicking test poisoned it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Build a header with a zero parent hash and a timestamp derived from `number`.
#[must_use]
pub fn header(node_id: NodeId, number: u64, hash: B256) -> NodeHeader {
    NodeHeader::new(
        node_id,
        number,
        hash,
        B256::ZERO,
        unix_timestamp(1_700_000_000 + number * 12),
    )
}

type HeaderItem = ReorgResult<NodeHeader>;

/// [`HeaderSource`] fed by the test through an unbounded channel.
///
/// Supports a single subscription. Pushing after the subscriber has gone
/// away is a no-op.
#[derive(Debug)]
pub struct ChannelHeaderSource {
    node_count: usize,
    tx: Mutex<Option<mpsc::UnboundedSender<HeaderItem>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<HeaderItem>>>,
    subscriptions: Mutex<Vec<String>>,
    unsubscriptions: Mutex<Vec<String>>,
}

impl ChannelHeaderSource {
    /// Create a source that claims `node_count` node connections.
    #[must_use]
    pub fn new(node_count: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            node_count,
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            subscriptions: Mutex::new(Vec::new()),
            unsubscriptions: Mutex::new(Vec::new()),
        }
    }

    fn send(&self, item: HeaderItem) {
        if let Some(tx) = lock(&self.tx).as_ref() {
            let _ = tx.send(item);
        }
    }

    /// Deliver one header.
    pub fn push(&self, header: NodeHeader) {
        self.send(Ok(header));
    }

    /// Deliver `hash` at `number` from every node, in node order.
    pub fn push_agreeing(&self, number: u64, hash: B256) {
        for node in 0..self.node_count {
            self.push(header(node, number, hash));
        }
    }

    /// Deliver a stream error, as a failed node connection would.
    pub fn push_error(&self, error: ReorgError) {
        self.send(Err(error));
    }

    /// End the stream.
    pub fn close(&self) {
        lock(&self.tx).take();
    }

    /// Names passed to [`HeaderSource::subscribe`].
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.subscriptions).clone()
    }

    /// Names passed to [`HeaderSource::unsubscribe`].
    #[must_use]
    pub fn unsubscriptions(&self) -> Vec<String> {
        lock(&self.unsubscriptions).clone()
    }
}

#[async_trait]
impl HeaderSource for ChannelHeaderSource {
    fn node_count(&self) -> usize {
        self.node_count
    }

    async fn subscribe(&self, name: &str) -> ReorgResult<HeaderStream> {
        let rx = lock(&self.rx).take().ok_or_else(|| {
            ReorgError::state("channel header source supports one subscription", None)
        })?;
        lock(&self.subscriptions).push(name.to_string());

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    async fn unsubscribe(&self, name: &str) -> ReorgResult<()> {
        lock(&self.unsubscriptions).push(name.to_string());
        Ok(())
    }
}

/// [`PartitionController`] that records calls instead of touching a network.
#[derive(Debug, Default)]
pub struct RecordingPartitionController {
    created: Mutex<Vec<PartitionHandle>>,
    removed: Mutex<Vec<PartitionHandle>>,
    next_id: AtomicUsize,
    fail_create: AtomicBool,
    fail_remove: AtomicBool,
    hang_create: AtomicBool,
    hang_remove: AtomicBool,
}

impl RecordingPartitionController {
    /// Create a controller whose calls succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `create_partition` calls fail.
    pub fn fail_creates(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `remove_partition` calls fail.
    pub fn fail_removes(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `create_partition` calls never complete.
    pub fn hang_creates(&self, hang: bool) {
        self.hang_create.store(hang, Ordering::SeqCst);
    }

    /// Make subsequent `remove_partition` calls never complete. The call is
    /// still recorded.
    pub fn hang_removes(&self, hang: bool) {
        self.hang_remove.store(hang, Ordering::SeqCst);
    }

    /// Partitions created so far.
    #[must_use]
    pub fn created(&self) -> Vec<PartitionHandle> {
        lock(&self.created).clone()
    }

    /// Partitions passed to `remove_partition`, including failed removals.
    #[must_use]
    pub fn removed(&self) -> Vec<PartitionHandle> {
        lock(&self.removed).clone()
    }

    /// Number of successful `create_partition` calls.
    #[must_use]
    pub fn create_calls(&self) -> usize {
        lock(&self.created).len()
    }

    /// Number of `remove_partition` calls.
    #[must_use]
    pub fn remove_calls(&self) -> usize {
        lock(&self.removed).len()
    }
}

#[async_trait]
impl PartitionController for RecordingPartitionController {
    async fn create_partition(
        &self,
        from: &str,
        to: &str,
        duration: Duration,
    ) -> ReorgResult<PartitionHandle> {
        if self.hang_create.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ReorgError::partition("injected create failure", None));
        }

        let id = format!("partition-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let handle = PartitionHandle::new(id, from, to, duration);
        lock(&self.created).push(handle.clone());
        Ok(handle)
    }

    async fn remove_partition(&self, handle: &PartitionHandle) -> ReorgResult<()> {
        lock(&self.removed).push(handle.clone());
        if self.hang_remove.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(ReorgError::partition("injected remove failure", None));
        }
        Ok(())
    }
}

/// [`CanonicalChain`] backed by a map of block number to hash.
#[derive(Debug, Default)]
pub struct InMemoryChain {
    blocks: Mutex<HashMap<u64, B256>>,
}

impl InMemoryChain {
    /// Create an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the canonical hash at `number`.
    pub fn set(&self, number: u64, hash: B256) {
        lock(&self.blocks).insert(number, hash);
    }
}

impl FromIterator<(u64, B256)> for InMemoryChain {
    fn from_iter<I: IntoIterator<Item = (u64, B256)>>(iter: I) -> Self {
        Self {
            blocks: Mutex::new(iter.into_iter().collect()),
        }
    }
}

#[async_trait]
impl CanonicalChain for InMemoryChain {
    async fn header_hash_by_number(&self, number: u64) -> ReorgResult<B256> {
        lock(&self.blocks)
            .get(&number)
            .copied()
            .ok_or_else(|| ReorgError::rpc(format!("Block {number} not found"), None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_source_delivers_in_order() {
        let source = ChannelHeaderSource::new(3);
        let mut headers = source.subscribe("test").await.unwrap();

        source.push_agreeing(1, B256::repeat_byte(1));
        source.close();

        let nodes: Vec<NodeId> = headers
            .by_ref()
            .map(|item| item.unwrap().node_id)
            .collect()
            .await;
        assert_eq!(nodes, vec![0, 1, 2]);
        assert_eq!(source.subscriptions(), vec!["test".to_string()]);
    }

    #[tokio::test]
    async fn test_channel_source_single_subscription() {
        let source = ChannelHeaderSource::new(3);
        let _headers = source.subscribe("first").await.unwrap();
        assert!(source.subscribe("second").await.is_err());
    }

    #[tokio::test]
    async fn test_recording_controller_failures() {
        let controller = RecordingPartitionController::new();
        let handle = controller
            .create_partition("tx-nodes", "miner-nodes", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(handle.id, "partition-0");

        controller.fail_removes(true);
        assert!(controller.remove_partition(&handle).await.is_err());
        assert_eq!(controller.remove_calls(), 1);

        controller.fail_creates(true);
        assert!(controller
            .create_partition("a", "b", Duration::from_secs(1))
            .await
            .is_err());
        assert_eq!(controller.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_recording_controller_hangs() {
        let controller = RecordingPartitionController::new();
        controller.hang_creates(true);
        let create = controller.create_partition("a", "b", Duration::from_secs(1));
        assert!(tokio::time::timeout(Duration::from_millis(50), create)
            .await
            .is_err());
        assert_eq!(controller.create_calls(), 0);

        controller.hang_creates(false);
        controller.hang_removes(true);
        let handle = controller
            .create_partition("a", "b", Duration::from_secs(1))
            .await
            .unwrap();
        let remove = controller.remove_partition(&handle);
        assert!(tokio::time::timeout(Duration::from_millis(50), remove)
            .await
            .is_err());
        assert_eq!(controller.remove_calls(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_chain() {
        let chain: InMemoryChain = [(6, B256::repeat_byte(6))].into_iter().collect();
        assert_eq!(
            chain.header_hash_by_number(6).await.unwrap(),
            B256::repeat_byte(6)
        );
        assert!(chain.header_hash_by_number(7).await.is_err());
    }
}
