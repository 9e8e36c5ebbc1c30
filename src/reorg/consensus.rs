//! Per-block agreement tracking across nodes.

use std::collections::{BTreeMap, HashMap};

use alloy::primitives::B256;
use tracing::debug;

use crate::header::{NodeHeader, NodeId};

/// Tracks which hash every node reported for every block number.
///
/// Both consensus and divergence are defined as "at least N reports and
/// whether they agree", so results do not depend on the order in which
/// headers arrive from different node connections.
///
/// ## Indexes
///
/// - **Block hash index**: block number → hashes in arrival order. Only grows.
/// - **Node block index**: (node, block number) → the header that node reported.
#[derive(Debug, Clone, Default)]
pub struct ConsensusTracker {
    block_hashes: BTreeMap<u64, Vec<B256>>,
    node_blocks: HashMap<(NodeId, u64), NodeHeader>,
}

impl ConsensusTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a header.
    ///
    /// Redelivered headers are appended again; callers must tolerate
    /// duplicates. The node block index keeps the latest header per
    /// (node, number).
    pub fn ingest(&mut self, header: NodeHeader) {
        debug!(
            node = header.node_id,
            block = header.number,
            hash = %header.hash,
            "Ingesting header"
        );
        self.block_hashes
            .entry(header.number)
            .or_default()
            .push(header.hash);
        self.node_blocks
            .insert((header.node_id, header.number), header);
    }

    /// True when at least `expected` hashes were reported for `number` and all are identical.
    #[must_use]
    pub fn has_consensus(&self, number: u64, expected: usize) -> bool {
        match self.block_hashes.get(&number) {
            Some(hashes) if hashes.len() >= expected => all_equal(hashes),
            _ => false,
        }
    }

    /// True when the block at `header.number` is a genuine fork point.
    ///
    /// Requires at least `expected` reports, so a block that other nodes
    /// simply have not reported yet is never classified as alternative.
    #[must_use]
    pub fn is_alternative(&self, header: &NodeHeader, expected: usize) -> bool {
        self.is_divergent(header.number, expected)
    }

    /// Number-keyed form of [`is_alternative`](Self::is_alternative).
    #[must_use]
    pub fn is_divergent(&self, number: u64, expected: usize) -> bool {
        match self.block_hashes.get(&number) {
            Some(hashes) if hashes.len() >= expected => !all_equal(hashes),
            _ => false,
        }
    }

    /// Hashes reported for `number`, in arrival order.
    #[must_use]
    pub fn hashes_at(&self, number: u64) -> &[B256] {
        self.block_hashes.get(&number).map_or(&[], Vec::as_slice)
    }

    /// Header that `node` reported for `number`.
    #[must_use]
    pub fn node_header(&self, node: NodeId, number: u64) -> Option<&NodeHeader> {
        self.node_blocks.get(&(node, number))
    }

    /// Nodes that reported a header for `number`, sorted by id.
    #[must_use]
    pub fn reported_nodes(&self, number: u64) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .node_blocks
            .keys()
            .filter(|(_, n)| *n == number)
            .map(|(node, _)| *node)
            .collect();
        nodes.sort_unstable();
        nodes
    }

    /// Highest block number any node has reported.
    #[must_use]
    pub fn latest_block(&self) -> Option<u64> {
        self.block_hashes.keys().next_back().copied()
    }
}

fn all_equal(hashes: &[B256]) -> bool {
    hashes.windows(2).all(|pair| pair[0] == pair[1])
}
