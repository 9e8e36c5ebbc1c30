//! Node connections and header delivery.
//!
//! This module provides the [`HeaderSource`] abstraction a reorg session reads
//! headers from, plus the Alloy-backed implementations used against a live
//! network.
//!
//! # Provider Types
//!
//! - **HTTP Provider** ([`http`]): canonical chain lookups after healing
//! - **WebSocket Provider** ([`websocket`]): one push connection per node
//! - **Multi-node source** ([`multinode`]): fans every node's headers into one stream
//!
//! # Architecture
//!
//! ```text
//!   node 0 (ws)   node 1 (ws)   node 2 (ws)
//!        │             │             │
//!   forwarder     forwarder     forwarder     (one task per node)
//!        └─────────────┼─────────────┘
//!                      ▼
//!               mpsc fan-in channel
//!                      ▼
//!                HeaderStream  ──▶  ReorgSession (single consumer)
//! ```
//!
//! Headers carry no cross-node ordering guarantee. A node stream that errors
//! or closes yields one `Err` item and is not resubscribed.
//!
//! # Example
//!
//! ```rust,ignore
//! use eth_reorg_chaos::rpc::{HeaderSource, MultiNodeHeaderSource};
//! use futures_util::StreamExt;
//!
//! # async fn example() -> eth_reorg_chaos::error::ReorgResult<()> {
//! let source = MultiNodeHeaderSource::connect(vec![
//!     "ws://geth-0:8546".to_string(),
//!     "ws://geth-1:8546".to_string(),
//!     "ws://geth-2:8546".to_string(),
//! ]).await?;
//!
//! let mut headers = source.subscribe("monitor").await?;
//! while let Some(header) = headers.next().await {
//!     let header = header?;
//!     println!("node {} mined block {}", header.node_id, header.number);
//! }
//! # Ok(())
//! # }
//! ```

pub mod http;
pub mod multinode;
pub mod websocket;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::ReorgResult;
use crate::header::NodeHeader;

// Re-export commonly used types
pub use http::{check_connection, create_provider, get_latest_block, Provider};
pub use multinode::MultiNodeHeaderSource;
pub use websocket::{ReconnectingWebSocket, WebSocketProvider};

/// Stream of headers from every node, in arrival order.
pub type HeaderStream = BoxStream<'static, ReorgResult<NodeHeader>>;

/// A set of node connections delivering mined block headers.
#[async_trait]
pub trait HeaderSource: Send + Sync {
    /// Number of node connections behind this source.
    fn node_count(&self) -> usize;

    /// Start a named subscription to headers from all nodes.
    async fn subscribe(&self, name: &str) -> ReorgResult<HeaderStream>;

    /// Stop the named subscription. Unknown names are ignored.
    async fn unsubscribe(&self, name: &str) -> ReorgResult<()>;
}
