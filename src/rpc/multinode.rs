//! Fan-in of header subscriptions from every node.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::try_join_all;
use futures_util::stream::{self, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::websocket::{ReconnectingWebSocket, WebSocketProvider};
use super::{HeaderSource, HeaderStream};
use crate::error::{ReorgError, ReorgResult};
use crate::header::{NodeHeader, NodeId};

/// Capacity of the fan-in channel shared by all forwarder tasks.
const CHANNEL_CAPACITY: usize = 1024;

/// [`HeaderSource`] over one WebSocket connection per node.
///
/// Node ids are the indices of the URLs passed to [`connect`](Self::connect).
pub struct MultiNodeHeaderSource {
    nodes: Vec<Arc<WebSocketProvider>>,
    subscriptions: Mutex<HashMap<String, Vec<JoinHandle<()>>>>,
}

impl std::fmt::Debug for MultiNodeHeaderSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiNodeHeaderSource")
            .field("nodes", &self.nodes)
            .finish_non_exhaustive()
    }
}

impl MultiNodeHeaderSource {
    /// Connect to every node, retrying each initial connection with backoff.
    ///
    /// # Errors
    ///
    /// Returns an RPC error if any node cannot be reached.
    #[instrument(skip(ws_urls), fields(nodes = ws_urls.len()))]
    pub async fn connect(ws_urls: Vec<String>) -> ReorgResult<Self> {
        let connections = ws_urls.into_iter().map(|url| async move {
            let mut ws = ReconnectingWebSocket::new(url);
            ws.connect().await?;
            ws.into_provider()
                .map(Arc::new)
                .ok_or_else(|| ReorgError::rpc("connection closed during setup", None))
        });

        let nodes = try_join_all(connections).await?;
        info!(nodes = nodes.len(), "Connected to all nodes");
        Ok(Self::from_providers(nodes))
    }

    /// Build a source from already connected providers.
    #[must_use]
    pub fn from_providers(nodes: Vec<Arc<WebSocketProvider>>) -> Self {
        Self {
            nodes,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Provider for `node`, if it exists.
    #[must_use]
    pub fn node(&self, node: NodeId) -> Option<Arc<WebSocketProvider>> {
        self.nodes.get(node).cloned()
    }
}

#[async_trait]
impl HeaderSource for MultiNodeHeaderSource {
    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[instrument(skip(self))]
    async fn subscribe(&self, name: &str) -> ReorgResult<HeaderStream> {
        let mut subscriptions = self.subscriptions.lock().await;
        if subscriptions.contains_key(name) {
            return Err(ReorgError::state(
                format!("subscription '{name}' already exists"),
                None,
            ));
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut tasks = Vec::with_capacity(self.nodes.len());

        for (node_id, node) in self.nodes.iter().enumerate() {
            let mut blocks = match node.subscribe_blocks().await {
                Ok(blocks) => blocks,
                Err(e) => {
                    tasks.iter().for_each(JoinHandle::abort);
                    return Err(ReorgError::subscription(
                        format!("node {node_id}: {e}"),
                        None,
                    ));
                }
            };

            let tx = tx.clone();
            let url = node.url().to_string();
            tasks.push(tokio::spawn(async move {
                while let Some(header) = blocks.next().await {
                    let header = NodeHeader::from_rpc_header(node_id, &header);
                    if tx.send(Ok(header)).await.is_err() {
                        debug!(node_id, "Header receiver dropped");
                        return;
                    }
                }

                warn!(node_id, url = %url, "Header stream closed");
                let _ = tx
                    .send(Err(ReorgError::subscription(
                        format!("node {node_id} header stream closed"),
                        None,
                    )))
                    .await;
            }));
        }

        subscriptions.insert(name.to_string(), tasks);
        info!(nodes = self.nodes.len(), "Header subscription started");

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    #[instrument(skip(self))]
    async fn unsubscribe(&self, name: &str) -> ReorgResult<()> {
        if let Some(tasks) = self.subscriptions.lock().await.remove(name) {
            tasks.iter().for_each(JoinHandle::abort);
            info!("Header subscription stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_source() {
        let source = MultiNodeHeaderSource::from_providers(Vec::new());
        assert_eq!(source.node_count(), 0);
        assert!(source.node(0).is_none());
        assert!(source.unsubscribe("unknown").await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_subscription_rejected() {
        let source = MultiNodeHeaderSource::from_providers(Vec::new());
        let _stream = source.subscribe("reorg").await.unwrap();
        let err = source.subscribe("reorg").await.err().unwrap();
        assert!(matches!(err, ReorgError::StateError { .. }));

        source.unsubscribe("reorg").await.unwrap();
        assert!(source.subscribe("reorg").await.is_ok());
    }

    #[tokio::test]
    #[ignore = "Requires NODE_WS_URLS pointing at running nodes"]
    async fn test_live_fan_in() {
        let urls: Vec<String> = std::env::var("NODE_WS_URLS")
            .unwrap()
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();
        let source = MultiNodeHeaderSource::connect(urls).await.unwrap();
        let mut headers = source.subscribe("live").await.unwrap();

        let first = tokio::time::timeout(std::time::Duration::from_secs(30), headers.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(first.node_id < source.node_count());
        source.unsubscribe("live").await.unwrap();
    }
}
