//! WebSocket connections to individual nodes.
//!
//! Every monitored node gets its own WebSocket connection so that headers can
//! be attributed to the node that reported them.
//!
//! # Connection Policy
//!
//! - The *initial* connection is retried with exponential backoff and jitter
//!   ([`ReconnectingWebSocket`]), since cluster nodes often come up slowly.
//! - Once a session is running, a dropped subscription is *not* retried.
//!   Headers missed while reconnecting would skew per-block agreement counts.

use std::time::Duration;

use alloy::{
    primitives::B256,
    providers::{Provider, ProviderBuilder, RootProvider},
    pubsub::SubscriptionStream,
    rpc::types::{BlockTransactionsKind, Header},
    transports::BoxTransport,
};
use async_trait::async_trait;
use eyre::Result;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{ReorgError, ReorgResult};
use crate::reorg::verifier::CanonicalChain;

/// WebSocket provider for one node.
///
/// # Example
///
/// ```no_run
/// use eth_reorg_chaos::rpc::websocket::WebSocketProvider;
/// use futures_util::StreamExt;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let ws_provider = WebSocketProvider::connect("ws://geth-0:8546".to_string()).await?;
///
///     let mut stream = ws_provider.subscribe_blocks().await?;
///     while let Some(header) = stream.next().await {
///         println!("New block: {}", header.number);
///     }
///
///     Ok(())
/// }
/// ```
pub struct WebSocketProvider {
    provider: RootProvider<BoxTransport>,
    url: String,
}

impl std::fmt::Debug for WebSocketProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketProvider")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl WebSocketProvider {
    /// Connects to a node's WebSocket RPC endpoint.
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or the connection fails.
    #[instrument(skip(ws_url), fields(ws_url = %ws_url, duration_ms = tracing::field::Empty))]
    pub async fn connect(ws_url: String) -> Result<Self> {
        info!("Connecting to WebSocket");

        let start = std::time::Instant::now();
        let provider = ProviderBuilder::new()
            .on_builtin(&ws_url)
            .await
            .map_err(|e| {
                error!(error = %e, "WebSocket connection failed");
                eyre::eyre!("WebSocket connection to {} failed: {}", ws_url, e)
            })?;

        let duration = start.elapsed();
        tracing::Span::current().record("duration_ms", duration.as_millis() as u64);
        info!(duration_ms = duration.as_millis(), "WebSocket connected");

        Ok(Self {
            provider,
            url: ws_url,
        })
    }

    /// Returns a reference to the underlying Alloy provider.
    pub const fn provider(&self) -> &RootProvider<BoxTransport> {
        &self.provider
    }

    /// Returns the WebSocket URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Subscribes to new block headers.
    ///
    /// The stream ends when the WebSocket disconnects.
    ///
    /// # Errors
    ///
    /// Returns error if the subscription cannot be created.
    #[instrument(skip(self), fields(ws_url = %self.url))]
    pub async fn subscribe_blocks(&self) -> Result<SubscriptionStream<Header>> {
        let sub = self.provider.subscribe_blocks().await.map_err(|e| {
            error!(error = %e, "Block subscription failed");
            eyre::eyre!("Block subscription on {} failed: {}", self.url, e)
        })?;

        debug!("Block subscription active");
        Ok(sub.into_stream())
    }
}

#[async_trait]
impl CanonicalChain for WebSocketProvider {
    async fn header_hash_by_number(&self, number: u64) -> ReorgResult<B256> {
        let block = self
            .provider
            .get_block_by_number(number.into(), BlockTransactionsKind::Hashes)
            .await
            .map_err(|e| {
                ReorgError::rpc(format!("Failed to fetch block {number}"), Some(Box::new(e)))
            })?
            .ok_or_else(|| ReorgError::rpc(format!("Block {number} not found"), None))?;

        Ok(block.header.hash)
    }
}

/// Initial WebSocket connection with exponential backoff.
///
/// # Example
///
/// ```no_run
/// use eth_reorg_chaos::rpc::websocket::ReconnectingWebSocket;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut ws = ReconnectingWebSocket::new("ws://geth-0:8546".to_string());
///     ws.connect().await?;
///     let provider = ws.into_provider();
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct ReconnectingWebSocket {
    url: String,
    provider: Option<WebSocketProvider>,
    max_connect_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
}

impl ReconnectingWebSocket {
    /// Creates a connector with default settings.
    ///
    /// # Default Settings
    ///
    /// - Max connect attempts: 10
    /// - Initial delay: 1 second
    /// - Max delay: 60 seconds
    /// - Exponential backoff with 25% jitter
    pub const fn new(url: String) -> Self {
        Self::with_settings(url, 10, Duration::from_secs(1), Duration::from_secs(60))
    }

    /// Creates a connector with custom settings.
    pub const fn with_settings(
        url: String,
        max_connect_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        Self {
            url,
            provider: None,
            max_connect_attempts,
            initial_delay,
            max_delay,
        }
    }

    /// Connects with retry, doubling the delay after each failure up to `max_delay`.
    ///
    /// # Errors
    ///
    /// Returns [`ReorgError::RpcError`] once the attempt budget is spent.
    pub async fn connect(&mut self) -> ReorgResult<()> {
        let mut attempt = 0;
        let mut delay = self.initial_delay;

        loop {
            match WebSocketProvider::connect(self.url.clone()).await {
                Ok(provider) => {
                    self.provider = Some(provider);
                    return Ok(());
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.max_connect_attempts {
                        error!(
                            attempts = attempt,
                            url = %self.url,
                            "Max connection attempts reached"
                        );
                        return Err(ReorgError::rpc(
                            format!(
                                "Failed to connect to {} after {attempt} attempts: {e}",
                                self.url
                            ),
                            None,
                        ));
                    }

                    warn!(
                        attempt,
                        max = self.max_connect_attempts,
                        error = %e,
                        ?delay,
                        "WebSocket connection failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = next_delay(delay, self.max_delay);
                }
            }
        }
    }

    /// Returns the connected provider, if any.
    pub const fn provider(&self) -> Option<&WebSocketProvider> {
        self.provider.as_ref()
    }

    /// Consumes the connector, returning the connected provider.
    pub fn into_provider(self) -> Option<WebSocketProvider> {
        self.provider
    }

    /// Checks if currently connected.
    pub const fn is_connected(&self) -> bool {
        self.provider.is_some()
    }

    /// Returns the WebSocket URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Double `delay` up to `max`, then apply ±12.5% jitter.
fn next_delay(delay: Duration, max: Duration) -> Duration {
    let doubled = std::cmp::min(delay * 2, max);
    let jitter_factor = 0.25 * (rand::random::<f64>() - 0.5);
    doubled.mul_f64(1.0 + jitter_factor)
}
