//! Configuration management for reorg sessions.
//!
//! This module handles loading and validating configuration from environment variables
//! using the `dotenvy` crate. All operations return [`ReorgResult`] for comprehensive
//! error handling.
//!
//! ## Environment Variables
//!
//! Network ([`NetworkConfig`]):
//! - `NODE_WS_URLS` (required): comma-separated WebSocket endpoints, one per node.
//!   The position of each URL is the node's [`NodeId`](crate::header::NodeId).
//! - `RPC_HTTP_URL`: HTTP endpoint used to read the canonical chain after healing
//!
//! Session ([`ReorgConfig`], all optional):
//! - `BLOCK_CONSENSUS_THRESHOLD`: nodes that must agree, and consecutive agreeing blocks (default: 3)
//! - `REORG_TIMEOUT_SECS`: overall session deadline (default: 600)
//! - `PARTITION_FROM_LABEL`: isolated node group (default: "tx-nodes")
//! - `PARTITION_TO_LABEL`: group the isolated nodes are cut off from (default: "miner-nodes")
//! - `PARTITION_DURATION_SECS`: requested partition lifetime (default: 3600)
//! - `PARTITION_CLEANUP_TIMEOUT_SECS`: bound on removing a partition after the session ended (default: 30)
//! - `REORG_NODE`: node on the partitioned side (default: 0)
//! - `REPLACED_BLOCKS_SLACK`: alternative blocks allowed to survive verification (default: 1)
//! - `VERIFY_EXCLUDE_LAST`: skip the last alternative block when verifying (default: true)
//!
//! ## Example
//!
//! ```no_run
//! use eth_reorg_chaos::config::{NetworkConfig, ReorgConfig};
//! use eth_reorg_chaos::error::ReorgResult;
//!
//! # fn main() -> ReorgResult<()> {
//! let network = NetworkConfig::from_env()?;
//! let config = ReorgConfig::from_env()?;
//! config.validate(network.node_count())?;
//! # Ok(())
//! # }
//! ```

use crate::error::{ReorgError, ReorgResult};
use crate::header::NodeId;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Smallest network that can exhibit a detectable fork.
///
/// With two nodes there is no third report to disagree against.
pub const MIN_NODE_COUNT: usize = 3;

/// Default number of agreeing nodes and consecutive agreeing blocks.
pub const DEFAULT_BLOCK_CONSENSUS_THRESHOLD: usize = 3;

/// Node endpoints of the network under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// WebSocket URL per node
    ws_urls: Vec<String>,

    /// Optional HTTP URL for canonical chain lookups
    http_url: Option<String>,
}

impl NetworkConfig {
    /// Create a network configuration from explicit endpoints.
    #[must_use]
    pub fn new(ws_urls: Vec<String>, http_url: Option<String>) -> Self {
        Self { ws_urls, http_url }
    }

    /// Load network endpoints from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `NODE_WS_URLS` is missing, empty, or contains a
    /// URL that is not a WebSocket URL.
    pub fn from_env() -> ReorgResult<Self> {
        // Load .env file if present (ignore error if file doesn't exist)
        dotenvy::dotenv().ok();

        let raw = env::var("NODE_WS_URLS").map_err(|e| {
            ReorgError::config(
                "NODE_WS_URLS environment variable is required",
                Some(Box::new(e)),
            )
        })?;
        let ws_urls = parse_url_list(&raw)?;

        let http_url = env::var("RPC_HTTP_URL").ok().filter(|url| !url.is_empty());

        Ok(Self { ws_urls, http_url })
    }

    /// Get the WebSocket URLs, indexed by node id.
    #[must_use]
    pub fn ws_urls(&self) -> &[String] {
        &self.ws_urls
    }

    /// Get the HTTP URL used for canonical chain lookups, if configured.
    #[must_use]
    pub fn http_url(&self) -> Option<&str> {
        self.http_url.as_deref()
    }

    /// Number of configured node connections.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.ws_urls.len()
    }
}

/// Split a comma-separated URL list and check every entry is a WebSocket URL.
fn parse_url_list(raw: &str) -> ReorgResult<Vec<String>> {
    let urls: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(ToString::to_string)
        .collect();

    if urls.is_empty() {
        return Err(ReorgError::config(
            "NODE_WS_URLS must contain at least one URL",
            None,
        ));
    }

    if let Some(bad) = urls
        .iter()
        .find(|url| !url.starts_with("ws://") && !url.starts_with("wss://"))
    {
        return Err(ReorgError::config(
            format!("NODE_WS_URLS entries must start with ws:// or wss://, got: {bad}"),
            None,
        ));
    }

    Ok(urls)
}

/// Tunables for a single reorg session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgConfig {
    /// Agreeing nodes required per block, and consecutive agreeing blocks
    /// required before the network counts as converged
    block_consensus_threshold: usize,

    /// Overall session deadline
    timeout: Duration,

    /// Label of the node group that gets isolated
    from_label: String,

    /// Label of the node group it is isolated from
    to_label: String,

    /// Requested lifetime of the partition
    partition_duration: Duration,

    /// Bound on the partition removal run after the session ended
    cleanup_timeout: Duration,

    /// Node on the partitioned side whose blocks become alternative
    reorg_node: NodeId,

    /// Alternative blocks allowed to survive verification
    replaced_blocks_slack: usize,

    /// Skip the final alternative block during verification
    exclude_last: bool,
}

impl Default for ReorgConfig {
    fn default() -> Self {
        Self {
            block_consensus_threshold: DEFAULT_BLOCK_CONSENSUS_THRESHOLD,
            timeout: Duration::from_secs(600),
            from_label: "tx-nodes".to_string(),
            to_label: "miner-nodes".to_string(),
            partition_duration: Duration::from_secs(3600),
            cleanup_timeout: Duration::from_secs(30),
            reorg_node: 0,
            replaced_blocks_slack: 1,
            exclude_last: true,
        }
    }
}

impl ReorgConfig {
    /// Load session tunables from environment variables, applying defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> ReorgResult<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let block_consensus_threshold =
            env_or("BLOCK_CONSENSUS_THRESHOLD", defaults.block_consensus_threshold)?;
        let timeout = Duration::from_secs(env_or("REORG_TIMEOUT_SECS", 600)?);
        let from_label = env::var("PARTITION_FROM_LABEL").unwrap_or(defaults.from_label);
        let to_label = env::var("PARTITION_TO_LABEL").unwrap_or(defaults.to_label);
        let partition_duration = Duration::from_secs(env_or("PARTITION_DURATION_SECS", 3600)?);
        let cleanup_timeout = Duration::from_secs(env_or("PARTITION_CLEANUP_TIMEOUT_SECS", 30)?);
        let reorg_node = env_or("REORG_NODE", defaults.reorg_node)?;
        let replaced_blocks_slack = env_or("REPLACED_BLOCKS_SLACK", defaults.replaced_blocks_slack)?;
        let exclude_last = env_or("VERIFY_EXCLUDE_LAST", defaults.exclude_last)?;

        Ok(Self {
            block_consensus_threshold,
            timeout,
            from_label,
            to_label,
            partition_duration,
            cleanup_timeout,
            reorg_node,
            replaced_blocks_slack,
            exclude_last,
        })
    }

    /// Check the configuration against the number of node connections.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if:
    /// - fewer than [`MIN_NODE_COUNT`] nodes are connected
    /// - the consensus threshold is below 2 or above the node count
    /// - the reorg node is not one of the connected nodes
    /// - the timeout is zero
    pub fn validate(&self, node_count: usize) -> ReorgResult<()> {
        if node_count < MIN_NODE_COUNT {
            return Err(ReorgError::config(
                format!(
                    "at least {MIN_NODE_COUNT} node connections are required to detect a fork, got {node_count}"
                ),
                None,
            ));
        }

        if self.block_consensus_threshold < 2 || self.block_consensus_threshold > node_count {
            return Err(ReorgError::config(
                format!(
                    "BLOCK_CONSENSUS_THRESHOLD must be between 2 and {node_count}, got {}",
                    self.block_consensus_threshold
                ),
                None,
            ));
        }

        if self.reorg_node >= node_count {
            return Err(ReorgError::config(
                format!(
                    "REORG_NODE {} is not one of the {node_count} configured nodes",
                    self.reorg_node
                ),
                None,
            ));
        }

        if self.timeout.is_zero() {
            return Err(ReorgError::config("session timeout must be non-zero", None));
        }

        Ok(())
    }

    /// Set the consensus threshold.
    #[must_use]
    pub const fn with_block_consensus_threshold(mut self, threshold: usize) -> Self {
        self.block_consensus_threshold = threshold;
        self
    }

    /// Set the session deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the partition group labels.
    #[must_use]
    pub fn with_partition_labels(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.from_label = from.into();
        self.to_label = to.into();
        self
    }

    /// Set the requested partition lifetime.
    #[must_use]
    pub const fn with_partition_duration(mut self, duration: Duration) -> Self {
        self.partition_duration = duration;
        self
    }

    /// Set the bound on partition removal during cleanup.
    #[must_use]
    pub const fn with_cleanup_timeout(mut self, timeout: Duration) -> Self {
        self.cleanup_timeout = timeout;
        self
    }

    /// Set the node on the partitioned side.
    #[must_use]
    pub const fn with_reorg_node(mut self, node: NodeId) -> Self {
        self.reorg_node = node;
        self
    }

    /// Set how many alternative blocks may survive verification.
    #[must_use]
    pub const fn with_replaced_blocks_slack(mut self, slack: usize) -> Self {
        self.replaced_blocks_slack = slack;
        self
    }

    /// Set whether verification skips the final alternative block.
    #[must_use]
    pub const fn with_exclude_last(mut self, exclude_last: bool) -> Self {
        self.exclude_last = exclude_last;
        self
    }

    /// Get the consensus threshold.
    #[must_use]
    pub const fn block_consensus_threshold(&self) -> usize {
        self.block_consensus_threshold
    }

    /// Get the session deadline.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the label of the isolated group.
    #[must_use]
    pub fn from_label(&self) -> &str {
        &self.from_label
    }

    /// Get the label of the group it is isolated from.
    #[must_use]
    pub fn to_label(&self) -> &str {
        &self.to_label
    }

    /// Get the requested partition lifetime.
    #[must_use]
    pub const fn partition_duration(&self) -> Duration {
        self.partition_duration
    }

    /// Get the bound on partition removal during cleanup.
    #[must_use]
    pub const fn cleanup_timeout(&self) -> Duration {
        self.cleanup_timeout
    }

    /// Get the node on the partitioned side.
    #[must_use]
    pub const fn reorg_node(&self) -> NodeId {
        self.reorg_node
    }

    /// Get the verification slack.
    #[must_use]
    pub const fn replaced_blocks_slack(&self) -> usize {
        self.replaced_blocks_slack
    }

    /// Whether verification skips the final alternative block.
    #[must_use]
    pub const fn exclude_last(&self) -> bool {
        self.exclude_last
    }
}

/// Read and parse an optional environment variable.
fn env_or<T>(key: &str, default: T) -> ReorgResult<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|e| {
            ReorgError::config(format!("{key} has an invalid value: {raw}"), Some(Box::new(e)))
        }),
        Err(_) => Ok(default),
    }
}
