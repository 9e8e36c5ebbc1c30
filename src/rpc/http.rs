//! HTTP provider for canonical chain lookups.
//!
//! After a partition heals, the verifier reads block hashes from the network
//! over plain request/response RPC. This module builds that provider and
//! implements [`CanonicalChain`] for it.
//!
//! ## Example
//!
//! ```no_run
//! use eth_reorg_chaos::rpc::{create_provider, get_latest_block};
//! use eth_reorg_chaos::error::ReorgResult;
//!
//! # async fn example() -> ReorgResult<()> {
//! let provider = create_provider("http://geth-1:8545").await?;
//! let latest_block = get_latest_block(&provider).await?;
//! println!("Latest block: {}", latest_block);
//! # Ok(())
//! # }
//! ```

use crate::error::{ReorgError, ReorgResult};
use crate::reorg::verifier::CanonicalChain;
use alloy::primitives::B256;
use alloy::providers::{Provider as AlloyProvider, ProviderBuilder, RootProvider};
use alloy::rpc::types::BlockTransactionsKind;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

/// Type alias for the HTTP provider.
pub type Provider = RootProvider<Http<Client>>;

/// Create a new provider connected to a node over HTTP.
///
/// # Errors
///
/// Returns an error if the RPC URL cannot be parsed.
#[allow(clippy::unused_async)]
#[instrument(skip(rpc_url), fields(rpc_host = tracing::field::Empty))]
pub async fn create_provider(rpc_url: &str) -> ReorgResult<Provider> {
    let host = rpc_url.split('?').next().unwrap_or("unknown");
    tracing::Span::current().record("rpc_host", host);
    debug!(rpc_host = host, "Creating HTTP provider");

    let url = rpc_url.parse().map_err(|e| {
        ReorgError::config(
            format!("Invalid RPC URL: '{rpc_url}'. Expected format: 'http://host:8545'"),
            Some(Box::new(e)),
        )
    })?;

    let provider = ProviderBuilder::new().on_http(url);

    info!(rpc_host = host, "HTTP provider initialized");
    Ok(provider)
}

/// Get the latest block number known to the node.
///
/// # Errors
///
/// Returns an error if the RPC request fails.
#[instrument(skip(provider), fields(block = tracing::field::Empty, duration_ms = tracing::field::Empty))]
pub async fn get_latest_block(provider: &Provider) -> ReorgResult<u64> {
    let start = std::time::Instant::now();
    let block_number = provider
        .get_block_number()
        .await
        .map_err(|e| ReorgError::rpc("Failed to fetch latest block number", Some(Box::new(e))))?;

    let duration = start.elapsed();
    tracing::Span::current().record("block", block_number);
    tracing::Span::current().record("duration_ms", duration.as_millis() as u64);

    debug!(block = block_number, "Latest block fetched");
    Ok(block_number)
}

/// Check the node is reachable by fetching the latest block.
///
/// # Errors
///
/// Returns an error if the RPC connection is not working.
#[instrument(skip(provider))]
pub async fn check_connection(provider: &Provider) -> ReorgResult<()> {
    match get_latest_block(provider).await {
        Ok(block) => {
            info!(block, "Connection check successful");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Connection check failed");
            Err(ReorgError::rpc(
                format!("Provider connection health check failed: {e}"),
                None,
            ))
        }
    }
}

#[async_trait]
impl CanonicalChain for Provider {
    async fn header_hash_by_number(&self, number: u64) -> ReorgResult<B256> {
        let block = self
            .get_block_by_number(number.into(), BlockTransactionsKind::Hashes)
            .await
            .map_err(|e| {
                ReorgError::rpc(format!("Failed to fetch block {number}"), Some(Box::new(e)))
            })?
            .ok_or_else(|| ReorgError::rpc(format!("Block {number} not found"), None))?;

        Ok(block.header.hash)
    }
}
