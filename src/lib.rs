//! # EVM Chain Reorg Injector
//!
//! Injects and verifies chain reorganizations on a live multi-node EVM
//! network using [Alloy](https://github.com/alloy-rs/alloy).
//!
//! A session partitions one node away from the miners, lets both sides mine
//! a controlled number of divergent blocks, heals the partition and waits for
//! the network to reconverge. Afterwards the canonical chain is checked to
//! prove the alternative blocks were overwritten.
//!
//! ## Architecture
//!
//! 1. **Config Layer** ([`config`]) - Node endpoints and session tunables
//! 2. **RPC Layer** ([`rpc`]) - Per-node WebSocket subscriptions, fanned into one stream
//! 3. **Chaos Layer** ([`chaos`]) - Network partition creation and removal
//! 4. **Reorg Layer** ([`reorg`]) - Consensus tracking, state machine, session, verifier
//! 5. **Testing** ([`testing`]) - In-process fakes for the layers above
//!
//! ## Quick Start
//!
//! ```bash
//! export NODE_WS_URLS=ws://geth-0:8546,ws://geth-1:8546,ws://geth-2:8546
//! export PARTITION_CREATE_CMD="docker network disconnect geth-net geth-0"
//! export PARTITION_REMOVE_CMD="docker network connect geth-net geth-0"
//!
//! cargo run --release -- reorg --depth 3
//! ```
//!
//! ## Using as a Library
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use eth_reorg_chaos::{
//!     chaos::CommandPartitionController,
//!     config::{NetworkConfig, ReorgConfig},
//!     reorg::{ReorgSession, ReorgVerifier},
//!     rpc::{create_provider, MultiNodeHeaderSource},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let network = NetworkConfig::from_env()?;
//!     let source = Arc::new(MultiNodeHeaderSource::connect(network.ws_urls().to_vec()).await?);
//!     let partitions = Arc::new(CommandPartitionController::from_env()?);
//!
//!     let session = ReorgSession::start(ReorgConfig::from_env()?, source, partitions).await?;
//!     session.wait_ready().await?;
//!     session.reorg(3).await?;
//!     let report = session.wait().await?;
//!
//!     let chain = create_provider("http://geth-1:8545").await?;
//!     ReorgVerifier::new(chain, report).verify_all_replaced().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`error::ReorgResult<T>`](error::ReorgResult):
//!
//! ```rust
//! use eth_reorg_chaos::error::{ReorgError, ReorgResult};
//!
//! fn example() -> ReorgResult<()> {
//!     Ok(())
//! }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! # Unit and scripted-session tests
//! cargo test
//!
//! # Live network tests (need NODE_WS_URLS and partition commands)
//! cargo test -- --ignored
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod chaos;
pub mod cli;
pub mod config;
pub mod error;
pub mod header;
pub mod observability;
pub mod reorg;
pub mod rpc;
pub mod testing;
