//! Chain reorganization injection and verification.
//!
//! A reorg is produced by partitioning one node (the *reorg node*) away from
//! the rest of a live network, letting both sides mine for a fixed number of
//! blocks, healing the partition and waiting for the network to reconverge.
//!
//! ## How It Works
//!
//! 1. **Initial consensus**: wait for `threshold` consecutive blocks on which
//!    at least `threshold` nodes report the same hash
//! 2. **Fork**: on the first header after a reorg is requested, record the
//!    fork block and create the partition
//! 3. **Observe**: count block numbers where the reorg node's hash disagrees
//!    with the others ([`ConsensusTracker::is_alternative`])
//! 4. **Heal**: once `depth` alternative blocks are seen, remove the partition
//! 5. **Final consensus**: wait for `threshold` consecutive agreeing blocks
//!    past the fork window
//! 6. **Verify**: check the canonical chain no longer contains the reorg
//!    node's alternative blocks ([`ReorgVerifier`])
//!
//! Headers arrive from independent node connections without any ordering
//! guarantee. Every decision is based on per-block-number report counts,
//! which only grow, so arrival order does not matter.
//!
//! ## Example
//!
//! ```rust,ignore
//! use eth_reorg_chaos::reorg::{ReorgSession, ReorgVerifier};
//!
//! # async fn example(
//! #     config: eth_reorg_chaos::config::ReorgConfig,
//! #     source: std::sync::Arc<dyn eth_reorg_chaos::rpc::HeaderSource>,
//! #     partitions: std::sync::Arc<dyn eth_reorg_chaos::chaos::PartitionController>,
//! #     chain: eth_reorg_chaos::rpc::Provider,
//! # ) -> eth_reorg_chaos::error::ReorgResult<()> {
//! let session = ReorgSession::start(config, source, partitions).await?;
//! session.wait_ready().await?;
//! session.reorg(3).await?;
//! session.wait_depth_reached().await?;
//!
//! let report = session.wait().await?;
//! ReorgVerifier::new(chain, report).verify_all_replaced().await?;
//! # Ok(())
//! # }
//! ```

pub mod consensus;
pub mod machine;
pub mod report;
pub mod session;
pub mod signal;
pub mod verifier;

pub use consensus::ConsensusTracker;
pub use machine::{Effect, Phase, ReorgStateMachine, SessionSnapshot};
pub use report::ReorgReport;
pub use session::ReorgSession;
pub use signal::{AbortReason, Signal};
pub use verifier::{CanonicalChain, ReorgVerifier, VerificationSummary};
