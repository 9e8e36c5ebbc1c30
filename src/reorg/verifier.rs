//! Post-reorg verification.
//!
//! After a session completes, [`ReorgVerifier`] proves the alternative chain
//! was discarded: for each alternative block it fetches the canonical hash at
//! that number and compares it with the hash the reorg node reported while
//! partitioned. A differing hash means the block was replaced.
//!
//! ## Tolerance
//!
//! The last alternative block is excluded by default. Healing can coincide
//! with a block boundary so that the final alternative block is re-mined into
//! the converged chain. Correspondingly, only `depth - slack` replacements are
//! required (slack defaults to 1). Both knobs are configurable.

use std::sync::Arc;

use alloy::primitives::B256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::report::ReorgReport;
use crate::error::{ReorgError, ReorgResult};

/// Read access to the network's canonical chain.
#[async_trait]
pub trait CanonicalChain: Send + Sync {
    /// Canonical block hash at `number`.
    async fn header_hash_by_number(&self, number: u64) -> ReorgResult<B256>;
}

#[async_trait]
impl<T: CanonicalChain + ?Sized> CanonicalChain for Arc<T> {
    async fn header_hash_by_number(&self, number: u64) -> ReorgResult<B256> {
        (**self).header_hash_by_number(number).await
    }
}

/// Result of a successful verification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSummary {
    /// Alternative blocks that were compared
    pub checked: Vec<u64>,
    /// Blocks whose canonical hash differs from the forked hash
    pub replaced: Vec<u64>,
    /// Blocks whose canonical hash still equals the forked hash
    pub unchanged: Vec<u64>,
    /// Minimum number of replacements required
    pub required: usize,
}

/// Checks that the alternative blocks of a session were overwritten.
#[derive(Debug)]
pub struct ReorgVerifier<C> {
    chain: C,
    report: ReorgReport,
    slack: usize,
    exclude_last: bool,
}

impl<C: CanonicalChain> ReorgVerifier<C> {
    /// Create a verifier with slack 1 and the last block excluded.
    #[must_use]
    pub const fn new(chain: C, report: ReorgReport) -> Self {
        Self {
            chain,
            report,
            slack: 1,
            exclude_last: true,
        }
    }

    /// Set how many fewer replacements than the requested depth are tolerated.
    #[must_use]
    pub const fn with_slack(mut self, slack: usize) -> Self {
        self.slack = slack;
        self
    }

    /// Set whether the last alternative block is skipped.
    #[must_use]
    pub const fn with_exclude_last(mut self, exclude_last: bool) -> Self {
        self.exclude_last = exclude_last;
        self
    }

    /// The report being verified.
    #[must_use]
    pub const fn report(&self) -> &ReorgReport {
        &self.report
    }

    /// Minimum number of replaced blocks for the reorg to count.
    #[must_use]
    pub const fn required_replacements(&self) -> usize {
        self.report.depth_requested.saturating_sub(self.slack)
    }

    /// Compare the canonical hash of each block in `alt_blocks` against the
    /// reorg node's recorded hash.
    ///
    /// # Errors
    ///
    /// - [`ReorgError::ReorgNotCompleted`] if too few blocks were replaced
    /// - [`ReorgError::StateError`] if a block has no recorded forked header
    /// - [`ReorgError::RpcError`] if a canonical hash cannot be fetched
    #[instrument(skip(self, alt_blocks), fields(blocks = alt_blocks.len(), exclude_last))]
    pub async fn verify_replaced(
        &self,
        alt_blocks: &[u64],
        exclude_last: bool,
    ) -> ReorgResult<VerificationSummary> {
        let checked = match alt_blocks.split_last() {
            Some((_, rest)) if exclude_last => rest,
            _ => alt_blocks,
        };

        let mut summary = VerificationSummary {
            checked: checked.to_vec(),
            required: self.required_replacements(),
            ..VerificationSummary::default()
        };

        for &number in checked {
            let forked = self.report.forked_hash(number).ok_or_else(|| {
                ReorgError::state(
                    format!("no forked header recorded for alternative block {number}"),
                    None,
                )
            })?;
            let canonical = self.chain.header_hash_by_number(number).await?;

            if canonical == forked {
                warn!(block = number, hash = %canonical, "Alternative block still canonical");
                summary.unchanged.push(number);
            } else {
                debug!(block = number, %forked, %canonical, "Alternative block replaced");
                summary.replaced.push(number);
            }
        }

        if summary.replaced.len() < summary.required {
            return Err(ReorgError::not_completed(
                summary.replaced.len(),
                summary.required,
            ));
        }

        info!(
            replaced = summary.replaced.len(),
            required = summary.required,
            "Reorg verified"
        );
        Ok(summary)
    }

    /// Verify every alternative block in the report.
    ///
    /// # Errors
    ///
    /// Returns [`ReorgError::StateError`] if the session did not complete,
    /// otherwise the errors of [`verify_replaced`](Self::verify_replaced).
    pub async fn verify_all_replaced(&self) -> ReorgResult<VerificationSummary> {
        if !self.report.is_complete() {
            return Err(ReorgError::state(
                format!(
                    "cannot verify a session that ended {}",
                    self.report.phase
                ),
                None,
            ));
        }

        self.verify_replaced(&self.report.alt_blocks, self.exclude_last)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{unix_timestamp, NodeHeader};
    use crate::reorg::machine::Phase;
    use crate::testing::InMemoryChain;
    use chrono::Utc;

    fn report(depth: usize, alt_blocks: &[u64]) -> ReorgReport {
        ReorgReport {
            depth_requested: depth,
            reorg_node: 0,
            fork_block: alt_blocks.first().copied(),
            alt_blocks: alt_blocks.to_vec(),
            forked_headers: alt_blocks
                .iter()
                .map(|&n| {
                    NodeHeader::new(
                        0,
                        n,
                        B256::repeat_byte(0xa0 + n as u8),
                        B256::ZERO,
                        unix_timestamp(n),
                    )
                })
                .collect(),
            phase: Phase::Complete,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_depth_two_excluding_last() {
        let chain = InMemoryChain::new();
        chain.set(6, B256::repeat_byte(0x06));

        let verifier = ReorgVerifier::new(chain, report(2, &[6, 7]));
        let summary = verifier.verify_all_replaced().await.unwrap();
        assert_eq!(summary.checked, vec![6]);
        assert_eq!(summary.replaced, vec![6]);
        assert_eq!(summary.required, 1);
    }

    #[tokio::test]
    async fn test_not_replaced() {
        let chain = InMemoryChain::new();
        chain.set(6, B256::repeat_byte(0xa6));

        let verifier = ReorgVerifier::new(chain, report(2, &[6, 7]));
        let err = verifier.verify_all_replaced().await.unwrap_err();
        assert!(matches!(
            err,
            ReorgError::ReorgNotCompleted {
                replaced: 0,
                required: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_strict_verification() {
        let chain = InMemoryChain::new();
        chain.set(6, B256::repeat_byte(0x06));
        chain.set(7, B256::repeat_byte(0xa7));

        let verifier = ReorgVerifier::new(chain, report(2, &[6, 7]))
            .with_slack(0)
            .with_exclude_last(false);
        assert_eq!(verifier.required_replacements(), 2);

        let err = verifier.verify_all_replaced().await.unwrap_err();
        assert!(matches!(
            err,
            ReorgError::ReorgNotCompleted {
                replaced: 1,
                required: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_canonical_block() {
        let verifier = ReorgVerifier::new(InMemoryChain::new(), report(3, &[6, 7, 8]));
        let err = verifier.verify_all_replaced().await.unwrap_err();
        assert!(matches!(err, ReorgError::RpcError { .. }));
    }

    #[tokio::test]
    async fn test_incomplete_session_rejected() {
        let mut failed = report(2, &[6]);
        failed.phase = Phase::Failed;

        let verifier = ReorgVerifier::new(InMemoryChain::new(), failed);
        let err = verifier.verify_all_replaced().await.unwrap_err();
        assert!(matches!(err, ReorgError::StateError { .. }));
    }

    #[tokio::test]
    async fn test_empty_alt_blocks() {
        let verifier = ReorgVerifier::new(InMemoryChain::new(), report(1, &[]));
        let summary = verifier.verify_replaced(&[], true).await.unwrap();
        assert!(summary.checked.is_empty());
        assert_eq!(summary.required, 0);
    }
}
