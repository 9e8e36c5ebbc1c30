//! Persistent record of a reorg session.
//!
//! A [`ReorgReport`] captures everything verification needs after the session
//! has ended: the requested depth, where the fork started, the alternative
//! block numbers and the headers the reorg node reported at those numbers.
//!
//! Reports are written as pretty-printed JSON so a separate verification step
//! (or a human) can inspect them later:
//!
//! ```json
//! {
//!   "depth_requested": 2,
//!   "reorg_node": 0,
//!   "fork_block": 6,
//!   "alt_blocks": [6, 7],
//!   "forked_headers": [ ... ],
//!   "phase": "Complete",
//!   "started_at": "2026-10-18T09:00:00Z",
//!   "finished_at": "2026-10-18T09:02:13Z"
//! }
//! ```

use std::fs;
use std::path::Path;

use alloy::primitives::B256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::machine::{Phase, ReorgStateMachine};
use crate::error::{ReorgError, ReorgResult};
use crate::header::{NodeHeader, NodeId};

/// Outcome of a reorg session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorgReport {
    /// Requested reorg depth (0 if no reorg was requested)
    pub depth_requested: usize,
    /// Node on the partitioned side
    pub reorg_node: NodeId,
    /// Block number the fork started at
    pub fork_block: Option<u64>,
    /// Alternative block numbers, strictly increasing
    pub alt_blocks: Vec<u64>,
    /// Headers the reorg node reported at each alternative block
    pub forked_headers: Vec<NodeHeader>,
    /// Phase the session ended in
    pub phase: Phase,
    /// When the session started
    pub started_at: DateTime<Utc>,
    /// When the session ended
    pub finished_at: DateTime<Utc>,
}

impl ReorgReport {
    /// Build a report from the final state of a session.
    #[must_use]
    pub fn from_machine(machine: &ReorgStateMachine, started_at: DateTime<Utc>) -> Self {
        Self {
            depth_requested: machine.depth_requested().unwrap_or(0),
            reorg_node: machine.reorg_node(),
            fork_block: machine.fork_block(),
            alt_blocks: machine.alt_blocks().to_vec(),
            forked_headers: machine.forked_headers(),
            phase: machine.phase(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Whether the session reconverged after the reorg.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    /// Hash the reorg node reported at `number`, if it was an alternative block.
    #[must_use]
    pub fn forked_hash(&self, number: u64) -> Option<B256> {
        self.forked_headers
            .iter()
            .find(|header| header.number == number)
            .map(|header| header.hash)
    }

    /// Save the report to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or file writing fails.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> ReorgResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ReorgError::state("Failed to serialize report", Some(Box::new(e))))?;

        fs::write(path.as_ref(), json)
            .map_err(|e| ReorgError::state("Failed to write report file", Some(Box::new(e))))?;

        info!("Report saved to {}", path.as_ref().display());
        Ok(())
    }

    /// Load a report from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns error if the file is missing or cannot be parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> ReorgResult<Self> {
        let json = fs::read_to_string(path.as_ref())
            .map_err(|e| ReorgError::state("Failed to read report file", Some(Box::new(e))))?;

        let report: Self = serde_json::from_str(&json)
            .map_err(|e| ReorgError::state("Failed to deserialize report", Some(Box::new(e))))?;

        info!(
            "Report loaded from {}: depth={}, alt_blocks={:?}",
            path.as_ref().display(),
            report.depth_requested,
            report.alt_blocks
        );
        Ok(report)
    }
}
