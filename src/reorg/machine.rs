//! Reorg state machine.
//!
//! [`ReorgStateMachine`] is the synchronous core of a session. It ingests
//! headers, decides phase transitions, and reports the side effects the
//! caller must perform as [`Effect`]s. It never performs I/O itself, which
//! keeps every transition testable without a network.
//!
//! ## Phases
//!
//! ```text
//! AwaitingInitialConsensus ──(ready + reorg requested)──▶ Forking
//! Forking ──(next header: fork block recorded, partition created)──▶ ObservingFork
//! ObservingFork ──(depth alternative blocks)──▶ Healing
//! Healing ──(partition removed)──▶ AwaitingFinalConsensus
//! AwaitingFinalConsensus ──(threshold consecutive agreeing blocks)──▶ Complete
//! any ──(timeout / error)──▶ Failed
//! ```

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::consensus::ConsensusTracker;
use crate::error::{ReorgError, ReorgResult};
use crate::header::{NodeHeader, NodeId};

/// Phase of a reorg session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Waiting for the network to agree on consecutive blocks
    AwaitingInitialConsensus,
    /// Reorg requested; the next header fixes the fork block
    Forking,
    /// Partition active; counting alternative blocks
    ObservingFork,
    /// Requested depth reached; partition being removed
    Healing,
    /// Partition removed; waiting for the network to reconverge
    AwaitingFinalConsensus,
    /// Network reconverged after the reorg
    Complete,
    /// Session timed out or failed
    Failed,
}

impl Phase {
    /// Whether the session can no longer make progress.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitingInitialConsensus => "awaiting initial consensus",
            Self::Forking => "forking",
            Self::ObservingFork => "observing fork",
            Self::Healing => "healing",
            Self::AwaitingFinalConsensus => "awaiting final consensus",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Side effect requested by a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Initial consensus reached; the caller may request a reorg
    NetworkReady,
    /// Isolate the partition groups, starting at `fork_block`
    CreatePartition {
        /// Block number of the header that triggered the fork
        fork_block: u64,
    },
    /// First alternative block observed
    ReorgStarted {
        /// The first alternative block number
        block: u64,
    },
    /// Requested depth reached; remove the partition
    DepthReached {
        /// All alternative block numbers, ascending
        alt_blocks: Vec<u64>,
    },
    /// Network reconverged
    Completed,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Current phase
    pub phase: Phase,
    /// Whether initial consensus was reached
    pub ready: bool,
    /// Requested reorg depth, once requested
    pub depth_requested: Option<usize>,
    /// Block number the fork started at
    pub fork_block: Option<u64>,
    /// Alternative block numbers observed so far
    pub alt_blocks: Vec<u64>,
    /// Consecutive agreeing blocks in the current run
    pub consensus_run: usize,
    /// Highest block number reported by any node
    pub latest_block: Option<u64>,
}

/// Synchronous reorg state machine.
#[derive(Debug, Clone)]
pub struct ReorgStateMachine {
    tracker: ConsensusTracker,
    threshold: usize,
    reorg_node: NodeId,
    phase: Phase,
    ready: bool,
    depth_requested: Option<usize>,
    fork_block: Option<u64>,
    alt_blocks: Vec<u64>,
    /// Reorg node headers captured when their block became alternative
    forked: Vec<NodeHeader>,
    consensus_run: usize,
    /// Block numbers that reached agreement
    counted: BTreeSet<u64>,
}

impl ReorgStateMachine {
    /// Create a state machine.
    ///
    /// `threshold` is both the number of nodes that must agree on a block and
    /// the number of consecutive agreeing blocks required. `reorg_node` is the
    /// node on the partitioned side.
    #[must_use]
    pub fn new(threshold: usize, reorg_node: NodeId) -> Self {
        Self {
            tracker: ConsensusTracker::new(),
            threshold,
            reorg_node,
            phase: Phase::AwaitingInitialConsensus,
            ready: false,
            depth_requested: None,
            fork_block: None,
            alt_blocks: Vec::new(),
            forked: Vec::new(),
            consensus_run: 0,
            counted: BTreeSet::new(),
        }
    }

    /// Request a reorg of `depth` blocks.
    ///
    /// A request made before initial consensus is held until the network is
    /// ready.
    ///
    /// # Errors
    ///
    /// Returns an error if `depth` is zero, a reorg was already requested, or
    /// the session is past its initial phase.
    pub fn request_reorg(&mut self, depth: usize) -> ReorgResult<()> {
        if depth == 0 {
            return Err(ReorgError::config("reorg depth must be at least 1", None));
        }
        if let Some(existing) = self.depth_requested {
            return Err(ReorgError::state(
                format!("a reorg of depth {existing} was already requested in this session"),
                None,
            ));
        }
        if self.phase != Phase::AwaitingInitialConsensus {
            return Err(ReorgError::state(
                format!("cannot request a reorg while {}", self.phase),
                None,
            ));
        }

        self.depth_requested = Some(depth);
        if self.ready {
            self.phase = Phase::Forking;
            info!(depth, "Reorg requested, forking on next header");
        } else {
            info!(depth, "Reorg requested, waiting for initial consensus");
        }
        Ok(())
    }

    /// Ingest a header and return the effects of any resulting transition.
    pub fn ingest(&mut self, header: NodeHeader) -> Vec<Effect> {
        let number = header.number;
        self.tracker.ingest(header);

        let mut effects = Vec::new();
        match self.phase {
            Phase::AwaitingInitialConsensus => {
                if !self.ready && self.advance_consensus_run(number) {
                    self.ready = true;
                    info!(block = number, "Initial consensus reached");
                    effects.push(Effect::NetworkReady);
                    if self.depth_requested.is_some() {
                        self.phase = Phase::Forking;
                    }
                }
            }
            Phase::Forking => {
                if self.fork_block.is_none() {
                    self.fork_block = Some(number);
                    info!(fork_block = number, "Fork block recorded");
                    effects.push(Effect::CreatePartition { fork_block: number });
                }
            }
            Phase::ObservingFork => self.observe_fork(number, &mut effects),
            Phase::AwaitingFinalConsensus => {
                if self.advance_consensus_run(number) {
                    self.phase = Phase::Complete;
                    info!(block = number, "Network reconverged after reorg");
                    effects.push(Effect::Completed);
                }
            }
            Phase::Healing | Phase::Complete | Phase::Failed => {}
        }
        effects
    }

    /// Confirm the partition requested by [`Effect::CreatePartition`] is active.
    pub fn partition_created(&mut self) {
        if self.phase == Phase::Forking {
            self.phase = Phase::ObservingFork;
        }
    }

    /// Confirm the partition was removed after [`Effect::DepthReached`].
    pub fn partition_removed(&mut self) {
        if self.phase == Phase::Healing {
            self.consensus_run = 0;
            self.phase = Phase::AwaitingFinalConsensus;
        }
    }

    /// Mark the session failed.
    pub fn fail(&mut self) {
        if self.phase != Phase::Complete {
            self.phase = Phase::Failed;
        }
    }

    /// Count `number` towards the current consensus run.
    ///
    /// A run is a range of consecutive block numbers that all reached
    /// agreement, so gaps never fill it. The run is measured around `number`
    /// and does not depend on the order blocks reached agreement in.
    ///
    /// Returns true once the run reaches the threshold.
    fn advance_consensus_run(&mut self, number: u64) -> bool {
        // Blocks inside the fork window are rewritten during healing
        let floor = match self.phase {
            Phase::AwaitingFinalConsensus => self.alt_blocks.last().copied(),
            _ => None,
        };
        if floor.is_some_and(|last| number <= last) {
            return false;
        }

        if self.tracker.is_divergent(number, self.threshold) {
            self.counted.remove(&number);
            if self.consensus_run > 0 {
                warn!(block = number, run = self.consensus_run, "Nodes disagree, consensus run reset");
            }
            self.consensus_run = 0;
            return false;
        }

        if !self.tracker.has_consensus(number, self.threshold) {
            return false;
        }

        self.counted.insert(number);
        self.consensus_run = self.run_through(number, floor);
        debug!(
            block = number,
            run = self.consensus_run,
            threshold = self.threshold,
            "Block reached consensus"
        );
        self.consensus_run >= self.threshold
    }

    /// Length of the agreeing range of block numbers containing `number`,
    /// not reaching down to `floor`.
    fn run_through(&self, number: u64, floor: Option<u64>) -> usize {
        let above = (number.saturating_add(1)..)
            .take_while(|n| self.counted.contains(n))
            .count();
        let below = (0..number)
            .rev()
            .take_while(|n| floor.map_or(true, |last| *n > last) && self.counted.contains(n))
            .count();
        above + below + 1
    }

    fn observe_fork(&mut self, number: u64, effects: &mut Vec<Effect>) {
        let (Some(fork_block), Some(depth)) = (self.fork_block, self.depth_requested) else {
            return;
        };
        if number < fork_block {
            return;
        }
        let Some(reorg_header) = self.tracker.node_header(self.reorg_node, number) else {
            return;
        };
        if !self.tracker.is_alternative(reorg_header, self.threshold) {
            return;
        }
        if self.alt_blocks.last().is_some_and(|last| number <= *last) {
            return;
        }

        let reorg_header = reorg_header.clone();
        if self.alt_blocks.is_empty() {
            info!(block = number, "Reorg started");
            effects.push(Effect::ReorgStarted { block: number });
        }
        self.alt_blocks.push(number);
        self.forked.push(reorg_header);
        info!(
            block = number,
            count = self.alt_blocks.len(),
            depth,
            "Alternative block observed"
        );

        if self.alt_blocks.len() >= depth {
            self.phase = Phase::Healing;
            self.consensus_run = 0;
            info!(alt_blocks = ?self.alt_blocks, "Reorg depth reached");
            effects.push(Effect::DepthReached {
                alt_blocks: self.alt_blocks.clone(),
            });
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether initial consensus was reached.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.ready
    }

    /// Requested depth, once requested.
    #[must_use]
    pub const fn depth_requested(&self) -> Option<usize> {
        self.depth_requested
    }

    /// Block the fork started at.
    #[must_use]
    pub const fn fork_block(&self) -> Option<u64> {
        self.fork_block
    }

    /// Alternative block numbers, strictly increasing.
    #[must_use]
    pub fn alt_blocks(&self) -> &[u64] {
        &self.alt_blocks
    }

    /// Consecutive agreeing blocks in the current run.
    #[must_use]
    pub const fn consensus_run_length(&self) -> usize {
        self.consensus_run
    }

    /// Node on the partitioned side.
    #[must_use]
    pub const fn reorg_node(&self) -> NodeId {
        self.reorg_node
    }

    /// Underlying header bookkeeping.
    #[must_use]
    pub const fn tracker(&self) -> &ConsensusTracker {
        &self.tracker
    }

    /// Headers the reorg node reported at each alternative block number.
    ///
    /// Captured when the block became alternative, so canonical headers the
    /// node re-announces after healing never replace them.
    #[must_use]
    pub fn forked_headers(&self) -> Vec<NodeHeader> {
        self.forked.clone()
    }

    /// Capture the current state.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            ready: self.ready,
            depth_requested: self.depth_requested,
            fork_block: self.fork_block,
            alt_blocks: self.alt_blocks.clone(),
            consensus_run: self.consensus_run,
            latest_block: self.tracker.latest_block(),
        }
    }
}
