//! Async reorg session.
//!
//! [`ReorgSession`] drives a [`ReorgStateMachine`] from a live header stream.
//! A single consumer task owns the stream. For every header it locks the
//! session state, ingests the header and executes the resulting effects
//! before releasing the lock, so a phase transition and the partition
//! request it triggers are never observed half-done.
//!
//! ```text
//!  caller                         consumer task
//!  ──────                         ─────────────
//!  start() ───────────────────▶  subscribe, spawn
//!  wait_ready() ◀── ready ─────  initial consensus
//!  reorg(depth) ──▶ machine      next header: create_partition
//!  wait_reorg_started() ◀──────  first alternative block
//!  wait_depth_reached() ◀──────  depth reached: remove_partition
//!  wait() ◀────────────────────  final consensus / timeout / error
//! ```
//!
//! On every exit path the consumer removes a partition it still holds,
//! aborts signals that never fired and unsubscribes from the source.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn};

use super::machine::{Effect, ReorgStateMachine, SessionSnapshot};
use super::report::ReorgReport;
use super::signal::{AbortReason, Signal};
use crate::chaos::{PartitionController, PartitionHandle};
use crate::config::ReorgConfig;
use crate::error::{ReorgError, ReorgResult};
use crate::header::NodeHeader;
use crate::rpc::{HeaderSource, HeaderStream};

#[derive(Debug)]
struct SessionState {
    machine: ReorgStateMachine,
    partition: Option<PartitionHandle>,
}

struct Shared {
    state: Mutex<SessionState>,
    ready: Signal,
    reorg_started: Signal,
    depth_reached: Signal,
    cancel: Notify,
}

/// Handle to a running reorg session.
///
/// # Example
///
/// ```rust,ignore
/// let session = ReorgSession::start(config, source, partitions).await?;
/// session.wait_ready().await?;
/// session.reorg(2).await?;
/// session.wait_depth_reached().await?;
/// let report = session.wait().await?;
/// ```
pub struct ReorgSession {
    shared: Arc<Shared>,
    task: JoinHandle<ReorgResult<()>>,
    started_at: DateTime<Utc>,
}

impl std::fmt::Debug for ReorgSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReorgSession")
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl ReorgSession {
    /// Validate `config`, subscribe to `source` and start consuming headers.
    ///
    /// The session deadline (`config.timeout()`) starts now.
    ///
    /// # Errors
    ///
    /// Returns [`ReorgError::ConfigError`] before any I/O if the network is
    /// too small or the configuration is inconsistent, or the source's error
    /// if the subscription cannot be created.
    #[instrument(skip_all, fields(nodes = source.node_count()))]
    pub async fn start(
        config: ReorgConfig,
        source: Arc<dyn HeaderSource>,
        partitions: Arc<dyn PartitionController>,
    ) -> ReorgResult<Self> {
        config.validate(source.node_count())?;

        let started_at = Utc::now();
        let name = format!("reorg-session-{}", started_at.timestamp_millis());
        let headers = source.subscribe(&name).await?;

        let shared = Arc::new(Shared {
            state: Mutex::new(SessionState {
                machine: ReorgStateMachine::new(
                    config.block_consensus_threshold(),
                    config.reorg_node(),
                ),
                partition: None,
            }),
            ready: Signal::new("network ready"),
            reorg_started: Signal::new("reorg started"),
            depth_reached: Signal::new("depth reached"),
            cancel: Notify::new(),
        });

        info!(
            subscription = %name,
            threshold = config.block_consensus_threshold(),
            reorg_node = config.reorg_node(),
            timeout = ?config.timeout(),
            "Reorg session started"
        );

        let task = tokio::spawn(consume(
            Arc::clone(&shared),
            config,
            source,
            partitions,
            headers,
            name,
        ));

        Ok(Self {
            shared,
            task,
            started_at,
        })
    }

    /// Request a reorg of `depth` blocks.
    ///
    /// If the network is not ready yet the request is held until initial
    /// consensus is reached.
    ///
    /// # Errors
    ///
    /// Returns [`ReorgError::StateError`] if a reorg was already requested or
    /// the session has moved past its initial phase.
    pub async fn reorg(&self, depth: usize) -> ReorgResult<()> {
        self.shared.state.lock().await.machine.request_reorg(depth)
    }

    /// Wait until the network reaches initial consensus.
    ///
    /// # Errors
    ///
    /// Returns the session's terminal error if it ended first.
    pub async fn wait_ready(&self) -> ReorgResult<()> {
        self.shared.ready.wait().await
    }

    /// Wait until the first alternative block is observed.
    ///
    /// # Errors
    ///
    /// Returns the session's terminal error if it ended first.
    pub async fn wait_reorg_started(&self) -> ReorgResult<()> {
        self.shared.reorg_started.wait().await
    }

    /// Wait until the requested depth is reached and the partition removed.
    ///
    /// # Errors
    ///
    /// Returns the session's terminal error if it ended first.
    pub async fn wait_depth_reached(&self) -> ReorgResult<()> {
        self.shared.depth_reached.wait().await
    }

    /// Current state of the session.
    pub async fn snapshot(&self) -> SessionSnapshot {
        self.shared.state.lock().await.machine.snapshot()
    }

    /// Report of the session so far.
    pub async fn report(&self) -> ReorgReport {
        let state = self.shared.state.lock().await;
        ReorgReport::from_machine(&state.machine, self.started_at)
    }

    /// Stop the session. [`wait`](Self::wait) then returns a state error.
    pub fn cancel(&self) {
        self.shared.cancel.notify_one();
    }

    /// Wait for the session to complete or fail.
    ///
    /// # Errors
    ///
    /// - [`ReorgError::TimeoutError`] if the deadline elapsed first
    /// - [`ReorgError::SubscriptionError`] if a node stream failed or closed
    /// - [`ReorgError::PartitionError`] if fault injection failed
    /// - [`ReorgError::StateError`] if the session was cancelled
    pub async fn wait(self) -> ReorgResult<ReorgReport> {
        let Self {
            shared,
            task,
            started_at,
        } = self;

        task.await
            .map_err(|e| ReorgError::state("reorg session task failed", Some(Box::new(e))))??;

        let state = shared.state.lock().await;
        Ok(ReorgReport::from_machine(&state.machine, started_at))
    }
}

/// Consumer loop: the only reader of the header stream.
///
/// The deadline and cancellation are raced against both the stream and the
/// effects of each header, so a stalled partition backend cannot hold the
/// session past its deadline.
#[instrument(skip_all, fields(subscription = %name))]
async fn consume(
    shared: Arc<Shared>,
    config: ReorgConfig,
    source: Arc<dyn HeaderSource>,
    partitions: Arc<dyn PartitionController>,
    mut headers: HeaderStream,
    name: String,
) -> ReorgResult<()> {
    let deadline = Instant::now() + config.timeout();

    let result = loop {
        let step = tokio::select! {
            () = sleep_until(deadline) => Err(timed_out(&shared, &config).await),
            () = shared.cancel.notified() => Err(cancelled()),
            item = headers.next() => match item {
                Some(Ok(header)) => {
                    let ingested =
                        timeout_at(deadline, ingest(&shared, &config, partitions.as_ref(), header));
                    tokio::select! {
                        outcome = ingested => match outcome {
                            Ok(outcome) => outcome,
                            Err(_) => {
                                warn!("Deadline elapsed while executing session effects");
                                Err(timed_out(&shared, &config).await)
                            }
                        },
                        () = shared.cancel.notified() => Err(cancelled()),
                    }
                }
                Some(Err(e)) => Err(e),
                None => Err(ReorgError::subscription("header stream ended", None)),
            },
        };

        match step {
            Ok(true) => break Ok(()),
            Ok(false) => {}
            Err(e) => break Err(e),
        }
    };

    cleanup(&shared, &config, &result, partitions.as_ref()).await;

    if let Err(e) = source.unsubscribe(&name).await {
        warn!(error = %e, "Failed to unsubscribe from header source");
    }

    match &result {
        Ok(()) => info!("Reorg session complete"),
        Err(e) => error!(error = %e, "Reorg session failed"),
    }
    result
}

async fn timed_out(shared: &Shared, config: &ReorgConfig) -> ReorgError {
    let phase = shared.state.lock().await.machine.phase();
    ReorgError::timeout(format!("reorg session still {phase}"), config.timeout())
}

fn cancelled() -> ReorgError {
    ReorgError::state("reorg session cancelled", None)
}

/// Ingest one header and execute its effects under the state lock.
///
/// Returns true once the session is complete. Dropping the future releases
/// the lock; a partition whose removal never finished stays held for
/// [`cleanup`].
async fn ingest(
    shared: &Shared,
    config: &ReorgConfig,
    partitions: &dyn PartitionController,
    header: NodeHeader,
) -> ReorgResult<bool> {
    debug!(node = header.node_id, block = header.number, hash = %header.hash, "Header received");

    let mut state = shared.state.lock().await;
    let effects = state.machine.ingest(header);

    for effect in effects {
        match effect {
            Effect::NetworkReady => {
                shared.ready.fire();
            }
            Effect::CreatePartition { fork_block } => {
                let handle = partitions
                    .create_partition(
                        config.from_label(),
                        config.to_label(),
                        config.partition_duration(),
                    )
                    .await?;
                info!(fork_block, partition = %handle.id, "Partition active");
                state.partition = Some(handle);
                state.machine.partition_created();
            }
            Effect::ReorgStarted { block } => {
                debug!(block, "Publishing reorg started");
                shared.reorg_started.fire();
            }
            Effect::DepthReached { alt_blocks } => {
                if let Some(handle) = state.partition.clone() {
                    let removed = partitions.remove_partition(&handle).await;
                    // A finished attempt releases the handle, failed or not
                    state.partition = None;
                    removed?;
                    info!(partition = %handle.id, ?alt_blocks, "Partition healed");
                }
                state.machine.partition_removed();
                shared.depth_reached.fire();
            }
            Effect::Completed => return Ok(true),
        }
    }

    Ok(false)
}

/// Release everything the session still holds.
async fn cleanup(
    shared: &Shared,
    config: &ReorgConfig,
    result: &ReorgResult<()>,
    partitions: &dyn PartitionController,
) {
    let mut state = shared.state.lock().await;
    if result.is_err() {
        state.machine.fail();
    }

    if let Some(handle) = state.partition.take() {
        let removal = partitions.remove_partition(&handle);
        match tokio::time::timeout(config.cleanup_timeout(), removal).await {
            Ok(Ok(())) => info!(partition = %handle.id, "Partition removed during cleanup"),
            Ok(Err(e)) => error!(partition = %handle.id, error = %e, "Failed to remove partition"),
            Err(_) => error!(
                partition = %handle.id,
                timeout = ?config.cleanup_timeout(),
                "Partition removal did not finish, the partition may still be active"
            ),
        }
    }
    drop(state);

    let reason = match result {
        Err(e) if e.is_timeout() => AbortReason::Timeout(config.timeout()),
        Err(e) => AbortReason::Failed(e.to_string()),
        Ok(()) => AbortReason::Failed("session complete".to_string()),
    };
    for signal in [&shared.ready, &shared.reorg_started, &shared.depth_reached] {
        if signal.abort(reason.clone()) {
            debug!(signal = signal.name(), "Signal aborted");
        }
    }
}
