//! Network partition fault injection.
//!
//! A reorg is produced by cutting one group of nodes off from the rest of the
//! network. The session only needs two operations from the fault-injection
//! backend, captured by [`PartitionController`]:
//!
//! - `create_partition(from, to, duration)` isolates the `from` group from the `to` group
//! - `remove_partition(handle)` heals it
//!
//! Group labels are opaque strings forwarded from configuration.
//!
//! # Backends
//!
//! - [`CommandPartitionController`]: renders shell command templates
//!   (e.g. `docker network disconnect`, `kubectl apply`)
//! - [`RecordingPartitionController`](crate::testing::RecordingPartitionController):
//!   in-process fake that records calls

pub mod command;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReorgResult;

pub use command::CommandPartitionController;

/// An active partition, returned by [`PartitionController::create_partition`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionHandle {
    /// Backend-specific identifier
    pub id: String,
    /// Isolated group label
    pub from: String,
    /// Group the isolated nodes are cut off from
    pub to: String,
    /// Requested lifetime
    pub duration: Duration,
    /// When the partition was created
    pub created_at: DateTime<Utc>,
}

impl PartitionHandle {
    /// Create a handle stamped with the current time.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            duration,
            created_at: Utc::now(),
        }
    }
}

/// Fault-injection capability used by a reorg session.
///
/// A session owns its controller exclusively for its lifetime, so only the
/// session creates or removes partitions.
#[async_trait]
pub trait PartitionController: Send + Sync {
    /// Isolate the `from` group from the `to` group.
    async fn create_partition(
        &self,
        from: &str,
        to: &str,
        duration: Duration,
    ) -> ReorgResult<PartitionHandle>;

    /// Remove a partition created by this controller.
    async fn remove_partition(&self, handle: &PartitionHandle) -> ReorgResult<()>;
}
