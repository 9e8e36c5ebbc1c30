//! Shell command partition backend.
//!
//! Each operation renders a command template and runs it with `sh -c`.
//! Supported placeholders:
//!
//! | Placeholder | Value |
//! |---|---|
//! | `{from}` | isolated group label |
//! | `{to}` | group it is cut off from |
//! | `{duration_secs}` | requested partition lifetime in seconds |
//! | `{id}` | partition id (`reorg-<from>-<to>-<unix ms>`) |
//!
//! ```text
//! PARTITION_CREATE_CMD="docker network disconnect geth-net {from}"
//! PARTITION_REMOVE_CMD="docker network connect geth-net {from}"
//! ```

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::{PartitionController, PartitionHandle};
use crate::error::{ReorgError, ReorgResult};

/// Partition controller that shells out to user-supplied commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPartitionController {
    create_template: String,
    remove_template: String,
}

impl CommandPartitionController {
    /// Create a controller from explicit command templates.
    #[must_use]
    pub fn new(create_template: impl Into<String>, remove_template: impl Into<String>) -> Self {
        Self {
            create_template: create_template.into(),
            remove_template: remove_template.into(),
        }
    }

    /// Load templates from `PARTITION_CREATE_CMD` and `PARTITION_REMOVE_CMD`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if either variable is missing or empty.
    pub fn from_env() -> ReorgResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load templates through `lookup`, keyed like [`from_env`](Self::from_env).
    ///
    /// # Errors
    ///
    /// Returns a configuration error if either key is missing or empty.
    pub fn from_lookup<F>(lookup: F) -> ReorgResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| {
                    ReorgError::config(format!("{key} environment variable is required"), None)
                })
        };

        Ok(Self::new(
            read("PARTITION_CREATE_CMD")?,
            read("PARTITION_REMOVE_CMD")?,
        ))
    }

    /// Substitute placeholders in `template`.
    fn render(template: &str, handle: &PartitionHandle) -> String {
        template
            .replace("{from}", &handle.from)
            .replace("{to}", &handle.to)
            .replace("{duration_secs}", &handle.duration.as_secs().to_string())
            .replace("{id}", &handle.id)
    }

    #[instrument(skip(self))]
    async fn run(&self, command: &str) -> ReorgResult<()> {
        debug!("Running partition command");

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ReorgError::partition(format!("failed to spawn `{command}`"), Some(Box::new(e)))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, stderr = %stderr.trim(), "Partition command failed");
            return Err(ReorgError::partition(
                format!(
                    "`{command}` exited with {}: {}",
                    output.status,
                    stderr.trim()
                ),
                None,
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl PartitionController for CommandPartitionController {
    async fn create_partition(
        &self,
        from: &str,
        to: &str,
        duration: Duration,
    ) -> ReorgResult<PartitionHandle> {
        let id = format!("reorg-{from}-{to}-{}", Utc::now().timestamp_millis());
        let handle = PartitionHandle::new(id, from, to, duration);

        self.run(&Self::render(&self.create_template, &handle)).await?;
        info!(id = %handle.id, from, to, "Partition created");
        Ok(handle)
    }

    async fn remove_partition(&self, handle: &PartitionHandle) -> ReorgResult<()> {
        self.run(&Self::render(&self.remove_template, handle)).await?;
        info!(id = %handle.id, "Partition removed");
        Ok(())
    }
}
