//! Structured logging for reorg runs.
//!
//! A reorg run spans minutes of wall-clock time across several node
//! connections, so every phase transition, partition operation and
//! verification result is logged as a structured event.
//!
//! # Usage
//!
//! ```no_run
//! use eth_reorg_chaos::observability;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! // Keep the guard alive for the whole run so file logs are flushed.
//! let _guard = observability::init_tracing(None, None, false)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Environment Configuration
//!
//! ```bash
//! # Follow every header as it arrives
//! RUST_LOG=eth_reorg_chaos=debug cargo run -- reorg --depth 3
//!
//! # JSON output for CI log collection
//! LOG_JSON=true cargo run -- reorg --depth 3
//!
//! # Also write JSON logs to a daily-rotated file
//! LOG_FILE=./logs/reorg.log cargo run -- watch
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Default filter when neither `RUST_LOG` nor a level is given.
pub const DEFAULT_FILTER: &str = "eth_reorg_chaos=info,warn";

/// Initialize the tracing subscriber.
///
/// # Arguments
///
/// * `log_level` - Filter directive used when `RUST_LOG` is unset.
/// * `log_file` - Optional file path. Enables daily rotation and JSON file output.
/// * `json_output` - JSON console output instead of pretty-printed lines.
///
/// Returns the file writer's guard when `log_file` is set. Buffered log lines
/// are flushed when it is dropped.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created or a global
/// subscriber is already installed.
pub fn init_tracing(
    log_level: Option<String>,
    log_file: Option<PathBuf>,
    json_output: bool,
) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = std::env::var("RUST_LOG")
        .ok()
        .or(log_level)
        .map_or_else(|| EnvFilter::new(DEFAULT_FILTER), EnvFilter::new);

    let console_layer = if json_output {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    let (file_layer, guard) = match log_file.as_deref() {
        Some(path) => {
            let directory = path.parent().unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(directory)?;

            let file_appender = tracing_appender::rolling::daily(
                directory,
                path.file_name().unwrap_or_else(|| OsStr::new("reorg.log")),
            );
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let layer = fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_current_span(true)
                .with_span_list(true)
                .with_target(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    info!(
        json_output,
        file_logging = log_file.is_some(),
        "Tracing initialized"
    );

    Ok(guard)
}

/// Initialize tracing for tests, routed through the test harness.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("eth_reorg_chaos=debug"))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice_fails() {
        // Only one global subscriber may exist per process
        let first = init_tracing(Some("debug".to_string()), None, false);
        let second = init_tracing(None, None, true);
        assert!(first.is_err() || second.is_err());
    }

    #[test]
    fn test_init_test_tracing_is_idempotent() {
        init_test_tracing();
        init_test_tracing();
    }
}
