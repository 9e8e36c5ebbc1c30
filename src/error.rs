//! Error types for the reorg injector.
//!
//! This module provides a unified error type [`ReorgError`] that covers every
//! failure a reorg session can surface to the calling test.
//!
//! # Design
//!
//! The error hierarchy is organized by concern:
//! - [`ReorgError::ConfigError`]: Invalid configuration, including networks too small to fork
//! - [`ReorgError::RpcError`]: Provider and block lookup failures
//! - [`ReorgError::SubscriptionError`]: A node's header stream failed or closed
//! - [`ReorgError::PartitionError`]: Fault injection could not be applied or lifted
//! - [`ReorgError::TimeoutError`]: The session deadline elapsed before completion
//! - [`ReorgError::ReorgNotCompleted`]: Too few alternative blocks were replaced
//! - [`ReorgError::StateError`]: Misuse of the session API or report persistence
//!
//! Errors are always returned to the caller. A reorg test that fails silently
//! would pass without the network ever reorganizing.
//!
//! # Example
//!
//! ```
//! use eth_reorg_chaos::error::{ReorgError, ReorgResult};
//!
//! fn validate_depth(depth: usize) -> ReorgResult<()> {
//!     if depth == 0 {
//!         return Err(ReorgError::config("reorg depth must be at least 1", None));
//!     }
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::time::Duration;

/// Result type alias using [`ReorgError`].
pub type ReorgResult<T> = Result<T, ReorgError>;

/// Unified error type for reorg injection and verification.
#[derive(Debug)]
pub enum ReorgError {
    /// Configuration or environment variable errors.
    ///
    /// Variants include:
    /// - Missing or malformed environment variables
    /// - Fewer than three node connections
    /// - Consensus threshold larger than the network
    ConfigError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// RPC provider or network errors.
    ///
    /// Variants include:
    /// - Failed to connect to a node
    /// - Block not found while verifying
    RpcError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Header subscription errors.
    ///
    /// Losing one node's headers invalidates the consensus accounting for
    /// that node, so these are never retried silently.
    SubscriptionError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Network partition errors.
    ///
    /// Raised when the partition controller fails to create or remove a
    /// partition between two node groups.
    PartitionError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The session deadline elapsed before the reorg completed.
    TimeoutError {
        /// Human-readable error message
        message: String,
        /// Deadline that was exceeded
        elapsed: Duration,
    },

    /// Fewer alternative blocks were replaced than the requested depth allows.
    ReorgNotCompleted {
        /// Number of alternative blocks whose canonical hash changed
        replaced: usize,
        /// Number of replacements required
        required: usize,
    },

    /// Session state or persistence errors.
    ///
    /// Variants include:
    /// - A second reorg request within one session
    /// - Failed to read or write a report file
    StateError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ReorgError {
    /// Create a new configuration error.
    ///
    /// # Example
    ///
    /// ```
    /// use eth_reorg_chaos::error::ReorgError;
    ///
    /// let err = ReorgError::config("NODE_WS_URLS not set", None);
    /// assert!(matches!(err, ReorgError::ConfigError { .. }));
    /// ```
    #[must_use]
    pub fn config(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::ConfigError {
            message: message.into(),
            source,
        }
    }

    /// Create a new RPC error.
    #[must_use]
    pub fn rpc(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::RpcError {
            message: message.into(),
            source,
        }
    }

    /// Create a new subscription error.
    ///
    /// # Example
    ///
    /// ```
    /// use eth_reorg_chaos::error::ReorgError;
    ///
    /// let err = ReorgError::subscription("node 2 header stream closed", None);
    /// assert!(matches!(err, ReorgError::SubscriptionError { .. }));
    /// ```
    #[must_use]
    pub fn subscription(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SubscriptionError {
            message: message.into(),
            source,
        }
    }

    /// Create a new partition error.
    #[must_use]
    pub fn partition(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::PartitionError {
            message: message.into(),
            source,
        }
    }

    /// Create a new timeout error.
    ///
    /// # Example
    ///
    /// ```
    /// use eth_reorg_chaos::error::ReorgError;
    /// use std::time::Duration;
    ///
    /// let err = ReorgError::timeout("initial consensus never reached", Duration::from_secs(1));
    /// assert!(err.is_timeout());
    /// ```
    #[must_use]
    pub fn timeout(message: impl Into<String>, elapsed: Duration) -> Self {
        Self::TimeoutError {
            message: message.into(),
            elapsed,
        }
    }

    /// Create a reorg-not-completed error.
    #[must_use]
    pub const fn not_completed(replaced: usize, required: usize) -> Self {
        Self::ReorgNotCompleted { replaced, required }
    }

    /// Create a new state error.
    #[must_use]
    pub fn state(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::StateError {
            message: message.into(),
            source,
        }
    }

    /// Returns true for [`ReorgError::TimeoutError`].
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimeoutError { .. })
    }

    /// Returns true for [`ReorgError::ConfigError`].
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::ConfigError { .. })
    }
}

impl fmt::Display for ReorgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError { message, .. } => write!(f, "Configuration error: {message}"),
            Self::RpcError { message, .. } => write!(f, "RPC error: {message}"),
            Self::SubscriptionError { message, .. } => {
                write!(f, "Subscription error: {message}")
            }
            Self::PartitionError { message, .. } => write!(f, "Partition error: {message}"),
            Self::TimeoutError { message, elapsed } => {
                write!(f, "Timed out after {elapsed:?}: {message}")
            }
            Self::ReorgNotCompleted { replaced, required } => write!(
                f,
                "Reorg not completed: {replaced} alternative blocks replaced, {required} required"
            ),
            Self::StateError { message, .. } => write!(f, "State error: {message}"),
        }
    }
}

impl std::error::Error for ReorgError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConfigError { source, .. }
            | Self::RpcError { source, .. }
            | Self::SubscriptionError { source, .. }
            | Self::PartitionError { source, .. }
            | Self::StateError { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &dyn std::error::Error),
            Self::TimeoutError { .. } | Self::ReorgNotCompleted { .. } => None,
        }
    }
}

/// Convert from `eyre::Report` to `ReorgError`.
///
/// The WebSocket helpers report through `eyre`, so unclassified reports are
/// treated as RPC errors.
impl From<eyre::Report> for ReorgError {
    fn from(err: eyre::Report) -> Self {
        Self::RpcError {
            message: err.to_string(),
            source: None,
        }
    }
}
