//! One-shot synchronization points published by a session.
//!
//! A [`Signal`] fires at most once. Any number of tasks may wait on it,
//! before or after it fires. When a session ends without firing a signal,
//! the signal is aborted so waiters receive the session's error instead of
//! hanging.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{ReorgError, ReorgResult};

/// Why a signal will never fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// The session deadline elapsed
    Timeout(Duration),
    /// The session failed for another reason
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LatchState {
    Pending,
    Fired,
    Aborted(AbortReason),
}

/// At-most-once signal backed by a `tokio::sync::watch` channel.
#[derive(Debug, Clone)]
pub struct Signal {
    name: &'static str,
    tx: Arc<watch::Sender<LatchState>>,
}

impl Signal {
    /// Create a pending signal.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        let (tx, _rx) = watch::channel(LatchState::Pending);
        Self {
            name,
            tx: Arc::new(tx),
        }
    }

    /// Name used in logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Fire the signal. Returns true only for the call that fired it.
    pub fn fire(&self) -> bool {
        self.settle(LatchState::Fired)
    }

    /// Abort a pending signal. Returns false if it already fired or aborted.
    pub fn abort(&self, reason: AbortReason) -> bool {
        self.settle(LatchState::Aborted(reason))
    }

    fn settle(&self, next: LatchState) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == LatchState::Pending {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    /// Whether the signal has fired.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        *self.tx.borrow() == LatchState::Fired
    }

    /// Wait until the signal fires.
    ///
    /// # Errors
    ///
    /// Returns a [`ReorgError::TimeoutError`] or [`ReorgError::StateError`]
    /// if the signal was aborted.
    pub async fn wait(&self) -> ReorgResult<()> {
        let mut rx = self.tx.subscribe();
        let state = rx
            .wait_for(|state| *state != LatchState::Pending)
            .await
            .map_err(|e| {
                ReorgError::state(format!("{} signal dropped", self.name), Some(Box::new(e)))
            })?
            .clone();

        match state {
            LatchState::Fired => Ok(()),
            LatchState::Aborted(AbortReason::Timeout(elapsed)) => Err(ReorgError::timeout(
                format!("session ended before {}", self.name),
                elapsed,
            )),
            LatchState::Aborted(AbortReason::Failed(message)) => Err(ReorgError::state(
                format!("session ended before {}: {message}", self.name),
                None,
            )),
            LatchState::Pending => Err(ReorgError::state(
                format!("{} signal still pending", self.name),
                None,
            )),
        }
    }
}
