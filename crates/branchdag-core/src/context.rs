//! Per-call cancellation and deadlines.
//!
//! Every engine operation takes an [`OpContext`] and checks it before each
//! collaborator call; collaborators receive the same context so a long
//! backend call can bail out early too.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::backend::BackendError;
use crate::config::DagConfig;

/// Cancellation signal plus optional deadline for one logical operation.
///
/// Clones share the cancellation flag, so a caller can keep one clone and
/// hand another to a worker.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl OpContext {
    /// A context that never expires.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::default(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// Derive a context from the configured default timeout. A zero timeout
    /// means no deadline.
    #[must_use]
    pub fn from_config(config: &DagConfig) -> Self {
        if config.default_timeout_ms == 0 {
            Self::background()
        } else {
            Self::with_timeout(Duration::from_millis(config.default_timeout_ms))
        }
    }

    /// Signal cancellation to every clone of this context.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when there is no deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail fast if the operation was cancelled or ran past its deadline.
    ///
    /// # Errors
    ///
    /// [`BackendError::Cancelled`] or [`BackendError::DeadlineExceeded`].
    pub fn check(&self) -> Result<(), BackendError> {
        if self.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(BackendError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}
