use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Result, TabulaError};

/// Carries a deadline and a cooperative cancellation signal through long
/// running operations. Checked before every store I/O and between logbook
/// writes.
#[derive(Debug, Clone)]
pub struct Context {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl Context {
    /// A context with no deadline that can only be stopped via its
    /// cancellation handle.
    pub fn background() -> Self {
        Self {
            deadline: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A fresh context that expires after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Derives a child context that shares this context's cancellation signal
    /// but expires after `timeout`, or at the parent deadline, whichever is
    /// sooner.
    pub fn child_timeout(&self, timeout: Duration) -> Self {
        let child_deadline = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < child_deadline => parent,
            _ => child_deadline,
        };

        Self {
            deadline: Some(deadline),
            cancelled: self.cancelled.clone(),
        }
    }

    /// Returns a handle that cancels this context and all of its children
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: self.cancelled.clone(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn is_expired(&self) -> bool {
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// Returns an error if the context has been cancelled or its deadline has
    /// passed. `op` names the operation for the error message.
    pub fn check(&self, op: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(TabulaError::Cancelled(op.to_string()));
        }
        if self.is_expired() {
            return Err(TabulaError::Timeout(op.to_string()));
        }
        Ok(())
    }

    /// Time left before the deadline, or `None` when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

/// Cancels an in-flight context from another thread
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}
