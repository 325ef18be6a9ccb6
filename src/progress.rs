// src/progress.rs
//! Progress reporting and cooperative cancellation
//!
//! A `Progress` is a cheap cloneable handle; the worker advances it and polls
//! [`Progress::check`], observers read [`Progress::fraction`] or call
//! [`Progress::cancel`] from any thread.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::enums::CancelReason;
use crate::error::FormatError;

const NOT_CANCELLED: u8 = 0;
const CANCELLED_BY_USER: u8 = 1;
const CANCELLED_LOW_MEMORY: u8 = 2;

/// Total number of progress units in one load or save
pub const PROGRESS_TOTAL: u64 = 1000;

#[derive(Debug, Default)]
struct ProgressState {
    completed: AtomicU64,
    cancelled: AtomicU8,
}

#[derive(Debug, Clone, Default)]
pub struct Progress {
    state: Arc<ProgressState>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves progress forward; values below the current position are ignored
    pub fn advance_to(&self, completed: u64) {
        let target = completed.min(PROGRESS_TOTAL);
        self.state.completed.fetch_max(target, Ordering::AcqRel);
    }

    /// Maps `done / total` of a sub-task onto the `[start, end)` range
    pub fn report_fraction(&self, start: u64, end: u64, done: u64, total: u64) {
        if total == 0 {
            self.advance_to(end);
            return;
        }
        let span = end.saturating_sub(start);
        self.advance_to(start + span * done.min(total) / total);
    }

    pub fn completed(&self) -> u64 {
        self.state.completed.load(Ordering::Acquire)
    }

    pub fn fraction(&self) -> f64 {
        self.completed() as f64 / PROGRESS_TOTAL as f64
    }

    pub fn cancel(&self, reason: CancelReason) {
        let code = match reason {
            CancelReason::UserRequest => CANCELLED_BY_USER,
            CancelReason::LowMemory => CANCELLED_LOW_MEMORY,
        };
        let _ = self.state.cancelled.compare_exchange(
            NOT_CANCELLED,
            code,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self.state.cancelled.load(Ordering::Acquire) {
            CANCELLED_BY_USER => Some(CancelReason::UserRequest),
            CANCELLED_LOW_MEMORY => Some(CancelReason::LowMemory),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_reason().is_some()
    }

    /// Polling point for long-running steps
    pub fn check(&self) -> Result<(), FormatError> {
        match self.cancel_reason() {
            Some(reason) => Err(FormatError::Cancelled(reason)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_never_moves_backwards() {
        let progress = Progress::new();
        progress.advance_to(400);
        progress.advance_to(100);
        assert_eq!(progress.completed(), 400);
        progress.report_fraction(400, 600, 1, 2);
        assert_eq!(progress.completed(), 500);
    }

    #[test]
    fn first_cancel_reason_wins() {
        let progress = Progress::new();
        let observer = progress.clone();
        observer.cancel(CancelReason::LowMemory);
        progress.cancel(CancelReason::UserRequest);
        assert_eq!(progress.cancel_reason(), Some(CancelReason::LowMemory));
        assert!(matches!(
            progress.check(),
            Err(FormatError::Cancelled(CancelReason::LowMemory))
        ));
    }
}
