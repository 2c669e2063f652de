//! Caller-supplied deadlines for store operations.

use std::time::{Duration, Instant};

use crate::error::MigrateError;

/// An optional point in time after which store operations refuse to start.
///
/// Expiry is checked before each store round-trip; an operation already
/// inside a transaction rolls back and releases its lock before the error
/// propagates. [`Deadline::none`] never expires.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// No deadline; operations block until the store answers.
    #[must_use]
    pub fn none() -> Self {
        Self { at: None }
    }

    /// Expires `timeout` from now.
    #[must_use]
    pub fn within(timeout: Duration) -> Self {
        Self {
            at: Some(Instant::now() + timeout),
        }
    }

    /// Time left, or `None` when unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    #[must_use]
    pub fn expired(&self) -> bool {
        matches!(self.remaining(), Some(left) if left.is_zero())
    }

    /// Error carrying `action` as context if the deadline has passed.
    pub fn check(&self, action: &'static str) -> Result<(), MigrateError> {
        if self.expired() {
            return Err(MigrateError::DeadlineExceeded(action));
        }
        Ok(())
    }
}
