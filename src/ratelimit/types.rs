use std::time::Duration;
use thiserror::Error;

/// A counter right after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u64,
    /// Time left before the counter expires and the window restarts.
    pub expires_in: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed {
        /// Requests left in the current window.
        remaining: u64,
        reset_after: Duration,
    },
    Limited {
        retry_after: Duration,
    },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// The counter store could not answer. Distinct from being limited.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("counter store error: {0}")]
    Backend(String),
}
