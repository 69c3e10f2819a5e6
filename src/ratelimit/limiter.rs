use super::types::{RateDecision, RateLimitError};
use super::CounterStore;

use std::sync::Arc;
use std::time::Duration;

pub const KEY_PREFIX: &str = "rate_limit:";

/// Fixed-window limiter over a shared `CounterStore`.
pub struct WindowRateLimiter {
    store: Arc<dyn CounterStore>,
    limit: u64,
    window: Duration,
}

impl WindowRateLimiter {
    /// # Arguments
    /// * `limit` - Requests allowed per client per window.
    /// * `window` - Window length, started by a client's first request.
    pub fn new(store: Arc<dyn CounterStore>, limit: u64, window: Duration) -> Self {
        Self {
            store,
            limit,
            window,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    /// Counts one request from `client_id` against the configured limit.
    pub async fn check(&self, client_id: &str) -> Result<RateDecision, RateLimitError> {
        self.check_and_increment(client_id, self.limit, self.window)
            .await
    }

    /// Counts one request from `client_id` and decides whether it may proceed.
    ///
    /// The increment is recorded even when the request is refused, so a client that keeps
    /// hammering stays limited until its window expires.
    pub async fn check_and_increment(
        &self,
        client_id: &str,
        limit: u64,
        window: Duration,
    ) -> Result<RateDecision, RateLimitError> {
        let key = counter_key(client_id);
        let current = self.store.incr_with_expiry(&key, window).await?;

        if current.count > limit {
            tracing::debug!("{} over limit ({} > {})", key, current.count, limit);
            return Ok(RateDecision::Limited {
                retry_after: current.expires_in,
            });
        }

        Ok(RateDecision::Allowed {
            remaining: limit - current.count,
            reset_after: current.expires_in,
        })
    }
}

pub fn counter_key(client_id: &str) -> String {
    format!("{}{}", KEY_PREFIX, client_id)
}
