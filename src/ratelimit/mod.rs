//! Rate Limiting Module
//!
//! Fixed-window request limiting for the read API.
//!
//! ## Core Concepts
//! - **Counter store**: a `CounterStore` exposes one atomic primitive, increment-with-expiry. The
//!   first increment of a key starts its window; the key expires when the window ends, which is
//!   the only way a counter is reset.
//! - **Limiter**: `WindowRateLimiter` turns the post-increment count into a `RateDecision`. An
//!   over-limit increment is still recorded.
//! - **Middleware**: `rate_limit` keys every request by peer IP and answers 429 when limited.
//!
//! Windows are fixed, not sliding: a client can get `2 * limit` requests through around a window
//! boundary.

pub mod limiter;
pub mod memory;
pub mod middleware;
pub mod redis_store;
pub mod types;

pub use limiter::WindowRateLimiter;
pub use memory::MemoryCounterStore;
pub use middleware::rate_limit;
pub use redis_store::RedisCounterStore;
pub use types::{RateDecision, RateLimitError, WindowCount};

use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increments `key`. When the increment creates the key, its expiry is set to
    /// `window` from now. Returns the new count and the time left before the key expires.
    async fn incr_with_expiry(&self, key: &str, window: Duration)
        -> Result<WindowCount, RateLimitError>;

    fn backend_name(&self) -> &'static str;
}
