use super::types::{RateLimitError, WindowCount};
use super::CounterStore;

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Expired counters are swept once the map grows past this many keys.
pub const SWEEP_THRESHOLD: usize = 4096;
/// Minimum time between two sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

struct Counter {
    count: u64,
    expires_at: Instant,
}

/// In-process counter store. Counters of one process only; use Redis to share limits.
pub struct MemoryCounterStore {
    counters: DashMap<String, Counter>,
    last_sweep: std::sync::Mutex<Instant>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            last_sweep: std::sync::Mutex::new(Instant::now()),
        }
    }

    /// Drops every expired counter.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.counters.retain(|_, counter| counter.expires_at > now);
    }

    fn maybe_sweep(&self) {
        if self.counters.len() <= SWEEP_THRESHOLD {
            return;
        }
        {
            let mut last_sweep = self.last_sweep.lock().unwrap_or_else(|p| p.into_inner());
            if last_sweep.elapsed() < SWEEP_INTERVAL {
                return;
            }
            *last_sweep = Instant::now();
        }
        self.purge_expired();
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr_with_expiry(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<WindowCount, RateLimitError> {
        self.maybe_sweep();

        let now = Instant::now();
        let mut counter = self.counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            expires_at: now + window,
        });

        if counter.expires_at <= now {
            counter.count = 0;
            counter.expires_at = now + window;
        }
        counter.count += 1;

        Ok(WindowCount {
            count: counter.count,
            expires_in: counter.expires_at - now,
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
