//! Bounded Consumer
//!
//! Drives one subscription until cancelled.
//!
//! ## Responsibilities
//! - **Pulling**: takes deliveries from the subscription. The subscription's prefetch window is
//!   the only concurrency bound: when `max_in_flight` handles are unresolved, pulling waits.
//! - **Processing**: each delivery is decoded and persisted in its own task. A persist that
//!   panics counts as a failed persist.
//! - **Shutdown**: on cancellation the loop stops pulling, waits for every in-flight task to
//!   resolve its handle, then closes the subscription.

use super::persist::PersistFn;
use super::types::ConsumerStats;
use crate::broker::{BrokerClient, BrokerError, DeliveryHandle};
use crate::ingestion::MessageEnvelope;

use anyhow::{anyhow, Result};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Pause after a failed pull before asking the broker again.
const PULL_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Default)]
struct ConsumerCounters {
    received: AtomicUsize,
    acked: AtomicUsize,
    rejected_malformed: AtomicUsize,
    rejected_failed: AtomicUsize,
    settle_errors: AtomicUsize,
}

impl ConsumerCounters {
    fn stats(&self) -> ConsumerStats {
        ConsumerStats {
            received: self.received.load(Ordering::SeqCst),
            acked: self.acked.load(Ordering::SeqCst),
            rejected_malformed: self.rejected_malformed.load(Ordering::SeqCst),
            rejected_failed: self.rejected_failed.load(Ordering::SeqCst),
            settle_errors: self.settle_errors.load(Ordering::SeqCst),
        }
    }
}

pub struct BoundedConsumer {
    broker: Arc<dyn BrokerClient>,
    queue: String,
    max_in_flight: usize,
    persist: PersistFn,
}

impl BoundedConsumer {
    /// # Arguments
    /// * `max_in_flight` - Prefetch window: unresolved deliveries held at once (at least 1).
    /// * `persist` - Called once per valid envelope, possibly twice for a redelivered message.
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        queue: &str,
        max_in_flight: usize,
        persist: PersistFn,
    ) -> Self {
        Self {
            broker,
            queue: queue.to_string(),
            max_in_flight: max_in_flight.max(1),
            persist,
        }
    }

    /// Consumes until `cancel` fires or the broker closes the subscription.
    ///
    /// Returns `Err` only if the queue cannot be declared or subscribed to.
    pub async fn run(&self, cancel: CancellationToken) -> Result<ConsumerStats> {
        self.broker.declare_queue(&self.queue).await?;
        let mut subscription = self
            .broker
            .consume(&self.queue, self.max_in_flight)
            .await?;

        tracing::info!(
            "Consuming {} (max in flight {})",
            self.queue,
            self.max_in_flight
        );

        let counters = Arc::new(ConsumerCounters::default());
        let mut tasks = JoinSet::new();

        loop {
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!("Delivery task failed: {}", e);
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Consumer on {} stopping", self.queue);
                    break;
                }
                next = subscription.next() => match next {
                    Ok(Some(handle)) => {
                        counters.received.fetch_add(1, Ordering::SeqCst);
                        let persist = self.persist.clone();
                        let counters = counters.clone();
                        tasks.spawn(async move {
                            process_delivery(handle, persist, &counters).await;
                        });
                    }
                    Ok(None) => {
                        tracing::info!("Broker closed the subscription on {}", self.queue);
                        break;
                    }
                    Err(BrokerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!("Failed to pull from {}: {}", self.queue, e);
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            _ = tokio::time::sleep(PULL_RETRY_DELAY) => {}
                        }
                    }
                },
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Delivery task failed: {}", e);
            }
        }

        if let Err(e) = subscription.close().await {
            tracing::warn!("Failed to close subscription on {}: {}", self.queue, e);
        }

        let stats = counters.stats();
        tracing::info!(
            "Consumer on {} finished: {} received, {} acked, {} malformed, {} failed",
            self.queue,
            stats.received,
            stats.acked,
            stats.rejected_malformed,
            stats.rejected_failed
        );
        Ok(stats)
    }
}

async fn process_delivery(handle: DeliveryHandle, persist: PersistFn, counters: &ConsumerCounters) {
    let tag = handle.tag();

    let envelope = match MessageEnvelope::from_bytes(handle.body()) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!("Rejecting malformed delivery {}: {}", tag.0, e);
            counters.rejected_malformed.fetch_add(1, Ordering::SeqCst);
            settle(handle.nack(false).await, counters, tag.0);
            return;
        }
    };

    tracing::debug!("Received: {:?}", envelope.line);

    let line = envelope.line;
    let outcome = AssertUnwindSafe(async move { persist(line).await })
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(anyhow!("persist panicked: {}", panic_message(&*panic))));

    match outcome {
        Ok(()) => {
            let result = handle.ack().await;
            if result.is_ok() {
                counters.acked.fetch_add(1, Ordering::SeqCst);
            }
            settle(result, counters, tag.0);
        }
        Err(e) => {
            tracing::error!("Failed to persist delivery {}, dropping it: {:#}", tag.0, e);
            counters.rejected_failed.fetch_add(1, Ordering::SeqCst);
            settle(handle.nack(false).await, counters, tag.0);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

fn settle(result: Result<(), BrokerError>, counters: &ConsumerCounters, tag: u64) {
    if let Err(e) = result {
        tracing::warn!("Failed to settle delivery {}: {}", tag, e);
        counters.settle_errors.fetch_add(1, Ordering::SeqCst);
    }
}
