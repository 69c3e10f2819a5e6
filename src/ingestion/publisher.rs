//! Bounded Publisher
//!
//! Streams lines from several `LineSource`s onto the queue without overwhelming the broker.
//!
//! ## Flow control
//! - One task per source; lines of a source are published one after the other, so per-source
//!   order is kept.
//! - Every publish, from any source, first takes a permit from a shared pool of
//!   `concurrency_cap` permits.
//! - The permit holder sleeps `min_spacing` after its publish before giving the permit back,
//!   which caps throughput at roughly `concurrency_cap / min_spacing` messages per second.
//!
//! ## Failures
//! A failed publish is logged and counted, and the source moves on to its next line. A source
//! that cannot be read stops on its own; sibling sources are never aborted.

use super::source::LineSource;
use super::types::{MessageEnvelope, PublishReport};
use crate::broker::BrokerClient;

use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct PublishCounters {
    published: AtomicUsize,
    failed: AtomicUsize,
    sources_failed: AtomicUsize,
    peak_in_flight: AtomicUsize,
    cancelled: AtomicBool,
}

impl PublishCounters {
    fn report(&self) -> PublishReport {
        PublishReport {
            published: self.published.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            sources_failed: self.sources_failed.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
            cancelled: self.cancelled.load(Ordering::SeqCst),
        }
    }
}

/// Shared by every per-source task of one `publish_all` run.
struct PublishContext {
    broker: Arc<dyn BrokerClient>,
    queue: String,
    permits: Arc<Semaphore>,
    concurrency_cap: usize,
    min_spacing: Duration,
    counters: PublishCounters,
    cancel: CancellationToken,
}

pub struct BoundedPublisher {
    broker: Arc<dyn BrokerClient>,
    queue: String,
    concurrency_cap: usize,
    min_spacing: Duration,
}

impl BoundedPublisher {
    /// # Arguments
    /// * `concurrency_cap` - Maximum publishes in flight across all sources (at least 1).
    /// * `min_spacing` - Pause each permit holder takes after its publish.
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        queue: &str,
        concurrency_cap: usize,
        min_spacing: Duration,
    ) -> Self {
        Self {
            broker,
            queue: queue.to_string(),
            concurrency_cap: concurrency_cap.max(1),
            min_spacing,
        }
    }

    /// Publishes every line of every source and reports the totals.
    ///
    /// Returns `Err` only if the queue cannot be declared; individual publish failures are
    /// counted in the report instead.
    pub async fn publish_all(
        &self,
        sources: Vec<LineSource>,
        cancel: CancellationToken,
    ) -> Result<PublishReport> {
        self.broker.declare_queue(&self.queue).await?;

        tracing::info!(
            "Publishing {} source(s) to {} (cap={}, spacing={:?})",
            sources.len(),
            self.queue,
            self.concurrency_cap,
            self.min_spacing
        );

        let ctx = Arc::new(PublishContext {
            broker: self.broker.clone(),
            queue: self.queue.clone(),
            permits: Arc::new(Semaphore::new(self.concurrency_cap)),
            concurrency_cap: self.concurrency_cap,
            min_spacing: self.min_spacing,
            counters: PublishCounters::default(),
            cancel,
        });

        let mut tasks = JoinSet::new();
        for source in sources {
            let ctx = ctx.clone();
            tasks.spawn(async move {
                publish_source(&ctx, source).await;
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Source task failed: {}", e);
                ctx.counters.sources_failed.fetch_add(1, Ordering::SeqCst);
            }
        }

        let report = ctx.counters.report();
        tracing::info!(
            "Publishing finished: {} published, {} failed, {} source(s) failed",
            report.published,
            report.failed,
            report.sources_failed
        );
        Ok(report)
    }
}

async fn publish_source(ctx: &PublishContext, mut source: LineSource) {
    tracing::info!("Reading {}", source.name());
    let mut lines = 0usize;

    loop {
        if ctx.cancel.is_cancelled() {
            ctx.counters.cancelled.store(true, Ordering::SeqCst);
            break;
        }

        let line = match source.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Stopped reading {}: {:#}", source.name(), e);
                ctx.counters.sources_failed.fetch_add(1, Ordering::SeqCst);
                break;
            }
        };

        let permit = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                ctx.counters.cancelled.store(true, Ordering::SeqCst);
                break;
            }
            permit = ctx.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let in_flight = ctx.concurrency_cap - ctx.permits.available_permits();
        ctx.counters
            .peak_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);

        publish_line(ctx, source.name(), line).await;
        lines += 1;

        if !ctx.min_spacing.is_zero() {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {}
                _ = tokio::time::sleep(ctx.min_spacing) => {}
            }
        }
        drop(permit);
    }

    tracing::info!("Finished {} ({} lines)", source.name(), lines);
}

async fn publish_line(ctx: &PublishContext, source: &str, line: String) {
    let envelope = MessageEnvelope::new(line);
    let body = match envelope.to_bytes() {
        Ok(body) => body,
        Err(e) => {
            tracing::error!("Failed to serialize line from {}: {}", source, e);
            ctx.counters.failed.fetch_add(1, Ordering::SeqCst);
            return;
        }
    };

    match ctx.broker.publish(&ctx.queue, body).await {
        Ok(()) => {
            ctx.counters.published.fetch_add(1, Ordering::SeqCst);
            tracing::debug!("Sent: {:?}", envelope.line);
        }
        Err(e) => {
            ctx.counters.failed.fetch_add(1, Ordering::SeqCst);
            tracing::warn!("Failed to publish line from {}: {}", source, e);
        }
    }
}
