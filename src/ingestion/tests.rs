//! Ingestion Module Tests
//!
//! ## Test Scopes
//! - **LineSource**: lazy file reading, trimming, and read failures.
//! - **BoundedPublisher**: permit pool bound, spacing, failure isolation and cancellation.
//! - **MessageEnvelope**: the `{"line": ...}` wire shape.

#[cfg(test)]
mod tests {
    use crate::broker::client::{BrokerClient, Subscription};
    use crate::broker::memory::MemoryBroker;
    use crate::broker::types::{BrokerError, BrokerResult};
    use crate::ingestion::publisher::BoundedPublisher;
    use crate::ingestion::source::LineSource;
    use crate::ingestion::types::MessageEnvelope;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    const QUEUE: &str = "lines";

    /// Wraps a `MemoryBroker`, tracks concurrent publishes and fails lines containing `fail_on`.
    struct GaugedBroker {
        inner: Arc<MemoryBroker>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
        fail_on: Option<String>,
    }

    impl GaugedBroker {
        fn new(delay: Duration, fail_on: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                inner: MemoryBroker::new(),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay,
                fail_on: fail_on.map(str::to_string),
            })
        }
    }

    #[async_trait]
    impl BrokerClient for GaugedBroker {
        async fn declare_queue(&self, queue: &str) -> BrokerResult<()> {
            self.inner.declare_queue(queue).await
        }

        async fn publish(&self, queue: &str, body: Vec<u8>) -> BrokerResult<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;

            let result = match &self.fail_on {
                Some(marker) if String::from_utf8_lossy(&body).contains(marker.as_str()) => {
                    Err(BrokerError::Transport("broker unavailable".to_string()))
                }
                _ => self.inner.publish(queue, body).await,
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn consume(&self, queue: &str, max_in_flight: usize) -> BrokerResult<Subscription> {
            self.inner.consume(queue, max_in_flight).await
        }
    }

    /// Pulls everything currently on the queue, acking as it goes.
    async fn drain(broker: &dyn BrokerClient) -> Vec<String> {
        let mut subscription = broker.consume(QUEUE, 16).await.unwrap();
        let mut lines = Vec::new();
        while let Ok(next) =
            tokio::time::timeout(Duration::from_millis(50), subscription.next()).await
        {
            let handle = next.unwrap().unwrap();
            lines.push(MessageEnvelope::from_bytes(handle.body()).unwrap().line);
            handle.ack().await.unwrap();
        }
        subscription.close().await.unwrap();
        lines
    }

    // ============================================================
    // LINE SOURCE
    // ============================================================

    #[tokio::test]
    async fn test_file_source_reads_trimmed_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "  alpha  \nbeta\r\n\ngamma").unwrap();

        let mut source = LineSource::file(file.path());
        let mut lines = Vec::new();
        while let Some(line) = source.next_line().await.unwrap() {
            lines.push(line);
        }

        assert_eq!(lines, vec!["alpha", "beta", "", "gamma"]);
        // Exhausted sources stay exhausted.
        assert!(source.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_file_fails_on_first_read() {
        let mut source = LineSource::file("/definitely/not/here.txt");

        let result = source.next_line().await;

        assert!(result.is_err());
        assert!(format!("{:#}", result.unwrap_err()).contains("open /definitely/not/here.txt"));
        assert!(source.next_line().await.unwrap().is_none());
    }

    #[test]
    fn test_envelope_wire_shape() {
        let body = MessageEnvelope::new("hello").to_bytes().unwrap();

        assert_eq!(String::from_utf8(body).unwrap(), r#"{"line":"hello"}"#);
        assert!(MessageEnvelope::from_bytes(br#"{"text":"hello"}"#).is_err());
        assert!(MessageEnvelope::from_bytes(br#"{"line":5}"#).is_err());
    }

    // ============================================================
    // BOUNDED PUBLISHER
    // ============================================================

    #[tokio::test]
    async fn test_publishes_every_line_of_every_source() {
        // ARRANGE
        let broker = MemoryBroker::new();
        let publisher = BoundedPublisher::new(broker.clone(), QUEUE, 2, Duration::ZERO);
        let sources = vec![
            LineSource::from_lines("first", ["a", "b", "c"]),
            LineSource::from_lines("second", ["d", "e", "f"]),
        ];

        // ACT
        let report = publisher
            .publish_all(sources, CancellationToken::new())
            .await
            .unwrap();

        // ASSERT
        assert_eq!(report.published, 6);
        assert_eq!(report.failed, 0);
        assert!(!report.cancelled);
        assert_eq!(broker.stats(QUEUE).unwrap().ready, 6);

        let mut lines = drain(broker.as_ref()).await;
        lines.sort();
        assert_eq!(lines, vec!["a", "b", "c", "d", "e", "f"]);
    }

    #[tokio::test]
    async fn test_single_source_keeps_line_order() {
        let broker = MemoryBroker::new();
        let publisher = BoundedPublisher::new(broker.clone(), QUEUE, 1, Duration::ZERO);
        let lines: Vec<String> = (0..20).map(|i| format!("line {}", i)).collect();

        publisher
            .publish_all(
                vec![LineSource::from_lines("only", lines.clone())],
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(drain(broker.as_ref()).await, lines);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_cap_is_never_exceeded() {
        // ARRANGE: 4 sources competing for 2 permits, each publish takes 10ms
        let broker = GaugedBroker::new(Duration::from_millis(10), None);
        let publisher = BoundedPublisher::new(broker.clone(), QUEUE, 2, Duration::ZERO);
        let sources = (0..4)
            .map(|s| {
                LineSource::from_lines(
                    &format!("source-{}", s),
                    (0..5).map(move |i| format!("{}-{}", s, i)),
                )
            })
            .collect();

        // ACT
        let report = publisher
            .publish_all(sources, CancellationToken::new())
            .await
            .unwrap();

        // ASSERT
        assert_eq!(report.published, 20);
        assert_eq!(broker.peak.load(Ordering::SeqCst), 2);
        assert!(report.peak_in_flight <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_spacing_is_held_per_permit() {
        // One permit: five publishes and five pauses in a row.
        let broker = MemoryBroker::new();
        let publisher = BoundedPublisher::new(broker.clone(), QUEUE, 1, Duration::from_millis(100));
        let start = tokio::time::Instant::now();
        publisher
            .publish_all(
                vec![LineSource::from_lines("serial", ["1", "2", "3", "4", "5"])],
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));

        // Five permits: the five pauses overlap.
        let publisher = BoundedPublisher::new(broker.clone(), QUEUE, 5, Duration::from_millis(100));
        let sources = (0..5)
            .map(|i| LineSource::from_lines(&format!("s{}", i), [format!("{}", i)]))
            .collect();
        let start = tokio::time::Instant::now();
        let report = publisher
            .publish_all(sources, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.published, 5);
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_stop_the_source() {
        let broker = GaugedBroker::new(Duration::ZERO, Some("bad"));
        let publisher = BoundedPublisher::new(broker.clone(), QUEUE, 2, Duration::ZERO);
        let sources = vec![
            LineSource::from_lines("mixed", ["ok-1", "bad-1", "ok-2", "bad-2", "ok-3"]),
            LineSource::from_lines("clean", ["ok-4"]),
        ];

        let report = publisher
            .publish_all(sources, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.published, 4);
        assert_eq!(report.failed, 2);
        assert_eq!(report.sources_failed, 0);
        let mut lines = drain(broker.as_ref()).await;
        lines.sort();
        assert_eq!(lines, vec!["ok-1", "ok-2", "ok-3", "ok-4"]);
    }

    #[tokio::test]
    async fn test_unreadable_source_does_not_abort_siblings() {
        let broker = MemoryBroker::new();
        let publisher = BoundedPublisher::new(broker.clone(), QUEUE, 2, Duration::ZERO);
        let sources = vec![
            LineSource::file("/missing/input.txt"),
            LineSource::from_lines("present", ["x", "y"]),
        ];

        let report = publisher
            .publish_all(sources, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.sources_failed, 1);
        assert_eq!(report.published, 2);
    }

    #[tokio::test]
    async fn test_cancelled_run_publishes_nothing() {
        let broker = MemoryBroker::new();
        let publisher = BoundedPublisher::new(broker.clone(), QUEUE, 2, Duration::ZERO);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = publisher
            .publish_all(vec![LineSource::from_lines("never", ["a", "b"])], cancel)
            .await
            .unwrap();

        assert_eq!(report.published, 0);
        assert!(report.cancelled);
        assert_eq!(broker.stats(QUEUE).unwrap().ready, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_run_stops_taking_permits() {
        let broker = MemoryBroker::new();
        let publisher = BoundedPublisher::new(broker.clone(), QUEUE, 1, Duration::from_secs(1));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            trigger.cancel();
        });

        let lines: Vec<String> = (0..100).map(|i| i.to_string()).collect();
        let report = publisher
            .publish_all(vec![LineSource::from_lines("long", lines)], cancel)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.published, 3);
        assert_eq!(broker.stats(QUEUE).unwrap().ready, 3);
    }
}
