use serde::Serialize;

/// Totals of one `BoundedConsumer::run`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    /// Deliveries taken off the queue.
    pub received: usize,
    /// Persisted and acked.
    pub acked: usize,
    /// Bodies that were not a line envelope, nacked without requeue.
    pub rejected_malformed: usize,
    /// Persist failures, nacked without requeue.
    pub rejected_failed: usize,
    /// Acks or nacks the broker refused. The broker redelivers those messages later.
    pub settle_errors: usize,
}
