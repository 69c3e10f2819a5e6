use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broker-assigned identifier of one delivery.
///
/// Tags are unique per queue for the lifetime of the broker process. A message that is
/// requeued and delivered again receives a fresh tag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DeliveryTag(pub u64);

/// A delivery as it comes off the wire, before it is wrapped into a `DeliveryHandle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDelivery {
    pub tag: DeliveryTag,
    pub body: Vec<u8>,
    /// True when this message was handed out before and came back to the queue.
    pub redelivered: bool,
}

/// Point-in-time counters for a single queue.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    /// Messages waiting to be delivered.
    pub ready: usize,
    /// Messages delivered to a consumer and not yet acked or nacked.
    pub unacked: usize,
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("queue not declared: {0}")]
    UnknownQueue(String),
    #[error("unknown consumer: {0}")]
    UnknownConsumer(String),
    #[error("unknown delivery tag: {}", .0 .0)]
    UnknownDelivery(DeliveryTag),
    #[error("subscription closed")]
    Closed,
    #[error("broker transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type BrokerResult<T> = Result<T, BrokerError>;
