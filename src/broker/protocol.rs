//! Broker Node Protocol
//!
//! Endpoints and Data Transfer Objects used between `HttpBrokerClient` and the broker node.
//! Bodies are JSON; message payloads travel as byte arrays so that non-UTF-8 bodies survive the
//! round trip and reach the consumer's poison-message check untouched.

use super::types::{DeliveryTag, QueueStats, RawDelivery};
use serde::{Deserialize, Serialize};

pub fn declare_path(queue: &str) -> String {
    format!("/queues/{}/declare", queue)
}

pub fn publish_path(queue: &str) -> String {
    format!("/queues/{}/publish", queue)
}

pub fn consumers_path(queue: &str) -> String {
    format!("/queues/{}/consumers", queue)
}

pub fn consumer_path(queue: &str, consumer_id: &str) -> String {
    format!("/queues/{}/consumers/{}", queue, consumer_id)
}

pub fn next_path(queue: &str, consumer_id: &str) -> String {
    format!("{}/next", consumer_path(queue, consumer_id))
}

pub fn ack_path(queue: &str, consumer_id: &str) -> String {
    format!("{}/ack", consumer_path(queue, consumer_id))
}

pub fn nack_path(queue: &str, consumer_id: &str) -> String {
    format!("{}/nack", consumer_path(queue, consumer_id))
}

pub fn stats_path(queue: &str) -> String {
    format!("/queues/{}/stats", queue)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishRequest {
    pub body: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterConsumerRequest {
    /// Maximum number of unresolved deliveries the node hands to this consumer.
    pub prefetch: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterConsumerResponse {
    pub consumer_id: String,
}

/// Long-poll request for the next delivery.
#[derive(Debug, Serialize, Deserialize)]
pub struct NextRequest {
    /// How long the node may hold the request open when the queue is empty.
    pub wait_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NextResponse {
    /// `None` when the wait elapsed without a message.
    pub delivery: Option<RawDelivery>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AckRequest {
    pub tag: DeliveryTag,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NackRequest {
    pub tag: DeliveryTag,
    pub requeue: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueStatsResponse {
    pub queue: String,
    pub stats: QueueStats,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
