//! Message Broker Module
//!
//! Durable, at-least-once queueing between the file ingestion side and the storage side.
//!
//! ## Delivery model
//! 1. **Publish**: a producer hands a serialized envelope to `BrokerClient::publish`. Once the call
//!    returns, the broker owns the message.
//! 2. **Consume**: a consumer opens a `Subscription` with a prefetch window. The broker holds back
//!    further deliveries while the window is full.
//! 3. **Settle**: each `DeliveryHandle` is consumed by exactly one `ack` or `nack`. Deliveries that
//!    were never settled return to the queue when the consumer goes away.
//!
//! ## Submodules
//! - **`client`**: The `BrokerClient` trait, `Subscription` and `DeliveryHandle`.
//! - **`memory`**: In-process queues (`MemoryBroker`).
//! - **`handlers`**: The broker node: a `MemoryBroker` served over HTTP.
//! - **`http`**: `HttpBrokerClient`, the client for a broker node.
//! - **`protocol`**: Endpoints and DTOs shared by the node and its client.

pub mod client;
pub mod handlers;
pub mod http;
pub mod memory;
pub mod protocol;
pub mod types;

pub use client::{BrokerClient, DeliveryHandle, Subscription};
pub use types::{BrokerError, BrokerResult, DeliveryTag, QueueStats};
