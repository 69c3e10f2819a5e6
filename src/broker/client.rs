//! Broker Client Contract
//!
//! The pipeline only talks to the broker through `BrokerClient`. Consumption is modelled as a
//! `Subscription` that hands out `DeliveryHandle`s under a prefetch window.
//!
//! ## Flow control
//! Every handle carries a permit from the subscription's window. `Subscription::next` waits for a
//! free permit before asking the broker for another message, so at most `max_in_flight` handles
//! exist at once. Resolving a handle (ack or nack) releases its permit.
//!
//! ## Resolution
//! `ack` and `nack` take the handle by value, so a handle can be resolved only once. A handle that
//! is dropped without being resolved is nacked with `requeue = true` from its `Drop` impl.

use super::types::*;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A durable, at-least-once queue.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Creates the queue if it does not exist yet. Declaring twice is a no-op.
    async fn declare_queue(&self, queue: &str) -> BrokerResult<()>;

    /// Enqueues one message. Once this returns `Ok`, the broker owns the message.
    async fn publish(&self, queue: &str, body: Vec<u8>) -> BrokerResult<()>;

    /// Opens a subscription that holds at most `max_in_flight` unresolved deliveries.
    async fn consume(&self, queue: &str, max_in_flight: usize) -> BrokerResult<Subscription>;
}

/// Backend half of a subscription: produces raw deliveries one at a time.
///
/// `next_delivery` must be cancel-safe: dropping the future must not lose a message that was
/// already taken off the queue, or the message must stay recorded as unacked on the broker.
#[async_trait]
pub trait DeliverySource: Send {
    /// Waits for the next message. `Ok(None)` means the broker closed the subscription.
    async fn next_delivery(&mut self) -> BrokerResult<Option<RawDelivery>>;

    /// Releases the consumer on the broker. Unresolved deliveries go back to the queue.
    async fn close(&mut self) -> BrokerResult<()>;
}

/// Backend half used by handles to settle deliveries.
#[async_trait]
pub trait DeliveryAcker: Send + Sync {
    async fn ack(&self, tag: DeliveryTag) -> BrokerResult<()>;
    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> BrokerResult<()>;
}

/// A live consumer registration with a bounded prefetch window.
pub struct Subscription {
    queue: String,
    source: Box<dyn DeliverySource>,
    acker: Arc<dyn DeliveryAcker>,
    window: Arc<Semaphore>,
    max_in_flight: usize,
    closed: bool,
}

impl Subscription {
    pub fn new(
        queue: &str,
        max_in_flight: usize,
        source: Box<dyn DeliverySource>,
        acker: Arc<dyn DeliveryAcker>,
    ) -> Self {
        Self {
            queue: queue.to_string(),
            source,
            acker,
            window: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            closed: false,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Number of handles handed out and not yet resolved.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.window.available_permits()
    }

    /// Waits for a free slot in the prefetch window, then for the next message.
    ///
    /// Cancel-safe: a cancelled call releases its slot and leaves the message on the broker.
    pub async fn next(&mut self) -> BrokerResult<Option<DeliveryHandle>> {
        let permit = self
            .window
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BrokerError::Closed)?;

        match self.source.next_delivery().await? {
            Some(raw) => {
                tracing::trace!(queue = %self.queue, tag = raw.tag.0, "Received delivery");
                Ok(Some(DeliveryHandle {
                    tag: raw.tag,
                    body: raw.body,
                    redelivered: raw.redelivered,
                    acker: self.acker.clone(),
                    permit: Some(permit),
                    resolved: false,
                }))
            }
            None => Ok(None),
        }
    }

    /// Stops further deliveries and releases the consumer on the broker.
    pub async fn close(&mut self) -> BrokerResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.window.close();
        self.source.close().await
    }
}

/// One in-flight message. Must be resolved with `ack` or `nack`.
pub struct DeliveryHandle {
    tag: DeliveryTag,
    body: Vec<u8>,
    redelivered: bool,
    acker: Arc<dyn DeliveryAcker>,
    permit: Option<OwnedSemaphorePermit>,
    resolved: bool,
}

impl DeliveryHandle {
    pub fn tag(&self) -> DeliveryTag {
        self.tag
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    /// Confirms the message; the broker forgets it.
    pub async fn ack(mut self) -> BrokerResult<()> {
        self.resolved = true;
        let result = self.acker.ack(self.tag).await;
        self.permit.take();
        result
    }

    /// Rejects the message. With `requeue = false` the broker discards it.
    pub async fn nack(mut self, requeue: bool) -> BrokerResult<()> {
        self.resolved = true;
        let result = self.acker.nack(self.tag, requeue).await;
        self.permit.take();
        result
    }
}

impl std::fmt::Debug for DeliveryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryHandle")
            .field("tag", &self.tag)
            .field("body_len", &self.body.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

impl Drop for DeliveryHandle {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }

        tracing::error!(
            tag = self.tag.0,
            "Delivery dropped without ack or nack, returning it to the queue"
        );

        let acker = self.acker.clone();
        let tag = self.tag;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = acker.nack(tag, true).await {
                        tracing::warn!("Failed to requeue abandoned delivery {}: {}", tag.0, e);
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    "No runtime to requeue delivery {}; the broker will redeliver it when the consumer closes",
                    tag.0
                );
            }
        }
    }
}
