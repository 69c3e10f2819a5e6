//! In-Process Broker
//!
//! `MemoryBroker` keeps named queues in memory and implements the same at-least-once contract the
//! pipeline expects from an external broker:
//! - Published messages stay on the queue until a consumer acks them or nacks them without requeue.
//! - Every delivery is tracked as unacked, together with the consumer it went to.
//! - When a consumer goes away, its unacked deliveries return to the head of the queue and are
//!   flagged as redelivered.
//!
//! Messages live as long as the process. The broker node (`broker::handlers`) serves this
//! structure over HTTP so that producers and consumers in other processes share it.

use super::client::{BrokerClient, DeliveryAcker, DeliverySource, Subscription};
use super::types::*;

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Clone)]
struct StoredMessage {
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug)]
struct Unacked {
    consumer: u64,
    message: StoredMessage,
}

/// State of a single named queue.
struct QueueState {
    name: String,
    ready: Mutex<VecDeque<StoredMessage>>,
    /// Delivered, not yet settled. Keyed by the tag handed to the consumer.
    unacked: DashMap<DeliveryTag, Unacked>,
    next_tag: AtomicU64,
    available: Notify,
}

impl QueueState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ready: Mutex::new(VecDeque::new()),
            unacked: DashMap::new(),
            next_tag: AtomicU64::new(1),
            available: Notify::new(),
        }
    }

    fn ready_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<StoredMessage>> {
        self.ready.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push_back(&self, message: StoredMessage) {
        self.ready_queue().push_back(message);
        self.available.notify_one();
    }

    fn push_front(&self, message: StoredMessage) {
        self.ready_queue().push_front(message);
        self.available.notify_one();
    }

    /// Takes the head of the queue and records it as unacked for `consumer`.
    fn try_deliver(&self, consumer: u64) -> Option<RawDelivery> {
        let message = self.ready_queue().pop_front()?;
        let tag = DeliveryTag(self.next_tag.fetch_add(1, Ordering::SeqCst));

        let delivery = RawDelivery {
            tag,
            body: message.body.clone(),
            redelivered: message.redelivered,
        };
        self.unacked.insert(tag, Unacked { consumer, message });

        Some(delivery)
    }

    /// Waits until a message can be delivered to `consumer`.
    ///
    /// Cancel-safe: the message is only taken off the queue synchronously.
    async fn deliver(&self, consumer: u64) -> RawDelivery {
        loop {
            let notified = self.available.notified();
            if let Some(delivery) = self.try_deliver(consumer) {
                // Pass the wakeup on if more work is left for other consumers.
                if !self.ready_queue().is_empty() {
                    self.available.notify_one();
                }
                return delivery;
            }
            notified.await;
        }
    }

    fn settle(&self, consumer: u64, tag: DeliveryTag) -> BrokerResult<StoredMessage> {
        match self
            .unacked
            .remove_if(&tag, |_, unacked| unacked.consumer == consumer)
        {
            Some((_, unacked)) => Ok(unacked.message),
            None => Err(BrokerError::UnknownDelivery(tag)),
        }
    }

    fn ack(&self, consumer: u64, tag: DeliveryTag) -> BrokerResult<()> {
        self.settle(consumer, tag)?;
        tracing::debug!(queue = %self.name, tag = tag.0, "Acked");
        Ok(())
    }

    fn nack(&self, consumer: u64, tag: DeliveryTag, requeue: bool) -> BrokerResult<()> {
        let mut message = self.settle(consumer, tag)?;
        if requeue {
            message.redelivered = true;
            self.push_front(message);
            tracing::debug!(queue = %self.name, tag = tag.0, "Nacked, requeued");
        } else {
            tracing::debug!(queue = %self.name, tag = tag.0, "Nacked, discarded");
        }
        Ok(())
    }

    /// Returns every unacked delivery of `consumer` to the head of the queue.
    fn release_consumer(&self, consumer: u64) -> usize {
        let tags: Vec<DeliveryTag> = self
            .unacked
            .iter()
            .filter(|entry| entry.value().consumer == consumer)
            .map(|entry| *entry.key())
            .collect();

        let mut released = 0;
        for tag in tags {
            if let Some((_, unacked)) = self.unacked.remove(&tag) {
                let mut message = unacked.message;
                message.redelivered = true;
                self.push_front(message);
                released += 1;
            }
        }

        if released > 0 {
            tracing::info!(
                queue = %self.name,
                "Consumer {} closed, requeued {} unacked deliveries",
                consumer,
                released
            );
        }
        released
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            ready: self.ready_queue().len(),
            unacked: self.unacked.len(),
        }
    }
}

/// Durable-for-process-lifetime queues shared by publishers and consumers.
pub struct MemoryBroker {
    queues: DashMap<String, Arc<QueueState>>,
    next_consumer: AtomicU64,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn queue(&self, name: &str) -> BrokerResult<Arc<QueueState>> {
        self.queues
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BrokerError::UnknownQueue(name.to_string()))
    }

    /// Counters for a declared queue.
    pub fn stats(&self, queue: &str) -> BrokerResult<QueueStats> {
        Ok(self.queue(queue)?.stats())
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.queues.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self {
            queues: DashMap::new(),
            next_consumer: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    async fn declare_queue(&self, queue: &str) -> BrokerResult<()> {
        self.queues
            .entry(queue.to_string())
            .or_insert_with(|| {
                tracing::info!("Declared queue: {}", queue);
                Arc::new(QueueState::new(queue))
            });
        Ok(())
    }

    async fn publish(&self, queue: &str, body: Vec<u8>) -> BrokerResult<()> {
        let state = self.queue(queue)?;
        state.push_back(StoredMessage {
            body,
            redelivered: false,
        });
        Ok(())
    }

    async fn consume(&self, queue: &str, max_in_flight: usize) -> BrokerResult<Subscription> {
        let state = self.queue(queue)?;
        let consumer = self.next_consumer.fetch_add(1, Ordering::SeqCst);

        tracing::info!(
            "Consumer {} attached to {} (prefetch={})",
            consumer,
            queue,
            max_in_flight
        );

        let source = MemorySource {
            queue: state.clone(),
            consumer,
        };
        let acker = MemoryAcker {
            queue: state,
            consumer,
        };

        Ok(Subscription::new(
            queue,
            max_in_flight,
            Box::new(source),
            Arc::new(acker),
        ))
    }
}

struct MemorySource {
    queue: Arc<QueueState>,
    consumer: u64,
}

#[async_trait]
impl DeliverySource for MemorySource {
    async fn next_delivery(&mut self) -> BrokerResult<Option<RawDelivery>> {
        Ok(Some(self.queue.deliver(self.consumer).await))
    }

    async fn close(&mut self) -> BrokerResult<()> {
        self.queue.release_consumer(self.consumer);
        Ok(())
    }
}

impl Drop for MemorySource {
    // Same as a dropped connection on a real broker.
    fn drop(&mut self) {
        self.queue.release_consumer(self.consumer);
    }
}

struct MemoryAcker {
    queue: Arc<QueueState>,
    consumer: u64,
}

#[async_trait]
impl DeliveryAcker for MemoryAcker {
    async fn ack(&self, tag: DeliveryTag) -> BrokerResult<()> {
        self.queue.ack(self.consumer, tag)
    }

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> BrokerResult<()> {
        self.queue.nack(self.consumer, tag, requeue)
    }
}
