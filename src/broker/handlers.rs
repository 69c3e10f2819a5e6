//! Broker Node HTTP Handlers
//!
//! Serves a `MemoryBroker` to other processes. Each remote consumer is backed by a local
//! `Subscription`, so the node enforces the prefetch window itself: `next` blocks (up to the
//! requested wait) while the consumer already holds `prefetch` unresolved deliveries.
//!
//! ## Leases
//! Every remote consumer holds a lease, renewed by each `next`, `ack` and `nack`. A consumer that
//! stops calling (crashed, killed, partitioned) is dropped by `reap_expired` once its lease runs
//! out, and its unsettled deliveries go back to the queue.

use super::client::{BrokerClient, DeliveryHandle, Subscription};
use super::memory::MemoryBroker;
use super::protocol::*;
use super::types::*;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Upper bound for a single long-poll, whatever the client asks for.
const MAX_WAIT: Duration = Duration::from_secs(30);

pub const DEFAULT_LEASE: Duration = Duration::from_secs(60);

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

struct RemoteConsumer {
    queue: String,
    subscription: tokio::sync::Mutex<Subscription>,
    /// Deliveries handed to the remote side and not settled yet.
    pending: DashMap<DeliveryTag, DeliveryHandle>,
    last_seen: std::sync::Mutex<Instant>,
}

impl RemoteConsumer {
    fn renew(&self) {
        *self.last_seen.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_seen
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .elapsed()
    }
}

/// A `MemoryBroker` plus the registry of consumers attached over HTTP.
pub struct BrokerNode {
    broker: Arc<MemoryBroker>,
    consumers: DashMap<String, Arc<RemoteConsumer>>,
    lease: Duration,
}

impl BrokerNode {
    pub fn new(broker: Arc<MemoryBroker>) -> Arc<Self> {
        Self::with_lease(broker, DEFAULT_LEASE)
    }

    /// # Arguments
    /// * `lease` - Silence after which a remote consumer is considered gone. Long-polls are
    ///   capped at half of it, so a waiting consumer never expires mid-poll.
    pub fn with_lease(broker: Arc<MemoryBroker>, lease: Duration) -> Arc<Self> {
        Arc::new(Self {
            broker,
            consumers: DashMap::new(),
            lease,
        })
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    pub fn broker(&self) -> Arc<MemoryBroker> {
        self.broker.clone()
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    fn consumer(&self, queue: &str, consumer_id: &str) -> BrokerResult<Arc<RemoteConsumer>> {
        self.consumers
            .get(consumer_id)
            .map(|entry| entry.value().clone())
            .filter(|consumer| consumer.queue == queue)
            .ok_or_else(|| BrokerError::UnknownConsumer(consumer_id.to_string()))
    }

    async fn register(&self, queue: &str, prefetch: usize) -> BrokerResult<String> {
        let subscription = self.broker.consume(queue, prefetch.max(1)).await?;
        let consumer_id = uuid::Uuid::new_v4().to_string();

        self.consumers.insert(
            consumer_id.clone(),
            Arc::new(RemoteConsumer {
                queue: queue.to_string(),
                subscription: tokio::sync::Mutex::new(subscription),
                pending: DashMap::new(),
                last_seen: std::sync::Mutex::new(Instant::now()),
            }),
        );

        tracing::info!("Registered remote consumer {} on {}", consumer_id, queue);
        Ok(consumer_id)
    }

    async fn next(
        &self,
        queue: &str,
        consumer_id: &str,
        wait: Duration,
    ) -> BrokerResult<Option<RawDelivery>> {
        let consumer = self.consumer(queue, consumer_id)?;
        consumer.renew();
        let mut subscription = consumer.subscription.lock().await;

        let wait = wait.min(MAX_WAIT).min(self.lease / 2);
        let result = tokio::time::timeout(wait, subscription.next()).await;
        consumer.renew();

        let handle = match result {
            Ok(result) => match result? {
                Some(handle) => handle,
                None => return Err(BrokerError::Closed),
            },
            Err(_) => return Ok(None),
        };

        let delivery = RawDelivery {
            tag: handle.tag(),
            body: handle.body().to_vec(),
            redelivered: handle.redelivered(),
        };
        consumer.pending.insert(delivery.tag, handle);

        Ok(Some(delivery))
    }

    async fn settle(
        &self,
        queue: &str,
        consumer_id: &str,
        tag: DeliveryTag,
        outcome: Option<bool>,
    ) -> BrokerResult<()> {
        let consumer = self.consumer(queue, consumer_id)?;
        consumer.renew();
        let (_, handle) = consumer
            .pending
            .remove(&tag)
            .ok_or(BrokerError::UnknownDelivery(tag))?;

        match outcome {
            None => handle.ack().await,
            Some(requeue) => handle.nack(requeue).await,
        }
    }

    /// Drops a remote consumer; its unresolved deliveries return to the queue.
    pub async fn unregister(&self, queue: &str, consumer_id: &str) -> BrokerResult<()> {
        let consumer = self.consumer(queue, consumer_id)?;
        if self.consumers.remove(consumer_id).is_none() {
            return Err(BrokerError::UnknownConsumer(consumer_id.to_string()));
        }

        let tags: Vec<DeliveryTag> = consumer.pending.iter().map(|entry| *entry.key()).collect();
        for tag in tags {
            if let Some((_, handle)) = consumer.pending.remove(&tag) {
                if let Err(e) = handle.nack(true).await {
                    tracing::warn!("Failed to requeue delivery {}: {}", tag.0, e);
                }
            }
        }

        consumer.subscription.lock().await.close().await?;
        tracing::info!("Unregistered remote consumer {} on {}", consumer_id, queue);
        Ok(())
    }

    /// Unregisters every consumer whose lease ran out. Returns how many were dropped.
    pub async fn reap_expired(&self) -> usize {
        let expired: Vec<(String, String)> = self
            .consumers
            .iter()
            .filter(|entry| entry.value().idle_for() > self.lease)
            .map(|entry| (entry.value().queue.clone(), entry.key().clone()))
            .collect();

        let mut reaped = 0;
        for (queue, consumer_id) in expired {
            tracing::warn!(
                "Consumer {} on {} missed its lease, requeueing its deliveries",
                consumer_id,
                queue
            );
            match self.unregister(&queue, &consumer_id).await {
                Ok(()) => reaped += 1,
                Err(BrokerError::UnknownConsumer(_)) => {}
                Err(e) => tracing::warn!("Failed to reap consumer {}: {}", consumer_id, e),
            }
        }
        reaped
    }
}

/// Routes of the broker node.
pub fn router(node: Arc<BrokerNode>) -> Router {
    Router::new()
        .route("/queues/:queue/declare", post(handle_declare))
        .route("/queues/:queue/publish", post(handle_publish))
        .route("/queues/:queue/stats", get(handle_stats))
        .route("/queues/:queue/consumers", post(handle_register_consumer))
        .route("/queues/:queue/consumers/:id", delete(handle_unregister_consumer))
        .route("/queues/:queue/consumers/:id/next", post(handle_next))
        .route("/queues/:queue/consumers/:id/ack", post(handle_ack))
        .route("/queues/:queue/consumers/:id/nack", post(handle_nack))
        .layer(Extension(node))
}

fn error_response(error: BrokerError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &error {
        BrokerError::UnknownQueue(_)
        | BrokerError::UnknownConsumer(_)
        | BrokerError::UnknownDelivery(_) => StatusCode::NOT_FOUND,
        BrokerError::Closed => StatusCode::GONE,
        BrokerError::Transport(_) | BrokerError::Unexpected(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

pub async fn handle_declare(
    Extension(node): Extension<Arc<BrokerNode>>,
    Path(queue): Path<String>,
) -> StatusCode {
    match node.broker.declare_queue(&queue).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::error!("Failed to declare queue {}: {}", queue, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub async fn handle_publish(
    Extension(node): Extension<Arc<BrokerNode>>,
    Path(queue): Path<String>,
    Json(req): Json<PublishRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    node.broker
        .publish(&queue, req.body)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::OK)
}

pub async fn handle_stats(
    Extension(node): Extension<Arc<BrokerNode>>,
    Path(queue): Path<String>,
) -> ApiResult<QueueStatsResponse> {
    let stats = node.broker.stats(&queue).map_err(error_response)?;
    Ok(Json(QueueStatsResponse { queue, stats }))
}

pub async fn handle_register_consumer(
    Extension(node): Extension<Arc<BrokerNode>>,
    Path(queue): Path<String>,
    Json(req): Json<RegisterConsumerRequest>,
) -> ApiResult<RegisterConsumerResponse> {
    let consumer_id = node
        .register(&queue, req.prefetch)
        .await
        .map_err(error_response)?;
    Ok(Json(RegisterConsumerResponse { consumer_id }))
}

pub async fn handle_unregister_consumer(
    Extension(node): Extension<Arc<BrokerNode>>,
    Path((queue, consumer_id)): Path<(String, String)>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    node.unregister(&queue, &consumer_id)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::OK)
}

pub async fn handle_next(
    Extension(node): Extension<Arc<BrokerNode>>,
    Path((queue, consumer_id)): Path<(String, String)>,
    Json(req): Json<NextRequest>,
) -> ApiResult<NextResponse> {
    let delivery = node
        .next(&queue, &consumer_id, Duration::from_millis(req.wait_ms))
        .await
        .map_err(error_response)?;
    Ok(Json(NextResponse { delivery }))
}

pub async fn handle_ack(
    Extension(node): Extension<Arc<BrokerNode>>,
    Path((queue, consumer_id)): Path<(String, String)>,
    Json(req): Json<AckRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    node.settle(&queue, &consumer_id, req.tag, None)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::OK)
}

pub async fn handle_nack(
    Extension(node): Extension<Arc<BrokerNode>>,
    Path((queue, consumer_id)): Path<(String, String)>,
    Json(req): Json<NackRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    node.settle(&queue, &consumer_id, req.tag, Some(req.requeue))
        .await
        .map_err(error_response)?;
    Ok(StatusCode::OK)
}
