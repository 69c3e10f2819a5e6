//! HTTP Broker Client
//!
//! `BrokerClient` implementation that talks to a broker node over HTTP. One `reqwest::Client`
//! (and its connection pool) is shared by every publish and every subscription created from the
//! same `HttpBrokerClient`.
//!
//! Transport errors are retried with exponential backoff and jitter. A consumer that the node no
//! longer knows (node restarted) is registered again transparently; deliveries the old
//! registration held are settled by the node, which requeues them.

use super::client::{BrokerClient, DeliveryAcker, DeliverySource, Subscription};
use super::protocol::*;
use super::types::*;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_ATTEMPTS: usize = 3;
const DEFAULT_LONG_POLL: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct Transport {
    base_url: String,
    http_client: reqwest::Client,
}

impl Transport {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_with_retry<T: serde::Serialize>(
        &self,
        path: &str,
        payload: &T,
        timeout: Duration,
        attempts: usize,
    ) -> BrokerResult<reqwest::Response> {
        let url = self.url(path);
        let mut delay_ms = 150u64;

        for attempt in 0..attempts {
            let response = self
                .http_client
                .post(url.clone())
                .json(payload)
                .timeout(timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(BrokerError::Transport(e.to_string()));
                    }
                    tracing::debug!("POST {} failed (attempt {}): {}", url, attempt + 1, e);
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(BrokerError::Transport("Retry attempts exhausted".to_string()))
    }

    async fn delete(&self, path: &str) -> BrokerResult<reqwest::Response> {
        self.http_client
            .delete(self.url(path))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))
    }
}

/// Turns a non-success response into a `BrokerError`; `not_found` decides what a 404 means.
async fn check_status(
    response: reqwest::Response,
    not_found: impl FnOnce() -> BrokerError,
) -> BrokerResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(not_found());
    }
    if status == reqwest::StatusCode::GONE {
        return Err(BrokerError::Closed);
    }

    let detail = match response.json::<ErrorResponse>().await {
        Ok(body) => body.error,
        Err(_) => status.to_string(),
    };
    Err(BrokerError::Transport(format!("{}: {}", status, detail)))
}

/// Client for a remote broker node.
pub struct HttpBrokerClient {
    transport: Transport,
    long_poll: Duration,
}

impl HttpBrokerClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            transport: Transport {
                base_url: base_url.trim_end_matches('/').to_string(),
                http_client: reqwest::Client::new(),
            },
            long_poll: DEFAULT_LONG_POLL,
        }
    }

    /// How long each `next` request may wait on the node for a message.
    pub fn with_long_poll(mut self, long_poll: Duration) -> Self {
        self.long_poll = long_poll;
        self
    }

    pub async fn stats(&self, queue: &str) -> BrokerResult<QueueStats> {
        let response = self
            .transport
            .http_client
            .get(self.transport.url(&stats_path(queue)))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        let response = check_status(response, || BrokerError::UnknownQueue(queue.to_string())).await?;
        let body: QueueStatsResponse = response
            .json()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        Ok(body.stats)
    }
}

#[async_trait]
impl BrokerClient for HttpBrokerClient {
    async fn declare_queue(&self, queue: &str) -> BrokerResult<()> {
        let response = self
            .transport
            .post_with_retry(
                &declare_path(queue),
                &serde_json::json!({}),
                REQUEST_TIMEOUT,
                RETRY_ATTEMPTS,
            )
            .await?;
        check_status(response, || BrokerError::UnknownQueue(queue.to_string())).await?;
        Ok(())
    }

    async fn publish(&self, queue: &str, body: Vec<u8>) -> BrokerResult<()> {
        let response = self
            .transport
            .post_with_retry(
                &publish_path(queue),
                &PublishRequest { body },
                REQUEST_TIMEOUT,
                RETRY_ATTEMPTS,
            )
            .await?;
        check_status(response, || BrokerError::UnknownQueue(queue.to_string())).await?;
        Ok(())
    }

    async fn consume(&self, queue: &str, max_in_flight: usize) -> BrokerResult<Subscription> {
        let consumer = Arc::new(RemoteConsumer {
            transport: self.transport.clone(),
            queue: queue.to_string(),
            prefetch: max_in_flight,
            consumer_id: RwLock::new(String::new()),
        });
        consumer.register().await?;

        let source = HttpSource {
            consumer: consumer.clone(),
            long_poll: self.long_poll,
        };

        Ok(Subscription::new(
            queue,
            max_in_flight,
            Box::new(source),
            consumer,
        ))
    }
}

/// Client-side view of one consumer registration on the node.
struct RemoteConsumer {
    transport: Transport,
    queue: String,
    prefetch: usize,
    consumer_id: RwLock<String>,
}

impl RemoteConsumer {
    async fn register(&self) -> BrokerResult<String> {
        let response = self
            .transport
            .post_with_retry(
                &consumers_path(&self.queue),
                &RegisterConsumerRequest {
                    prefetch: self.prefetch,
                },
                REQUEST_TIMEOUT,
                RETRY_ATTEMPTS,
            )
            .await?;
        let response =
            check_status(response, || BrokerError::UnknownQueue(self.queue.clone())).await?;
        let body: RegisterConsumerResponse = response
            .json()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        tracing::info!(
            "Registered consumer {} on {} (prefetch={})",
            body.consumer_id,
            self.queue,
            self.prefetch
        );
        *self.consumer_id.write().await = body.consumer_id.clone();
        Ok(body.consumer_id)
    }

    async fn current_id(&self) -> String {
        self.consumer_id.read().await.clone()
    }
}

#[async_trait]
impl DeliveryAcker for RemoteConsumer {
    async fn ack(&self, tag: DeliveryTag) -> BrokerResult<()> {
        let consumer_id = self.current_id().await;
        let response = self
            .transport
            .post_with_retry(
                &ack_path(&self.queue, &consumer_id),
                &AckRequest { tag },
                REQUEST_TIMEOUT,
                RETRY_ATTEMPTS,
            )
            .await?;
        check_status(response, || BrokerError::UnknownDelivery(tag)).await?;
        Ok(())
    }

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> BrokerResult<()> {
        let consumer_id = self.current_id().await;
        let response = self
            .transport
            .post_with_retry(
                &nack_path(&self.queue, &consumer_id),
                &NackRequest { tag, requeue },
                REQUEST_TIMEOUT,
                RETRY_ATTEMPTS,
            )
            .await?;
        check_status(response, || BrokerError::UnknownDelivery(tag)).await?;
        Ok(())
    }
}

struct HttpSource {
    consumer: Arc<RemoteConsumer>,
    long_poll: Duration,
}

#[async_trait]
impl DeliverySource for HttpSource {
    async fn next_delivery(&mut self) -> BrokerResult<Option<RawDelivery>> {
        loop {
            let consumer_id = self.consumer.current_id().await;
            let response = self
                .consumer
                .transport
                .post_with_retry(
                    &next_path(&self.consumer.queue, &consumer_id),
                    &NextRequest {
                        wait_ms: self.long_poll.as_millis() as u64,
                    },
                    self.long_poll + REQUEST_TIMEOUT,
                    RETRY_ATTEMPTS,
                )
                .await?;

            match check_status(response, || BrokerError::UnknownConsumer(consumer_id.clone())).await
            {
                Ok(response) => {
                    let body: NextResponse = response
                        .json()
                        .await
                        .map_err(|e| BrokerError::Transport(e.to_string()))?;
                    if let Some(delivery) = body.delivery {
                        return Ok(Some(delivery));
                    }
                }
                Err(BrokerError::UnknownConsumer(id)) => {
                    tracing::warn!("Broker forgot consumer {}, registering again", id);
                    self.consumer.register().await?;
                }
                Err(BrokerError::Closed) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    async fn close(&mut self) -> BrokerResult<()> {
        let consumer_id = self.consumer.current_id().await;
        let response = self
            .consumer
            .transport
            .delete(&consumer_path(&self.consumer.queue, &consumer_id))
            .await?;
        check_status(response, || BrokerError::UnknownConsumer(consumer_id.clone())).await?;
        tracing::info!("Closed consumer {} on {}", consumer_id, self.consumer.queue);
        Ok(())
    }
}
