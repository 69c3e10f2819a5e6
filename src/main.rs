use line_pipeline::api::build_router;
use line_pipeline::broker::handlers::{router as broker_router, BrokerNode};
use line_pipeline::broker::http::HttpBrokerClient;
use line_pipeline::broker::memory::MemoryBroker;
use line_pipeline::broker::BrokerClient;
use line_pipeline::config::PipelineConfig;
use line_pipeline::consumer::{store_persist, BoundedConsumer};
use line_pipeline::ingestion::{BoundedPublisher, LineSource};
use line_pipeline::ratelimit::{
    CounterStore, MemoryCounterStore, RedisCounterStore, WindowRateLimiter,
};
use line_pipeline::storage::{LineStore, MemoryLineStore, PostgresLineStore};
use line_pipeline::supervisor::Supervisor;

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const USAGE: &str = "Usage: line-pipeline <broker | ingest <files..> | consume | api | standalone <files..>>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = PipelineConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("{}", USAGE);
        eprintln!("Example: {} ingest data/part-1.txt data/part-2.txt", args[0]);
        std::process::exit(1);
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received, shutting down");
            shutdown.cancel();
        }
    });

    let files: Vec<String> = args[2..].to_vec();
    match args[1].as_str() {
        "broker" => run_broker(&config, cancel).await,
        "ingest" => {
            let broker: Arc<dyn BrokerClient> = Arc::new(HttpBrokerClient::new(&config.broker_url));
            run_ingest(&config, broker, files, cancel).await
        }
        "consume" => {
            let broker: Arc<dyn BrokerClient> = Arc::new(HttpBrokerClient::new(&config.broker_url));
            let store = open_store(&config).await?;
            run_consume(&config, broker, store, cancel).await
        }
        "api" => {
            let store = open_store(&config).await?;
            run_api(&config, store, cancel).await
        }
        "standalone" => run_standalone(&config, files, cancel).await,
        other => {
            eprintln!("Unknown mode: {}", other);
            eprintln!("{}", USAGE);
            std::process::exit(1);
        }
    }
}

async fn open_store(config: &PipelineConfig) -> anyhow::Result<Arc<dyn LineStore>> {
    match &config.database_url {
        Some(url) => Ok(Arc::new(PostgresLineStore::connect(url).await?)),
        None => {
            tracing::warn!("DATABASE_URL not set, lines are kept in memory only");
            Ok(Arc::new(MemoryLineStore::new()))
        }
    }
}

async fn open_counters(config: &PipelineConfig) -> anyhow::Result<Arc<dyn CounterStore>> {
    match &config.redis_url {
        Some(url) => Ok(Arc::new(RedisCounterStore::connect(url).await?)),
        None => {
            tracing::warn!("REDIS_URL not set, rate limits are tracked per process");
            Ok(Arc::new(MemoryCounterStore::new()))
        }
    }
}

async fn serve(
    bind: SocketAddr,
    app: Router,
    name: &str,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("{} listening on {}", name, listener.local_addr()?);
    tracing::info!("Press Ctrl+C to shutdown");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { cancel.cancelled().await })
    .await?;
    Ok(())
}

async fn run_broker(config: &PipelineConfig, cancel: CancellationToken) -> anyhow::Result<()> {
    let node = BrokerNode::with_lease(MemoryBroker::new(), config.consumer_lease);

    // Lease reaper:
    let reaper_node = node.clone();
    let reaper_cancel = cancel.clone();
    tokio::spawn(async move {
        let period = (reaper_node.lease() / 2).max(std::time::Duration::from_secs(1));
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = reaper_cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let reaped = reaper_node.reap_expired().await;
            if reaped > 0 {
                tracing::info!("Reaped {} silent consumer(s)", reaped);
            }
        }
    });

    // Queue depth reporter:
    let stats_node = node.clone();
    let stats_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            tokio::select! {
                _ = stats_cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let broker = stats_node.broker();
            for queue in broker.queue_names() {
                if let Ok(stats) = broker.stats(&queue) {
                    tracing::info!(
                        "Queue {}: {} ready, {} unacked",
                        queue,
                        stats.ready,
                        stats.unacked
                    );
                }
            }
            tracing::info!("{} consumer(s) attached", stats_node.consumer_count());
        }
    });

    serve(config.broker_bind, broker_router(node), "Broker node", cancel).await
}

async fn run_ingest(
    config: &PipelineConfig,
    broker: Arc<dyn BrokerClient>,
    files: Vec<String>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    if files.is_empty() {
        anyhow::bail!("ingest needs at least one file");
    }

    let publisher = BoundedPublisher::new(
        broker,
        &config.queue_name,
        config.publish_concurrency,
        config.publish_spacing,
    );
    let sources = files.into_iter().map(LineSource::file).collect();
    let report = publisher.publish_all(sources, cancel).await?;

    tracing::info!("Ingestion report: {}", serde_json::to_string(&report)?);
    Ok(())
}

async fn run_consume(
    config: &PipelineConfig,
    broker: Arc<dyn BrokerClient>,
    store: Arc<dyn LineStore>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let consumer = BoundedConsumer::new(
        broker,
        &config.queue_name,
        config.consumer_prefetch,
        store_persist(store),
    );
    let stats = consumer.run(cancel).await?;

    tracing::info!("Consumer stats: {}", serde_json::to_string(&stats)?);
    Ok(())
}

async fn run_api(
    config: &PipelineConfig,
    store: Arc<dyn LineStore>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let counters = open_counters(config).await?;
    let limiter = Arc::new(WindowRateLimiter::new(
        counters,
        config.rate_limit,
        config.rate_window,
    ));
    tracing::info!(
        "Rate limit: {} request(s) per {:?} ({} counters)",
        limiter.limit(),
        limiter.window(),
        limiter.backend_name()
    );

    serve(config.api_bind, build_router(store, limiter), "Read API", cancel).await
}

/// Publisher, consumer and read API in one process over an in-process broker.
async fn run_standalone(
    config: &PipelineConfig,
    files: Vec<String>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let broker: Arc<dyn BrokerClient> = MemoryBroker::new();
    let store = open_store(config).await?;

    let mut supervisor = Supervisor::new(cancel.clone());
    {
        let config = config.clone();
        let broker = broker.clone();
        let store = store.clone();
        let cancel = cancel.clone();
        supervisor.spawn("consumer", async move {
            run_consume(&config, broker, store, cancel).await
        });
    }
    {
        let config = config.clone();
        let cancel = cancel.clone();
        supervisor.spawn("read API", async move { run_api(&config, store, cancel).await });
    }
    if !files.is_empty() {
        let config = config.clone();
        supervisor.spawn("ingestion", async move {
            run_ingest(&config, broker, files, cancel).await
        });
    }

    // The consumer and the API keep running until Ctrl+C or the first failure.
    supervisor.wait().await?;
    Ok(())
}
