use anyhow::{bail, Context, Result};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

// Pipeline configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub queue_name: String,
    pub broker_url: String,
    pub broker_bind: SocketAddr,
    pub publish_concurrency: usize,
    pub publish_spacing: Duration,
    pub consumer_prefetch: usize,
    /// How long the broker node keeps a silent remote consumer before requeueing its deliveries.
    pub consumer_lease: Duration,
    pub rate_limit: u64,
    pub rate_window: Duration,
    /// Postgres URL; `None` selects the in-memory line store.
    pub database_url: Option<String>,
    /// Redis URL; `None` selects in-memory rate-limit counters.
    pub redis_url: Option<String>,
    pub api_bind: SocketAddr,
    pub log_level: tracing::Level,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key/value source. Unset and empty values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let config = Self {
            queue_name: var("QUEUE_NAME").unwrap_or_else(|| "data_queue".to_string()),
            broker_url: var("BROKER_URL").unwrap_or_else(|| "http://127.0.0.1:5700".to_string()),
            broker_bind: parse(&var, "BROKER_BIND", "0.0.0.0:5700")?,
            publish_concurrency: parse(&var, "PUBLISH_CONCURRENCY", "4")?,
            publish_spacing: Duration::from_millis(parse(&var, "PUBLISH_SPACING_MS", "10")?),
            consumer_prefetch: parse(&var, "CONSUMER_PREFETCH", "10")?,
            consumer_lease: Duration::from_secs(parse(&var, "CONSUMER_LEASE_SECS", "60")?),
            rate_limit: parse(&var, "RATE_LIMIT", "5")?,
            rate_window: Duration::from_secs(parse(&var, "RATE_WINDOW_SECS", "60")?),
            database_url: var("DATABASE_URL"),
            redis_url: var("REDIS_URL"),
            api_bind: parse(&var, "API_BIND", "0.0.0.0:8000")?,
            log_level: parse(&var, "LOG_LEVEL", "info")?,
        };

        if config.publish_concurrency == 0 {
            bail!("PUBLISH_CONCURRENCY must be at least 1");
        }
        if config.consumer_prefetch == 0 {
            bail!("CONSUMER_PREFETCH must be at least 1");
        }
        if config.consumer_lease < Duration::from_secs(2) {
            bail!("CONSUMER_LEASE_SECS must be at least 2");
        }
        if config.rate_window.is_zero() {
            bail!("RATE_WINDOW_SECS must be at least 1");
        }
        Ok(config)
    }
}

fn parse<T, F>(var: &F, key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    let raw = var(key).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse()
        .with_context(|| format!("parse {key}: {raw:?}"))
}
