//! Postgres-backed line store.
//!
//! Lines live in `file_data (id SERIAL PRIMARY KEY, line_data TEXT NOT NULL)`. The consumer only
//! inserts; the read API only searches.
//!
//! Database URLs may carry credentials and are never logged.

use super::types::{LineQuery, LineRecord};
use super::{LineStore, StoreError, StoreResult};

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

const MAX_CONNECTIONS: u32 = 10;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct PostgresLineStore {
    pool: PgPool,
}

impl PostgresLineStore {
    /// Opens the pool and makes sure `file_data` exists.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(url)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        tracing::info!("Connected to postgres line store");
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS file_data (
                id SERIAL PRIMARY KEY,
                line_data TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LineStore for PostgresLineStore {
    async fn insert(&self, text: &str) -> StoreResult<LineRecord> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"INSERT INTO file_data (line_data) VALUES ($1) RETURNING id::BIGINT"#,
        )
        .bind(text)
        .fetch_one(&self.pool)
        .await?;
        Ok(LineRecord {
            id,
            text: text.to_string(),
        })
    }

    async fn search(&self, query: &LineQuery) -> StoreResult<Vec<LineRecord>> {
        if !query.is_valid() {
            return Err(StoreError::InvalidQuery(format!(
                "page {} / page size {}",
                query.page, query.page_size
            )));
        }

        let rows = sqlx::query_as::<_, (i64, String)>(
            r#"SELECT id::BIGINT, line_data FROM file_data
               WHERE line_data LIKE $1 ESCAPE '\'
               ORDER BY id
               LIMIT $2 OFFSET $3"#,
        )
        .bind(like_pattern(&query.name))
        .bind(i64::from(query.page_size))
        .bind(i64::try_from(query.offset()).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, text)| LineRecord { id, text })
            .collect())
    }

    async fn count(&self) -> StoreResult<u64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM file_data")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Unexpected(other.into()),
        }
    }
}

/// `%name%` with LIKE wildcards in `name` matched literally.
pub(crate) fn like_pattern(name: &str) -> String {
    let mut pattern = String::with_capacity(name.len() + 2);
    pattern.push('%');
    for c in name.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
