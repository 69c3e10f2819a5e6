//! Storage Module
//!
//! Where consumed lines end up and where the read API finds them.
//!
//! ## Backends
//! - **`MemoryLineStore`**: a `DashMap` keyed by id. Used by `standalone` runs and by tests.
//! - **`PostgresLineStore`**: the `file_data` table behind an `sqlx` pool.
//!
//! Both are insert-only. The same line inserted twice yields two records.

pub mod memory;
pub mod postgres;
pub mod types;

pub use memory::MemoryLineStore;
pub use postgres::PostgresLineStore;
pub use types::{LineQuery, LineRecord};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait LineStore: Send + Sync {
    /// Persists one line and returns the stored record.
    async fn insert(&self, text: &str) -> StoreResult<LineRecord>;

    /// Records whose text contains `query.name`, ordered by id, one page at a time.
    async fn search(&self, query: &LineQuery) -> StoreResult<Vec<LineRecord>>;

    async fn count(&self) -> StoreResult<u64>;

    async fn health_check(&self) -> StoreResult<()>;

    fn backend_name(&self) -> &'static str;
}
