//! Persist Functions
//!
//! The consumer does not know where lines go. It calls a `PersistFn`, which is usually a
//! `LineStore::insert` wrapped by `store_persist`.

use crate::storage::LineStore;

use anyhow::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Thread-safe, asynchronous persist function: takes one line, resolves once it is stored.
pub type PersistFn =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// Type-erases an async closure into a `PersistFn`.
pub fn persist_fn<F, Fut>(persist: F) -> PersistFn
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |line: String| {
        Box::pin(persist(line)) as Pin<Box<dyn Future<Output = Result<()>> + Send>>
    })
}

/// Persists every line as a new record in `store`.
pub fn store_persist(store: Arc<dyn LineStore>) -> PersistFn {
    persist_fn(move |line| {
        let store = store.clone();
        async move {
            let record = store.insert(&line).await?;
            tracing::debug!("Stored line {} in {}", record.id, store.backend_name());
            Ok(())
        }
    })
}
