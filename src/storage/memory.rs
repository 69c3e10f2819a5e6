use super::types::{LineQuery, LineRecord};
use super::{LineStore, StoreError, StoreResult};

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// In-process line store.
///
/// Ids start at 1 and increase by one per insert, like a `SERIAL` column.
pub struct MemoryLineStore {
    records: DashMap<i64, String>,
    next_id: AtomicI64,
    available: AtomicBool,
}

impl MemoryLineStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_id: AtomicI64::new(1),
            available: AtomicBool::new(true),
        }
    }

    /// Simulates an outage: while unavailable every call fails with `StoreError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Every stored record, ordered by id.
    pub fn records(&self) -> Vec<LineRecord> {
        let mut records: Vec<LineRecord> = self
            .records
            .iter()
            .map(|entry| LineRecord {
                id: *entry.key(),
                text: entry.value().clone(),
            })
            .collect();
        records.sort_by_key(|record| record.id);
        records
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store switched off".to_string()))
        }
    }
}

impl Default for MemoryLineStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LineStore for MemoryLineStore {
    async fn insert(&self, text: &str) -> StoreResult<LineRecord> {
        self.ensure_available()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.records.insert(id, text.to_string());
        Ok(LineRecord {
            id,
            text: text.to_string(),
        })
    }

    async fn search(&self, query: &LineQuery) -> StoreResult<Vec<LineRecord>> {
        self.ensure_available()?;
        if !query.is_valid() {
            return Err(StoreError::InvalidQuery(format!(
                "page {} / page size {}",
                query.page, query.page_size
            )));
        }

        let offset = usize::try_from(query.offset()).unwrap_or(usize::MAX);
        Ok(self
            .records()
            .into_iter()
            .filter(|record| record.text.contains(query.name.as_str()))
            .skip(offset)
            .take(query.page_size as usize)
            .collect())
    }

    async fn count(&self) -> StoreResult<u64> {
        self.ensure_available()?;
        Ok(self.records.len() as u64)
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.ensure_available()
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
