//! Storage Data Types

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// One persisted line. Ids are assigned by the store and never reused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineRecord {
    pub id: i64,
    pub text: String,
}

/// A substring search with 1-based pagination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineQuery {
    /// Substring to look for; empty matches every record.
    pub name: String,
    pub page: u32,
    pub page_size: u32,
}

impl LineQuery {
    pub fn new(name: impl Into<String>, page: u32, page_size: u32) -> Self {
        Self {
            name: name.into(),
            page,
            page_size,
        }
    }

    /// Rows to skip: `(page - 1) * page_size`.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }

    pub fn is_valid(&self) -> bool {
        self.page >= 1 && self.page_size >= 1
    }
}

impl Default for LineQuery {
    fn default() -> Self {
        Self::new("", 1, DEFAULT_PAGE_SIZE)
    }
}
