use crate::storage::LineRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct DataParams {
    /// Kept as text so that a non-integer gets the same `{"detail"}` 400 as a value below 1.
    pub pageno: Option<String>,
    pub pagesize: Option<String>,
    pub name: Option<String>,
}

/// One row of `/data`, named after the `file_data` columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineResponse {
    pub id: i64,
    pub line_data: String,
}

impl From<LineRecord> for LineResponse {
    fn from(record: LineRecord) -> Self {
        Self {
            id: record.id,
            line_data: record.text,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// Rows in the line store, present when the store answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DetailResponse {
    pub detail: String,
}

impl DetailResponse {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}
