//! Ingestion Data Types
//!
//! The wire envelope shared with the consumer side, and the report returned by the publisher.

use serde::{Deserialize, Serialize};

/// The message body put on the queue for every line: `{"line": "<text>"}`.
///
/// Consumers reject any body that does not deserialize into this shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageEnvelope {
    pub line: String,
}

impl MessageEnvelope {
    pub fn new(line: impl Into<String>) -> Self {
        Self { line: line.into() }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }
}

/// Outcome of one `BoundedPublisher::publish_all` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    /// Lines the broker accepted.
    pub published: usize,
    /// Lines whose publish failed; they were logged and skipped.
    pub failed: usize,
    /// Sources that stopped early because they could not be read.
    pub sources_failed: usize,
    /// Highest number of publish permits held at the same time.
    pub peak_in_flight: usize,
    /// True when the run stopped because of the cancellation token.
    pub cancelled: bool,
}
