//! Ingestion Module
//!
//! Turns text files into messages on the queue.
//!
//! ## Workflow
//! 1. **Read**: each `LineSource` yields the lines of one file, lazily.
//! 2. **Wrap**: every line becomes a `MessageEnvelope` (`{"line": ...}`).
//! 3. **Publish**: the `BoundedPublisher` hands envelopes to the broker under a concurrency cap
//!    and a minimum spacing per permit holder.

pub mod publisher;
pub mod source;
pub mod types;

pub use publisher::BoundedPublisher;
pub use source::LineSource;
pub use types::{MessageEnvelope, PublishReport};

#[cfg(test)]
mod tests;
