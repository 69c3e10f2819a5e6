//! Consumer Module
//!
//! Pulls line envelopes off the queue and persists them.
//!
//! ## Delivery lifecycle
//! `Received -> Processing -> {Acked | Nacked}`
//! - A body that is not `{"line": <string>}` is a poison message: nacked without requeue.
//! - A valid body goes to the persist function. Success acks; failure nacks without requeue, so
//!   a store outage drops the message instead of looping on it.
//!
//! ## Submodules
//! - **`consumer`**: the `BoundedConsumer` run loop.
//! - **`persist`**: the type-erased persist function and its constructors.
//! - **`types`**: counters reported when the loop stops.

pub mod consumer;
pub mod persist;
pub mod types;

pub use consumer::BoundedConsumer;
pub use persist::{persist_fn, store_persist, PersistFn};
pub use types::ConsumerStats;
