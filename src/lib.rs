//! Line Pipeline Library
//!
//! Moves text lines from files into a store through a durable queue, and serves them back over
//! a rate-limited HTTP API. The binary (`main.rs`) wires these modules into run modes.
//!
//! ## Architecture Modules
//! - **`broker`**: At-least-once queueing. An in-process `MemoryBroker`, the HTTP broker node that
//!   serves it, and `HttpBrokerClient` to reach that node from other processes.
//! - **`ingestion`**: Reads files line by line and publishes `{"line": ...}` envelopes under a
//!   concurrency cap and a minimum spacing.
//! - **`consumer`**: Pulls envelopes under a prefetch window, persists them, and acks or nacks
//!   every delivery exactly once.
//! - **`storage`**: The `LineStore` trait with in-memory and Postgres backends.
//! - **`ratelimit`**: Fixed-window limiting over an atomic counter store (in-memory or Redis).
//! - **`api`**: The read API (`/health`, `/data`).
//! - **`config`**: Environment-driven settings shared by every run mode.
//! - **`supervisor`**: Runs the parts of one process together and stops them all on the first failure.

pub mod api;
pub mod broker;
pub mod config;
pub mod consumer;
pub mod ingestion;
pub mod ratelimit;
pub mod storage;
pub mod supervisor;
