//! Read API Module
//!
//! HTTP access to the stored lines.
//!
//! ## Routes
//! - `GET /health`: liveness plus a store round trip that reports the stored line count.
//! - `GET /data?pageno=1&pagesize=10&name=`: substring search, one page at a time.
//!
//! Every route sits behind the rate-limit middleware, keyed by peer IP.

pub mod handlers;
pub mod types;

use crate::ratelimit::{rate_limit, WindowRateLimiter};
use crate::storage::LineStore;

use axum::routing::get;
use axum::{middleware, Extension, Router};
use std::sync::Arc;

pub fn build_router(store: Arc<dyn LineStore>, limiter: Arc<WindowRateLimiter>) -> Router {
    Router::new()
        .route("/health", get(handlers::handle_health))
        .route("/data", get(handlers::handle_data))
        .layer(Extension(store))
        .layer(middleware::from_fn_with_state(limiter, rate_limit))
}

#[cfg(test)]
mod tests;
