//! Rate-limit middleware for axum routers.
//!
//! Mount with `axum::middleware::from_fn_with_state(limiter, rate_limit)`. The client is the
//! peer IP from `ConnectInfo<SocketAddr>`, so the server must be started with
//! `into_make_service_with_connect_info::<SocketAddr>()`.

use super::limiter::WindowRateLimiter;
use super::types::RateDecision;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

pub const TOO_MANY_REQUESTS_DETAIL: &str = "Too many requests. Please try again later.";

/// Client identity when the peer address is unknown (no `ConnectInfo` on the request).
const UNKNOWN_CLIENT: &str = "unknown";

pub async fn rate_limit(
    State(limiter): State<Arc<WindowRateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_id(&request);

    match limiter.check(&client).await {
        Ok(RateDecision::Allowed { .. }) => next.run(request).await,
        Ok(RateDecision::Limited { retry_after }) => {
            tracing::warn!("Rate limit exceeded for {} on {}", client, request.uri().path());
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "detail": TOO_MANY_REQUESTS_DETAIL })),
            )
                .into_response();
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(retry_after_secs(retry_after.as_millis())),
            );
            response
        }
        Err(e) => {
            tracing::error!("Rate limiter failed for {}: {}", client, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": format!("Internal server error: {}", e) })),
            )
                .into_response()
        }
    }
}

fn client_id(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Whole seconds, rounded up, never below 1.
fn retry_after_secs(millis: u128) -> u64 {
    let secs = millis.div_ceil(1000).max(1);
    u64::try_from(secs).unwrap_or(u64::MAX)
}
