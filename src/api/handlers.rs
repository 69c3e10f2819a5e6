use super::types::{DataParams, DetailResponse, HealthResponse, LineResponse};
use crate::storage::types::DEFAULT_PAGE_SIZE;
use crate::storage::{LineQuery, LineStore, StoreError};

use axum::extract::rejection::QueryRejection;
use axum::extract::Query;
use axum::http::StatusCode;
use axum::{Extension, Json};
use std::sync::Arc;

type ApiError = (StatusCode, Json<DetailResponse>);

pub async fn handle_health(
    Extension(store): Extension<Arc<dyn LineStore>>,
) -> (StatusCode, Json<HealthResponse>) {
    let checked = match store.health_check().await {
        Ok(()) => store.count().await,
        Err(e) => Err(e),
    };
    match checked {
        Ok(records) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
                records: Some(records),
                detail: None,
            }),
        ),
        Err(e) => {
            tracing::warn!("Health check failed on {} store: {}", store.backend_name(), e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                    records: None,
                    detail: Some(e.to_string()),
                }),
            )
        }
    }
}

pub async fn handle_data(
    Extension(store): Extension<Arc<dyn LineStore>>,
    params: Result<Query<DataParams>, QueryRejection>,
) -> Result<Json<Vec<LineResponse>>, ApiError> {
    let Query(params) = params.map_err(|rejection| bad_request(rejection.body_text()))?;
    let page = positive("pageno", params.pageno.as_deref(), 1)?;
    let page_size = positive("pagesize", params.pagesize.as_deref(), DEFAULT_PAGE_SIZE)?;
    let query = LineQuery::new(params.name.unwrap_or_default(), page, page_size);

    tracing::debug!(
        "Searching {:?} page {} size {}",
        query.name,
        query.page,
        query.page_size
    );

    match store.search(&query).await {
        Ok(records) => Ok(Json(records.into_iter().map(LineResponse::from).collect())),
        Err(StoreError::InvalidQuery(msg)) => Err(bad_request(msg)),
        Err(e) => {
            tracing::error!("Search failed: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(DetailResponse::new(format!("Internal server error: {}", e))),
            ))
        }
    }
}

/// Parses an optional query value that must be an integer of at least 1.
fn positive(field: &str, raw: Option<&str>, default: u32) -> Result<u32, ApiError> {
    let value: i64 = match raw {
        None => return Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| bad_request(format!("{} must be an integer", field)))?,
    };
    if value < 1 {
        return Err(bad_request(format!("{} must be at least 1", field)));
    }
    u32::try_from(value).map_err(|_| bad_request(format!("{} is too large", field)))
}

fn bad_request(detail: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(DetailResponse::new(detail)))
}
