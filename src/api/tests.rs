//! Read API Tests
//!
//! Drives the full router (rate limiting included) with `tower::ServiceExt::oneshot`.

#[cfg(test)]
mod tests {
    use crate::api::build_router;
    use crate::api::types::LineResponse;
    use crate::ratelimit::{MemoryCounterStore, WindowRateLimiter};
    use crate::storage::{LineStore, MemoryLineStore};
    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn app_with(lines: &[&str], limit: u64) -> (Router, Arc<MemoryLineStore>) {
        let store = Arc::new(MemoryLineStore::new());
        for line in lines {
            store.insert(line).await.unwrap();
        }
        let limiter = Arc::new(WindowRateLimiter::new(
            Arc::new(MemoryCounterStore::new()),
            limit,
            Duration::from_secs(60),
        ));
        (build_router(store.clone(), limiter), store)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .extension(ConnectInfo(SocketAddr::from(([192, 168, 1, 20], 51000))))
            .body(Body::empty())
            .unwrap()
    }

    async fn read_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    // ============================================================
    // HEALTH
    // ============================================================

    #[tokio::test]
    async fn test_health_reports_healthy() {
        let (app, _) = app_with(&[], 5).await;

        let response = app.oneshot(get("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            read_json(response).await,
            serde_json::json!({"status": "healthy", "records": 0})
        );
    }

    #[tokio::test]
    async fn test_health_reports_stored_line_count() {
        let (app, _) = app_with(&["first", "second", "third"], 5).await;

        let response = app.oneshot(get("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await["records"], 3);
    }

    #[tokio::test]
    async fn test_health_reports_store_outage() {
        let (app, store) = app_with(&[], 5).await;
        store.set_available(false);

        let response = app.oneshot(get("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = read_json(response).await;
        assert_eq!(body["status"], "unhealthy");
        assert!(body.get("records").is_none());
    }

    // ============================================================
    // DATA
    // ============================================================

    #[tokio::test]
    async fn test_data_defaults_to_first_page() {
        // ARRANGE
        let lines: Vec<String> = (1..=12).map(|i| format!("row {}", i)).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let (app, _) = app_with(&refs, 5).await;

        // ACT
        let response = app.oneshot(get("/data")).await.unwrap();

        // ASSERT
        assert_eq!(response.status(), StatusCode::OK);
        let rows: Vec<LineResponse> = serde_json::from_value(read_json(response).await).unwrap();
        assert_eq!(rows.len(), 10);
        assert_eq!(
            rows[0],
            LineResponse {
                id: 1,
                line_data: "row 1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_data_filters_and_paginates() {
        let (app, _) = app_with(&["error: disk", "ok", "error: net", "error: cpu"], 5).await;

        let response = app
            .oneshot(get("/data?pageno=2&pagesize=2&name=error"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body, serde_json::json!([{"id": 4, "line_data": "error: cpu"}]));
    }

    #[tokio::test]
    async fn test_data_rejects_page_zero() {
        let (app, _) = app_with(&["x"], 5).await;

        let response = app.oneshot(get("/data?pageno=0")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(read_json(response).await["detail"], "pageno must be at least 1");
    }

    #[tokio::test]
    async fn test_data_rejects_negative_page_size() {
        let (app, _) = app_with(&["x"], 5).await;

        let response = app.oneshot(get("/data?pagesize=-3")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_data_rejects_non_integer_page_with_detail() {
        let (app, _) = app_with(&["x"], 5).await;

        let response = app.oneshot(get("/data?pageno=two")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(read_json(response).await["detail"], "pageno must be an integer");
    }

    #[tokio::test]
    async fn test_data_store_failure_is_500() {
        let (app, store) = app_with(&["x"], 5).await;
        store.set_available(false);

        let response = app.oneshot(get("/data")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = read_json(response).await;
        assert!(body["detail"]
            .as_str()
            .unwrap()
            .starts_with("Internal server error: "));
    }

    // ============================================================
    // RATE LIMIT
    // ============================================================

    #[tokio::test]
    async fn test_sixth_request_gets_429() {
        let (app, _) = app_with(&["x"], 5).await;

        for uri in ["/health", "/data", "/health", "/data", "/health"] {
            let response = app.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app.clone().oneshot(get("/data")).await.unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            read_json(response).await["detail"],
            "Too many requests. Please try again later."
        );
    }
}
