//! The /metrics Basic Auth guard, exercised through the router. Serialized
//! because the expected credentials come from the process environment.

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    middleware,
    routing::get,
    Router,
};
use base64::{engine::general_purpose, Engine as _};
use serial_test::serial;
use tower::ServiceExt;

use coursepilot_api::handlers;
use coursepilot_api::metrics::record_generation_job;

fn metrics_app() -> Router {
    Router::new().route(
        "/metrics",
        get(handlers::metrics_handler)
            .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
    )
}

fn basic_auth(credentials: &str) -> String {
    format!("Basic {}", general_purpose::STANDARD.encode(credentials))
}

#[tokio::test]
#[serial]
async fn metrics_requires_credentials() {
    std::env::set_var("METRICS_AUTH", "ops:sekret");

    let response = metrics_app()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[serial]
async fn metrics_rejects_wrong_credentials() {
    std::env::set_var("METRICS_AUTH", "ops:sekret");

    let response = metrics_app()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .header(header::AUTHORIZATION, basic_auth("ops:wrong"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[serial]
async fn metrics_serves_prometheus_text_with_valid_credentials() {
    std::env::set_var("METRICS_AUTH", "ops:sekret");
    // Touch a counter so the family is present in the rendered output.
    record_generation_job("modules", "completed");

    let response = metrics_app()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .header(header::AUTHORIZATION, basic_auth("ops:sekret"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("generation_jobs_total"));
}
