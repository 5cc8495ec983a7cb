use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

/// Course PDFs can be large; cap the multipart body at 50 MiB.
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

pub fn create_router(app_state: std::sync::Arc<services::AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any); // TODO: restrict to specific origins in production

    Router::new()
        // Public endpoints (no auth required)
        .route("/health", get(handlers::health_check))
        // Metrics endpoint with Basic Auth protection
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        // Protected endpoints (require JWT)
        .nest(
            "/api/courses",
            course_routes().layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::auth::auth_middleware,
            )),
        )
        .nest(
            "/api/tests",
            test_routes().layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::auth::auth_middleware,
            )),
        )
        .nest(
            "/api/chat",
            chat_routes().layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::auth::auth_middleware,
            )),
        )
        .nest(
            "/api/leaderboard",
            leaderboard_routes().layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::auth::auth_middleware,
            )),
        )
        .with_state(app_state)
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

fn course_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        .route(
            "/",
            post(handlers::courses::create_course).get(handlers::courses::list_courses),
        )
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .route(
            "/{id}",
            get(handlers::courses::get_course).delete(handlers::courses::delete_course),
        )
        .route("/{id}/pdfs", get(handlers::courses::list_documents))
        .route("/{id}/retry-modules", post(handlers::courses::retry_modules))
        .route(
            "/{id}/modules/{module_index}/lesson",
            get(handlers::courses::get_lesson),
        )
        .route(
            "/{id}/modules/{module_index}/retry-video",
            post(handlers::courses::retry_video),
        )
}

fn test_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        .route(
            "/{course_id}/questions",
            get(handlers::tests::course_questions),
        )
        .route(
            "/{course_id}/modules/{module_index}/questions",
            get(handlers::tests::module_questions),
        )
        .route(
            "/{course_id}/submit",
            post(handlers::tests::submit_course_test),
        )
        .route(
            "/{course_id}/modules/{module_index}/submit",
            post(handlers::tests::submit_module_test),
        )
        .route("/{course_id}/status", get(handlers::tests::test_status))
}

fn chat_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new().route("/stream", post(handlers::chat::chat_stream))
}

fn leaderboard_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new().route("/", get(handlers::leaderboard::get_leaderboard))
}
