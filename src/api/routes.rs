use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;
use super::AppState;
use crate::middleware::{make_span_with_request_id, request_id_middleware};

/// Creates the main API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", api_routes())
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
        // Must wrap the trace layer so the span sees the request id
        .layer(middleware::from_fn(request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// API routes under /api/v1
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/generation", get(handlers::get_generation))
        .route("/coinstall/recommend", post(handlers::recommend_coinstall))
        .route("/ensemble/recommend", post(handlers::recommend_ensemble))
        .route("/hybrid/recommend", post(handlers::recommend_hybrid))
        .route("/refresh", post(handlers::refresh))
}
