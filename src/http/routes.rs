use super::handlers;
use super::state::AppState;
use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Meeting queries
        .route("/meetings", get(handlers::list_meetings))
        .route(
            "/meetings/by-code/:code",
            get(handlers::get_meeting_by_code),
        )
        .route(
            "/meetings/:session_id/status",
            get(handlers::get_meeting_status),
        )
        .route(
            "/meetings/:session_id/snapshot",
            get(handlers::get_meeting_snapshot),
        )
        // Read-only API, callable from browser dashboards
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
