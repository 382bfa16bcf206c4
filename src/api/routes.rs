use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;
use super::AppState;

/// Creates the application router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", api_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// API routes under /api/v1
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/recommendations/:user_id", get(handlers::get_recommendation))
        .route(
            "/recommendations/:user_id/generate",
            get(handlers::generation_status)
                .post(handlers::trigger_generation)
                .delete(handlers::cancel_generation),
        )
        .route("/items/:item_id/similar", get(handlers::similar_items))
}
