//! Route definitions for the node status surface

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::handlers::{get_status, health_check, root};

pub fn status_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/status", get(get_status))
}

pub fn router(state: AppState) -> Router {
    status_routes()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
