//! HTTP handlers for the node status surface

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::app_state::SharedSummary;
use crate::models::ApiResponse;
use crate::services::coordinator::CoordinatorSummary;

pub async fn root() -> &'static str {
    "Oracle Coordinator"
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<Health> {
    Json(Health {
        status: "OK",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Summary of the most recent coordinator run.
pub async fn get_status(
    State(last_summary): State<SharedSummary>,
) -> Result<Json<ApiResponse<CoordinatorSummary>>, (StatusCode, Json<ApiResponse<CoordinatorSummary>>)> {
    match last_summary.read().await.clone() {
        Some(summary) => Ok(Json(ApiResponse::ok(summary))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("No coordinator run has finished yet")),
        )),
    }
}
