//! Health check handlers

use axum::{extract::State, Json};
use pm25_core::ServiceStats;
use serde::Serialize;
use serde_json::{json, Value};

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    timestamp: i64,
    model_version: String,
    loaded_models: Vec<String>,
    stats: ServiceStats,
}

/// GET /
pub async fn root() -> Json<Value> {
    Json(json!({ "message": "success" }))
}

pub async fn check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().timestamp(),
        model_version: state.service.version().to_string(),
        loaded_models: state.registry.loaded_versions(),
        stats: state.service.stats(),
    })
}
