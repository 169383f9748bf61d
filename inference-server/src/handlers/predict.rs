//! Prediction handlers

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use pm25_core::{ModelContract, ObservationRequest, PredictionResponse};

use crate::{AppResult, AppState};

/// POST /api/v1/predict
pub async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<ObservationRequest>, JsonRejection>,
) -> AppResult<Json<PredictionResponse>> {
    let Json(request) = payload?;
    tracing::debug!("Prediction request with {} fields", request.len());

    let response = state.service.predict_now(&request)?;
    tracing::info!(
        model_version = %response.model_version,
        predicted_pm25 = response.predicted_pm25,
        "Prediction served"
    );
    Ok(Json(response))
}

/// GET /api/v1/model
pub async fn contract(State(state): State<AppState>) -> Json<ModelContract> {
    Json(state.service.contract())
}
