//! HTTP handlers

pub mod health;
pub mod predict;

use crate::error::AppError;
use axum::http::Uri;

/// Unknown routes answer in the same JSON error shape as everything else
pub async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("no route for {}", uri.path()))
}
