//! PM2.5 Inference Server
//!
//! Thin HTTP front over the feature contract and model registry.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    PM2.5 INFERENCE                       │
//! ├──────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌──────────────────┐   ┌─────────────┐  │
//! │  │  API      │──►│ InferenceService │──►│  Model      │  │
//! │  │  (Axum)   │   │ (FeatureBuilder) │   │  Registry   │  │
//! │  └───────────┘   └──────────────────┘   └──────┬──────┘  │
//! │                                                ▼         │
//! │                                  <MODEL_DIR>/<version>/  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The served bundle is loaded before the listener binds; a missing or
//! corrupt bundle stops the process.

mod config;
mod error;
mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use pm25_core::{InferenceService, ModelRegistry};
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use error::{AppError, AppResult};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    // Initialize logging (library `log` records are forwarded too)
    let default_filter = if config.is_production() {
        "pm25_server=info,pm25_core=info,tower_http=info"
    } else {
        "pm25_server=debug,pm25_core=debug,tower_http=debug"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| default_filter.into()))
        .with(config.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!config.log_json).then(tracing_subscriber::fmt::layer))
        .init();

    tracing::info!("PM2.5 inference server v{} starting...", env!("CARGO_PKG_VERSION"));
    tracing::info!("Model directory: {}", config.model_dir.display());

    // Load the served model; refuse to start without it
    let registry = Arc::new(ModelRegistry::new(&config.model_dir));
    let service = InferenceService::from_registry(&registry, &config.model_version, config.fallback_policy)
        .with_context(|| format!("loading model '{}'", config.model_version))?
        .with_clock(config.serving_clock);
    tracing::info!(
        "Serving model '{}' ({} features, fallback policy {:?}, clock {})",
        service.version(),
        service.bundle().spec.feature_count(),
        service.policy(),
        service.clock()
    );

    // Build application state
    let state = AppState {
        service: Arc::new(service),
        registry,
        config: config.clone(),
    };

    // Build router
    let app = create_router(state)?;

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("🚀 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<InferenceService>,
    pub registry: Arc<ModelRegistry>,
    pub config: config::Config,
}

/// Create the main router with all routes
fn create_router(state: AppState) -> anyhow::Result<Router> {
    let cors = match &state.config.cors_origin {
        Some(origin) => {
            let origin = HeaderValue::from_str(origin)
                .with_context(|| format!("invalid CORS_ORIGIN '{}'", origin))?;
            CorsLayer::new().allow_origin(AllowOrigin::exact(origin))
        }
        None => CorsLayer::new().allow_origin(Any),
    }
    .allow_methods(Any)
    .allow_headers(Any);

    let router = Router::new()
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::check))
        .route("/api/v1/model", get(handlers::predict::contract))
        .route("/api/v1/predict", post(handlers::predict::predict))
        .fallback(handlers::not_found)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    Ok(router)
}

// ============================================================================
// TESTS
// ============================================================================
