//! Central Configuration Constants
//!
//! Single source of truth for training and serving defaults.

use std::path::PathBuf;

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name (also the data directory name)
pub const APP_NAME: &str = "pm25";

/// Model version served when nothing else is configured
pub const DEFAULT_MODEL_VERSION: &str = "temporal-v2";

/// Accepted names for the PM2.5 target column (compared after header cleaning)
pub const TARGET_ALIASES: &[&str] = &["PM25", "PM2.5", "PM25_µgm³", "PM25_ugm3"];

/// Timestamp column of historical datasets
pub const DEFAULT_TIMESTAMP_COLUMN: &str = "Date";

/// Trailing window of the rolling-mean history features
pub const ROLLING_WINDOW: usize = 3;

/// Fraction of rows held out for evaluation
pub const DEFAULT_TEST_FRACTION: f64 = 0.2;

/// Seed for row sampling and shuffled splits
pub const DEFAULT_SEED: u64 = 42;

// ============================================
// Boosting defaults
// ============================================

pub const DEFAULT_N_ESTIMATORS: usize = 300;
pub const DEFAULT_LEARNING_RATE: f64 = 0.05;
pub const DEFAULT_MAX_DEPTH: usize = 6;
pub const DEFAULT_SUBSAMPLE: f64 = 0.8;
pub const DEFAULT_COLSAMPLE: f64 = 0.8;
pub const DEFAULT_MIN_SAMPLES_LEAF: usize = 1;

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Base directory holding one sub-directory per model version
pub fn default_model_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
        .join("models")
}

/// Model directory from `MODEL_DIR` or the platform default
pub fn get_model_dir() -> PathBuf {
    std::env::var("MODEL_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_model_dir())
}

/// Model version from `MODEL_VERSION` or the default
pub fn get_model_version() -> String {
    std::env::var("MODEL_VERSION")
        .unwrap_or_else(|_| DEFAULT_MODEL_VERSION.to_string())
}
