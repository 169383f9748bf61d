//! Configuration module

use std::env;
use std::path::PathBuf;

use pm25_core::constants;
use pm25_core::{FallbackPolicy, ServingClock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid PORT '{0}'")]
    InvalidPort(String),

    #[error("invalid FALLBACK_POLICY: {0}")]
    InvalidPolicy(String),

    #[error("invalid SERVING_TIMEZONE: {0}")]
    InvalidTimezone(String),
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,

    /// Directory holding one bundle directory per model version
    pub model_dir: PathBuf,

    /// Model version served by this process
    pub model_version: String,

    /// Handling of defaulted features that callers do send
    pub fallback_policy: FallbackPolicy,

    /// Clock for hour/day/weekend features (utc, local or +HH:MM)
    pub serving_clock: ServingClock,

    /// Allowed CORS origin; any origin when unset
    pub cors_origin: Option<String>,

    /// Emit JSON log lines instead of human-readable ones
    pub log_json: bool,

    /// Environment (development, production)
    pub environment: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match env::var("PORT") {
            Ok(p) => p.parse().map_err(|_| ConfigError::InvalidPort(p))?,
            Err(_) => 8080,
        };

        let fallback_policy = match env::var("FALLBACK_POLICY") {
            Ok(p) => p.parse().map_err(ConfigError::InvalidPolicy)?,
            Err(_) => FallbackPolicy::default(),
        };

        let serving_clock = match env::var("SERVING_TIMEZONE") {
            Ok(tz) => tz.parse().map_err(ConfigError::InvalidTimezone)?,
            Err(_) => ServingClock::default(),
        };

        Ok(Self {
            port,
            model_dir: constants::get_model_dir(),
            model_version: constants::get_model_version(),
            fallback_policy,
            serving_clock,
            cors_origin: env::var("CORS_ORIGIN").ok().filter(|o| !o.is_empty() && o != "*"),
            log_json: env::var("LOG_FORMAT")
                .map(|f| f.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            environment: env::var("ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
