//! Inference Service - request in, PM2.5 prediction out
//!
//! Composes the FeatureBuilder and a loaded model bundle. Stateless per
//! request apart from latency counters; safe to share behind an `Arc`.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logic::features::{BuildError, FallbackPolicy, FeatureBuilder, ObservationRequest};
use crate::logic::model::{LoadError, ModelBundle, ModelRegistry, PredictError, TrainingMetrics};

// ============================================================================
// DATA STRUCTURES
// ============================================================================

pub const STATUS_SUCCESS: &str = "success";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub predicted_pm25: f64,
    pub status: String,
    pub model_version: String,
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Predict(#[from] PredictError),
}

/// What callers need to know to talk to the loaded model
#[derive(Debug, Clone, Serialize)]
pub struct ModelContract {
    pub model_version: String,
    pub layout_hash: String,
    pub feature_order: Vec<String>,
    /// Field names accepted in a request, aliases included
    pub caller_fields: Vec<String>,
    pub derived_features: Vec<String>,
    pub defaulted_features: Vec<String>,
    pub fallback_policy: FallbackPolicy,
    /// Clock the derived time features are read from
    pub serving_clock: String,
    pub trained_at: DateTime<Utc>,
    pub metrics: TrainingMetrics,
}

/// Wall clock the derived time features are read from
///
/// Training derives hour/day/weekend from the dataset's own timestamps, so
/// this should match the stations' local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServingClock {
    #[default]
    Utc,
    /// Timezone of the host
    Local,
    Fixed(FixedOffset),
}

impl ServingClock {
    /// Wall-clock time of `instant` on this clock
    pub fn wall_clock(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        match self {
            ServingClock::Utc => instant.naive_utc(),
            ServingClock::Local => instant.with_timezone(&Local).naive_local(),
            ServingClock::Fixed(offset) => instant.with_timezone(offset).naive_local(),
        }
    }

    pub fn now(&self) -> NaiveDateTime {
        self.wall_clock(Utc::now())
    }
}

impl FromStr for ServingClock {
    type Err = String;

    /// `utc`, `local`, or a fixed offset such as `+05:30`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "utc" | "z" => Ok(ServingClock::Utc),
            "local" => Ok(ServingClock::Local),
            _ => trimmed
                .parse::<FixedOffset>()
                .map(ServingClock::Fixed)
                .map_err(|_| format!("unknown timezone '{}' (expected utc, local or +HH:MM)", trimmed)),
        }
    }
}

impl fmt::Display for ServingClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServingClock::Utc => write!(f, "utc"),
            ServingClock::Local => write!(f, "local"),
            ServingClock::Fixed(offset) => write!(f, "{}", offset),
        }
    }
}

/// Latency and outcome counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    pub predictions: u64,
    pub failures: u64,
    pub avg_latency_ms: f64,
}

// ============================================================================
// SERVICE
// ============================================================================

pub struct InferenceService {
    bundle: Arc<ModelBundle>,
    policy: FallbackPolicy,
    clock: ServingClock,
    latency_sum_us: AtomicU64,
    predictions: AtomicU64,
    failures: AtomicU64,
}

impl InferenceService {
    pub fn new(bundle: Arc<ModelBundle>, policy: FallbackPolicy) -> Self {
        Self {
            bundle,
            policy,
            clock: ServingClock::default(),
            latency_sum_us: AtomicU64::new(0),
            predictions: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Load `version` through the registry and serve it
    pub fn from_registry(
        registry: &ModelRegistry,
        version: &str,
        policy: FallbackPolicy,
    ) -> Result<Self, LoadError> {
        let bundle = registry.load(version)?;
        Ok(Self::new(bundle, policy))
    }

    pub fn with_clock(mut self, clock: ServingClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn version(&self) -> &str {
        self.bundle.version()
    }

    pub fn bundle(&self) -> &Arc<ModelBundle> {
        &self.bundle
    }

    pub fn policy(&self) -> FallbackPolicy {
        self.policy
    }

    pub fn clock(&self) -> ServingClock {
        self.clock
    }

    /// Predict for an observation made at `now`
    pub fn predict(
        &self,
        request: &ObservationRequest,
        now: &NaiveDateTime,
    ) -> Result<PredictionResponse, InferenceError> {
        let start = Instant::now();
        let result = self.predict_inner(request, now);

        match &result {
            Ok(_) => {
                let elapsed = start.elapsed().as_micros() as u64;
                self.latency_sum_us.fetch_add(elapsed, Ordering::Relaxed);
                self.predictions.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("Rejected prediction request for '{}': {}", self.version(), e);
            }
        }
        result
    }

    /// Predict for an observation made at `instant`, read on the serving clock
    pub fn predict_at(
        &self,
        request: &ObservationRequest,
        instant: DateTime<Utc>,
    ) -> Result<PredictionResponse, InferenceError> {
        self.predict(request, &self.clock.wall_clock(instant))
    }

    /// Predict using the current time for derived features
    pub fn predict_now(&self, request: &ObservationRequest) -> Result<PredictionResponse, InferenceError> {
        self.predict_at(request, Utc::now())
    }

    fn predict_inner(
        &self,
        request: &ObservationRequest,
        now: &NaiveDateTime,
    ) -> Result<PredictionResponse, InferenceError> {
        let bundle = &self.bundle;
        let vector = FeatureBuilder::new(&bundle.spec, &bundle.defaults)
            .with_policy(self.policy)
            .build(request, now)?;
        log::debug!("Feature vector: {}", vector.to_log_entry(&bundle.spec));

        let predicted_pm25 = bundle.model.predict(&vector)?;
        Ok(PredictionResponse {
            predicted_pm25,
            status: STATUS_SUCCESS.to_string(),
            model_version: bundle.version().to_string(),
        })
    }

    pub fn contract(&self) -> ModelContract {
        let spec = &self.bundle.spec;
        let manifest = &self.bundle.manifest;
        ModelContract {
            model_version: spec.version().to_string(),
            layout_hash: format!("{:08x}", spec.layout_hash()),
            feature_order: spec.feature_order().to_vec(),
            caller_fields: spec.caller_fields(),
            derived_features: spec.derived().keys().cloned().collect(),
            defaulted_features: spec.defaulted().keys().cloned().collect(),
            fallback_policy: self.policy,
            serving_clock: self.clock.to_string(),
            trained_at: manifest.created_at,
            metrics: manifest.metrics.clone(),
        }
    }

    pub fn stats(&self) -> ServiceStats {
        let predictions = self.predictions.load(Ordering::Relaxed);
        let sum = self.latency_sum_us.load(Ordering::Relaxed);
        let avg = if predictions > 0 { (sum as f64 / predictions as f64) / 1000.0 } else { 0.0 };
        ServiceStats {
            predictions,
            failures: self.failures.load(Ordering::Relaxed),
            avg_latency_ms: avg,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::features::{presets, DefaultsTable};
    use crate::logic::model::{GbmRegressor, GbmTree};
    use chrono::NaiveDate;

    fn saturday_afternoon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 6).unwrap().and_hms_opt(14, 5, 0).unwrap()
    }

    /// Temporal model: is_weekend (index 13) adds 10, PM25_1hr_ago (index 14) > 20 adds 5
    fn temporal_service(policy: FallbackPolicy) -> InferenceService {
        let spec = presets::temporal_v2().unwrap();
        assert_eq!(spec.feature_index("is_weekend"), Some(13));
        assert_eq!(spec.feature_index("PM25_1hr_ago"), Some(14));

        let weekend = GbmTree::from_arrays(&[13, -1, -1], &[0.5, 0.0, 0.0], &[1, -1, -1], &[2, -1, -1], &[0.0, 0.0, 10.0]).unwrap();
        let lag = GbmTree::from_arrays(&[14, -1, -1], &[20.0, 0.0, 0.0], &[1, -1, -1], &[2, -1, -1], &[0.0, 0.0, 5.0]).unwrap();
        let regressor = GbmRegressor::new(vec![weekend, lag], 1.0, 30.0, spec.feature_count()).unwrap();

        let mut defaults = DefaultsTable::new();
        defaults.insert("SO2_ppb", 10.0);
        defaults.insert("CO_ppm", 0.4);
        defaults.insert("O3_ppb", 30.0);
        defaults.insert("PM25", 15.0);

        let registry = ModelRegistry::new("/nonexistent");
        let bundle = registry
            .register(ModelBundle::assemble(spec, defaults, regressor, TrainingMetrics::default()).unwrap())
            .unwrap();
        InferenceService::new(bundle, policy)
    }

    fn request() -> ObservationRequest {
        ObservationRequest::new()
            .with("AQI", 80.0)
            .with("PM10_µgm3", 42.0)
            .with("NO2_ppb", 18.0)
            .with("Temperature", 21.5)
            .with("Humidity", 55.0)
            .with("Wind_Speed_ms", 3.2)
    }

    #[test]
    fn test_predict() {
        let service = temporal_service(FallbackPolicy::AlwaysDefault);
        let response = service.predict(&request(), &saturday_afternoon()).unwrap();
        assert_eq!(
            response,
            PredictionResponse {
                predicted_pm25: 40.0,
                status: "success".into(),
                model_version: "temporal-v2".into(),
            }
        );

        let monday = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap().and_hms_opt(9, 0, 0).unwrap();
        assert_eq!(service.predict(&request(), &monday).unwrap().predicted_pm25, 30.0);
    }

    #[test]
    fn test_policy_controls_lag_values() {
        let with_lag = request().with("PM25_1hr_ago", 90.0);

        let strict = temporal_service(FallbackPolicy::AlwaysDefault);
        assert_eq!(strict.predict(&with_lag, &saturday_afternoon()).unwrap().predicted_pm25, 40.0);

        let lenient = temporal_service(FallbackPolicy::PreferSupplied);
        assert_eq!(lenient.predict(&with_lag, &saturday_afternoon()).unwrap().predicted_pm25, 45.0);
    }

    #[test]
    fn test_build_errors_surface() {
        let service = temporal_service(FallbackPolicy::AlwaysDefault);
        let incomplete = ObservationRequest::new().with("AQI", 80.0);

        match service.predict(&incomplete, &saturday_afternoon()) {
            Err(InferenceError::Build(BuildError::MissingFeature(names))) => {
                assert_eq!(names.len(), 5);
                assert!(names.contains(&"Wind_Speed_ms".to_string()));
            }
            other => panic!("expected MissingFeature, got {:?}", other),
        }

        let stats = service.stats();
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.predictions, 0);
    }

    #[test]
    fn test_contract() {
        let service = temporal_service(FallbackPolicy::AlwaysDefault);
        let contract = service.contract();

        assert_eq!(contract.model_version, "temporal-v2");
        assert_eq!(contract.feature_order.len(), 17);
        assert!(contract.caller_fields.contains(&"Temperature".to_string()));
        assert!(contract.caller_fields.contains(&"Temperature_C".to_string()));
        assert!(!contract.caller_fields.contains(&"hour".to_string()));
        assert_eq!(contract.defaulted_features.len(), 6);
    }

    #[test]
    fn test_serving_clock_parse() {
        assert_eq!("UTC".parse::<ServingClock>(), Ok(ServingClock::Utc));
        assert_eq!("local".parse::<ServingClock>(), Ok(ServingClock::Local));
        let ist = FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap();
        assert_eq!("+05:30".parse::<ServingClock>(), Ok(ServingClock::Fixed(ist)));
        assert!("Mars/Olympus".parse::<ServingClock>().is_err());
    }

    #[test]
    fn test_derived_features_follow_serving_clock() {
        // Friday 22:00 UTC is already Saturday 03:30 at +05:30
        let instant = NaiveDate::from_ymd_opt(2024, 1, 5)
            .unwrap()
            .and_hms_opt(22, 0, 0)
            .unwrap()
            .and_utc();

        let utc = temporal_service(FallbackPolicy::AlwaysDefault);
        assert_eq!(utc.predict_at(&request(), instant).unwrap().predicted_pm25, 30.0);

        let ist = FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap();
        let local = temporal_service(FallbackPolicy::AlwaysDefault).with_clock(ServingClock::Fixed(ist));
        assert_eq!(local.predict_at(&request(), instant).unwrap().predicted_pm25, 40.0);
        assert_eq!(local.contract().serving_clock, "+05:30");
    }

    #[test]
    fn test_from_registry_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path());
        assert!(matches!(
            InferenceService::from_registry(&registry, "temporal-v2", FallbackPolicy::default()),
            Err(LoadError::NotFound { .. })
        ));
    }
}
