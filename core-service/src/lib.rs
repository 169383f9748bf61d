//! PM2.5 Core - feature contract, training pipeline and model registry
//!
//! # Architecture
//!
//! ```text
//!  historical CSV ──► TrainingPipeline ──► bundle/<version>/
//!                                          ├─ manifest.json
//!                                          ├─ feature_spec.json
//!                                          ├─ defaults.json
//!                                          └─ model.json
//!                                               │
//!  ObservationRequest ──► FeatureBuilder ──► ModelRegistry ──► predicted PM2.5
//!                         (InferenceService)
//! ```

pub mod constants;
pub mod logic;

pub use logic::features::{
    DefaultsTable, FallbackPolicy, FeatureSpec, FeatureSpecError, FeatureVector,
    ObservationRequest, BuildError,
};
pub use logic::inference::{
    InferenceError, InferenceService, ModelContract, PredictionResponse, ServiceStats,
    ServingClock,
};
pub use logic::model::{LoadError, ModelBundle, ModelRegistry, PredictError, TrainedModel};
pub use logic::training::{TrainingConfig, TrainingError, TrainingPipeline, TrainingReport};
