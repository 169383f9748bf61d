//! Model Module - PM2.5 regressor, persisted bundles and the registry
//!
//! A model is never used without the FeatureSpec and DefaultsTable it was
//! trained with; `ModelBundle` keeps the four parts together on disk and
//! `ModelRegistry` keeps them together in memory.

pub mod gbm;
pub mod bundle;
pub mod registry;

pub use bundle::{
    load_bundle, save_bundle, BundleManifest, LoadError, ModelBundle, SaveError, TrainingMetrics,
};
pub use gbm::{GbmError, GbmParams, GbmRegressor, GbmTree, Regressor};
pub use registry::{ModelRegistry, PredictError, TrainedModel};
