//! Training Module - offline fitting of versioned PM2.5 models
//!
//! # Pipeline
//! 1. `frame.rs`: target lookup, column checks, ordering, history features,
//!    complete-case filtering
//! 2. hold-out split (chronological or seeded shuffle)
//! 3. gradient boosting fit and hold-out evaluation
//! 4. DefaultsTable from the training rows
//! 5. bundle persistence
//!
//! A run either produces a complete bundle or fails before writing anything.

pub mod frame;

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::constants::{DEFAULT_SEED, DEFAULT_TEST_FRACTION, DEFAULT_TIMESTAMP_COLUMN, TARGET_ALIASES};
use crate::logic::dataset::{Dataset, DatasetError, DatasetReader};
use crate::logic::features::{DefaultsTable, FeatureSpec, FeatureSpecError};
use crate::logic::model::{save_bundle, GbmError, GbmParams, GbmRegressor, ModelBundle, SaveError, TrainingMetrics};

pub use frame::TrainingFrame;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("PM2.5 column not found. Expected one of: {}. Available columns: {}", .aliases.join(", "), .available.join(", "))]
    TargetNotFound { aliases: Vec<String>, available: Vec<String> },

    #[error("missing required columns: {}. Available columns: {}", .missing.join(", "), .available.join(", "))]
    MissingColumns { missing: Vec<String>, available: Vec<String> },

    #[error("feature spec '{0}' needs timestamps but the dataset has no timestamp column")]
    MissingTimestamp(String),

    #[error("no usable rows among {dataset_rows} dataset rows")]
    NoUsableRows { dataset_rows: usize },

    #[error("invalid training config: {0}")]
    InvalidConfig(String),

    #[error("invalid feature spec: {0}")]
    Spec(#[from] FeatureSpecError),

    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("model error: {0}")]
    Model(#[from] GbmError),

    #[error("persistence error: {0}")]
    Save(#[from] SaveError),
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Timestamp column name, before header cleaning
    pub timestamp_column: String,
    /// Read ambiguous numeric dates day first instead of month first
    pub day_first: bool,
    /// Accepted target column names, tried in order
    pub target_aliases: Vec<String>,
    /// Fraction of usable rows held out for evaluation, in [0, 1)
    pub test_fraction: f64,
    /// Shuffle before splitting; otherwise the newest rows are held out
    pub shuffle: bool,
    pub seed: u64,
    pub params: GbmParams,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            timestamp_column: DEFAULT_TIMESTAMP_COLUMN.to_string(),
            day_first: false,
            target_aliases: TARGET_ALIASES.iter().map(|a| a.to_string()).collect(),
            test_fraction: DEFAULT_TEST_FRACTION,
            shuffle: false,
            seed: DEFAULT_SEED,
            params: GbmParams::default(),
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), TrainingError> {
        if !(0.0..1.0).contains(&self.test_fraction) {
            return Err(TrainingError::InvalidConfig(format!(
                "test_fraction must be in [0, 1), got {}",
                self.test_fraction
            )));
        }
        if self.target_aliases.is_empty() {
            return Err(TrainingError::InvalidConfig("no target column aliases".into()));
        }
        self.params.validate()?;
        Ok(())
    }
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub version: String,
    pub bundle_dir: PathBuf,
    pub layout_hash: u32,
    pub training_run_id: Uuid,
    pub metrics: TrainingMetrics,
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct TrainingPipeline {
    spec: FeatureSpec,
    config: TrainingConfig,
}

impl TrainingPipeline {
    pub fn new(spec: FeatureSpec, config: TrainingConfig) -> Result<Self, TrainingError> {
        spec.validate()?;
        config.validate()?;
        Ok(Self { spec, config })
    }

    pub fn spec(&self) -> &FeatureSpec {
        &self.spec
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Load a CSV dataset the way this pipeline expects it
    pub fn read_dataset(&self, path: &Path) -> Result<Dataset, TrainingError> {
        Ok(DatasetReader::new()
            .timestamp_column(&self.config.timestamp_column)
            .day_first(self.config.day_first)
            .read_path(path)?)
    }

    /// Usable rows of `dataset` in feature-spec order
    pub fn prepare(&self, dataset: &Dataset) -> Result<TrainingFrame, TrainingError> {
        frame::build_frame(dataset, &self.spec, &self.config.target_aliases)
    }

    /// Fit, evaluate and assemble a bundle without touching disk
    pub fn fit(&self, frame: &TrainingFrame) -> Result<ModelBundle, TrainingError> {
        let config = &self.config;
        let (train, test) = split_indices(frame.len(), config.test_fraction, config.shuffle, config.seed);
        if train.is_empty() {
            return Err(TrainingError::NoUsableRows { dataset_rows: frame.dataset_rows });
        }
        log::info!(
            "Training '{}' on {} rows, holding out {} ({} split)",
            self.spec.version(),
            train.len(),
            test.len(),
            if self.config.shuffle { "shuffled" } else { "chronological" }
        );

        let (x_train, y_train) = to_matrix(frame, &train, self.spec.feature_count());
        let regressor = GbmRegressor::fit(x_train.view(), y_train.view(), &self.config.params)?;

        let (rmse, mae) = if test.is_empty() {
            (None, None)
        } else {
            let (x_test, y_test) = to_matrix(frame, &test, self.spec.feature_count());
            let predictions = regressor.predict_batch(x_test.view());
            let (rmse, mae) = evaluate(&predictions, &y_test.to_vec());
            log::info!("Hold-out RMSE: {:.4}, MAE: {:.4}", rmse, mae);
            (Some(rmse), Some(mae))
        };

        let defaults = compute_defaults(frame, &train);
        let metrics = TrainingMetrics {
            target_column: frame.target_column.clone(),
            dataset_rows: frame.dataset_rows,
            usable_rows: frame.len(),
            train_rows: train.len(),
            test_rows: test.len(),
            rmse,
            mae,
        };

        Ok(ModelBundle::assemble(self.spec.clone(), defaults, regressor, metrics)?)
    }

    /// Full run: prepare, fit and persist under `out_dir/<version>`
    pub fn run(&self, dataset: &Dataset, out_dir: &Path) -> Result<TrainingReport, TrainingError> {
        let frame = self.prepare(dataset)?;
        let bundle = self.fit(&frame)?;
        let bundle_dir = save_bundle(&bundle, out_dir)?;

        Ok(TrainingReport {
            version: bundle.manifest.version.clone(),
            bundle_dir,
            layout_hash: bundle.manifest.layout_hash,
            training_run_id: bundle.manifest.training_run_id,
            metrics: bundle.manifest.metrics.clone(),
        })
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Row indices of the training and hold-out sets
///
/// The hold-out size is `ceil(n * test_fraction)`, capped so at least one
/// row is left to train on.
pub fn split_indices(n: usize, test_fraction: f64, shuffle: bool, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let n_test = ((n as f64 * test_fraction).ceil() as usize).min(n.saturating_sub(1));
    let mut indices: Vec<usize> = (0..n).collect();

    if shuffle {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);
        let train = indices.split_off(n_test);
        (train, indices)
    } else {
        let test = indices.split_off(n - n_test);
        (indices, test)
    }
}

fn to_matrix(frame: &TrainingFrame, rows: &[usize], n_features: usize) -> (Array2<f64>, Array1<f64>) {
    let mut x = Array2::<f64>::zeros((rows.len(), n_features));
    let mut y = Array1::<f64>::zeros(rows.len());
    for (out, &row) in rows.iter().enumerate() {
        for (col, value) in frame.features[row].iter().enumerate() {
            x[[out, col]] = *value;
        }
        y[out] = frame.targets[row];
    }
    (x, y)
}

/// (RMSE, MAE)
pub fn evaluate(predictions: &[f64], actual: &[f64]) -> (f64, f64) {
    let n = predictions.len().min(actual.len());
    if n == 0 {
        return (0.0, 0.0);
    }
    let (sq, abs) = predictions
        .iter()
        .zip(actual)
        .fold((0.0, 0.0), |(sq, abs), (p, a)| {
            let err = p - a;
            (sq + err * err, abs + err.abs())
        });
    ((sq / n as f64).sqrt(), abs / n as f64)
}

/// Mean of each statistic's source column over the training rows
fn compute_defaults(frame: &TrainingFrame, train: &[usize]) -> DefaultsTable {
    frame
        .statistic_keys
        .iter()
        .enumerate()
        .map(|(k, key)| {
            let sum: f64 = train.iter().map(|&row| frame.statistic_values[row][k]).sum();
            (key.clone(), sum / train.len() as f64)
        })
        .collect()
}
