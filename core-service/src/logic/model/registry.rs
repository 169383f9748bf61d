//! Model Registry - process-wide cache of loaded bundles
//!
//! Each version is loaded at most once; concurrent callers asking for the
//! same version wait on the same load and receive the same `Arc`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use thiserror::Error;

use super::bundle::{load_bundle, LoadError, ModelBundle};
use super::gbm::{GbmRegressor, Regressor};
use crate::logic::features::FeatureVector;

// ============================================================================
// TRAINED MODEL
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredictError {
    #[error("feature vector has {actual} values, model expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("feature vector built for layout {actual:08x}, model trained on {expected:08x}")]
    LayoutMismatch { expected: u32, actual: u32 },
}

/// A regressor tagged with the layout it was trained on
#[derive(Debug, Clone)]
pub struct TrainedModel {
    version: String,
    layout_hash: u32,
    regressor: GbmRegressor,
}

impl TrainedModel {
    pub fn new(version: &str, layout_hash: u32, regressor: GbmRegressor) -> Self {
        Self { version: version.to_string(), layout_hash, regressor }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn layout_hash(&self) -> u32 {
        self.layout_hash
    }

    pub fn expected_dimension(&self) -> usize {
        self.regressor.n_features()
    }

    pub fn regressor(&self) -> &GbmRegressor {
        &self.regressor
    }

    /// Predict one PM2.5 value
    ///
    /// Vectors of the wrong length or for another layout are rejected,
    /// never padded or truncated.
    pub fn predict(&self, vector: &FeatureVector) -> Result<f64, PredictError> {
        let expected = self.expected_dimension();
        if vector.len() != expected {
            log::error!(
                "Model '{}' received {} features, expected {}",
                self.version,
                vector.len(),
                expected
            );
            return Err(PredictError::DimensionMismatch { expected, actual: vector.len() });
        }
        if vector.layout_hash != self.layout_hash {
            log::error!(
                "Model '{}' received vector for layout {:08x}, expected {:08x}",
                self.version,
                vector.layout_hash,
                self.layout_hash
            );
            return Err(PredictError::LayoutMismatch {
                expected: self.layout_hash,
                actual: vector.layout_hash,
            });
        }
        Ok(self.regressor.predict_row(vector.as_slice()))
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

type Slot = Arc<OnceCell<Arc<ModelBundle>>>;

pub struct ModelRegistry {
    root: PathBuf,
    slots: RwLock<HashMap<String, Slot>>,
}

impl ModelRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), slots: RwLock::new(HashMap::new()) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn slot(&self, version: &str) -> Slot {
        if let Some(slot) = self.slots.read().get(version) {
            return slot.clone();
        }
        self.slots.write().entry(version.to_string()).or_default().clone()
    }

    /// Load `version` from disk, or return the already loaded bundle
    ///
    /// A failed load leaves nothing cached, so a later call retries.
    pub fn load(&self, version: &str) -> Result<Arc<ModelBundle>, LoadError> {
        let slot = self.slot(version);
        slot.get_or_try_init(|| {
            log::info!("Loading model '{}' from {}", version, self.root.display());
            load_bundle(&self.root, version).map(Arc::new)
        })
        .map(Arc::clone)
    }

    /// Already loaded bundle, without touching disk
    pub fn get(&self, version: &str) -> Option<Arc<ModelBundle>> {
        self.slots.read().get(version).and_then(|slot| slot.get().cloned())
    }

    /// Register an in-memory bundle; the first bundle for a version wins
    pub fn register(&self, bundle: ModelBundle) -> Result<Arc<ModelBundle>, LoadError> {
        let version = bundle.version().to_string();
        bundle.check_consistency().map_err(|reason| LoadError::CorruptArtifact {
            version: version.clone(),
            reason,
        })?;
        let slot = self.slot(&version);
        Ok(slot.get_or_init(|| Arc::new(bundle)).clone())
    }

    pub fn loaded_versions(&self) -> Vec<String> {
        let mut versions: Vec<String> = self
            .slots
            .read()
            .iter()
            .filter(|(_, slot)| slot.get().is_some())
            .map(|(version, _)| version.clone())
            .collect();
        versions.sort();
        versions
    }

    pub fn predict(&self, model: &TrainedModel, vector: &FeatureVector) -> Result<f64, PredictError> {
        model.predict(vector)
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("root", &self.root)
            .field("loaded", &self.loaded_versions())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
