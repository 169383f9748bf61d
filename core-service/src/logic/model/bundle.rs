//! Model Bundle - persisted {manifest, FeatureSpec, DefaultsTable, model}
//!
//! # Layout
//! ```text
//! <root>/<version>/
//!   manifest.json       version, layout hash, model checksum, metrics
//!   feature_spec.json   FeatureSpec
//!   defaults.json       DefaultsTable
//!   model.json          GbmRegressor
//! ```
//!
//! The four files are only ever written together (staging dir + rename)
//! and only ever accepted together: loading rejects a bundle whose parts
//! disagree with each other.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use super::gbm::GbmRegressor;
use super::registry::TrainedModel;
use crate::logic::features::{DefaultsTable, FeatureSpec};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const SPEC_FILE: &str = "feature_spec.json";
pub const DEFAULTS_FILE: &str = "defaults.json";
pub const MODEL_FILE: &str = "model.json";

/// Bundle format written by this build
pub const BUNDLE_FORMAT: u32 = 1;

pub const MODEL_TYPE_GBM: &str = "gbm";

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("model version '{version}' not found at {}", .path.display())]
    NotFound { version: String, path: PathBuf },

    #[error("model bundle '{version}' is corrupt: {reason}")]
    CorruptArtifact { version: String, reason: String },
}

impl LoadError {
    fn corrupt(version: &str, reason: impl Into<String>) -> Self {
        LoadError::CorruptArtifact { version: version.to_string(), reason: reason.into() }
    }
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("refusing to save inconsistent bundle: {0}")]
    Inconsistent(String),
}

// ============================================================================
// MANIFEST
// ============================================================================

/// Hold-out evaluation and row accounting of one training run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub target_column: String,
    pub dataset_rows: usize,
    pub usable_rows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub rmse: Option<f64>,
    pub mae: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub format: u32,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub training_run_id: Uuid,
    pub layout_hash: u32,
    pub feature_count: usize,
    pub model_type: String,
    /// Hex SHA-256 of `model.json`
    pub model_sha256: String,
    pub metrics: TrainingMetrics,
}

// ============================================================================
// BUNDLE
// ============================================================================

/// One model version with everything needed to serve it
#[derive(Debug, Clone)]
pub struct ModelBundle {
    pub manifest: BundleManifest,
    pub spec: FeatureSpec,
    pub defaults: DefaultsTable,
    pub model: TrainedModel,
}

impl ModelBundle {
    /// Assemble a freshly trained bundle
    pub fn assemble(
        spec: FeatureSpec,
        defaults: DefaultsTable,
        regressor: GbmRegressor,
        metrics: TrainingMetrics,
    ) -> Result<Self, SaveError> {
        let model_bytes = serde_json::to_vec(&regressor)?;
        let manifest = BundleManifest {
            format: BUNDLE_FORMAT,
            version: spec.version().to_string(),
            created_at: Utc::now(),
            training_run_id: Uuid::new_v4(),
            layout_hash: spec.layout_hash(),
            feature_count: spec.feature_count(),
            model_type: MODEL_TYPE_GBM.to_string(),
            model_sha256: sha256_hex(&model_bytes),
            metrics,
        };
        let model = TrainedModel::new(spec.version(), spec.layout_hash(), regressor);
        let bundle = Self { manifest, spec, defaults, model };
        bundle.check_consistency().map_err(SaveError::Inconsistent)?;
        Ok(bundle)
    }

    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    /// Cross-check the four parts
    pub fn check_consistency(&self) -> Result<(), String> {
        let manifest = &self.manifest;
        let spec = &self.spec;

        if manifest.format != BUNDLE_FORMAT {
            return Err(format!("unsupported bundle format {}", manifest.format));
        }
        if manifest.model_type != MODEL_TYPE_GBM {
            return Err(format!("unsupported model type '{}'", manifest.model_type));
        }
        spec.validate().map_err(|e| format!("invalid feature spec: {}", e))?;

        if spec.version() != manifest.version {
            return Err(format!(
                "feature spec version '{}' does not match manifest version '{}'",
                spec.version(),
                manifest.version
            ));
        }
        if spec.layout_hash() != manifest.layout_hash {
            return Err(format!(
                "layout hash mismatch: manifest {:08x}, feature spec {:08x}",
                manifest.layout_hash,
                spec.layout_hash()
            ));
        }
        if spec.feature_count() != manifest.feature_count {
            return Err(format!(
                "feature count mismatch: manifest {}, feature spec {}",
                manifest.feature_count,
                spec.feature_count()
            ));
        }

        let mut missing: Vec<&str> = spec
            .defaulted()
            .values()
            .map(|d| d.statistic.as_str())
            .filter(|key| !self.defaults.contains(key))
            .collect();
        missing.sort_unstable();
        missing.dedup();
        if !missing.is_empty() {
            return Err(format!("defaults table lacks statistics {:?}", missing));
        }
        if let Some((key, _)) = self.defaults.iter().find(|(_, v)| !v.is_finite()) {
            return Err(format!("default '{}' is not finite", key));
        }

        self.model.regressor().validate().map_err(|e| e.to_string())?;
        if self.model.expected_dimension() != spec.feature_count() {
            return Err(format!(
                "model expects {} features, feature spec declares {}",
                self.model.expected_dimension(),
                spec.feature_count()
            ));
        }
        if self.model.version() != manifest.version || self.model.layout_hash() != manifest.layout_hash {
            return Err("model is tagged for a different layout".into());
        }
        Ok(())
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Version names become directory names
pub fn validate_version_name(version: &str) -> Result<(), String> {
    let valid = !version.is_empty()
        && version != "."
        && version != ".."
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(format!("invalid model version name '{}'", version))
    }
}

// ============================================================================
// STORAGE
// ============================================================================

/// Directory of one version under `root`
pub fn bundle_dir(root: &Path, version: &str) -> PathBuf {
    root.join(version)
}

/// Save a bundle as one unit, replacing an older bundle of the same version
pub fn save_bundle(bundle: &ModelBundle, root: &Path) -> Result<PathBuf, SaveError> {
    validate_version_name(bundle.version()).map_err(SaveError::Inconsistent)?;
    bundle.check_consistency().map_err(SaveError::Inconsistent)?;

    fs::create_dir_all(root)?;
    let final_dir = bundle_dir(root, bundle.version());
    let staging = root.join(format!(".{}.staging-{}", bundle.version(), Uuid::new_v4()));
    fs::create_dir_all(&staging)?;

    let model_bytes = serde_json::to_vec(bundle.model.regressor())?;
    if sha256_hex(&model_bytes) != bundle.manifest.model_sha256 {
        let _ = fs::remove_dir_all(&staging);
        return Err(SaveError::Inconsistent("model checksum does not match manifest".into()));
    }

    let write_all = || -> Result<(), SaveError> {
        fs::write(staging.join(MODEL_FILE), &model_bytes)?;
        fs::write(staging.join(SPEC_FILE), serde_json::to_vec_pretty(&bundle.spec)?)?;
        fs::write(staging.join(DEFAULTS_FILE), serde_json::to_vec_pretty(&bundle.defaults)?)?;
        fs::write(staging.join(MANIFEST_FILE), serde_json::to_vec_pretty(&bundle.manifest)?)?;
        Ok(())
    };
    if let Err(e) = write_all() {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }

    if let Err(e) = swap_into_place(&staging, &final_dir) {
        let _ = fs::remove_dir_all(&staging);
        return Err(e.into());
    }

    log::info!(
        "Saved model bundle '{}' (layout {:08x}, {} features) to {}",
        bundle.version(),
        bundle.manifest.layout_hash,
        bundle.manifest.feature_count,
        final_dir.display()
    );
    Ok(final_dir)
}

/// Move `staging` to `final_dir`, keeping any previous bundle until the move succeeds
fn swap_into_place(staging: &Path, final_dir: &Path) -> std::io::Result<()> {
    if !final_dir.exists() {
        return fs::rename(staging, final_dir);
    }

    log::warn!("Replacing existing bundle at {}", final_dir.display());
    let name = final_dir.file_name().and_then(|n| n.to_str()).unwrap_or("bundle");
    let backup = final_dir.with_file_name(format!(".{}.previous-{}", name, Uuid::new_v4()));
    fs::rename(final_dir, &backup)?;

    if let Err(e) = fs::rename(staging, final_dir) {
        if let Err(restore) = fs::rename(&backup, final_dir) {
            log::error!(
                "Could not restore previous bundle from {}: {}",
                backup.display(),
                restore
            );
        }
        return Err(e);
    }

    if let Err(e) = fs::remove_dir_all(&backup) {
        log::warn!("Could not remove previous bundle {}: {}", backup.display(), e);
    }
    Ok(())
}

/// Load and cross-validate a bundle
pub fn load_bundle(root: &Path, version: &str) -> Result<ModelBundle, LoadError> {
    let dir = bundle_dir(root, version);
    if validate_version_name(version).is_err() || !dir.is_dir() {
        return Err(LoadError::NotFound { version: version.to_string(), path: dir });
    }

    let read = |file: &str| -> Result<Vec<u8>, LoadError> {
        fs::read(dir.join(file)).map_err(|e| LoadError::corrupt(version, format!("{}: {}", file, e)))
    };

    let manifest: BundleManifest = serde_json::from_slice(&read(MANIFEST_FILE)?)
        .map_err(|e| LoadError::corrupt(version, format!("{}: {}", MANIFEST_FILE, e)))?;
    let spec: FeatureSpec = serde_json::from_slice(&read(SPEC_FILE)?)
        .map_err(|e| LoadError::corrupt(version, format!("{}: {}", SPEC_FILE, e)))?;
    let defaults: DefaultsTable = serde_json::from_slice(&read(DEFAULTS_FILE)?)
        .map_err(|e| LoadError::corrupt(version, format!("{}: {}", DEFAULTS_FILE, e)))?;

    let model_bytes = read(MODEL_FILE)?;
    let actual = sha256_hex(&model_bytes);
    if actual != manifest.model_sha256 {
        return Err(LoadError::corrupt(
            version,
            format!("model checksum mismatch: expected {}, got {}", manifest.model_sha256, actual),
        ));
    }
    let regressor: GbmRegressor = serde_json::from_slice(&model_bytes)
        .map_err(|e| LoadError::corrupt(version, format!("{}: {}", MODEL_FILE, e)))?;

    if manifest.version != version {
        return Err(LoadError::corrupt(
            version,
            format!("directory holds version '{}'", manifest.version),
        ));
    }

    let model = TrainedModel::new(&manifest.version, manifest.layout_hash, regressor);
    let bundle = ModelBundle { manifest, spec, defaults, model };
    bundle.check_consistency().map_err(|reason| LoadError::corrupt(version, reason))?;

    log::info!(
        "Loaded model bundle '{}' (layout {:08x}, {} trees, run {})",
        version,
        bundle.manifest.layout_hash,
        bundle.model.regressor().n_estimators(),
        bundle.manifest.training_run_id
    );
    Ok(bundle)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::features::presets;
    use crate::logic::model::gbm::GbmTree;

    fn stump(n_features: usize) -> GbmRegressor {
        let tree = GbmTree::from_arrays(
            &[0, -1, -1],
            &[50.0, 0.0, 0.0],
            &[1, -1, -1],
            &[2, -1, -1],
            &[0.0, -5.0, 5.0],
        )
        .unwrap();
        GbmRegressor::new(vec![tree], 1.0, 20.0, n_features).unwrap()
    }

    fn temporal_bundle() -> ModelBundle {
        let spec = presets::temporal_v2().unwrap();
        let mut defaults = DefaultsTable::new();
        defaults.insert("SO2_ppb", 10.123456789012345);
        defaults.insert("CO_ppm", 0.1 + 0.2);
        defaults.insert("O3_ppb", 30.0);
        defaults.insert("PM25", 15.000000000000002);
        let n = spec.feature_count();
        ModelBundle::assemble(spec, defaults, stump(n), TrainingMetrics::default()).unwrap()
    }

    #[test]
    fn test_save_load_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let original = temporal_bundle();

        let path = save_bundle(&original, dir.path()).unwrap();
        assert_eq!(path, dir.path().join("temporal-v2"));

        let loaded = load_bundle(dir.path(), "temporal-v2").unwrap();
        assert_eq!(loaded.spec, original.spec);
        assert_eq!(loaded.manifest, original.manifest);
        assert_eq!(loaded.model.regressor(), original.model.regressor());

        let bits = |t: &DefaultsTable| t.iter().map(|(k, v)| (k.to_string(), v.to_bits())).collect::<Vec<_>>();
        assert_eq!(bits(&loaded.defaults), bits(&original.defaults));
    }

    #[test]
    fn test_missing_version_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load_bundle(dir.path(), "nope"), Err(LoadError::NotFound { .. })));
        assert!(matches!(load_bundle(dir.path(), "../etc"), Err(LoadError::NotFound { .. })));
    }

    #[test]
    fn test_tampered_model_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_bundle(&temporal_bundle(), dir.path()).unwrap();

        let model_path = path.join(MODEL_FILE);
        let mut text = fs::read_to_string(&model_path).unwrap();
        text = text.replacen("20.0", "21.0", 1);
        fs::write(&model_path, text).unwrap();

        assert!(matches!(
            load_bundle(dir.path(), "temporal-v2"),
            Err(LoadError::CorruptArtifact { .. })
        ));
    }

    #[test]
    fn test_defaults_missing_statistic_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_bundle(&temporal_bundle(), dir.path()).unwrap();

        fs::write(path.join(DEFAULTS_FILE), r#"{"SO2_ppb": 1.0, "CO_ppm": 1.0, "O3_ppb": 1.0}"#).unwrap();

        match load_bundle(dir.path(), "temporal-v2") {
            Err(LoadError::CorruptArtifact { reason, .. }) => assert!(reason.contains("PM25")),
            other => panic!("expected CorruptArtifact, got {:?}", other.map(|b| b.manifest)),
        }
    }

    #[test]
    fn test_missing_part_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_bundle(&temporal_bundle(), dir.path()).unwrap();
        fs::remove_file(path.join(SPEC_FILE)).unwrap();
        assert!(matches!(
            load_bundle(dir.path(), "temporal-v2"),
            Err(LoadError::CorruptArtifact { .. })
        ));
    }

    #[test]
    fn test_dimension_mismatch_rejected_at_assembly() {
        let spec = presets::basic_v1().unwrap();
        let result = ModelBundle::assemble(spec, DefaultsTable::new(), stump(3), TrainingMetrics::default());
        assert!(matches!(result, Err(SaveError::Inconsistent(_))));
    }

    #[test]
    fn test_resave_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let first = temporal_bundle();
        save_bundle(&first, dir.path()).unwrap();
        let second = temporal_bundle();
        save_bundle(&second, dir.path()).unwrap();

        let loaded = load_bundle(dir.path(), "temporal-v2").unwrap();
        assert_eq!(loaded.manifest.training_run_id, second.manifest.training_run_id);
        let entries = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_failed_swap_keeps_previous_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let first = temporal_bundle();
        let final_dir = save_bundle(&first, dir.path()).unwrap();

        let missing_staging = dir.path().join(".temporal-v2.staging-gone");
        assert!(swap_into_place(&missing_staging, &final_dir).is_err());

        let loaded = load_bundle(dir.path(), "temporal-v2").unwrap();
        assert_eq!(loaded.manifest.training_run_id, first.manifest.training_run_id);
        let entries = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
