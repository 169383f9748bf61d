//! Feature Layout - the versioned feature contract of one model
//!
//! **CRITICAL: a FeatureSpec controls the model input schema**
//!
//! ## Rules (NEVER break these):
//! 1. Add feature → new version
//! 2. Change order → new version
//! 3. Rename or remove feature → new version
//!
//! The model indexes its inputs positionally, so `feature_order` is load-bearing.
//! Every name in it must come from exactly one source: supplied by the caller,
//! derived from the timestamp, or defaulted from a training-time statistic.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::derived::DerivedFeature;

// ============================================================================
// HISTORY SOURCES
// ============================================================================

/// How training computes the true value of a feature that is defaulted online
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistorySource {
    /// Plain dataset column that callers cannot supply
    Column { column: String },
    /// Value of `source` from `periods` rows earlier
    Lag { source: String, periods: usize },
    /// Mean of `source` over the `window` preceding rows (current row excluded)
    RollingMean { source: String, window: usize },
}

impl HistorySource {
    pub fn column(column: &str) -> Self {
        HistorySource::Column { column: column.to_string() }
    }

    pub fn lag(source: &str, periods: usize) -> Self {
        HistorySource::Lag { source: source.to_string(), periods }
    }

    pub fn rolling_mean(source: &str, window: usize) -> Self {
        HistorySource::RollingMean { source: source.to_string(), window }
    }

    /// Dataset column the value is computed from
    pub fn source_column(&self) -> &str {
        match self {
            HistorySource::Column { column } => column,
            HistorySource::Lag { source, .. } => source,
            HistorySource::RollingMean { source, .. } => source,
        }
    }

    /// True when the value depends on earlier rows
    pub fn needs_history(&self) -> bool {
        !matches!(self, HistorySource::Column { .. })
    }
}

/// A feature unavailable online, backfilled from a DefaultsTable entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultedFeature {
    /// DefaultsTable key
    pub statistic: String,
    /// Training-time computation
    pub history: HistorySource,
}

/// Where a feature's value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSource<'a> {
    Supplied,
    Derived(DerivedFeature),
    Defaulted(&'a DefaultedFeature),
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeatureSpecError {
    #[error("feature spec '{0}' declares no features")]
    Empty(String),

    #[error("feature '{0}' appears more than once in feature_order")]
    DuplicateFeature(String),

    #[error("features with no source: {0:?}")]
    Unsourced(Vec<String>),

    #[error("feature '{feature}' has more than one source: {sources:?}")]
    MultipleSources { feature: String, sources: Vec<&'static str> },

    #[error("{source_kind} feature '{feature}' is not in feature_order")]
    Undeclared { feature: String, source_kind: &'static str },

    #[error("rename '{raw}' -> '{target}' does not target a supplied feature")]
    RenameTarget { raw: String, target: String },

    #[error("rename '{raw}' -> '{target}' shadows declared feature '{raw}'")]
    RenameShadowsFeature { raw: String, target: String },

    #[error("statistic '{statistic}' is shared by features with different source columns: {columns:?}")]
    StatisticConflict { statistic: String, columns: Vec<String> },

    #[error("defaulted feature '{feature}': {reason}")]
    InvalidHistory { feature: String, reason: String },
}

// ============================================================================
// FEATURE SPEC
// ============================================================================

/// Versioned, immutable feature contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    version: String,
    feature_order: Vec<String>,
    #[serde(default)]
    rename_map: BTreeMap<String, String>,
    #[serde(default)]
    supplied: BTreeSet<String>,
    #[serde(default)]
    derived: BTreeMap<String, DerivedFeature>,
    #[serde(default)]
    defaulted: BTreeMap<String, DefaultedFeature>,
}

impl FeatureSpec {
    pub fn builder(version: &str) -> FeatureSpecBuilder {
        FeatureSpecBuilder::new(version)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Same layout under another version name (and therefore another hash)
    pub fn with_version(&self, version: &str) -> Result<FeatureSpec, FeatureSpecError> {
        let spec = FeatureSpec { version: version.to_string(), ..self.clone() };
        spec.validate()?;
        Ok(spec)
    }

    pub fn feature_order(&self) -> &[String] {
        &self.feature_order
    }

    pub fn feature_count(&self) -> usize {
        self.feature_order.len()
    }

    pub fn rename_map(&self) -> &BTreeMap<String, String> {
        &self.rename_map
    }

    pub fn supplied(&self) -> &BTreeSet<String> {
        &self.supplied
    }

    pub fn derived(&self) -> &BTreeMap<String, DerivedFeature> {
        &self.derived
    }

    pub fn defaulted(&self) -> &BTreeMap<String, DefaultedFeature> {
        &self.defaulted
    }

    /// Canonical name of a raw caller field (identity when not renamed)
    pub fn resolve<'a>(&'a self, raw: &'a str) -> &'a str {
        self.rename_map.get(raw).map(String::as_str).unwrap_or(raw)
    }

    /// Source of a declared feature
    pub fn source_of(&self, name: &str) -> Option<FeatureSource<'_>> {
        if self.supplied.contains(name) {
            Some(FeatureSource::Supplied)
        } else if let Some(kind) = self.derived.get(name) {
            Some(FeatureSource::Derived(*kind))
        } else {
            self.defaulted.get(name).map(FeatureSource::Defaulted)
        }
    }

    /// Position of a feature in the model input
    pub fn feature_index(&self, name: &str) -> Option<usize> {
        self.feature_order.iter().position(|n| n == name)
    }

    /// Raw field names a caller may send: supplied names and their aliases
    pub fn caller_fields(&self) -> Vec<String> {
        let mut fields: BTreeSet<String> = self.supplied.iter().cloned().collect();
        for (raw, target) in &self.rename_map {
            if self.supplied.contains(target) {
                fields.insert(raw.clone());
            }
        }
        fields.into_iter().collect()
    }

    /// True when any feature needs a timestamp or prior rows at training time
    pub fn needs_timeline(&self) -> bool {
        !self.derived.is_empty()
            || self.defaulted.values().any(|d| d.history.needs_history())
    }

    /// Check the source invariant
    pub fn validate(&self) -> Result<(), FeatureSpecError> {
        if self.feature_order.is_empty() {
            return Err(FeatureSpecError::Empty(self.version.clone()));
        }

        let mut seen = HashSet::with_capacity(self.feature_order.len());
        for name in &self.feature_order {
            if !seen.insert(name.as_str()) {
                return Err(FeatureSpecError::DuplicateFeature(name.clone()));
            }
        }

        let mut unsourced = Vec::new();
        for name in &self.feature_order {
            let mut sources = Vec::new();
            if self.supplied.contains(name) {
                sources.push("supplied");
            }
            if self.derived.contains_key(name) {
                sources.push("derived");
            }
            if self.defaulted.contains_key(name) {
                sources.push("defaulted");
            }
            match sources.len() {
                0 => unsourced.push(name.clone()),
                1 => {}
                _ => {
                    return Err(FeatureSpecError::MultipleSources {
                        feature: name.clone(),
                        sources,
                    })
                }
            }
        }
        if !unsourced.is_empty() {
            return Err(FeatureSpecError::Unsourced(unsourced));
        }

        let declared = |name: &str, kind: &'static str| {
            if seen.contains(name) {
                Ok(())
            } else {
                Err(FeatureSpecError::Undeclared { feature: name.to_string(), source_kind: kind })
            }
        };
        for name in &self.supplied {
            declared(name, "supplied")?;
        }
        for name in self.derived.keys() {
            declared(name, "derived")?;
        }
        for name in self.defaulted.keys() {
            declared(name, "defaulted")?;
        }

        for (raw, target) in &self.rename_map {
            if seen.contains(raw.as_str()) {
                return Err(FeatureSpecError::RenameShadowsFeature {
                    raw: raw.clone(),
                    target: target.clone(),
                });
            }
            if !self.supplied.contains(target) {
                return Err(FeatureSpecError::RenameTarget {
                    raw: raw.clone(),
                    target: target.clone(),
                });
            }
        }

        let mut statistic_columns: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (name, feature) in &self.defaulted {
            match &feature.history {
                HistorySource::Lag { periods: 0, .. } => {
                    return Err(FeatureSpecError::InvalidHistory {
                        feature: name.clone(),
                        reason: "lag periods must be at least 1".into(),
                    });
                }
                HistorySource::RollingMean { window: 0, .. } => {
                    return Err(FeatureSpecError::InvalidHistory {
                        feature: name.clone(),
                        reason: "rolling window must be at least 1".into(),
                    });
                }
                _ => {}
            }
            if feature.statistic.is_empty() {
                return Err(FeatureSpecError::InvalidHistory {
                    feature: name.clone(),
                    reason: "statistic key is empty".into(),
                });
            }
            statistic_columns
                .entry(feature.statistic.as_str())
                .or_default()
                .insert(feature.history.source_column());
        }
        for (statistic, columns) in statistic_columns {
            if columns.len() > 1 {
                return Err(FeatureSpecError::StatisticConflict {
                    statistic: statistic.to_string(),
                    columns: columns.into_iter().map(str::to_string).collect(),
                });
            }
        }

        Ok(())
    }

    /// CRC32 fingerprint of version and ordered names
    pub fn layout_hash(&self) -> u32 {
        compute_layout_hash(&self.version, &self.feature_order)
    }

    pub fn layout_info(&self) -> LayoutInfo {
        LayoutInfo {
            version: self.version.clone(),
            hash: self.layout_hash(),
            feature_count: self.feature_count(),
            feature_names: self.feature_order.clone(),
        }
    }
}

// ============================================================================
// LAYOUT HASH
// ============================================================================

/// Compute CRC32 hash of a feature layout
/// Used to detect layout mismatches at runtime
pub fn compute_layout_hash(version: &str, names: &[String]) -> u32 {
    let mut hasher = Hasher::new();

    hasher.update(version.as_bytes());
    hasher.update(&[0]);

    for name in names {
        hasher.update(name.as_bytes());
        hasher.update(&[0]); // Separator
    }

    hasher.finalize()
}

/// Layout information for serialization/logging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutInfo {
    pub version: String,
    pub hash: u32,
    pub feature_count: usize,
    pub feature_names: Vec<String>,
}

// ============================================================================
// BUILDER
// ============================================================================

/// Builder appending features in declaration order
pub struct FeatureSpecBuilder {
    spec: FeatureSpec,
}

impl FeatureSpecBuilder {
    pub fn new(version: &str) -> Self {
        Self {
            spec: FeatureSpec {
                version: version.to_string(),
                feature_order: Vec::new(),
                rename_map: BTreeMap::new(),
                supplied: BTreeSet::new(),
                derived: BTreeMap::new(),
                defaulted: BTreeMap::new(),
            },
        }
    }

    pub fn supplied(mut self, name: &str) -> Self {
        self.spec.feature_order.push(name.to_string());
        self.spec.supplied.insert(name.to_string());
        self
    }

    pub fn rename(mut self, raw: &str, canonical: &str) -> Self {
        self.spec.rename_map.insert(raw.to_string(), canonical.to_string());
        self
    }

    pub fn derived(mut self, name: &str, kind: DerivedFeature) -> Self {
        self.spec.feature_order.push(name.to_string());
        self.spec.derived.insert(name.to_string(), kind);
        self
    }

    pub fn defaulted(mut self, name: &str, statistic: &str, history: HistorySource) -> Self {
        self.spec.feature_order.push(name.to_string());
        self.spec.defaulted.insert(
            name.to_string(),
            DefaultedFeature { statistic: statistic.to_string(), history },
        );
        self
    }

    /// Declare a position without a source (only useful to exercise validation)
    pub fn declare(mut self, name: &str) -> Self {
        self.spec.feature_order.push(name.to_string());
        self
    }

    pub fn build(self) -> Result<FeatureSpec, FeatureSpecError> {
        self.spec.validate()?;
        Ok(self.spec)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn small_spec() -> FeatureSpec {
        FeatureSpec::builder("t1")
            .supplied("Temperature")
            .supplied("WindSpeedkmh")
            .rename("Wind_Speed_kmh", "WindSpeedkmh")
            .derived("hour", DerivedFeature::Hour)
            .defaulted("PM25_1hr_ago", "PM25", HistorySource::lag("PM25", 1))
            .build()
            .unwrap()
    }

    #[test]
    fn test_resolve_applies_rename() {
        let spec = small_spec();
        assert_eq!(spec.resolve("Wind_Speed_kmh"), "WindSpeedkmh");
        assert_eq!(spec.resolve("Temperature"), "Temperature");
        assert_eq!(spec.resolve("unknown"), "unknown");
    }

    #[test]
    fn test_source_of() {
        let spec = small_spec();
        assert_eq!(spec.source_of("Temperature"), Some(FeatureSource::Supplied));
        assert_eq!(spec.source_of("hour"), Some(FeatureSource::Derived(DerivedFeature::Hour)));
        assert!(matches!(spec.source_of("PM25_1hr_ago"), Some(FeatureSource::Defaulted(_))));
        assert_eq!(spec.source_of("nope"), None);
    }

    #[test]
    fn test_unsourced_feature_fails() {
        let result = FeatureSpec::builder("bad")
            .supplied("Temperature")
            .declare("Humidity")
            .declare("Pressure")
            .build();
        assert_eq!(
            result,
            Err(FeatureSpecError::Unsourced(vec!["Humidity".into(), "Pressure".into()]))
        );
    }

    #[test]
    fn test_duplicate_feature_fails() {
        let result = FeatureSpec::builder("bad")
            .supplied("Temperature")
            .supplied("Temperature")
            .build();
        assert_eq!(result, Err(FeatureSpecError::DuplicateFeature("Temperature".into())));
    }

    #[test]
    fn test_multiple_sources_fail() {
        let result = FeatureSpec::builder("bad")
            .supplied("hour")
            .derived("hour", DerivedFeature::Hour)
            .build();
        assert!(matches!(result, Err(FeatureSpecError::DuplicateFeature(_))));

        // Same name in two source sets but declared once
        let mut spec = FeatureSpec::builder("bad").supplied("hour").build().unwrap();
        spec.derived.insert("hour".into(), DerivedFeature::Hour);
        assert!(matches!(
            spec.validate(),
            Err(FeatureSpecError::MultipleSources { .. })
        ));
    }

    #[test]
    fn test_rename_must_target_supplied() {
        let result = FeatureSpec::builder("bad")
            .supplied("Temperature")
            .derived("hour", DerivedFeature::Hour)
            .rename("Hour", "hour")
            .build();
        assert!(matches!(result, Err(FeatureSpecError::RenameTarget { .. })));
    }

    #[test]
    fn test_rename_cannot_shadow_declared_feature() {
        let result = FeatureSpec::builder("shadow")
            .supplied("Temperature")
            .supplied("Temperature_C")
            .rename("Temperature", "Temperature_C")
            .build();
        assert_eq!(
            result,
            Err(FeatureSpecError::RenameShadowsFeature {
                raw: "Temperature".into(),
                target: "Temperature_C".into(),
            })
        );
    }

    #[test]
    fn test_statistic_conflict() {
        let result = FeatureSpec::builder("bad")
            .defaulted("a", "mean", HistorySource::column("SO2"))
            .defaulted("b", "mean", HistorySource::column("CO"))
            .build();
        assert!(matches!(result, Err(FeatureSpecError::StatisticConflict { .. })));
    }

    #[test]
    fn test_zero_lag_rejected() {
        let result = FeatureSpec::builder("bad")
            .defaulted("lag0", "PM25", HistorySource::lag("PM25", 0))
            .build();
        assert!(matches!(result, Err(FeatureSpecError::InvalidHistory { .. })));
    }

    #[test]
    fn test_layout_hash_tracks_order_and_version() {
        let a = FeatureSpec::builder("v1").supplied("a").supplied("b").build().unwrap();
        let b = FeatureSpec::builder("v1").supplied("b").supplied("a").build().unwrap();
        let c = FeatureSpec::builder("v2").supplied("a").supplied("b").build().unwrap();
        assert_eq!(a.layout_hash(), a.clone().layout_hash());
        assert_ne!(a.layout_hash(), b.layout_hash());
        assert_ne!(a.layout_hash(), c.layout_hash());
    }

    #[test]
    fn test_caller_fields_include_aliases() {
        let spec = small_spec();
        assert_eq!(
            spec.caller_fields(),
            vec!["Temperature".to_string(), "WindSpeedkmh".into(), "Wind_Speed_kmh".into()]
        );
    }

    #[test]
    fn test_with_version_keeps_layout() {
        let spec = small_spec();
        let renamed = spec.with_version("t2").unwrap();
        assert_eq!(renamed.feature_order(), spec.feature_order());
        assert_eq!(renamed.version(), "t2");
        assert_ne!(renamed.layout_hash(), spec.layout_hash());
    }
}
