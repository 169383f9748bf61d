//! Feature Vector - Core data structure for model input
//!
//! **Built only through `FeatureBuilder`**
//!
//! The builder turns one raw `ObservationRequest` into the exact ordered
//! vector a FeatureSpec describes:
//! - renames caller fields to canonical names
//! - computes derived time features from an explicit timestamp
//! - backfills defaulted features from the DefaultsTable
//! - refuses anything non-finite, ambiguous or incomplete

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::defaults::{DefaultsTable, FallbackPolicy};
use super::layout::{FeatureSource, FeatureSpec};

// ============================================================================
// REQUEST
// ============================================================================

/// One raw field value as received from a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Other(serde_json::Value),
}

impl FieldValue {
    /// The value as a finite float, if it is one
    pub fn as_finite(&self) -> Option<f64> {
        match self {
            FieldValue::Number(v) if v.is_finite() => Some(*v),
            _ => None,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

/// One point-in-time measurement, keyed by raw (pre-rename) field name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObservationRequest {
    fields: BTreeMap<String, FieldValue>,
}

impl ObservationRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: f64) {
        self.fields.insert(name.to_string(), FieldValue::Number(value));
    }

    pub fn insert_raw(&mut self, name: &str, value: serde_json::Value) {
        self.fields.insert(name.to_string(), FieldValue::Other(value));
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<'a> FromIterator<(&'a str, f64)> for ObservationRequest {
    fn from_iter<I: IntoIterator<Item = (&'a str, f64)>>(iter: I) -> Self {
        let mut request = Self::new();
        for (name, value) in iter {
            request.insert(name, value);
        }
        request
    }
}

// ============================================================================
// FEATURE VECTOR
// ============================================================================

/// Ordered model input; `values[i]` is `feature_order[i]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// CRC32 hash of the layout the vector was built for
    pub layout_hash: u32,
    pub values: Vec<f64>,
}

impl FeatureVector {
    pub fn new(layout_hash: u32, values: Vec<f64>) -> Self {
        Self { layout_hash, values }
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }

    pub fn get_by_name(&self, spec: &FeatureSpec, name: &str) -> Option<f64> {
        spec.feature_index(name).and_then(|i| self.get(i))
    }

    /// Convert to JSON-serializable format for logging
    pub fn to_log_entry(&self, spec: &FeatureSpec) -> serde_json::Value {
        serde_json::json!({
            "feature_version": spec.version(),
            "layout_hash": self.layout_hash,
            "named_values": spec.feature_order().iter()
                .zip(self.values.iter())
                .map(|(name, value)| (name.clone(), *value))
                .collect::<BTreeMap<_, _>>(),
        })
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error("missing required features: {}", .0.join(", "))]
    MissingFeature(Vec<String>),

    #[error("fields {} resolve to '{feature}' with different values", .fields.join(", "))]
    DuplicateField { feature: String, fields: Vec<String> },

    #[error("no default value for statistics: {}", .0.join(", "))]
    MissingDefault(Vec<String>),

    #[error("fields are not finite numbers: {}", .0.join(", "))]
    TypeMismatch(Vec<String>),
}

// ============================================================================
// BUILDER
// ============================================================================

/// Assembles FeatureVectors for one FeatureSpec
#[derive(Debug, Clone, Copy)]
pub struct FeatureBuilder<'a> {
    spec: &'a FeatureSpec,
    defaults: &'a DefaultsTable,
    policy: FallbackPolicy,
}

impl<'a> FeatureBuilder<'a> {
    pub fn new(spec: &'a FeatureSpec, defaults: &'a DefaultsTable) -> Self {
        Self { spec, defaults, policy: FallbackPolicy::default() }
    }

    pub fn with_policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Build the model input for `request` observed at `now`
    pub fn build(
        &self,
        request: &ObservationRequest,
        now: &NaiveDateTime,
    ) -> Result<FeatureVector, BuildError> {
        let spec = self.spec;

        // 1. Every field the layout reads must be a finite number
        let mut invalid = Vec::new();
        let mut numeric = Vec::with_capacity(request.len());
        for (raw, value) in request.iter() {
            let canonical = spec.resolve(raw);
            let read = match spec.source_of(canonical) {
                Some(FeatureSource::Supplied) => true,
                Some(FeatureSource::Defaulted(_)) if self.policy == FallbackPolicy::PreferSupplied => true,
                Some(FeatureSource::Defaulted(_)) => {
                    log::debug!("Ignoring field '{}' (defaulted by policy)", raw);
                    false
                }
                Some(FeatureSource::Derived(_)) => {
                    log::debug!("Ignoring field '{}' (derived from timestamp)", raw);
                    false
                }
                None => {
                    log::debug!("Ignoring field '{}' (not in layout {})", raw, spec.version());
                    false
                }
            };
            if !read {
                continue;
            }
            match value.as_finite() {
                Some(v) => numeric.push((raw, canonical, v)),
                None => invalid.push(raw.to_string()),
            }
        }
        if !invalid.is_empty() {
            invalid.sort();
            return Err(BuildError::TypeMismatch(invalid));
        }

        // 2. Two aliases of one feature must agree
        let mut resolved: HashMap<&str, (&str, f64)> = HashMap::with_capacity(numeric.len());
        for (raw, canonical, value) in numeric {
            match resolved.get(canonical) {
                Some((first, existing)) if *existing != value => {
                    return Err(BuildError::DuplicateField {
                        feature: canonical.to_string(),
                        fields: vec![first.to_string(), raw.to_string()],
                    });
                }
                Some(_) => {}
                None => {
                    resolved.insert(canonical, (raw, value));
                }
            }
        }

        let supplied = |name: &str| resolved.get(name).map(|(_, v)| *v);

        // 3. Every needed statistic must exist
        let mut missing_defaults = BTreeSet::new();
        for (name, feature) in spec.defaulted() {
            let covered = self.policy == FallbackPolicy::PreferSupplied && supplied(name).is_some();
            if !covered && !self.defaults.contains(&feature.statistic) {
                missing_defaults.insert(feature.statistic.clone());
            }
        }
        if !missing_defaults.is_empty() {
            return Err(BuildError::MissingDefault(missing_defaults.into_iter().collect()));
        }

        // 4. Assemble in layout order
        let mut values = Vec::with_capacity(spec.feature_count());
        let mut missing = Vec::new();
        for name in spec.feature_order() {
            let value = match spec.source_of(name) {
                Some(FeatureSource::Supplied) => supplied(name),
                Some(FeatureSource::Derived(kind)) => Some(kind.compute(now)),
                Some(FeatureSource::Defaulted(feature)) => match self.policy {
                    FallbackPolicy::AlwaysDefault => self.defaults.get(&feature.statistic),
                    FallbackPolicy::PreferSupplied => supplied(name)
                        .or_else(|| self.defaults.get(&feature.statistic)),
                },
                None => None,
            };
            match value {
                Some(v) => values.push(v),
                None => missing.push(name.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(BuildError::MissingFeature(missing));
        }

        Ok(FeatureVector::new(spec.layout_hash(), values))
    }
}

/// Build with the literal contract (`FallbackPolicy::AlwaysDefault`)
pub fn build(
    request: &ObservationRequest,
    spec: &FeatureSpec,
    defaults: &DefaultsTable,
    now: &NaiveDateTime,
) -> Result<FeatureVector, BuildError> {
    FeatureBuilder::new(spec, defaults).build(request, now)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_value_from_json() {
        let request: ObservationRequest =
            serde_json::from_str(r#"{"a": 25, "b": 1.5, "c": "x", "d": null}"#).unwrap();
        assert_eq!(request.get("a").and_then(FieldValue::as_finite), Some(25.0));
        assert_eq!(request.get("b").and_then(FieldValue::as_finite), Some(1.5));
        assert_eq!(request.get("c").and_then(FieldValue::as_finite), None);
        assert_eq!(request.get("d").and_then(FieldValue::as_finite), None);
    }

    #[test]
    fn test_non_finite_is_not_a_number() {
        assert_eq!(FieldValue::Number(f64::NAN).as_finite(), None);
        assert_eq!(FieldValue::Number(f64::INFINITY).as_finite(), None);
        assert_eq!(FieldValue::Number(f64::NEG_INFINITY).as_finite(), None);
    }

    #[test]
    fn test_to_log_entry() {
        let spec = FeatureSpec::builder("log").supplied("a").build().unwrap();
        let vector = FeatureVector::new(spec.layout_hash(), vec![2.0]);
        let log = vector.to_log_entry(&spec);
        assert_eq!(log["feature_version"], "log");
        assert_eq!(log["named_values"]["a"], 2.0);
    }
}
