//! Defaults Table - training-time statistics used as online fallbacks

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Statistic key → value, computed once per training run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefaultsTable {
    values: BTreeMap<String, f64>,
}

impl DefaultsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: f64) {
        self.values.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl FromIterator<(String, f64)> for DefaultsTable {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self { values: iter.into_iter().collect() }
    }
}

/// What to do with a defaulted feature the caller did supply
///
/// Lag features such as last hour's PM2.5 are knowable online when the
/// caller keeps recent history, but the shipped models were trained
/// against a contract that always backfills them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Always use the training statistic, ignore caller values
    #[default]
    AlwaysDefault,
    /// Use a caller value when present, the statistic otherwise
    PreferSupplied,
}

impl std::str::FromStr for FallbackPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "always_default" => Ok(FallbackPolicy::AlwaysDefault),
            "prefer_supplied" => Ok(FallbackPolicy::PreferSupplied),
            other => Err(format!("unknown fallback policy '{}'", other)),
        }
    }
}
