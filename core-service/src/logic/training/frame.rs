//! Training frame - the dataset rows a FeatureSpec can learn from
//!
//! History features are computed from the rows that actually precede each
//! row after ordering, never from the defaults used online.

use std::collections::{BTreeMap, HashMap};

use crate::constants::TARGET_ALIASES;
use crate::logic::dataset::{clean_header, Dataset, Record};
use crate::logic::features::{FeatureSource, FeatureSpec, HistorySource};

use super::TrainingError;

/// Complete rows in feature-spec order, plus what the defaults are computed from
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingFrame {
    /// Dataset column used as the target
    pub target_column: String,
    pub dataset_rows: usize,
    /// One row per usable observation, `feature_order` positions
    pub features: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
    /// Statistic keys of the defaulted features, sorted
    pub statistic_keys: Vec<String>,
    /// Per row, the source value of each statistic key
    pub statistic_values: Vec<Vec<f64>>,
}

impl TrainingFrame {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Find the target column among the accepted aliases
pub(super) fn find_target(dataset: &Dataset, aliases: &[String]) -> Result<usize, TrainingError> {
    aliases
        .iter()
        .find_map(|alias| dataset.column_index(&clean_header(alias)))
        .ok_or_else(|| TrainingError::TargetNotFound {
            aliases: aliases.to_vec(),
            available: dataset.columns().to_vec(),
        })
}

/// Canonical name → dataset column
///
/// Exact column names win over renamed ones. The target column is also
/// reachable as the canonical target name so history sources can refer to it.
fn column_lookup(dataset: &Dataset, spec: &FeatureSpec, target_idx: usize) -> HashMap<String, usize> {
    let mut lookup: HashMap<String, usize> = dataset
        .columns()
        .iter()
        .enumerate()
        .map(|(i, c)| (c.clone(), i))
        .collect();
    for (i, column) in dataset.columns().iter().enumerate() {
        let canonical = spec.resolve(column);
        if canonical != column.as_str() {
            lookup.entry(canonical.to_string()).or_insert(i);
        }
    }
    if let Some(canonical_target) = TARGET_ALIASES.first() {
        lookup.entry((*canonical_target).to_string()).or_insert(target_idx);
    }
    lookup
}

/// Every dataset column the spec needs, by canonical name
fn required_columns(spec: &FeatureSpec) -> Vec<String> {
    let mut required: Vec<String> = spec.supplied().iter().cloned().collect();
    required.extend(spec.defaulted().values().map(|d| d.history.source_column().to_string()));
    required.sort();
    required.dedup();
    required
}

pub(super) fn build_frame(
    dataset: &Dataset,
    spec: &FeatureSpec,
    aliases: &[String],
) -> Result<TrainingFrame, TrainingError> {
    let target_idx = find_target(dataset, aliases)?;
    let target_column = dataset.columns()[target_idx].clone();
    log::info!("Using PM2.5 column: {}", target_column);

    let lookup = column_lookup(dataset, spec, target_idx);
    let missing: Vec<String> = required_columns(spec)
        .into_iter()
        .filter(|c| !lookup.contains_key(c))
        .collect();
    if !missing.is_empty() {
        return Err(TrainingError::MissingColumns {
            missing,
            available: dataset.columns().to_vec(),
        });
    }

    let timeline = spec.needs_timeline();
    if timeline && dataset.timestamp_column().is_none() {
        return Err(TrainingError::MissingTimestamp(spec.version().to_string()));
    }

    // Rows with a target, in time order when history or calendar features need it
    let mut rows: Vec<&Record> = dataset
        .records()
        .iter()
        .filter(|r| r.get(target_idx).is_some())
        .collect();
    let with_target = rows.len();
    if timeline {
        rows.retain(|r| r.timestamp.is_some());
        if rows.len() < with_target {
            log::warn!("Dropped {} rows with unparseable timestamps", with_target - rows.len());
        }
        rows.sort_by_key(|r| r.timestamp);
    }
    log::debug!(
        "{} of {} rows have a target value",
        with_target,
        dataset.len()
    );

    let column = |name: &str| lookup.get(name).copied();
    let value_at = |i: usize, name: &str| column(name).and_then(|c| rows[i].get(c));

    let mut statistic_sources: BTreeMap<&str, &str> = BTreeMap::new();
    for feature in spec.defaulted().values() {
        statistic_sources.insert(feature.statistic.as_str(), feature.history.source_column());
    }
    let statistic_keys: Vec<String> = statistic_sources.keys().map(|k| k.to_string()).collect();

    let mut features = Vec::with_capacity(rows.len());
    let mut targets = Vec::with_capacity(rows.len());
    let mut statistic_values = Vec::with_capacity(rows.len());
    let mut incomplete = 0usize;

    for i in 0..rows.len() {
        let row_values: Option<Vec<f64>> = spec
            .feature_order()
            .iter()
            .map(|name| match spec.source_of(name) {
                Some(FeatureSource::Supplied) => value_at(i, name.as_str()),
                Some(FeatureSource::Derived(kind)) => rows[i].timestamp.map(|ts| kind.compute(&ts)),
                Some(FeatureSource::Defaulted(feature)) => history_value(&feature.history, i, &value_at),
                None => None,
            })
            .collect();
        let stats: Option<Vec<f64>> = statistic_sources
            .values()
            .map(|source| value_at(i, *source))
            .collect();

        match (row_values, stats, rows[i].get(target_idx)) {
            (Some(values), Some(stats), Some(target)) => {
                features.push(values);
                statistic_values.push(stats);
                targets.push(target);
            }
            _ => incomplete += 1,
        }
    }

    if incomplete > 0 {
        log::info!("Dropped {} rows with missing feature values", incomplete);
    }
    if targets.is_empty() {
        return Err(TrainingError::NoUsableRows { dataset_rows: dataset.len() });
    }

    Ok(TrainingFrame {
        target_column,
        dataset_rows: dataset.len(),
        features,
        targets,
        statistic_keys,
        statistic_values,
    })
}

/// True value of a history feature at row `i`
///
/// Lags need `periods` prior rows, rolling means need `window` prior rows
/// and exclude row `i` itself.
fn history_value<F>(history: &HistorySource, i: usize, value_at: &F) -> Option<f64>
where
    F: Fn(usize, &str) -> Option<f64>,
{
    match history {
        HistorySource::Column { column } => value_at(i, column.as_str()),
        HistorySource::Lag { source, periods } => {
            i.checked_sub(*periods).and_then(|j| value_at(j, source.as_str()))
        }
        HistorySource::RollingMean { source, window } => {
            let start = i.checked_sub(*window)?;
            let mut sum = 0.0;
            for j in start..i {
                sum += value_at(j, source.as_str())?;
            }
            Some(sum / *window as f64)
        }
    }
}
