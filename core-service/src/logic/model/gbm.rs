//! Gradient Boosting Machine (GBM) regressor
//!
//! Sequential ensemble of regression trees fitted on squared error. Each
//! tree predicts a residual correction to the previous cumulative
//! prediction; the output is the initial prediction (target mean) plus all
//! tree contributions scaled by the learning rate.
//!
//! Trees are stored as flat node arrays in pre-order, so every child index
//! is greater than its parent's. Loading checks this, which rules out
//! cycles in a tampered artifact.

use ndarray::{ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    DEFAULT_COLSAMPLE, DEFAULT_LEARNING_RATE, DEFAULT_MAX_DEPTH, DEFAULT_MIN_SAMPLES_LEAF,
    DEFAULT_N_ESTIMATORS, DEFAULT_SEED, DEFAULT_SUBSAMPLE,
};

/// Splits must reduce squared error by more than this
const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GbmError {
    #[error("cannot fit on an empty dataset")]
    EmptyDataset,
    #[error("{rows} feature rows but {targets} targets")]
    ShapeMismatch { rows: usize, targets: usize },
    #[error("non-finite value in training data")]
    NonFinite,
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error("invalid model structure: {0}")]
    InvalidStructure(String),
}

// ============================================================================
// TREE
// ============================================================================

/// Node in a GBM regression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbmNode {
    /// Feature index to split on (negative = leaf node)
    pub feature: i32,
    /// Samples with `value <= threshold` go left
    pub threshold: f64,
    pub left_child: i32,
    pub right_child: i32,
    /// Leaf value (predicted residual)
    pub value: f64,
}

impl GbmNode {
    fn leaf(value: f64) -> Self {
        Self { feature: -1, threshold: 0.0, left_child: -1, right_child: -1, value }
    }

    pub fn is_leaf(&self) -> bool {
        self.feature < 0
    }
}

/// A regression tree predicting residuals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbmTree {
    nodes: Vec<GbmNode>,
}

impl GbmTree {
    /// Build from parallel arrays
    pub fn from_arrays(
        features: &[i32],
        thresholds: &[f64],
        left_children: &[i32],
        right_children: &[i32],
        values: &[f64],
    ) -> Result<Self, GbmError> {
        let n = features.len();
        if thresholds.len() != n
            || left_children.len() != n
            || right_children.len() != n
            || values.len() != n
        {
            return Err(GbmError::InvalidStructure("inconsistent array lengths".into()));
        }
        let nodes = (0..n)
            .map(|i| GbmNode {
                feature: features[i],
                threshold: thresholds[i],
                left_child: left_children[i],
                right_child: right_children[i],
                value: values[i],
            })
            .collect();
        Ok(Self { nodes })
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Predict the residual for a single sample
    pub fn predict(&self, features: &[f64]) -> f64 {
        let mut idx = 0usize;
        loop {
            let node = &self.nodes[idx];
            if node.is_leaf() {
                return node.value;
            }
            let feat_val = features.get(node.feature as usize).copied().unwrap_or(0.0);
            idx = if feat_val <= node.threshold {
                node.left_child as usize
            } else {
                node.right_child as usize
            };
        }
    }

    fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("empty tree".into());
        }
        let n = self.nodes.len() as i64;
        for (idx, node) in self.nodes.iter().enumerate() {
            if node.is_leaf() {
                if !node.value.is_finite() {
                    return Err(format!("node {} has a non-finite leaf value", idx));
                }
                continue;
            }
            if node.feature as usize >= n_features {
                return Err(format!("node {} splits on feature {} of {}", idx, node.feature, n_features));
            }
            if !node.threshold.is_finite() {
                return Err(format!("node {} has a non-finite threshold", idx));
            }
            for child in [node.left_child, node.right_child] {
                let child = child as i64;
                if child <= idx as i64 || child >= n {
                    return Err(format!("node {} has invalid child {}", idx, child));
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// PARAMETERS
// ============================================================================

/// Boosting hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GbmParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    /// Fraction of rows sampled per tree
    pub subsample: f64,
    /// Fraction of features sampled per tree
    pub colsample: f64,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for GbmParams {
    fn default() -> Self {
        Self {
            n_estimators: DEFAULT_N_ESTIMATORS,
            learning_rate: DEFAULT_LEARNING_RATE,
            max_depth: DEFAULT_MAX_DEPTH,
            subsample: DEFAULT_SUBSAMPLE,
            colsample: DEFAULT_COLSAMPLE,
            min_samples_leaf: DEFAULT_MIN_SAMPLES_LEAF,
            seed: DEFAULT_SEED,
        }
    }
}

impl GbmParams {
    pub fn validate(&self) -> Result<(), GbmError> {
        if self.n_estimators == 0 {
            return Err(GbmError::InvalidParams("n_estimators must be at least 1".into()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(GbmError::InvalidParams("learning_rate must be positive".into()));
        }
        for (name, fraction) in [("subsample", self.subsample), ("colsample", self.colsample)] {
            if !(fraction > 0.0 && fraction <= 1.0) {
                return Err(GbmError::InvalidParams(format!("{} must be in (0, 1]", name)));
            }
        }
        if self.min_samples_leaf == 0 {
            return Err(GbmError::InvalidParams("min_samples_leaf must be at least 1".into()));
        }
        Ok(())
    }
}

// ============================================================================
// REGRESSOR
// ============================================================================

/// Narrow capability the registry needs from a trained model
pub trait Regressor: Send + Sync {
    /// Number of inputs the model indexes positionally
    fn n_features(&self) -> usize;
    fn predict_row(&self, features: &[f64]) -> f64;
}

/// GBM regressor on squared error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbmRegressor {
    trees: Vec<GbmTree>,
    learning_rate: f64,
    initial_prediction: f64,
    n_features: usize,
}

impl GbmRegressor {
    /// Build from pre-trained trees
    pub fn new(
        trees: Vec<GbmTree>,
        learning_rate: f64,
        initial_prediction: f64,
        n_features: usize,
    ) -> Result<Self, GbmError> {
        let model = Self { trees, learning_rate, initial_prediction, n_features };
        model.validate()?;
        Ok(model)
    }

    /// Fit on rows of `x` against targets `y`
    pub fn fit(x: ArrayView2<f64>, y: ArrayView1<f64>, params: &GbmParams) -> Result<Self, GbmError> {
        params.validate()?;
        let (n_rows, n_features) = x.dim();
        if n_rows == 0 || n_features == 0 {
            return Err(GbmError::EmptyDataset);
        }
        if y.len() != n_rows {
            return Err(GbmError::ShapeMismatch { rows: n_rows, targets: y.len() });
        }
        if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(GbmError::NonFinite);
        }

        let initial_prediction = y.mean().unwrap_or(0.0);
        let mut predictions = vec![initial_prediction; n_rows];
        let mut rng = StdRng::seed_from_u64(params.seed);

        let row_count = ((n_rows as f64 * params.subsample).round() as usize).clamp(1, n_rows);
        let feature_count = ((n_features as f64 * params.colsample).round() as usize).clamp(1, n_features);

        let mut all_rows: Vec<usize> = (0..n_rows).collect();
        let mut all_features: Vec<usize> = (0..n_features).collect();
        let mut trees = Vec::with_capacity(params.n_estimators);

        for round in 0..params.n_estimators {
            let residuals: Vec<f64> = y
                .iter()
                .zip(predictions.iter())
                .map(|(target, pred)| target - pred)
                .collect();

            all_rows.shuffle(&mut rng);
            let mut rows = all_rows[..row_count].to_vec();
            all_features.shuffle(&mut rng);
            let mut features = all_features[..feature_count].to_vec();
            features.sort_unstable();

            let tree = TreeGrower { x: x.view(), residuals: &residuals, features: &features, params }
                .grow(&mut rows);

            for (row, pred) in x.axis_iter(Axis(0)).zip(predictions.iter_mut()) {
                let correction = match row.as_slice() {
                    Some(values) => tree.predict(values),
                    None => tree.predict(&row.to_vec()),
                };
                *pred += params.learning_rate * correction;
            }

            if (round + 1) % 50 == 0 {
                let mse = residuals.iter().map(|r| r * r).sum::<f64>() / n_rows as f64;
                log::debug!("GBM round {}/{}: train MSE {:.4}", round + 1, params.n_estimators, mse);
            }
            trees.push(tree);
        }

        Ok(Self {
            trees,
            learning_rate: params.learning_rate,
            initial_prediction,
            n_features,
        })
    }

    /// Structural checks for models read from disk
    pub fn validate(&self) -> Result<(), GbmError> {
        if self.trees.is_empty() {
            return Err(GbmError::InvalidStructure("model has no trees".into()));
        }
        if self.n_features == 0 {
            return Err(GbmError::InvalidStructure("feature count cannot be zero".into()));
        }
        if !self.learning_rate.is_finite() || !self.initial_prediction.is_finite() {
            return Err(GbmError::InvalidStructure("non-finite model constants".into()));
        }
        for (idx, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features)
                .map_err(|e| GbmError::InvalidStructure(format!("tree {}: {}", idx, e)))?;
        }
        Ok(())
    }

    pub fn predict(&self, features: &[f64]) -> f64 {
        let mut score = self.initial_prediction;
        for tree in &self.trees {
            score += self.learning_rate * tree.predict(features);
        }
        score
    }

    pub fn predict_batch(&self, samples: ArrayView2<f64>) -> Vec<f64> {
        samples
            .axis_iter(Axis(0))
            .map(|row| self.predict(&row.to_vec()))
            .collect()
    }

    /// Number of boosting rounds (trees)
    pub fn n_estimators(&self) -> usize {
        self.trees.len()
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn initial_prediction(&self) -> f64 {
        self.initial_prediction
    }
}

impl Regressor for GbmRegressor {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_row(&self, features: &[f64]) -> f64 {
        self.predict(features)
    }
}

// ============================================================================
// TREE GROWING
// ============================================================================

struct TreeGrower<'a> {
    x: ArrayView2<'a, f64>,
    residuals: &'a [f64],
    features: &'a [usize],
    params: &'a GbmParams,
}

struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl TreeGrower<'_> {
    fn grow(&self, rows: &mut [usize]) -> GbmTree {
        let mut nodes = Vec::new();
        self.grow_node(&mut nodes, rows, 0);
        GbmTree { nodes }
    }

    /// Append the subtree for `rows` in pre-order, returning its root index
    fn grow_node(&self, nodes: &mut Vec<GbmNode>, rows: &mut [usize], depth: usize) -> i32 {
        let idx = nodes.len();
        let mean = rows.iter().map(|&r| self.residuals[r]).sum::<f64>() / rows.len() as f64;
        nodes.push(GbmNode::leaf(mean));

        if depth >= self.params.max_depth || rows.len() < 2 * self.params.min_samples_leaf {
            return idx as i32;
        }
        let Some(split) = self.best_split(rows) else {
            return idx as i32;
        };

        // Partition in place: left rows first
        let mut boundary = 0;
        for i in 0..rows.len() {
            if self.x[[rows[i], split.feature]] <= split.threshold {
                rows.swap(i, boundary);
                boundary += 1;
            }
        }
        if boundary == 0 || boundary == rows.len() {
            return idx as i32;
        }

        let (left_rows, right_rows) = rows.split_at_mut(boundary);
        let left = self.grow_node(nodes, left_rows, depth + 1);
        let right = self.grow_node(nodes, right_rows, depth + 1);

        let node = &mut nodes[idx];
        node.feature = split.feature as i32;
        node.threshold = split.threshold;
        node.left_child = left;
        node.right_child = right;
        node.value = 0.0;
        idx as i32
    }

    fn best_split(&self, rows: &[usize]) -> Option<Split> {
        let n = rows.len();
        let min_leaf = self.params.min_samples_leaf;
        let total: f64 = rows.iter().map(|&r| self.residuals[r]).sum();
        let parent_score = total * total / n as f64;

        let mut best: Option<Split> = None;
        let mut pairs: Vec<(f64, f64)> = Vec::with_capacity(n);

        for &feature in self.features {
            pairs.clear();
            pairs.extend(rows.iter().map(|&r| (self.x[[r, feature]], self.residuals[r])));
            pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_sum = 0.0;
            for i in 0..n - 1 {
                left_sum += pairs[i].1;
                let left_n = i + 1;
                let right_n = n - left_n;
                if pairs[i].0 == pairs[i + 1].0 || left_n < min_leaf || right_n < min_leaf {
                    continue;
                }
                let right_sum = total - left_sum;
                let gain = left_sum * left_sum / left_n as f64
                    + right_sum * right_sum / right_n as f64
                    - parent_score;
                if gain > MIN_GAIN && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(Split {
                        feature,
                        threshold: pairs[i].0 + (pairs[i + 1].0 - pairs[i].0) / 2.0,
                        gain,
                    });
                }
            }
        }
        best
    }
}

// ============================================================================
// TESTS
// ============================================================================
