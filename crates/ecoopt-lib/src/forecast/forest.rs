//! Random forest regression
//!
//! Bagged CART trees split on squared error. Every tree sees a bootstrap
//! resample of the training rows and considers all features at each split;
//! the forest prediction is the mean of the tree predictions.

use crate::error::{EcoError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Default number of trees
pub const DEFAULT_TREES: usize = 100;

/// Default seed shared by the data split and the forest
pub const DEFAULT_SEED: u64 = 42;

/// Tree growth limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub seed: u64,
    /// None grows each tree until its leaves are pure
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: DEFAULT_TREES,
            seed: DEFAULT_SEED,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A single regression tree stored as a flat node array, root at index 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    score: f64,
}

impl RegressionTree {
    fn fit(x: &[Vec<f64>], y: &[f64], sample: Vec<usize>, params: &ForestParams) -> Self {
        let mut nodes = vec![Node::Leaf { value: 0.0 }];
        // (node slot, rows reaching it, depth)
        let mut pending = vec![(0usize, sample, 0usize)];

        while let Some((slot, rows, depth)) = pending.pop() {
            let value = mean(rows.iter().map(|&i| y[i]), rows.len());

            let depth_reached = params.max_depth.is_some_and(|max| depth >= max);
            let split = if depth_reached || rows.len() < params.min_samples_split.max(2) {
                None
            } else {
                best_split(x, y, &rows, params.min_samples_leaf.max(1))
            };

            match split {
                None => nodes[slot] = Node::Leaf { value },
                Some(candidate) => {
                    let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
                        .into_iter()
                        .partition(|&i| x[i][candidate.feature] <= candidate.threshold);
                    let left = nodes.len();
                    nodes.push(Node::Leaf { value: 0.0 });
                    let right = nodes.len();
                    nodes.push(Node::Leaf { value: 0.0 });
                    nodes[slot] = Node::Split {
                        feature: candidate.feature,
                        threshold: candidate.threshold,
                        left,
                        right,
                    };
                    pending.push((left, left_rows, depth + 1));
                    pending.push((right, right_rows, depth + 1));
                }
            }
        }

        Self { nodes }
    }

    fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn validate(&self, n_features: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(EcoError::ArtifactMismatch("tree has no nodes".to_string()));
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Leaf { value } if !value.is_finite() => {
                    return Err(EcoError::ArtifactMismatch(format!(
                        "leaf {} holds a non-finite value",
                        idx
                    )));
                }
                Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= n_features {
                        return Err(EcoError::ArtifactMismatch(format!(
                            "split on feature {} but model has {} features",
                            feature, n_features
                        )));
                    }
                    // Children are always appended after their parent, which also rules out cycles
                    let len = self.nodes.len();
                    if *left <= idx || *right <= idx || *left >= len || *right >= len {
                        return Err(EcoError::ArtifactMismatch(format!(
                            "node {} has invalid children",
                            idx
                        )));
                    }
                }
                Node::Leaf { .. } => {}
            }
        }
        Ok(())
    }
}

fn mean(values: impl Iterator<Item = f64>, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    values.sum::<f64>() / n as f64
}

/// Find the split maximizing the reduction in squared error, if any reduces it
fn best_split(
    x: &[Vec<f64>],
    y: &[f64],
    rows: &[usize],
    min_leaf: usize,
) -> Option<SplitCandidate> {
    let n = rows.len();
    let total: f64 = rows.iter().map(|&i| y[i]).sum();
    // Minimizing child SSE is equivalent to maximizing sum_l^2/n_l + sum_r^2/n_r
    let parent_score = total * total / n as f64;
    let n_features = x[rows[0]].len();

    let mut best: Option<SplitCandidate> = None;
    let mut sorted = rows.to_vec();

    for feature in 0..n_features {
        sorted.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));

        let mut left_sum = 0.0;
        for k in 1..n {
            left_sum += y[sorted[k - 1]];
            let lo = x[sorted[k - 1]][feature];
            let hi = x[sorted[k]][feature];
            if k < min_leaf || n - k < min_leaf || lo >= hi {
                continue;
            }
            let right_sum = total - left_sum;
            let score = left_sum * left_sum / k as f64 + right_sum * right_sum / (n - k) as f64;
            let improves = score > parent_score + 1e-12 * parent_score.abs().max(1.0);
            if improves && best.as_ref().map_or(true, |b| score > b.score) {
                let mut threshold = lo + (hi - lo) / 2.0;
                // Midpoint can round up to hi for adjacent floats
                if threshold >= hi {
                    threshold = lo;
                }
                best = Some(SplitCandidate {
                    feature,
                    threshold,
                    score,
                });
            }
        }
    }

    best
}

/// Bagged ensemble of regression trees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    n_features: usize,
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    /// Fit on rows `x` with targets `y`
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: &ForestParams) -> Result<Self> {
        if x.is_empty() || x.len() != y.len() {
            return Err(EcoError::InvalidInput(format!(
                "forest needs matching non-empty inputs, got {} rows and {} targets",
                x.len(),
                y.len()
            )));
        }
        if params.n_trees == 0 {
            return Err(EcoError::InvalidInput("forest needs at least one tree".to_string()));
        }
        let n_features = x[0].len();
        if x.iter().any(|r| r.len() != n_features) {
            return Err(EcoError::InvalidInput(
                "all rows must have the same number of features".to_string(),
            ));
        }
        if x.iter().flatten().chain(y).any(|v| !v.is_finite()) {
            return Err(EcoError::InvalidInput(
                "training data contains non-finite values".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(params.seed);
        let n = x.len();
        let trees = (0..params.n_trees)
            .map(|_| {
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit(x, y, sample, params)
            })
            .collect();

        Ok(Self { n_features, trees })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn predict_row(&self, row: &[f64]) -> Result<f64> {
        if row.len() != self.n_features {
            return Err(EcoError::ArtifactMismatch(format!(
                "forest expects {} features, got {}",
                self.n_features,
                row.len()
            )));
        }
        Ok(self.trees.iter().map(|t| t.predict(row)).sum::<f64>() / self.trees.len() as f64)
    }

    pub fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        rows.iter().map(|r| self.predict_row(r)).collect()
    }

    /// Structural check run on artifacts loaded from disk
    pub fn validate(&self) -> Result<()> {
        if self.trees.is_empty() {
            return Err(EcoError::ArtifactMismatch("forest has no trees".to_string()));
        }
        self.trees.iter().try_for_each(|t| t.validate(self.n_features))
    }
}

/// Mean squared error between targets and predictions
pub fn mean_squared_error(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum::<f64>()
        / actual.len() as f64
}
