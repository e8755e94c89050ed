//! Bagged regression-tree ensemble.
//!
//! Each tree is grown on a bootstrap sample with squared-error splits and
//! no feature subsampling. Tree `i` draws from its own RNG seeded with
//! `seed + i`, so the fitted forest does not depend on how rayon schedules
//! the work.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PlannerError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub seed: u64,
    /// `None` grows every tree until its leaves are pure.
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 300,
            seed: 42,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
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

#[derive(Debug, Clone, PartialEq)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
}

impl RegressionTree {
    fn fit<R: AsRef<[f64]>>(rows: &[R], targets: &[f64], sample: Vec<usize>, params: &ForestParams) -> Self {
        let mut nodes = vec![Node::Leaf {
            value: mean_of(targets, &sample),
        }];
        let mut pending = vec![(0usize, sample, 0usize)];

        while let Some((node_id, indices, depth)) = pending.pop() {
            if indices.len() < params.min_samples_split.max(2) {
                continue;
            }
            if params.max_depth.is_some_and(|max_depth| depth >= max_depth) {
                continue;
            }
            let Some(split) = best_split(rows, targets, &indices, params.min_samples_leaf.max(1)) else {
                continue;
            };

            let (left_indices, right_indices): (Vec<usize>, Vec<usize>) = indices
                .iter()
                .partition(|&&i| rows[i].as_ref()[split.feature] <= split.threshold);

            let left = nodes.len();
            nodes.push(Node::Leaf {
                value: mean_of(targets, &left_indices),
            });
            let right = nodes.len();
            nodes.push(Node::Leaf {
                value: mean_of(targets, &right_indices),
            });
            nodes[node_id] = Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left,
                right,
            };

            pending.push((left, left_indices, depth + 1));
            pending.push((right, right_indices, depth + 1));
        }

        Self { nodes }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut node_id = 0;
        loop {
            match self.nodes[node_id] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = row.get(feature).copied().unwrap_or(0.0);
                    node_id = if value <= threshold { left } else { right };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Averaging ensemble of regression trees.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
    n_features: usize,
}

impl RandomForest {
    /// Fit `params.n_estimators` trees in parallel.
    ///
    /// # Errors
    ///
    /// [`PlannerError::InputValidation`] for empty input, mismatched row and
    /// target counts, ragged rows, or zero estimators.
    pub fn fit<R>(rows: &[R], targets: &[f64], params: &ForestParams) -> Result<Self>
    where
        R: AsRef<[f64]> + Sync,
    {
        if rows.is_empty() {
            return Err(PlannerError::InputValidation("cannot fit a forest on zero rows".to_string()));
        }
        if rows.len() != targets.len() {
            return Err(PlannerError::InputValidation(format!(
                "{} feature rows but {} targets",
                rows.len(),
                targets.len()
            )));
        }
        if params.n_estimators == 0 {
            return Err(PlannerError::InputValidation("forest needs at least one estimator".to_string()));
        }
        let n_features = rows[0].as_ref().len();
        if rows.iter().any(|row| row.as_ref().len() != n_features) {
            return Err(PlannerError::InputValidation("feature rows differ in length".to_string()));
        }

        let n = rows.len();
        let trees: Vec<RegressionTree> = (0..params.n_estimators)
            .into_par_iter()
            .map(|tree| {
                let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(tree as u64));
                let sample: Vec<usize> = (0..n).map(|_| rng.random_range(0..n)).collect();
                RegressionTree::fit(rows, targets, sample, params)
            })
            .collect();

        debug!(
            trees = trees.len(),
            rows = n,
            nodes = trees.iter().map(RegressionTree::node_count).sum::<usize>(),
            "forest fitted"
        );

        Ok(Self { trees, n_features })
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let total: f64 = self.trees.iter().map(|tree| tree.predict(row)).sum();
        total / self.trees.len() as f64
    }

    pub fn predict_batch<R>(&self, rows: &[R]) -> Vec<f64>
    where
        R: AsRef<[f64]> + Sync,
    {
        rows.par_iter().map(|row| self.predict(row.as_ref())).collect()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }
}

fn mean_of(targets: &[f64], indices: &[usize]) -> f64 {
    if indices.is_empty() {
        return 0.0;
    }
    indices.iter().map(|&i| targets[i]).sum::<f64>() / indices.len() as f64
}

/// Split maximising `sum_l²/n_l + sum_r²/n_r`, i.e. minimising squared error.
/// `None` for a pure node or when no threshold separates the values.
fn best_split<R: AsRef<[f64]>>(rows: &[R], targets: &[f64], indices: &[usize], min_leaf: usize) -> Option<BestSplit> {
    let n = indices.len();
    let first = targets[indices[0]];
    if indices.iter().all(|&i| targets[i] == first) {
        return None;
    }

    let total: f64 = indices.iter().map(|&i| targets[i]).sum();
    let n_features = rows[indices[0]].as_ref().len();
    let mut best: Option<(f64, BestSplit)> = None;
    let mut sorted = indices.to_vec();

    for feature in 0..n_features {
        sorted.sort_by(|&a, &b| rows[a].as_ref()[feature].total_cmp(&rows[b].as_ref()[feature]));

        let mut left_sum = 0.0;
        for k in 1..n {
            left_sum += targets[sorted[k - 1]];
            let lower = rows[sorted[k - 1]].as_ref()[feature];
            let upper = rows[sorted[k]].as_ref()[feature];
            if lower == upper || k < min_leaf || n - k < min_leaf {
                continue;
            }

            let right_sum = total - left_sum;
            let score = left_sum * left_sum / k as f64 + right_sum * right_sum / (n - k) as f64;
            if best.as_ref().is_none_or(|(best_score, _)| score > *best_score) {
                let midpoint = lower + (upper - lower) / 2.0;
                // Adjacent floats can round the midpoint up onto `upper`.
                let threshold = if midpoint < upper { midpoint } else { lower };
                best = Some((score, BestSplit { feature, threshold }));
            }
        }
    }

    best.map(|(_, split)| split)
}
