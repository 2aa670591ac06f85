//! CART classification trees (Gini impurity) and a bagged random forest.
//!
//! Trees are stored as a flat node arena so they serialise to plain JSON.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::dataset::LabeledDataset;

use super::argmax;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeOptions {
    pub max_depth: usize,
    /// Minimum samples on each side of a split.
    pub min_samples_leaf: usize,
    /// Minimum weighted Gini decrease required to split a node.
    pub min_impurity_decrease: f64,
    /// Features tried per split; `None` tries all of them.
    pub max_features: Option<usize>,
    pub seed: u64,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            max_depth: 8,
            min_samples_leaf: 3,
            min_impurity_decrease: 0.002,
            max_features: None,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNode {
    Leaf {
        /// Class probabilities at this leaf.
        distribution: Vec<f32>,
    },
    Split {
        feature_index: u16,
        /// Rows with `feature <= threshold` go left.
        threshold: f32,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub classes: Vec<String>,
    /// `nodes[0]` is the root.
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    pub fn validate(&self) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("Tree has no nodes".to_string());
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Leaf { distribution } if distribution.len() != self.classes.len() => {
                    return Err(format!("Leaf {idx} has a wrong distribution length"));
                }
                TreeNode::Split { left, right, .. }
                    if *left >= self.nodes.len() || *right >= self.nodes.len() || *left <= idx || *right <= idx =>
                {
                    return Err(format!("Split {idx} points outside the tree"));
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn predict_proba(&self, features: &[f32]) -> &[f32] {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                TreeNode::Leaf { distribution } => return distribution,
                TreeNode::Split {
                    feature_index,
                    threshold,
                    left,
                    right,
                } => {
                    let value = features
                        .get(*feature_index as usize)
                        .copied()
                        .unwrap_or(0.0);
                    idx = if value <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn predict_class_index(&self, features: &[f32]) -> usize {
        argmax(self.predict_proba(features))
    }
}

pub fn train_tree(dataset: &LabeledDataset, options: &TreeOptions) -> Result<DecisionTree, String> {
    dataset.validate()?;
    if dataset.is_empty() {
        return Err("Empty dataset".to_string());
    }
    let weights = vec![1.0; dataset.len()];
    let indices: Vec<usize> = (0..dataset.len()).collect();
    let mut rng = StdRng::seed_from_u64(options.seed);
    Ok(fit_weighted(dataset, &indices, &weights, options, &mut rng))
}

/// Grow a tree on `indices` of `dataset` with per-row `weights`.
///
/// `weights` is indexed like `dataset`, not like `indices`.
pub(crate) fn fit_weighted(
    dataset: &LabeledDataset,
    indices: &[usize],
    weights: &[f64],
    options: &TreeOptions,
    rng: &mut StdRng,
) -> DecisionTree {
    let mut builder = TreeBuilder {
        dataset,
        weights,
        options,
        n_classes: dataset.classes.len(),
        nodes: Vec::new(),
    };
    let mut rows = indices.to_vec();
    builder.grow(&mut rows, 0, rng);
    DecisionTree {
        classes: dataset.classes.clone(),
        nodes: builder.nodes,
    }
}

struct TreeBuilder<'a> {
    dataset: &'a LabeledDataset,
    weights: &'a [f64],
    options: &'a TreeOptions,
    n_classes: usize,
    nodes: Vec<TreeNode>,
}

struct Candidate {
    feature: usize,
    threshold: f32,
    impurity: f64,
}

impl TreeBuilder<'_> {
    fn grow(&mut self, rows: &mut [usize], depth: usize, rng: &mut StdRng) -> usize {
        let node_idx = self.nodes.len();
        let totals = self.class_weights(rows);
        let total: f64 = totals.iter().sum();
        self.nodes.push(leaf(&totals));

        let impurity = gini(&totals, total);
        if depth >= self.options.max_depth
            || rows.len() < 2 * self.options.min_samples_leaf.max(1)
            || impurity <= 0.0
        {
            return node_idx;
        }
        let Some(best) = self.best_split(rows, &totals, rng) else {
            return node_idx;
        };
        let decrease = impurity - best.impurity;
        if decrease < self.options.min_impurity_decrease {
            return node_idx;
        }

        let threshold = best.threshold;
        let feature = best.feature;
        let split_at = partition(rows, |&row| self.dataset.x[row][feature] <= threshold);
        let (left_rows, right_rows) = rows.split_at_mut(split_at);
        let left = self.grow(left_rows, depth + 1, rng);
        let right = self.grow(right_rows, depth + 1, rng);
        self.nodes[node_idx] = TreeNode::Split {
            feature_index: feature as u16,
            threshold,
            left,
            right,
        };
        node_idx
    }

    fn class_weights(&self, rows: &[usize]) -> Vec<f64> {
        let mut totals = vec![0.0f64; self.n_classes];
        for &row in rows {
            totals[self.dataset.y[row]] += self.weights[row];
        }
        totals
    }

    fn best_split(&self, rows: &[usize], totals: &[f64], rng: &mut StdRng) -> Option<Candidate> {
        let n_features = self.dataset.feature_len();
        let features: Vec<usize> = match self.options.max_features {
            Some(max) if max > 0 && max < n_features => sample(rng, n_features, max).into_vec(),
            _ => (0..n_features).collect(),
        };
        let total: f64 = totals.iter().sum();
        let min_leaf = self.options.min_samples_leaf.max(1);
        let mut best: Option<Candidate> = None;
        let mut sorted = rows.to_vec();
        for feature in features {
            let column = |row: usize| self.dataset.x[row][feature];
            sorted.sort_by(|&a, &b| column(a).total_cmp(&column(b)));
            let mut left = vec![0.0f64; self.n_classes];
            for pos in 0..sorted.len() - 1 {
                let row = sorted[pos];
                left[self.dataset.y[row]] += self.weights[row];
                let n_left = pos + 1;
                if n_left < min_leaf || sorted.len() - n_left < min_leaf {
                    continue;
                }
                let (here, next) = (column(row), column(sorted[pos + 1]));
                if here == next {
                    continue;
                }
                let left_total: f64 = left.iter().sum();
                let right: Vec<f64> = totals.iter().zip(&left).map(|(t, l)| t - l).collect();
                let right_total = total - left_total;
                let weighted = (left_total * gini(&left, left_total)
                    + right_total * gini(&right, right_total))
                    / total.max(f64::EPSILON);
                if best.as_ref().is_none_or(|b| weighted < b.impurity) {
                    best = Some(Candidate {
                        feature,
                        threshold: here + (next - here) / 2.0,
                        impurity: weighted,
                    });
                }
            }
        }
        best
    }
}

fn gini(totals: &[f64], total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    1.0 - totals.iter().map(|&w| (w / total).powi(2)).sum::<f64>()
}

fn leaf(totals: &[f64]) -> TreeNode {
    let total: f64 = totals.iter().sum();
    let distribution = if total > 0.0 {
        totals.iter().map(|&w| (w / total) as f32).collect()
    } else {
        vec![1.0 / totals.len().max(1) as f32; totals.len()]
    };
    TreeNode::Leaf { distribution }
}

/// In-place partition; returns the number of rows satisfying `pred`, which end up first.
fn partition(rows: &mut [usize], pred: impl Fn(&usize) -> bool) -> usize {
    let mut split = 0;
    for idx in 0..rows.len() {
        if pred(&rows[idx]) {
            rows.swap(split, idx);
            split += 1;
        }
    }
    split
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestOptions {
    pub n_estimators: usize,
    /// Bootstrap sample size per tree, as a fraction of the training set.
    pub sample_ratio: f64,
    pub tree: TreeOptions,
    pub seed: u64,
}

impl Default for ForestOptions {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            sample_ratio: 0.5,
            tree: TreeOptions {
                max_features: Some(4),
                ..TreeOptions::default()
            },
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestModel {
    pub classes: Vec<String>,
    pub trees: Vec<DecisionTree>,
}

/// Smallest bootstrap sample drawn for one tree.
const MIN_BOOTSTRAP: usize = 2;

pub fn train_random_forest(
    dataset: &LabeledDataset,
    options: &ForestOptions,
) -> Result<RandomForestModel, String> {
    dataset.validate()?;
    if dataset.is_empty() {
        return Err("Empty dataset".to_string());
    }
    if options.n_estimators == 0 {
        return Err("Forest needs at least one tree".to_string());
    }
    let n = dataset.len();
    let sample_size = ((n as f64 * options.sample_ratio).round() as usize).clamp(MIN_BOOTSTRAP.min(n), n.max(1));
    let weights = vec![1.0; n];
    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut trees = Vec::with_capacity(options.n_estimators);
    for _ in 0..options.n_estimators {
        let bootstrap: Vec<usize> = (0..sample_size).map(|_| rng.random_range(0..n)).collect();
        trees.push(fit_weighted(dataset, &bootstrap, &weights, &options.tree, &mut rng));
    }
    Ok(RandomForestModel {
        classes: dataset.classes.clone(),
        trees,
    })
}

impl RandomForestModel {
    pub fn validate(&self) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("Forest has no trees".to_string());
        }
        self.trees.iter().try_for_each(DecisionTree::validate)
    }

    pub fn predict_class_index(&self, features: &[f32]) -> usize {
        let mut votes = vec![0.0f32; self.classes.len()];
        for tree in &self.trees {
            for (acc, &p) in votes.iter_mut().zip(tree.predict_proba(features)) {
                *acc += p;
            }
        }
        argmax(&votes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Class 0 iff `x0 > 0.5`; the second feature is noise.
    fn threshold_dataset() -> LabeledDataset {
        let mut data = LabeledDataset::new(vec!["pos".into(), "neg".into()]);
        for i in 0..40 {
            let x0 = i as f32 / 40.0;
            let noise = ((i * 7) % 11) as f32 / 11.0;
            data.push(vec![x0, noise], if x0 > 0.5 { 0 } else { 1 });
        }
        data
    }

    #[test]
    fn tree_learns_a_threshold() {
        let data = threshold_dataset();
        let tree = train_tree(&data, &TreeOptions::default()).unwrap();
        tree.validate().unwrap();
        assert_eq!(tree.predict_class_index(&[0.9, 0.3]), 0);
        assert_eq!(tree.predict_class_index(&[0.1, 0.3]), 1);
        match &tree.nodes[0] {
            TreeNode::Split { feature_index, .. } => assert_eq!(*feature_index, 0),
            other => panic!("expected split at root, got {other:?}"),
        }
    }

    #[test]
    fn pure_node_is_a_leaf() {
        let mut data = LabeledDataset::new(vec!["pos".into(), "neg".into()]);
        for i in 0..10 {
            data.push(vec![i as f32], 1);
        }
        let tree = train_tree(&data, &TreeOptions::default()).unwrap();
        assert_eq!(tree.nodes.len(), 1);
        assert_eq!(tree.predict_class_index(&[3.0]), 1);
    }

    #[test]
    fn forest_is_deterministic_for_a_seed() {
        let data = threshold_dataset();
        let options = ForestOptions {
            n_estimators: 15,
            sample_ratio: 0.8,
            tree: TreeOptions {
                max_features: Some(1),
                min_samples_leaf: 1,
                ..TreeOptions::default()
            },
            seed: 7,
        };
        let a = train_random_forest(&data, &options).unwrap();
        let b = train_random_forest(&data, &options).unwrap();
        assert_eq!(a, b);
        a.validate().unwrap();
        assert_eq!(a.predict_class_index(&[0.95, 0.5]), 0);
        assert_eq!(a.predict_class_index(&[0.05, 0.5]), 1);
    }
}
