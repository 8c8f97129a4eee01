//! Random forest for binary labels: bootstrap-sampled CART trees split on
//! Gini impurity over a random subset of features at each node.

use rand::{rngs::StdRng, seq::index, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ForestError {
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("{rows} rows but {labels} labels")]
    LabelCountMismatch { rows: usize, labels: usize },
    #[error("row {row} has {found} features, expected {expected}")]
    RaggedRow { row: usize, expected: usize, found: usize },
    #[error("forest needs at least one tree")]
    NoTrees,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            min_samples_split: 2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    /// Fraction of positive samples that reached this leaf.
    Leaf { positive: f64 },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn leaf(rows: &[usize], labels: &[bool]) -> Self {
        let positive = rows.iter().filter(|&&r| labels[r]).count() as f64 / rows.len() as f64;
        Node::Leaf { positive }
    }

    fn positive_fraction(&self, sample: &[f64]) -> f64 {
        let mut node = self;
        loop {
            match node {
                Node::Leaf { positive } => return *positive,
                Node::Split { feature, threshold, left, right } => {
                    let value = sample.get(*feature).copied().unwrap_or(0.0);
                    node = if value <= *threshold { left } else { right };
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    root: Node,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

struct TreeBuilder<'a> {
    data: &'a [Vec<f64>],
    labels: &'a [bool],
    n_features: usize,
    features_per_split: usize,
    max_depth: Option<usize>,
    min_samples_split: usize,
}

impl TreeBuilder<'_> {
    fn build(&self, rows: Vec<usize>, depth: usize, rng: &mut StdRng) -> Node {
        let positives = rows.iter().filter(|&&r| self.labels[r]).count();
        let pure = positives == 0 || positives == rows.len();
        let depth_reached = self.max_depth.is_some_and(|max| depth >= max);

        if pure || depth_reached || rows.len() < self.min_samples_split || self.n_features == 0 {
            return Node::leaf(&rows, self.labels);
        }

        let subset: Vec<usize> = index::sample(rng, self.n_features, self.features_per_split).into_vec();
        let best = self.best_split(&rows, &subset).or_else(|| {
            // the sampled features are constant here; try the rest before giving up
            let all: Vec<usize> = (0..self.n_features).collect();
            self.best_split(&rows, &all)
        });

        let Some(split) = best else {
            return Node::leaf(&rows, self.labels);
        };

        let (left, right): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| self.data[r][split.feature] <= split.threshold);

        Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: Box::new(self.build(left, depth + 1, rng)),
            right: Box::new(self.build(right, depth + 1, rng)),
        }
    }

    fn best_split(&self, rows: &[usize], features: &[usize]) -> Option<SplitCandidate> {
        let total = rows.len() as f64;
        let total_pos = rows.iter().filter(|&&r| self.labels[r]).count() as f64;
        let mut best: Option<SplitCandidate> = None;

        for &feature in features {
            let mut sorted: Vec<(f64, bool)> = rows
                .iter()
                .map(|&r| (self.data[r][feature], self.labels[r]))
                .collect();
            sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_n = 0.0;
            let mut left_pos = 0.0;
            for i in 0..sorted.len() - 1 {
                left_n += 1.0;
                if sorted[i].1 {
                    left_pos += 1.0;
                }
                let (current, next) = (sorted[i].0, sorted[i + 1].0);
                if current == next {
                    continue;
                }

                let right_n = total - left_n;
                let right_pos = total_pos - left_pos;
                let impurity = (left_n * gini(left_pos, left_n) + right_n * gini(right_pos, right_n)) / total;

                if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: current + (next - current) / 2.0,
                        impurity,
                    });
                }
            }
        }

        best
    }
}

fn gini(positive: f64, n: f64) -> f64 {
    if n == 0.0 {
        return 0.0;
    }
    let p = positive / n;
    2.0 * p * (1.0 - p)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_features: usize,
}

impl RandomForest {
    pub fn fit(data: &[Vec<f64>], labels: &[bool], params: &ForestParams) -> Result<Self, ForestError> {
        if data.is_empty() {
            return Err(ForestError::EmptyTrainingSet);
        }
        if data.len() != labels.len() {
            return Err(ForestError::LabelCountMismatch { rows: data.len(), labels: labels.len() });
        }
        if params.n_trees == 0 {
            return Err(ForestError::NoTrees);
        }
        let n_features = data[0].len();
        if let Some((row, found)) = data.iter().map(Vec::len).enumerate().find(|(_, len)| *len != n_features) {
            return Err(ForestError::RaggedRow { row, expected: n_features, found });
        }

        let builder = TreeBuilder {
            data,
            labels,
            n_features,
            features_per_split: ((n_features as f64).sqrt() as usize).clamp(1, n_features.max(1)),
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split.max(2),
        };

        let mut rng = StdRng::seed_from_u64(params.seed);
        let n = data.len();
        let trees = (0..params.n_trees)
            .map(|_| {
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                DecisionTree { root: builder.build(bootstrap, 0, &mut rng) }
            })
            .collect::<Vec<_>>();

        debug!("Fitted random forest: {} trees over {} samples, {} features", trees.len(), n, n_features);
        Ok(Self { trees, n_features })
    }

    /// Mean positive fraction across trees.
    pub fn predict_proba(&self, sample: &[f64]) -> f64 {
        let total: f64 = self.trees.iter().map(|t| t.root.positive_fraction(sample)).sum();
        total / self.trees.len() as f64
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable() -> (Vec<Vec<f64>>, Vec<bool>) {
        let mut data = Vec::new();
        let mut labels = Vec::new();
        for i in 0..40 {
            let positive = i % 2 == 0;
            let signal = if positive { 5.0 + (i % 7) as f64 } else { (i % 5) as f64 };
            data.push(vec![signal, (i % 3) as f64, 1.0]);
            labels.push(positive);
        }
        (data, labels)
    }

    #[test]
    fn test_learns_separable_data() {
        let (data, labels) = separable();
        let params = ForestParams { n_trees: 25, ..ForestParams::default() };
        let forest = RandomForest::fit(&data, &labels, &params).unwrap();

        assert_eq!(forest.n_trees(), 25);
        assert_eq!(forest.n_features(), 3);
        assert!(forest.predict_proba(&[9.0, 0.0, 1.0]) > 0.7);
        assert!(forest.predict_proba(&[1.0, 0.0, 1.0]) < 0.3);
    }

    #[test]
    fn test_probabilities_stay_in_unit_interval() {
        let (data, labels) = separable();
        let forest = RandomForest::fit(&data, &labels, &ForestParams { n_trees: 10, ..Default::default() }).unwrap();
        for row in &data {
            let p = forest.predict_proba(row);
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn test_same_seed_same_forest() {
        let (data, labels) = separable();
        let params = ForestParams { n_trees: 8, ..Default::default() };
        let a = RandomForest::fit(&data, &labels, &params).unwrap();
        let b = RandomForest::fit(&data, &labels, &params).unwrap();
        for point in [[0.0, 0.0, 1.0], [4.5, 1.0, 1.0], [11.0, 2.0, 1.0]] {
            assert_eq!(a.predict_proba(&point), b.predict_proba(&point));
        }
    }

    #[test]
    fn test_single_class_predicts_that_class() {
        let data = vec![vec![1.0], vec![2.0], vec![3.0]];
        let labels = vec![true, true, true];
        let forest = RandomForest::fit(&data, &labels, &ForestParams { n_trees: 3, ..Default::default() }).unwrap();
        assert_eq!(forest.predict_proba(&[10.0]), 1.0);
    }

    #[test]
    fn test_zero_depth_is_a_single_leaf() {
        let data = vec![vec![0.0], vec![1.0], vec![2.0], vec![3.0]];
        let labels = vec![false, true, false, true];
        let params = ForestParams { n_trees: 1, max_depth: Some(0), ..Default::default() };
        let forest = RandomForest::fit(&data, &labels, &params).unwrap();
        assert_eq!(forest.predict_proba(&[0.0]), forest.predict_proba(&[3.0]));
    }

    #[test]
    fn test_rejects_bad_input() {
        let params = ForestParams::default();
        assert_eq!(RandomForest::fit(&[], &[], &params).unwrap_err(), ForestError::EmptyTrainingSet);
        assert_eq!(
            RandomForest::fit(&[vec![1.0]], &[true, false], &params).unwrap_err(),
            ForestError::LabelCountMismatch { rows: 1, labels: 2 }
        );
        assert_eq!(
            RandomForest::fit(&[vec![1.0, 2.0], vec![1.0]], &[true, false], &params).unwrap_err(),
            ForestError::RaggedRow { row: 1, expected: 2, found: 1 }
        );
        assert_eq!(
            RandomForest::fit(&[vec![1.0]], &[true], &ForestParams { n_trees: 0, ..Default::default() }).unwrap_err(),
            ForestError::NoTrees
        );
    }
}
