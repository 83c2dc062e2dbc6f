//! Random forest binary classifier.
//!
//! Gini-split decision trees over bootstrap samples, with a random feature
//! subset per split. All randomness is seeded so a given config and training
//! table always produce the same forest.

use anyhow::{bail, Result};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Random forest configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestConfig {
    /// Number of trees in the forest
    pub n_trees: usize,
    /// Maximum depth of each tree
    pub max_depth: usize,
    /// Minimum samples to split
    pub min_samples_split: usize,
    /// Minimum samples in leaf
    pub min_samples_leaf: usize,
    /// Max features per split (ceil(sqrt(n_features)) if None)
    pub max_features: Option<usize>,
    /// Bootstrap sampling
    pub bootstrap: bool,
    /// Random seed
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 12,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            bootstrap: true,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        /// Fraction of positive samples that reached this leaf
        probability: f64,
        n_samples: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn probability(&self, sample: ArrayView1<'_, f64>) -> f64 {
        let mut node = self;
        loop {
            match node {
                Node::Leaf { probability, .. } => return *probability,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if sample[*feature] <= *threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }

    fn depth(&self) -> usize {
        match self {
            Node::Leaf { .. } => 1,
            Node::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

fn gini(positives: usize, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = positives as f64 / n as f64;
    2.0 * p * (1.0 - p)
}

/// Single decision tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    root: Node,
}

struct TreeBuilder<'a> {
    x: ArrayView2<'a, f64>,
    y: ArrayView1<'a, f64>,
    max_depth: usize,
    min_samples_split: usize,
    min_samples_leaf: usize,
    max_features: usize,
}

impl TreeBuilder<'_> {
    fn build(&self, indices: Vec<usize>, depth: usize, rng: &mut ChaCha8Rng) -> Node {
        let n = indices.len();
        let positives = indices.iter().filter(|&&i| self.y[i] > 0.5).count();
        let leaf = Node::Leaf {
            probability: if n == 0 { 0.0 } else { positives as f64 / n as f64 },
            n_samples: n,
        };

        if depth >= self.max_depth
            || n < self.min_samples_split
            || positives == 0
            || positives == n
        {
            return leaf;
        }

        let split = match self.best_split(&indices, positives, rng) {
            Some(split) => split,
            None => return leaf,
        };

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| self.x[[i, split.feature]] <= split.threshold);

        Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: Box::new(self.build(left, depth + 1, rng)),
            right: Box::new(self.build(right, depth + 1, rng)),
        }
    }

    /// Scan sorted values of a random feature subset for the best Gini gain
    fn best_split(
        &self,
        indices: &[usize],
        positives: usize,
        rng: &mut ChaCha8Rng,
    ) -> Option<SplitCandidate> {
        let n = indices.len();
        let parent = gini(positives, n);

        let mut features: Vec<usize> = (0..self.x.ncols()).collect();
        features.shuffle(rng);

        // Constant features do not count towards max_features
        let mut visited = 0;
        let mut best: Option<SplitCandidate> = None;
        for &feature in &features {
            if visited >= self.max_features {
                break;
            }

            let mut column: Vec<(f64, bool)> = indices
                .iter()
                .map(|&i| (self.x[[i, feature]], self.y[i] > 0.5))
                .collect();
            column.sort_by(|a, b| a.0.total_cmp(&b.0));
            if column[0].0 == column[n - 1].0 {
                continue;
            }
            visited += 1;

            let mut left_positives = 0;
            for k in 0..n - 1 {
                if column[k].1 {
                    left_positives += 1;
                }
                if column[k].0 == column[k + 1].0 {
                    continue;
                }

                let n_left = k + 1;
                let n_right = n - n_left;
                if n_left < self.min_samples_leaf || n_right < self.min_samples_leaf {
                    continue;
                }

                let weighted = (n_left as f64 * gini(left_positives, n_left)
                    + n_right as f64 * gini(positives - left_positives, n_right))
                    / n as f64;
                let gain = parent - weighted;

                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: (column[k].0 + column[k + 1].0) / 2.0,
                        gain,
                    });
                }
            }
        }
        best
    }
}

/// Random forest model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    config: ForestConfig,
    feature_names: Vec<String>,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Create an unfitted forest
    pub fn new(config: ForestConfig) -> Self {
        Self {
            config,
            feature_names: Vec::new(),
            trees: Vec::new(),
        }
    }

    /// Fit on a feature matrix and 0/1 labels
    pub fn fit<'a>(
        &mut self,
        x: ArrayView2<'a, f64>,
        y: ArrayView1<'a, f64>,
        feature_names: &[&str],
    ) -> Result<()> {
        let (n_samples, n_features) = x.dim();
        if n_samples == 0 {
            bail!("Cannot fit a forest on an empty table");
        }
        if y.len() != n_samples {
            bail!("Got {} labels for {} samples", y.len(), n_samples);
        }
        if feature_names.len() != n_features {
            bail!(
                "Got {} feature names for {} columns",
                feature_names.len(),
                n_features
            );
        }

        let max_features = self
            .config
            .max_features
            .unwrap_or_else(|| (n_features as f64).sqrt().ceil() as usize)
            .clamp(1, n_features.max(1));

        let builder = TreeBuilder {
            x,
            y,
            max_depth: self.config.max_depth,
            min_samples_split: self.config.min_samples_split.max(2),
            min_samples_leaf: self.config.min_samples_leaf.max(1),
            max_features,
        };

        self.trees = (0..self.config.n_trees)
            .map(|i| {
                let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed.wrapping_add(i as u64));
                let indices: Vec<usize> = if self.config.bootstrap {
                    (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect()
                } else {
                    (0..n_samples).collect()
                };
                DecisionTree {
                    root: builder.build(indices, 0, &mut rng),
                }
            })
            .collect();
        self.feature_names = feature_names.iter().map(|s| s.to_string()).collect();

        Ok(())
    }

    /// Positive-class probability for each row
    pub fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        x.rows()
            .into_iter()
            .map(|row| self.predict_proba_one(row))
            .collect()
    }

    /// Positive-class probability for one sample
    pub fn predict_proba_one(&self, sample: ArrayView1<'_, f64>) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let total: f64 = self.trees.iter().map(|t| t.root.probability(sample)).sum();
        total / self.trees.len() as f64
    }

    /// Hard 0/1 predictions at the 0.5 threshold
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        self.predict_proba(x)
            .mapv(|p| if p > 0.5 { 1.0 } else { 0.0 })
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Depth of the deepest tree
    pub fn max_tree_depth(&self) -> usize {
        self.trees.iter().map(|t| t.root.depth()).max().unwrap_or(0)
    }
}
