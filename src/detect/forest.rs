//! Isolation forest (Liu, Ting & Zhou, 2008).
//!
//! Points that are easy to separate from the rest by random axis-aligned
//! cuts sit at shallow depths in randomly grown trees. The average depth
//! across trees, normalized by the expected depth of an unsuccessful BST
//! search, gives an anomaly score in `(0, 1]`; higher is more anomalous.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Forest shape and randomness.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    /// Number of trees
    pub n_trees: usize,
    /// Rows drawn (without replacement) to grow each tree
    pub max_samples: usize,
    /// Seed for tree sampling and cut selection
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_samples: 256,
            seed: 42,
        }
    }
}

#[derive(Debug)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug)]
pub struct IsolationForest {
    trees: Vec<Node>,
    sample_size: usize,
}

impl IsolationForest {
    /// Grow a forest on `data` (rows of equal width). Identical data and
    /// params always produce an identical forest.
    pub fn fit(data: &[Vec<f64>], params: &ForestParams) -> Self {
        let n = data.len();
        if n == 0 {
            return Self {
                trees: Vec::new(),
                sample_size: 0,
            };
        }
        let sample_size = params.max_samples.min(n).max(1);
        let height_limit = (sample_size as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(params.seed);

        let trees = (0..params.n_trees)
            .map(|_| {
                let rows = index::sample(&mut rng, n, sample_size).into_vec();
                grow(data, rows, 0, height_limit, &mut rng)
            })
            .collect();

        Self { trees, sample_size }
    }

    /// Mean isolation depth of `row` across the forest.
    pub fn mean_path_length(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let total: f64 = self.trees.iter().map(|t| path_length(t, row, 0)).sum();
        total / self.trees.len() as f64
    }

    /// Anomaly score `2^(-E[h(x)] / c(psi))` in `(0, 1]`.
    pub fn anomaly_score(&self, row: &[f64]) -> f64 {
        let norm = average_path_length(self.sample_size);
        if norm == 0.0 {
            return 0.5;
        }
        2f64.powf(-self.mean_path_length(row) / norm)
    }
}

fn grow(data: &[Vec<f64>], rows: Vec<usize>, depth: usize, limit: usize, rng: &mut StdRng) -> Node {
    if depth >= limit || rows.len() <= 1 {
        return Node::Leaf { size: rows.len() };
    }

    let width = data[rows[0]].len();
    let candidates: Vec<(usize, f64, f64)> = (0..width)
        .filter_map(|feature| {
            let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                let x = data[r][feature];
                (lo.min(x), hi.max(x))
            });
            (hi > lo).then_some((feature, lo, hi))
        })
        .collect();

    // Every remaining row is identical on every feature.
    if candidates.is_empty() {
        return Node::Leaf { size: rows.len() };
    }

    let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
    let threshold = cut_point(lo, hi, rng.gen::<f64>());
    let (left, right): (Vec<usize>, Vec<usize>) =
        rows.into_iter().partition(|&r| data[r][feature] <= threshold);

    Node::Split {
        feature,
        threshold,
        left: Box::new(grow(data, left, depth + 1, limit, rng)),
        right: Box::new(grow(data, right, depth + 1, limit, rng)),
    }
}

/// Cut at fraction `u` of `[lo, hi)`. The span is taken in halves so that
/// columns reaching across most of the f64 range do not overflow.
fn cut_point(lo: f64, hi: f64, u: f64) -> f64 {
    let step = u * (hi / 2.0 - lo / 2.0);
    let cut = lo + step + step;
    if cut >= lo && cut < hi {
        cut
    } else {
        lo
    }
}

fn path_length(node: &Node, row: &[f64], depth: usize) -> f64 {
    match node {
        Node::Leaf { size } => depth as f64 + average_path_length(*size),
        Node::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            let next = if row[*feature] <= *threshold { left } else { right };
            path_length(next, row, depth + 1)
        }
    }
}

/// Expected path length of an unsuccessful search in a BST of `n` nodes.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}
