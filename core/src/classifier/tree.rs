//! CART tree shared by the bagged and boosted ensembles.
//!
//! Every sample carries two additive statistics (a, b). The criterion
//! turns their sums into a node score; a split is worth
//! score(left) + score(right) - score(parent).
//!
//!   Gini:   a = w*y, b = w   score = (a^2 + (b-a)^2) / b   leaf = a / b
//!   Newton: a = g,   b = h   score = a^2 / (b + lambda)    leaf = -a / (b + lambda)

use crate::rng::StageRng;
use serde::{Deserialize, Serialize};

const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, Copy)]
pub(crate) enum Criterion {
    Gini,
    Newton { lambda: f64, min_child_weight: f64 },
}

impl Criterion {
    fn score(&self, a: f64, b: f64) -> f64 {
        match *self {
            Criterion::Gini if b > 0.0 => (a * a + (b - a) * (b - a)) / b,
            Criterion::Gini => 0.0,
            Criterion::Newton { lambda, .. } => a * a / (b + lambda),
        }
    }

    fn leaf(&self, a: f64, b: f64) -> f64 {
        match *self {
            Criterion::Gini if b > 0.0 => a / b,
            Criterion::Gini => 0.0,
            Criterion::Newton { lambda, .. } => -a / (b + lambda),
        }
    }

    fn child_ok(&self, count: usize, b: f64) -> bool {
        match *self {
            Criterion::Gini => count > 0,
            Criterion::Newton { min_child_weight, .. } => count > 0 && b >= min_child_weight,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    /// Features considered per split; all when None.
    pub max_features: Option<usize>,
    pub criterion: Criterion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub(crate) enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct DecisionTree {
    nodes: Vec<TreeNode>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct Builder<'a> {
    rows: &'a [Vec<f64>],
    a: &'a [f64],
    b: &'a [f64],
    params: TreeParams,
    nodes: Vec<TreeNode>,
}

impl DecisionTree {
    /// Grow a tree over `samples` (indices into `rows`, repeats allowed).
    pub(crate) fn fit(
        rows: &[Vec<f64>],
        a: &[f64],
        b: &[f64],
        samples: Vec<usize>,
        params: TreeParams,
        rng: &mut StageRng,
    ) -> Self {
        let mut builder = Builder { rows, a, b, params, nodes: Vec::new() };
        builder.grow(samples, 0, rng);
        Self { nodes: builder.nodes }
    }

    pub(crate) fn predict(&self, x: &[f64]) -> f64 {
        let mut node = 0;
        loop {
            match &self.nodes[node] {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split { feature, threshold, left, right } => {
                    let v = x.get(*feature).copied().unwrap_or(0.0);
                    node = if v <= *threshold { *left } else { *right };
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], id: usize) -> usize {
            match &nodes[id] {
                TreeNode::Leaf { .. } => 0,
                TreeNode::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

impl Builder<'_> {
    fn sums(&self, samples: &[usize]) -> (f64, f64) {
        samples.iter().fold((0.0, 0.0), |(sa, sb), &i| (sa + self.a[i], sb + self.b[i]))
    }

    fn grow(&mut self, samples: Vec<usize>, depth: usize, rng: &mut StageRng) -> usize {
        let (sa, sb) = self.sums(&samples);
        let id = self.nodes.len();
        self.nodes.push(TreeNode::Leaf { value: self.params.criterion.leaf(sa, sb) });

        if depth >= self.params.max_depth || samples.len() < self.params.min_samples_split.max(2) {
            return id;
        }
        let Some(best) = self.best_split(&samples, sa, sb, rng) else {
            return id;
        };

        let (left_samples, right_samples): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&i| self.rows[i][best.feature] <= best.threshold);

        let left = self.grow(left_samples, depth + 1, rng);
        let right = self.grow(right_samples, depth + 1, rng);
        self.nodes[id] = TreeNode::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        id
    }

    fn candidate_features(&self, rng: &mut StageRng) -> Vec<usize> {
        let n = self.rows[0].len();
        match self.params.max_features {
            Some(k) if k < n => {
                let mut picked = rng.sample_indices(n, k.max(1));
                picked.sort_unstable();
                picked
            }
            _ => (0..n).collect(),
        }
    }

    fn best_split(&self, samples: &[usize], sa: f64, sb: f64, rng: &mut StageRng) -> Option<BestSplit> {
        let criterion = self.params.criterion;
        let parent = criterion.score(sa, sb);
        let mut best: Option<BestSplit> = None;
        let mut order: Vec<usize> = samples.to_vec();

        for feature in self.candidate_features(rng) {
            order.sort_by(|&x, &y| self.rows[x][feature].total_cmp(&self.rows[y][feature]));

            let (mut la, mut lb) = (0.0, 0.0);
            for k in 0..order.len() - 1 {
                let i = order[k];
                la += self.a[i];
                lb += self.b[i];

                let here = self.rows[i][feature];
                let next = self.rows[order[k + 1]][feature];
                if next <= here {
                    continue;
                }
                let (ra, rb) = (sa - la, sb - lb);
                if !criterion.child_ok(k + 1, lb) || !criterion.child_ok(order.len() - k - 1, rb) {
                    continue;
                }
                let gain = criterion.score(la, lb) + criterion.score(ra, rb) - parent;
                if gain > MIN_GAIN && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(BestSplit {
                        feature,
                        threshold: here + (next - here) / 2.0,
                        gain,
                    });
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gini_params(max_depth: usize) -> TreeParams {
        TreeParams {
            max_depth,
            min_samples_split: 2,
            max_features: None,
            criterion: Criterion::Gini,
        }
    }

    #[test]
    fn separable_data_gives_pure_leaves() {
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let a: Vec<f64> = (0..10).map(|i| if i >= 6 { 1.0 } else { 0.0 }).collect();
        let b = vec![1.0; 10];
        let mut rng = StageRng::new(1, 1);
        let tree = DecisionTree::fit(&rows, &a, &b, (0..10).collect(), gini_params(4), &mut rng);

        assert_eq!(tree.predict(&[2.0]), 0.0);
        assert_eq!(tree.predict(&[8.0]), 1.0);
        assert_eq!(tree.depth(), 1);
    }

    #[test]
    fn depth_limit_is_respected() {
        let rows: Vec<Vec<f64>> = (0..64).map(|i| vec![i as f64]).collect();
        let a: Vec<f64> = (0..64).map(|i| (i % 2) as f64).collect();
        let b = vec![1.0; 64];
        let mut rng = StageRng::new(1, 1);
        let tree = DecisionTree::fit(&rows, &a, &b, (0..64).collect(), gini_params(3), &mut rng);
        assert!(tree.depth() <= 3);
    }

    #[test]
    fn newton_leaf_is_regularised_mean_gradient() {
        let rows = vec![vec![0.0], vec![0.0]];
        let g = vec![-0.5, -0.5];
        let h = vec![0.25, 0.25];
        let params = TreeParams {
            max_depth: 3,
            min_samples_split: 2,
            max_features: None,
            criterion: Criterion::Newton { lambda: 1.0, min_child_weight: 0.0 },
        };
        let mut rng = StageRng::new(1, 1);
        let tree = DecisionTree::fit(&rows, &g, &h, vec![0, 1], params, &mut rng);
        // -(-1.0) / (0.5 + 1.0)
        assert!((tree.predict(&[0.0]) - 1.0 / 1.5).abs() < 1e-12);
    }
}
