use super::{balanced_weights, class_counts, sigmoid, Classifier};
use crate::error::{PipelineError, Result};
use crate::ids::Idx;
use crate::matrix::{CsrMatrix, SparseRow};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct GbtParams {
    pub num_iterations: usize,
    pub num_leaves: usize,
    pub max_depth: usize,
    pub learning_rate: f32,
    pub min_data_in_leaf: usize,
    pub min_sum_hessian: f64,
    pub lambda_l2: f64,
    pub min_gain_to_split: f64,
}

impl Default for GbtParams {
    fn default() -> Self {
        Self {
            num_iterations: 100,
            num_leaves: 15,
            max_depth: 5,
            learning_rate: 0.1,
            min_data_in_leaf: 20,
            min_sum_hessian: 1e-3,
            lambda_l2: 0.0,
            min_gain_to_split: 1e-9,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Node {
    Leaf(f32),
    Split { feature: Idx, threshold: f32, left: usize, right: usize },
}

#[derive(Debug, Clone, Default)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict(&self, row: &SparseRow<'_>) -> f32 {
        let mut i = 0;
        loop {
            match self.nodes[i] {
                Node::Leaf(v) => return v,
                Node::Split { feature, threshold, left, right } => {
                    i = if row.get(feature) <= threshold { left } else { right };
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Split {
    feature: Idx,
    threshold: f32,
    gain: f64,
}

struct Leaf {
    node: usize,
    depth: usize,
    samples: Vec<usize>,
    split: Option<Split>,
}

/// Gradient-boosted regression trees on the weighted binary log-loss.
///
/// Trees grow leaf-wise: the leaf with the largest gain is split next until
/// `num_leaves` is reached or no split clears `min_gain_to_split`. A sample
/// whose feature is absent takes the value 0.
#[derive(Debug, Clone, Default)]
pub struct GradientBoosting {
    pub params: GbtParams,
    init_score: f32,
    trees: Vec<Tree>,
    n_cols: usize,
}

impl GradientBoosting {
    pub fn new(params: GbtParams) -> Self {
        Self { params, ..Default::default() }
    }

    fn raw_score(&self, row: &SparseRow<'_>) -> f32 {
        self.init_score + self.trees.iter().map(|t| t.predict(row)).sum::<f32>()
    }

    fn grow_tree(&self, x: &CsrMatrix, grad: &[f64], hess: &[f64]) -> Tree {
        let p = &self.params;
        let mut tree = Tree { nodes: vec![Node::Leaf(0.0)] };
        let root: Vec<usize> = (0..x.n_rows()).collect();
        let split = self.best_split(x, &root, grad, hess);
        let mut leaves = vec![Leaf { node: 0, depth: 0, samples: root, split }];

        while leaves.len() < p.num_leaves.max(1) {
            let best = leaves
                .iter()
                .enumerate()
                .filter_map(|(i, l)| l.split.map(|s| (i, s.gain)))
                .fold(None, |acc: Option<(usize, f64)>, (i, g)| match acc {
                    Some((_, best)) if best >= g => acc,
                    _ => Some((i, g)),
                });
            let Some((which, _)) = best else { break };
            let leaf = leaves.swap_remove(which);
            let Some(split) = leaf.split else { break };

            let (left, right): (Vec<usize>, Vec<usize>) = leaf
                .samples
                .iter()
                .partition(|&&s| x.row(s).get(split.feature) <= split.threshold);
            let (l_node, r_node) = (tree.nodes.len(), tree.nodes.len() + 1);
            tree.nodes.push(Node::Leaf(0.0));
            tree.nodes.push(Node::Leaf(0.0));
            tree.nodes[leaf.node] = Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left: l_node,
                right: r_node,
            };
            for (node, samples) in [(l_node, left), (r_node, right)] {
                let depth = leaf.depth + 1;
                let split = if depth < p.max_depth { self.best_split(x, &samples, grad, hess) } else { None };
                leaves.push(Leaf { node, depth, samples, split });
            }
        }

        for leaf in leaves {
            let g: f64 = leaf.samples.iter().map(|&s| grad[s]).sum();
            let h: f64 = leaf.samples.iter().map(|&s| hess[s]).sum();
            let value = -g / (h + p.lambda_l2).max(1e-12) * p.learning_rate as f64;
            tree.nodes[leaf.node] = Node::Leaf(value as f32);
        }
        tree
    }

    fn best_split(&self, x: &CsrMatrix, samples: &[usize], grad: &[f64], hess: &[f64]) -> Option<Split> {
        let p = &self.params;
        if samples.len() < 2 * p.min_data_in_leaf.max(1) {
            return None;
        }
        let g_total: f64 = samples.iter().map(|&s| grad[s]).sum();
        let h_total: f64 = samples.iter().map(|&s| hess[s]).sum();
        let parent = g_total * g_total / (h_total + p.lambda_l2);

        // Feature -> (value, sample) for the samples where it is non-zero.
        let mut columns: BTreeMap<Idx, Vec<(f32, usize)>> = BTreeMap::new();
        for &s in samples {
            for (col, v) in x.row(s).iter() {
                columns.entry(col).or_default().push((v, s));
            }
        }

        let mut best: Option<Split> = None;
        for (feature, mut present) in columns {
            // (value, grad, hess, count) buckets with the absent samples folded in at 0.
            let (mut g_nz, mut h_nz) = (0.0, 0.0);
            for &(_, s) in &present {
                g_nz += grad[s];
                h_nz += hess[s];
            }
            let zeros = samples.len() - present.len();
            present.sort_by(|a, b| a.0.total_cmp(&b.0));
            let mut buckets: Vec<(f32, f64, f64, usize)> =
                present.iter().map(|&(v, s)| (v, grad[s], hess[s], 1)).collect();
            if zeros > 0 {
                let at = buckets.partition_point(|b| b.0 < 0.0);
                buckets.insert(at, (0.0, g_total - g_nz, h_total - h_nz, zeros));
            }

            let (mut gl, mut hl, mut nl) = (0.0, 0.0, 0usize);
            for k in 0..buckets.len() - 1 {
                let (v, g, h, c) = buckets[k];
                gl += g;
                hl += h;
                nl += c;
                let next = buckets[k + 1].0;
                if next <= v {
                    continue;
                }
                let (gr, hr, nr) = (g_total - gl, h_total - hl, samples.len() - nl);
                if nl < p.min_data_in_leaf || nr < p.min_data_in_leaf {
                    continue;
                }
                if hl < p.min_sum_hessian || hr < p.min_sum_hessian {
                    continue;
                }
                let gain = gl * gl / (hl + p.lambda_l2) + gr * gr / (hr + p.lambda_l2) - parent;
                if gain > p.min_gain_to_split && best.map_or(true, |b| gain > b.gain) {
                    best = Some(Split { feature, threshold: (v + next) / 2.0, gain });
                }
            }
        }
        best
    }
}

impl Classifier for GradientBoosting {
    fn fit(&mut self, features: &CsrMatrix, labels: &[u8]) -> Result<()> {
        let (neg, pos) = class_counts(features, labels)?;
        let (w_neg, w_pos) = balanced_weights(neg, pos);
        let weights: Vec<f64> = labels
            .iter()
            .map(|&l| if l > 0 { w_pos as f64 } else { w_neg as f64 })
            .collect();
        let mass_pos = pos as f64 * w_pos as f64;
        let mass_neg = neg as f64 * w_neg as f64;

        self.n_cols = features.n_cols();
        self.init_score = (mass_pos / mass_neg).ln() as f32;
        self.trees.clear();

        let mut scores = vec![self.init_score; features.n_rows()];
        let mut grad = vec![0.0f64; features.n_rows()];
        let mut hess = vec![0.0f64; features.n_rows()];
        for _ in 0..self.params.num_iterations {
            for i in 0..labels.len() {
                let p = sigmoid(scores[i]) as f64;
                let y = if labels[i] > 0 { 1.0 } else { 0.0 };
                grad[i] = weights[i] * (p - y);
                hess[i] = weights[i] * p * (1.0 - p);
            }
            let tree = self.grow_tree(features, &grad, &hess);
            for (i, row) in features.rows().enumerate() {
                scores[i] += tree.predict(&row);
            }
            self.trees.push(tree);
        }
        Ok(())
    }

    fn predict(&self, features: &CsrMatrix) -> Result<Vec<f32>> {
        if self.n_cols == 0 {
            return Err(PipelineError::NotFitted);
        }
        if features.n_cols() != self.n_cols {
            return Err(PipelineError::ShapeMismatch(format!(
                "model has {} features, input has {}",
                self.n_cols,
                features.n_cols()
            )));
        }
        Ok(features.rows().map(|r| sigmoid(self.raw_score(&r))).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::tests::separable;

    fn small() -> GbtParams {
        GbtParams { num_iterations: 20, min_data_in_leaf: 1, ..GbtParams::default() }
    }

    #[test]
    fn boosting_separates_training_rows() {
        let (x, y) = separable();
        let mut gbt = GradientBoosting::new(small());
        gbt.fit(&x, &y).unwrap();
        let scores = gbt.predict(&x).unwrap();
        let score_of = |label: u8| scores.iter().zip(&y).filter(move |p| *p.1 == label).map(|p| *p.0);
        let min_pos = score_of(1).fold(f32::MAX, f32::min);
        let max_neg = score_of(0).fold(f32::MIN, f32::max);
        assert!(min_pos > max_neg, "{scores:?}");
    }

    #[test]
    fn default_leaf_size_on_tiny_sets_gives_constant_scores() {
        let (x, y) = separable();
        let mut gbt = GradientBoosting::default();
        gbt.fit(&x, &y).unwrap();
        let scores = gbt.predict(&x).unwrap();
        assert!(scores.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn trees_are_deterministic() {
        let (x, y) = separable();
        let mut a = GradientBoosting::new(small());
        let mut b = GradientBoosting::new(small());
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
    }
}
