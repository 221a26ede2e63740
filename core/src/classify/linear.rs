use super::{balanced_weights, class_counts, sigmoid, Classifier};
use crate::error::{PipelineError, Result};
use crate::matrix::CsrMatrix;

#[derive(Debug, Clone, Copy)]
enum Loss {
    Logistic,
    SquaredHinge,
}

impl Loss {
    /// Derivative of the loss with respect to the margin `y * z`.
    fn slope(self, margin: f32) -> f32 {
        match self {
            Loss::Logistic => -sigmoid(-margin),
            Loss::SquaredHinge if margin < 1.0 => -2.0 * (1.0 - margin),
            Loss::SquaredHinge => 0.0,
        }
    }

    /// Upper bound of the second derivative.
    fn curvature(self) -> f32 {
        match self {
            Loss::Logistic => 0.25,
            Loss::SquaredHinge => 2.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct LinearModel {
    weights: Vec<f32>,
    bias: f32,
}

impl LinearModel {
    /// Full-batch gradient descent on the class-balanced mean loss plus an
    /// L2 penalty of `1 / (2 C n)`. The step is the inverse of the gradient's
    /// Lipschitz bound, so the objective decreases monotonically.
    fn train(x: &CsrMatrix, labels: &[u8], loss: Loss, c: f32, max_iter: usize, tol: f32) -> Result<Self> {
        let (neg, pos) = class_counts(x, labels)?;
        let (w_neg, w_pos) = balanced_weights(neg, pos);
        let n = labels.len() as f32;
        let lambda = 1.0 / (c * n);
        let max_norm_sq = x.rows().map(|r| r.norm().powi(2)).fold(0.0f32, f32::max);
        let step = 1.0 / (loss.curvature() * (max_norm_sq + 1.0) + lambda);

        let mut w = vec![0.0f32; x.n_cols()];
        let mut b = 0.0f32;
        let mut grad = vec![0.0f32; x.n_cols()];
        for iter in 0..max_iter {
            for (g, wi) in grad.iter_mut().zip(&w) {
                *g = lambda * wi;
            }
            let mut grad_b = 0.0f32;
            for (row, &label) in x.rows().zip(labels) {
                let (y, s) = if label > 0 { (1.0, w_pos) } else { (-1.0, w_neg) };
                let z = row.dot(&w) + b;
                let g = s * y * loss.slope(y * z) / n;
                if g != 0.0 {
                    for (col, v) in row.iter() {
                        grad[col as usize] += g * v;
                    }
                    grad_b += g;
                }
            }
            let grad_norm = (grad.iter().map(|g| g * g).sum::<f32>() + grad_b * grad_b).sqrt();
            if grad_norm < tol {
                tracing::trace!(iter, grad_norm, "linear model converged");
                break;
            }
            for (wi, g) in w.iter_mut().zip(&grad) {
                *wi -= step * g;
            }
            b -= step * grad_b;
        }
        Ok(Self { weights: w, bias: b })
    }

    fn decisions(&self, x: &CsrMatrix) -> Result<Vec<f32>> {
        if self.weights.is_empty() {
            return Err(PipelineError::NotFitted);
        }
        if x.n_cols() != self.weights.len() {
            return Err(PipelineError::ShapeMismatch(format!(
                "model has {} features, input has {}",
                self.weights.len(),
                x.n_cols()
            )));
        }
        Ok(x.rows().map(|r| r.dot(&self.weights) + self.bias).collect())
    }
}

/// Logistic regression with balanced class weights; predicts `P(relevant)`.
#[derive(Debug, Clone)]
pub struct LogisticRegression {
    pub c: f32,
    pub max_iter: usize,
    pub tol: f32,
    model: LinearModel,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self { c: 1.0, max_iter: 500, tol: 1e-5, model: LinearModel::default() }
    }
}

impl Classifier for LogisticRegression {
    fn fit(&mut self, features: &CsrMatrix, labels: &[u8]) -> Result<()> {
        self.model = LinearModel::train(features, labels, Loss::Logistic, self.c, self.max_iter, self.tol)?;
        Ok(())
    }

    fn predict(&self, features: &CsrMatrix) -> Result<Vec<f32>> {
        Ok(self.model.decisions(features)?.into_iter().map(sigmoid).collect())
    }
}

/// Linear SVM on the squared hinge loss with balanced class weights.
///
/// Decision values are mapped to probabilities with a sigmoid fitted on the
/// training decisions (Platt scaling).
#[derive(Debug, Clone)]
pub struct LinearSvm {
    pub c: f32,
    pub max_iter: usize,
    pub tol: f32,
    model: LinearModel,
    platt: (f32, f32),
}

impl Default for LinearSvm {
    fn default() -> Self {
        Self { c: 1.0, max_iter: 500, tol: 1e-5, model: LinearModel::default(), platt: (-1.0, 0.0) }
    }
}

impl Classifier for LinearSvm {
    fn fit(&mut self, features: &CsrMatrix, labels: &[u8]) -> Result<()> {
        self.model = LinearModel::train(features, labels, Loss::SquaredHinge, self.c, self.max_iter, self.tol)?;
        let decisions = self.model.decisions(features)?;
        self.platt = platt_scale(&decisions, labels);
        Ok(())
    }

    fn predict(&self, features: &CsrMatrix) -> Result<Vec<f32>> {
        let (a, b) = self.platt;
        Ok(self
            .model
            .decisions(features)?
            .into_iter()
            .map(|f| sigmoid(-(a * f + b)))
            .collect())
    }
}

/// Fits `P(y=1|f) = 1 / (1 + exp(A f + B))` by Newton's method with
/// backtracking, using Platt's smoothed targets. Returns `(A, B)`.
fn platt_scale(decisions: &[f32], labels: &[u8]) -> (f32, f32) {
    let pos = labels.iter().filter(|&&l| l > 0).count() as f64;
    let neg = labels.len() as f64 - pos;
    let (hi, lo) = ((pos + 1.0) / (pos + 2.0), 1.0 / (neg + 2.0));
    let data: Vec<(f64, f64)> = decisions
        .iter()
        .zip(labels)
        .map(|(&f, &l)| (f as f64, if l > 0 { hi } else { lo }))
        .collect();

    let objective = |a: f64, b: f64| -> f64 {
        data.iter()
            .map(|&(f, t)| {
                let u = a * f + b;
                if u >= 0.0 {
                    t * u + (-u).exp().ln_1p()
                } else {
                    (t - 1.0) * u + u.exp().ln_1p()
                }
            })
            .sum()
    };

    let (mut a, mut b) = (0.0f64, ((neg + 1.0) / (pos + 1.0)).ln());
    let mut value = objective(a, b);
    for _ in 0..100 {
        let (mut ga, mut gb, mut haa, mut hab, mut hbb) = (0.0, 0.0, 1e-12, 0.0, 1e-12);
        for &(f, t) in &data {
            let u = a * f + b;
            let p = if u >= 0.0 { (-u).exp() / (1.0 + (-u).exp()) } else { 1.0 / (1.0 + u.exp()) };
            let d = t - p;
            let q = p * (1.0 - p);
            ga += d * f;
            gb += d;
            haa += q * f * f;
            hab += q * f;
            hbb += q;
        }
        if ga.abs() < 1e-5 && gb.abs() < 1e-5 {
            break;
        }
        let det = haa * hbb - hab * hab;
        let da = -(hbb * ga - hab * gb) / det;
        let db = -(-hab * ga + haa * gb) / det;
        let mut scale = 1.0;
        while scale >= 1e-10 {
            let candidate = objective(a + scale * da, b + scale * db);
            if candidate < value + 1e-4 * scale * (ga * da + gb * db) {
                a += scale * da;
                b += scale * db;
                value = candidate;
                break;
            }
            scale /= 2.0;
        }
        if scale < 1e-10 {
            break;
        }
    }
    (a as f32, b as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::tests::{held_out, separable};

    #[test]
    fn logistic_probabilities_follow_the_labels() {
        let (x, y) = separable();
        let mut lr = LogisticRegression::default();
        lr.fit(&x, &y).unwrap();
        let train = lr.predict(&x).unwrap();
        for (p, &l) in train.iter().zip(&y) {
            if l > 0 {
                assert!(*p > 0.5, "{train:?}");
            } else {
                assert!(*p < 0.5, "{train:?}");
            }
        }
    }

    #[test]
    fn svm_outputs_are_probabilities() {
        let (x, y) = separable();
        let mut svm = LinearSvm::default();
        svm.fit(&x, &y).unwrap();
        let scores = svm.predict(&held_out()).unwrap();
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn predict_before_fit_fails() {
        let lr = LogisticRegression::default();
        assert!(matches!(lr.predict(&held_out()), Err(PipelineError::NotFitted)));
    }

    #[test]
    fn feature_width_must_match() {
        let (x, y) = separable();
        let mut lr = LogisticRegression::default();
        lr.fit(&x, &y).unwrap();
        let wide = CsrMatrix::zeros(1, 9);
        assert!(matches!(lr.predict(&wide), Err(PipelineError::ShapeMismatch(_))));
    }
}
