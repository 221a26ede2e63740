//! Per-topic binary relevance classifiers over sparse TF-IDF rows.
//!
//! Every model is deterministic: training visits rows in a fixed order and
//! uses no random initialisation, so two runs over the same features produce
//! identical scores.

mod gbt;
mod linear;

pub use gbt::{GradientBoosting, GbtParams};
pub use linear::{LinearSvm, LogisticRegression};

use crate::error::{PipelineError, Result};
use crate::matrix::CsrMatrix;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A model that learns from labeled rows and scores unseen rows.
pub trait Classifier: Send {
    fn fit(&mut self, features: &CsrMatrix, labels: &[u8]) -> Result<()>;

    /// Score of the relevant class for every row of `features`, higher is more relevant.
    fn predict(&self, features: &CsrMatrix) -> Result<Vec<f32>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    /// L2-regularized logistic regression with balanced class weights.
    Lr,
    /// Linear SVM (squared hinge, balanced) with Platt-scaled outputs.
    Svm,
    /// Gradient-boosted regression trees on the binary log-loss.
    Lgb,
}

impl ClassifierKind {
    pub const ALL: [ClassifierKind; 3] = [ClassifierKind::Lr, ClassifierKind::Svm, ClassifierKind::Lgb];

    pub fn build(self) -> Box<dyn Classifier> {
        match self {
            ClassifierKind::Lr => Box::new(LogisticRegression::default()),
            ClassifierKind::Svm => Box::new(LinearSvm::default()),
            ClassifierKind::Lgb => Box::new(GradientBoosting::default()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClassifierKind::Lr => "lr",
            ClassifierKind::Svm => "svm",
            ClassifierKind::Lgb => "lgb",
        }
    }
}

impl fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassifierKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lr" => Ok(ClassifierKind::Lr),
            "svm" => Ok(ClassifierKind::Svm),
            "lgb" => Ok(ClassifierKind::Lgb),
            other => Err(PipelineError::Config(format!("unknown classifier {other:?}; expected lr, svm or lgb"))),
        }
    }
}

/// Fits a fresh `kind` model on one topic's rows and scores `candidates`.
pub fn score_topic(kind: ClassifierKind, train: &CsrMatrix, labels: &[u8], candidates: &CsrMatrix) -> Result<Vec<f32>> {
    let mut model = kind.build();
    model.fit(train, labels)?;
    model.predict(candidates)
}

/// Counts `(negatives, positives)`, rejecting empty and single-class label sets.
pub(crate) fn class_counts(features: &CsrMatrix, labels: &[u8]) -> Result<(usize, usize)> {
    if features.n_rows() != labels.len() {
        return Err(PipelineError::ShapeMismatch(format!(
            "{} feature rows for {} labels",
            features.n_rows(),
            labels.len()
        )));
    }
    if labels.is_empty() {
        return Err(PipelineError::EmptyTrainingSet);
    }
    let pos = labels.iter().filter(|&&l| l > 0).count();
    let neg = labels.len() - pos;
    if pos == 0 || neg == 0 {
        return Err(PipelineError::DegenerateTrainingSet { label: u8::from(pos > 0), rows: labels.len() });
    }
    Ok((neg, pos))
}

/// Balanced sample weights `n / (2 * n_class)` for `(negative, positive)` rows.
pub(crate) fn balanced_weights(neg: usize, pos: usize) -> (f32, f32) {
    let n = (neg + pos) as f32;
    (n / (2.0 * neg as f32), n / (2.0 * pos as f32))
}

pub(crate) fn sigmoid(z: f32) -> f32 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}
