//! Building blocks of the cross-collection relevance feedback pipeline:
//! TF-IDF archives are streamed into identifier indices and row-normalized
//! sparse feature matrices, per-topic classifiers are trained on judged
//! documents, and a base run is reranked by interpolating its scores with
//! the classifier's.

pub mod archive;
pub mod classify;
pub mod config;
pub mod error;
pub mod ids;
pub mod matrix;
pub mod normalize;
pub mod persist;
pub mod terms;
pub mod trec;

pub use error::{PipelineError, Result};
pub use ids::{DocIndex, IdIndex, Idx, VocabIndex};
pub use matrix::{CsrMatrix, DuplicatePolicy, TfIdfEntry};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One topic's judged rows and their labels, aligned by position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicTrainingSet {
    pub features: CsrMatrix,
    pub labels: Vec<u8>,
}

impl TopicTrainingSet {
    /// Slices `matrix` at the labeled rows, in label order.
    pub fn from_labels(matrix: &CsrMatrix, labels: &IndexMap<Idx, u8>) -> Result<Self> {
        let rows: Vec<Idx> = labels.keys().copied().collect();
        Ok(Self {
            features: matrix.select_rows(&rows)?,
            labels: labels.values().copied().collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|&&l| l > 0).count()
    }
}
