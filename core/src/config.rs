//! JSON configuration for a full pipeline run.
//!
//! ```json
//! {
//!   "working_directory": "ccrf.core18",
//!   "topics": ["321", "336"],
//!   "sources": [
//!     {"name": "robust04", "qrels": "qrels.robust04.txt", "tfidf": "docids.robust04.docvector.TF_IDF.tar.gz"}
//!   ],
//!   "target": {"name": "core18", "run": "run.core18.bm25+rm3.txt", "tfidf": "docids.core18.docvector.TF_IDF.tar.gz"},
//!   "classifiers": ["lr", "svm", "lgb"]
//! }
//! ```

use crate::classify::ClassifierKind;
use crate::error::{PipelineError, Result};
use crate::matrix::DuplicatePolicy;
use crate::trec::TopicSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Mixing weights written when none are configured: 0.0, 0.1, ..., 1.0.
pub fn default_alphas() -> Vec<f32> {
    (0..=10).map(|i| i as f32 / 10.0).collect()
}

pub fn default_limit() -> usize {
    10_000
}

/// A judged collection whose documents train the per-topic classifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub qrels: PathBuf,
    pub tfidf: PathBuf,
}

/// The collection whose base run is reranked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub run: PathBuf,
    pub tfidf: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub working_directory: PathBuf,
    pub topics: Vec<String>,
    pub sources: Vec<SourceConfig>,
    pub target: TargetConfig,
    pub classifiers: Vec<ClassifierKind>,
    #[serde(default = "default_alphas")]
    pub alphas: Vec<f32>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub only_alpha: bool,
    #[serde(default)]
    pub duplicates: DuplicatePolicy,
}

impl PipelineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.topics.is_empty() {
            return Err(PipelineError::Config("no topics configured".into()));
        }
        if self.sources.is_empty() {
            return Err(PipelineError::Config("no training sources configured".into()));
        }
        if self.classifiers.is_empty() {
            return Err(PipelineError::Config("no classifiers configured".into()));
        }
        if let Some(a) = self.alphas.iter().find(|a| !(0.0..=1.0).contains(*a)) {
            return Err(PipelineError::Config(format!("alpha {a} outside [0, 1]")));
        }
        Ok(())
    }

    pub fn topic_set(&self) -> TopicSet {
        TopicSet::new(self.topics.iter().cloned())
    }
}
