use crate::error::Result;
use crate::ids::{DocIndex, VocabIndex};
use crate::matrix::CsrMatrix;
use crate::TopicTrainingSet;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildMeta {
    pub num_docs: usize,
    pub num_terms: usize,
    pub num_topics: usize,
    pub nnz: usize,
    pub created_at: String,
    pub version: u32,
}

/// File layout of a working directory shared by the build and rerank phases.
#[derive(Debug, Clone)]
pub struct WorkPaths {
    pub root: PathBuf,
}

impl WorkPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn train_doc_index(&self) -> PathBuf { self.root.join("train-docid-idx.bin") }
    pub fn vocab(&self) -> PathBuf { self.root.join("vocab-idx.bin") }
    pub fn features_dir(&self) -> PathBuf { self.root.join("features") }
    pub fn topic_features(&self, topic: &str) -> PathBuf { self.features_dir().join(format!("{topic}.bin")) }
    pub fn train_meta(&self) -> PathBuf { self.root.join("train-meta.json") }
    pub fn test_doc_index(&self) -> PathBuf { self.root.join("test-docid-idx.bin") }
    pub fn test_matrix(&self) -> PathBuf { self.root.join("test.bin") }
    pub fn test_meta(&self) -> PathBuf { self.root.join("test-meta.json") }
    pub fn models_dir(&self) -> PathBuf { self.root.join("models") }
}

fn save_bin<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    let mut f = BufWriter::new(File::create(path)?);
    bincode::serialize_into(&mut f, value)?;
    f.flush()?;
    Ok(())
}

fn load_bin<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let f = BufReader::new(File::open(path)?);
    Ok(bincode::deserialize_from(f)?)
}

pub fn save_doc_index(path: &Path, index: &DocIndex) -> Result<()> {
    save_bin(path, index)
}

pub fn load_doc_index(path: &Path) -> Result<DocIndex> {
    load_bin(path)
}

pub fn save_vocab(paths: &WorkPaths, vocab: &VocabIndex) -> Result<()> {
    save_bin(&paths.vocab(), vocab)
}

pub fn load_vocab(paths: &WorkPaths) -> Result<VocabIndex> {
    load_bin(&paths.vocab())
}

pub fn save_topic_features(paths: &WorkPaths, topic: &str, set: &TopicTrainingSet) -> Result<()> {
    save_bin(&paths.topic_features(topic), set)
}

pub fn load_topic_features(paths: &WorkPaths, topic: &str) -> Result<TopicTrainingSet> {
    load_bin(&paths.topic_features(topic))
}

pub fn save_test_matrix(paths: &WorkPaths, matrix: &CsrMatrix) -> Result<()> {
    save_bin(&paths.test_matrix(), matrix)
}

pub fn load_test_matrix(paths: &WorkPaths) -> Result<CsrMatrix> {
    load_bin(&paths.test_matrix())
}

pub fn save_meta(path: &Path, meta: &BuildMeta) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    let mut f = File::create(path)?;
    let json = serde_json::to_string_pretty(meta)?;
    f.write_all(json.as_bytes())?;
    Ok(())
}

pub fn load_meta(path: &Path) -> Result<BuildMeta> {
    let mut f = File::open(path)?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    let meta: BuildMeta = serde_json::from_str(&buf)?;
    Ok(meta)
}
