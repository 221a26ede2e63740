//! Error types for the feature pipeline.
//!
//! Parse and index errors are structural: they mean an input file or an
//! earlier phase is inconsistent, and callers are expected to abort the
//! current build rather than continue with a partial feature matrix.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed archive record or qrels/run line.
    #[error("{source_name}:{line}: {message}")]
    Parse {
        source_name: String,
        line: usize,
        message: String,
    },
    /// A row or column lies outside the declared matrix shape.
    #[error("{axis} index {index} out of range for size {size}")]
    IndexOutOfRange {
        axis: &'static str,
        index: u64,
        size: usize,
    },
    /// The same (row, col) cell was pushed twice under `DuplicatePolicy::Reject`.
    #[error("duplicate entry for cell ({row}, {col})")]
    DuplicateEntry { row: u32, col: u32 },
    /// A run line names a document the identifier index does not know.
    #[error("document {0} is not in the identifier index")]
    UnknownDocument(String),
    /// Training labels contain a single class.
    #[error("training set has a single class ({label}) across {rows} rows")]
    DegenerateTrainingSet { label: u8, rows: usize },
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    /// A persisted identifier list is not a bijection.
    #[error("invalid identifier index: {0}")]
    InvalidIndex(String),
    #[error("model used before fit")]
    NotFitted,
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] bincode::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn parse(source_name: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            source_name: source_name.into(),
            line,
            message: message.into(),
        }
    }
}
