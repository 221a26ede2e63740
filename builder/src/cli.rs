//! Command-line pieces shared by the builder and reranker binaries.

use anyhow::{bail, Result};
use ccrf_core::matrix::DuplicatePolicy;
use ccrf_core::trec::TopicSet;
use clap::Args;
use std::path::PathBuf;

/// Topic selection: an inline comma list or a file with one topic per line.
#[derive(Debug, Clone, Args)]
pub struct TopicArgs {
    /// Comma-separated topic ids, e.g. 321,336
    #[arg(long, conflicts_with = "topics_file")]
    pub topics: Option<String>,
    /// File listing topic ids, one per line
    #[arg(long)]
    pub topics_file: Option<PathBuf>,
}

impl TopicArgs {
    pub fn resolve(&self) -> Result<TopicSet> {
        let topics = match (&self.topics, &self.topics_file) {
            (Some(list), _) => TopicSet::parse_list(list),
            (None, Some(path)) => TopicSet::from_file(path)?,
            (None, None) => bail!("one of --topics or --topics-file is required"),
        };
        if topics.is_empty() {
            bail!("topic list is empty");
        }
        Ok(topics)
    }
}

pub fn parse_duplicates(s: &str) -> std::result::Result<DuplicatePolicy, String> {
    match s {
        "reject" => Ok(DuplicatePolicy::Reject),
        "sum" => Ok(DuplicatePolicy::Sum),
        "last-wins" => Ok(DuplicatePolicy::LastWins),
        other => Err(format!("unknown duplicate policy {other:?}; expected reject, sum or last-wins")),
    }
}
