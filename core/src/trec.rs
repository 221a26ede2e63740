//! TREC qrels and run files.
//!
//! Qrels lines are `<topic> <iter> <docid> <label>`; run lines are
//! `<topic> Q0 <docid> <rank> <score> <tag>`. Fields are separated by any
//! whitespace. Blank lines are skipped everywhere.

use crate::error::{PipelineError, Result};
use crate::ids::{DocIndex, Idx};
use indexmap::{IndexMap, IndexSet};
use std::io::{BufRead, Write};
use std::path::Path;

/// Topics a build or rerank is restricted to, in the order they were given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicSet(IndexSet<String>);

impl TopicSet {
    pub fn new<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(topics.into_iter().map(Into::into).collect())
    }

    /// Parses a comma separated list, e.g. `321,336,341`.
    pub fn parse_list(list: &str) -> Self {
        Self::new(list.split(',').map(str::trim).filter(|t| !t.is_empty()))
    }

    /// Reads one topic per line.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::new(text.lines().map(str::trim).filter(|t| !t.is_empty())))
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.0.contains(topic)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.iter().map(String::as_str)
    }
}

/// Binary relevance labels per topic, keyed by document row.
///
/// Rows keep the order in which their judgements were first read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicLabelSet(IndexMap<String, IndexMap<Idx, u8>>);

impl TopicLabelSet {
    /// One (initially empty) label map per topic.
    pub fn new(topics: &TopicSet) -> Self {
        Self(topics.iter().map(|t| (t.to_string(), IndexMap::new())).collect())
    }

    pub fn set(&mut self, topic: &str, row: Idx, label: u8) {
        match self.0.get_mut(topic) {
            Some(labels) => {
                labels.insert(row, label);
            }
            None => {
                self.0.insert(topic.to_string(), IndexMap::from([(row, label)]));
            }
        }
    }

    pub fn get(&self, topic: &str) -> Option<&IndexMap<Idx, u8>> {
        self.0.get(topic)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &IndexMap<Idx, u8>)> + '_ {
        self.0.iter().map(|(t, l)| (t.as_str(), l))
    }
}

/// Reads a qrels stream into `docs` and `labels`, keeping only topics in `topics`.
///
/// Document ids get rows in first-encounter order; a label greater than zero
/// is relevant (1), anything else is not (0). Returns the number of
/// judgements kept.
pub fn index_qrels<R: BufRead>(
    reader: R,
    source_name: &str,
    topics: &TopicSet,
    docs: &mut DocIndex,
    labels: &mut TopicLabelSet,
) -> Result<usize> {
    let mut kept = 0;
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        if fields.len() != 4 {
            return Err(PipelineError::parse(source_name, i + 1, format!("qrels line has {} fields; expected 4", fields.len())));
        }
        let (topic, docid) = (fields[0], fields[2]);
        let grade: i32 = fields[3]
            .parse()
            .map_err(|_| PipelineError::parse(source_name, i + 1, format!("non-numeric label {:?}", fields[3])))?;
        if !topics.contains(topic) {
            continue;
        }
        let row = docs.get_or_insert(docid);
        labels.set(topic, row, u8::from(grade > 0));
        kept += 1;
    }
    Ok(kept)
}

/// Builds the document index and label set from a single qrels stream.
pub fn build_identifier_index<R: BufRead>(reader: R, topics: &TopicSet) -> Result<(DocIndex, TopicLabelSet)> {
    let mut docs = DocIndex::new();
    let mut labels = TopicLabelSet::new(topics);
    index_qrels(reader, "qrels", topics, &mut docs, &mut labels)?;
    Ok((docs, labels))
}

/// One parsed run line.
#[derive(Debug, Clone, PartialEq)]
pub struct RunLine<'a> {
    pub topic: &'a str,
    pub docid: &'a str,
    pub rank: u32,
    pub score: f32,
    pub tag: &'a str,
}

pub fn parse_run_line<'a>(line: &'a str, source_name: &str, line_no: usize) -> Result<Option<RunLine<'a>>> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.is_empty() {
        return Ok(None);
    }
    if fields.len() != 6 {
        return Err(PipelineError::parse(source_name, line_no, format!("run line has {} fields; expected 6", fields.len())));
    }
    let rank = fields[3]
        .parse()
        .map_err(|_| PipelineError::parse(source_name, line_no, format!("non-numeric rank {:?}", fields[3])))?;
    let score = fields[4]
        .parse()
        .map_err(|_| PipelineError::parse(source_name, line_no, format!("non-numeric score {:?}", fields[4])))?;
    Ok(Some(RunLine { topic: fields[0], docid: fields[2], rank, score, tag: fields[5] }))
}

/// Adds every document of the run's kept topics to `docs`; returns the lines kept.
pub fn index_run<R: BufRead>(reader: R, source_name: &str, topics: &TopicSet, docs: &mut DocIndex) -> Result<usize> {
    let mut kept = 0;
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if let Some(rec) = parse_run_line(&line, source_name, i + 1)? {
            if topics.contains(rec.topic) {
                docs.get_or_insert(rec.docid);
                kept += 1;
            }
        }
    }
    Ok(kept)
}

/// Candidates of one topic in base-run order, with their feature rows and scores.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreRecord {
    pub doc_ids: Vec<String>,
    pub rows: Vec<Idx>,
    pub baseline: Vec<f32>,
    /// Classifier scores aligned with `doc_ids`; empty until attached.
    pub predicted: Vec<f32>,
}

impl ScoreRecord {
    pub fn len(&self) -> usize {
        self.doc_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }

    pub fn push(&mut self, docid: &str, row: Idx, score: f32) {
        self.doc_ids.push(docid.to_string());
        self.rows.push(row);
        self.baseline.push(score);
    }

    pub fn attach_predictions(&mut self, predicted: Vec<f32>) -> Result<()> {
        if predicted.len() != self.doc_ids.len() {
            return Err(PipelineError::ShapeMismatch(format!(
                "{} predictions for {} candidates",
                predicted.len(),
                self.doc_ids.len()
            )));
        }
        self.predicted = predicted;
        Ok(())
    }

    pub fn has_predictions(&self) -> bool {
        !self.is_empty() && self.predicted.len() == self.doc_ids.len()
    }
}

/// Loads the base run restricted to `topics`, resolving each document through `docs`.
///
/// Topics appear in first-encounter order; a topic whose lines are split
/// across the file is merged into one record.
pub fn load_base_run<R: BufRead>(
    reader: R,
    source_name: &str,
    topics: &TopicSet,
    docs: &DocIndex,
) -> Result<IndexMap<String, ScoreRecord>> {
    let mut records: IndexMap<String, ScoreRecord> = IndexMap::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let rec = match parse_run_line(&line, source_name, i + 1)? {
            Some(rec) if topics.contains(rec.topic) => rec,
            _ => continue,
        };
        let row = docs
            .index_of(rec.docid)
            .ok_or_else(|| PipelineError::UnknownDocument(rec.docid.to_string()))?;
        records.entry(rec.topic.to_string()).or_default().push(rec.docid, row, rec.score);
    }
    Ok(records)
}

/// Orders candidate positions by descending score; ties keep their input order.
pub fn rank_order(scores: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order
}

/// Writes one topic's block in TREC run format with 1-based ranks, at most `limit` lines.
pub fn write_topic_run<W: Write>(
    out: &mut W,
    topic: &str,
    doc_ids: &[String],
    scores: &[f32],
    limit: usize,
    tag: &str,
) -> std::io::Result<usize> {
    let mut written = 0;
    for (rank, pos) in rank_order(scores).into_iter().take(limit).enumerate() {
        writeln!(out, "{} Q0 {} {} {} {}", topic, doc_ids[pos], rank + 1, scores[pos], tag)?;
        written += 1;
    }
    Ok(written)
}
