use anyhow::{bail, Context, Result};
use ccrf_builder::{build_test, build_train, write_docids, BuildTestOptions, BuildTrainOptions, JudgementFormat};
use ccrf_core::classify::{score_topic, ClassifierKind};
use ccrf_core::config::{default_alphas, default_limit, PipelineConfig};
use ccrf_core::normalize::{interpolate, min_max};
use ccrf_core::persist::{load_doc_index, load_test_matrix, load_topic_features, WorkPaths};
use ccrf_core::terms::TermFilter;
use ccrf_core::trec::{load_base_run, write_topic_run, ScoreRecord, TopicSet};
use ccrf_core::CsrMatrix;
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct RerankOptions {
    pub train_folder: PathBuf,
    pub test_folder: PathBuf,
    pub rank_file: PathBuf,
    pub output_folder: PathBuf,
    pub topics: TopicSet,
    pub classifier: ClassifierKind,
    pub limit: usize,
    pub alphas: Vec<f32>,
    /// Run tag of the written lines; `ccrf_<classifier>` when unset.
    pub tag: Option<String>,
    /// Restrict to one topic and fail instead of falling back on classifier errors.
    pub single_topic: Option<String>,
}

impl RerankOptions {
    pub fn new(train_folder: PathBuf, test_folder: PathBuf, rank_file: PathBuf, output_folder: PathBuf, topics: TopicSet) -> Self {
        Self {
            train_folder,
            test_folder,
            rank_file,
            output_folder,
            topics,
            classifier: ClassifierKind::Lr,
            limit: default_limit(),
            alphas: default_alphas(),
            tag: None,
            single_topic: None,
        }
    }

    pub fn tag(&self) -> String {
        self.tag.clone().unwrap_or_else(|| format!("ccrf_{}", self.classifier))
    }
}

/// Which topics were reranked with classifier scores and which were not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RerankSummary {
    pub files: Vec<PathBuf>,
    pub scored: Vec<String>,
    pub fallback: Vec<String>,
    pub missing: Vec<String>,
}

/// File name of the run written for `alpha`, e.g. `rerank_0.3.txt` or
/// `rerank_0.25.txt`. Whole numbers keep one decimal (`rerank_1.0.txt`).
pub fn run_file_name(alpha: f32) -> String {
    if alpha.fract() == 0.0 {
        format!("rerank_{alpha:.1}.txt")
    } else {
        format!("rerank_{alpha}.txt")
    }
}

/// Rejects alphas outside `[0, 1]` and sweeps that would write the same file twice.
pub fn check_alphas(alphas: &[f32]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for &alpha in alphas {
        if !(0.0..=1.0).contains(&alpha) {
            bail!("alpha {alpha} outside [0, 1]");
        }
        let name = run_file_name(alpha);
        if !seen.insert(name.clone()) {
            bail!("alpha {alpha} repeats output file {name}");
        }
    }
    Ok(())
}

fn score_record(
    train: &WorkPaths,
    candidates: &CsrMatrix,
    kind: ClassifierKind,
    topic: &str,
    record: &mut ScoreRecord,
) -> Result<()> {
    let set = load_topic_features(train, topic)
        .with_context(|| format!("loading {}", train.topic_features(topic).display()))?;
    let rows = candidates.select_rows(&record.rows)?;
    let predicted = score_topic(kind, &set.features, &set.labels, &rows)?;
    record.attach_predictions(predicted)?;
    tracing::debug!(topic, classifier = %kind, train_rows = set.len(), candidates = record.len(), "scored topic");
    Ok(())
}

/// Combined scores of one topic at `alpha`; topics without predictions keep
/// their normalized baseline.
pub fn combined_scores(record: &ScoreRecord, alpha: f32) -> Vec<f32> {
    if record.has_predictions() {
        interpolate(&record.baseline, &record.predicted, alpha)
    } else {
        min_max(&record.baseline)
    }
}

/// Trains one classifier per topic, scores the base run's candidates, and
/// writes one reranked run per alpha under `output_folder`.
pub fn rerank(opts: &RerankOptions) -> Result<RerankSummary> {
    check_alphas(&opts.alphas)?;
    let train = WorkPaths::new(&opts.train_folder);
    let test = WorkPaths::new(&opts.test_folder);
    let topics = match &opts.single_topic {
        Some(topic) => TopicSet::new([topic.as_str()]),
        None => opts.topics.clone(),
    };

    let docs = load_doc_index(&test.test_doc_index())
        .with_context(|| format!("loading {}", test.test_doc_index().display()))?;
    let candidates = load_test_matrix(&test).with_context(|| format!("loading {}", test.test_matrix().display()))?;
    if candidates.n_rows() != docs.len() {
        bail!("test matrix has {} rows for {} candidate documents", candidates.n_rows(), docs.len());
    }

    let run_name = opts.rank_file.display().to_string();
    let reader = BufReader::new(File::open(&opts.rank_file).with_context(|| format!("opening {run_name}"))?);
    let mut records: Vec<(String, ScoreRecord)> = load_base_run(reader, &run_name, &topics, &docs)
        .with_context(|| format!("reading run {run_name}"))?
        .into_iter()
        .collect();

    let mut summary = RerankSummary::default();
    for topic in topics.iter() {
        if !records.iter().any(|(t, _)| t == topic) {
            tracing::warn!(topic, "topic missing from base run; its block stays empty");
            summary.missing.push(topic.to_string());
        }
    }

    tracing::info!(topics = records.len(), classifier = %opts.classifier, "scoring topics");
    let outcomes: Vec<Result<()>> = records
        .par_iter_mut()
        .map(|(topic, record)| score_record(&train, &candidates, opts.classifier, topic, record))
        .collect();
    for ((topic, _), outcome) in records.iter().zip(outcomes) {
        match outcome {
            Ok(()) => summary.scored.push(topic.clone()),
            Err(err) if opts.single_topic.is_some() => {
                return Err(err.context(format!("classifier {} failed on topic {topic}", opts.classifier)));
            }
            Err(err) => {
                let error = format!("{err:#}");
                tracing::warn!(topic = %topic, %error, "classifier failed; keeping baseline order");
                summary.fallback.push(topic.clone());
            }
        }
    }

    fs::create_dir_all(&opts.output_folder)
        .with_context(|| format!("creating {}", opts.output_folder.display()))?;
    let tag = opts.tag();
    for &alpha in &opts.alphas {
        let path = opts.output_folder.join(run_file_name(alpha));
        write_run(&path, &records, alpha, opts.limit, &tag).with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), alpha, "wrote run");
        summary.files.push(path);
    }
    Ok(summary)
}

fn write_run(path: &Path, records: &[(String, ScoreRecord)], alpha: f32, limit: usize, tag: &str) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for (topic, record) in records {
        let scores = combined_scores(record, alpha);
        write_topic_run(&mut out, topic, &record.doc_ids, &scores, limit, tag)?;
    }
    out.flush()?;
    Ok(())
}

/// Runs every phase of a [`PipelineConfig`]: docid lists for the sources
/// and the target, build-train over the sources, build-test over the
/// target, and one rerank per configured classifier into
/// `<working_directory>/models/<classifier>`.
pub fn run_pipeline(config: &PipelineConfig) -> Result<Vec<RerankSummary>> {
    config.validate()?;
    check_alphas(&config.alphas)?;
    let work = WorkPaths::new(&config.working_directory);
    let topics = config.topic_set();

    for source in &config.sources {
        write_docids(&[source.qrels.clone()], JudgementFormat::Qrels, &topics, &work.root, &source.name)?;
    }
    write_docids(&[config.target.run.clone()], JudgementFormat::Run, &topics, &work.root, &config.target.name)?;

    tracing::info!(sources = config.sources.len(), "building training sets");
    build_train(&BuildTrainOptions {
        qrels_files: config.sources.iter().map(|s| s.qrels.clone()).collect(),
        tfidf_files: config.sources.iter().map(|s| s.tfidf.clone()).collect(),
        output_folder: work.root.clone(),
        topics: topics.clone(),
        term_filter: TermFilter::from_only_alpha(config.only_alpha),
        duplicates: config.duplicates,
    })?;

    tracing::info!(collection = %config.target.name, "building test set");
    build_test(&BuildTestOptions {
        rank_file: config.target.run.clone(),
        tfidf_files: vec![config.target.tfidf.clone()],
        train_folder: work.root.clone(),
        output_folder: work.root.clone(),
        topics: topics.clone(),
        duplicates: config.duplicates,
    })?;

    let mut summaries = Vec::with_capacity(config.classifiers.len());
    for &classifier in &config.classifiers {
        let mut opts = RerankOptions::new(
            work.root.clone(),
            work.root.clone(),
            config.target.run.clone(),
            work.models_dir().join(classifier.as_str()),
            topics.clone(),
        );
        opts.classifier = classifier;
        opts.limit = config.limit;
        opts.alphas = config.alphas.clone();
        summaries.push(rerank(&opts)?);
    }
    Ok(summaries)
}
