use anyhow::{bail, Context, Result};
use ccrf_core::archive::TfidfArchive;
use ccrf_core::matrix::{assemble, DuplicatePolicy, TfIdfEntry};
use ccrf_core::persist::{
    load_vocab, save_doc_index, save_meta, save_test_matrix, save_topic_features, save_vocab, BuildMeta, WorkPaths,
    FORMAT_VERSION,
};
use ccrf_core::terms::TermFilter;
use ccrf_core::trec::{index_qrels, index_run, TopicLabelSet, TopicSet};
use ccrf_core::{DocIndex, Idx, TopicTrainingSet, VocabIndex};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub mod cli;

const PROGRESS_EVERY: usize = 100_000;
const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// Inputs of the training-side build.
#[derive(Debug, Clone)]
pub struct BuildTrainOptions {
    pub qrels_files: Vec<PathBuf>,
    pub tfidf_files: Vec<PathBuf>,
    pub output_folder: PathBuf,
    pub topics: TopicSet,
    pub term_filter: TermFilter,
    pub duplicates: DuplicatePolicy,
}

/// Inputs of the test-side build; the vocabulary comes from `train_folder`.
#[derive(Debug, Clone)]
pub struct BuildTestOptions {
    pub rank_file: PathBuf,
    pub tfidf_files: Vec<PathBuf>,
    pub train_folder: PathBuf,
    pub output_folder: PathBuf,
    pub topics: TopicSet,
    pub duplicates: DuplicatePolicy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    pub documents: usize,
    pub matched: usize,
}

/// Regular files under `folder`, sorted by path so builds are reproducible.
pub fn list_files<P: AsRef<Path>>(folder: P) -> Result<Vec<PathBuf>> {
    let folder = folder.as_ref();
    if !folder.is_dir() {
        bail!("{} is not a directory", folder.display());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(folder).sort_by_file_name() {
        let entry = entry.with_context(|| format!("listing {}", folder.display()))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn is_archive(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| n.ends_with(ARCHIVE_SUFFIX))
}

/// TF-IDF archives (`*.tar.gz`) under `folder`, sorted by path. Docid lists
/// and other files kept next to the archives are skipped.
pub fn list_archives<P: AsRef<Path>>(folder: P) -> Result<Vec<PathBuf>> {
    let (archives, skipped): (Vec<PathBuf>, Vec<PathBuf>) =
        list_files(folder)?.into_iter().partition(|p| is_archive(p));
    for path in &skipped {
        tracing::debug!(path = %path.display(), "not an archive; skipped");
    }
    Ok(archives)
}

/// Layout of the files a docid list is collected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgementFormat {
    /// `<topic> <iter> <docid> <grade>`
    Qrels,
    /// `<topic> Q0 <docid> <rank> <score> <tag>`
    Run,
}

/// Sorted unique document ids of `files`, restricted to `topics`.
pub fn collect_docids(files: &[PathBuf], format: JudgementFormat, topics: &TopicSet) -> Result<BTreeSet<String>> {
    let mut docs = DocIndex::new();
    for file in files {
        let name = file.display().to_string();
        let reader = BufReader::new(File::open(file).with_context(|| format!("opening {name}"))?);
        match format {
            JudgementFormat::Qrels => {
                let mut labels = TopicLabelSet::new(topics);
                index_qrels(reader, &name, topics, &mut docs, &mut labels)
            }
            JudgementFormat::Run => index_run(reader, &name, topics, &mut docs),
        }
        .with_context(|| format!("reading {name}"))?;
    }
    Ok(docs.iter().map(|(id, _)| id.to_string()).collect())
}

pub fn docids_path(folder: &Path, name: &str) -> PathBuf {
    folder.join(format!("docids.{name}"))
}

/// Writes `docids.<name>` under `output_folder`, one id per line. This is the
/// list the document-vector dump reads to produce the TF-IDF archive.
pub fn write_docids(
    files: &[PathBuf],
    format: JudgementFormat,
    topics: &TopicSet,
    output_folder: &Path,
    name: &str,
) -> Result<PathBuf> {
    let ids = collect_docids(files, format, topics)?;
    fs::create_dir_all(output_folder).with_context(|| format!("creating {}", output_folder.display()))?;
    let path = docids_path(output_folder, name);
    let mut out = BufWriter::new(File::create(&path).with_context(|| format!("creating {}", path.display()))?);
    for id in &ids {
        writeln!(out, "{id}")?;
    }
    out.flush()?;
    tracing::info!(path = %path.display(), docs = ids.len(), "wrote docid list");
    Ok(path)
}

/// Streams one archive, calling `on_weight(row, term, weight)` for every
/// pair of a document present in `docs`. Other documents are skipped unread.
pub fn read_archive<F>(path: &Path, docs: &DocIndex, mut on_weight: F) -> Result<ArchiveStats>
where
    F: FnMut(Idx, String, f32) -> ccrf_core::Result<()>,
{
    let mut archive = TfidfArchive::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut stream = archive.documents()?;
    let mut stats = ArchiveStats::default();
    while stream.has_next_document()? {
        stats.documents += 1;
        if stats.documents % PROGRESS_EVERY == 0 {
            tracing::info!(documents = stats.documents, archive = %path.display(), "documents processed");
        }
        let row = match stream.next_document_id().and_then(|id| docs.index_of(id)) {
            Some(row) => row,
            None => {
                stream.skip_document();
                continue;
            }
        };
        stats.matched += 1;
        while stream.has_next_weight()? {
            let (term, weight) = stream.next_weight()?;
            on_weight(row, term, weight)?;
        }
    }
    Ok(stats)
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct TrainSummary {
    pub docs: DocIndex,
    pub vocab: VocabIndex,
    pub labels: TopicLabelSet,
    pub topics_written: Vec<String>,
}

/// Builds the training document index, the vocabulary, and one
/// [`TopicTrainingSet`] per judged topic under `output_folder/features`.
pub fn build_train(opts: &BuildTrainOptions) -> Result<TrainSummary> {
    let paths = WorkPaths::new(&opts.output_folder);
    fs::create_dir_all(paths.features_dir())?;

    let mut docs = DocIndex::new();
    let mut labels = TopicLabelSet::new(&opts.topics);
    for file in &opts.qrels_files {
        let name = file.display().to_string();
        let reader = BufReader::new(File::open(file).with_context(|| format!("opening {name}"))?);
        let kept = index_qrels(reader, &name, &opts.topics, &mut docs, &mut labels)
            .with_context(|| format!("reading qrels {name}"))?;
        tracing::info!(qrels = %name, judgements = kept, "indexed qrels");
    }
    tracing::info!(num_docs = docs.len(), "built document index");

    let mut vocab = VocabIndex::new();
    let mut entries: Vec<TfIdfEntry> = Vec::new();
    let mut matched = 0;
    for file in &opts.tfidf_files {
        let stats = read_archive(file, &docs, |row, term, weight| {
            if opts.term_filter.admits(&term) {
                let col = vocab.get_or_insert(&term);
                entries.push(TfIdfEntry { row, col, weight });
            }
            Ok(())
        })
        .with_context(|| format!("reading archive {}", file.display()))?;
        matched += stats.matched;
        tracing::info!(archive = %file.display(), documents = stats.documents, matched = stats.matched, "read archive");
    }
    if matched < docs.len() {
        tracing::warn!(missing = docs.len() - matched, "judged documents without a vector; their rows stay empty");
    }
    tracing::info!(num_terms = vocab.len(), "built vocabulary");

    save_doc_index(&paths.train_doc_index(), &docs)?;
    save_vocab(&paths, &vocab)?;

    let matrix = assemble(entries, docs.len(), vocab.len(), opts.duplicates).context("assembling training matrix")?;

    let mut topics_written = Vec::new();
    for (topic, topic_labels) in labels.iter() {
        if topic_labels.is_empty() {
            tracing::warn!(topic, "no judgements for topic; no training set written");
            continue;
        }
        let set = TopicTrainingSet::from_labels(&matrix, topic_labels)?;
        tracing::debug!(topic, rows = set.len(), positives = set.positives(), "writing training set");
        save_topic_features(&paths, topic, &set)?;
        topics_written.push(topic.to_string());
    }

    let meta = BuildMeta {
        num_docs: docs.len(),
        num_terms: vocab.len(),
        num_topics: topics_written.len(),
        nnz: matrix.nnz(),
        created_at: now_rfc3339(),
        version: FORMAT_VERSION,
    };
    save_meta(&paths.train_meta(), &meta)?;
    tracing::info!(output = %paths.root.display(), topics = topics_written.len(), "training build complete");
    Ok(TrainSummary { docs, vocab, labels, topics_written })
}

#[derive(Debug, Clone)]
pub struct TestSummary {
    pub docs: DocIndex,
    pub meta: BuildMeta,
}

/// Builds the candidate document index from the base run and their feature
/// matrix over the training vocabulary.
pub fn build_test(opts: &BuildTestOptions) -> Result<TestSummary> {
    let train_paths = WorkPaths::new(&opts.train_folder);
    let paths = WorkPaths::new(&opts.output_folder);
    fs::create_dir_all(&paths.root)?;

    let vocab = load_vocab(&train_paths).with_context(|| format!("loading {}", train_paths.vocab().display()))?;
    tracing::info!(num_terms = vocab.len(), "loaded vocabulary");

    let run_name = opts.rank_file.display().to_string();
    let mut docs = DocIndex::new();
    let reader = BufReader::new(File::open(&opts.rank_file).with_context(|| format!("opening {run_name}"))?);
    index_run(reader, &run_name, &opts.topics, &mut docs).with_context(|| format!("reading run {run_name}"))?;
    tracing::info!(num_docs = docs.len(), "built candidate index");

    let mut entries: Vec<TfIdfEntry> = Vec::new();
    let mut matched = 0;
    for file in &opts.tfidf_files {
        let stats = read_archive(file, &docs, |row, term, weight| {
            if let Some(col) = vocab.index_of(&term) {
                entries.push(TfIdfEntry { row, col, weight });
            }
            Ok(())
        })
        .with_context(|| format!("reading archive {}", file.display()))?;
        matched += stats.matched;
    }
    if matched < docs.len() {
        tracing::warn!(missing = docs.len() - matched, "candidates without a vector; their rows stay empty");
    }

    let matrix = assemble(entries, docs.len(), vocab.len(), opts.duplicates).context("assembling test matrix")?;
    save_doc_index(&paths.test_doc_index(), &docs)?;
    save_test_matrix(&paths, &matrix)?;

    let meta = BuildMeta {
        num_docs: docs.len(),
        num_terms: vocab.len(),
        num_topics: opts.topics.len(),
        nnz: matrix.nnz(),
        created_at: now_rfc3339(),
        version: FORMAT_VERSION,
    };
    save_meta(&paths.test_meta(), &meta)?;
    tracing::info!(output = %paths.root.display(), nnz = meta.nnz, "test build complete");
    Ok(TestSummary { docs, meta })
}
