use ccrf_core::classify::ClassifierKind;
use ccrf_core::config::{default_alphas, default_limit, PipelineConfig, SourceConfig, TargetConfig};
use ccrf_core::matrix::DuplicatePolicy;
use ccrf_core::trec::TopicSet;
use ccrf_reranker::{rerank, run_pipeline, RerankOptions};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write_archive(path: &Path, docs: &[(&str, &str)]) {
    let gz = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(gz);
    for (docid, body) in docs {
        let content = format!("<DOCNO>{docid}</DOCNO>\n{body}");
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, docid, content.as_bytes()).unwrap();
    }
    fs::write(path, builder.into_inner().unwrap().finish().unwrap()).unwrap();
}

/// Topic 301 is learnable (apple is relevant, pear is not); topic 302 has
/// only relevant judgements; topic 303 is absent from the base run.
fn config(root: &Path) -> PipelineConfig {
    fs::write(
        root.join("qrels.txt"),
        "301 0 t1 1\n301 0 t2 1\n301 0 t3 0\n301 0 t4 0\n302 0 t1 1\n302 0 t2 2\n",
    )
    .unwrap();
    write_archive(
        &root.join("source.tar.gz"),
        &[
            ("t1", "apple 1.000000\nbanana 1.000000"),
            ("t2", "apple 1.000000"),
            ("t3", "pear 1.000000"),
            ("t4", "pear 1.000000\nbanana 1.000000"),
        ],
    );
    fs::write(
        root.join("run.txt"),
        "301 Q0 c1 1 10.0 bm25\n301 Q0 c3 2 7.0 bm25\n301 Q0 c2 3 5.0 bm25\n302 Q0 c1 1 9.0 bm25\n302 Q0 c2 2 8.0 bm25\n",
    )
    .unwrap();
    write_archive(
        &root.join("target.tar.gz"),
        &[("c1", "pear 1.000000"), ("c2", "apple 1.000000"), ("c3", "banana 1.000000")],
    );
    PipelineConfig {
        working_directory: root.join("work"),
        topics: vec!["301".into(), "302".into(), "303".into()],
        sources: vec![SourceConfig {
            name: "robust04".into(),
            qrels: root.join("qrels.txt"),
            tfidf: root.join("source.tar.gz"),
        }],
        target: TargetConfig { name: "core18".into(), run: root.join("run.txt"), tfidf: root.join("target.tar.gz") },
        classifiers: vec![ClassifierKind::Lr],
        alphas: default_alphas(),
        limit: default_limit(),
        only_alpha: false,
        duplicates: DuplicatePolicy::Reject,
    }
}

fn ranking(path: &Path, topic: &str) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>())
        .filter(|f| f[0] == topic)
        .map(|f| f[2].to_string())
        .collect()
}

#[test]
fn pipeline_writes_one_run_per_alpha() {
    let dir = tempdir().unwrap();
    let summaries = run_pipeline(&config(dir.path())).unwrap();
    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];
    assert_eq!(summary.files.len(), 11);
    assert_eq!(summary.scored, vec!["301"]);
    assert_eq!(summary.fallback, vec!["302"]);
    assert_eq!(summary.missing, vec!["303"]);

    let models = dir.path().join("work/models/lr");
    for name in ["rerank_0.0.txt", "rerank_0.5.txt", "rerank_1.0.txt"] {
        assert!(models.join(name).exists(), "{name} missing");
    }

    assert_eq!(ranking(&models.join("rerank_0.0.txt"), "301"), vec!["c1", "c3", "c2"]);
    let reranked = ranking(&models.join("rerank_1.0.txt"), "301");
    assert_eq!(reranked.first().map(String::as_str), Some("c2"));
    assert_eq!(reranked.last().map(String::as_str), Some("c1"));

    assert_eq!(ranking(&models.join("rerank_1.0.txt"), "302"), vec!["c1", "c2"]);
    assert!(ranking(&models.join("rerank_1.0.txt"), "303").is_empty());
}

#[test]
fn pipeline_writes_docid_lists_for_the_dump() {
    let dir = tempdir().unwrap();
    run_pipeline(&config(dir.path())).unwrap();
    let work = dir.path().join("work");
    assert_eq!(fs::read_to_string(work.join("docids.robust04")).unwrap(), "t1\nt2\nt3\nt4\n");
    assert_eq!(fs::read_to_string(work.join("docids.core18")).unwrap(), "c1\nc2\nc3\n");
}

#[test]
fn boosted_trees_rerank_through_the_same_path() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let mut config = config(root);
    config.classifiers = vec![ClassifierKind::Lgb];
    let summaries = run_pipeline(&config).unwrap();
    assert_eq!(summaries[0].scored, vec!["301"]);
    assert_eq!(summaries[0].fallback, vec!["302"]);

    // Four training rows never reach the default leaf size, so every
    // candidate gets the same score and the base order survives at alpha 1.
    let models = root.join("work/models/lgb");
    assert_eq!(ranking(&models.join("rerank_1.0.txt"), "301"), vec!["c1", "c3", "c2"]);
    let text = fs::read_to_string(models.join("rerank_0.0.txt")).unwrap();
    assert!(text.lines().all(|l| l.ends_with(" ccrf_lgb")));
}

#[test]
fn colliding_alpha_sweeps_are_rejected() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let mut config = config(root);
    config.alphas = vec![0.2, 0.25, 0.2];
    assert!(run_pipeline(&config).is_err());

    config.alphas = vec![0.2, 0.25];
    let summaries = run_pipeline(&config).unwrap();
    let models = root.join("work/models/lr");
    assert_eq!(summaries[0].files, vec![models.join("rerank_0.2.txt"), models.join("rerank_0.25.txt")]);
    assert!(summaries[0].files.iter().all(|f| f.exists()));
}

#[test]
fn run_lines_are_trec_formatted() {
    let dir = tempdir().unwrap();
    run_pipeline(&config(dir.path())).unwrap();
    let text = fs::read_to_string(dir.path().join("work/models/lr/rerank_0.0.txt")).unwrap();
    let first: Vec<&str> = text.lines().next().unwrap().split_whitespace().collect();
    assert_eq!(first.len(), 6);
    assert_eq!(&first[..4], &["301", "Q0", "c1", "1"]);
    assert_eq!(first[4].parse::<f32>().unwrap(), 1.0);
    assert_eq!(first[5], "ccrf_lr");
}

#[test]
fn limit_truncates_each_topic_and_tag_is_configurable() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    run_pipeline(&config(root)).unwrap();

    let work = root.join("work");
    let mut opts = RerankOptions::new(work.clone(), work.clone(), root.join("run.txt"), root.join("out"), TopicSet::new(["301", "302"]));
    opts.limit = 1;
    opts.alphas = vec![0.5];
    opts.tag = Some("h2oloo_lr".into());
    let summary = rerank(&opts).unwrap();
    assert_eq!(summary.files, vec![root.join("out/rerank_0.5.txt")]);

    let text = fs::read_to_string(root.join("out/rerank_0.5.txt")).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    for line in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        assert_eq!(fields[3], "1");
        assert_eq!(fields[5], "h2oloo_lr");
    }
}

#[test]
fn single_topic_mode_surfaces_classifier_failures() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    run_pipeline(&config(root)).unwrap();

    let work = root.join("work");
    let mut opts = RerankOptions::new(work.clone(), work.clone(), root.join("run.txt"), root.join("out"), TopicSet::new(["301", "302"]));
    opts.single_topic = Some("302".into());
    let err = rerank(&opts).unwrap_err();
    assert!(format!("{err:#}").contains("302"));

    opts.single_topic = Some("301".into());
    opts.classifier = ClassifierKind::Svm;
    let summary = rerank(&opts).unwrap();
    assert_eq!(summary.scored, vec!["301"]);
}

#[test]
fn out_of_range_alpha_is_rejected() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    run_pipeline(&config(root)).unwrap();
    let work = root.join("work");
    let mut opts = RerankOptions::new(work.clone(), work, root.join("run.txt"), root.join("out"), TopicSet::new(["301"]));
    opts.alphas = vec![1.5];
    assert!(rerank(&opts).is_err());
}
