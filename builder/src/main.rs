use anyhow::{bail, Result};
use ccrf_builder::cli::{parse_duplicates, TopicArgs};
use ccrf_builder::{
    build_test, build_train, list_archives, list_files, write_docids, BuildTestOptions, BuildTrainOptions,
    JudgementFormat,
};
use ccrf_core::matrix::DuplicatePolicy;
use ccrf_core::terms::TermFilter;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ccrf-builder")]
#[command(about = "Build training and test feature sets from TF-IDF archives", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index judged documents and write one training set per topic
    BuildTrain {
        /// Folder of TF-IDF tar.gz archives of the training collections
        #[arg(long)]
        tfidf_folder: PathBuf,
        /// Folder of qrels files
        #[arg(long)]
        qrels_folder: PathBuf,
        /// Output working directory
        #[arg(long)]
        output_folder: PathBuf,
        #[command(flatten)]
        topics: TopicArgs,
        /// Keep only purely alphabetic terms in the vocabulary
        #[arg(long, default_value_t = false)]
        only_alpha: bool,
        /// How repeated (document, term) cells are resolved
        #[arg(long, value_parser = parse_duplicates, default_value = "reject")]
        duplicates: DuplicatePolicy,
    },
    /// Index the base run's candidates and write their feature matrix
    BuildTest {
        /// TF-IDF tar.gz archive of the target collection
        #[arg(long)]
        tfidf_file: PathBuf,
        /// Base run in TREC format
        #[arg(long)]
        rank_file: PathBuf,
        /// Working directory produced by build-train
        #[arg(long)]
        train_folder: PathBuf,
        /// Output directory for the test artefacts
        #[arg(long)]
        output_folder: PathBuf,
        #[command(flatten)]
        topics: TopicArgs,
        #[arg(long, value_parser = parse_duplicates, default_value = "reject")]
        duplicates: DuplicatePolicy,
    },
    /// Write the sorted unique docids of a qrels or run file as docids.<name>
    Docids {
        /// Qrels file whose judged documents are listed
        #[arg(long, conflicts_with = "run")]
        qrels: Option<PathBuf>,
        /// Run file whose retrieved documents are listed
        #[arg(long)]
        run: Option<PathBuf>,
        /// Collection name used in the output file name
        #[arg(long)]
        name: String,
        #[arg(long)]
        output_folder: PathBuf,
        #[command(flatten)]
        topics: TopicArgs,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::BuildTrain { tfidf_folder, qrels_folder, output_folder, topics, only_alpha, duplicates } => {
            let opts = BuildTrainOptions {
                qrels_files: list_files(&qrels_folder)?,
                tfidf_files: list_archives(&tfidf_folder)?,
                output_folder,
                topics: topics.resolve()?,
                term_filter: TermFilter::from_only_alpha(only_alpha),
                duplicates,
            };
            build_train(&opts)?;
        }
        Commands::BuildTest { tfidf_file, rank_file, train_folder, output_folder, topics, duplicates } => {
            let opts = BuildTestOptions {
                rank_file,
                tfidf_files: vec![tfidf_file],
                train_folder,
                output_folder,
                topics: topics.resolve()?,
                duplicates,
            };
            build_test(&opts)?;
        }
        Commands::Docids { qrels, run, name, output_folder, topics } => {
            let (file, format) = match (qrels, run) {
                (Some(file), _) => (file, JudgementFormat::Qrels),
                (None, Some(file)) => (file, JudgementFormat::Run),
                (None, None) => bail!("one of --qrels or --run is required"),
            };
            write_docids(&[file], format, &topics.resolve()?, &output_folder, &name)?;
        }
    }
    Ok(())
}
