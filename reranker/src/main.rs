use anyhow::Result;
use ccrf_builder::cli::TopicArgs;
use ccrf_core::classify::ClassifierKind;
use ccrf_core::config::{default_limit, PipelineConfig};
use ccrf_core::trec::TopicSet;
use ccrf_reranker::{rerank, run_pipeline, RerankOptions};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ccrf-reranker")]
#[command(about = "Rerank a base run with per-topic relevance classifiers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train per-topic classifiers and write one reranked run per alpha
    Rerank {
        /// Working directory produced by build-train
        #[arg(long)]
        train_folder: PathBuf,
        /// Directory produced by build-test
        #[arg(long)]
        test_folder: PathBuf,
        /// Base run in TREC format
        #[arg(long)]
        rank_file: PathBuf,
        /// Directory receiving rerank_<alpha>.txt files
        #[arg(long)]
        output_folder: PathBuf,
        #[command(flatten)]
        topics: TopicArgs,
        /// lr, svm or lgb
        #[arg(long, default_value = "lr")]
        classifier: ClassifierKind,
        /// Maximum lines written per topic
        #[arg(long, default_value_t = default_limit())]
        limit: usize,
        /// Comma-separated mixing weights; defaults to 0.0,0.1,...,1.0
        #[arg(long, value_delimiter = ',')]
        alphas: Vec<f32>,
        /// Run tag; defaults to ccrf_<classifier>
        #[arg(long)]
        tag: Option<String>,
        /// Rerank a single topic and fail on classifier errors
        #[arg(long)]
        topic: Option<String>,
    },
    /// Run build-train, build-test and rerank from a JSON config
    Pipeline {
        #[arg(long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Rerank {
            train_folder,
            test_folder,
            rank_file,
            output_folder,
            topics,
            classifier,
            limit,
            alphas,
            tag,
            topic,
        } => {
            let topics = match &topic {
                Some(t) => TopicSet::new([t.as_str()]),
                None => topics.resolve()?,
            };
            let mut opts = RerankOptions::new(train_folder, test_folder, rank_file, output_folder, topics);
            opts.classifier = classifier;
            opts.limit = limit;
            if !alphas.is_empty() {
                opts.alphas = alphas;
            }
            opts.tag = tag;
            opts.single_topic = topic;
            rerank(&opts)?;
        }
        Commands::Pipeline { config } => {
            let config = PipelineConfig::from_file(&config)?;
            run_pipeline(&config)?;
        }
    }
    Ok(())
}
