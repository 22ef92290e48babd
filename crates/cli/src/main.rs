mod app;
mod config;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use index::{GraphRagPipeline, GraphStats, GraphStore};
use ingest::{Chunker, FileReader, Tokenizer};
use query::{GraphRagQuery, QueryAnswer};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use app::App;
use config::{AppConfig, LoggingConfig, OperationMode};

#[derive(Parser)]
#[command(name = "graphrag")]
#[command(about = "Build a knowledge graph from documents and answer questions over it")]
struct Cli {
    /// TOML configuration file; defaults apply when it does not exist
    #[arg(long, env = "GRAPHRAG_CONFIG", default_value = "graphrag.toml")]
    config: PathBuf,

    /// Apply a preset for extraction rounds, concurrency and retries
    #[arg(long, value_enum)]
    mode: Option<OperationMode>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk, extract and merge documents into the graph
    Build {
        /// A .txt/.md file, a directory of them, or a .json document map
        path: PathBuf,
    },
    /// Answer a question from the graph
    Query {
        text: String,
    },
    /// Print node and edge counts
    Stats,
}

#[derive(Serialize)]
struct StatsOutput<'a> {
    namespace: &'a str,
    #[serde(flatten)]
    stats: GraphStats,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut config = AppConfig::load(&cli.config)?;
    if let Some(mode) = cli.mode {
        config = config.with_mode(mode);
    }
    init_logging(&config.logging)?;

    let app = App::connect(&config).await?;

    match cli.command {
        Command::Build { path } => build(&config, app, path).await,
        Command::Query { text } => ask(&config, app, &text).await,
        Command::Stats => {
            let stats = app.stores.graph.stats().await?;
            let output = StatsOutput {
                namespace: app.stores.graph.namespace(),
                stats,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
    }
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level).context("invalid logging.level")?,
    };

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
    Ok(())
}

async fn build(config: &AppConfig, app: App, path: PathBuf) -> Result<()> {
    if !path.exists() {
        bail!("{} does not exist", path.display());
    }

    let documents = FileReader::read_documents(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    info!(documents = documents.len(), path = %path.display(), "documents loaded");

    let chunker = Chunker::new(config.chunker_config(), Tokenizer::o200k()?)?;
    let pipeline = GraphRagPipeline::new(config.pipeline_config(), chunker, app.chat, app.embedder, app.stores);

    let report = pipeline.build(&documents).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn ask(config: &AppConfig, app: App, text: &str) -> Result<()> {
    let graphrag = GraphRagQuery::new(config.retrieval.clone(), app.chat, app.embedder, &app.stores);

    match graphrag.ask(text).await? {
        QueryAnswer::NoRelevantData => {
            println!("No relevant data found for '{}'.", text);
        }
        QueryAnswer::Answer { text: answer, paths } => {
            println!("{}\n", answer);
            println!("Evidence paths:");
            for (idx, scored) in paths.iter().enumerate() {
                println!("{}. score: {:.3} | {}", idx + 1, scored.score, scored.path);
            }
        }
    }
    Ok(())
}
