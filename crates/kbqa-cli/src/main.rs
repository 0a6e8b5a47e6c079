//! KBQA CLI - Command-line interface
//!
//! Usage:
//!   kbqa ask
//!   kbqa query <question>
//!   kbqa import <file>
//!   kbqa --triples <file> ask

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kbqa_core::{AppConfig, FactStore, LoggingConfig};
use kbqa_qa::KbqaOrchestrator;
use kbqa_store::{read_triples_file, InMemoryFactStore, MySqlFactStore};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "kbqa")]
#[command(about = "Knowledge-base question answering CLI")]
#[command(version)]
struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Answer from an NLPCC triple file instead of MySQL
    #[arg(long, global = true)]
    triples: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive question loop
    Ask,
    /// Answer a single question
    Query {
        /// Question to ask
        question: String,
    },
    /// Load an NLPCC triple file into the MySQL fact store
    Import {
        /// Path to the triple file
        path: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.level.as_str().into());

    // stdout carries the answers
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn open_store(
    config: &AppConfig,
    triples: Option<&Path>,
) -> anyhow::Result<Arc<dyn FactStore>> {
    match triples {
        Some(path) => {
            let facts = read_triples_file(path).await?;
            tracing::info!("Loaded {} facts from {}", facts.len(), path.display());
            Ok(Arc::new(InMemoryFactStore::from_triples(facts)))
        }
        None => Ok(Arc::new(MySqlFactStore::new(&config.database).await?)),
    }
}

async fn import(config: &AppConfig, path: &Path) -> anyhow::Result<()> {
    let facts = read_triples_file(path).await?;

    let store = MySqlFactStore::new(&config.database).await?;
    store.init_schema().await?;
    let written = store.insert_batch(&facts).await?;

    println!(
        "Imported {} facts from {} into {}",
        written,
        path.display(),
        config.database.table
    );
    Ok(())
}

async fn ask_loop(orchestrator: &KbqaOrchestrator) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("问题：");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question == "quit" {
            break;
        }
        if question.is_empty() {
            continue;
        }

        match orchestrator.answer(question).await {
            Ok(answer) => println!("回答: {answer}"),
            Err(e) => tracing::error!("Query failed: {}", e),
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).context("Invalid configuration")?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Import { path } => import(&config, &path).await?,
        Commands::Query { question } => {
            let store = open_store(&config, cli.triples.as_deref()).await?;
            let orchestrator = KbqaOrchestrator::from_config(&config, store)?;
            println!("{}", orchestrator.answer(&question).await?);
            orchestrator.drain().await;
        }
        Commands::Ask => {
            let store = open_store(&config, cli.triples.as_deref()).await?;
            let orchestrator = KbqaOrchestrator::from_config(&config, store)?;
            let result = ask_loop(&orchestrator).await;
            orchestrator.drain().await;
            result?;
        }
    }

    Ok(())
}
