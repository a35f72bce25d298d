use anyhow::Result;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

use insights_rag::chat::ChatClient;
use insights_rag::config::Settings;
use insights_rag::models::Record;
use insights_rag::rag::embeddings;
use insights_rag::rag::persistence;
use insights_rag::rag::pipeline::EmbeddingPipeline;
use insights_rag::rag::retry::RetryPolicy;
use insights_rag::source::{JsonlSource, RecordSource, WarehouseSource};
use insights_rag::summarize::{summarize_records, write_summaries};

#[derive(Parser, Debug)]
#[command(name = "rag-indexer")]
#[command(about = "Embed customer feedback into a persisted vector index")]
struct Args {
    /// Settings file (TOML); defaults to ./rag.toml when present
    #[arg(short, long, env = "RAG_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// JSON-lines input; reads from the warehouse query when omitted
    #[arg(short, long, global = true)]
    input: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Embed every record and write index + metadata
    Build {
        /// Output directory, overrides `index_dir` from settings
        #[arg(long)]
        index_dir: Option<PathBuf>,

        /// Parallel embedding requests, overrides `pipeline.concurrency`
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Write a one-sentence summary for every record
    Summarize {
        /// JSON-lines output file (overwritten)
        #[arg(short, long, default_value = "summaries.jsonl")]
        output: PathBuf,
    },
}

fn progress_bar(len: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

async fn fetch_records(args: &Args, settings: &Settings) -> Result<Vec<Record>> {
    let source: Box<dyn RecordSource> = match &args.input {
        Some(path) => Box::new(JsonlSource::new(path)),
        None => Box::new(WarehouseSource::connect(&settings.source).await?),
    };
    println!("Reading records from {}...", source.describe());
    Ok(source.fetch().await?)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    insights_rag::init_tracing();

    let args = Args::parse();
    let mut settings = Settings::load(args.config.as_deref())?;

    match &args.command {
        Command::Build { index_dir, concurrency } => {
            if let Some(dir) = index_dir {
                settings.index_dir = dir.clone();
            }
            if let Some(n) = concurrency {
                settings.pipeline.concurrency = *n;
            }
            build(&args, &settings).await
        }
        Command::Summarize { output } => summarize(&args, &settings, output).await,
    }
}

async fn build(args: &Args, settings: &Settings) -> Result<()> {
    let records = fetch_records(args, settings).await?;
    println!("Found {} records", records.len());

    if records.is_empty() {
        println!("No records found. Exiting.");
        return Ok(());
    }

    println!("Initializing embedding model ({})...", settings.embedding.model);
    let embedder = embeddings::from_settings(&settings.embedding)?;

    let pb = progress_bar(records.len())?;
    let pipeline = EmbeddingPipeline::new(embedder, &settings.pipeline).with_progress(pb.clone());
    let output = pipeline.build(records).await;
    pb.finish_with_message("done");
    let output = output?;

    let manifest = persistence::save(&output.store, &settings.index_dir)?;
    let report = &output.report;

    println!("\nIndexing complete!");
    println!("  Records read:    {}", report.total);
    println!("  Embedded:        {}", report.embedded);
    println!("  Failed:          {}", report.failures.len());
    println!("  Empty skipped:   {}", report.skipped_empty.len());
    println!("  Duplicate ids:   {}", report.duplicates.len());
    println!("  Dimension:       {}", manifest.dimension);
    println!("  Index dir:       {}", settings.index_dir.display());

    if !report.failures.is_empty() {
        println!("\nFailed records:");
        for f in &report.failures {
            println!("  {} [{}] after {} attempts: {}", f.id, f.kind, f.attempts, f.message);
        }
    }

    Ok(())
}

async fn summarize(args: &Args, settings: &Settings, output: &PathBuf) -> Result<()> {
    let records = fetch_records(args, settings).await?;
    println!("Summarizing {} records with {}...", records.len(), settings.chat.model);

    let chat = ChatClient::new(&settings.chat)?;
    let rows = summarize_records(
        &chat,
        records,
        settings.pipeline.concurrency,
        RetryPolicy::from_settings(&settings.pipeline),
    )
    .await;

    write_summaries(&rows, output)?;
    let failed = rows.iter().filter(|r| r.error.is_some()).count();

    println!("\nSummaries written to {}", output.display());
    println!("  Rows:   {}", rows.len());
    println!("  Failed: {}", failed);

    Ok(())
}
