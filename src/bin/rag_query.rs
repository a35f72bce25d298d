use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use insights_rag::chat::ChatClient;
use insights_rag::config::Settings;
use insights_rag::models::Completion;
use insights_rag::rag::embeddings;
use insights_rag::rag::persistence;
use insights_rag::rag::prompt::PromptBuilder;
use insights_rag::rag::retry::RetryPolicy;
use insights_rag::rag::store::IndexHandle;
use insights_rag::rag::QueryEngine;

#[derive(Parser, Debug)]
#[command(name = "rag-query")]
#[command(about = "Ask one question against a persisted feedback index")]
struct Args {
    /// Question to answer
    question: String,

    /// Number of sources to retrieve
    #[arg(short, long)]
    k: Option<usize>,

    /// Settings file (TOML); defaults to ./rag.toml when present
    #[arg(short, long, env = "RAG_CONFIG")]
    config: Option<PathBuf>,

    /// Index directory, overrides `index_dir` from settings
    #[arg(long)]
    index_dir: Option<PathBuf>,

    /// Print the answer as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    insights_rag::init_tracing();

    let args = Args::parse();
    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(dir) = args.index_dir {
        settings.index_dir = dir;
    }

    if args.question.trim().is_empty() {
        return Ok(());
    }

    let (store, manifest) = persistence::load(&settings.index_dir)?;
    tracing::info!("Loaded {} rows built with {}", manifest.rows, manifest.embedding_model);

    let engine = QueryEngine::new(
        embeddings::from_settings(&settings.embedding)?,
        Arc::new(ChatClient::new(&settings.chat)?),
        Arc::new(IndexHandle::new(Some(store))),
        PromptBuilder::new(settings.chat.max_prompt_tokens),
    )
    .with_retry(RetryPolicy::from_settings(&settings.pipeline));

    let k = args.k.unwrap_or(settings.server.default_k);
    let answer = engine.answer(&args.question, k).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
        return Ok(());
    }

    match &answer.completion {
        Completion::Answered { text } => println!("{}\n", text),
        Completion::Unavailable { reason } => println!("[answer unavailable: {}]\n", reason),
    }

    println!("Sources ({} used in prompt):", answer.sources.len());
    for (i, source) in answer.sources.iter().enumerate() {
        println!(
            "  {}. [{}] customer {} (distance {:.4})",
            i + 1,
            source.id,
            source.customer_id,
            source.distance
        );
        println!("     {}", source.text);
    }

    if !answer.dropped_sources.is_empty() {
        println!(
            "\n{} more retrieved sources did not fit the prompt budget:",
            answer.dropped_sources.len()
        );
        for source in &answer.dropped_sources {
            println!("  - [{}] (distance {:.4})", source.id, source.distance);
        }
    }

    Ok(())
}
