use std::path::PathBuf;
use std::sync::Arc;
use anyhow::Result;
use clap::Parser;

use insights_rag::chat::ChatClient;
use insights_rag::config::Settings;
use insights_rag::rag::embeddings;
use insights_rag::rag::persistence;
use insights_rag::rag::prompt::PromptBuilder;
use insights_rag::rag::retry::RetryPolicy;
use insights_rag::rag::store::IndexHandle;
use insights_rag::rag::QueryEngine;
use insights_rag::server::{self, AppState};

#[derive(Parser, Debug)]
#[command(name = "insights-rag")]
#[command(about = "Serve questions over the customer feedback index")]
struct Args {
    /// Settings file (TOML); defaults to ./rag.toml when present
    #[arg(short, long, env = "RAG_CONFIG")]
    config: Option<PathBuf>,

    /// Index directory, overrides `index_dir` from settings
    #[arg(long)]
    index_dir: Option<PathBuf>,

    /// Listen address, overrides `server.bind`
    #[arg(long)]
    bind: Option<String>,
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
    if let Some(bind) = args.bind {
        settings.server.bind = bind;
    }

    tracing::info!("Embedding model: {}", settings.embedding.model);
    tracing::info!("Chat model: {}", settings.chat.model);

    let embedder = embeddings::from_settings(&settings.embedding)?;
    let chat = Arc::new(ChatClient::new(&settings.chat)?);

    let mut loaded_manifest = None;
    let index = match persistence::load(&settings.index_dir) {
        Ok((store, manifest)) => {
            tracing::info!("Index loaded: {} rows, model {}", manifest.rows, manifest.embedding_model);
            if manifest.embedding_model != embedder.model_name() {
                tracing::warn!(
                    "Index was built with {} but queries use {}",
                    manifest.embedding_model,
                    embedder.model_name()
                );
            }
            loaded_manifest = Some(manifest);
            IndexHandle::new(Some(store))
        }
        Err(e) => {
            tracing::warn!("Index load failed (continuing without index): {}", e);
            IndexHandle::new(None)
        }
    };

    let engine = QueryEngine::new(
        embedder,
        chat,
        Arc::new(index),
        PromptBuilder::new(settings.chat.max_prompt_tokens),
    )
    .with_retry(RetryPolicy::from_settings(&settings.pipeline));

    let state = Arc::new(AppState::new(
        engine,
        settings.index_dir.clone(),
        loaded_manifest,
        &settings.server,
    ));
    let app = server::app(state);

    let listener = tokio::net::TcpListener::bind(&settings.server.bind).await?;
    tracing::info!("Query server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
