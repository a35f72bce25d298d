use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{TextEmbedding, UserDefinedEmbeddingModel, TokenizerFiles, InitOptionsUserDefined};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::{EmbeddingProvider, EmbeddingSettings};
use crate::error::{FailureKind, RagError, RagResult, ServiceError};

/// Turns text into a fixed-length vector. Implementations never retry.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError>;

    fn model_name(&self) -> &str;
}

/// Builds the embedder selected in configuration.
pub fn from_settings(settings: &EmbeddingSettings) -> RagResult<Arc<dyn Embedder>> {
    match settings.provider {
        EmbeddingProvider::OpenAi => Ok(Arc::new(OpenAiEmbedder::new(settings)?)),
        EmbeddingProvider::Local => Ok(Arc::new(LocalEmbedder::new(&settings.model_dir)?)),
    }
}

fn reject_empty(text: &str) -> Result<(), ServiceError> {
    if text.trim().is_empty() {
        return Err(ServiceError::new(FailureKind::BadRequest, "cannot embed empty text"));
    }
    Ok(())
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiEmbedder {
    pub fn new(settings: &EmbeddingSettings) -> RagResult<Self> {
        if settings.model.trim().is_empty() {
            return Err(RagError::InvalidInput("embedding model name is empty".to_string()));
        }
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| ServiceError::new(FailureKind::Network, e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", settings.base_url.trim_end_matches('/')),
            model: settings.model.clone(),
            api_key: settings.api_key.clone(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        reject_empty(text)?;

        let mut req = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: text,
        });
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| ServiceError::from_transport(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status(status, &error_text));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::from_transport(&e))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ServiceError::new(FailureKind::Decode, "response contained no embedding"))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Runs CPU-bound inference on tokio's blocking pool instead of an async worker.
async fn on_blocking_pool<T, F>(work: F) -> Result<T, ServiceError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ServiceError::new(FailureKind::Server, format!("embedding task failed: {}", e)))
}

/// In-process ONNX model loaded from a local directory.
pub struct LocalEmbedder {
    model: Arc<TextEmbedding>,
    name: String,
}

impl LocalEmbedder {
    pub fn new(model_dir: &Path) -> RagResult<Self> {
        tracing::info!("Initializing embedding model from {}", model_dir.display());

        if !model_dir.is_dir() {
            return Err(RagError::MissingArtifact(model_dir.to_path_buf()));
        }
        let read = |name: &str| -> RagResult<Vec<u8>> {
            let path = model_dir.join(name);
            if !path.is_file() {
                return Err(RagError::MissingArtifact(path));
            }
            Ok(std::fs::read(path)?)
        };

        let user_model = UserDefinedEmbeddingModel {
            onnx_file: read("model.onnx")?,
            tokenizer_files: TokenizerFiles {
                tokenizer_file: read("tokenizer.json")?,
                config_file: read("config.json")?,
                special_tokens_map_file: read("special_tokens_map.json")?,
                tokenizer_config_file: read("tokenizer_config.json")?,
            },
        };

        let model = TextEmbedding::try_new_from_user_defined(user_model, InitOptionsUserDefined::default())
            .map_err(|e| RagError::InvalidInput(format!("failed to initialize embedding model: {}", e)))?;

        let name = model_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "local".to_string());

        tracing::info!("Embedding model {} initialized", name);
        Ok(Self {
            model: Arc::new(model),
            name,
        })
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        reject_empty(text)?;
        let model = Arc::clone(&self.model);
        let text = text.to_string();
        let embeddings = on_blocking_pool(move || model.embed(vec![text], None))
            .await?
            .map_err(|e| ServiceError::new(FailureKind::BadRequest, e.to_string()))?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::new(FailureKind::Decode, "model returned no embedding"))
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}
