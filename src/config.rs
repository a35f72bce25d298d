use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::RagResult;

/// Which embedding backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    OpenAi,
    Local,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProvider,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Only used by the local provider.
    pub model_dir: PathBuf,
    pub timeout_secs: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::OpenAi,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "text-embedding-3-small".to_string(),
            model_dir: PathBuf::from("models/bge-small-en-v1.5"),
            timeout_secs: 30,
        }
    }
}

impl EmbeddingSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_answer_tokens: Option<u32>,
    /// Token budget for the assembled prompt (template + sources + question).
    pub max_prompt_tokens: usize,
    pub timeout_secs: u64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4".to_string(),
            temperature: 0.0,
            max_answer_tokens: None,
            max_prompt_tokens: 6000,
            timeout_secs: 60,
        }
    }
}

impl ChatSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Embed the first record with a given id; report later ones.
    #[default]
    KeepFirst,
    /// Keep every row, duplicates included.
    Coexist,
    /// Abort the build when an id repeats.
    Reject,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub concurrency: usize,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 16_000,
            duplicate_policy: DuplicatePolicy::KeepFirst,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub database_url: Option<String>,
    pub query: String,
    pub max_connections: u32,
}

pub const DEFAULT_SOURCE_QUERY: &str = r#"
SELECT CAST(feedback_id AS TEXT) AS id, CAST(customer_id AS TEXT) AS customer_id, comment AS text
FROM feedback
UNION ALL
SELECT CAST(ticket_id AS TEXT) AS id, CAST(customer_id AS TEXT) AS customer_id, text AS text
FROM support_tickets
"#;

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            database_url: None,
            query: DEFAULT_SOURCE_QUERY.to_string(),
            max_connections: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    pub request_timeout_secs: u64,
    pub default_k: usize,
    pub max_k: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 120,
            default_k: crate::rag::DEFAULT_K,
            max_k: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub index_dir: PathBuf,
    pub embedding: EmbeddingSettings,
    pub chat: ChatSettings,
    pub pipeline: PipelineSettings,
    pub source: SourceSettings,
    pub server: ServerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from("index"),
            embedding: EmbeddingSettings::default(),
            chat: ChatSettings::default(),
            pipeline: PipelineSettings::default(),
            source: SourceSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl Settings {
    /// Merges `rag.toml` (or `path`), then `RAG__SECTION__KEY` variables.
    ///
    /// `OPENAI_API_KEY` fills any API key left unset, and `DATABASE_URL` the
    /// source connection string. Call `dotenv::dotenv()` beforehand to pick up
    /// a `.env` file.
    pub fn load(path: Option<&Path>) -> RagResult<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name("rag").required(false),
        };

        let mut settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("RAG")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.apply_env_fallbacks(
            std::env::var("OPENAI_API_KEY").ok(),
            std::env::var("DATABASE_URL").ok(),
        );
        Ok(settings)
    }

    fn apply_env_fallbacks(&mut self, openai_key: Option<String>, database_url: Option<String>) {
        let openai_key = openai_key.filter(|k| !k.trim().is_empty());
        if self.embedding.api_key.is_none() {
            self.embedding.api_key = openai_key.clone();
        }
        if self.chat.api_key.is_none() {
            self.chat.api_key = openai_key;
        }
        if self.source.database_url.is_none() {
            self.source.database_url = database_url;
        }
    }
}
