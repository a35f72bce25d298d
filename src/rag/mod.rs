pub mod embeddings;
pub mod index;
pub mod metadata;
pub mod persistence;
pub mod pipeline;
pub mod prompt;
pub mod retry;
pub mod store;

use std::sync::Arc;

use crate::chat::ChatCompletion;
use crate::error::{RagError, RagResult};
use crate::models::{Answer, Completion};
use self::embeddings::Embedder;
use self::prompt::PromptBuilder;
use self::retry::RetryPolicy;
use self::store::IndexHandle;

pub const DEFAULT_K: usize = 5;

/// Answers questions from the nearest stored documents.
pub struct QueryEngine {
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatCompletion>,
    index: Arc<IndexHandle>,
    prompt: PromptBuilder,
    retry: RetryPolicy,
}

impl QueryEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatCompletion>,
        index: Arc<IndexHandle>,
        prompt: PromptBuilder,
    ) -> Self {
        Self {
            embedder,
            chat,
            index,
            prompt,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn index(&self) -> &Arc<IndexHandle> {
        &self.index
    }

    pub async fn answer(&self, question: &str, k: usize) -> RagResult<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidInput("question is empty".to_string()));
        }

        // One snapshot for the whole call, so a concurrent swap cannot mix builds.
        let store = self.index.current()?;

        let (embedded, _) = self.retry.run(|| self.embedder.embed(question)).await;
        let query_vector = embedded?;

        let mut sources = store.search(&query_vector, k)?;
        let prompt = self.prompt.assemble(question, &sources);
        let dropped_sources = sources.split_off(prompt.sources_used);

        tracing::info!(
            "Retrieved {} sources, {} in prompt ({} tokens)",
            sources.len() + dropped_sources.len(),
            prompt.sources_used,
            prompt.tokens
        );

        let (completed, attempts) = self.retry.run(|| self.chat.complete(&prompt.text)).await;
        let completion = match completed {
            Ok(text) => Completion::Answered { text },
            Err(e) => {
                tracing::error!("Chat completion failed after {} attempts: {}", attempts, e);
                Completion::Unavailable {
                    reason: e.to_string(),
                }
            }
        };

        Ok(Answer {
            question: question.to_string(),
            completion,
            sources,
            dropped_sources,
        })
    }
}
