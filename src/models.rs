use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// One unit of source text; also the row type of the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub text: String,
}

impl Record {
    pub fn new(id: impl Into<String>, customer_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            customer_id: customer_id.into(),
            text: text.into(),
        }
    }
}

// Chat completion wire types (OpenAI compatible)

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

// Query engine output

/// A retrieved metadata row with its squared L2 distance to the question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: String,
    pub customer_id: String,
    pub text: String,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Completion {
    Answered { text: String },
    /// Retrieval succeeded but the chat model could not be reached.
    Unavailable { reason: String },
}

impl Completion {
    pub fn text(&self) -> Option<&str> {
        match self {
            Completion::Answered { text } => Some(text),
            Completion::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Completion::Answered { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub question: String,
    pub completion: Completion,
    /// Sources the prompt was built from, nearest first.
    pub sources: Vec<SourceDocument>,
    /// Retrieved but left out of the prompt by the token budget.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropped_sources: Vec<SourceDocument>,
}

// HTTP API types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub k: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexInfo {
    pub rows: usize,
    pub dimension: usize,
    pub embedding_model: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRow {
    pub id: String,
    pub customer_id: String,
    pub text: String,
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
