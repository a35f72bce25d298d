use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Why a call to an external model service failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    RateLimited,
    Network,
    Server,
    Unauthorized,
    QuotaExhausted,
    InputTooLarge,
    BadRequest,
    Decode,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::Timeout | FailureKind::RateLimited | FailureKind::Network | FailureKind::Server
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::RateLimited => "rate limited",
            FailureKind::Network => "network",
            FailureKind::Server => "server error",
            FailureKind::Unauthorized => "unauthorized",
            FailureKind::QuotaExhausted => "quota exhausted",
            FailureKind::InputTooLarge => "input too large",
            FailureKind::BadRequest => "bad request",
            FailureKind::Decode => "undecodable response",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct ServiceError {
    pub kind: FailureKind,
    pub message: String,
}

impl ServiceError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Maps a reqwest transport error; status-based errors are classified by the caller.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            FailureKind::Timeout
        } else if err.is_decode() {
            FailureKind::Decode
        } else {
            FailureKind::Network
        };
        Self::new(kind, err.to_string())
    }

    /// Classifies a non-success HTTP response from an OpenAI-compatible endpoint.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let lower = body.to_ascii_lowercase();
        let kind = match status.as_u16() {
            401 | 403 => FailureKind::Unauthorized,
            408 => FailureKind::Timeout,
            413 => FailureKind::InputTooLarge,
            429 if lower.contains("insufficient_quota") => FailureKind::QuotaExhausted,
            429 => FailureKind::RateLimited,
            400 if lower.contains("context length") || lower.contains("too many tokens") => {
                FailureKind::InputTooLarge
            }
            402 => FailureKind::QuotaExhausted,
            s if s >= 500 => FailureKind::Server,
            _ => FailureKind::BadRequest,
        };
        Self::new(kind, format!("{} - {}", status, body.trim()))
    }
}

/// Coarse error classes reported to operators and HTTP callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Transient,
    Permanent,
    DataIntegrity,
    NotFound,
    InvalidInput,
    Internal,
}

#[derive(Error, Debug)]
pub enum RagError {
    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("record {id}: embedding dimension {got}, expected {expected}")]
    RecordDimensionMismatch { id: String, expected: usize, got: usize },

    #[error("index has {index} rows but metadata has {metadata}")]
    CountMismatch { index: usize, metadata: usize },

    #[error("manifest records {expected} {field} but the index has {actual}")]
    ManifestMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("corrupt artifact {path}: {reason}")]
    CorruptArtifact { path: PathBuf, reason: String },

    #[error("missing artifact: {0}")]
    MissingArtifact(PathBuf),

    #[error("index is empty")]
    EmptyIndex,

    #[error("no index loaded")]
    IndexNotLoaded,

    #[error("no record could be embedded ({failed} failed, {skipped} skipped)")]
    NoEmbeddings { failed: usize, skipped: usize },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("source query failed: {0}")]
    Source(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

pub type RagResult<T> = Result<T, RagError>;

impl RagError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RagError::Service(e) if e.is_retryable() => ErrorCategory::Transient,
            RagError::Service(_) => ErrorCategory::Permanent,
            RagError::DimensionMismatch { .. }
            | RagError::RecordDimensionMismatch { .. }
            | RagError::CountMismatch { .. }
            | RagError::ManifestMismatch { .. }
            | RagError::CorruptArtifact { .. } => ErrorCategory::DataIntegrity,
            RagError::MissingArtifact(_) | RagError::EmptyIndex | RagError::IndexNotLoaded => {
                ErrorCategory::NotFound
            }
            RagError::NoEmbeddings { .. } => ErrorCategory::Permanent,
            RagError::InvalidInput(_) => ErrorCategory::InvalidInput,
            RagError::Source(_) => ErrorCategory::Transient,
            RagError::Config(_)
            | RagError::Io(_)
            | RagError::Json(_)
            | RagError::Encoding(_) => ErrorCategory::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}
