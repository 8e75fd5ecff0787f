use async_openai::error::OpenAIError;
use thiserror::Error;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Dataset error: {0}")]
    Dataset(String),
    #[error("Embedding error: {0}")]
    Embedding(String),
    #[error("Embedding failed for record #{record}: {reason}")]
    EmbeddingFailed { record: usize, reason: String },
    #[error("Index dimension mismatch: expected {expected}, provider returned {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Timed out after {seconds}s waiting for {operation}")]
    Timeout {
        operation: &'static str,
        seconds: u64,
    },
    #[error("Answer synthesis error: {0}")]
    Synthesis(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Index snapshot error: {0}")]
    Snapshot(String),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Whether the error is a provider timeout, as opposed to a provider fault.
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
