//! Error types for the query and ingestion pipelines.
//!
//! Every fallible core operation returns [`Result`]. The binary and the HTTP
//! layer wrap these in `anyhow` where they only need to report them.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the loader, chunk index, model adapters and stores.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The file extension is not one of pdf, docx, html, htm or txt.
    #[error("unsupported file type '{extension}': {}", path.display())]
    UnsupportedFormat { path: PathBuf, extension: String },

    /// A recognized format failed to parse.
    #[error("failed to load {}: {message}", path.display())]
    Load { path: PathBuf, message: String },

    /// The embedding call failed, timed out, or returned malformed vectors.
    #[error("embedding error ({provider}): {message}")]
    EmbeddingService { provider: String, message: String },

    /// The persisted index was created with a different dimensionality than
    /// the configured embedding provider produces.
    #[error(
        "index '{index}' has dimension {index_dims} but the embedding provider produces {provider_dims}"
    )]
    IndexDimensionMismatch {
        index: String,
        index_dims: usize,
        provider_dims: usize,
    },

    /// The answer-generation model call failed.
    #[error("model invocation failed: {message}")]
    ModelInvocation { message: String, retryable: bool },

    /// Vector index misuse or backend failure.
    #[error("vector index error: {0}")]
    Index(String),

    /// Stored chat history could not be read back.
    #[error("chat history error: {0}")]
    History(String),

    /// Account registration or lookup failure.
    #[error("account error: {0}")]
    Account(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(#[from] sqlx::Error),
}

impl PipelineError {
    pub(crate) fn load(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Load {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn embedding(provider: &str, message: impl ToString) -> Self {
        Self::EmbeddingService {
            provider: provider.to_string(),
            message: message.to_string(),
        }
    }

    /// Whether retrying the same request may succeed (timeouts, rate limits,
    /// server errors).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ModelInvocation { retryable, .. } => *retryable,
            Self::EmbeddingService { .. } => true,
            _ => false,
        }
    }

    /// Whether this error belongs to the per-file ingestion class that a batch
    /// run skips over.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFormat { .. } | Self::Load { .. } | Self::EmbeddingService { .. }
        )
    }
}

/// Convenience result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_format_message_names_extension() {
        let err = PipelineError::UnsupportedFormat {
            path: PathBuf::from("notes.csv"),
            extension: "csv".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("csv"));
        assert!(msg.contains("notes.csv"));
        assert!(err.is_per_file());
    }

    #[test]
    fn test_retryable_classification() {
        let timeout = PipelineError::ModelInvocation {
            message: "timed out".to_string(),
            retryable: true,
        };
        let rejected = PipelineError::ModelInvocation {
            message: "401".to_string(),
            retryable: false,
        };
        assert!(timeout.is_retryable());
        assert!(!rejected.is_retryable());
        assert!(!PipelineError::Config("x".to_string()).is_retryable());
    }

    #[test]
    fn test_dimension_mismatch_is_not_per_file() {
        let err = PipelineError::IndexDimensionMismatch {
            index: "college".to_string(),
            index_dims: 768,
            provider_dims: 384,
        };
        assert!(!err.is_per_file());
        assert!(err.to_string().contains("768"));
    }
}
