//! Error types for the `shortlist-rag` crate.

use thiserror::Error;

use crate::document::VectorSpace;

/// Errors that can occur while matching and shortlisting candidates.
///
/// Per-document variants ([`DocumentIngestion`](ShortlistError::DocumentIngestion))
/// are collected into a report and never abort a request on their own. The
/// remaining variants are fatal for the operation that raised them.
#[derive(Debug, Error)]
pub enum ShortlistError {
    /// A single document could not be normalized or embedded.
    #[error("Document '{document_id}' could not be ingested: {reason}")]
    DocumentIngestion {
        /// The document that failed.
        document_id: String,
        /// A description of the failure.
        reason: String,
    },

    /// A query vector does not live in the same vector space as the collection.
    #[error(
        "Dimension mismatch in collection '{collection}': expected {expected}, got {actual}"
    )]
    DimensionMismatch {
        /// The collection that was queried.
        collection: String,
        /// The vector space the collection was created with.
        expected: VectorSpace,
        /// The vector space of the offending vector.
        actual: VectorSpace,
    },

    /// An embedding provider kept failing after bounded retries.
    #[error("Embedding provider '{provider}' unavailable after {attempts} attempt(s): {message}")]
    EmbeddingUnavailable {
        /// The embedding provider that failed.
        provider: String,
        /// Number of attempts made.
        attempts: u32,
        /// The last error reported by the provider.
        message: String,
    },

    /// A language model kept failing after bounded retries.
    #[error("Language model '{provider}' unavailable after {attempts} attempt(s): {message}")]
    LlmUnavailable {
        /// The language model that failed.
        provider: String,
        /// Number of attempts made.
        attempts: u32,
        /// The last error reported by the provider.
        message: String,
    },

    /// Fewer candidates were available than requested.
    #[error("Requested {requested} candidate(s) but only {available} available")]
    InsufficientCandidates {
        /// The requested shortlist size.
        requested: usize,
        /// The number of candidates actually ranked.
        available: usize,
    },

    /// The job description is empty after normalization.
    #[error("No valid job description content found")]
    NoJobDescription,

    /// Every candidate document failed ingestion.
    #[error("No candidate document could be ingested ({failed} failed)")]
    NoCandidatesIngested {
        /// Number of failed candidate documents.
        failed: usize,
    },

    /// The request deadline elapsed during a stage that cannot degrade.
    #[error("Request timed out during {stage}")]
    Timeout {
        /// The pipeline stage that was running.
        stage: String,
    },

    /// A provider name did not resolve to a known backend.
    #[error("Unknown {kind} provider '{name}'")]
    UnknownProvider {
        /// Either `embedding` or `llm`.
        kind: &'static str,
        /// The name that failed to resolve.
        name: String,
    },

    /// Credentials for the selected provider are missing.
    #[error("Missing credentials for {provider}: set {variable}")]
    MissingCredentials {
        /// The provider that needs credentials.
        provider: String,
        /// The environment variable that supplies them.
        variable: String,
    },

    /// A local embedding model could not be loaded.
    #[error("Local model at '{path}' could not be loaded: {message}")]
    LocalModel {
        /// The model directory.
        path: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred in the vector store backend.
    #[error("Vector store error ({backend}): {message}")]
    VectorStore {
        /// The vector store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem error while persisting a collection.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Serialization error while persisting a collection.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl ShortlistError {
    /// A stable, machine-readable tag for this error's taxonomy class.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::DocumentIngestion { .. } => "document_ingestion",
            Self::DimensionMismatch { .. } => "dimension_mismatch",
            Self::EmbeddingUnavailable { .. } => "embedding_unavailable",
            Self::LlmUnavailable { .. } => "llm_unavailable",
            Self::InsufficientCandidates { .. } => "insufficient_candidates",
            Self::NoJobDescription => "no_job_description",
            Self::NoCandidatesIngested { .. } => "no_candidates_ingested",
            Self::Timeout { .. } => "timeout",
            Self::UnknownProvider { .. } => "unknown_provider",
            Self::MissingCredentials { .. } => "missing_credentials",
            Self::LocalModel { .. } => "local_model",
            Self::VectorStore { .. } => "vector_store",
            Self::Config(_) => "config",
            Self::Io(_) | Self::Serialization(_) => "storage",
        }
    }
}

/// A convenience result type for shortlisting operations.
pub type Result<T> = std::result::Result<T, ShortlistError>;

/// A single failed call to a remote or local provider.
///
/// Backends return this narrower error; the retry layer decides whether to
/// try again and converts exhausted retries into
/// [`ShortlistError::EmbeddingUnavailable`] or [`ShortlistError::LlmUnavailable`].
#[derive(Debug, Clone, Error)]
#[error("{provider}: {message}")]
pub struct ProviderError {
    /// The provider that produced the error.
    pub provider: String,
    /// A description of the failure.
    pub message: String,
    /// Whether a later attempt may succeed.
    pub retryable: bool,
}

impl ProviderError {
    /// A failure that is worth retrying (timeouts, rate limits, 5xx, auth).
    pub fn transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that will not go away on retry (malformed request, bad input).
    pub fn permanent(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Classify an HTTP status from a remote provider.
    pub fn from_status(provider: impl Into<String>, status: u16, detail: &str) -> Self {
        let message = format!("API returned {status}: {detail}");
        let retryable = matches!(status, 401 | 403 | 408 | 429) || status >= 500;
        Self {
            provider: provider.into(),
            message,
            retryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retryable(status: u16, detail: &str) -> bool {
        ProviderError::from_status("OpenAI", status, detail).retryable
    }

    #[test]
    fn status_classification() {
        assert!(retryable(429, "slow down"));
        assert!(retryable(503, ""));
        assert!(retryable(401, "bad key"));
        assert!(!retryable(400, "bad input"));
    }

    #[test]
    fn tags_are_stable() {
        let err = ShortlistError::InsufficientCandidates {
            requested: 5,
            available: 3,
        };
        assert_eq!(err.tag(), "insufficient_candidates");
        assert_eq!(ShortlistError::NoJobDescription.tag(), "no_job_description");
    }
}
