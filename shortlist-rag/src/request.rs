//! Request and outcome types for [`ShortlistEngine::shortlist`](crate::ShortlistEngine::shortlist).

use serde::{Deserialize, Serialize};

use crate::document::{Document, LoadedDocument, Metadata};
use crate::error::ShortlistError;
use crate::explainer::Rationale;
use crate::provider::{EmbeddingBackend, LlmBackend};
use crate::ranker::InsufficientCandidates;
use crate::requirements::JobRequirements;

/// Where a request's candidate vectors live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionMode {
    /// A fresh collection, dropped when the request ends.
    #[default]
    Ephemeral,
    /// A persistent collection, created on first use and reused afterwards.
    Named(String),
}

/// A file the external loader could not read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderFailure {
    /// The uploaded file's name.
    pub filename: String,
    /// Why loading failed.
    pub reason: String,
}

/// Everything needed to shortlist candidates for one job.
///
/// # Example
///
/// ```rust,ignore
/// let request = ShortlistRequest::new(jd_text, 5)
///     .with_candidate(Document::candidate("ada", ada_cv))
///     .with_loaded(loaded_pdf)
///     .with_collection(CollectionMode::Named("backend-roles".into()));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ShortlistRequest {
    /// The job description text.
    pub job_description: String,
    /// Candidate CVs, already extracted to text.
    pub candidates: Vec<Document>,
    /// Files that never reached the engine.
    pub loader_failures: Vec<LoaderFailure>,
    /// Requested shortlist size, `1..=50`.
    pub num_shortlisted: usize,
    /// Embedding backend, or the engine default.
    pub embedding_backend: Option<EmbeddingBackend>,
    /// Language-model backend, or the engine default.
    pub llm_backend: Option<LlmBackend>,
    /// Collection lifecycle.
    pub collection: CollectionMode,
    /// Whether to extract structured job requirements.
    pub extract_requirements: bool,
}

impl ShortlistRequest {
    /// A request for the best `num_shortlisted` candidates against `job_description`.
    pub fn new(job_description: impl Into<String>, num_shortlisted: usize) -> Self {
        Self {
            job_description: job_description.into(),
            candidates: Vec::new(),
            loader_failures: Vec::new(),
            num_shortlisted,
            embedding_backend: None,
            llm_backend: None,
            collection: CollectionMode::Ephemeral,
            extract_requirements: false,
        }
    }

    /// Add a candidate document.
    pub fn with_candidate(mut self, document: Document) -> Self {
        self.candidates.push(document);
        self
    }

    /// Add several candidate documents.
    pub fn with_candidates(mut self, documents: impl IntoIterator<Item = Document>) -> Self {
        self.candidates.extend(documents);
        self
    }

    /// Add a loader result, keyed by its file name.
    pub fn with_loaded(self, loaded: LoadedDocument) -> Self {
        let id = loaded.original_filename.clone();
        self.with_candidate(Document::from_loaded(id, loaded))
    }

    /// Record a file the loader could not read.
    pub fn with_loader_failure(
        mut self,
        filename: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        self.loader_failures.push(LoaderFailure {
            filename: filename.into(),
            reason: reason.into(),
        });
        self
    }

    /// Choose the embedding backend.
    pub fn with_embedding_backend(mut self, backend: EmbeddingBackend) -> Self {
        self.embedding_backend = Some(backend);
        self
    }

    /// Choose the language-model backend.
    pub fn with_llm_backend(mut self, backend: LlmBackend) -> Self {
        self.llm_backend = Some(backend);
        self
    }

    /// Choose the collection lifecycle.
    pub fn with_collection(mut self, collection: CollectionMode) -> Self {
        self.collection = collection;
        self
    }

    /// Also extract structured requirements from the job description.
    pub fn with_requirements(mut self) -> Self {
        self.extract_requirements = true;
        self
    }
}

/// One document (or explanation) that failed without failing the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFailure {
    /// The document id, or the file name for loader failures.
    pub document_id: String,
    /// Taxonomy tag, see [`ShortlistError::tag`].
    pub kind: String,
    /// Human-readable detail.
    pub reason: String,
}

impl DocumentFailure {
    /// Record `error` against `document_id`.
    pub fn from_error(document_id: impl Into<String>, error: &ShortlistError) -> Self {
        Self {
            document_id: document_id.into(),
            kind: error.tag().to_string(),
            reason: error.to_string(),
        }
    }
}

impl From<&LoaderFailure> for DocumentFailure {
    fn from(failure: &LoaderFailure) -> Self {
        Self {
            document_id: failure.filename.clone(),
            kind: "document_ingestion".to_string(),
            reason: failure.reason.clone(),
        }
    }
}

/// Everything that went wrong without aborting the request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialFailureReport {
    /// Candidate documents excluded from the index, in request order.
    pub failures: Vec<DocumentFailure>,
    /// Shortlisted candidates whose rationale is a fallback, in rank order.
    pub explanation_failures: Vec<DocumentFailure>,
    /// Whether the request deadline cut a stage short.
    pub timed_out: bool,
}

impl PartialFailureReport {
    /// Whether nothing went wrong.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty() && self.explanation_failures.is_empty() && !self.timed_out
    }
}

/// One shortlisted candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortlistEntry {
    /// 1-based position.
    pub rank: usize,
    /// The candidate document id.
    pub candidate_id: String,
    /// Score normalized over this result set, `0.0..=1.0`.
    pub score: f32,
    /// Best raw similarity.
    pub raw_score: f32,
    /// Contributing text units, best first.
    pub contributing_unit_ids: Vec<String>,
    /// Candidate metadata.
    pub metadata: Metadata,
    /// Start of the best-matching unit.
    pub content_preview: String,
    /// Why the candidate ranks here.
    pub rationale: Rationale,
}

/// The result of a shortlisting request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortlistOutcome {
    /// The collection that was queried.
    pub collection: String,
    /// Shortlisted candidates, best first.
    pub entries: Vec<ShortlistEntry>,
    /// Non-fatal failures.
    pub report: PartialFailureReport,
    /// Set when fewer candidates were available than requested.
    pub insufficient: Option<InsufficientCandidates>,
    /// Candidate documents ingested by this request.
    pub total_candidates_processed: usize,
    /// Structured job requirements, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_requirements: Option<JobRequirements>,
    /// Summary line for the caller.
    pub message: String,
}
