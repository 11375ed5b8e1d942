//! Data types for documents, text units, vectors, and match results.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A scalar metadata value.
///
/// Metadata is intentionally limited to this closed set; downstream code must
/// not assume any particular key is present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetadataValue {
    /// Whole number, e.g. years of experience or a page number.
    Integer(i64),
    /// Fractional number.
    Float(f64),
    /// Free text, e.g. a name or a comma separated skills list.
    Text(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// Key-value metadata, ordered by key so serialized output is stable.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Which side of the match a document is on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// A candidate's resume.
    CandidateCv,
    /// The job description candidates are matched against.
    JobDescription,
}

/// The format the text was extracted from. Informational only.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// Portable Document Format.
    Pdf,
    /// Word document.
    Docx,
    /// Plain text.
    #[default]
    Text,
}

impl SourceFormat {
    /// Guess the format from a file name's extension.
    pub fn from_filename(filename: &str) -> Self {
        let lower = filename.to_ascii_lowercase();
        if lower.ends_with(".pdf") {
            Self::Pdf
        } else if lower.ends_with(".docx") || lower.ends_with(".doc") {
            Self::Docx
        } else {
            Self::Text
        }
    }
}

/// Output of the external document loader for one uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadedDocument {
    /// Extracted text.
    pub raw_text: String,
    /// Format the text was extracted from.
    pub source_format: SourceFormat,
    /// The uploaded file's name.
    pub original_filename: String,
}

/// A candidate CV or job description, immutable once ingested.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Unique identifier within a session.
    pub id: String,
    /// Whether this is a CV or a job description.
    pub kind: DocumentKind,
    /// The extracted text.
    pub raw_text: String,
    /// Caller-supplied metadata; extracted metadata is merged on top at ingestion.
    pub metadata: Metadata,
    /// Format the text was extracted from.
    pub source_format: SourceFormat,
    /// The uploaded file's name, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
}

impl Document {
    /// A candidate CV with the given id and text.
    pub fn candidate(id: impl Into<String>, raw_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: DocumentKind::CandidateCv,
            raw_text: raw_text.into(),
            metadata: Metadata::new(),
            source_format: SourceFormat::Text,
            original_filename: None,
        }
    }

    /// A job description with the given text.
    pub fn job_description(raw_text: impl Into<String>) -> Self {
        Self {
            id: "job_description".to_string(),
            kind: DocumentKind::JobDescription,
            raw_text: raw_text.into(),
            metadata: Metadata::new(),
            source_format: SourceFormat::Text,
            original_filename: None,
        }
    }

    /// A candidate CV built from a loader result, keyed by its file name.
    pub fn from_loaded(id: impl Into<String>, loaded: LoadedDocument) -> Self {
        let mut metadata = Metadata::new();
        let source = loaded.original_filename.clone();
        metadata.insert("source".to_string(), source.into());
        Self {
            id: id.into(),
            kind: DocumentKind::CandidateCv,
            raw_text: loaded.raw_text,
            metadata,
            source_format: loaded.source_format,
            original_filename: Some(loaded.original_filename),
        }
    }

    /// Add a metadata entry.
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set the source format.
    pub fn with_source_format(mut self, format: SourceFormat) -> Self {
        self.source_format = format;
        self
    }
}

/// A normalized segment of a [`Document`]'s text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextUnit {
    /// Unique identifier, `{document_id}#{index}`.
    pub unit_id: String,
    /// The normalized text.
    pub text: String,
    /// The owning document.
    pub parent_document_id: String,
    /// Character offset of this unit within the cleaned document text.
    pub offset: usize,
}

/// The identity of the space a vector lives in.
///
/// Two vectors are comparable only when their spaces are equal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VectorSpace {
    /// Provider that produced the vector (`openai`, `gemini`, `local`, ...).
    pub provider_id: String,
    /// Model within the provider.
    pub model_id: String,
    /// Vector length.
    pub dim: usize,
}

impl VectorSpace {
    /// Create a new vector space identity.
    pub fn new(provider_id: impl Into<String>, model_id: impl Into<String>, dim: usize) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
            dim,
        }
    }
}

impl fmt::Display for VectorSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} (dim {})",
            self.provider_id, self.model_id, self.dim
        )
    }
}

/// A fixed-length embedding tagged with the space that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingVector {
    /// The vector components.
    pub values: Vec<f32>,
    /// Provider, model and dimension that produced `values`.
    pub space: VectorSpace,
}

impl EmbeddingVector {
    /// Wrap raw values in the given space.
    pub fn new(values: Vec<f32>, space: VectorSpace) -> Self {
        Self { values, space }
    }

    /// The vector length.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Whether this vector may be compared with `other`.
    pub fn is_comparable(&self, other: &EmbeddingVector) -> bool {
        self.space == other.space && self.dim() == other.dim()
    }
}

/// A text unit with its vector, as stored in a collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    /// The indexed text unit.
    pub unit: TextUnit,
    /// The unit's embedding.
    pub vector: EmbeddingVector,
    /// Metadata denormalized from the parent document.
    pub metadata: Metadata,
}

/// An [`IndexEntry`] paired with its similarity to a query vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredEntry {
    /// The matching entry.
    pub entry: IndexEntry,
    /// Raw similarity score (higher is more similar).
    pub score: f32,
}

/// One text unit that contributed to a candidate's match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitMatch {
    /// The contributing unit.
    pub unit_id: String,
    /// The unit's text, carried for the explanation prompt.
    pub text: String,
    /// Best raw score this unit achieved against any job description chunk.
    pub score: f32,
}

/// A candidate's merged similarity to the job description.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchResult {
    /// The candidate document id.
    pub candidate_id: String,
    /// Best raw similarity across all contributing units.
    pub raw_score: f32,
    /// Contributing units, best first.
    pub contributions: Vec<UnitMatch>,
    /// Metadata aggregated from the contributing entries.
    pub metadata: Metadata,
}

impl MatchResult {
    /// Ids of the contributing text units, best first.
    pub fn contributing_unit_ids(&self) -> Vec<&str> {
        self.contributions
            .iter()
            .map(|c| c.unit_id.as_str())
            .collect()
    }
}
