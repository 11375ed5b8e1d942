//! Vector store trait for storing and querying text-unit embeddings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::document::{EmbeddingVector, IndexEntry, ScoredEntry, VectorSpace};
use crate::error::Result;

/// How similarity is computed within a collection. Fixed at creation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// Cosine of the angle between vectors.
    #[default]
    Cosine,
    /// Raw inner product, for providers that emit normalized vectors.
    DotProduct,
}

impl SimilarityMetric {
    /// Score `a` against `b`. Higher is more similar.
    pub fn score(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Cosine => cosine_similarity(a, b),
            Self::DotProduct => a.iter().zip(b).map(|(x, y)| x * y).sum(),
        }
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Parameters for creating (or reopening) a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSpec {
    /// Collection name.
    pub name: String,
    /// The only space vectors in this collection may come from.
    pub space: VectorSpace,
    /// Similarity metric used by queries.
    pub metric: SimilarityMetric,
    /// Whether the collection outlives the request that created it.
    pub persistent: bool,
}

/// Which collections a purge applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeScope {
    /// A single collection.
    Collection(String),
    /// Every collection in the store.
    All,
}

/// Entry count and identity of one collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionStatus {
    /// Collection name.
    pub name: String,
    /// Number of stored entries.
    pub entries: usize,
    /// The collection's vector space, if it exists.
    pub space: Option<VectorSpace>,
    /// Whether the collection is persisted.
    pub persistent: bool,
}

/// A storage backend for text-unit embeddings with similarity search.
///
/// Implementations manage named collections of [`IndexEntry`]s. Every
/// collection is bound to one [`VectorSpace`]; vectors from any other space
/// are rejected with
/// [`ShortlistError::DimensionMismatch`](crate::ShortlistError::DimensionMismatch).
///
/// # Example
///
/// ```rust,ignore
/// use shortlist_rag::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.create_collection(&spec).await?;
/// store.upsert("cvs", entries).await?;
/// let results = store.query("cvs", &jd_vector, 10).await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create a collection, or reopen it if it exists in the same space.
    async fn create_collection(&self, spec: &CollectionSpec) -> Result<()>;

    /// Remove a collection and all its entries. No-op if absent.
    async fn drop_collection(&self, name: &str) -> Result<()>;

    /// Insert or replace entries, keyed by text-unit id.
    async fn upsert(&self, collection: &str, entries: Vec<IndexEntry>) -> Result<()>;

    /// Remove every entry whose text unit belongs to one of `document_ids`.
    ///
    /// Returns the number of entries removed.
    async fn delete_documents(&self, collection: &str, document_ids: &[String]) -> Result<usize>;

    /// The `k` most similar entries, score-descending, ties in insertion order.
    async fn query(
        &self,
        collection: &str,
        vector: &EmbeddingVector,
        k: usize,
    ) -> Result<Vec<ScoredEntry>>;

    /// Remove all entries in scope. Purging nothing succeeds.
    async fn purge(&self, scope: &PurgeScope) -> Result<()>;

    /// Entry counts for one collection, or for all when `None`.
    async fn status(&self, collection: Option<&str>) -> Result<Vec<CollectionStatus>>;
}
