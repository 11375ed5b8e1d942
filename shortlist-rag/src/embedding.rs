//! Embedding provider trait and the retrying, space-tagging [`Embedder`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::document::{EmbeddingVector, TextUnit, VectorSpace};
use crate::error::{ProviderError, Result, ShortlistError};
use crate::retry::RetryPolicy;

/// Number of texts sent per provider call by [`Embedder`].
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// What a text is being embedded for.
///
/// Some backends embed queries and documents differently (Gemini task types,
/// BGE query prefixes). Backends without the distinction ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingPurpose {
    /// A candidate document being indexed.
    Document,
    /// A job description chunk used as a query.
    Query,
}

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends (OpenAI, Gemini, a local
/// ONNX model) behind a unified async interface. Each declares a fixed
/// dimensionality and the identity of the space it produces vectors in. The
/// default [`embed_batch`](EmbeddingProvider::embed_batch) calls
/// [`embed`](EmbeddingProvider::embed) sequentially; backends that support
/// native batching should override it.
///
/// # Example
///
/// ```rust,ignore
/// use shortlist_rag::{EmbeddingProvider, EmbeddingPurpose};
///
/// let provider = HashingEmbeddingProvider::new(64);
/// let embedding = provider.embed("hello world", EmbeddingPurpose::Query).await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier of the backend (`openai`, `gemini`, `local`, ...).
    fn provider_id(&self) -> &str;

    /// The model producing the vectors.
    fn model_id(&self) -> &str;

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Generate an embedding vector for a single text input.
    async fn embed(
        &self,
        text: &str,
        purpose: EmbeddingPurpose,
    ) -> std::result::Result<Vec<f32>, ProviderError>;

    /// Generate embedding vectors for a batch of text inputs, in input order.
    async fn embed_batch(
        &self,
        texts: &[&str],
        purpose: EmbeddingPurpose,
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text, purpose).await?);
        }
        Ok(results)
    }

    /// The space this provider's vectors live in.
    fn space(&self) -> VectorSpace {
        VectorSpace::new(self.provider_id(), self.model_id(), self.dimensions())
    }
}

/// Applies the retry policy to an [`EmbeddingProvider`] and tags its output.
///
/// Every returned vector is checked against the provider's declared
/// dimensionality, so downstream components can rely on the tag.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
    batch_size: usize,
}

impl Embedder {
    /// Wrap a provider with a retry policy.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, retry: RetryPolicy) -> Self {
        Self {
            provider,
            retry,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Set the number of texts per provider call.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// The wrapped provider.
    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// The space produced vectors are tagged with.
    pub fn space(&self) -> VectorSpace {
        self.provider.space()
    }

    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// Returns [`ShortlistError::EmbeddingUnavailable`] once retries are exhausted.
    pub async fn embed_text(
        &self,
        text: &str,
        purpose: EmbeddingPurpose,
    ) -> Result<EmbeddingVector> {
        let mut vectors = self.embed_texts(&[text], purpose).await?;
        vectors
            .pop()
            .ok_or_else(|| self.unavailable(1, "provider returned no vector"))
    }

    /// Embed text units, returning one vector per unit in order.
    ///
    /// # Errors
    ///
    /// Returns [`ShortlistError::EmbeddingUnavailable`] once retries are exhausted
    /// or when the provider returns malformed output.
    pub async fn embed_units(
        &self,
        units: &[TextUnit],
        purpose: EmbeddingPurpose,
    ) -> Result<Vec<EmbeddingVector>> {
        let texts: Vec<&str> = units.iter().map(|u| u.text.as_str()).collect();
        self.embed_texts(&texts, purpose).await
    }

    async fn embed_texts(
        &self,
        texts: &[&str],
        purpose: EmbeddingPurpose,
    ) -> Result<Vec<EmbeddingVector>> {
        let space = self.space();
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            debug!(provider = %space.provider_id, batch_size = batch.len(), "embedding batch");
            let values = self
                .retry
                .run("embed", || self.provider.embed_batch(batch, purpose))
                .await
                .map_err(|(e, attempts)| {
                    error!(
                        provider = %space.provider_id,
                        attempts,
                        error = %e,
                        "embedding unavailable"
                    );
                    self.unavailable(attempts, &e.message)
                })?;

            if values.len() != batch.len() {
                return Err(self.unavailable(
                    1,
                    &format!("expected {} vectors, got {}", batch.len(), values.len()),
                ));
            }
            for v in values {
                if v.len() != space.dim {
                    return Err(self.unavailable(
                        1,
                        &format!("declared dimension {} but returned {}", space.dim, v.len()),
                    ));
                }
                vectors.push(EmbeddingVector::new(v, space.clone()));
            }
        }

        Ok(vectors)
    }

    fn unavailable(&self, attempts: u32, message: &str) -> ShortlistError {
        ShortlistError::EmbeddingUnavailable {
            provider: self.provider.provider_id().to_string(),
            attempts,
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FlakyEmbeddingProvider, HashingEmbeddingProvider};

    #[tokio::test]
    async fn embedder_tags_vectors_with_provider_space() {
        let provider = Arc::new(HashingEmbeddingProvider::new(32));
        let embedder = Embedder::new(provider, RetryPolicy::none());
        let vector = embedder
            .embed_text("rust developer", EmbeddingPurpose::Query)
            .await
            .unwrap();
        assert_eq!(vector.dim(), 32);
        assert_eq!(
            vector.space,
            VectorSpace::new("hashing", "bag-of-words", 32)
        );
    }

    #[tokio::test]
    async fn embedder_batches_preserve_order() {
        let provider = Arc::new(HashingEmbeddingProvider::new(16));
        let embedder = Embedder::new(provider.clone(), RetryPolicy::none())
            .with_batch_size(2);
        let units: Vec<TextUnit> = ["alpha", "beta", "gamma"]
            .iter()
            .enumerate()
            .map(|(i, t)| TextUnit {
                unit_id: format!("d#{i}"),
                text: t.to_string(),
                parent_document_id: "d".into(),
                offset: 0,
            })
            .collect();
        let vectors = embedder
            .embed_units(&units, EmbeddingPurpose::Document)
            .await
            .unwrap();
        assert_eq!(vectors.len(), 3);
        let gamma = provider
            .embed("gamma", EmbeddingPurpose::Document)
            .await
            .unwrap();
        assert_eq!(vectors[2].values, gamma);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_embedding_unavailable() {
        let inner = HashingEmbeddingProvider::new(8);
        let provider = Arc::new(FlakyEmbeddingProvider::new(inner, 10));
        let embedder = Embedder::new(provider.clone(), RetryPolicy::default());
        let err = embedder
            .embed_text("anything", EmbeddingPurpose::Query)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ShortlistError::EmbeddingUnavailable { attempts: 3, .. }
        ));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_recover_within_budget() {
        let inner = HashingEmbeddingProvider::new(8);
        let provider = Arc::new(FlakyEmbeddingProvider::new(inner, 2));
        let embedder = Embedder::new(provider, RetryPolicy::default());
        let result = embedder
            .embed_text("anything", EmbeddingPurpose::Query)
            .await;
        assert!(result.is_ok());
    }
}
