//! Deterministic providers for tests and offline runs.
//!
//! - [`HashingEmbeddingProvider`] - feature-hashed bag-of-words vectors
//! - [`FlakyEmbeddingProvider`] - fails a fixed number of times before delegating
//! - [`MockLlm`] - scripted responses or failures

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::embedding::{EmbeddingProvider, EmbeddingPurpose};
use crate::error::ProviderError;
use crate::llm::{Llm, LlmRequest};

/// Embeds text by hashing lowercase word tokens into `dim` buckets.
///
/// Vectors are L2-normalized, so texts sharing vocabulary score high under
/// cosine similarity. Texts containing a configured poison marker fail with a
/// permanent error, which makes per-document failures easy to stage.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    provider_id: String,
    model_id: String,
    dim: usize,
    poison: Option<String>,
    delay: Option<Duration>,
}

impl HashingEmbeddingProvider {
    /// A provider producing `dim`-length vectors.
    pub fn new(dim: usize) -> Self {
        Self {
            provider_id: "hashing".to_string(),
            model_id: "bag-of-words".to_string(),
            dim: dim.max(1),
            poison: None,
            delay: None,
        }
    }

    /// Override the provider id, e.g. to simulate a second backend.
    pub fn with_provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = provider_id.into();
        self
    }

    /// Fail any text containing `marker`.
    pub fn with_poison(mut self, marker: impl Into<String>) -> Self {
        self.poison = Some(marker.into());
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut values = vec![0.0f32; self.dim];
        let tokens = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty());
        for token in tokens {
            let bucket = fnv1a(&token.to_lowercase()) % self.dim as u64;
            values[bucket as usize] += 1.0;
        }
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            values.iter_mut().for_each(|v| *v /= norm);
        }
        values
    }
}

fn fnv1a(token: &str) -> u64 {
    token.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dim
    }

    async fn embed(
        &self,
        text: &str,
        _purpose: EmbeddingPurpose,
    ) -> Result<Vec<f32>, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let poisoned = self.poison.as_deref().is_some_and(|m| text.contains(m));
        if poisoned {
            return Err(ProviderError::permanent(
                &self.provider_id,
                "input rejected",
            ));
        }
        Ok(self.vectorize(text))
    }
}

/// Fails with a transient error for the first `failures` calls, then delegates.
#[derive(Debug)]
pub struct FlakyEmbeddingProvider<P> {
    inner: P,
    failures: usize,
    calls: AtomicUsize,
}

impl<P> FlakyEmbeddingProvider<P> {
    /// Wrap `inner`, failing the first `failures` calls.
    pub fn new(inner: P, failures: usize) -> Self {
        Self {
            inner,
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    /// Calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for FlakyEmbeddingProvider<P> {
    fn provider_id(&self) -> &str {
        self.inner.provider_id()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed(
        &self,
        text: &str,
        purpose: EmbeddingPurpose,
    ) -> Result<Vec<f32>, ProviderError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(ProviderError::transient(
                self.inner.provider_id(),
                "simulated rate limit",
            ));
        }
        self.inner.embed(text, purpose).await
    }

    async fn embed_batch(
        &self,
        texts: &[&str],
        purpose: EmbeddingPurpose,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(ProviderError::transient(
                self.inner.provider_id(),
                "simulated rate limit",
            ));
        }
        self.inner.embed_batch(texts, purpose).await
    }
}

/// A scripted language model.
///
/// Queued responses are returned in order; once the queue is empty the
/// default response is used. A failing mock returns a transient error on
/// every call.
#[derive(Debug)]
pub struct MockLlm {
    name: String,
    default_response: Option<String>,
    queued: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlm {
    /// A model that always answers `response`.
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            name: "mock-llm".to_string(),
            default_response: Some(response.into()),
            queued: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A model whose every call fails.
    pub fn failing() -> Self {
        Self {
            name: "mock-llm".to_string(),
            default_response: None,
            queued: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a one-off response ahead of the default.
    pub fn with_response(self, response: Result<String, ProviderError>) -> Self {
        if let Ok(mut queued) = self.queued.lock() {
            queued.push_back(response);
        }
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Llm for MockLlm {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &LlmRequest) -> Result<String, ProviderError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let queued = self.queued.lock().ok().and_then(|mut q| q.pop_front());
        match (queued, &self.default_response) {
            (Some(response), _) => response,
            (None, Some(response)) => Ok(response.clone()),
            (None, None) => Err(ProviderError::transient(&self.name, "simulated outage")),
        }
    }
}
