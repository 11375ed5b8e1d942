//! OpenAI embeddings and chat completions for CV matching and explanations.
//!
//! Compiled with the `openai` feature.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::{EmbeddingProvider, EmbeddingPurpose};
use crate::error::{ProviderError, Result, ShortlistError};
use crate::llm::{Llm, LlmRequest};

/// The default OpenAI API base URL.
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Embedding model used unless `OPENAI_EMBEDDINGS_MODEL` names another.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// The default chat model for explanations.
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

const DEFAULT_DIMENSIONS: usize = 1536;

const PROVIDER: &str = "openai";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| {
            ShortlistError::Config(format!("failed to build HTTP client: {e}"))
        })
}

fn require_key(api_key: String) -> Result<String> {
    if api_key.is_empty() {
        return Err(ShortlistError::MissingCredentials {
            provider: PROVIDER.into(),
            variable: "OPENAI_API_KEY".into(),
        });
    }
    Ok(api_key)
}

fn dimensions_for(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        _ => DEFAULT_DIMENSIONS,
    }
}

/// Embeds CV and job-description units through `POST {base}/embeddings`.
///
/// The vector space is `openai/{model}/{dimensions}`; switching model or
/// dimensions therefore produces vectors that a named collection built with
/// the old settings will reject.
///
/// ```rust,ignore
/// let provider = OpenAIEmbeddingProvider::new(key)?.with_dimensions(512);
/// let vector = provider.embed("Rust, tokio, PostgreSQL", EmbeddingPurpose::Query).await?;
/// ```
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
    /// Sent as `dimensions` when the caller shortened the vectors.
    request_dimensions: Option<usize>,
}

impl OpenAIEmbeddingProvider {
    /// A provider for [`DEFAULT_EMBEDDING_MODEL`].
    ///
    /// # Errors
    ///
    /// [`ShortlistError::MissingCredentials`] for an empty key.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_key: require_key(api_key.into())?,
            base_url: OPENAI_API_BASE.into(),
            model: DEFAULT_EMBEDDING_MODEL.into(),
            dimensions: DEFAULT_DIMENSIONS,
            request_dimensions: None,
        })
    }

    /// Read the key from `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        Self::new(std::env::var("OPENAI_API_KEY").unwrap_or_default())
    }

    /// Use another embedding model; known models also set the dimension.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        if self.request_dimensions.is_none() {
            self.dimensions = dimensions_for(&self.model);
        }
        self
    }

    /// Ask the API for shortened vectors of length `dims`.
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.request_dimensions = Some(dims);
        self
    }

    /// Point at an OpenAI-compatible server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

// ── OpenAI API request/response types ──────────────────────────────

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// POST `body` to `url` and decode a JSON response, classifying failures.
async fn post_json<B: Serialize, R: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &B,
) -> std::result::Result<R, ProviderError> {
    let response = client
        .post(url)
        .bearer_auth(api_key)
        .json(body)
        .send()
        .await
        .map_err(|e| {
            error!(provider = PROVIDER, error = %e, "request failed");
            ProviderError::transient(PROVIDER, format!("request failed: {e}"))
        })?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);

        error!(provider = PROVIDER, %status, "API error");
        let error = ProviderError::from_status(PROVIDER, status.as_u16(), &detail);
        return Err(error);
    }

    response.json().await.map_err(|e| {
        error!(provider = PROVIDER, error = %e, "failed to parse response");
        ProviderError::permanent(PROVIDER, format!("failed to parse response: {e}"))
    })
}

// ── EmbeddingProvider implementation ───────────────────────────────

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    fn provider_id(&self) -> &str {
        PROVIDER
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(
        &self,
        text: &str,
        purpose: EmbeddingPurpose,
    ) -> std::result::Result<Vec<f32>, ProviderError> {
        debug!(
            provider = PROVIDER,
            text_len = text.len(),
            "embedding single text"
        );

        let results = self.embed_batch(&[text], purpose).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| {
                ProviderError::permanent(PROVIDER, "API returned empty response")
            })
    }

    async fn embed_batch(
        &self,
        texts: &[&str],
        _purpose: EmbeddingPurpose,
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            provider = PROVIDER,
            batch_size = texts.len(),
            model = %self.model,
            "embedding batch"
        );

        let request_body = EmbeddingRequest {
            model: &self.model,
            input: texts.to_vec(),
            dimensions: self.request_dimensions,
        };
        let url = format!("{}/embeddings", self.base_url);
        let mut response: EmbeddingResponse =
            post_json(&self.client, &url, &self.api_key, &request_body).await?;

        response.data.sort_by_key(|d| d.index);
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// An [`Llm`] backed by the OpenAI chat completions API.
pub struct OpenAIChatModel {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAIChatModel {
    /// Create a chat model with the given API key and the default model.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_key: require_key(api_key.into())?,
            base_url: OPENAI_API_BASE.into(),
            model: DEFAULT_CHAT_MODEL.into(),
        })
    }

    /// Set the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point at an OpenAI-compatible server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Llm for OpenAIChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &LlmRequest) -> std::result::Result<String, ProviderError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: request.temperature,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
        };
        let url = format!("{}/chat/completions", self.base_url);
        let response: ChatResponse = post_json(&self.client, &url, &self.api_key, &body).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                ProviderError::transient(PROVIDER, "model returned empty content")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_is_missing_credentials() {
        let err = OpenAIEmbeddingProvider::new("").err().map(|e| e.tag());
        assert_eq!(err, Some("missing_credentials"));
    }

    #[test]
    fn model_choice_sets_dimensions() {
        let provider = OpenAIEmbeddingProvider::new("sk-test")
            .unwrap()
            .with_model("text-embedding-3-large");
        assert_eq!(provider.dimensions(), 3072);
        let provider = provider
            .with_dimensions(256)
            .with_model("text-embedding-3-small");
        assert_eq!(provider.dimensions(), 256);
    }
}
