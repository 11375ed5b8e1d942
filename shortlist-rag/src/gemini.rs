//! Gemini embedding provider and chat model over the Generative Language REST API.
//!
//! This module is only available when the `gemini` feature is enabled.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::{EmbeddingProvider, EmbeddingPurpose};
use crate::error::{ProviderError, Result, ShortlistError};
use crate::llm::{Llm, LlmRequest};

/// The default Generative Language API base URL.
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// The default embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";

/// The default chat model for explanations.
pub const DEFAULT_CHAT_MODEL: &str = "gemini-1.5-pro";

/// Embedding dimensions for `text-embedding-004`.
const DEFAULT_DIMENSIONS: usize = 768;

const PROVIDER: &str = "gemini";

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
            variable: "GEMINI_API_KEY".into(),
        });
    }
    Ok(api_key)
}

/// An [`EmbeddingProvider`] backed by the Gemini embedding API.
///
/// CV units are embedded with task type `RETRIEVAL_DOCUMENT` and job
/// description chunks with `RETRIEVAL_QUERY`.
///
/// # Example
///
/// ```rust,ignore
/// use shortlist_rag::gemini::GeminiEmbeddingProvider;
///
/// let provider = GeminiEmbeddingProvider::new("your-api-key")?;
/// let embedding = provider.embed("hello world", EmbeddingPurpose::Query).await?;
/// ```
pub struct GeminiEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    output_dimensionality: Option<usize>,
    dimensions: usize,
}

impl GeminiEmbeddingProvider {
    /// Create a new provider using the given API key and `text-embedding-004`.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_key: require_key(api_key.into())?,
            base_url: GEMINI_API_BASE.into(),
            model: DEFAULT_EMBEDDING_MODEL.into(),
            output_dimensionality: None,
            dimensions: DEFAULT_DIMENSIONS,
        })
    }

    /// Set the embedding model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        if self.output_dimensionality.is_none() && self.model == "gemini-embedding-001" {
            self.dimensions = 3072;
        }
        self
    }

    /// Set the output dimensionality (truncates the embedding vector).
    pub fn with_output_dimensionality(mut self, dims: usize) -> Self {
        self.output_dimensionality = Some(dims);
        self.dimensions = dims;
        self
    }

    /// Point at a different API endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn embed_request<'a>(
        &'a self,
        text: &'a str,
        purpose: EmbeddingPurpose,
    ) -> EmbedContentRequest<'a> {
        EmbedContentRequest {
            model: format!("models/{}", self.model),
            content: Content {
                role: None,
                parts: vec![Part { text }],
            },
            task_type: match purpose {
                EmbeddingPurpose::Document => "RETRIEVAL_DOCUMENT",
                EmbeddingPurpose::Query => "RETRIEVAL_QUERY",
            },
            output_dimensionality: self.output_dimensionality,
        }
    }
}

// ── Gemini API request/response types ──────────────────────────────

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: String,
    content: Content<'a>,
    task_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

async fn post_json<B: Serialize, R: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &B,
) -> std::result::Result<R, ProviderError> {
    let response = client
        .post(url)
        .header("x-goog-api-key", api_key)
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

#[async_trait]
impl EmbeddingProvider for GeminiEmbeddingProvider {
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

        let url = format!("{}/models/{}:embedContent", self.base_url, self.model);
        let body = self.embed_request(text, purpose);
        let response: EmbedContentResponse =
            post_json(&self.client, &url, &self.api_key, &body).await?;
        Ok(response.embedding.values)
    }

    async fn embed_batch(
        &self,
        texts: &[&str],
        purpose: EmbeddingPurpose,
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            provider = PROVIDER,
            batch_size = texts.len(),
            "embedding batch"
        );

        let url = format!("{}/models/{}:batchEmbedContents", self.base_url, self.model);
        let body = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|t| self.embed_request(t, purpose))
                .collect(),
        };
        let response: BatchEmbedResponse =
            post_json(&self.client, &url, &self.api_key, &body).await?;
        Ok(response.embeddings.into_iter().map(|e| e.values).collect())
    }
}

/// An [`Llm`] backed by Gemini `generateContent`.
pub struct GeminiChatModel {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiChatModel {
    /// Create a chat model with the given API key and the default model.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_key: require_key(api_key.into())?,
            base_url: GEMINI_API_BASE.into(),
            model: DEFAULT_CHAT_MODEL.into(),
        })
    }

    /// Set the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl Llm for GeminiChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &LlmRequest) -> std::result::Result<String, ProviderError> {
        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: &request.system,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part {
                    text: &request.prompt,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
            },
        };
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let response: GenerateResponse = post_json(&self.client, &url, &self.api_key, &body).await?;

        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ProviderError::transient(
                PROVIDER,
                "model returned empty content",
            ));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_request_uses_task_type_per_purpose() {
        let provider = GeminiEmbeddingProvider::new("key")
            .unwrap()
            .with_output_dimensionality(256);
        let request = provider.embed_request("hi", EmbeddingPurpose::Query);
        let json = serde_json::to_value(request).unwrap();
        assert_eq!(json["taskType"], "RETRIEVAL_QUERY");
        assert_eq!(json["model"], "models/text-embedding-004");
        assert_eq!(json["outputDimensionality"], 256);
        assert_eq!(provider.dimensions(), 256);
    }

    #[test]
    fn empty_key_is_missing_credentials() {
        assert!(matches!(
            GeminiChatModel::new(""),
            Err(ShortlistError::MissingCredentials { .. })
        ));
    }
}
