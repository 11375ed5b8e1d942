//! Local on-device embedding model via `fastembed` (ONNX runtime).
//!
//! This module is only available when the `local` feature is enabled.
//!
//! The model is loaded from a directory containing the exported ONNX weights
//! and tokenizer files. Anything missing is reported when the provider is
//! constructed, never on a later embedding call.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{InitOptionsUserDefined, TextEmbedding, TokenizerFiles, UserDefinedEmbeddingModel};
use serde::Deserialize;
use tracing::{debug, info};

use crate::embedding::{EmbeddingProvider, EmbeddingPurpose};
use crate::error::{ProviderError, Result, ShortlistError};

const PROVIDER: &str = "local";

/// Files a model directory must contain.
pub const REQUIRED_FILES: [&str; 5] = [
    "model.onnx",
    "tokenizer.json",
    "config.json",
    "special_tokens_map.json",
    "tokenizer_config.json",
];

#[derive(Deserialize)]
struct ModelConfig {
    hidden_size: usize,
}

/// An [`EmbeddingProvider`] running a sentence-transformer model locally.
///
/// # Example
///
/// ```rust,ignore
/// use shortlist_rag::local::LocalEmbeddingProvider;
///
/// let provider = LocalEmbeddingProvider::load("./models/all-MiniLM-L6-v2")?;
/// assert_eq!(provider.dimensions(), 384);
/// ```
pub struct LocalEmbeddingProvider {
    model: Arc<TextEmbedding>,
    model_id: String,
    dimensions: usize,
}

impl LocalEmbeddingProvider {
    /// Load the model in `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ShortlistError::LocalModel`] if any required file is missing
    /// or the ONNX session cannot be created.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let read = |name: &str| -> Result<Vec<u8>> {
            let path: PathBuf = dir.join(name);
            std::fs::read(&path)
                .map_err(|e| local_error(dir, format!("cannot read {name}: {e}")))
        };

        let config_bytes = read("config.json")?;
        let config: ModelConfig = serde_json::from_slice(&config_bytes)
            .map_err(|e| {
                local_error(dir, format!("config.json has no usable hidden_size: {e}"))
            })?;

        let tokenizer_files = TokenizerFiles {
            tokenizer_file: read("tokenizer.json")?,
            config_file: config_bytes,
            special_tokens_map_file: read("special_tokens_map.json")?,
            tokenizer_config_file: read("tokenizer_config.json")?,
        };
        let user_model = UserDefinedEmbeddingModel::new(read("model.onnx")?, tokenizer_files);
        let options = InitOptionsUserDefined::default();
        let model = TextEmbedding::try_new_from_user_defined(user_model, options)
            .map_err(|e| {
                local_error(dir, format!("failed to create ONNX session: {e}"))
            })?;

        let model_id = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        info!(
            provider = PROVIDER,
            model = %model_id,
            dimensions = config.hidden_size,
            "loaded local model"
        );

        Ok(Self {
            model: Arc::new(model),
            model_id,
            dimensions: config.hidden_size,
        })
    }
}

fn local_error(dir: &Path, message: String) -> ShortlistError {
    ShortlistError::LocalModel {
        path: dir.display().to_string(),
        message,
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    fn provider_id(&self) -> &str {
        PROVIDER
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(
        &self,
        text: &str,
        purpose: EmbeddingPurpose,
    ) -> std::result::Result<Vec<f32>, ProviderError> {
        self.embed_batch(&[text], purpose)
            .await?
            .pop()
            .ok_or_else(|| {
                ProviderError::permanent(PROVIDER, "model returned no embedding")
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
            "embedding batch"
        );

        let model = Arc::clone(&self.model);
        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        tokio::task::spawn_blocking(move || model.embed(owned, None))
            .await
            .map_err(|e| {
                ProviderError::permanent(PROVIDER, format!("inference task failed: {e}"))
            })?
            .map_err(|e| {
                ProviderError::permanent(PROVIDER, format!("inference failed: {e}"))
            })
    }
}
