//! Provider selection: closed backend sets resolved once into trait objects.
//!
//! A [`ProviderRegistry`] maps each [`EmbeddingBackend`] and [`LlmBackend`] to
//! a constructed provider. Requests name a backend; the registry hands back
//! the shared instance, so model loading and HTTP client setup happen once per
//! engine rather than once per request.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::embedding::EmbeddingProvider;
use crate::error::{Result, ShortlistError};
use crate::llm::Llm;

/// The embedding backends the engine knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EmbeddingBackend {
    /// OpenAI embeddings API.
    OpenAI,
    /// Gemini embeddings API.
    Gemini,
    /// On-device ONNX model.
    #[default]
    Local,
}

impl EmbeddingBackend {
    /// Lowercase name, as accepted by [`FromStr`].
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Gemini => "gemini",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for EmbeddingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmbeddingBackend {
    type Err = ShortlistError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" | "google" => Ok(Self::Gemini),
            "local" => Ok(Self::Local),
            _ => Err(ShortlistError::UnknownProvider {
                kind: "embedding",
                name: s.to_string(),
            }),
        }
    }
}

/// The language-model backends the engine knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LlmBackend {
    /// OpenAI chat completions.
    OpenAI,
    /// Gemini `generateContent`.
    #[default]
    Gemini,
}

impl LlmBackend {
    /// Lowercase name, as accepted by [`FromStr`].
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Gemini => "gemini",
        }
    }
}

impl fmt::Display for LlmBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmBackend {
    type Err = ShortlistError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" | "google" => Ok(Self::Gemini),
            _ => Err(ShortlistError::UnknownProvider {
                kind: "llm",
                name: s.to_string(),
            }),
        }
    }
}

/// Credentials and model choices for building providers.
///
/// Empty strings mean "not set". Model fields left `None` use each backend's
/// default model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderSettings {
    /// Backend used when a request does not name one.
    pub embedding_backend: EmbeddingBackend,
    /// Backend used when a request does not name one.
    pub llm_backend: LlmBackend,
    /// `OPENAI_API_KEY`.
    pub openai_api_key: String,
    /// `OPENAI_EMBEDDINGS_MODEL`.
    pub openai_embedding_model: Option<String>,
    /// `OPENAI_CHAT_MODEL`.
    pub openai_chat_model: Option<String>,
    /// `GEMINI_API_KEY`.
    pub gemini_api_key: String,
    /// `GEMINI_EMBEDDINGS_MODEL`.
    pub gemini_embedding_model: Option<String>,
    /// `GOOGLE_GENERATIVE_AI_MODEL`.
    pub gemini_chat_model: Option<String>,
    /// `LOCAL_EMBEDDINGS_MODEL`: directory holding the ONNX model files.
    pub local_model_dir: Option<PathBuf>,
}

impl ProviderSettings {
    /// Read settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ShortlistError::UnknownProvider`] if `EMBEDDINGS_PROVIDER` or
    /// `LLM_PROVIDER` names an unknown backend.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, which returns a variable's value if set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let embedding_backend = match var("EMBEDDINGS_PROVIDER") {
            Some(name) => name.parse()?,
            None => EmbeddingBackend::default(),
        };
        let llm_backend = match var("LLM_PROVIDER") {
            Some(name) => name.parse()?,
            None => LlmBackend::default(),
        };

        Ok(Self {
            embedding_backend,
            llm_backend,
            openai_api_key: var("OPENAI_API_KEY").unwrap_or_default(),
            openai_embedding_model: var("OPENAI_EMBEDDINGS_MODEL"),
            openai_chat_model: var("OPENAI_CHAT_MODEL"),
            gemini_api_key: var("GEMINI_API_KEY").unwrap_or_default(),
            gemini_embedding_model: var("GEMINI_EMBEDDINGS_MODEL"),
            gemini_chat_model: var("GOOGLE_GENERATIVE_AI_MODEL"),
            local_model_dir: var("LOCAL_EMBEDDINGS_MODEL").map(PathBuf::from),
        })
    }

    /// Embedding backends whose credentials or model path are set.
    pub fn configured_embedding_backends(&self) -> Vec<EmbeddingBackend> {
        let mut backends = Vec::new();
        if !self.openai_api_key.is_empty() {
            backends.push(EmbeddingBackend::OpenAI);
        }
        if !self.gemini_api_key.is_empty() {
            backends.push(EmbeddingBackend::Gemini);
        }
        if self.local_model_dir.is_some() {
            backends.push(EmbeddingBackend::Local);
        }
        backends
    }

    /// Language-model backends whose credentials are set.
    pub fn configured_llm_backends(&self) -> Vec<LlmBackend> {
        let mut backends = Vec::new();
        if !self.openai_api_key.is_empty() {
            backends.push(LlmBackend::OpenAI);
        }
        if !self.gemini_api_key.is_empty() {
            backends.push(LlmBackend::Gemini);
        }
        backends
    }
}

/// Resolved providers, keyed by backend.
///
/// # Example
///
/// ```rust,ignore
/// let settings = ProviderSettings::from_env()?;
/// let registry = ProviderRegistry::from_settings(&settings)?;
/// let embedder = registry.embedding(None)?;
/// ```
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    embedding: HashMap<EmbeddingBackend, Arc<dyn EmbeddingProvider>>,
    llm: HashMap<LlmBackend, Arc<dyn Llm>>,
    default_embedding: EmbeddingBackend,
    default_llm: LlmBackend,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every backend `settings` has credentials for.
    ///
    /// The default backends named in `settings` must build; any other
    /// configured backend that fails to build is skipped with a warning, so a
    /// request naming it gets a [`ShortlistError::Config`] error.
    ///
    /// # Errors
    ///
    /// For the default backends:
    /// - [`ShortlistError::MissingCredentials`] if the backend's key is unset
    /// - [`ShortlistError::LocalModel`] if the local model cannot be loaded
    /// - [`ShortlistError::Config`] if the backend's cargo feature is disabled
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self> {
        let default_embedding = settings.embedding_backend;
        let default_llm = settings.llm_backend;
        let embedding = build_embedding(default_embedding, settings)?;
        let llm = build_llm(default_llm, settings)?;
        let mut registry = Self::new()
            .with_embedding(default_embedding, embedding)
            .with_llm(default_llm, llm);

        for backend in settings.configured_embedding_backends() {
            if backend == default_embedding {
                continue;
            }
            match build_embedding(backend, settings) {
                Ok(provider) => registry = registry.with_embedding(backend, provider),
                Err(e) => warn!(%backend, error = %e, "skipping embedding backend"),
            }
        }
        for backend in settings.configured_llm_backends() {
            if backend == default_llm {
                continue;
            }
            match build_llm(backend, settings) {
                Ok(llm) => registry = registry.with_llm(backend, llm),
                Err(e) => warn!(%backend, error = %e, "skipping llm backend"),
            }
        }

        info!(
            embedding = %default_embedding,
            llm = %default_llm,
            embedding_backends = registry.embedding.len(),
            llm_backends = registry.llm.len(),
            "resolved providers"
        );
        Ok(registry.with_defaults(default_embedding, default_llm))
    }

    /// Whether a provider is registered for `backend`.
    pub fn has_embedding(&self, backend: EmbeddingBackend) -> bool {
        self.embedding.contains_key(&backend)
    }

    /// Whether a language model is registered for `backend`.
    pub fn has_llm(&self, backend: LlmBackend) -> bool {
        self.llm.contains_key(&backend)
    }

    /// Register an embedding provider for `backend`.
    ///
    /// The first registered backend becomes the default.
    pub fn with_embedding(
        mut self,
        backend: EmbeddingBackend,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        if self.embedding.is_empty() {
            self.default_embedding = backend;
        }
        self.embedding.insert(backend, provider);
        self
    }

    /// Register a language model for `backend`.
    ///
    /// The first registered backend becomes the default.
    pub fn with_llm(mut self, backend: LlmBackend, llm: Arc<dyn Llm>) -> Self {
        if self.llm.is_empty() {
            self.default_llm = backend;
        }
        self.llm.insert(backend, llm);
        self
    }

    /// Set the backends used when a request names none.
    pub fn with_defaults(mut self, embedding: EmbeddingBackend, llm: LlmBackend) -> Self {
        self.default_embedding = embedding;
        self.default_llm = llm;
        self
    }

    /// The embedding provider for `backend`, or the default.
    ///
    /// # Errors
    ///
    /// Returns [`ShortlistError::Config`] if the backend was never registered.
    pub fn embedding(
        &self,
        backend: Option<EmbeddingBackend>,
    ) -> Result<Arc<dyn EmbeddingProvider>> {
        let backend = backend.unwrap_or(self.default_embedding);
        self.embedding.get(&backend).cloned().ok_or_else(|| {
            ShortlistError::Config(format!("embedding backend '{backend}' is not configured"))
        })
    }

    /// The language model for `backend`, or the default.
    ///
    /// # Errors
    ///
    /// Returns [`ShortlistError::Config`] if the backend was never registered.
    pub fn llm(&self, backend: Option<LlmBackend>) -> Result<Arc<dyn Llm>> {
        let backend = backend.unwrap_or(self.default_llm);
        self.llm.get(&backend).cloned().ok_or_else(|| {
            ShortlistError::Config(format!("llm backend '{backend}' is not configured"))
        })
    }
}

#[cfg(not(all(feature = "openai", feature = "gemini", feature = "local")))]
fn feature_disabled(feature: &str) -> ShortlistError {
    ShortlistError::Config(format!("backend requires the '{feature}' feature"))
}

/// Construct the embedding provider for `backend`.
///
/// # Errors
///
/// See [`ProviderRegistry::from_settings`].
#[allow(unused_variables)]
pub fn build_embedding(
    backend: EmbeddingBackend,
    settings: &ProviderSettings,
) -> Result<Arc<dyn EmbeddingProvider>> {
    match backend {
        #[cfg(feature = "openai")]
        EmbeddingBackend::OpenAI => {
            let mut provider =
                crate::openai::OpenAIEmbeddingProvider::new(&settings.openai_api_key)?;
            if let Some(model) = &settings.openai_embedding_model {
                provider = provider.with_model(model);
            }
            Ok(Arc::new(provider))
        }
        #[cfg(not(feature = "openai"))]
        EmbeddingBackend::OpenAI => Err(feature_disabled("openai")),

        #[cfg(feature = "gemini")]
        EmbeddingBackend::Gemini => {
            let mut provider =
                crate::gemini::GeminiEmbeddingProvider::new(&settings.gemini_api_key)?;
            if let Some(model) = &settings.gemini_embedding_model {
                provider = provider.with_model(model);
            }
            Ok(Arc::new(provider))
        }
        #[cfg(not(feature = "gemini"))]
        EmbeddingBackend::Gemini => Err(feature_disabled("gemini")),

        #[cfg(feature = "local")]
        EmbeddingBackend::Local => {
            let dir = settings
                .local_model_dir
                .as_ref()
                .ok_or_else(|| ShortlistError::LocalModel {
                    path: String::new(),
                    message: "LOCAL_EMBEDDINGS_MODEL is not set".to_string(),
                })?;
            Ok(Arc::new(crate::local::LocalEmbeddingProvider::load(dir)?))
        }
        #[cfg(not(feature = "local"))]
        EmbeddingBackend::Local => Err(feature_disabled("local")),
    }
}

/// Construct the language model for `backend`.
///
/// # Errors
///
/// See [`ProviderRegistry::from_settings`].
#[allow(unused_variables)]
pub fn build_llm(backend: LlmBackend, settings: &ProviderSettings) -> Result<Arc<dyn Llm>> {
    match backend {
        #[cfg(feature = "openai")]
        LlmBackend::OpenAI => {
            let mut model = crate::openai::OpenAIChatModel::new(&settings.openai_api_key)?;
            if let Some(name) = &settings.openai_chat_model {
                model = model.with_model(name);
            }
            Ok(Arc::new(model))
        }
        #[cfg(not(feature = "openai"))]
        LlmBackend::OpenAI => Err(feature_disabled("openai")),

        #[cfg(feature = "gemini")]
        LlmBackend::Gemini => {
            let mut model = crate::gemini::GeminiChatModel::new(&settings.gemini_api_key)?;
            if let Some(name) = &settings.gemini_chat_model {
                model = model.with_model(name);
            }
            Ok(Arc::new(model))
        }
        #[cfg(not(feature = "gemini"))]
        LlmBackend::Gemini => Err(feature_disabled("gemini")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{HashingEmbeddingProvider, MockLlm};

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn backend_names_are_case_insensitive() {
        assert_eq!(
            "OpenAI".parse::<EmbeddingBackend>().unwrap(),
            EmbeddingBackend::OpenAI
        );
        let backend = " gemini ".parse::<LlmBackend>().unwrap();
        assert_eq!(backend, LlmBackend::Gemini);
        let err = "cohere".parse::<EmbeddingBackend>().unwrap_err();
        assert_eq!(err.tag(), "unknown_provider");
    }

    #[test]
    fn settings_default_to_local_embeddings() {
        let settings = ProviderSettings::from_lookup(env(&[("GEMINI_API_KEY", "g-key")]))
            .unwrap();
        assert_eq!(settings.embedding_backend, EmbeddingBackend::Local);
        assert_eq!(settings.llm_backend, LlmBackend::Gemini);
        assert_eq!(settings.gemini_api_key, "g-key");
        assert!(settings.openai_api_key.is_empty());
    }

    #[test]
    fn settings_reject_unknown_backend() {
        let err = ProviderSettings::from_lookup(env(&[("EMBEDDINGS_PROVIDER", "huggingface")]));
        assert!(matches!(
            err,
            Err(ShortlistError::UnknownProvider {
                kind: "embedding",
                ..
            })
        ));
    }

    #[test]
    fn settings_read_models_and_paths() {
        let settings = ProviderSettings::from_lookup(env(&[
            ("EMBEDDINGS_PROVIDER", "openai"),
            ("OPENAI_EMBEDDINGS_MODEL", "text-embedding-3-large"),
            ("LOCAL_EMBEDDINGS_MODEL", "  "),
        ]))
        .unwrap();
        assert_eq!(settings.embedding_backend, EmbeddingBackend::OpenAI);
        assert_eq!(
            settings.openai_embedding_model.as_deref(),
            Some("text-embedding-3-large")
        );
        assert_eq!(settings.local_model_dir, None);
    }

    #[test]
    fn configured_backends_follow_credentials() {
        let settings = ProviderSettings::from_lookup(env(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("LOCAL_EMBEDDINGS_MODEL", "/models/minilm"),
        ]))
        .unwrap();
        assert_eq!(
            settings.configured_embedding_backends(),
            vec![EmbeddingBackend::OpenAI, EmbeddingBackend::Local]
        );
        assert_eq!(settings.configured_llm_backends(), vec![LlmBackend::OpenAI]);
        assert!(
            ProviderSettings::default()
                .configured_llm_backends()
                .is_empty()
        );
    }

    #[cfg(all(feature = "openai", feature = "gemini"))]
    #[test]
    fn settings_register_non_default_backends() {
        let settings = ProviderSettings::from_lookup(env(&[
            ("EMBEDDINGS_PROVIDER", "openai"),
            ("LLM_PROVIDER", "gemini"),
            ("OPENAI_API_KEY", "sk-test"),
            ("GEMINI_API_KEY", "g-key"),
        ]))
        .unwrap();
        let registry = ProviderRegistry::from_settings(&settings).unwrap();

        assert_eq!(registry.embedding(None).unwrap().provider_id(), "openai");
        assert_eq!(
            registry
                .embedding(Some(EmbeddingBackend::Gemini))
                .unwrap()
                .provider_id(),
            "gemini"
        );
        assert!(registry.llm(Some(LlmBackend::OpenAI)).is_ok());
        assert!(registry.llm(None).is_ok());
        assert!(!registry.has_embedding(EmbeddingBackend::Local));
    }

    #[cfg(all(feature = "openai", feature = "gemini"))]
    #[test]
    fn default_backend_still_requires_credentials() {
        let settings = ProviderSettings::from_lookup(env(&[
            ("EMBEDDINGS_PROVIDER", "openai"),
            ("GEMINI_API_KEY", "g-key"),
        ]))
        .unwrap();
        let err = ProviderRegistry::from_settings(&settings).err();
        assert!(matches!(
            err,
            Some(ShortlistError::MissingCredentials { .. })
        ));
    }

    #[test]
    fn registry_resolves_registered_backends() {
        let registry = ProviderRegistry::new()
            .with_embedding(
                EmbeddingBackend::Local,
                Arc::new(HashingEmbeddingProvider::new(8)),
            )
            .with_llm(LlmBackend::OpenAI, Arc::new(MockLlm::new("{}")));
        assert_eq!(registry.embedding(None).unwrap().dimensions(), 8);
        assert_eq!(registry.llm(None).unwrap().name(), "mock-llm");
        assert!(matches!(
            registry.embedding(Some(EmbeddingBackend::Gemini)),
            Err(ShortlistError::Config(_))
        ));
    }

    #[cfg(not(feature = "openai"))]
    #[test]
    fn disabled_backend_names_its_feature() {
        let err = build_llm(LlmBackend::OpenAI, &ProviderSettings::default()).err();
        assert!(matches!(err, Some(ShortlistError::Config(msg)) if msg.contains("openai")));
    }
}
