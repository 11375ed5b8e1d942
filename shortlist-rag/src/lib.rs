//! # shortlist-rag
//!
//! Semantic matching of candidate CVs against a job description, with
//! ranked, explained shortlists.
//!
//! ## Overview
//!
//! A request flows through composable stages:
//!
//! - [`Normalizer`] - cleans extracted text, splits it into [`TextUnit`]s and
//!   pulls best-effort metadata (email, phone, skills, experience)
//! - [`Embedder`] - wraps an [`EmbeddingProvider`] with bounded retries and
//!   tags every vector with its [`VectorSpace`]
//! - [`VectorStore`] - named collections bound to one vector space;
//!   [`InMemoryVectorStore`] ships with optional JSON persistence
//! - [`Retriever`] - queries with every job-description unit and max-pools
//!   scores per candidate into a lazy [`MatchStream`]
//! - [`rank`] - deduplicates, min/max normalizes and truncates
//! - [`Explainer`] - asks an [`Llm`] for a structured [`Rationale`], falling
//!   back gracefully when the model is unavailable
//!
//! [`ShortlistEngine`] orchestrates the stages per request with partial
//! failure tolerance, a concurrency limit and a request deadline.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use shortlist_rag::{
//!     Document, EmbeddingBackend, HashingEmbeddingProvider, LlmBackend, MockLlm,
//!     ProviderRegistry, ShortlistEngine, ShortlistRequest,
//! };
//!
//! let providers = ProviderRegistry::new()
//!     .with_embedding(EmbeddingBackend::Local, Arc::new(HashingEmbeddingProvider::new(256)))
//!     .with_llm(LlmBackend::Gemini, Arc::new(MockLlm::new(r#"{"summary": "Good fit"}"#)));
//! let engine = ShortlistEngine::builder().providers(providers).build()?;
//!
//! let outcome = engine
//!     .shortlist(
//!         ShortlistRequest::new("Senior Rust engineer, tokio, PostgreSQL", 3)
//!             .with_candidate(Document::candidate("ada", "Rust and tokio for 6 years"))
//!             .with_candidate(Document::candidate("bob", "Java and Spring")),
//!     )
//!     .await?;
//! assert_eq!(outcome.entries[0].candidate_id, "ada");
//! ```
//!
//! ## Providers
//!
//! | Backend | Feature | Embedding model | Chat model |
//! |---------|---------|-----------------|------------|
//! | OpenAI | `openai` | `text-embedding-3-small` | `gpt-4o-mini` |
//! | Gemini | `gemini` | `text-embedding-004` | `gemini-1.5-pro` |
//! | Local | `local` | ONNX model directory | - |
//!
//! [`ProviderSettings::from_env`] reads the selection and credentials from
//! `EMBEDDINGS_PROVIDER`, `LLM_PROVIDER`, `OPENAI_API_KEY`, `GEMINI_API_KEY`,
//! `LOCAL_EMBEDDINGS_MODEL` and friends. Every backend with credentials (or a
//! model directory) is registered, so a request may pick any of them.
//! [`ShortlistConfig::from_env`] reads tuning such as `SHORTLIST_CHUNK_SIZE`,
//! `SHORTLIST_MAX_CONCURRENCY` and `SHORTLIST_STORE_DIR`.

pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod explainer;
#[cfg(feature = "gemini")]
pub mod gemini;
pub mod inmemory;
pub mod llm;
#[cfg(feature = "local")]
pub mod local;
pub mod mock;
pub mod normalize;
#[cfg(feature = "openai")]
pub mod openai;
pub mod pipeline;
pub mod prompts;
pub mod provider;
pub mod ranker;
pub mod request;
pub mod requirements;
pub mod retriever;
pub mod retry;
pub mod vectorstore;

pub use config::{MAX_SHORTLISTED, ShortlistConfig, ShortlistConfigBuilder};
pub use document::{
    Document, DocumentKind, EmbeddingVector, IndexEntry, LoadedDocument, MatchResult, Metadata,
    MetadataValue, ScoredEntry, SourceFormat, TextUnit, UnitMatch, VectorSpace,
};
pub use embedding::{Embedder, EmbeddingProvider, EmbeddingPurpose};
pub use error::{ProviderError, Result, ShortlistError};
pub use explainer::{Explainer, Rationale};
#[cfg(feature = "gemini")]
pub use gemini::{GeminiChatModel, GeminiEmbeddingProvider};
pub use inmemory::InMemoryVectorStore;
pub use llm::{Llm, LlmRequest};
#[cfg(feature = "local")]
pub use local::LocalEmbeddingProvider;
pub use mock::{FlakyEmbeddingProvider, HashingEmbeddingProvider, MockLlm};
pub use normalize::Normalizer;
#[cfg(feature = "openai")]
pub use openai::{OpenAIChatModel, OpenAIEmbeddingProvider};
pub use pipeline::{SessionState, ShortlistEngine, ShortlistEngineBuilder};
pub use provider::{EmbeddingBackend, LlmBackend, ProviderRegistry, ProviderSettings};
pub use ranker::{InsufficientCandidates, RankedCandidate, Ranking, rank};
pub use request::{
    CollectionMode, DocumentFailure, LoaderFailure, PartialFailureReport, ShortlistEntry,
    ShortlistOutcome, ShortlistRequest,
};
pub use requirements::{JobRequirements, extract_job_requirements};
pub use retriever::{MatchStream, Retriever};
pub use retry::RetryPolicy;
pub use vectorstore::{
    CollectionSpec, CollectionStatus, PurgeScope, SimilarityMetric, VectorStore,
};
