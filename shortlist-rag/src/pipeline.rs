//! Shortlisting orchestrator.
//!
//! The [`ShortlistEngine`] drives one request end to end: it normalizes and
//! embeds the job description, ingests every CV independently into a
//! collection, retrieves and ranks candidates, and asks a language model to
//! explain each shortlisted candidate.
//!
//! Per-document failures are recorded in the outcome's report instead of
//! aborting the request. The request fails only when the job description
//! cannot be embedded, when no CV could be ingested, or on a configuration or
//! vector-space error. Ephemeral collections are dropped whether the request
//! succeeds or not.
//!
//! # Example
//!
//! ```rust,ignore
//! use shortlist_rag::{ShortlistEngine, ShortlistConfig, ShortlistRequest, ProviderRegistry};
//!
//! let engine = ShortlistEngine::builder()
//!     .config(ShortlistConfig::default())
//!     .providers(ProviderRegistry::from_settings(&settings)?)
//!     .build()?;
//!
//! let outcome = engine
//!     .shortlist(ShortlistRequest::new(jd_text, 5).with_candidates(cvs))
//!     .await?;
//! for entry in &outcome.entries {
//!     println!("{} {} {:.2}", entry.rank, entry.candidate_id, entry.score);
//! }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{ShortlistConfig, validate_shortlist_size};
use crate::document::{Document, DocumentKind, EmbeddingVector, IndexEntry};
use crate::embedding::{Embedder, EmbeddingPurpose};
use crate::error::{Result, ShortlistError};
use crate::explainer::{Explainer, Rationale, truncate_chars};
use crate::inmemory::InMemoryVectorStore;
use crate::llm::Llm;
use crate::normalize::Normalizer;
use crate::provider::{ProviderRegistry, ProviderSettings};
use crate::ranker::{RankedCandidate, rank};
use crate::request::{
    CollectionMode, DocumentFailure, PartialFailureReport, ShortlistEntry, ShortlistOutcome,
    ShortlistRequest,
};
use crate::requirements::{JobRequirements, empty_requirements, extract_job_requirements};
use crate::retriever::{MatchStream, Retriever};
use crate::vectorstore::{
    CollectionSpec, CollectionStatus, PurgeScope, SimilarityMetric, VectorStore,
};

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Request accepted, collection not yet touched.
    Created,
    /// Normalizing and embedding documents.
    Ingesting,
    /// Writing candidate vectors to the collection.
    Indexing,
    /// Querying the collection with the job description.
    Retrieving,
    /// Normalizing scores and truncating.
    Ranking,
    /// Generating rationales.
    Explaining,
    /// Finished with an outcome.
    Completed,
    /// Finished with an error.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Ingesting => "ingesting",
            Self::Indexing => "indexing",
            Self::Retrieving => "retrieving",
            Self::Ranking => "ranking",
            Self::Explaining => "explaining",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

struct Session {
    collection: String,
    persistent: bool,
    state: SessionState,
    deadline: Instant,
    report: PartialFailureReport,
}

impl Session {
    fn advance(&mut self, next: SessionState) {
        debug!(collection = %self.collection, from = %self.state, to = %next, "session state");
        self.state = next;
    }

    fn timeout(&self) -> ShortlistError {
        ShortlistError::Timeout {
            stage: self.state.to_string(),
        }
    }
}

/// The shortlisting engine.
///
/// Holds the resolved providers, the vector store and the normalizer; each
/// call to [`shortlist`](ShortlistEngine::shortlist) runs one independent
/// session. Construct one via [`ShortlistEngine::builder()`].
pub struct ShortlistEngine {
    config: ShortlistConfig,
    providers: ProviderRegistry,
    store: Arc<dyn VectorStore>,
    normalizer: Normalizer,
}

impl ShortlistEngine {
    /// Create a new [`ShortlistEngineBuilder`].
    pub fn builder() -> ShortlistEngineBuilder {
        ShortlistEngineBuilder::default()
    }

    /// Build an engine entirely from environment variables.
    ///
    /// Tuning comes from [`ShortlistConfig::from_env`]; providers and
    /// credentials from [`ProviderSettings::from_env`].
    ///
    /// # Errors
    ///
    /// See [`ShortlistConfig::from_env`], [`ProviderSettings::from_env`] and
    /// [`ProviderRegistry::from_settings`].
    pub fn from_env() -> Result<Self> {
        let config = ShortlistConfig::from_env()?;
        let settings = ProviderSettings::from_env()?;
        let providers = ProviderRegistry::from_settings(&settings)?;
        Self::builder().config(config).providers(providers).build()
    }

    /// Return a reference to the engine configuration.
    pub fn config(&self) -> &ShortlistConfig {
        &self.config
    }

    /// Return a reference to the vector store.
    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Entry counts for one collection, or for all when `None`.
    ///
    /// # Errors
    ///
    /// Propagates vector store errors.
    pub async fn check_index(&self, collection: Option<&str>) -> Result<Vec<CollectionStatus>> {
        self.store.status(collection).await
    }

    /// Remove all entries in scope. Purging an empty or unknown collection succeeds.
    ///
    /// # Errors
    ///
    /// Propagates vector store errors.
    pub async fn purge_index(&self, scope: PurgeScope) -> Result<()> {
        self.store.purge(&scope).await.inspect_err(|e| {
            error!(?scope, error = %e, "purge failed");
        })?;
        info!(?scope, "purged index");
        Ok(())
    }

    /// Run one shortlisting request.
    ///
    /// # Errors
    ///
    /// - [`ShortlistError::Config`] for an out-of-range `num_shortlisted` or an
    ///   unconfigured backend
    /// - [`ShortlistError::NoJobDescription`] if the job description is empty
    /// - [`ShortlistError::EmbeddingUnavailable`] if the job description cannot be embedded
    /// - [`ShortlistError::NoCandidatesIngested`] if every CV failed
    /// - [`ShortlistError::DimensionMismatch`] if a named collection holds
    ///   vectors from a different provider
    /// - [`ShortlistError::Timeout`] if the deadline passes before any
    ///   candidate was indexed
    pub async fn shortlist(&self, request: ShortlistRequest) -> Result<ShortlistOutcome> {
        let num_shortlisted = validate_shortlist_size(request.num_shortlisted)?;
        let provider = self.providers.embedding(request.embedding_backend)?;
        let embedder = Embedder::new(provider, self.config.retry);
        let llm = self.providers.llm(request.llm_backend)?;

        let (collection, persistent) = match &request.collection {
            CollectionMode::Ephemeral => (format!("session-{}", Uuid::new_v4().simple()), false),
            CollectionMode::Named(name) => (name.clone(), true),
        };
        let mut session = Session {
            collection,
            persistent,
            state: SessionState::Created,
            deadline: Instant::now() + self.config.request_timeout,
            report: PartialFailureReport {
                failures: request
                    .loader_failures
                    .iter()
                    .map(DocumentFailure::from)
                    .collect(),
                ..PartialFailureReport::default()
            },
        };
        info!(
            collection = %session.collection,
            candidates = request.candidates.len(),
            num_shortlisted,
            provider = %embedder.space(),
            "starting shortlist"
        );

        let result = self
            .run(&mut session, &request, num_shortlisted, &embedder, llm)
            .await;
        match &result {
            Ok(outcome) => {
                session.advance(SessionState::Completed);
                info!(
                    collection = %session.collection,
                    shortlisted = outcome.entries.len(),
                    failures = outcome.report.failures.len(),
                    "shortlist completed"
                );
            }
            Err(e) => {
                error!(
                    collection = %session.collection,
                    stage = %session.state,
                    error = %e,
                    "shortlist failed"
                );
                session.advance(SessionState::Failed);
            }
        }

        if !session.persistent {
            if let Err(e) = self.store.drop_collection(&session.collection).await {
                warn!(
                    collection = %session.collection,
                    error = %e,
                    "failed to drop ephemeral collection"
                );
            }
        }
        result
    }

    async fn run(
        &self,
        session: &mut Session,
        request: &ShortlistRequest,
        num_shortlisted: usize,
        embedder: &Embedder,
        llm: Arc<dyn Llm>,
    ) -> Result<ShortlistOutcome> {
        // Job description first: without it there is nothing to match against.
        let jd = Document::job_description(request.job_description.as_str());
        let jd_units = self.normalizer.normalize_document(&jd);
        if jd_units.is_empty() {
            return Err(ShortlistError::NoJobDescription);
        }

        self.store
            .create_collection(&CollectionSpec {
                name: session.collection.clone(),
                space: embedder.space(),
                metric: SimilarityMetric::Cosine,
                persistent: session.persistent,
            })
            .await?;

        session.advance(SessionState::Ingesting);
        let embed_jd = embedder.embed_units(&jd_units, EmbeddingPurpose::Query);
        let jd_vectors = timeout_at(session.deadline, embed_jd)
            .await
            .map_err(|_| session.timeout())??;

        let entries = self
            .ingest_candidates(session, &request.candidates, embedder)
            .await;
        let ingested = entries.len();
        if ingested == 0 {
            let failed = request.candidates.len();
            return Err(if session.report.timed_out {
                session.timeout()
            } else {
                ShortlistError::NoCandidatesIngested { failed }
            });
        }

        // Re-ingesting a CV replaces every unit it left in the collection.
        session.advance(SessionState::Indexing);
        let document_ids: Vec<String> = entries
            .iter()
            .filter_map(|document| document.first())
            .map(|entry| entry.unit.parent_document_id.clone())
            .collect();
        let replaced = self
            .store
            .delete_documents(&session.collection, &document_ids)
            .await?;
        if replaced > 0 {
            debug!(collection = %session.collection, replaced, "removed stale units");
        }
        let entries: Vec<IndexEntry> = entries.into_iter().flatten().collect();
        self.store.upsert(&session.collection, entries).await?;

        session.advance(SessionState::Retrieving);
        let matches = self.retrieve(session, &jd_vectors).await?;

        session.advance(SessionState::Ranking);
        let ranking = rank(matches, num_shortlisted);
        if let Some(insufficient) = ranking.insufficient {
            let reason = ShortlistError::from(insufficient);
            info!(collection = %session.collection, %reason, "shortlist is short");
        }

        session.advance(SessionState::Explaining);
        let rationales = self
            .explain_candidates(
                session,
                &request.job_description,
                &ranking.candidates,
                llm.clone(),
            )
            .await;
        let job_requirements = if request.extract_requirements {
            let jd = &request.job_description;
            Some(self.requirements(session, llm.as_ref(), jd).await)
        } else {
            None
        };

        let entries: Vec<ShortlistEntry> = ranking
            .candidates
            .into_iter()
            .zip(rationales)
            .map(|(candidate, rationale)| self.entry(candidate, rationale))
            .collect();

        Ok(ShortlistOutcome {
            collection: session.collection.clone(),
            message: format!("Successfully shortlisted {} candidates", entries.len()),
            entries,
            report: std::mem::take(&mut session.report),
            insufficient: ranking.insufficient,
            total_candidates_processed: ingested,
            job_requirements,
        })
    }

    /// Normalize and embed every CV, up to `max_concurrency` at a time.
    ///
    /// Returns each ingested document's entries in request order; failures
    /// and documents cut off by the deadline go to the session report.
    async fn ingest_candidates(
        &self,
        session: &mut Session,
        candidates: &[Document],
        embedder: &Embedder,
    ) -> Vec<Vec<IndexEntry>> {
        let mut seen = HashSet::new();
        let mut outcomes: Vec<Option<Result<Vec<IndexEntry>>>> = std::iter::repeat_with(|| None)
            .take(candidates.len())
            .collect();

        let mut accepted = Vec::with_capacity(candidates.len());
        for (idx, document) in candidates.iter().enumerate() {
            if document.kind != DocumentKind::CandidateCv {
                outcomes[idx] = Some(Err(ingestion_error(document, "not a candidate CV")));
            } else if !seen.insert(document.id.as_str()) {
                outcomes[idx] = Some(Err(ingestion_error(document, "duplicate document id")));
            } else {
                accepted.push((idx, document));
            }
        }

        let normalizer = &self.normalizer;
        let mut in_flight = stream::iter(accepted)
            .map(|(idx, document)| async move {
                (idx, ingest_document(normalizer, embedder, document).await)
            })
            .buffer_unordered(self.config.max_concurrency);

        loop {
            match timeout_at(session.deadline, in_flight.next()).await {
                Ok(Some((idx, result))) => outcomes[idx] = Some(result),
                Ok(None) => break,
                Err(_) => {
                    warn!(collection = %session.collection, "deadline reached during ingestion");
                    session.report.timed_out = true;
                    break;
                }
            }
        }
        drop(in_flight);

        let mut entries = Vec::new();
        for (document, outcome) in candidates.iter().zip(outcomes) {
            match outcome {
                Some(Ok(document_entries)) => entries.push(document_entries),
                Some(Err(e)) => {
                    warn!(document.id = %document.id, error = %e, "candidate excluded");
                    let failure = DocumentFailure::from_error(&document.id, &e);
                    session.report.failures.push(failure);
                }
                None => {
                    let failure = DocumentFailure::from_error(&document.id, &session.timeout());
                    session.report.failures.push(failure);
                }
            }
        }
        entries
    }

    async fn retrieve(
        &self,
        session: &Session,
        jd_vectors: &[EmbeddingVector],
    ) -> Result<MatchStream> {
        let k = match self.config.retrieval_k {
            Some(k) => k,
            None => self
                .store
                .status(Some(session.collection.as_str()))
                .await?
                .first()
                .map_or(1, |status| status.entries.max(1)),
        };
        let retriever = Retriever::new(self.store.clone());
        let retrieval = retriever.retrieve(&session.collection, jd_vectors, k);
        timeout_at(session.deadline, retrieval)
            .await
            .map_err(|_| session.timeout())?
    }

    /// One rationale per candidate, in rank order.
    async fn explain_candidates(
        &self,
        session: &mut Session,
        job_description: &str,
        candidates: &[RankedCandidate],
        llm: Arc<dyn Llm>,
    ) -> Vec<Rationale> {
        let explainer = Explainer::new(llm, self.config.retry)
            .with_context_chars(self.config.explain_context_chars)
            .with_top_chunks(self.config.explain_top_chunks);
        let mut rationales: Vec<Option<Rationale>> = vec![None; candidates.len()];
        let mut failures: Vec<Option<DocumentFailure>> = vec![None; candidates.len()];

        {
            let explainer = &explainer;
            let mut in_flight = stream::iter(candidates.iter().enumerate())
                .map(|(idx, candidate)| async move {
                    let explained = explainer
                        .explain_or_fallback(job_description, &candidate.matched)
                        .await;
                    (idx, explained)
                })
                .buffer_unordered(self.config.max_concurrency);

            loop {
                match timeout_at(session.deadline, in_flight.next()).await {
                    Ok(Some((idx, (rationale, failure)))) => {
                        let id = &candidates[idx].matched.candidate_id;
                        failures[idx] = failure.map(|e| DocumentFailure::from_error(id, &e));
                        rationales[idx] = Some(rationale);
                    }
                    Ok(None) => break,
                    Err(_) => {
                        warn!(
                            collection = %session.collection,
                            "deadline reached during explanation"
                        );
                        session.report.timed_out = true;
                        break;
                    }
                }
            }
        }

        let timeout = session.timeout();
        let rationales: Vec<Rationale> = rationales
            .into_iter()
            .zip(failures.iter_mut())
            .zip(candidates)
            .map(|((rationale, failure), candidate)| {
                rationale.unwrap_or_else(|| {
                    let candidate_id = &candidate.matched.candidate_id;
                    *failure = Some(DocumentFailure::from_error(candidate_id, &timeout));
                    Rationale::fallback(&timeout.to_string())
                })
            })
            .collect();
        let failures = failures.into_iter().flatten();
        session.report.explanation_failures.extend(failures);
        rationales
    }

    async fn requirements(
        &self,
        session: &Session,
        llm: &dyn Llm,
        job_description: &str,
    ) -> JobRequirements {
        let extraction = extract_job_requirements(llm, &self.config.retry, job_description);
        match timeout_at(session.deadline, extraction).await {
            Ok(requirements) => requirements,
            Err(_) => {
                warn!("deadline reached during requirement extraction");
                empty_requirements()
            }
        }
    }

    fn entry(&self, candidate: RankedCandidate, rationale: Rationale) -> ShortlistEntry {
        let matched = candidate.matched;
        let content_preview = matched
            .contributions
            .first()
            .map(|best| {
                preview(&best.text, self.config.content_preview_chars)
            })
            .unwrap_or_default();
        ShortlistEntry {
            rank: candidate.rank,
            candidate_id: matched.candidate_id.clone(),
            score: candidate.score,
            raw_score: matched.raw_score,
            contributing_unit_ids: matched
                .contributing_unit_ids()
                .into_iter()
                .map(String::from)
                .collect(),
            metadata: matched.metadata,
            content_preview,
            rationale,
        }
    }
}

fn ingestion_error(document: &Document, reason: &str) -> ShortlistError {
    ShortlistError::DocumentIngestion {
        document_id: document.id.clone(),
        reason: reason.to_string(),
    }
}

async fn ingest_document(
    normalizer: &Normalizer,
    embedder: &Embedder,
    document: &Document,
) -> Result<Vec<IndexEntry>> {
    let units = normalizer.normalize_document(document);
    if units.is_empty() {
        return Err(ingestion_error(
            document,
            "no text content after normalization",
        ));
    }

    let mut metadata = document.metadata.clone();
    metadata.extend(normalizer.extract_metadata(&document.raw_text));

    let vectors = embedder
        .embed_units(&units, EmbeddingPurpose::Document)
        .await
        .map_err(|e| ingestion_error(document, &e.to_string()))?;

    debug!(document.id = %document.id, unit_count = units.len(), "ingested document");
    Ok(units
        .into_iter()
        .zip(vectors)
        .map(|(unit, vector)| IndexEntry {
            unit,
            vector,
            metadata: metadata.clone(),
        })
        .collect())
}

fn preview(text: &str, max_chars: usize) -> String {
    let cut = truncate_chars(text, max_chars);
    if cut.len() < text.len() {
        format!("{cut}...")
    } else {
        cut.to_string()
    }
}

/// Builder for constructing a [`ShortlistEngine`].
///
/// `providers` is required. The vector store defaults to an
/// [`InMemoryVectorStore`] persisting under the configured `store_dir`, and the
/// normalizer to one sized by the configured chunk parameters.
///
/// # Example
///
/// ```rust,ignore
/// let engine = ShortlistEngine::builder()
///     .config(config)
///     .providers(registry)
///     .vector_store(Arc::new(store))  // optional
///     .build()?;
/// ```
#[derive(Default)]
pub struct ShortlistEngineBuilder {
    config: Option<ShortlistConfig>,
    providers: Option<ProviderRegistry>,
    store: Option<Arc<dyn VectorStore>>,
    normalizer: Option<Normalizer>,
}

impl ShortlistEngineBuilder {
    /// Set the engine configuration.
    pub fn config(mut self, config: ShortlistConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the resolved providers.
    pub fn providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = Some(providers);
        self
    }

    /// Set the vector store backend.
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set a custom normalizer, e.g. with a different skill vocabulary.
    pub fn normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// Build the [`ShortlistEngine`], validating that all required fields are set.
    ///
    /// # Errors
    ///
    /// Returns [`ShortlistError::Config`] if `providers` is missing.
    pub fn build(self) -> Result<ShortlistEngine> {
        let config = self.config.unwrap_or_default();
        let providers = self
            .providers
            .ok_or_else(|| {
                ShortlistError::Config("providers are required".to_string())
            })?;
        let store = self.store.unwrap_or_else(|| match &config.store_dir {
            Some(dir) => Arc::new(InMemoryVectorStore::with_persist_dir(dir)),
            None => Arc::new(InMemoryVectorStore::new()),
        });
        let normalizer = self
            .normalizer
            .unwrap_or_else(|| Normalizer::new(config.chunk_size, config.chunk_overlap));

        Ok(ShortlistEngine {
            config,
            providers,
            store,
            normalizer,
        })
    }
}
