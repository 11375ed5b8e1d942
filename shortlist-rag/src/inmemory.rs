//! In-memory vector store with optional JSON persistence.
//!
//! Collections live in a map behind a `tokio::sync::RwLock`, and each
//! collection has its own lock. Queries share it; upserts, document removals
//! and purges hold it exclusively. Persistent collections are mirrored to one
//! JSON file each when a persistence directory is configured.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::document::{EmbeddingVector, IndexEntry, ScoredEntry, VectorSpace};
use crate::error::{Result, ShortlistError};
use crate::vectorstore::{
    CollectionSpec, CollectionStatus, PurgeScope, SimilarityMetric, VectorStore,
};

const BACKEND: &str = "InMemory";

#[derive(Debug)]
struct StoredEntry {
    seq: u64,
    entry: IndexEntry,
}

#[derive(Debug)]
struct Collection {
    space: VectorSpace,
    metric: SimilarityMetric,
    persistent: bool,
    next_seq: u64,
    entries: HashMap<String, StoredEntry>,
}

impl Collection {
    fn new(spec: &CollectionSpec) -> Self {
        Self {
            space: spec.space.clone(),
            metric: spec.metric,
            persistent: spec.persistent,
            next_seq: 0,
            entries: HashMap::new(),
        }
    }

    fn insert(&mut self, entry: IndexEntry) {
        let id = entry.unit.unit_id.clone();
        match self.entries.get_mut(&id) {
            // Replacing keeps the original position for tie-breaks.
            Some(existing) => existing.entry = entry,
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.entries.insert(id, StoredEntry { seq, entry });
            }
        }
    }

    fn ordered_entries(&self) -> Vec<&StoredEntry> {
        let mut entries: Vec<&StoredEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }

    fn snapshot(&self) -> PersistedCollection {
        PersistedCollection {
            space: self.space.clone(),
            metric: self.metric,
            entries: self
                .ordered_entries()
                .into_iter()
                .map(|e| e.entry.clone())
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedCollection {
    space: VectorSpace,
    metric: SimilarityMetric,
    entries: Vec<IndexEntry>,
}

/// An in-memory [`VectorStore`].
///
/// # Example
///
/// ```rust,ignore
/// use shortlist_rag::InMemoryVectorStore;
///
/// let store = InMemoryVectorStore::new();
/// let durable = InMemoryVectorStore::with_persist_dir("./shortlist_db");
/// ```
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Arc<RwLock<Collection>>>>,
    persist_dir: Option<PathBuf>,
}

impl InMemoryVectorStore {
    /// Create a new empty in-memory vector store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that mirrors persistent collections under `dir`.
    pub fn with_persist_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            collections: RwLock::default(),
            persist_dir: Some(dir.into()),
        }
    }

    async fn collection(&self, name: &str) -> Result<Arc<RwLock<Collection>>> {
        self.collections
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ShortlistError::VectorStore {
                backend: BACKEND.to_string(),
                message: format!("collection '{name}' does not exist"),
            })
    }

    fn file_for(&self, name: &str) -> Option<PathBuf> {
        self.persist_dir
            .as_ref()
            .map(|dir| dir.join(format!("{name}.json")))
    }

    async fn save(&self, name: &str, collection: &Collection) -> Result<()> {
        if !collection.persistent {
            return Ok(());
        }
        let Some(path) = self.file_for(name) else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec(&collection.snapshot())?;
        tokio::fs::write(&path, json).await?;
        debug!(collection = name, path = %path.display(), "persisted collection");
        Ok(())
    }

    async fn load(path: &Path) -> Result<Option<PersistedCollection>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    let valid = !name.is_empty() && name.chars().all(allowed);
    if valid {
        Ok(())
    } else {
        Err(ShortlistError::Config(format!(
            "collection name '{name}' must be non-empty ASCII letters, digits, '-' or '_'"
        )))
    }
}

fn check_space(collection: &str, expected: &VectorSpace, actual: &VectorSpace) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(ShortlistError::DimensionMismatch {
            collection: collection.to_string(),
            expected: expected.clone(),
            actual: actual.clone(),
        })
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn create_collection(&self, spec: &CollectionSpec) -> Result<()> {
        validate_name(&spec.name)?;
        let mut collections = self.collections.write().await;
        if let Some(existing) = collections.get(&spec.name) {
            let existing = existing.read().await;
            return check_space(&spec.name, &existing.space, &spec.space);
        }

        let mut collection = Collection::new(spec);
        if spec.persistent {
            if let Some(path) = self.file_for(&spec.name) {
                if let Some(persisted) = Self::load(&path).await? {
                    check_space(&spec.name, &persisted.space, &spec.space)?;
                    collection.metric = persisted.metric;
                    for entry in persisted.entries {
                        collection.insert(entry);
                    }
                    info!(
                        collection = %spec.name,
                        entries = collection.entries.len(),
                        "reopened persisted collection"
                    );
                }
            }
        }

        let collection = Arc::new(RwLock::new(collection));
        collections.insert(spec.name.clone(), collection);
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        let removed = self.collections.write().await.remove(name);
        if let Some(collection) = removed {
            // Wait for in-flight readers before the collection is gone.
            let collection = collection.write().await;
            if collection.persistent {
                if let Some(path) = self.file_for(name) {
                    match tokio::fs::remove_file(&path).await {
                        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, entries: Vec<IndexEntry>) -> Result<()> {
        let handle = self.collection(collection).await?;
        let mut store = handle.write().await;
        for entry in &entries {
            check_space(collection, &store.space, &entry.vector.space)?;
            if entry.vector.dim() != store.space.dim {
                return Err(ShortlistError::DimensionMismatch {
                    collection: collection.to_string(),
                    expected: store.space.clone(),
                    actual: VectorSpace {
                        dim: entry.vector.dim(),
                        ..entry.vector.space.clone()
                    },
                });
            }
        }
        for entry in entries {
            store.insert(entry);
        }
        self.save(collection, &store).await
    }

    async fn delete_documents(&self, collection: &str, document_ids: &[String]) -> Result<usize> {
        if document_ids.is_empty() {
            return Ok(0);
        }
        let handle = self.collection(collection).await?;
        let mut store = handle.write().await;
        let before = store.entries.len();
        store.entries.retain(|_, stored| {
            !document_ids.contains(&stored.entry.unit.parent_document_id)
        });
        let removed = before - store.entries.len();
        if removed > 0 {
            self.save(collection, &store).await?;
            debug!(collection, removed, "removed document units");
        }
        Ok(removed)
    }

    async fn query(
        &self,
        collection: &str,
        vector: &EmbeddingVector,
        k: usize,
    ) -> Result<Vec<ScoredEntry>> {
        let handle = self.collection(collection).await?;
        let store = handle.read().await;
        check_space(collection, &store.space, &vector.space)?;

        let metric = store.metric;
        let mut scored: Vec<(u64, ScoredEntry)> = store
            .entries
            .values()
            .map(|stored| {
                let score = metric.score(&stored.entry.vector.values, &vector.values);
                let entry = stored.entry.clone();
                (stored.seq, ScoredEntry { entry, score })
            })
            .collect();

        scored.sort_by(|(seq_a, a), (seq_b, b)| {
            b.score.total_cmp(&a.score).then_with(|| seq_a.cmp(seq_b))
        });
        scored.truncate(k);
        Ok(scored.into_iter().map(|(_, s)| s).collect())
    }

    async fn purge(&self, scope: &PurgeScope) -> Result<()> {
        let targets: Vec<(String, Arc<RwLock<Collection>>)> = {
            let collections = self.collections.read().await;
            match scope {
                PurgeScope::All => collections
                    .iter()
                    .map(|(name, c)| (name.clone(), c.clone()))
                    .collect(),
                PurgeScope::Collection(name) => collections
                    .get(name)
                    .map(|c| vec![(name.clone(), c.clone())])
                    .unwrap_or_default(),
            }
        };

        for (name, handle) in targets {
            let mut collection = handle.write().await;
            let removed = collection.entries.len();
            collection.entries.clear();
            self.save(&name, &collection).await?;
            info!(collection = %name, removed, "purged collection");
        }
        Ok(())
    }

    async fn status(&self, collection: Option<&str>) -> Result<Vec<CollectionStatus>> {
        let handles: Vec<(String, Option<Arc<RwLock<Collection>>>)> = {
            let collections = self.collections.read().await;
            match collection {
                Some(name) => vec![(name.to_string(), collections.get(name).cloned())],
                None => collections
                    .iter()
                    .map(|(n, c)| (n.clone(), Some(c.clone())))
                    .collect(),
            }
        };

        let mut statuses = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            let status = match handle {
                Some(handle) => {
                    let c = handle.read().await;
                    CollectionStatus {
                        name,
                        entries: c.entries.len(),
                        space: Some(c.space.clone()),
                        persistent: c.persistent,
                    }
                }
                None => CollectionStatus {
                    name,
                    entries: 0,
                    space: None,
                    persistent: false,
                },
            };
            statuses.push(status);
        }
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Metadata, TextUnit};

    fn space(dim: usize) -> VectorSpace {
        VectorSpace::new("test", "unit", dim)
    }

    fn spec(name: &str, dim: usize) -> CollectionSpec {
        CollectionSpec {
            name: name.to_string(),
            space: space(dim),
            metric: SimilarityMetric::Cosine,
            persistent: false,
        }
    }

    fn entry(id: &str, values: Vec<f32>) -> IndexEntry {
        let dim = values.len();
        IndexEntry {
            unit: TextUnit {
                unit_id: id.to_string(),
                text: format!("text of {id}"),
                parent_document_id: id.split('#').next().unwrap_or(id).to_string(),
                offset: 0,
            },
            vector: EmbeddingVector::new(values, space(dim)),
            metadata: Metadata::new(),
        }
    }

    #[tokio::test]
    async fn upsert_replaces_by_unit_id() {
        let store = InMemoryVectorStore::new();
        store.create_collection(&spec("c", 2)).await.unwrap();
        let first = vec![entry("a#0", vec![1.0, 0.0])];
        store.upsert("c", first).await.unwrap();
        let second = vec![entry("a#0", vec![0.0, 1.0])];
        store.upsert("c", second).await.unwrap();

        let status = store.status(Some("c")).await.unwrap();
        assert_eq!(status[0].entries, 1);
        let query = EmbeddingVector::new(vec![0.0, 1.0], space(2));
        let results = store.query("c", &query, 5).await.unwrap();
        assert_eq!(results[0].entry.vector.values, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn ties_break_by_insertion_order() {
        let store = InMemoryVectorStore::new();
        store.create_collection(&spec("c", 2)).await.unwrap();
        let entries = ["z#0", "a#0", "m#0"]
            .iter()
            .map(|id| entry(id, vec![1.0, 1.0]))
            .collect();
        store.upsert("c", entries).await.unwrap();

        let query = EmbeddingVector::new(vec![1.0, 1.0], space(2));
        for _ in 0..5 {
            let ids: Vec<String> = store
                .query("c", &query, 3)
                .await
                .unwrap()
                .into_iter()
                .map(|r| r.entry.unit.unit_id)
                .collect();
            assert_eq!(ids, vec!["z#0", "a#0", "m#0"]);
        }
    }

    #[tokio::test]
    async fn query_from_other_space_is_rejected() {
        let store = InMemoryVectorStore::new();
        store.create_collection(&spec("c", 2)).await.unwrap();
        let entries = vec![entry("a#0", vec![1.0, 0.0])];
        store.upsert("c", entries).await.unwrap();

        let foreign = EmbeddingVector::new(vec![1.0, 0.0, 0.0], VectorSpace::new("other", "m", 3));
        let err = store.query("c", &foreign, 1).await.unwrap_err();
        match err {
            ShortlistError::DimensionMismatch {
                collection,
                expected,
                actual,
            } => {
                assert_eq!(collection, "c");
                assert_eq!(expected.dim, 2);
                assert_eq!(actual.dim, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn reopening_in_another_space_is_rejected() {
        let store = InMemoryVectorStore::new();
        store.create_collection(&spec("c", 2)).await.unwrap();
        store.create_collection(&spec("c", 2)).await.unwrap();
        let err = store.create_collection(&spec("c", 4)).await.unwrap_err();
        assert_eq!(err.tag(), "dimension_mismatch");
    }

    #[tokio::test]
    async fn purge_is_idempotent() {
        let store = InMemoryVectorStore::new();
        let missing = PurgeScope::Collection("missing".into());
        store.purge(&missing).await.unwrap();
        store.create_collection(&spec("c", 2)).await.unwrap();
        let entries = vec![entry("a#0", vec![1.0, 0.0])];
        store.upsert("c", entries).await.unwrap();
        store.purge(&PurgeScope::All).await.unwrap();
        store.purge(&PurgeScope::All).await.unwrap();
        assert_eq!(store.status(Some("c")).await.unwrap()[0].entries, 0);
        assert_eq!(store.status(Some("missing")).await.unwrap()[0].entries, 0);
    }

    #[tokio::test]
    async fn delete_documents_removes_every_unit_of_named_parents() {
        let store = InMemoryVectorStore::new();
        store.create_collection(&spec("c", 2)).await.unwrap();
        let entries = vec![
            entry("ada#0", vec![1.0, 0.0]),
            entry("ada#1", vec![0.0, 1.0]),
            entry("bob#0", vec![1.0, 1.0]),
        ];
        store.upsert("c", entries).await.unwrap();

        let removed = store
            .delete_documents("c", &["ada".to_string(), "cyd".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.delete_documents("c", &[]).await.unwrap(), 0);

        let query = EmbeddingVector::new(vec![1.0, 0.0], space(2));
        let ids: Vec<String> = store
            .query("c", &query, 5)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.entry.unit.unit_id)
            .collect();
        assert_eq!(ids, vec!["bob#0"]);
    }

    #[tokio::test]
    async fn persistent_collections_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let durable = CollectionSpec {
            persistent: true,
            ..spec("pool", 2)
        };
        {
            let store = InMemoryVectorStore::with_persist_dir(dir.path());
            store.create_collection(&durable).await.unwrap();
            let entries = vec![entry("a#0", vec![1.0, 0.0]), entry("b#0", vec![0.0, 1.0])];
            store.upsert("pool", entries).await.unwrap();
            let removed = store.delete_documents("pool", &["b".to_string()]).await;
            assert_eq!(removed.unwrap(), 1);
        }

        let reopened = InMemoryVectorStore::with_persist_dir(dir.path());
        reopened.create_collection(&durable).await.unwrap();
        assert_eq!(reopened.status(Some("pool")).await.unwrap()[0].entries, 1);

        reopened.drop_collection("pool").await.unwrap();
        assert!(!dir.path().join("pool.json").exists());
    }

    #[tokio::test]
    async fn invalid_names_are_rejected() {
        let store = InMemoryVectorStore::new();
        assert!(store.create_collection(&spec("../etc", 2)).await.is_err());
    }
}
