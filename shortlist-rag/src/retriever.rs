//! Similarity retrieval with per-candidate max-pooling.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::document::{EmbeddingVector, MatchResult, ScoredEntry, UnitMatch};
use crate::error::Result;
use crate::vectorstore::VectorStore;

/// Queries a collection with job-description vectors and merges hits per candidate.
///
/// Each job-description chunk is queried separately. A candidate's merged score
/// is the maximum over every (JD chunk, CV unit) pair, so one strongly matching
/// section is never diluted by weaker ones.
#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn VectorStore>,
}

impl Retriever {
    /// Create a retriever over `store`.
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }

    /// Retrieve candidates for the given job-description vectors.
    ///
    /// `k` bounds the entries fetched per JD chunk.
    ///
    /// # Errors
    ///
    /// Propagates store errors, notably
    /// [`ShortlistError::DimensionMismatch`](crate::ShortlistError::DimensionMismatch)
    /// when the vectors do not match the collection's space.
    pub async fn retrieve(
        &self,
        collection: &str,
        jd_vectors: &[EmbeddingVector],
        k: usize,
    ) -> Result<MatchStream> {
        let mut hits = Vec::new();
        for vector in jd_vectors {
            hits.push(self.store.query(collection, vector, k).await?);
        }
        let stream = merge_max_pooled(hits);
        debug!(
            collection,
            jd_chunks = jd_vectors.len(),
            candidates = stream.len(),
            "retrieved"
        );
        Ok(stream)
    }
}

/// Merge per-chunk hit lists into one [`MatchResult`] per candidate.
pub fn merge_max_pooled(hits_per_chunk: Vec<Vec<ScoredEntry>>) -> MatchStream {
    let mut merged: HashMap<String, MatchResult> = HashMap::new();

    for hit in hits_per_chunk.into_iter().flatten() {
        let candidate_id = hit.entry.unit.parent_document_id.clone();
        let result = merged
            .entry(candidate_id.clone())
            .or_insert_with(|| MatchResult {
                candidate_id,
                raw_score: f32::NEG_INFINITY,
                contributions: Vec::new(),
                metadata: hit.entry.metadata.clone(),
            });

        result.raw_score = result.raw_score.max(hit.score);
        for (key, value) in &hit.entry.metadata {
            result
                .metadata
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }

        let unit_id = &hit.entry.unit.unit_id;
        let existing = result
            .contributions
            .iter_mut()
            .find(|c| &c.unit_id == unit_id);
        match existing {
            Some(existing) => existing.score = existing.score.max(hit.score),
            None => result.contributions.push(UnitMatch {
                unit_id: unit_id.clone(),
                text: hit.entry.unit.text,
                score: hit.score,
            }),
        }
    }

    let heap = merged
        .into_values()
        .map(|mut result| {
            result.contributions.sort_by(|a, b| {
                b.score
                    .total_cmp(&a.score)
                    .then_with(|| a.unit_id.cmp(&b.unit_id))
            });
            ByScore(result)
        })
        .collect();
    MatchStream { heap }
}

/// A lazy, finite, single-pass sequence of [`MatchResult`]s, best first.
///
/// Ordering is by merged raw score descending, then candidate id ascending.
/// Results are popped from a heap as the stream is consumed.
#[derive(Debug)]
pub struct MatchStream {
    heap: BinaryHeap<ByScore>,
}

impl MatchStream {
    /// Remaining results.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the stream is exhausted.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl Iterator for MatchStream {
    type Item = MatchResult;

    fn next(&mut self) -> Option<MatchResult> {
        self.heap.pop().map(|ByScore(result)| result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.heap.len(), Some(self.heap.len()))
    }
}

impl ExactSizeIterator for MatchStream {}

#[derive(Debug)]
struct ByScore(MatchResult);

impl PartialEq for ByScore {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ByScore {}

impl PartialOrd for ByScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ByScore {
    // Max-heap: higher score first, then lexicographically smaller id first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .raw_score
            .total_cmp(&other.0.raw_score)
            .then_with(|| other.0.candidate_id.cmp(&self.0.candidate_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{IndexEntry, Metadata, TextUnit, VectorSpace};

    fn hit(unit_id: &str, score: f32) -> ScoredEntry {
        let parent = unit_id.split('#').next().unwrap_or(unit_id).to_string();
        ScoredEntry {
            entry: IndexEntry {
                unit: TextUnit {
                    unit_id: unit_id.to_string(),
                    text: unit_id.to_string(),
                    parent_document_id: parent,
                    offset: 0,
                },
                vector: EmbeddingVector::new(vec![0.0], VectorSpace::new("t", "m", 1)),
                metadata: Metadata::new(),
            },
            score,
        }
    }

    #[test]
    fn max_pooling_across_jd_chunks() {
        let chunk_one = vec![hit("x#0", 0.9), hit("y#0", 0.5)];
        let chunk_two = vec![hit("x#1", 0.4), hit("y#0", 0.6)];
        let results: Vec<MatchResult> = merge_max_pooled(vec![chunk_one, chunk_two]).collect();

        assert_eq!(results[0].candidate_id, "x");
        assert_eq!(results[0].raw_score, 0.9);
        assert_eq!(results[0].contributing_unit_ids(), vec!["x#0", "x#1"]);
        assert_eq!(results[1].candidate_id, "y");
        assert_eq!(results[1].raw_score, 0.6);
        assert_eq!(results[1].contributions.len(), 1);
    }

    #[test]
    fn equal_scores_order_by_candidate_id() {
        let hits = vec![hit("carol#0", 0.7), hit("alice#0", 0.7), hit("bob#0", 0.7)];
        let ids: Vec<String> = merge_max_pooled(vec![hits])
            .map(|m| m.candidate_id)
            .collect();
        assert_eq!(ids, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn stream_is_single_pass() {
        let mut stream = merge_max_pooled(vec![vec![hit("a#0", 0.1)]]);
        assert_eq!(stream.len(), 1);
        assert!(stream.next().is_some());
        assert!(stream.next().is_none());
        assert!(stream.is_empty());
    }
}
