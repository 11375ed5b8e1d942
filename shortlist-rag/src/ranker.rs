//! Score normalization, deduplication, and truncation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::document::MatchResult;
use crate::error::ShortlistError;

/// A ranked candidate awaiting its rationale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedCandidate {
    /// 1-based rank position.
    pub rank: usize,
    /// Score normalized to `0.0..=1.0` over the current result set.
    pub score: f32,
    /// The underlying match.
    pub matched: MatchResult,
}

/// Fewer candidates were available than requested. Informational only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct InsufficientCandidates {
    /// The requested shortlist size.
    pub requested: usize,
    /// The number of candidates returned.
    pub available: usize,
}

impl From<InsufficientCandidates> for ShortlistError {
    fn from(value: InsufficientCandidates) -> Self {
        ShortlistError::InsufficientCandidates {
            requested: value.requested,
            available: value.available,
        }
    }
}

/// The ranker's output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ranking {
    /// Candidates, best first.
    pub candidates: Vec<RankedCandidate>,
    /// Set when fewer than the requested number were available.
    pub insufficient: Option<InsufficientCandidates>,
}

/// Rank raw matches into at most `num_shortlisted` candidates.
///
/// - duplicates of a candidate id keep the highest raw score
/// - scores are min/max normalized over the deduplicated set; when every
///   score is equal (including a single candidate) all normalize to `1.0`
/// - order is normalized score descending, then candidate id ascending
pub fn rank<I>(matches: I, num_shortlisted: usize) -> Ranking
where
    I: IntoIterator<Item = MatchResult>,
{
    let mut best: HashMap<String, MatchResult> = HashMap::new();
    for m in matches {
        match best.get(&m.candidate_id) {
            Some(existing) if existing.raw_score >= m.raw_score => {}
            _ => {
                best.insert(m.candidate_id.clone(), m);
            }
        }
    }

    let (min, max) = best
        .values()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), m| {
            (lo.min(m.raw_score), hi.max(m.raw_score))
        });
    let spread = max - min;

    let mut scored: Vec<(f32, MatchResult)> = best
        .into_values()
        .map(|m| {
            let score = if spread > 0.0 {
                (m.raw_score - min) / spread
            } else {
                1.0
            };
            (score, m)
        })
        .collect();

    scored.sort_by(|(sa, a), (sb, b)| {
        sb.total_cmp(sa).then(a.candidate_id.cmp(&b.candidate_id))
    });

    let available = scored.len();
    scored.truncate(num_shortlisted);
    let insufficient = if available < num_shortlisted {
        Some(InsufficientCandidates {
            requested: num_shortlisted,
            available,
        })
    } else {
        None
    };

    let candidates = scored
        .into_iter()
        .enumerate()
        .map(|(i, (score, matched))| RankedCandidate {
            rank: i + 1,
            score,
            matched,
        })
        .collect();

    Ranking {
        candidates,
        insufficient,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Metadata;

    fn m(id: &str, raw_score: f32) -> MatchResult {
        MatchResult {
            candidate_id: id.to_string(),
            raw_score,
            contributions: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn normalizes_to_unit_range() {
        let ranking = rank(vec![m("a", 0.2), m("b", 0.6), m("c", 0.4)], 3);
        let scores: Vec<(String, f32)> = ranking
            .candidates
            .iter()
            .map(|c| (c.matched.candidate_id.clone(), c.score))
            .collect();
        assert_eq!(scores[0], ("b".to_string(), 1.0));
        assert!((scores[1].1 - 0.5).abs() < 1e-6);
        assert_eq!(scores[2], ("a".to_string(), 0.0));
        assert!(ranking.insufficient.is_none());
    }

    #[test]
    fn equal_scores_normalize_to_one_and_tie_break_by_id() {
        let ranking = rank(vec![m("zed", 0.3), m("amy", 0.3)], 2);
        assert!(ranking.candidates.iter().all(|c| c.score == 1.0));
        assert_eq!(ranking.candidates[0].matched.candidate_id, "amy");
        assert_eq!(ranking.candidates[0].rank, 1);
        assert_eq!(ranking.candidates[1].rank, 2);
    }

    #[test]
    fn deduplicates_keeping_highest() {
        let ranking = rank(vec![m("a", 0.2), m("a", 0.9), m("b", 0.5)], 5);
        assert_eq!(ranking.candidates.len(), 2);
        assert_eq!(ranking.candidates[0].matched.raw_score, 0.9);
    }

    #[test]
    fn fewer_than_requested_is_signalled() {
        let ranking = rank(vec![m("a", 0.1), m("b", 0.2), m("c", 0.3)], 5);
        assert_eq!(ranking.candidates.len(), 3);
        assert_eq!(
            ranking.insufficient,
            Some(InsufficientCandidates {
                requested: 5,
                available: 3,
            })
        );
    }

    #[test]
    fn truncates_to_requested() {
        let ranking = rank((0..10).map(|i| m(&format!("c{i}"), i as f32)), 3);
        let ids: Vec<&str> = ranking
            .candidates
            .iter()
            .map(|c| c.matched.candidate_id.as_str())
            .collect();
        assert_eq!(ids, vec!["c9", "c8", "c7"]);
    }

    #[test]
    fn empty_input_yields_empty_ranking() {
        let ranking = rank(Vec::new(), 3);
        assert!(ranking.candidates.is_empty());
        assert_eq!(ranking.insufficient.map(|i| i.available), Some(0));
    }
}
