//! Retrieval-augmented rationales for shortlisted candidates.
//!
//! The [`Explainer`] is the generation half of the retrieve-then-generate
//! pipeline: it takes a [`MatchResult`] from the retriever, builds a prompt
//! from the job description and the candidate's best-matching text units,
//! and asks a language model for a structured rationale. Failures never
//! affect ranking; callers get a fallback rationale instead.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::document::MatchResult;
use crate::error::{Result, ShortlistError};
use crate::llm::{Llm, LlmRequest, extract_json_object, strip_json_fences};
use crate::prompts;
use crate::retry::RetryPolicy;

/// Default character budget for the job description plus candidate excerpts.
pub const DEFAULT_CONTEXT_CHARS: usize = 6000;

/// Default number of contributing units offered to the model.
pub const DEFAULT_TOP_CHUNKS: usize = 3;

/// Why a candidate was (or could not be) explained.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Rationale {
    /// Short overall assessment, or the fallback message.
    pub summary: String,
    /// Where the candidate matches the role.
    #[serde(default)]
    pub strengths: Vec<String>,
    /// Where the candidate falls short.
    #[serde(default)]
    pub gaps: Vec<String>,
    /// Model's estimate of skill overlap.
    #[serde(default)]
    pub skill_match_percent: Option<u8>,
    /// `false` when this is a fallback rationale.
    #[serde(default = "default_true")]
    pub generated: bool,
}

fn default_true() -> bool {
    true
}

impl Rationale {
    /// The rationale emitted when generation failed.
    pub fn fallback(reason: &str) -> Self {
        Self {
            summary: format!("Explanation generation failed: {reason}"),
            generated: false,
            ..Self::default()
        }
    }

    /// Parse model output, accepting fenced JSON or JSON embedded in prose.
    ///
    /// Output that is not valid JSON becomes the summary verbatim.
    pub fn parse(output: &str) -> Self {
        let stripped = strip_json_fences(output);
        let candidate = extract_json_object(stripped).unwrap_or(stripped);
        match serde_json::from_str::<RawRationale>(candidate) {
            Ok(raw) => Self {
                summary: raw.summary.unwrap_or_default(),
                strengths: raw.strengths,
                gaps: raw.gaps,
                skill_match_percent: raw
                    .skill_match_percent
                    .map(|p| p.clamp(0.0, 100.0).round() as u8),
                generated: true,
            },
            Err(_) => Self {
                summary: output.trim().to_string(),
                generated: true,
                ..Self::default()
            },
        }
    }
}

#[derive(Deserialize)]
struct RawRationale {
    summary: Option<String>,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    gaps: Vec<String>,
    skill_match_percent: Option<f64>,
}

/// Produces per-candidate rationales with a language model.
///
/// # Example
///
/// ```rust,ignore
/// let explainer = Explainer::new(Arc::new(llm), RetryPolicy::default());
/// let rationale = explainer.explain(&jd_text, &match_result).await?;
/// ```
#[derive(Clone)]
pub struct Explainer {
    llm: Arc<dyn Llm>,
    retry: RetryPolicy,
    context_chars: usize,
    top_chunks: usize,
}

impl Explainer {
    /// Create an explainer with default context limits.
    pub fn new(llm: Arc<dyn Llm>, retry: RetryPolicy) -> Self {
        Self {
            llm,
            retry,
            context_chars: DEFAULT_CONTEXT_CHARS,
            top_chunks: DEFAULT_TOP_CHUNKS,
        }
    }

    /// Set the character budget for prompt context.
    pub fn with_context_chars(mut self, chars: usize) -> Self {
        self.context_chars = chars.max(1);
        self
    }

    /// Set how many contributing units are offered to the model.
    pub fn with_top_chunks(mut self, top_chunks: usize) -> Self {
        self.top_chunks = top_chunks.max(1);
        self
    }

    /// The underlying model.
    pub fn llm(&self) -> &Arc<dyn Llm> {
        &self.llm
    }

    /// The retry policy applied to model calls.
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Build the request for one candidate, within the context budget.
    pub fn build_request(&self, job_description: &str, matched: &MatchResult) -> LlmRequest {
        let jd = truncate_chars(job_description, self.context_chars / 2);
        let remaining = self.context_chars.saturating_sub(jd.chars().count());

        let mut excerpts: Vec<(String, String)> = matched
            .contributions
            .iter()
            .take(self.top_chunks)
            .map(|c| (c.unit_id.clone(), c.text.clone()))
            .collect();

        // Drop the least relevant excerpts first.
        while excerpts.len() > 1 && total_chars(&excerpts) > remaining {
            excerpts.pop();
        }
        if let Some((_, text)) = excerpts.first_mut() {
            if text.chars().count() > remaining {
                *text = truncate_chars(text, remaining).to_string();
            }
        }

        let prompt = prompts::explain_prompt(jd, &matched.candidate_id, &excerpts);
        LlmRequest::new(prompts::EXPLAIN_SYSTEM, prompt)
    }

    /// Generate a rationale for one candidate.
    ///
    /// # Errors
    ///
    /// Returns [`ShortlistError::LlmUnavailable`] once retries are exhausted.
    pub async fn explain(&self, job_description: &str, matched: &MatchResult) -> Result<Rationale> {
        let request = self.build_request(job_description, matched);
        let output = self
            .retry
            .run("explain", || self.llm.generate(&request))
            .await
            .map_err(|(e, attempts)| ShortlistError::LlmUnavailable {
                provider: self.llm.name().to_string(),
                attempts,
                message: e.message,
            })?;
        debug!(candidate = %matched.candidate_id, output_len = output.len(), "explained candidate");
        Ok(Rationale::parse(&output))
    }

    /// Like [`explain`](Explainer::explain), but failures yield a fallback rationale.
    ///
    /// The error, if any, is returned alongside for reporting.
    pub async fn explain_or_fallback(
        &self,
        job_description: &str,
        matched: &MatchResult,
    ) -> (Rationale, Option<ShortlistError>) {
        match self.explain(job_description, matched).await {
            Ok(rationale) => (rationale, None),
            Err(e) => {
                warn!(
                    candidate = %matched.candidate_id,
                    error = %e,
                    "explanation failed, using fallback"
                );
                (Rationale::fallback(&e.to_string()), Some(e))
            }
        }
    }
}

fn total_chars(excerpts: &[(String, String)]) -> usize {
    excerpts.iter().map(|(_, text)| text.chars().count()).sum()
}

/// The longest prefix of `text` with at most `max` characters.
pub(crate) fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Metadata, UnitMatch};
    use crate::mock::MockLlm;

    fn unit(idx: usize, fill: &str, score: f32) -> UnitMatch {
        UnitMatch {
            unit_id: format!("cv-1#{idx}"),
            text: fill.repeat(400),
            score,
        }
    }

    fn matched() -> MatchResult {
        MatchResult {
            candidate_id: "cv-1".into(),
            raw_score: 0.8,
            contributions: vec![unit(0, "a", 0.8), unit(1, "b", 0.5), unit(2, "c", 0.2)],
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn drops_lowest_relevance_chunks_first() {
        let explainer = Explainer::new(Arc::new(MockLlm::new("{}")), RetryPolicy::none())
            .with_context_chars(1000);
        let request = explainer.build_request("Rust engineer", &matched());
        assert!(request.prompt.contains(&"a".repeat(400)));
        assert!(request.prompt.contains(&"b".repeat(400)));
        assert!(!request.prompt.contains("ccc"));
    }

    #[test]
    fn single_oversized_chunk_is_truncated() {
        let explainer = Explainer::new(Arc::new(MockLlm::new("{}")), RetryPolicy::none())
            .with_context_chars(200);
        let request = explainer.build_request("Rust engineer", &matched());
        assert!(!request.prompt.contains("bbb"));
        assert!(!request.prompt.contains(&"a".repeat(190)));
        assert!(request.prompt.contains(&"a".repeat(180)));
    }

    #[test]
    fn parses_fenced_structured_output() {
        let output = "```json\n{\"summary\": \"Strong fit\", \"strengths\": [\"Rust\"], \
                      \"gaps\": [], \"skill_match_percent\": 87}\n```";
        let rationale = Rationale::parse(output);
        assert_eq!(rationale.summary, "Strong fit");
        assert_eq!(rationale.strengths, vec!["Rust"]);
        assert_eq!(rationale.skill_match_percent, Some(87));
        assert!(rationale.generated);
    }

    #[test]
    fn unstructured_output_becomes_summary() {
        let rationale = Rationale::parse("Good candidate overall.");
        assert_eq!(rationale.summary, "Good candidate overall.");
        assert!(rationale.strengths.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_yields_fallback_rationale() {
        let explainer = Explainer::new(Arc::new(MockLlm::failing()), RetryPolicy::default());
        let (rationale, error) = explainer.explain_or_fallback("jd", &matched()).await;
        assert!(!rationale.generated);
        let summary = &rationale.summary;
        assert!(summary.starts_with("Explanation generation failed"));
        assert!(matches!(
            error,
            Some(ShortlistError::LlmUnavailable { attempts: 3, .. })
        ));
    }
}
