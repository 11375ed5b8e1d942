//! Language-model capability used by the explainer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Default sampling temperature for explanations.
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// A single-turn text generation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmRequest {
    /// System instruction.
    pub system: String,
    /// User prompt.
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f32,
}

impl LlmRequest {
    /// A request with the default temperature.
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

/// A text-generating language model.
///
/// Implementations make exactly one attempt per call; retries are applied by
/// the caller's [`RetryPolicy`](crate::RetryPolicy).
#[async_trait]
pub trait Llm: Send + Sync {
    /// The model name, used in logs and error reports.
    fn name(&self) -> &str;

    /// Generate a completion for the request.
    async fn generate(&self, request: &LlmRequest) -> Result<String, ProviderError>;
}

/// Strip ```json ... ``` or ``` ... ``` code fences from model output.
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    let inner = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"));
    match inner {
        Some(stripped) => {
            let stripped = stripped.trim_start();
            stripped
                .strip_suffix("```")
                .map(str::trim)
                .unwrap_or(stripped)
        }
        None => text,
    }
}

/// The outermost `{ ... }` span of `text`, if any.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_json_fences_with_json_tag() {
        let input = "```json\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn strip_json_fences_without_tag() {
        let input = "```\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn strip_json_fences_no_fences() {
        assert_eq!(strip_json_fences("{\"key\": 1}"), "{\"key\": 1}");
    }

    #[test]
    fn json_object_inside_prose() {
        let text = "Sure! Here it is: {\"a\": {\"b\": 1}} Hope that helps.";
        assert_eq!(extract_json_object(text), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_json_object("no json"), None);
    }
}
