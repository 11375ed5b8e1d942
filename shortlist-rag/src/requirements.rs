//! Structured job requirements extracted from a job description by an LLM.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use crate::llm::{Llm, LlmRequest, extract_json_object, strip_json_fences};
use crate::prompts::{self, REQUIREMENT_KEYS};
use crate::retry::RetryPolicy;

/// Requirement key to extracted value. Every key in [`REQUIREMENT_KEYS`] is present.
pub type JobRequirements = BTreeMap<String, String>;

pub(crate) fn empty_requirements() -> JobRequirements {
    REQUIREMENT_KEYS
        .iter()
        .map(|(k, _)| (k.to_string(), String::new()))
        .collect()
}

/// Ask `llm` for the job's skills, experience, location, degree and employment type.
///
/// Never fails: any model or parse failure yields empty values and a warning.
pub async fn extract_job_requirements(
    llm: &dyn Llm,
    retry: &RetryPolicy,
    job_description: &str,
) -> JobRequirements {
    let request = LlmRequest {
        temperature: 0.0,
        ..LlmRequest::new(
            prompts::REQUIREMENTS_SYSTEM,
            prompts::requirements_prompt(job_description),
        )
    };

    let attempt = || llm.generate(&request);
    match retry.run("extract_requirements", attempt).await {
        Ok(output) => parse_requirements(&output),
        Err((e, attempts)) => {
            warn!(provider = llm.name(), attempts, error = %e, "requirement extraction failed");
            empty_requirements()
        }
    }
}

/// Parse model output into requirements, tolerating fences and surrounding prose.
pub fn parse_requirements(output: &str) -> JobRequirements {
    let mut requirements = empty_requirements();
    let stripped = strip_json_fences(output);
    let Some(json) = extract_json_object(stripped) else {
        warn!("no JSON object in requirement extraction output");
        return requirements;
    };
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(json) else {
        warn!("requirement extraction output is not a JSON object");
        return requirements;
    };

    for (key, value) in map {
        if let Some(slot) = requirements.get_mut(&key) {
            *slot = flatten(&value);
        }
    }
    requirements
}

fn flatten(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .map(flatten)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockLlm;

    #[test]
    fn parses_mixed_value_types() {
        let output = "Here you go:\n```json\n{\"skills\": [\"Rust\", \"AWS\"], \
                      \"years_experience\": 5, \"location\": \"Remote\", \
                      \"unexpected\": \"ignored\"}\n```";
        let requirements = parse_requirements(output);
        assert_eq!(requirements["skills"], "Rust, AWS");
        assert_eq!(requirements["years_experience"], "5");
        assert_eq!(requirements["location"], "Remote");
        assert_eq!(requirements["degree_level"], "");
        assert!(!requirements.contains_key("unexpected"));
        assert_eq!(requirements.len(), REQUIREMENT_KEYS.len());
    }

    #[test]
    fn garbage_yields_empty_values() {
        let requirements = parse_requirements("I cannot help with that");
        assert!(requirements.values().all(String::is_empty));
        assert_eq!(requirements.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn model_failure_yields_empty_values() {
        let llm = MockLlm::failing();
        let retry = RetryPolicy::default();
        let job = "Rust engineer, Berlin";
        let requirements = extract_job_requirements(&llm, &retry, job).await;
        assert!(requirements.values().all(String::is_empty));
    }
}
