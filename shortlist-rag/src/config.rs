//! Configuration for the shortlisting engine.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShortlistError};
use crate::explainer::{DEFAULT_CONTEXT_CHARS, DEFAULT_TOP_CHUNKS};
use crate::retry::RetryPolicy;

/// Largest shortlist a single request may ask for.
pub const MAX_SHORTLISTED: usize = 50;

/// Engine-wide tuning parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShortlistConfig {
    /// Maximum text unit size in characters.
    pub chunk_size: usize,
    /// Characters shared by consecutive hard-split windows.
    pub chunk_overlap: usize,
    /// Concurrent provider calls per request stage.
    pub max_concurrency: usize,
    /// Deadline for a whole request.
    #[serde(with = "crate::retry::millis")]
    pub request_timeout: Duration,
    /// Entries fetched per job-description unit. `None` scans the whole collection.
    pub retrieval_k: Option<usize>,
    /// Character budget for explanation prompts.
    pub explain_context_chars: usize,
    /// Contributing units offered to the explainer.
    pub explain_top_chunks: usize,
    /// Length of the content preview attached to each entry.
    pub content_preview_chars: usize,
    /// Retry policy for embedding and language-model calls.
    pub retry: RetryPolicy,
    /// Where named collections are persisted. `None` keeps everything in memory.
    pub store_dir: Option<PathBuf>,
}

impl Default for ShortlistConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1500,
            chunk_overlap: 150,
            max_concurrency: 4,
            request_timeout: Duration::from_secs(120),
            retrieval_k: None,
            explain_context_chars: DEFAULT_CONTEXT_CHARS,
            explain_top_chunks: DEFAULT_TOP_CHUNKS,
            content_preview_chars: 800,
            retry: RetryPolicy::default(),
            store_dir: None,
        }
    }
}

impl ShortlistConfig {
    /// Create a new builder for constructing a [`ShortlistConfig`].
    pub fn builder() -> ShortlistConfigBuilder {
        ShortlistConfigBuilder::default()
    }

    /// Read tuning overrides from the process environment.
    ///
    /// See [`ShortlistConfig::from_lookup`] for the variables.
    ///
    /// # Errors
    ///
    /// Returns [`ShortlistError::Config`] for unparsable or inconsistent values.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read tuning overrides through `lookup`; unset variables keep their defaults.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `SHORTLIST_CHUNK_SIZE` | `chunk_size` |
    /// | `SHORTLIST_CHUNK_OVERLAP` | `chunk_overlap` |
    /// | `SHORTLIST_MAX_CONCURRENCY` | `max_concurrency` |
    /// | `SHORTLIST_REQUEST_TIMEOUT_SECS` | `request_timeout` |
    /// | `SHORTLIST_RETRIEVAL_K` | `retrieval_k` |
    /// | `SHORTLIST_STORE_DIR` | `store_dir` |
    ///
    /// # Errors
    ///
    /// Returns [`ShortlistError::Config`] for unparsable or inconsistent values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut builder = Self::builder();
        if let Some(size) = parse_var(&var, "SHORTLIST_CHUNK_SIZE")? {
            builder = builder.chunk_size(size);
        }
        if let Some(overlap) = parse_var(&var, "SHORTLIST_CHUNK_OVERLAP")? {
            builder = builder.chunk_overlap(overlap);
        }
        if let Some(limit) = parse_var(&var, "SHORTLIST_MAX_CONCURRENCY")? {
            builder = builder.max_concurrency(limit);
        }
        if let Some(secs) = parse_var(&var, "SHORTLIST_REQUEST_TIMEOUT_SECS")? {
            builder = builder.request_timeout(Duration::from_secs(secs));
        }
        if let Some(k) = parse_var(&var, "SHORTLIST_RETRIEVAL_K")? {
            builder = builder.retrieval_k(k);
        }
        if let Some(dir) = var("SHORTLIST_STORE_DIR") {
            builder = builder.store_dir(dir);
        }
        builder.build()
    }
}

fn parse_var<T, V>(var: &V, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    V: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|value| {
            value.parse().map_err(|e| {
                ShortlistError::Config(format!("{key}: invalid value '{value}': {e}"))
            })
        })
        .transpose()
}

/// Builder for constructing a validated [`ShortlistConfig`].
#[derive(Debug, Clone, Default)]
pub struct ShortlistConfigBuilder {
    config: ShortlistConfig,
}

impl ShortlistConfigBuilder {
    /// Set the maximum text unit size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between hard-split windows in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the number of concurrent provider calls.
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.config.max_concurrency = limit;
        self
    }

    /// Set the per-request deadline.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Bound the entries fetched per job-description unit.
    pub fn retrieval_k(mut self, k: usize) -> Self {
        self.config.retrieval_k = Some(k);
        self
    }

    /// Set the explanation prompt's character budget.
    pub fn explain_context_chars(mut self, chars: usize) -> Self {
        self.config.explain_context_chars = chars;
        self
    }

    /// Set how many contributing units the explainer sees.
    pub fn explain_top_chunks(mut self, chunks: usize) -> Self {
        self.config.explain_top_chunks = chunks;
        self
    }

    /// Set the content preview length.
    pub fn content_preview_chars(mut self, chars: usize) -> Self {
        self.config.content_preview_chars = chars;
        self
    }

    /// Set the provider retry policy.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Persist named collections under `dir`.
    pub fn store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.store_dir = Some(dir.into());
        self
    }

    /// Build the [`ShortlistConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`ShortlistError::Config`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `max_concurrency == 0`
    /// - `retrieval_k == Some(0)`
    /// - `retry.max_attempts == 0`
    /// - the request timeout or explanation budget is zero
    pub fn build(self) -> Result<ShortlistConfig> {
        let config = self.config;
        if config.chunk_size == 0 {
            return Err(ShortlistError::Config(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(ShortlistError::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                config.chunk_overlap, config.chunk_size
            )));
        }
        if config.max_concurrency == 0 {
            return Err(ShortlistError::Config(
                "max_concurrency must be greater than zero".to_string(),
            ));
        }
        if config.retrieval_k == Some(0) {
            return Err(ShortlistError::Config(
                "retrieval_k must be greater than zero".to_string(),
            ));
        }
        if config.retry.max_attempts == 0 {
            return Err(ShortlistError::Config(
                "retry.max_attempts must be greater than zero".to_string(),
            ));
        }
        if config.request_timeout.is_zero() {
            return Err(ShortlistError::Config(
                "request_timeout must be non-zero".to_string(),
            ));
        }
        if config.explain_context_chars == 0 || config.explain_top_chunks == 0 {
            return Err(ShortlistError::Config(
                "explanation budget must be greater than zero".to_string(),
            ));
        }
        Ok(config)
    }
}

/// Check a requested shortlist size.
///
/// # Errors
///
/// Returns [`ShortlistError::Config`] unless `1 <= n <= MAX_SHORTLISTED`.
pub fn validate_shortlist_size(n: usize) -> Result<usize> {
    if (1..=MAX_SHORTLISTED).contains(&n) {
        Ok(n)
    } else {
        Err(ShortlistError::Config(format!(
            "num_shortlisted must be between 1 and {MAX_SHORTLISTED}, got {n}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = ShortlistConfig::builder().build().unwrap();
        assert_eq!(config, ShortlistConfig::default());
        assert_eq!(config.chunk_size, 1500);
        assert_eq!(config.retrieval_k, None);
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk() {
        let err = ShortlistConfig::builder()
            .chunk_size(100)
            .chunk_overlap(100)
            .build();
        assert!(matches!(err, Err(ShortlistError::Config(_))));
    }

    #[test]
    fn zero_limits_are_rejected() {
        assert!(
            ShortlistConfig::builder()
                .max_concurrency(0)
                .build()
                .is_err()
        );
        assert!(ShortlistConfig::builder().retrieval_k(0).build().is_err());
        assert!(
            ShortlistConfig::builder()
                .request_timeout(Duration::ZERO)
                .build()
                .is_err()
        );
        let retry = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(ShortlistConfig::builder().retry(retry).build().is_err());
    }

    #[test]
    fn shortlist_size_bounds() {
        assert!(validate_shortlist_size(0).is_err());
        assert_eq!(validate_shortlist_size(1).unwrap(), 1);
        assert_eq!(validate_shortlist_size(50).unwrap(), 50);
        assert!(validate_shortlist_size(51).is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = ShortlistConfig::builder()
            .request_timeout(Duration::from_secs(30))
            .store_dir("/tmp/shortlist")
            .build()
            .unwrap();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["request_timeout"], 30_000);
        let back: ShortlistConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn environment_overrides_tuning() {
        let config = ShortlistConfig::from_lookup(env(&[
            ("SHORTLIST_CHUNK_SIZE", "800"),
            ("SHORTLIST_CHUNK_OVERLAP", " 80 "),
            ("SHORTLIST_MAX_CONCURRENCY", "8"),
            ("SHORTLIST_REQUEST_TIMEOUT_SECS", "30"),
            ("SHORTLIST_RETRIEVAL_K", "25"),
            ("SHORTLIST_STORE_DIR", "/var/lib/shortlist"),
        ]))
        .unwrap();
        assert_eq!(config.chunk_size, 800);
        assert_eq!(config.chunk_overlap, 80);
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.retrieval_k, Some(25));
        assert_eq!(config.store_dir, Some(PathBuf::from("/var/lib/shortlist")));
        assert_eq!(config.explain_top_chunks, DEFAULT_TOP_CHUNKS);
    }

    #[test]
    fn unset_environment_keeps_defaults() {
        let config = ShortlistConfig::from_lookup(env(&[("SHORTLIST_STORE_DIR", "  ")]))
            .unwrap();
        assert_eq!(config, ShortlistConfig::default());
    }

    #[test]
    fn environment_values_are_validated() {
        let err = ShortlistConfig::from_lookup(env(&[("SHORTLIST_MAX_CONCURRENCY", "many")]));
        assert!(matches!(err, Err(ShortlistError::Config(msg)) if msg.contains("MAX_CONCURRENCY")));

        let err = ShortlistConfig::from_lookup(env(&[("SHORTLIST_CHUNK_OVERLAP", "2000")]));
        assert!(matches!(err, Err(ShortlistError::Config(_))));
    }
}
