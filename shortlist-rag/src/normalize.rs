//! Text normalization: cleaning, segmentation, and metadata extraction.
//!
//! [`Normalizer`] turns a document's extracted text into [`TextUnit`]s that fit
//! the embedding provider's input budget. Segmentation is hierarchical:
//! paragraphs, then sentences, then words, then fixed character windows with
//! overlap for anything still too long.
//!
//! Metadata extraction is best effort. It never fails; when a pattern cannot
//! be used the mapping is simply left empty and a warning is logged.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::document::{Document, Metadata, MetadataValue, SourceFormat, TextUnit};

/// Separators tried in order when a span exceeds the chunk size.
const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", "; ", " "];

/// A line repeated on at least this many pages is treated as a header or footer.
const BOILERPLATE_MIN_PAGES: usize = 3;

/// Skill keywords recognized when no custom list is configured.
pub const DEFAULT_SKILLS: &[&str] = &[
    "python",
    "java",
    "javascript",
    "typescript",
    "rust",
    "go",
    "c++",
    "c#",
    "ruby",
    "php",
    "kotlin",
    "swift",
    "scala",
    "sql",
    "postgresql",
    "mysql",
    "mongodb",
    "redis",
    "react",
    "react.js",
    "angular",
    "vue",
    "node.js",
    "django",
    "flask",
    "fastapi",
    "spring",
    "aws",
    "azure",
    "gcp",
    "docker",
    "kubernetes",
    "terraform",
    "linux",
    "git",
    "graphql",
    "kafka",
    "spark",
    "hadoop",
    "pandas",
    "numpy",
    "pytorch",
    "tensorflow",
    "machine learning",
    "deep learning",
    "nlp",
    "data analysis",
    "ci/cd",
    "microservices",
    "rest",
];

struct Patterns {
    email: Regex,
    phone: Regex,
    years: Regex,
    page_number: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            email: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")?,
            phone: Regex::new(r"\+?\d[\d\s().-]{7,}\d")?,
            years: Regex::new(r"(?i)\b(\d{1,2})\s*\+?\s*(?:years|yrs)\b")?,
            page_number: Regex::new(r"(?i)^(?:page\s+)?\d{1,3}(?:\s*(?:of|/)\s*\d{1,3})?$")?,
        })
    }
}

static PATTERNS: LazyLock<Result<Patterns, regex::Error>> = LazyLock::new(Patterns::compile);

/// Cleans and segments documents into [`TextUnit`]s.
///
/// # Example
///
/// ```rust,ignore
/// use shortlist_rag::Normalizer;
///
/// let normalizer = Normalizer::new(1500, 150);
/// let units = normalizer.normalize("cv-1", &raw_text, SourceFormat::Pdf);
/// let metadata = normalizer.extract_metadata(&raw_text);
/// ```
#[derive(Debug, Clone)]
pub struct Normalizer {
    chunk_size: usize,
    chunk_overlap: usize,
    skills: Vec<String>,
}

impl Normalizer {
    /// Create a normalizer.
    ///
    /// # Arguments
    ///
    /// * `chunk_size` - maximum number of characters per unit
    /// * `chunk_overlap` - characters shared by consecutive hard-split windows
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap,
            skills: DEFAULT_SKILLS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Replace the recognized skill keywords.
    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills = skills
            .into_iter()
            .map(|s| s.into().to_lowercase())
            .collect();
        self
    }

    /// Clean and segment a document's text.
    pub fn normalize_document(&self, document: &Document) -> Vec<TextUnit> {
        self.normalize(&document.id, &document.raw_text, document.source_format)
    }

    /// Clean `raw_text` and split it into units owned by `document_id`.
    ///
    /// Returns an empty `Vec` if nothing semantic remains after cleaning.
    pub fn normalize(
        &self,
        document_id: &str,
        raw_text: &str,
        format_hint: SourceFormat,
    ) -> Vec<TextUnit> {
        let cleaned = self.clean(raw_text, format_hint);
        if cleaned.is_empty() {
            return Vec::new();
        }

        let ranges = split_and_merge(
            &cleaned,
            0,
            self.chunk_size,
            self.chunk_overlap,
            &SEPARATORS,
        );
        let mut units = Vec::with_capacity(ranges.len());
        for (start, end) in ranges {
            let span = &cleaned[start..end];
            let trimmed = span.trim_start();
            let lead = span.len() - trimmed.len();
            let text = trimmed.trim_end();
            if text.is_empty() {
                continue;
            }
            units.push(TextUnit {
                unit_id: format!("{document_id}#{}", units.len()),
                text: text.to_string(),
                parent_document_id: document_id.to_string(),
                offset: cleaned[..start + lead].chars().count(),
            });
        }

        debug!(
            document.id = document_id,
            unit_count = units.len(),
            "normalized document"
        );
        units
    }

    /// Strip non-semantic artifacts from extracted text.
    ///
    /// Removes control characters, page numbers, and lines repeated across
    /// pages (running headers and footers, pages separated by form feeds).
    /// Whitespace runs collapse to one space and blank-line runs to a single
    /// paragraph break. PDF text additionally has hyphenated line breaks joined.
    pub fn clean(&self, raw_text: &str, format_hint: SourceFormat) -> String {
        let pages: Vec<&str> = raw_text.split('\u{c}').collect();
        let boilerplate = repeated_lines(&pages);
        let page_number = PATTERNS.as_ref().ok().map(|p| &p.page_number);

        let mut lines: Vec<String> = Vec::new();
        for page in &pages {
            for line in page.lines() {
                let line = collapse_whitespace(line);
                if line.is_empty() {
                    if lines.last().is_some_and(|l| !l.is_empty()) {
                        lines.push(String::new());
                    }
                    continue;
                }
                if boilerplate.contains(line.as_str())
                    || page_number.is_some_and(|re| re.is_match(&line))
                {
                    continue;
                }
                if format_hint == SourceFormat::Pdf {
                    if let Some(prev) = lines.last_mut() {
                        if prev.ends_with('-')
                            && line.chars().next().is_some_and(|c| c.is_lowercase())
                        {
                            prev.pop();
                            prev.push_str(&line);
                            continue;
                        }
                    }
                }
                lines.push(line);
            }
            if lines.last().is_some_and(|l| !l.is_empty()) {
                lines.push(String::new());
            }
        }

        lines.join("\n").trim().to_string()
    }

    /// Best-effort structured metadata: email, phone, name, skills, years of experience.
    ///
    /// Keys are only present when found. Never fails.
    pub fn extract_metadata(&self, text: &str) -> Metadata {
        let mut metadata = Metadata::new();
        let patterns = match PATTERNS.as_ref() {
            Ok(patterns) => patterns,
            Err(e) => {
                warn!(error = %e, "metadata patterns unavailable, skipping extraction");
                return metadata;
            }
        };

        if let Some(m) = patterns.email.find(text) {
            metadata.insert("email".to_string(), m.as_str().into());
        }
        if let Some(m) = patterns.phone.find(text) {
            metadata.insert("phone".to_string(), m.as_str().trim().into());
        }
        if let Some(name) = guess_name(text) {
            metadata.insert("name".to_string(), name.into());
        }

        let years = patterns
            .years
            .captures_iter(text)
            .filter_map(|c| c.get(1)?.as_str().parse::<i64>().ok())
            .max();
        if let Some(years) = years {
            let years = MetadataValue::Integer(years);
            metadata.insert("years_experience".to_string(), years);
        }

        let skills = self.find_skills(text);
        if !skills.is_empty() {
            metadata.insert("skills".to_string(), skills.join(", ").into());
        }

        metadata
    }

    fn find_skills(&self, text: &str) -> Vec<String> {
        let lower = collapse_whitespace(&text.to_lowercase());
        let tokens: HashSet<&str> = lower
            .split(|c: char| !(c.is_alphanumeric() || "+#./".contains(c)))
            .map(|t| t.trim_end_matches(['.', '/']))
            .filter(|t| !t.is_empty())
            .collect();

        let mut found: Vec<String> = self
            .skills
            .iter()
            .filter(|skill| {
                if skill.contains(' ') {
                    lower.contains(skill.as_str())
                } else {
                    tokens.contains(skill.as_str())
                }
            })
            .cloned()
            .collect();
        found.sort();
        found.dedup();
        found
    }
}

/// Lines appearing on at least [`BOILERPLATE_MIN_PAGES`] distinct pages.
fn repeated_lines(pages: &[&str]) -> HashSet<String> {
    if pages.len() < BOILERPLATE_MIN_PAGES {
        return HashSet::new();
    }
    let mut counts: HashMap<String, usize> = HashMap::new();
    for page in pages {
        let distinct: HashSet<String> = page
            .lines()
            .map(collapse_whitespace)
            .filter(|l| !l.is_empty())
            .collect();
        for line in distinct {
            *counts.entry(line).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .filter(|(_, n)| *n >= BOILERPLATE_MIN_PAGES)
        .map(|(l, _)| l)
        .collect()
}

/// Drop control characters and collapse whitespace runs to single spaces.
fn collapse_whitespace(line: &str) -> String {
    line.split(|c: char| c.is_whitespace() || c.is_control())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// The first short line near the top made of capitalized words.
fn guess_name(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(5)
        .find_map(|line| {
            let words: Vec<&str> = line.split_whitespace().collect();
            let plausible = (2..=4).contains(&words.len())
                && words.iter().all(|w| {
                    w.chars().next().is_some_and(char::is_uppercase)
                        && w.chars().all(is_name_char)
                });
            plausible.then(|| words.join(" "))
        })
}

fn is_name_char(c: char) -> bool {
    c.is_alphabetic() || matches!(c, '-' | '\'' | '.')
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Split `text` into byte ranges (offset by `base`) of at most `limit` characters.
///
/// Tries each separator in turn, merging adjacent segments while they fit.
/// Segments that still exceed `limit` recurse with the next separator.
fn split_and_merge(
    text: &str,
    base: usize,
    limit: usize,
    overlap: usize,
    separators: &[&str],
) -> Vec<(usize, usize)> {
    if char_len(text) <= limit {
        return vec![(base, base + text.len())];
    }
    let Some((separator, remaining)) = separators.split_first() else {
        return split_by_size(text, base, limit, overlap);
    };

    let mut ranges = Vec::new();
    let mut current: Option<(usize, usize)> = None;

    for (seg_start, seg_end) in split_keeping_separator(text, separator) {
        let merged = match current {
            Some((start, _)) if char_len(&text[start..seg_end]) <= limit => Some((start, seg_end)),
            _ => None,
        };
        if let Some(merged) = merged {
            current = Some(merged);
            continue;
        }
        if let Some((start, end)) = current.take() {
            let piece = &text[start..end];
            ranges.extend(split_and_merge(
                piece,
                base + start,
                limit,
                overlap,
                remaining,
            ));
        }
        current = Some((seg_start, seg_end));
    }
    if let Some((start, end)) = current {
        let piece = &text[start..end];
        ranges.extend(split_and_merge(
            piece,
            base + start,
            limit,
            overlap,
            remaining,
        ));
    }

    ranges
}

/// Split at a separator, keeping it attached to the preceding segment.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<(usize, usize)> {
    let mut result = Vec::new();
    let mut start = 0;

    while let Some(pos) = text[start..].find(separator) {
        let end = start + pos + separator.len();
        result.push((start, end));
        start = end;
    }

    if start < text.len() {
        result.push((start, text.len()));
    }

    result
}

/// Fixed character windows with overlap, respecting UTF-8 boundaries.
fn split_by_size(text: &str, base: usize, limit: usize, overlap: usize) -> Vec<(usize, usize)> {
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total = bounds.len() - 1;
    let step = limit.saturating_sub(overlap).max(1);

    let mut ranges = Vec::new();
    let mut start = 0;
    while start < total {
        let end = (start + limit).min(total);
        ranges.push((base + bounds[start], base + bounds[end]));
        if end == total {
            break;
        }
        start += step;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    const CV: &str = "Jane Doe\njane.doe@example.com | +44 20 7946 0958\n\n\
        Senior engineer with 7+ years building Python and Rust services on AWS.\n\n\
        Experience\nLed migration to Kubernetes. Built machine learning pipelines with PyTorch.";

    #[test]
    fn extracts_contact_and_skills() {
        let metadata = Normalizer::new(500, 50).extract_metadata(CV);
        assert_eq!(metadata.get("name"), Some(&MetadataValue::from("Jane Doe")));
        let email = MetadataValue::from("jane.doe@example.com");
        assert_eq!(metadata.get("email"), Some(&email));
        let years = metadata.get("years_experience");
        assert_eq!(years, Some(&MetadataValue::Integer(7)));
        let skills = metadata
            .get("skills")
            .map(ToString::to_string)
            .unwrap_or_default();
        assert_eq!(
            skills,
            "aws, kubernetes, machine learning, python, pytorch, rust"
        );
    }

    #[test]
    fn extraction_on_empty_text_yields_empty_mapping() {
        assert!(Normalizer::new(500, 50).extract_metadata("").is_empty());
    }

    #[test]
    fn clean_removes_page_furniture() {
        let raw = "ACME Resume Service\nAlice Smith\nPage 1 of 3\u{c}\
                   ACME Resume Service\nRust   developer\t\twith tokio\n2\u{c}\
                   ACME Resume Service\nLikes   hiking\n\n\n\nand chess";
        let cleaned = Normalizer::new(500, 0).clean(raw, SourceFormat::Text);
        assert!(!cleaned.contains("ACME"));
        assert!(!cleaned.contains("Page 1"));
        assert!(cleaned.contains("Rust developer with tokio"));
        assert!(!cleaned.contains("\n\n\n"));
    }

    #[test]
    fn clean_joins_pdf_hyphenation() {
        let normalizer = Normalizer::new(500, 0);
        let cleaned = normalizer.clean("distributed sys-\ntems", SourceFormat::Pdf);
        assert_eq!(cleaned, "distributed systems");
    }

    #[test]
    fn units_respect_chunk_size_and_track_offsets() {
        let normalizer = Normalizer::new(60, 10);
        let text = "First paragraph about Rust.\n\nSecond paragraph about Python and data \
                    pipelines that keeps going for a while longer than sixty characters.";
        let units = normalizer.normalize("cv", text, SourceFormat::Text);
        assert!(units.len() >= 2);
        let cleaned = normalizer.clean(text, SourceFormat::Text);
        for (i, unit) in units.iter().enumerate() {
            assert_eq!(unit.unit_id, format!("cv#{i}"));
            assert_eq!(unit.parent_document_id, "cv");
            assert!(
                unit.text.chars().count() <= 60,
                "unit too long: {:?}",
                unit.text
            );
            let at_offset: String = cleaned.chars().skip(unit.offset).take(5).collect();
            assert!(unit.text.starts_with(&at_offset));
        }
    }

    #[test]
    fn hard_split_is_utf8_safe_with_overlap() {
        let text = "é".repeat(25);
        let ranges = split_by_size(&text, 0, 10, 2);
        assert_eq!(ranges.len(), 3);
        let first = &text[ranges[0].0..ranges[0].1];
        let second = &text[ranges[1].0..ranges[1].1];
        assert_eq!(first.chars().count(), 10);
        assert_eq!(second.chars().count(), 10);
    }

    #[test]
    fn whitespace_only_text_yields_no_units() {
        let normalizer = Normalizer::new(100, 10);
        let units = normalizer.normalize("cv", " \n\t \n", SourceFormat::Text);
        assert!(units.is_empty());
    }
}
