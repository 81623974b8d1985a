//! Content-quality policy
//!
//! Two checks guard what leaves a fetch tier:
//! - the scrape gate, applied to text scraped to replace a short feed entry
//!   (anti-bot interstitials, too few words, too few sentences)
//! - the garbage check, applied to every extracted body (binary-looking
//!   payloads, broken decompression, extraction error markers)
//!
//! The thresholds are empirical. They sit behind [`QualityPolicy`] so a
//! deployment can swap in its own rules.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

use crate::utils::word_count;

static SYMBOL_RUN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]{8,}").expect("valid symbol-run regex"));

/// Why content was rejected
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QualityRejection {
    #[error("anti-bot page detected ({0})")]
    AntiBot(String),

    #[error("too few words ({found} < {required})")]
    TooFewWords { found: usize, required: usize },

    #[error("too few sentences ({found} < {required})")]
    TooFewSentences { found: usize, required: usize },

    #[error("garbage content: {0}")]
    Garbage(String),
}

/// Pluggable content checks
pub trait QualityPolicy: Send + Sync {
    /// Gate for scraped text replacing a feed entry's content
    fn check_scraped(&self, text: &str) -> Result<(), QualityRejection>;

    /// Reject corrupted or binary-looking content
    fn check_garbage(&self, text: &str) -> Result<(), QualityRejection>;
}

/// Built-in heuristics
#[derive(Debug, Clone)]
pub struct DefaultQualityPolicy {
    pub min_words: usize,
    pub min_sentence_marks: usize,
    pub anti_bot_markers: Vec<String>,
    pub garbage_markers: Vec<String>,
    /// Maximum share of `[ ] { } | \` characters
    pub max_structural_ratio: f64,
    /// Maximum number of long non-word symbol runs
    pub max_symbol_runs: usize,
}

impl Default for DefaultQualityPolicy {
    fn default() -> Self {
        Self {
            min_words: 100,
            min_sentence_marks: 2,
            anti_bot_markers: [
                "access denied",
                "captcha",
                "cloudflare",
                "checking your browser",
                "enable javascript",
                "please verify you are a human",
                "ddos protection",
                "attention required",
                "request blocked",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            garbage_markers: ["compression failed", "extraction disabled"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_structural_ratio: 0.05,
            max_symbol_runs: 5,
        }
    }
}

/// Count `.`, `!` and `?` characters
pub fn sentence_marks(text: &str) -> usize {
    text.chars().filter(|c| matches!(c, '.' | '!' | '?')).count()
}

impl QualityPolicy for DefaultQualityPolicy {
    fn check_scraped(&self, text: &str) -> Result<(), QualityRejection> {
        let lower = text.to_lowercase();
        if let Some(marker) = self
            .anti_bot_markers
            .iter()
            .find(|m| lower.contains(m.as_str()))
        {
            return Err(QualityRejection::AntiBot(marker.clone()));
        }

        let words = word_count(text);
        if words < self.min_words {
            return Err(QualityRejection::TooFewWords {
                found: words,
                required: self.min_words,
            });
        }

        let marks = sentence_marks(text);
        if marks < self.min_sentence_marks {
            return Err(QualityRejection::TooFewSentences {
                found: marks,
                required: self.min_sentence_marks,
            });
        }

        Ok(())
    }

    fn check_garbage(&self, text: &str) -> Result<(), QualityRejection> {
        let lower = text.to_lowercase();
        if let Some(marker) = self
            .garbage_markers
            .iter()
            .find(|m| lower.contains(m.as_str()))
        {
            return Err(QualityRejection::Garbage(format!("marker \"{marker}\"")));
        }

        let total = text.chars().filter(|c| !c.is_whitespace()).count();
        if total == 0 {
            return Ok(());
        }

        let structural = text
            .chars()
            .filter(|c| matches!(c, '[' | ']' | '{' | '}' | '|' | '\\'))
            .count();
        let ratio = structural as f64 / total as f64;
        if ratio > self.max_structural_ratio {
            return Err(QualityRejection::Garbage(format!(
                "structural character ratio {ratio:.2}"
            )));
        }

        let runs = SYMBOL_RUN_REGEX.find_iter(text).count();
        if runs > self.max_symbol_runs {
            return Err(QualityRejection::Garbage(format!("{runs} symbol runs")));
        }

        let replacement = text.chars().filter(|&c| c == '\u{FFFD}').count();
        if replacement as f64 / total as f64 > 0.10 {
            return Err(QualityRejection::Garbage(
                "undecodable characters".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prose(words: usize) -> String {
        let sentence = "The loader decrypts its payload in memory and then contacts the server. ";
        let per_sentence = sentence.split_whitespace().count();
        sentence.repeat(words / per_sentence + 1)
    }

    #[test]
    fn test_scraped_prose_accepted() {
        let policy = DefaultQualityPolicy::default();
        assert!(policy.check_scraped(&prose(150)).is_ok());
        assert!(policy.check_garbage(&prose(150)).is_ok());
    }

    #[test]
    fn test_anti_bot_rejected() {
        let policy = DefaultQualityPolicy::default();
        let page = format!("Attention Required! | Cloudflare. {}", prose(150));
        assert!(matches!(
            policy.check_scraped(&page),
            Err(QualityRejection::AntiBot(_))
        ));
    }

    #[test]
    fn test_short_text_rejected() {
        let policy = DefaultQualityPolicy::default();
        assert!(matches!(
            policy.check_scraped("Only a few words here."),
            Err(QualityRejection::TooFewWords { found: 5, .. })
        ));
    }

    #[test]
    fn test_sentence_marks_required() {
        let policy = DefaultQualityPolicy::default();
        let no_sentences = "word ".repeat(200);
        assert!(matches!(
            policy.check_scraped(&no_sentences),
            Err(QualityRejection::TooFewSentences { found: 0, .. })
        ));
    }

    #[test]
    fn test_garbage_detection() {
        let policy = DefaultQualityPolicy::default();
        assert!(policy
            .check_garbage("x[{|\\}]y[{|\\}]z[{|\\}] binary")
            .is_err());
        assert!(policy
            .check_garbage("Error: compression failed while reading body")
            .is_err());
        let symbols = "text ~~~~~~~~~~ ".repeat(10);
        assert!(policy.check_garbage(&symbols).is_err());
        assert!(policy.check_garbage("").is_ok());
    }
}
