//! Exact and locality-sensitive fingerprints for articles
//!
//! - `content_hash`: SHA-256 over normalized title and content, hex encoded
//! - `simhash`: 64-bit similarity hash over word tokens
//! - `bucket`: `simhash % 16`, the coarse partition used for near-duplicate lookup

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

/// Number of coarse simhash partitions
pub const SIMHASH_BUCKETS: u64 = 16;

/// Default Hamming distance for two hashes to count as similar
pub const DEFAULT_SIMILARITY_THRESHOLD: u32 = 3;

static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her",
        "was", "one", "our", "out", "has", "have", "been", "were", "this", "that", "with",
        "from", "they", "will", "would", "there", "their", "what", "about", "which", "when",
        "make", "like", "time", "just", "him", "his", "how", "its", "into", "than", "then",
        "them", "these", "some", "could", "other", "more", "also", "only", "over", "such",
        "your", "who", "may", "did", "does", "she", "our", "yet", "via", "per", "those",
    ]
    .into_iter()
    .collect()
});

/// Fingerprints of one article
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub content_hash: String,
    pub simhash: u64,
    pub bucket: u8,
}

impl Fingerprint {
    /// Compute all fingerprints for a title/content pair
    pub fn compute(title: &str, content: &str) -> Self {
        let simhash = simhash(title, content);
        Self {
            content_hash: content_hash(title, content),
            simhash,
            bucket: bucket(simhash),
        }
    }

    /// Whether `other` is within `threshold` bits of this fingerprint
    pub fn is_similar_to(&self, other: &Fingerprint, threshold: u32) -> bool {
        is_similar(self.simhash, other.simhash, threshold)
    }
}

/// Trim, lowercase and collapse whitespace
pub fn normalize_for_hash(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// SHA-256 over `normalize(title) + "\n" + normalize(content)`, hex encoded
pub fn content_hash(title: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_for_hash(title).as_bytes());
    hasher.update(b"\n");
    hasher.update(normalize_for_hash(content).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Lowercase word tokens longer than two characters, stop words removed
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() > 2)
        .map(str::to_lowercase)
        .filter(|token| !STOP_WORDS.contains(token.as_str()))
        .collect()
}

fn token_hash(token: &str) -> u64 {
    let digest = Sha256::digest(token.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// 64-bit similarity hash of title and content
///
/// Each token votes on every bit with its frequency as weight; bit `i` of the
/// result is set when the summed vote for position `i` is positive.
pub fn simhash(title: &str, content: &str) -> u64 {
    let combined = format!("{title} {content}");

    let mut frequencies: HashMap<String, i64> = HashMap::new();
    for token in tokenize(&combined) {
        *frequencies.entry(token).or_insert(0) += 1;
    }

    let mut weights = [0i64; 64];
    for (token, frequency) in &frequencies {
        let hash = token_hash(token);
        for (bit, weight) in weights.iter_mut().enumerate() {
            if (hash >> bit) & 1 == 1 {
                *weight += frequency;
            } else {
                *weight -= frequency;
            }
        }
    }

    weights
        .iter()
        .enumerate()
        .filter(|(_, weight)| **weight > 0)
        .fold(0u64, |acc, (bit, _)| acc | (1u64 << bit))
}

/// Coarse partition key
pub fn bucket(simhash: u64) -> u8 {
    (simhash % SIMHASH_BUCKETS) as u8
}

/// Number of differing bits
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Whether two hashes differ in at most `threshold` bits
pub fn is_similar(a: u64, b: u64, threshold: u32) -> bool {
    hamming_distance(a, b) <= threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 41 distinct tokens so every bit vote is odd and never ties at zero
    const WORDS: [&str; 41] = [
        "alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel", "india",
        "juliett", "kilo", "lima", "mike", "november", "oscar", "papa", "quebec", "romeo",
        "sierra", "tango", "uniform", "victor", "whiskey", "xray", "yankee", "zulu", "amber",
        "basalt", "cobalt", "dolomite", "emerald", "feldspar", "granite", "hematite", "iolite",
        "jasper", "kyanite", "lazurite", "marble", "nephrite", "obsidian",
    ];

    fn repeated_text(times: usize) -> String {
        let paragraph = WORDS.join(" ");
        vec![paragraph; times].join(" ")
    }

    #[test]
    fn test_content_hash_matches_normalized_sha256() {
        let content = "word ".repeat(300);
        let expected_input = format!("x\n{}", vec!["word"; 300].join(" "));
        let expected = format!("{:x}", Sha256::digest(expected_input.as_bytes()));
        assert_eq!(content_hash("X", &content), expected);
    }

    #[test]
    fn test_content_hash_ignores_case_and_spacing() {
        assert_eq!(
            content_hash("  Title ", "Some   Body\ntext"),
            content_hash("title", "some body text")
        );
        assert_ne!(content_hash("title", "a"), content_hash("title", "b"));
    }

    #[test]
    fn test_tokenize_filters_short_and_stop_words() {
        let tokens = tokenize("The APT group is using a new loader, and it's stealthy");
        assert_eq!(tokens, vec!["apt", "group", "using", "new", "loader", "stealthy"]);
    }

    #[test]
    fn test_simhash_deterministic() {
        let text = repeated_text(2);
        assert_eq!(simhash("t", &text), simhash("t", &text));
    }

    #[test]
    fn test_single_word_change_is_near() {
        let original = repeated_text(5);
        let changed = original.replacen("cobalt", "titanium", 1);
        let unrelated = "Quarterly earnings rose sharply as retail demand for outdoor \
                         furniture and garden equipment surprised analysts across regions";

        let base = simhash("", &original);
        let near = hamming_distance(base, simhash("", &changed));
        let far = hamming_distance(base, simhash("", unrelated));

        assert!(near <= 10, "near distance {near}");
        assert!(near < far, "near {near} should be below unrelated {far}");
    }

    #[test]
    fn test_hamming_properties() {
        let a = 0b1011_0010u64;
        let b = 0b0011_0111u64;
        assert_eq!(hamming_distance(a, b), hamming_distance(b, a));
        assert_eq!(hamming_distance(a, a), 0);
        assert_eq!(hamming_distance(0, u64::MAX), 64);
        assert!(is_similar(a, a ^ 0b111, 3));
        assert!(!is_similar(a, a ^ 0b1111, 3));
    }

    #[test]
    fn test_bucket_range() {
        assert_eq!(bucket(0), 0);
        assert_eq!(bucket(17), 1);
        assert_eq!(bucket(u64::MAX), 15);
    }

    #[test]
    fn test_fingerprint_compute() {
        let fp = Fingerprint::compute("Title", "Body");
        assert_eq!(fp.bucket, bucket(fp.simhash));
        assert!(fp.is_similar_to(&fp.clone(), 0));
    }
}
