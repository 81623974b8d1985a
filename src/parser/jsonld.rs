//! JSON-LD article metadata
//!
//! Reads `<script type="application/ld+json">` blocks and returns the first
//! object typed as an article. Handles bare objects, top-level arrays and
//! `@graph` containers.

use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use serde_json::Value;
use std::sync::LazyLock;

use super::date::parse_date;
use super::sanitize::html_to_text;

const ARTICLE_TYPES: &[&str] = &[
    "Article",
    "BlogPosting",
    "NewsArticle",
    "TechArticle",
    "ReportageNews",
    "AnalysisNewsArticle",
    "ScholarlyArticle",
];

static LD_JSON_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"script[type="application/ld+json"]"#).expect("valid JSON-LD selector")
});

/// Article fields found in JSON-LD
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonLdArticle {
    pub headline: Option<String>,
    pub date_published: Option<DateTime<Utc>>,
    /// Plain text body
    pub article_body: Option<String>,
    pub description: Option<String>,
    pub authors: Vec<String>,
    pub keywords: Vec<String>,
    pub url: Option<String>,
}

/// First article object in the document
pub fn extract(document: &Html) -> Option<JsonLdArticle> {
    document
        .select(&LD_JSON_SELECTOR)
        .filter_map(|script| {
            let raw = script.text().collect::<String>();
            match serde_json::from_str::<Value>(raw.trim()) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping malformed JSON-LD block");
                    None
                }
            }
        })
        .find_map(|value| find_article(&value).map(article_from_value))
}

fn is_article(value: &Value) -> bool {
    match value.get("@type") {
        Some(Value::String(t)) => ARTICLE_TYPES.contains(&t.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| ARTICLE_TYPES.contains(&t)),
        _ => false,
    }
}

fn find_article(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find_map(find_article),
        Value::Object(map) => {
            if is_article(value) {
                return Some(value);
            }
            map.get("@graph").and_then(find_article)
        }
        _ => None,
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn names(value: &Value) -> Vec<String> {
    match value {
        Value::String(name) => vec![name.trim().to_string()],
        Value::Object(_) => string_field(value, "name").into_iter().collect(),
        Value::Array(items) => items.iter().flat_map(names).collect(),
        _ => Vec::new(),
    }
}

fn article_from_value(value: &Value) -> JsonLdArticle {
    let keywords = match value.get("keywords") {
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|k| k.trim().to_string())
            .collect(),
        _ => Vec::new(),
    };

    JsonLdArticle {
        headline: string_field(value, "headline").or_else(|| string_field(value, "name")),
        date_published: string_field(value, "datePublished")
            .or_else(|| string_field(value, "dateCreated"))
            .and_then(|d| parse_date(&d)),
        article_body: string_field(value, "articleBody")
            .map(|b| html_to_text(&b))
            .filter(|b| !b.is_empty()),
        description: string_field(value, "description").map(|d| html_to_text(&d)),
        authors: value
            .get("author")
            .map(names)
            .unwrap_or_default()
            .into_iter()
            .filter(|n| !n.is_empty())
            .collect(),
        keywords,
        url: string_field(value, "url"),
    }
}
