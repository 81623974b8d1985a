//! Text sanitization for extracted article content
//!
//! Feed descriptions and scraped bodies both end up here before they are
//! fingerprinted, so the output must be stable plain text: no markup, no
//! invisible characters, single spaces, at most one blank line in a row.

use regex::Regex;
use std::sync::LazyLock;

static WHITESPACE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());

static MULTI_NEWLINE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

static TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

static INVISIBLE_BLOCK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript|template)\b[^>]*>.*?</(script|style|noscript|template)>")
        .unwrap()
});

static BLOCK_BREAK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</(p|div|li|h[1-6]|blockquote|pre|tr|section|article)>").unwrap()
});

/// Clean extracted text
///
/// Steps, in order: invisible characters, control characters, HTML entities,
/// runs of spaces, per-line trimming, runs of blank lines.
///
/// ```
/// use feedhound::parser::sanitize::sanitize_text;
///
/// let clean = sanitize_text("Hello\u{200B}World &amp;  friends\n\n\n\nBye");
/// assert_eq!(clean, "HelloWorld & friends\n\nBye");
/// ```
pub fn sanitize_text(text: &str) -> String {
    let result = remove_zero_width(text);
    let result = remove_control_chars(&result);
    let result = decode_html_entities(&result);
    let result = normalize_whitespace(&result);
    let result = trim_lines(&result);
    let result = collapse_newlines(&result);

    result.trim().to_string()
}

/// Remove zero-width spaces, direction marks and the BOM
pub fn remove_zero_width(text: &str) -> String {
    text.chars()
        .filter(|c| {
            !matches!(*c,
                '\u{200B}'..='\u{200F}' |
                '\u{2028}'..='\u{202F}' |
                '\u{FEFF}'
            )
        })
        .collect()
}

/// Remove control characters except newline and tab
pub fn remove_control_chars(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Decode named and numeric HTML entities; non-breaking spaces become spaces
pub fn decode_html_entities(text: &str) -> String {
    html_escape::decode_html_entities(text).replace('\u{a0}', " ")
}

/// Collapse runs of spaces and tabs; newlines are kept
pub fn normalize_whitespace(text: &str) -> String {
    WHITESPACE_REGEX.replace_all(text, " ").to_string()
}

pub fn trim_lines(text: &str) -> String {
    text.lines()
        .map(|line| line.trim())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapse three or more newlines to two
pub fn collapse_newlines(text: &str) -> String {
    MULTI_NEWLINE_REGEX.replace_all(text, "\n\n").to_string()
}

/// Remove all tags without adding line breaks
pub fn strip_html_tags(html: &str) -> String {
    TAG_REGEX.replace_all(html, "").to_string()
}

/// Convert an HTML fragment to sanitized plain text
///
/// Script and style blocks are dropped; block-level closing tags become line
/// breaks so paragraphs stay separated.
///
/// ```
/// use feedhound::parser::sanitize::html_to_text;
///
/// let text = html_to_text("<p>First <b>para</b></p><script>x()</script><p>Second</p>");
/// assert_eq!(text, "First para\nSecond");
/// ```
pub fn html_to_text(html: &str) -> String {
    let without_scripts = INVISIBLE_BLOCK_REGEX.replace_all(html, " ");
    let with_breaks = BLOCK_BREAK_REGEX.replace_all(&without_scripts, "\n");
    sanitize_text(&strip_html_tags(&with_breaks))
}

/// Whether text has anything besides whitespace
pub fn has_content(text: &str) -> bool {
    !text.trim().is_empty()
}

/// Number of characters of plain text
pub fn text_length(text: &str) -> usize {
    text.chars().count()
}
