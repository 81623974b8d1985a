//! CSS selector chains for article extraction
//!
//! Configured selectors from a source are tried first; the default chains
//! below cover common blog and CMS templates (WordPress, Ghost, Medium-style,
//! Hugo/Jekyll themes).

use lazy_static::lazy_static;
use scraper::{ElementRef, Selector};

use crate::utils::error::ParseError;

macro_rules! parse_selector {
    ($s:expr) => {
        Selector::parse($s).expect(concat!("Invalid CSS selector: ", $s))
    };
}

lazy_static! {
    pub static ref DEFAULT_TITLE: Vec<Selector> = vec![
        parse_selector!("h1.entry-title"),
        parse_selector!("h1.post-title"),
        parse_selector!("h1.article-title"),
        parse_selector!("article h1"),
        parse_selector!("meta[property='og:title']"),
        parse_selector!("h1"),
        parse_selector!("title"),
    ];

    pub static ref DEFAULT_BODY: Vec<Selector> = vec![
        parse_selector!("[itemprop='articleBody']"),
        parse_selector!("article .entry-content"),
        parse_selector!(".entry-content"),
        parse_selector!(".post-content"),
        parse_selector!(".article-content"),
        parse_selector!(".article-body"),
        parse_selector!(".post-body"),
        parse_selector!(".gh-content"),
        parse_selector!("article"),
        parse_selector!("main"),
    ];

    pub static ref DEFAULT_DATE: Vec<Selector> = vec![
        parse_selector!("time[datetime]"),
        parse_selector!("meta[property='article:published_time']"),
        parse_selector!(".published"),
        parse_selector!(".post-date"),
        parse_selector!(".entry-date"),
        parse_selector!(".date"),
    ];

    pub static ref DEFAULT_AUTHOR: Vec<Selector> = vec![
        parse_selector!("[rel='author']"),
        parse_selector!("[itemprop='author'] [itemprop='name']"),
        parse_selector!(".author-name"),
        parse_selector!(".byline .author"),
        parse_selector!("meta[name='author']"),
    ];

    /// Elements that never belong to article text
    pub static ref NOISE: Vec<Selector> = vec![
        parse_selector!("script"),
        parse_selector!("style"),
        parse_selector!("noscript"),
        parse_selector!("iframe"),
        parse_selector!("nav"),
        parse_selector!("header"),
        parse_selector!("footer"),
        parse_selector!("aside"),
        parse_selector!("form"),
        parse_selector!(".share, .sharing, .social"),
        parse_selector!(".related, .related-posts"),
        parse_selector!(".comments, #comments"),
        parse_selector!(".advertisement, .ad, .ads"),
        parse_selector!(".newsletter, .subscribe"),
    ];

    /// Candidates for the largest-container fallback
    pub static ref CONTAINERS: Selector = parse_selector!("article, main, section, div");

    pub static ref PARAGRAPH: Selector = parse_selector!("p");

    pub static ref BODY: Selector = parse_selector!("body");
}

/// Compile configured selectors, reporting the first invalid one
pub fn compile(selectors: &[String]) -> Result<Vec<Selector>, ParseError> {
    selectors
        .iter()
        .map(|s| Selector::parse(s).map_err(|e| ParseError::InvalidSelector(format!("{s}: {e}"))))
        .collect()
}

/// Text value of an element: `content` for `<meta>`, `datetime` for `<time>`, else inner text
pub fn element_value(element: &ElementRef<'_>) -> String {
    let el = element.value();
    match el.name() {
        "meta" => el.attr("content").unwrap_or_default().to_string(),
        _ => element.text().collect::<String>(),
    }
}

/// Like [`element_value`] but prefers machine-readable date attributes
pub fn element_date_value(element: &ElementRef<'_>) -> String {
    let el = element.value();
    el.attr("datetime")
        .or_else(|| el.attr("content"))
        .map(str::to_string)
        .unwrap_or_else(|| element.text().collect::<String>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    #[test]
    fn test_default_chains_parse() {
        assert!(!DEFAULT_TITLE.is_empty());
        assert!(!DEFAULT_BODY.is_empty());
        assert!(!DEFAULT_DATE.is_empty());
        assert!(!DEFAULT_AUTHOR.is_empty());
        assert!(!NOISE.is_empty());
    }

    #[test]
    fn test_compile_reports_invalid() {
        assert_eq!(compile(&["h1".into(), ".x".into()]).unwrap().len(), 2);
        assert!(matches!(
            compile(&["h1[".into()]),
            Err(ParseError::InvalidSelector(_))
        ));
    }

    #[test]
    fn test_element_values() {
        let doc = Html::parse_document(
            r#"<head><meta property="og:title" content="Meta title"></head>
               <body><time datetime="2024-01-01">Jan 1</time></body>"#,
        );
        let meta = doc.select(&DEFAULT_TITLE[4]).next().unwrap();
        assert_eq!(element_value(&meta), "Meta title");

        let time = doc.select(&DEFAULT_DATE[0]).next().unwrap();
        assert_eq!(element_date_value(&time), "2024-01-01");
    }
}
