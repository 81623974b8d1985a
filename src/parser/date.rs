//! Publication date parsing
//!
//! Dates at or before 1970 are treated as sentinels (unset CMS fields render
//! as the Unix epoch) and rejected.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use scraper::{Html, Selector};
use std::sync::LazyLock;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%Y.%m.%d %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%A, %B %d, %Y",
    "%m/%d/%Y",
];

static META_DATE_SELECTORS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        "meta[property='article:published_time']",
        "meta[property='og:published_time']",
        "meta[name='pubdate']",
        "meta[name='publish-date']",
        "meta[name='publish_date']",
        "meta[name='date']",
        "meta[name='dc.date']",
        "meta[itemprop='datePublished']",
        "time[datetime]",
        "[itemprop='datePublished']",
    ]
    .iter()
    .filter_map(|s| Selector::parse(s).ok())
    .collect()
});

/// Whether a parsed date is usable
pub fn is_plausible(date: &DateTime<Utc>) -> bool {
    date.year() > 1970
}

/// Parse a date string in any of the common feed and page formats
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let parsed = DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_rfc2822(s))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
                .map(|dt| dt.and_utc())
        })
        .or_else(|| {
            // Strip ordinal suffixes: "March 3rd, 2024"
            let cleaned = s
                .replace("st,", ",")
                .replace("nd,", ",")
                .replace("rd,", ",")
                .replace("th,", ",");
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(&cleaned, f).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
        });

    parsed.filter(is_plausible)
}

/// Publication date from `<meta>` and `<time>` tags
pub fn date_from_document(document: &Html) -> Option<DateTime<Utc>> {
    META_DATE_SELECTORS.iter().find_map(|selector| {
        document.select(selector).find_map(|el| {
            let value = el
                .value()
                .attr("content")
                .or_else(|| el.value().attr("datetime"))
                .map(str::to_string)
                .unwrap_or_else(|| el.text().collect::<String>());
            parse_date(&value)
        })
    })
}

/// Publication date from raw page markup
pub fn date_from_html(html: &str) -> Option<DateTime<Utc>> {
    date_from_document(&Html::parse_document(html))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_common_formats() {
        for raw in [
            "2024-03-15T10:20:30Z",
            "2024-03-15T10:20:30+02:00",
            "Fri, 15 Mar 2024 10:20:30 GMT",
            "2024-03-15 10:20:30",
            "2024-03-15",
            "March 15, 2024",
            "Mar 15th, 2024",
            "15 March 2024",
        ] {
            let date = parse_date(raw).unwrap_or_else(|| panic!("failed on {raw}"));
            assert_eq!((date.year(), date.month(), date.day()), (2024, 3, 15), "{raw}");
        }
    }

    #[test]
    fn test_epoch_sentinel_rejected() {
        assert!(parse_date("1970-01-01T00:00:00Z").is_none());
        assert!(parse_date("Thu, 01 Jan 1970 00:00:00 +0000").is_none());
        assert!(parse_date("1969-12-31").is_none());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(parse_date("").is_none());
        assert!(parse_date("yesterday").is_none());
    }

    #[test]
    fn test_date_from_meta_tags() {
        let html = r#"<html><head>
            <meta property="article:published_time" content="2023-11-02T08:00:00Z">
        </head><body></body></html>"#;
        let date = date_from_html(html).unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (2023, 11, 2));
    }

    #[test]
    fn test_date_from_time_tag() {
        let html = r#"<article><time datetime="2022-06-30">June 30</time></article>"#;
        let date = date_from_html(html).unwrap();
        assert_eq!(date.year(), 2022);
    }
}
