//! Common test utilities

use std::sync::Arc;

use feedhound::crawler::discovery::PageDelay;
use feedhound::crawler::{FetcherConfig, HttpTransport, RateLimitConfig, RequestConfig, RequestLimiter};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Transport with a generous bucket and short retry delay
pub fn transport(max_retries: u32) -> Arc<HttpTransport> {
    let limiter = Arc::new(
        RequestLimiter::new(RateLimitConfig {
            capacity: 100,
            refill_per_second: 100.0,
            ..RateLimitConfig::default()
        })
        .unwrap(),
    );
    let config = RequestConfig {
        max_retries,
        retry_delay_ms: 10,
        timeout_secs: 5,
        ..RequestConfig::default()
    };
    Arc::new(HttpTransport::new(config, limiter).unwrap())
}

/// Orchestrator settings without page delays or page-date lookups
#[allow(dead_code)]
pub fn fetcher_config() -> FetcherConfig {
    FetcherConfig {
        page_delay: PageDelay::none(),
        fetch_page_dates: false,
        source_timeout_secs: 30,
        ..FetcherConfig::default()
    }
}

/// RSS 2.0 document with `(title, link, description)` items
#[allow(dead_code)]
pub fn rss(items: &[(&str, &str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(title, link, description)| {
            format!(
                "<item><title>{title}</title><link>{link}</link>\
                 <pubDate>Mon, 15 Apr 2024 08:30:00 GMT</pubDate>\
                 <description><![CDATA[{description}]]></description></item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel>
           <title>Research Blog</title><link>https://research.example/</link>{items}
           </channel></rss>"#
    )
}

/// Serve `body` with `content_type` for GET `route`
#[allow(dead_code)]
pub async fn serve(server: &MockServer, route: &str, body: String, content_type: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, content_type))
        .mount(server)
        .await;
}

/// Article page with a heading and repeated paragraphs
#[allow(dead_code)]
pub fn article_page(title: &str, paragraph: &str, times: usize) -> String {
    let body: String = (0..times).map(|_| format!("<p>{paragraph}</p>")).collect();
    format!(
        "<html><head><title>{title}</title></head><body>\
         <nav><a href=\"/\">Home</a></nav><article><h1>{title}</h1>{body}</article></body></html>"
    )
}
