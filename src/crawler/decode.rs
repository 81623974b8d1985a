//! Response body recovery
//!
//! reqwest decompresses gzip, deflate and brotli bodies on its own and strips
//! the `Content-Encoding` header when it does. A header that survives means
//! the body was not decoded (unknown variant, double encoding, a server lying
//! about the encoding), so it gets one manual attempt here. The manual result
//! is kept only if it looks like markup; otherwise the raw bytes are used.
//!
//! Text decoding picks the declared charset and re-decodes with an alternate
//! charset when more than 10% of the result is U+FFFD.

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use std::io::Read;

/// Maximum share of replacement characters accepted from one decoding
pub const MAX_REPLACEMENT_RATIO: f64 = 0.10;

const MARKUP_SIGNATURES: &[&str] = &[
    "<html",
    "<!doctype",
    "<body",
    "<?xml",
    "<rss",
    "<feed",
    "<urlset",
    "<sitemapindex",
];

/// Whether a response should be treated as text
pub fn is_textual(content_type: Option<&str>, url: &str, content_encoding: Option<&str>) -> bool {
    if let Some(ct) = content_type {
        let ct = ct.to_ascii_lowercase();
        if ct.starts_with("text/")
            || ct.contains("html")
            || ct.contains("xml")
            || ct.contains("json")
            || ct.contains("rss")
            || ct.contains("atom")
        {
            return true;
        }
    }

    if url.to_ascii_lowercase().contains("sitemap") {
        return true;
    }

    content_encoding.is_some_and(|enc| {
        let enc = enc.to_ascii_lowercase();
        enc.contains("gzip") || enc.contains("br") || enc.contains("deflate")
    })
}

/// Whether the first bytes of `bytes` carry a known markup signature
pub fn looks_like_markup(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(2048)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();
    let head = head.trim_start_matches('\u{feff}').trim_start();
    MARKUP_SIGNATURES.iter().any(|sig| head.contains(sig))
}

/// Decompress `bytes` with the named algorithm
pub fn decompress(bytes: &[u8], encoding: &str) -> Option<Vec<u8>> {
    let encoding = encoding.trim().to_ascii_lowercase();
    let mut out = Vec::new();

    let ok = if encoding.contains("br") {
        brotli::Decompressor::new(bytes, 4096)
            .read_to_end(&mut out)
            .is_ok()
    } else if encoding.contains("gzip") {
        GzDecoder::new(bytes).read_to_end(&mut out).is_ok()
    } else if encoding.contains("deflate") {
        // "deflate" is zlib-wrapped per RFC, raw deflate in practice often
        if ZlibDecoder::new(bytes).read_to_end(&mut out).is_ok() {
            true
        } else {
            out.clear();
            DeflateDecoder::new(bytes).read_to_end(&mut out).is_ok()
        }
    } else {
        false
    };

    (ok && !out.is_empty()).then_some(out)
}

/// Manually decompress a body whose `Content-Encoding` survived the client
pub fn recover_body(bytes: Vec<u8>, content_encoding: Option<&str>) -> Vec<u8> {
    let Some(encoding) = content_encoding else {
        return bytes;
    };
    if looks_like_markup(&bytes) {
        return bytes;
    }

    match decompress(&bytes, encoding) {
        Some(decoded) if looks_like_markup(&decoded) => {
            tracing::debug!(encoding = %encoding, "Manually decompressed response body");
            decoded
        }
        Some(_) => {
            tracing::debug!(encoding = %encoding, "Decompressed body is not markup, keeping raw");
            bytes
        }
        None => {
            tracing::debug!(encoding = %encoding, "Manual decompression failed, keeping raw");
            bytes
        }
    }
}

fn charset_from_content_type(content_type: &str) -> Option<&'static Encoding> {
    let lower = content_type.to_ascii_lowercase();
    let label = lower.split("charset=").nth(1)?;
    let label = label
        .split(';')
        .next()?
        .trim()
        .trim_matches(|c| c == '"' || c == '\'');
    Encoding::for_label(label.as_bytes())
}

fn charset_from_meta(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(1024)]).to_ascii_lowercase();
    let idx = head.find("charset=")?;
    let label: String = head[idx + "charset=".len()..]
        .trim_start_matches(|c| c == '"' || c == '\'')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    Encoding::for_label(label.as_bytes())
}

/// Share of U+FFFD among the characters of `text`
pub fn replacement_ratio(text: &str) -> f64 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let bad = text.chars().filter(|&c| c == '\u{FFFD}').count();
    bad as f64 / total as f64
}

/// Decode a body to text
pub fn decode_text(bytes: &[u8], content_type: Option<&str>) -> String {
    let primary = content_type
        .and_then(charset_from_content_type)
        .or_else(|| charset_from_meta(bytes))
        .unwrap_or(UTF_8);

    let (text, _, _) = primary.decode(bytes);
    if replacement_ratio(&text) <= MAX_REPLACEMENT_RATIO {
        return text.into_owned();
    }

    let alternate = if primary == UTF_8 { WINDOWS_1252 } else { UTF_8 };
    let (text, _, _) = alternate.decode(bytes);
    if replacement_ratio(&text) <= MAX_REPLACEMENT_RATIO {
        tracing::debug!(
            primary = primary.name(),
            alternate = alternate.name(),
            "Re-decoded body with alternate charset"
        );
        return text.into_owned();
    }

    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const PAGE: &str = "<!DOCTYPE html><html><body><p>Hello</p></body></html>";

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn brotli(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut writer = brotli::CompressorWriter::new(&mut out, 4096, 5, 22);
            writer.write_all(data).unwrap();
        }
        out
    }

    #[test]
    fn test_is_textual() {
        assert!(is_textual(Some("text/html; charset=utf-8"), "https://a/", None));
        assert!(is_textual(Some("application/rss+xml"), "https://a/", None));
        assert!(is_textual(None, "https://a/sitemap_index.xml", None));
        assert!(is_textual(Some("application/octet-stream"), "https://a/x", Some("br")));
        assert!(!is_textual(Some("image/png"), "https://a/logo.png", None));
    }

    #[test]
    fn test_recover_gzip_body() {
        let recovered = recover_body(gzip(PAGE.as_bytes()), Some("gzip"));
        assert_eq!(recovered, PAGE.as_bytes());
    }

    #[test]
    fn test_recover_brotli_body() {
        let recovered = recover_body(brotli(PAGE.as_bytes()), Some("br"));
        assert_eq!(recovered, PAGE.as_bytes());
    }

    #[test]
    fn test_non_markup_result_falls_back_to_raw() {
        let compressed = gzip(b"just some binary-ish payload");
        let recovered = recover_body(compressed.clone(), Some("gzip"));
        assert_eq!(recovered, compressed);
    }

    #[test]
    fn test_already_decoded_body_untouched() {
        let recovered = recover_body(PAGE.as_bytes().to_vec(), Some("br"));
        assert_eq!(recovered, PAGE.as_bytes());
    }

    #[test]
    fn test_decode_declared_charset() {
        let (bytes, _, _) = WINDOWS_1252.encode("Caf\u{e9}");
        assert_eq!(
            decode_text(&bytes, Some("text/html; charset=windows-1252")),
            "Caf\u{e9}"
        );
    }

    #[test]
    fn test_replacement_heavy_text_redecoded() {
        let (bytes, _, _) = WINDOWS_1252.encode("caf\u{e9} r\u{e9}sum\u{e9}");
        let text = decode_text(&bytes, Some("text/html"));
        assert_eq!(text, "caf\u{e9} r\u{e9}sum\u{e9}");
    }

    #[test]
    fn test_meta_charset() {
        let mut bytes = b"<html><head><meta charset=\"iso-8859-1\"></head><body>".to_vec();
        bytes.extend_from_slice(&[0x63, 0x61, 0x66, 0xe9]);
        let text = decode_text(&bytes, None);
        assert!(text.ends_with("caf\u{e9}"));
    }

    #[test]
    fn test_replacement_ratio() {
        assert_eq!(replacement_ratio(""), 0.0);
        assert!(replacement_ratio("a\u{FFFD}") > 0.4);
    }
}
