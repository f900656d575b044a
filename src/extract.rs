//! Text extraction from fetched source documents.
//!
//! Each format sits behind [`Extractor`]; [`Extractors::extract`] picks one
//! from the content type, sniffing the body when the header is missing.

use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::JobError;
use crate::fetch::FetchedDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Html,
    Feed,
    PlainText,
}

impl DocumentFormat {
    pub fn detect(content_type: Option<&str>, body: &str) -> Self {
        let mime = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase());
        match mime.as_deref() {
            Some("text/html" | "application/xhtml+xml") => return DocumentFormat::Html,
            Some(
                "application/rss+xml" | "application/atom+xml" | "application/xml" | "text/xml",
            ) => return DocumentFormat::Feed,
            _ => {}
        }

        let head: String = body.trim_start().chars().take(512).collect::<String>().to_ascii_lowercase();
        if head.contains("<rss") || head.contains("<feed") {
            DocumentFormat::Feed
        } else if head.starts_with("<!doctype html") || head.contains("<html") {
            DocumentFormat::Html
        } else {
            DocumentFormat::PlainText
        }
    }
}

pub trait Extractor: Send + Sync {
    fn extract(&self, body: &str) -> Result<String, JobError>;
}

fn pattern(cell: &'static OnceLock<Option<Regex>>, source: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(source).ok()).as_ref()
}

fn non_content_blocks() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    pattern(
        &CELL,
        r"(?is)<(script|style|noscript|svg|head)\b[^>]*>.*?</(script|style|noscript|svg|head)>|<!--.*?-->",
    )
}

fn block_breaks() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    pattern(&CELL, r"(?i)<\s*(br|/p|/div|/li|/h[1-6]|/tr|/section|/article)\b[^>]*>")
}

fn tags() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    pattern(&CELL, r"(?s)<[^>]*>")
}

fn cdata() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    pattern(&CELL, r"(?s)<!\[CDATA\[(.*?)\]\]>")
}

fn feed_entries() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    pattern(&CELL, r"(?is)<(item|entry)\b[^>]*>(.*?)</(item|entry)>")
}

fn feed_fields() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    pattern(
        &CELL,
        r"(?is)<(title|description|summary|content(?::encoded)?)\b[^>]*>(.*?)</(?:title|description|summary|content(?::encoded)?)>",
    )
}

fn pattern_missing() -> JobError {
    JobError::Unexpected("extraction pattern failed to compile".to_string())
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Collapses runs of spaces inside lines and drops blank lines.
fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_markup(html: &str) -> Result<String, JobError> {
    let blocks = non_content_blocks().ok_or_else(pattern_missing)?;
    let breaks = block_breaks().ok_or_else(pattern_missing)?;
    let tags = tags().ok_or_else(pattern_missing)?;

    let without_blocks = blocks.replace_all(html, " ");
    let with_breaks = breaks.replace_all(&without_blocks, "\n");
    let text = tags.replace_all(&with_breaks, " ");
    Ok(normalize_whitespace(&decode_entities(&text)))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlExtractor;

impl Extractor for HtmlExtractor {
    fn extract(&self, body: &str) -> Result<String, JobError> {
        strip_markup(body)
    }
}

/// RSS `<item>` and Atom `<entry>` elements, one paragraph per entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct FeedExtractor;

impl Extractor for FeedExtractor {
    fn extract(&self, body: &str) -> Result<String, JobError> {
        let entries = feed_entries().ok_or_else(pattern_missing)?;
        let fields = feed_fields().ok_or_else(pattern_missing)?;
        let cdata = cdata().ok_or_else(pattern_missing)?;

        let mut paragraphs = Vec::new();
        for entry in entries.captures_iter(body) {
            let inner = entry.get(2).map_or("", |m| m.as_str());
            let mut parts = Vec::new();
            for field in fields.captures_iter(inner) {
                let raw = field.get(2).map_or("", |m| m.as_str());
                let unwrapped = cdata.replace_all(raw, "$1");
                // feed bodies are often entity-escaped HTML
                let text = strip_markup(&decode_entities(&unwrapped))?;
                if !text.is_empty() {
                    parts.push(text);
                }
            }
            if !parts.is_empty() {
                paragraphs.push(parts.join("\n"));
            }
        }

        if paragraphs.is_empty() {
            return Err(JobError::InvalidState("feed contains no entries".to_string()));
        }
        Ok(paragraphs.join("\n\n"))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl Extractor for PlainTextExtractor {
    fn extract(&self, body: &str) -> Result<String, JobError> {
        Ok(normalize_whitespace(body))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub format: DocumentFormat,
    pub text: String,
    pub content_hash: String,
}

/// Per-format extractor table.
#[derive(Debug, Default, Clone, Copy)]
pub struct Extractors {
    html: HtmlExtractor,
    feed: FeedExtractor,
    plain: PlainTextExtractor,
}

impl Extractors {
    pub fn for_format(&self, format: DocumentFormat) -> &dyn Extractor {
        match format {
            DocumentFormat::Html => &self.html,
            DocumentFormat::Feed => &self.feed,
            DocumentFormat::PlainText => &self.plain,
        }
    }

    pub fn extract(&self, document: &FetchedDocument) -> Result<ExtractedText, JobError> {
        let body = String::from_utf8_lossy(&document.body);
        let format = DocumentFormat::detect(document.content_type.as_deref(), &body);
        self.extract_as(format, &body)
    }

    pub fn extract_as(&self, format: DocumentFormat, body: &str) -> Result<ExtractedText, JobError> {
        let text = self.for_format(format).extract(body)?;
        if text.is_empty() {
            return Err(JobError::InvalidState("document contains no text".to_string()));
        }
        let content_hash = content_hash(&text);
        Ok(ExtractedText {
            format,
            text,
            content_hash,
        })
    }
}

/// Hex SHA-256 of the extracted text.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}
