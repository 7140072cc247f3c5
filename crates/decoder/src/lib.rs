//! `ContentDecoder`: extracts plain text from a typed byte stream, one
//! implementation per MIME type (spec.md §4.4's `extract` handler).
//!
//! PDF, DOCX and image-OCR decoders are out of scope (spec.md §1) — this
//! crate only defines the trait boundary for them plus the decoders that
//! are in scope: plain text, Markdown and HTML.

use async_trait::async_trait;
use kmem_core::{Error, Result};
use scraper::{Html, Selector};

/// Extracts plain text from bytes of a known MIME type.
#[async_trait]
pub trait ContentDecoder: Send + Sync {
  /// MIME types this decoder handles, e.g. `["text/plain"]`.
  fn mime_types(&self) -> &[&str];

  /// Decode `bytes` to plain text. Returns `Error::Content` if the bytes
  /// are not valid for this decoder or decode to nothing (spec.md §7's
  /// `ContentError`: the offending file is skipped, the pipeline
  /// continues).
  async fn decode(&self, bytes: &[u8]) -> Result<String>;
}

/// Registry mapping a MIME type to its decoder, consulted by the `extract`
/// step for every file that has one registered.
#[derive(Default)]
pub struct DecoderRegistry {
  decoders: Vec<Box<dyn ContentDecoder>>,
}

impl DecoderRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registry pre-loaded with the in-scope decoders (spec.md §1).
  pub fn with_defaults() -> Self {
    let mut registry = Self::new();
    registry.register(Box::new(PlainTextDecoder));
    registry.register(Box::new(MarkdownDecoder));
    registry.register(Box::new(HtmlDecoder));
    registry
  }

  pub fn register(&mut self, decoder: Box<dyn ContentDecoder>) -> &mut Self {
    self.decoders.push(decoder);
    self
  }

  pub fn for_mime_type(&self, mime_type: &str) -> Option<&dyn ContentDecoder> {
    self
      .decoders
      .iter()
      .find(|d| d.mime_types().contains(&mime_type))
      .map(|d| d.as_ref())
  }

  pub fn supports(&self, mime_type: &str) -> bool {
    self.for_mime_type(mime_type).is_some()
  }
}

/// `\r\n` and `\r` collapsed to `\n`; `\t` preserved — the normalization the
/// chunker's roundtrip property is defined against (spec.md §4.2).
pub fn normalize_newlines(text: &str) -> String {
  text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Passes bytes through as UTF-8 text, normalizing line endings.
pub struct PlainTextDecoder;

#[async_trait]
impl ContentDecoder for PlainTextDecoder {
  fn mime_types(&self) -> &[&str] {
    &["text/plain"]
  }

  async fn decode(&self, bytes: &[u8]) -> Result<String> {
    let text = String::from_utf8(bytes.to_vec()).map_err(|e| Error::Content(format!("invalid UTF-8: {e}")))?;
    let text = normalize_newlines(&text);
    if text.trim().is_empty() {
      return Err(Error::Content("decoded text is empty".to_string()));
    }
    Ok(text)
  }
}

/// Markdown is already plain text for chunking purposes; this decoder
/// exists as its own MIME-type registration rather than an alias so a
/// future implementation can strip front matter or render to plain prose
/// without touching the `text/plain` path.
pub struct MarkdownDecoder;

#[async_trait]
impl ContentDecoder for MarkdownDecoder {
  fn mime_types(&self) -> &[&str] {
    &["text/markdown"]
  }

  async fn decode(&self, bytes: &[u8]) -> Result<String> {
    PlainTextDecoder.decode(bytes).await
  }
}

/// Extracts visible text from an HTML document, dropping script/style
/// content and tags, used for `importWebPage` (spec.md §6).
pub struct HtmlDecoder;

#[async_trait]
impl ContentDecoder for HtmlDecoder {
  fn mime_types(&self) -> &[&str] {
    &["text/html"]
  }

  async fn decode(&self, bytes: &[u8]) -> Result<String> {
    let raw = String::from_utf8(bytes.to_vec()).map_err(|e| Error::Content(format!("invalid UTF-8: {e}")))?;
    let text = strip_noise_tags(&raw).unwrap_or_default();
    let text = normalize_newlines(text.trim());
    if text.is_empty() {
      return Err(Error::Content("HTML document has no visible text".to_string()));
    }
    Ok(collapse_whitespace(&text))
  }
}

/// Re-parses with script/style elements removed before collecting text, so
/// their contents never leak into the extracted prose.
fn strip_noise_tags(raw: &str) -> Option<String> {
  let document = Html::parse_document(raw);
  let noise_selector = Selector::parse("script, style, noscript, head").ok()?;
  let noisy_html: std::collections::HashSet<String> =
    document.select(&noise_selector).map(|el| el.html()).collect();

  let mut cleaned = raw.to_string();
  for fragment in noisy_html {
    cleaned = cleaned.replace(&fragment, "");
  }
  let cleaned_doc = Html::parse_document(&cleaned);
  let mut text = String::new();
  for node in cleaned_doc.root_element().text() {
    text.push_str(node);
    text.push(' ');
  }
  Some(text)
}

fn collapse_whitespace(text: &str) -> String {
  text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Corrects `.md` files served with a generic `text/plain` content type to
/// `text/markdown`, as named in spec.md §6's `importWebPage` contract.
pub fn correct_mime_type(mime_type: &str, file_name: &str) -> String {
  if mime_type == "text/plain" && file_name.to_lowercase().ends_with(".md") {
    return "text/markdown".to_string();
  }
  mime_type.to_string()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn plain_text_decodes_and_normalizes_newlines() {
    let decoder = PlainTextDecoder;
    let text = decoder.decode(b"line one\r\nline two\rline three").await.unwrap();
    assert_eq!(text, "line one\nline two\nline three");
  }

  #[tokio::test]
  async fn plain_text_rejects_empty_content() {
    let decoder = PlainTextDecoder;
    let err = decoder.decode(b"   \n  ").await.unwrap_err();
    assert!(matches!(err, Error::Content(_)));
  }

  #[tokio::test]
  async fn markdown_decodes_like_plain_text() {
    let decoder = MarkdownDecoder;
    let text = decoder.decode(b"# Title\n\nBody text.").await.unwrap();
    assert!(text.contains("Title"));
  }

  #[tokio::test]
  async fn html_decoder_strips_tags_and_script_content() {
    let decoder = HtmlDecoder;
    let html = b"<html><head><style>.x{color:red}</style></head><body><script>evil()</script><h1>Hello</h1><p>World</p></body></html>";
    let text = decoder.decode(html).await.unwrap();
    assert!(text.contains("Hello"));
    assert!(text.contains("World"));
    assert!(!text.contains("evil"));
    assert!(!text.contains("color:red"));
  }

  #[tokio::test]
  async fn html_decoder_rejects_documents_with_no_text() {
    let decoder = HtmlDecoder;
    let err = decoder.decode(b"<html><body><script>x()</script></body></html>").await.unwrap_err();
    assert!(matches!(err, Error::Content(_)));
  }

  #[test]
  fn registry_resolves_by_mime_type() {
    let registry = DecoderRegistry::with_defaults();
    assert!(registry.supports("text/plain"));
    assert!(registry.supports("text/markdown"));
    assert!(registry.supports("text/html"));
    assert!(!registry.supports("application/pdf"));
  }

  #[test]
  fn mime_correction_fixes_markdown_served_as_plain_text() {
    assert_eq!(correct_mime_type("text/plain", "README.md"), "text/markdown");
    assert_eq!(correct_mime_type("text/plain", "notes.txt"), "text/plain");
    assert_eq!(correct_mime_type("text/html", "page.md"), "text/html");
  }
}
