//! Recursive separator-cascade text chunker (spec.md §4.2).
//!
//! Splits plain text into token-budget-bounded chunks by trying
//! successively weaker separators: first on sentence-ending punctuation,
//! falling back to clause and line breaks, down to individual characters
//! as the separator of last resort. This guarantees termination — at the
//! character level, every position is a valid split point — while
//! preferring splits that keep whole sentences and clauses together
//! whenever the token budget allows it.

use kmem_core::{Error, Result};
use tokenizer::Tokenizer;

/// Separator strength, strongest first. Each level is tried only after the
/// one above it fails to produce a piece that fits the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeparatorClass {
  /// Sentence-ending punctuation: `. `, `! `, `? `, `...`, `!!`, `?!`, and
  /// the CJK equivalents `。` `？` `！`.
  Explicit,
  /// Clause breaks: `;`, a closing bracket, the CJK enumeration comma `、`.
  Potential,
  /// `:`, `,` and their CJK counterparts.
  Weak1,
  /// Newline, tab, quote characters, plain space.
  Weak2,
  /// `_`, `-`, `|`, `@`, `=`, en/em dash.
  Weak3,
  /// Every character is its own separator. Always terminates.
  NotASeparator,
}

impl SeparatorClass {
  fn next(self) -> Option<Self> {
    match self {
      Self::Explicit => Some(Self::Potential),
      Self::Potential => Some(Self::Weak1),
      Self::Weak1 => Some(Self::Weak2),
      Self::Weak2 => Some(Self::Weak3),
      Self::Weak3 => Some(Self::NotASeparator),
      Self::NotASeparator => None,
    }
  }
}

fn match_len(class: SeparatorClass, text: &str) -> Option<usize> {
  match class {
    SeparatorClass::Explicit => match_explicit(text),
    SeparatorClass::Potential => match_potential(text),
    SeparatorClass::Weak1 => match_weak1(text),
    SeparatorClass::Weak2 => match_weak2(text),
    SeparatorClass::Weak3 => match_weak3(text),
    SeparatorClass::NotASeparator => None,
  }
}

fn match_explicit(text: &str) -> Option<usize> {
  for pat in ["...", "!!", "?!", "!?"] {
    if text.starts_with(pat) {
      return Some(pat.len());
    }
  }
  let c0 = text.chars().next()?;
  if matches!(c0, '。' | '？' | '！') {
    return Some(c0.len_utf8());
  }
  if matches!(c0, '.' | '!' | '?') {
    let len = c0.len_utf8();
    let ws_len = trailing_whitespace_len(&text[len..]);
    if ws_len > 0 {
      return Some(len + ws_len);
    }
  }
  None
}

fn match_potential(text: &str) -> Option<usize> {
  let c0 = text.chars().next()?;
  if matches!(c0, ';' | '}' | ')' | ']') {
    let len = c0.len_utf8();
    return Some(len + trailing_whitespace_len(&text[len..]));
  }
  if c0 == '、' {
    return Some(c0.len_utf8());
  }
  None
}

fn match_weak1(text: &str) -> Option<usize> {
  let c0 = text.chars().next()?;
  matches!(c0, ':' | ',' | '：' | '，').then(|| c0.len_utf8())
}

fn match_weak2(text: &str) -> Option<usize> {
  let c0 = text.chars().next()?;
  matches!(c0, '\n' | '\t' | '"' | '\'' | '\u{201C}' | '\u{201D}' | '\u{2018}' | '\u{2019}' | ' ').then(|| c0.len_utf8())
}

fn match_weak3(text: &str) -> Option<usize> {
  let c0 = text.chars().next()?;
  matches!(c0, '_' | '-' | '|' | '@' | '=' | '\u{2013}' | '\u{2014}').then(|| c0.len_utf8())
}

fn trailing_whitespace_len(text: &str) -> usize {
  text.chars().take_while(|c| c.is_whitespace()).map(char::len_utf8).sum()
}

/// Splits `text` into maximal `content + separator` fragments for `class`.
/// At `NotASeparator`, every character is its own fragment.
fn split_fragments(class: SeparatorClass, text: &str) -> Vec<&str> {
  if class == SeparatorClass::NotASeparator {
    return text.char_indices().map(|(i, c)| &text[i..i + c.len_utf8()]).collect();
  }
  let mut fragments = Vec::new();
  let mut start = 0usize;
  let mut pos = 0usize;
  while pos < text.len() {
    if let Some(len) = match_len(class, &text[pos..]) {
      pos += len;
      fragments.push(&text[start..pos]);
      start = pos;
    } else {
      let ch_len = text[pos..].chars().next().map(char::len_utf8).unwrap_or(1);
      pos += ch_len;
    }
  }
  if start < text.len() {
    fragments.push(&text[start..]);
  }
  fragments
}

/// Greedily aggregates `text`'s fragments at `class` into pieces that each
/// fit `budget` tokens, recursing to the next-weaker separator class when a
/// fragment alone exceeds the budget. `warnings` collects a message for any
/// piece emitted over budget because even single characters didn't fit
/// (`budget` itself smaller than one token — never expected in practice).
fn split_level(text: &str, class: SeparatorClass, tok: &dyn Tokenizer, budget: usize, warnings: &mut Vec<String>) -> Vec<String> {
  if text.is_empty() {
    return Vec::new();
  }
  let fragments = split_fragments(class, text);
  let mut chunks = Vec::new();
  let mut current = String::new();

  for fragment in fragments {
    let fragment_tokens = tok.count_tokens(fragment);
    if current.is_empty() {
      if fragment_tokens <= budget {
        current.push_str(fragment);
      } else {
        recurse_oversized_fragment(fragment, class, tok, budget, warnings, &mut chunks, &mut current);
      }
      continue;
    }

    let combined = format!("{current}{fragment}");
    if tok.count_tokens(&combined) <= budget {
      current = combined;
    } else if fragment_tokens <= budget {
      chunks.push(std::mem::take(&mut current));
      current.push_str(fragment);
    } else {
      chunks.push(std::mem::take(&mut current));
      recurse_oversized_fragment(fragment, class, tok, budget, warnings, &mut chunks, &mut current);
    }
  }

  if !current.is_empty() {
    chunks.push(current);
  }
  chunks
}

/// Handles a fragment that alone exceeds `budget`: recurse to the next
/// separator class and seed `current` with its last piece (the rest are
/// already-finished chunks appended to `chunks`), or, at the finest class,
/// emit the fragment as an over-budget chunk.
#[allow(clippy::too_many_arguments)]
fn recurse_oversized_fragment(
  fragment: &str,
  class: SeparatorClass,
  tok: &dyn Tokenizer,
  budget: usize,
  warnings: &mut Vec<String>,
  chunks: &mut Vec<String>,
  current: &mut String,
) {
  match class.next() {
    Some(next_class) => {
      let mut pieces = split_level(fragment, next_class, tok, budget, warnings);
      if let Some(last) = pieces.pop() {
        chunks.append(&mut pieces);
        *current = last;
      }
    }
    None => {
      warnings.push(format!(
        "chunk of {} tokens exceeds budget of {budget} tokens and could not be split further",
        tok.count_tokens(fragment)
      ));
      chunks.push(fragment.to_string());
    }
  }
}

/// Newline normalization the chunker's roundtrip property is defined
/// against: `\r\n` and `\r` collapse to `\n`, `\t` is preserved.
fn normalize_newlines(text: &str) -> String {
  text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Per-call chunking parameters, generalizing `kmem_core::ChunkerConfig`
/// with the header text a caller wants prefixed to every chunk (e.g. a
/// document title, for retrieval context).
#[derive(Debug, Clone)]
pub struct ChunkOptions {
  pub max_tokens_per_chunk: usize,
  pub overlap_tokens: usize,
  pub header: String,
}

impl ChunkOptions {
  pub fn new(max_tokens_per_chunk: usize, overlap_tokens: usize) -> Self {
    Self {
      max_tokens_per_chunk,
      overlap_tokens,
      header: String::new(),
    }
  }

  pub fn with_header(mut self, header: impl Into<String>) -> Self {
    self.header = header.into();
    self
  }
}

impl From<&kmem_core::ChunkerConfig> for ChunkOptions {
  fn from(cfg: &kmem_core::ChunkerConfig) -> Self {
    Self::new(cfg.max_tokens_per_chunk, cfg.overlap_tokens)
  }
}

/// Result of a chunking pass: the chunks themselves plus any warnings for
/// pieces that could not be brought under budget (spec.md §7: this is a
/// degraded result, not a failure — the pipeline keeps the oversized chunk
/// rather than dropping content).
#[derive(Debug, Clone)]
pub struct ChunkOutput {
  pub chunks: Vec<String>,
  pub warnings: Vec<String>,
}

/// Splits `text` into chunks honoring `options.max_tokens_per_chunk`,
/// prefixing every chunk with `options.header` and, for every chunk after
/// the first, the last `options.overlap_tokens` tokens of the previous
/// chunk's body (spec.md §4.2's overlap property).
pub fn split(text: &str, options: &ChunkOptions, tokenizer: &dyn Tokenizer) -> Result<ChunkOutput> {
  if options.max_tokens_per_chunk == 0 {
    return Err(Error::Input("maxTokensPerChunk must be greater than zero".to_string()));
  }

  let normalized = normalize_newlines(text);
  if normalized.is_empty() {
    return Ok(ChunkOutput {
      chunks: Vec::new(),
      warnings: Vec::new(),
    });
  }

  let header_tokens = tokenizer.count_tokens(&options.header);
  // Reserve room for header and overlap up front so every chunk — not just
  // the first — ends up at or under the configured budget once they're
  // added back in below.
  let body_budget = options
    .max_tokens_per_chunk
    .saturating_sub(header_tokens)
    .saturating_sub(options.overlap_tokens)
    .max(1);

  let mut warnings = Vec::new();
  let raw_chunks = split_level(&normalized, SeparatorClass::Explicit, tokenizer, body_budget, &mut warnings);

  let mut chunks = Vec::with_capacity(raw_chunks.len());
  for (i, raw) in raw_chunks.iter().enumerate() {
    let mut chunk = String::new();
    chunk.push_str(&options.header);
    if i > 0 && options.overlap_tokens > 0 {
      chunk.push_str(&last_n_tokens_text(tokenizer, &raw_chunks[i - 1], options.overlap_tokens));
    }
    chunk.push_str(raw);
    chunks.push(chunk);
  }

  Ok(ChunkOutput { chunks, warnings })
}

fn last_n_tokens_text(tokenizer: &dyn Tokenizer, text: &str, n: usize) -> String {
  if n == 0 {
    return String::new();
  }
  let spans = tokenizer.token_spans(text);
  if spans.is_empty() {
    return String::new();
  }
  let start_idx = spans.len().saturating_sub(n);
  text[spans[start_idx].start..].to_string()
}
