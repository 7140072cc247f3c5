//! Token counting for a string under a specific model's tokenization
//! (spec.md §4.1's `Tokenizer` component).
//!
//! An index's tokenizer family is fixed at creation (spec.md §3): every
//! record in that index was chunked and embedded against token counts from
//! the same model. This crate does not vendor a real BPE vocabulary; it
//! approximates a model's tokenization by classifying runs of characters,
//! which is accurate enough to drive the chunker's token-budget invariants
//! without pulling in a multi-megabyte vocab file per model.

use std::collections::HashMap;

/// Counts tokens in a string under one model's tokenization.
pub trait Tokenizer: Send + Sync {
  fn model_name(&self) -> &str;
  fn count_tokens(&self, text: &str) -> usize;

  /// Byte ranges of each token unit, in order. Lets a caller recover the
  /// substring covering the last N tokens (the chunker's overlap prefix)
  /// without re-tokenizing character by character itself.
  fn token_spans(&self, text: &str) -> Vec<std::ops::Range<usize>>;
}

/// A character-class approximation: contiguous alphanumeric runs are
/// divided by the model's average characters-per-token, rounded up; every
/// other non-whitespace character (punctuation, symbols, CJK ideographs)
/// counts as its own token. This tracks how real subword tokenizers behave
/// closely enough that short, punctuation-heavy inputs (the chunker's edge
/// cases) get exact, stable counts.
#[derive(Debug, Clone)]
pub struct ApproxTokenizer {
  model: String,
  chars_per_token: f32,
}

impl ApproxTokenizer {
  pub fn new(model: impl Into<String>, chars_per_token: f32) -> Self {
    Self {
      model: model.into(),
      chars_per_token: chars_per_token.max(1.0),
    }
  }
}

impl Tokenizer for ApproxTokenizer {
  fn model_name(&self) -> &str {
    &self.model
  }

  fn count_tokens(&self, text: &str) -> usize {
    self.token_spans(text).len()
  }

  fn token_spans(&self, text: &str) -> Vec<std::ops::Range<usize>> {
    let mut spans = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
      if c.is_whitespace() {
        continue;
      }
      if c.is_alphanumeric() {
        let mut run_end = start + c.len_utf8();
        let mut run_len = 1usize;
        while let Some(&(_, next)) = chars.peek() {
          if next.is_alphanumeric() {
            run_len += 1;
            run_end += next.len_utf8();
            chars.next();
          } else {
            break;
          }
        }
        // Divide the run into as many equal-ish token pieces as its token
        // count demands, so `token_spans` and `count_tokens` always agree.
        let pieces = ((run_len as f32 / self.chars_per_token).ceil() as usize).max(1);
        let run = &text[start..run_end];
        let mut piece_start = start;
        let run_chars: Vec<(usize, char)> = run.char_indices().map(|(i, ch)| (start + i, ch)).collect();
        for piece_idx in 0..pieces {
          let chars_in_piece = run_chars.len() / pieces + usize::from(piece_idx < run_chars.len() % pieces);
          let consumed = run_chars
            .iter()
            .filter(|(pos, _)| *pos >= piece_start)
            .take(chars_in_piece)
            .last()
            .map(|(pos, ch)| pos + ch.len_utf8())
            .unwrap_or(piece_start);
          let piece_end = if piece_idx + 1 == pieces { run_end } else { consumed };
          spans.push(piece_start..piece_end);
          piece_start = piece_end;
        }
      } else {
        spans.push(start..start + c.len_utf8());
      }
    }
    spans
  }
}

/// Lookup table mapping a model name to its tokenizer, mirroring the
/// model-name-keyed provider tables used elsewhere in this workspace
/// (`embedding`'s provider kinds, `memorydb`'s backend kinds).
pub struct ModelTable {
  models: HashMap<String, f32>,
  default_chars_per_token: f32,
}

impl Default for ModelTable {
  fn default() -> Self {
    let mut models = HashMap::new();
    // Roughly matches published average chars-per-token figures for these
    // tokenizer families; used only to pick a ratio, not to reproduce exact
    // vocab-level output.
    models.insert("cl100k_base".to_string(), 4.0);
    models.insert("gpt-4".to_string(), 4.0);
    models.insert("gpt-3.5-turbo".to_string(), 4.0);
    models.insert("nomic-embed-text".to_string(), 4.2);
    models.insert("text-embedding-3-small".to_string(), 4.0);
    models.insert("qwen3-embedding".to_string(), 3.6);
    Self {
      models,
      default_chars_per_token: 4.0,
    }
  }
}

impl ModelTable {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, model: impl Into<String>, chars_per_token: f32) -> &mut Self {
    self.models.insert(model.into(), chars_per_token);
    self
  }

  /// Build a tokenizer for `model`, falling back to the table's default
  /// ratio for unrecognized model names rather than erroring — a new
  /// embedding model should still be chunkable before its ratio is tuned.
  pub fn for_model(&self, model: &str) -> ApproxTokenizer {
    let ratio = self.models.get(model).copied().unwrap_or(self.default_chars_per_token);
    ApproxTokenizer::new(model, ratio)
  }
}
