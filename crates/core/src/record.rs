//! `MemoryRecord`: the unit of retrievable knowledge stored in a `MemoryDb`.

use crate::tags::{
  TAG_DOCUMENT_ID, TAG_FILE_ID, TAG_LAST_UPDATE, TAG_PART_NUMBER, TAG_SECTION_NUMBER, TAG_SOURCE_NAME, TAG_SOURCE_URL,
  TagCollection,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Current payload schema version. Bump when `Payload`'s shape changes and
/// add an upgrade branch in [`Payload::upgrade`].
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Opaque, non-indexed, non-filterable per-record data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload(BTreeMap<String, Value>);

impl Payload {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.0.insert(key.into(), value.into());
    self
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.0.get(key)
  }

  pub fn get_str(&self, key: &str) -> Option<&str> {
    self.0.get(key).and_then(Value::as_str)
  }

  pub fn schema_version(&self) -> u32 {
    self.get("schema_version").and_then(Value::as_u64).unwrap_or(0) as u32
  }

  /// Upgrade an older payload in-memory to [`CURRENT_SCHEMA_VERSION`],
  /// defaulting fields that didn't exist in earlier versions. Never mutates
  /// the backend; callers re-write only if they explicitly choose to.
  pub fn upgrade(mut self) -> Self {
    let mut version = self.schema_version();
    if version < 1 {
      self.0.entry("source_url".into()).or_insert_with(|| Value::from(""));
      version = 1;
    }
    if version < 2 {
      self.0.entry("source".into()).or_insert_with(|| Value::from(""));
      version = 2;
    }
    self.0.insert("schema_version".into(), Value::from(version));
    self
  }
}

/// The unit of retrievable knowledge: a dense vector plus filterable tags
/// plus an opaque payload.
///
/// Invariant: every record carries the reserved tags (`document_id`,
/// `file_id`, `part_number`, `section_number`, `source_name`, `source_url`
/// when known, `last_update`) so that a `delete_document` tag-filter
/// deletion can find every partition of a document and origin metadata is
/// filterable rather than only carried in the opaque payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
  pub id: String,
  pub vector: Vec<f32>,
  pub tags: TagCollection,
  pub payload: Payload,
}

impl MemoryRecord {
  pub fn new(id: impl Into<String>, vector: Vec<f32>) -> Self {
    Self {
      id: id.into(),
      vector,
      tags: TagCollection::new(),
      payload: Payload::new(),
    }
  }

  pub fn with_tags(mut self, tags: TagCollection) -> Self {
    self.tags = tags;
    self
  }

  pub fn with_payload(mut self, payload: Payload) -> Self {
    self.payload = payload;
    self
  }

  /// Deterministic record id for a partition: `hash(document_id, file_id,
  /// part_number, model_name)`, as named by the `save_records` handler
  /// contract. Stable across repeated runs of the same step so replay does
  /// not create duplicate records.
  pub fn deterministic_id(document_id: &str, file_id: &str, part_number: usize, model_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(file_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(part_number.to_le_bytes());
    hasher.update(b"\0");
    hasher.update(model_name.as_bytes());
    format!("{:x}", hasher.finalize())
  }

  /// Build the reserved document-origin tags for cascade deletion and
  /// filtering by source (spec.md §4.4). `source_url` is only present for
  /// documents that have one (e.g. `importWebPage`).
  pub fn origin_tags(
    document_id: &str,
    file_id: &str,
    part_number: usize,
    section_number: usize,
    source_name: &str,
    source_url: Option<&str>,
    last_update: &str,
  ) -> TagCollection {
    let mut tags = TagCollection::new();
    tags.insert(TAG_DOCUMENT_ID, document_id);
    tags.insert(TAG_FILE_ID, file_id);
    tags.insert(TAG_PART_NUMBER, part_number.to_string());
    tags.insert(TAG_SECTION_NUMBER, section_number.to_string());
    tags.insert(TAG_SOURCE_NAME, source_name);
    if let Some(url) = source_url {
      tags.insert(TAG_SOURCE_URL, url);
    }
    tags.insert(TAG_LAST_UPDATE, last_update);
    tags
  }

  pub fn document_id(&self) -> Option<&str> {
    self.tags.values(TAG_DOCUMENT_ID).first().map(String::as_str)
  }
}

/// True cosine similarity in `[-1, 1]`. Backends must recompute from raw
/// vectors whenever they cannot guarantee their native score is already
/// true cosine similarity (spec.md §4.3).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
  debug_assert_eq!(a.len(), b.len());
  let mut dot = 0f32;
  let mut norm_a = 0f32;
  let mut norm_b = 0f32;
  for (x, y) in a.iter().zip(b.iter()) {
    dot += x * y;
    norm_a += x * x;
    norm_b += y * y;
  }
  if norm_a == 0.0 || norm_b == 0.0 {
    return 0.0;
  }
  (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// A `MemoryRecord` paired with its similarity score against a query.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
  pub record: MemoryRecord,
  pub score: f32,
}

/// Timestamp helper used by payloads (`last_update`, `timestamp`).
pub fn now_rfc3339() -> String {
  Utc::now().to_rfc3339()
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cosine_symmetry_and_self_similarity() {
    let a = vec![1.0, 2.0, 3.0];
    let b = vec![-1.0, 0.5, 2.0];
    assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn cosine_zero_vector_is_zero() {
    let a = vec![0.0, 0.0, 0.0];
    let b = vec![1.0, 2.0, 3.0];
    assert_eq!(cosine_similarity(&a, &b), 0.0);
  }

  #[test]
  fn deterministic_id_is_stable() {
    let a = MemoryRecord::deterministic_id("doc1", "file1", 0, "model-a");
    let b = MemoryRecord::deterministic_id("doc1", "file1", 0, "model-a");
    let c = MemoryRecord::deterministic_id("doc1", "file1", 1, "model-a");
    assert_eq!(a, b);
    assert_ne!(a, c);
  }

  #[test]
  fn payload_upgrade_defaults_missing_fields() {
    let payload = Payload::new().set("text", "hello");
    assert_eq!(payload.schema_version(), 0);
    let upgraded = payload.upgrade();
    assert_eq!(upgraded.schema_version(), CURRENT_SCHEMA_VERSION);
    assert_eq!(upgraded.get_str("source_url"), Some(""));
  }
}
