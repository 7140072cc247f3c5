//! `DataPipeline`: the persisted state of a single ingestion request.

use crate::tags::TagCollection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const STEP_EXTRACT: &str = "extract";
pub const STEP_PARTITION: &str = "partition";
pub const STEP_GEN_EMBEDDINGS: &str = "gen_embeddings";
pub const STEP_SAVE_RECORDS: &str = "save_records";
pub const STEP_SUMMARIZE: &str = "summarize";
pub const STEP_DELETE_DOCUMENT: &str = "delete_document";

pub fn default_steps() -> Vec<String> {
  [STEP_EXTRACT, STEP_PARTITION, STEP_GEN_EMBEDDINGS, STEP_SAVE_RECORDS]
    .into_iter()
    .map(String::from)
    .collect()
}

/// A file artifact produced by a pipeline step: extracted text, a text
/// partition, an embedding, or a saved-record marker. Keyed deterministically
/// so concurrent re-execution cannot diverge (spec.md §5's ordering
/// guarantee).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedFile {
  pub id: String,
  pub name: String,
  /// Logical kind: `extracted_text`, `text_partition`, `embedding`.
  pub artifact_type: String,
  pub mime_type: String,
  pub size: u64,
  /// For `text_partition`/`embedding` artifacts: the deterministic ordinal
  /// within the source file.
  pub part_number: Option<usize>,
}

impl GeneratedFile {
  pub fn new(id: impl Into<String>, name: impl Into<String>, artifact_type: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      name: name.into(),
      artifact_type: artifact_type.into(),
      mime_type: "text/plain".to_string(),
      size: 0,
      part_number: None,
    }
  }

  pub fn with_part_number(mut self, n: usize) -> Self {
    self.part_number = Some(n);
    self
  }

  pub fn with_size(mut self, size: u64) -> Self {
    self.size = size;
    self
  }

  pub fn with_mime_type(mut self, mime: impl Into<String>) -> Self {
    self.mime_type = mime.into();
    self
  }
}

/// One uploaded source file and the artifacts steps have derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDetails {
  pub id: String,
  pub name: String,
  pub size: u64,
  pub mime_type: String,
  #[serde(default)]
  pub generated_files: Vec<GeneratedFile>,
}

impl FileDetails {
  pub fn new(id: impl Into<String>, name: impl Into<String>, size: u64, mime_type: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      name: name.into(),
      size,
      mime_type: mime_type.into(),
      generated_files: Vec::new(),
    }
  }

  pub fn generated_of_type<'a>(&'a self, artifact_type: &'a str) -> impl Iterator<Item = &'a GeneratedFile> {
    self.generated_files.iter().filter(move |g| g.artifact_type == artifact_type)
  }

  /// Insert or replace (by id) a generated file. The last writer of a given
  /// key wins, matching spec.md's deterministic-artifact-key ordering
  /// guarantee.
  pub fn put_generated(&mut self, file: GeneratedFile) {
    if let Some(existing) = self.generated_files.iter_mut().find(|g| g.id == file.id) {
      *existing = file;
    } else {
      self.generated_files.push(file);
    }
  }
}

/// A log entry recorded on the pipeline during execution (warnings,
/// skipped-file notices, etc.) — surfaced in the persisted status format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
  pub timestamp: DateTime<Utc>,
  pub step: Option<String>,
  pub message: String,
}

/// The state of a single ingestion request, persisted under
/// `status.json` in the pipeline's `DocumentStorage` directory.
///
/// Invariant: `steps == completed_steps ++ remaining_steps`;
/// `complete() <=> remaining_steps.is_empty()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPipeline {
  pub index: String,
  pub document_id: String,
  pub execution_id: String,
  pub tags: TagCollection,
  pub files: Vec<FileDetails>,
  pub steps: Vec<String>,
  pub completed_steps: Vec<String>,
  pub remaining_steps: Vec<String>,
  pub failed: bool,
  pub creation: DateTime<Utc>,
  pub last_update: DateTime<Utc>,
  #[serde(default)]
  pub log: Vec<LogEntry>,
}

impl DataPipeline {
  pub fn new(index: impl Into<String>, document_id: impl Into<String>, tags: TagCollection) -> Self {
    let now = Utc::now();
    Self {
      index: index.into(),
      document_id: document_id.into(),
      execution_id: Uuid::now_v7().to_string(),
      tags,
      files: Vec::new(),
      steps: Vec::new(),
      completed_steps: Vec::new(),
      remaining_steps: Vec::new(),
      failed: false,
      creation: now,
      last_update: now,
      log: Vec::new(),
    }
  }

  /// Append a step name (`then`). Duplicates are allowed: the same handler
  /// can run twice in one pipeline.
  pub fn then(&mut self, step_name: impl Into<String>) -> &mut Self {
    let step = step_name.into();
    self.steps.push(step.clone());
    self.remaining_steps.push(step);
    self
  }

  pub fn complete(&self) -> bool {
    !self.failed && self.remaining_steps.is_empty()
  }

  pub fn current_step(&self) -> Option<&str> {
    self.remaining_steps.first().map(String::as_str)
  }

  /// Advance the pipeline atomically on step success: only the orchestrator
  /// calls this, never a handler directly (spec.md §4.1's invocation
  /// contract).
  pub fn advance(&mut self) {
    if self.remaining_steps.is_empty() {
      return;
    }
    let step = self.remaining_steps.remove(0);
    self.completed_steps.push(step);
    self.last_update = Utc::now();
  }

  pub fn mark_failed(&mut self, reason: impl Into<String>) {
    self.failed = true;
    self.last_update = Utc::now();
    self.log(None, reason);
  }

  pub fn log(&mut self, step: Option<&str>, message: impl Into<String>) {
    self.log.push(LogEntry {
      timestamp: Utc::now(),
      step: step.map(String::from),
      message: message.into(),
    });
  }

  pub fn pipeline_key(&self) -> String {
    format!("{}/{}", self.index, self.document_id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn steps_partition_invariant() {
    let mut p = DataPipeline::new("t1", "doc1", TagCollection::new());
    p.then("extract").then("partition").then("gen_embeddings");
    assert_eq!(p.steps.len(), p.completed_steps.len() + p.remaining_steps.len());
    assert!(!p.complete());

    p.advance();
    p.advance();
    p.advance();
    assert!(p.complete());
    assert_eq!(p.steps.len(), p.completed_steps.len());
  }

  #[test]
  fn failed_pipeline_is_never_complete() {
    let mut p = DataPipeline::new("t1", "doc1", TagCollection::new());
    p.then("extract");
    p.advance();
    assert!(p.complete());
    p.mark_failed("boom");
    assert!(!p.complete());
  }

  #[test]
  fn duplicate_step_names_allowed() {
    let mut p = DataPipeline::new("t1", "doc1", TagCollection::new());
    p.then("partition").then("partition");
    assert_eq!(p.steps, vec!["partition", "partition"]);
  }
}
