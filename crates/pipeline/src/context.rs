//! `PipelineContext`: the narrow value passed into every handler's
//! `invoke` (spec.md §9's redesign of the cyclic orchestrator/handler
//! back-reference).
//!
//! A handler only ever needs two cross-cutting things from the
//! orchestrator: somewhere to read and write artifacts, and a way to
//! notice cancellation. Everything else a handler needs (an embedding
//! provider, a memory db, a decoder registry) it owns itself, injected at
//! construction time — the orchestrator never hands those out, so there is
//! no back-reference for handlers to hold.

use docstore::DocumentStorage;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Artifact filename suffix for a file's raw uploaded bytes, as distinct
/// from `status.json` and the artifacts later steps derive from it.
pub const RAW_SUFFIX: &str = ".src";

pub fn raw_artifact_name(file_id: &str) -> String {
  format!("{file_id}{RAW_SUFFIX}")
}

/// Id and artifact filename for a file's primary decoded text (the
/// `extract` step's output).
pub fn extracted_text_id(file_id: &str) -> String {
  format!("{file_id}-text")
}

pub fn extracted_text_artifact_name(file_id: &str) -> String {
  format!("{file_id}.extracted.txt")
}

/// Id and artifact filename for a file's condensed text (the `summarize`
/// step's output). Registered with the same `extracted_text` artifact type
/// as the primary extraction so a later `partition` step treats both
/// sources identically.
pub fn summary_id(file_id: &str) -> String {
  format!("{file_id}-summary")
}

pub fn summary_artifact_name(file_id: &str) -> String {
  format!("{file_id}.summary.txt")
}

/// Id and artifact filename for one chunk of `source_id` (an
/// `extracted_text` artifact's own id — either [`extracted_text_id`] or
/// [`summary_id`]).
pub fn partition_id(source_id: &str, part_number: usize) -> String {
  format!("{source_id}-part{part_number:04}")
}

pub fn partition_artifact_name(source_id: &str, part_number: usize) -> String {
  format!("{source_id}.part{part_number:04}.txt")
}

/// Id and artifact filename for one partition's embedding.
pub fn embedding_id(partition_id: &str) -> String {
  format!("{partition_id}-embedding")
}

pub fn embedding_artifact_name(partition_id: &str) -> String {
  format!("{partition_id}.embedding.json")
}

#[derive(Clone)]
pub struct PipelineContext {
  pub docstore: Arc<dyn DocumentStorage>,
  pub cancellation: CancellationToken,
}

impl PipelineContext {
  pub fn new(docstore: Arc<dyn DocumentStorage>, cancellation: CancellationToken) -> Self {
    Self { docstore, cancellation }
  }

  /// Shorthand for a handler's cancellation check at an I/O boundary or
  /// between file iterations (spec.md §5).
  pub fn is_cancelled(&self) -> bool {
    self.cancellation.is_cancelled()
  }
}
