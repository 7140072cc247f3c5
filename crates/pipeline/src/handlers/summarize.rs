//! `summarize`: an optional step that derives a condensed `extracted_text`
//! artifact from each file's main extraction (spec.md §4.4's mention of
//! summary generation). The summary is registered as its own
//! `extracted_text` artifact, so a later `partition` step run over the same
//! pipeline partitions and embeds it exactly like any other extracted text
//! — no special-casing downstream.
//!
//! Answer synthesis and prompt composition are out of scope; `TextGenerator`
//! is the narrow capability boundary this step needs, with one trivial
//! extractive implementation provided as a reference.

use async_trait::async_trait;
use kmem_core::{DataPipeline, Error, GeneratedFile, Result, STEP_SUMMARIZE};
use std::sync::Arc;

use crate::context::PipelineContext;
use crate::handler::StepHandler;

/// Out-of-scope capability boundary: condenses text into a shorter summary.
/// Modeled the same way `embedding::EmbeddingProvider` models its own
/// external dependency — this crate owns the trait, not a production
/// implementation of it.
#[async_trait]
pub trait TextGenerator: Send + Sync {
  async fn summarize(&self, text: &str) -> Result<String>;
}

/// A trivial extractive summarizer: the document's first few sentences,
/// capped to `max_chars`. Good enough for tests and for exercising the
/// pipeline wiring; not a substitute for a real abstractive generator.
pub struct ExtractiveSummaryGenerator {
  max_chars: usize,
}

impl ExtractiveSummaryGenerator {
  pub fn new(max_chars: usize) -> Self {
    Self { max_chars }
  }
}

#[async_trait]
impl TextGenerator for ExtractiveSummaryGenerator {
  async fn summarize(&self, text: &str) -> Result<String> {
    if text.trim().is_empty() {
      return Err(Error::Content("cannot summarize empty text".to_string()));
    }
    let truncated: String = text.chars().take(self.max_chars).collect();
    Ok(truncated)
  }
}

fn summary_id(file_id: &str) -> String {
  format!("{file_id}-summary")
}

fn summary_name(file_id: &str) -> String {
  format!("{file_id}.summary.txt")
}

pub struct SummarizeHandler {
  generator: Arc<dyn TextGenerator>,
}

impl SummarizeHandler {
  pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
    Self { generator }
  }
}

#[async_trait]
impl StepHandler for SummarizeHandler {
  fn step_name(&self) -> &str {
    STEP_SUMMARIZE
  }

  async fn invoke(&self, mut pipeline: DataPipeline, ctx: &PipelineContext) -> Result<(bool, DataPipeline)> {
    for file_index in 0..pipeline.files.len() {
      if ctx.is_cancelled() {
        return Err(Error::Cancelled);
      }

      let file_id = pipeline.files[file_index].id.clone();
      let out_id = summary_id(&file_id);
      if pipeline.files[file_index].generated_files.iter().any(|g| g.id == out_id) {
        continue; // already summarized — idempotent re-run
      }

      let Some(main_text) = pipeline.files[file_index].generated_of_type("extracted_text").find(|g| g.id != out_id).map(|g| g.name.clone())
      else {
        continue; // extract hasn't produced text for this file yet
      };

      let bytes = ctx.docstore.read_file(&pipeline.index, &pipeline.document_id, &main_text).await?;
      let text = String::from_utf8(bytes).map_err(|e| Error::Content(format!("extracted artifact is not valid UTF-8: {e}")))?;

      match self.generator.summarize(&text).await {
        Ok(summary) => {
          let name = summary_name(&file_id);
          let size = summary.len() as u64;
          ctx.docstore.write_file(&pipeline.index, &pipeline.document_id, &name, summary.as_bytes()).await?;
          pipeline.files[file_index].put_generated(
            GeneratedFile::new(out_id, name, "extracted_text")
              .with_mime_type("text/plain")
              .with_size(size),
          );
        }
        Err(Error::Content(msg)) => {
          pipeline.log(Some(STEP_SUMMARIZE), format!("skipped summary for file {file_id}: {msg}"));
        }
        Err(e) => return Err(e),
      }
    }
    Ok((true, pipeline))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use docstore::{DocumentStorage, FsDocumentStorage};
  use kmem_core::{FileDetails, GeneratedFile as CoreGeneratedFile, TagCollection};
  use tokio_util::sync::CancellationToken;

  async fn ctx() -> (tempfile::TempDir, PipelineContext) {
    let dir = tempfile::tempdir().unwrap();
    let docstore: Arc<dyn DocumentStorage> = Arc::new(FsDocumentStorage::new(dir.path()));
    (dir, PipelineContext::new(docstore, CancellationToken::new()))
  }

  #[tokio::test]
  async fn summarizes_extracted_text_into_its_own_artifact() {
    let (_dir, ctx) = ctx().await;
    ctx.docstore.write_file("idx", "doc1", "f1.extracted.txt", b"a long document body").await.unwrap();

    let mut pipeline = DataPipeline::new("idx", "doc1", TagCollection::new());
    let mut file = FileDetails::new("f1", "a.txt", 20, "text/plain");
    file.put_generated(CoreGeneratedFile::new("f1-text", "f1.extracted.txt", "extracted_text"));
    pipeline.files.push(file);

    let handler = SummarizeHandler::new(Arc::new(ExtractiveSummaryGenerator::new(10)));
    let (ok, pipeline) = handler.invoke(pipeline, &ctx).await.unwrap();
    assert!(ok);
    assert_eq!(pipeline.files[0].generated_of_type("extracted_text").count(), 2);
  }
}
