//! `partition`: chunk every `extracted_text` artifact into token-bounded
//! pieces (spec.md §4.4, backed by the `chunker` crate).

use async_trait::async_trait;
use chunker::ChunkOptions;
use kmem_core::{DataPipeline, Error, GeneratedFile, Result, STEP_PARTITION};
use std::sync::Arc;
use tokenizer::Tokenizer;

use crate::context::{partition_artifact_name, partition_id, PipelineContext};
use crate::handler::StepHandler;

pub struct PartitionHandler {
  max_tokens_per_chunk: usize,
  overlap_tokens: usize,
  tokenizer: Arc<dyn Tokenizer>,
}

impl PartitionHandler {
  pub fn new(max_tokens_per_chunk: usize, overlap_tokens: usize, tokenizer: Arc<dyn Tokenizer>) -> Self {
    Self {
      max_tokens_per_chunk,
      overlap_tokens,
      tokenizer,
    }
  }
}

#[async_trait]
impl StepHandler for PartitionHandler {
  fn step_name(&self) -> &str {
    STEP_PARTITION
  }

  async fn invoke(&self, mut pipeline: DataPipeline, ctx: &PipelineContext) -> Result<(bool, DataPipeline)> {
    for file_index in 0..pipeline.files.len() {
      if ctx.is_cancelled() {
        return Err(Error::Cancelled);
      }

      let sources: Vec<(String, String)> = pipeline.files[file_index]
        .generated_of_type("extracted_text")
        .map(|g| (g.id.clone(), g.name.clone()))
        .collect();

      for (source_id, source_name) in sources {
        if pipeline.files[file_index]
          .generated_files
          .iter()
          .any(|g| g.artifact_type == "text_partition" && g.id.starts_with(&format!("{source_id}-part")))
        {
          continue; // already partitioned — idempotent re-run
        }

        let bytes = ctx.docstore.read_file(&pipeline.index, &pipeline.document_id, &source_name).await?;
        let text = String::from_utf8(bytes).map_err(|e| Error::Content(format!("extracted artifact is not valid UTF-8: {e}")))?;

        let options = ChunkOptions::new(self.max_tokens_per_chunk, self.overlap_tokens);
        let output = chunker::split(&text, &options, self.tokenizer.as_ref())?;
        for warning in &output.warnings {
          pipeline.log(Some(STEP_PARTITION), warning.clone());
        }

        for (part_number, chunk) in output.chunks.iter().enumerate() {
          let id = partition_id(&source_id, part_number);
          let name = partition_artifact_name(&source_id, part_number);
          ctx.docstore.write_file(&pipeline.index, &pipeline.document_id, &name, chunk.as_bytes()).await?;
          pipeline.files[file_index].put_generated(
            GeneratedFile::new(id, name, "text_partition")
              .with_mime_type("text/plain")
              .with_size(chunk.len() as u64)
              .with_part_number(part_number),
          );
        }
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
  use tokenizer::ApproxTokenizer;
  use tokio_util::sync::CancellationToken;

  async fn ctx() -> (tempfile::TempDir, PipelineContext) {
    let dir = tempfile::tempdir().unwrap();
    let docstore: Arc<dyn DocumentStorage> = Arc::new(FsDocumentStorage::new(dir.path()));
    (dir, PipelineContext::new(docstore, CancellationToken::new()))
  }

  #[tokio::test]
  async fn partitions_extracted_text_into_chunks() {
    let (_dir, ctx) = ctx().await;
    let text = "Sentence one. Sentence two. Sentence three. Sentence four.".repeat(20);
    ctx.docstore.write_file("idx", "doc1", "f1.extracted.txt", text.as_bytes()).await.unwrap();

    let mut pipeline = DataPipeline::new("idx", "doc1", TagCollection::new());
    let mut file = FileDetails::new("f1", "a.txt", text.len() as u64, "text/plain");
    file.put_generated(CoreGeneratedFile::new("f1-text", "f1.extracted.txt", "extracted_text"));
    pipeline.files.push(file);

    let handler = PartitionHandler::new(40, 5, Arc::new(ApproxTokenizer::new("test-model", 4.0)));
    let (ok, pipeline) = handler.invoke(pipeline, &ctx).await.unwrap();
    assert!(ok);
    assert!(pipeline.files[0].generated_of_type("text_partition").count() > 1);
  }

  #[tokio::test]
  async fn rerun_is_idempotent() {
    let (_dir, ctx) = ctx().await;
    let text = "Short text.".to_string();
    ctx.docstore.write_file("idx", "doc1", "f1.extracted.txt", text.as_bytes()).await.unwrap();

    let mut pipeline = DataPipeline::new("idx", "doc1", TagCollection::new());
    let mut file = FileDetails::new("f1", "a.txt", text.len() as u64, "text/plain");
    file.put_generated(CoreGeneratedFile::new("f1-text", "f1.extracted.txt", "extracted_text"));
    pipeline.files.push(file);

    let handler = PartitionHandler::new(40, 5, Arc::new(ApproxTokenizer::new("test-model", 4.0)));
    let (_, pipeline) = handler.invoke(pipeline, &ctx).await.unwrap();
    let count_after_first = pipeline.files[0].generated_of_type("text_partition").count();
    let (_, pipeline2) = handler.invoke(pipeline, &ctx).await.unwrap();
    assert_eq!(pipeline2.files[0].generated_of_type("text_partition").count(), count_after_first);
  }
}
