//! `extract`: decode each file's raw bytes into plain text (spec.md §4.4).

use async_trait::async_trait;
use decoder::DecoderRegistry;
use kmem_core::{Error, GeneratedFile, Result, STEP_EXTRACT};
use std::sync::Arc;
use tracing::warn;

use crate::context::{extracted_text_artifact_name, extracted_text_id, raw_artifact_name, PipelineContext};
use crate::handler::StepHandler;

pub struct ExtractHandler {
  decoders: Arc<DecoderRegistry>,
}

impl ExtractHandler {
  pub fn new(decoders: Arc<DecoderRegistry>) -> Self {
    Self { decoders }
  }
}

#[async_trait]
impl StepHandler for ExtractHandler {
  fn step_name(&self) -> &str {
    STEP_EXTRACT
  }

  async fn invoke(&self, mut pipeline: kmem_core::DataPipeline, ctx: &PipelineContext) -> Result<(bool, kmem_core::DataPipeline)> {
    for file_index in 0..pipeline.files.len() {
      if ctx.is_cancelled() {
        return Err(Error::Cancelled);
      }

      let (file_id, mime_type) = {
        let file = &pipeline.files[file_index];
        (file.id.clone(), file.mime_type.clone())
      };
      let out_id = extracted_text_id(&file_id);

      if pipeline.files[file_index].generated_files.iter().any(|g| g.id == out_id) {
        continue; // already extracted — idempotent re-run
      }

      let Some(decoder) = self.decoders.for_mime_type(&mime_type) else {
        pipeline.log(Some(STEP_EXTRACT), format!("no decoder registered for mime type {mime_type}, skipping file {file_id}"));
        continue;
      };

      let raw = ctx.docstore.read_file(&pipeline.index, &pipeline.document_id, &raw_artifact_name(&file_id)).await?;
      match decoder.decode(&raw).await {
        Ok(text) => {
          let name = extracted_text_artifact_name(&file_id);
          let size = text.len() as u64;
          ctx.docstore.write_file(&pipeline.index, &pipeline.document_id, &name, text.as_bytes()).await?;
          pipeline.files[file_index].put_generated(
            GeneratedFile::new(out_id, name, "extracted_text")
              .with_mime_type("text/plain")
              .with_size(size),
          );
        }
        Err(Error::Content(msg)) => {
          warn!(file_id, mime_type, error = %msg, "content error, skipping file");
          pipeline.log(Some(STEP_EXTRACT), format!("skipped file {file_id}: {msg}"));
        }
        Err(e) => return Err(e),
      }
    }
    Ok((true, pipeline))
  }
}
