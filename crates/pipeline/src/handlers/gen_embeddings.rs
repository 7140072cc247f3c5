//! `gen_embeddings`: embed every `text_partition` artifact (spec.md §4.4).
//!
//! Provider failures surface as `Error::TransientBackend` regardless of the
//! underlying `EmbeddingError` variant — retry/backoff for the HTTP call
//! itself already happened inside `embedding::ResilientProvider`; a failure
//! that reaches this handler means the provider is still unavailable after
//! its own retries, which is the step's cue to fail and let the orchestrator
//! redeliver at the pipeline level.

use async_trait::async_trait;
use embedding::EmbeddingProvider;
use kmem_core::{DataPipeline, Error, GeneratedFile, Result, STEP_GEN_EMBEDDINGS};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::context::{embedding_artifact_name, embedding_id, PipelineContext};
use crate::handler::StepHandler;

#[derive(Debug, Serialize, Deserialize)]
pub struct EmbeddingArtifact {
  pub model: String,
  pub dimensions: usize,
  pub vector: Vec<f32>,
}

pub struct GenEmbeddingsHandler {
  provider: Arc<dyn EmbeddingProvider>,
}

impl GenEmbeddingsHandler {
  pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
    Self { provider }
  }
}

#[async_trait]
impl StepHandler for GenEmbeddingsHandler {
  fn step_name(&self) -> &str {
    STEP_GEN_EMBEDDINGS
  }

  async fn invoke(&self, mut pipeline: DataPipeline, ctx: &PipelineContext) -> Result<(bool, DataPipeline)> {
    for file_index in 0..pipeline.files.len() {
      if ctx.is_cancelled() {
        return Err(Error::Cancelled);
      }

      let partitions: Vec<(String, String)> = pipeline.files[file_index]
        .generated_of_type("text_partition")
        .map(|g| (g.id.clone(), g.name.clone()))
        .collect();

      for (partition_id, partition_name) in partitions {
        let out_id = embedding_id(&partition_id);
        if pipeline.files[file_index].generated_files.iter().any(|g| g.id == out_id) {
          continue; // already embedded — idempotent re-run
        }

        let bytes = ctx.docstore.read_file(&pipeline.index, &pipeline.document_id, &partition_name).await?;
        let text = String::from_utf8(bytes).map_err(|e| Error::Content(format!("partition artifact is not valid UTF-8: {e}")))?;

        let vector = self
          .provider
          .embed(&text)
          .await
          .map_err(|e| Error::TransientBackend(format!("embedding provider: {e}")))?;

        let artifact = EmbeddingArtifact {
          model: self.provider.model_id().to_string(),
          dimensions: self.provider.dimensions(),
          vector,
        };
        let body = serde_json::to_vec(&artifact)?;
        let name = embedding_artifact_name(&partition_id);
        ctx.docstore.write_file(&pipeline.index, &pipeline.document_id, &name, &body).await?;
        pipeline.files[file_index].put_generated(
          GeneratedFile::new(out_id, name, "embedding")
            .with_mime_type("application/json")
            .with_size(body.len() as u64),
        );
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

  struct StubProvider;

  #[async_trait]
  impl EmbeddingProvider for StubProvider {
    fn name(&self) -> &str {
      "stub"
    }
    fn model_id(&self) -> &str {
      "stub-model"
    }
    fn dimensions(&self) -> usize {
      3
    }
    async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, embedding::EmbeddingError> {
      Ok(vec![0.1, 0.2, 0.3])
    }
    async fn embed_batch(&self, texts: &[&str]) -> std::result::Result<Vec<Vec<f32>>, embedding::EmbeddingError> {
      Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3]).collect())
    }
    async fn is_available(&self) -> bool {
      true
    }
  }

  async fn ctx() -> (tempfile::TempDir, PipelineContext) {
    let dir = tempfile::tempdir().unwrap();
    let docstore: Arc<dyn DocumentStorage> = Arc::new(FsDocumentStorage::new(dir.path()));
    (dir, PipelineContext::new(docstore, CancellationToken::new()))
  }

  #[tokio::test]
  async fn embeds_each_partition() {
    let (_dir, ctx) = ctx().await;
    ctx.docstore.write_file("idx", "doc1", "f1-text-part0000.txt", b"hello").await.unwrap();

    let mut pipeline = DataPipeline::new("idx", "doc1", TagCollection::new());
    let mut file = FileDetails::new("f1", "a.txt", 5, "text/plain");
    file.put_generated(CoreGeneratedFile::new("f1-text-part0000", "f1-text-part0000.txt", "text_partition").with_part_number(0));
    pipeline.files.push(file);

    let handler = GenEmbeddingsHandler::new(Arc::new(StubProvider));
    let (ok, pipeline) = handler.invoke(pipeline, &ctx).await.unwrap();
    assert!(ok);
    assert_eq!(pipeline.files[0].generated_of_type("embedding").count(), 1);
  }
}
