//! `save_records`: upsert one `MemoryRecord` per (partition, embedding)
//! pair into `MemoryDb` (spec.md §4.4).
//!
//! Unlike the earlier steps this handler writes no `GeneratedFile` marker:
//! re-running it always re-upserts the same deterministic record ids, and
//! `MemoryDb::upsert` is itself insert-or-overwrite, so the step is already
//! idempotent without needing its own bookkeeping.

use async_trait::async_trait;
use kmem_core::{DataPipeline, Error, MemoryRecord, Payload, Result, STEP_SAVE_RECORDS};
use memorydb::MemoryDb;
use std::sync::Arc;

use super::gen_embeddings::EmbeddingArtifact;
use super::{SECTION_MAIN, SECTION_SUMMARY};
use crate::context::PipelineContext;
use crate::handler::StepHandler;

pub struct SaveRecordsHandler {
  memorydb: Arc<dyn MemoryDb>,
}

impl SaveRecordsHandler {
  pub fn new(memorydb: Arc<dyn MemoryDb>) -> Self {
    Self { memorydb }
  }
}

/// A partition artifact's id ends `-text-part{n}` (main extraction) or
/// `-summary-part{n}` (the `summarize` step's output). The section number
/// keeps their record ids and origin tags distinct even when both land on
/// the same `part_number`.
fn section_number(partition_id: &str) -> usize {
  if partition_id.contains("-summary-part") {
    SECTION_SUMMARY
  } else {
    SECTION_MAIN
  }
}

#[async_trait]
impl StepHandler for SaveRecordsHandler {
  fn step_name(&self) -> &str {
    STEP_SAVE_RECORDS
  }

  async fn invoke(&self, pipeline: DataPipeline, ctx: &PipelineContext) -> Result<(bool, DataPipeline)> {
    for file in &pipeline.files {
      if ctx.is_cancelled() {
        return Err(Error::Cancelled);
      }

      let partitions: Vec<_> = file.generated_of_type("text_partition").collect();
      for partition in partitions {
        let Some(embedding_generated) = file.generated_of_type("embedding").find(|g| g.id == format!("{}-embedding", partition.id)) else {
          continue; // embedding not yet generated for this partition
        };

        let partition_bytes = ctx.docstore.read_file(&pipeline.index, &pipeline.document_id, &partition.name).await?;
        let text =
          String::from_utf8(partition_bytes).map_err(|e| Error::Content(format!("partition artifact is not valid UTF-8: {e}")))?;

        let embedding_bytes = ctx.docstore.read_file(&pipeline.index, &pipeline.document_id, &embedding_generated.name).await?;
        let artifact: EmbeddingArtifact = serde_json::from_slice(&embedding_bytes)?;

        if artifact.vector.len() != artifact.dimensions {
          return Err(Error::Configuration("embedding artifact dimensions do not match its stored vector length".to_string()));
        }
        self.memorydb.create_index(&pipeline.index, artifact.dimensions).await?;

        let part_number = partition.part_number.unwrap_or(0);
        let section = section_number(&partition.id);
        let record_id = MemoryRecord::deterministic_id(&pipeline.document_id, &partition.id, part_number, &artifact.model);

        let now = kmem_core::now_rfc3339();
        let source_url = pipeline.tags.values(kmem_core::TAG_SOURCE_URL).first().map(String::as_str);
        let mut tags = MemoryRecord::origin_tags(&pipeline.document_id, &file.id, part_number, section, &file.name, source_url, &now);
        tags.extend(&pipeline.tags);

        let payload = Payload::new()
          .set("text", text)
          .set("source", file.name.clone())
          .set("timestamp", now)
          .upgrade();

        let record = MemoryRecord::new(record_id, artifact.vector).with_tags(tags).with_payload(payload);
        self.memorydb.upsert(&pipeline.index, record).await?;
      }
    }
    Ok((true, pipeline))
  }
}
