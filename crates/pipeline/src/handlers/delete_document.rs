//! `delete_document`: a tag-filter deletion on `MemoryDb` plus removal of
//! the document's `DocumentStorage` directory (spec.md §4.4).
//!
//! `MemoryDb`'s public contract has no bulk-by-filter delete — this handler
//! achieves the same effect by listing every record tagged with this
//! document's id and deleting each by id, which is the natural way to build
//! a "tag-filter deletion" on top of the existing per-id primitive.

use async_trait::async_trait;
use kmem_core::{DataPipeline, Error, FilterSet, Result, TAG_DOCUMENT_ID, TagFilter, STEP_DELETE_DOCUMENT};
use memorydb::MemoryDb;
use std::sync::Arc;

use crate::context::PipelineContext;
use crate::handler::StepHandler;

/// No realistic document produces more partitions than this in one delete
/// pass; raised here rather than paginated since `delete_document` is a
/// single atomic step, not a resumable listing operation.
const DELETE_LIST_LIMIT: usize = 100_000;

pub struct DeleteDocumentHandler {
  memorydb: Arc<dyn MemoryDb>,
}

impl DeleteDocumentHandler {
  pub fn new(memorydb: Arc<dyn MemoryDb>) -> Self {
    Self { memorydb }
  }
}

#[async_trait]
impl StepHandler for DeleteDocumentHandler {
  fn step_name(&self) -> &str {
    STEP_DELETE_DOCUMENT
  }

  async fn invoke(&self, pipeline: DataPipeline, ctx: &PipelineContext) -> Result<(bool, DataPipeline)> {
    if ctx.is_cancelled() {
      return Err(Error::Cancelled);
    }

    let filters = FilterSet::from_filters([TagFilter::new().with(TAG_DOCUMENT_ID, &pipeline.document_id)]);
    let records = self.memorydb.get_list(&pipeline.index, &filters, DELETE_LIST_LIMIT, false).await?;
    for record in records {
      self.memorydb.delete(&pipeline.index, &record.id).await?;
    }

    ctx.docstore.delete_document(&pipeline.index, &pipeline.document_id).await?;
    Ok((true, pipeline))
  }
}
