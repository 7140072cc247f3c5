//! `PipelineOrchestrator` and its default step handlers (spec.md §4.1, §4.4):
//! the ingestion engine that turns an uploaded document into embedded,
//! searchable `MemoryRecord`s.

pub mod context;
pub mod handler;
pub mod handlers;
pub mod orchestrator;

pub use context::{embedding_artifact_name, extracted_text_artifact_name, partition_artifact_name, raw_artifact_name, PipelineContext};
pub use handler::{HandlerRegistry, StepHandler};
pub use handlers::{
  DeleteDocumentHandler, ExtractHandler, ExtractiveSummaryGenerator, GenEmbeddingsHandler, PartitionHandler,
  SaveRecordsHandler, SummarizeHandler, TextGenerator,
};
pub use orchestrator::{PipelineOrchestrator, PipelineSummary, UploadFile};

use std::sync::Arc;

/// Registers the four default steps (`extract`, `partition`,
/// `gen_embeddings`, `save_records`) plus the optional `summarize` and
/// `delete_document` handlers on a freshly constructed orchestrator
/// (spec.md §3's default pipeline, §4.4's optional summarize step).
pub fn register_default_handlers(
  orchestrator: &PipelineOrchestrator,
  decoders: Arc<decoder::DecoderRegistry>,
  tokenizer: Arc<dyn tokenizer::Tokenizer>,
  chunker_config: &kmem_core::ChunkerConfig,
  embedding_provider: Arc<dyn embedding::EmbeddingProvider>,
  memorydb: Arc<dyn memorydb::MemoryDb>,
  summary_generator: Arc<dyn TextGenerator>,
) {
  orchestrator.add_handler(Arc::new(ExtractHandler::new(decoders)));
  orchestrator.add_handler(Arc::new(PartitionHandler::new(
    chunker_config.max_tokens_per_chunk,
    chunker_config.overlap_tokens,
    tokenizer,
  )));
  orchestrator.add_handler(Arc::new(GenEmbeddingsHandler::new(embedding_provider)));
  orchestrator.add_handler(Arc::new(SaveRecordsHandler::new(Arc::clone(&memorydb))));
  orchestrator.add_handler(Arc::new(SummarizeHandler::new(summary_generator)));
  orchestrator.add_handler(Arc::new(DeleteDocumentHandler::new(memorydb)));
}
