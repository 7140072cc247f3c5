//! Concrete `StepHandler` implementations for the default pipeline
//! (spec.md §4.4). Each one owns whatever capability it needs (decoder
//! registry, tokenizer, embedding provider, memory db) injected at
//! construction, per `PipelineContext`'s narrow-context design.

mod delete_document;
mod extract;
mod gen_embeddings;
mod partition;
mod save_records;
mod summarize;

pub use delete_document::DeleteDocumentHandler;
pub use extract::ExtractHandler;
pub use gen_embeddings::GenEmbeddingsHandler;
pub use partition::PartitionHandler;
pub use save_records::SaveRecordsHandler;
pub use summarize::{ExtractiveSummaryGenerator, SummarizeHandler, TextGenerator};

/// Two logically distinct sources of `extracted_text` on one file: the
/// primary decoded document, and (if the `summarize` step ran) its
/// summary. Folded into the `section_number` reserved tag so partitions
/// and record ids derived from each never collide (spec.md §9's origin
/// tag design).
pub(crate) const SECTION_MAIN: usize = 0;
pub(crate) const SECTION_SUMMARY: usize = 1;
