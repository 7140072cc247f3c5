pub mod cancellation;
pub mod config;
pub mod error;
pub mod pipeline_state;
pub mod record;
pub mod tags;

pub use cancellation::CancellationToken;
pub use config::{
  AppConfig, ChunkerConfig, EmbeddingConfig, EmbeddingProviderKind, MemoryDbBackend, MemoryDbConfig, PipelineConfig,
  QueueConfig, RetryConfig,
};
pub use error::{Error, Result};
pub use pipeline_state::{
  DataPipeline, FileDetails, GeneratedFile, LogEntry, STEP_DELETE_DOCUMENT, STEP_EXTRACT, STEP_GEN_EMBEDDINGS,
  STEP_PARTITION, STEP_SAVE_RECORDS, STEP_SUMMARIZE, default_steps,
};
pub use record::{CURRENT_SCHEMA_VERSION, MemoryRecord, Payload, ScoredRecord, cosine_similarity, now_rfc3339, parse_timestamp};
pub use tags::{
  FilterSet, TAG_DOCUMENT_ID, TAG_FILE_ID, TAG_LAST_UPDATE, TAG_PART_NUMBER, TAG_SECTION_NUMBER, TAG_SOURCE_NAME,
  TAG_SOURCE_URL, TagCollection, TagFilter,
};
