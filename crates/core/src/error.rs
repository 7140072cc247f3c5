use thiserror::Error;

/// Error taxonomy shared by every crate in the workspace.
///
/// Variants correspond to the error *kinds* of the ingestion/query design,
/// not to a specific backend's exception type: a vector-store I/O failure
/// and a queue-transport failure both surface as `TransientBackend` once
/// they cross a handler boundary.
#[derive(Error, Debug)]
pub enum Error {
  #[error("configuration error: {0}")]
  Configuration(String),

  #[error("input error: {0}")]
  Input(String),

  #[error("index not found: {0}")]
  IndexNotFound(String),

  #[error("index schema conflict: index {index} expects vector size {expected}, got {actual}")]
  IndexSchemaConflict {
    index: String,
    expected: usize,
    actual: usize,
  },

  #[error("transient backend error: {0}")]
  TransientBackend(String),

  #[error("permanent backend error: {0}")]
  PermanentBackend(String),

  #[error("content error: {0}")]
  Content(String),

  #[error("cancelled")]
  Cancelled,

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Whether the enclosing step should retry locally before giving up.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Error::TransientBackend(_))
  }

  /// Whether the pipeline should be marked failed without further retries.
  pub fn is_permanent(&self) -> bool {
    matches!(
      self,
      Error::PermanentBackend(_) | Error::Configuration(_) | Error::Input(_) | Error::IndexSchemaConflict { .. }
    )
  }
}

pub type Result<T> = std::result::Result<T, Error>;
