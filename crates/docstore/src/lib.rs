//! Blob-like storage for raw source files and pipeline artifacts, keyed by
//! `(index, documentId, filename)`.

use async_trait::async_trait;
use kmem_core::{DataPipeline, Error, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// The reserved filename under which a pipeline's status is persisted.
pub const STATUS_FILE: &str = "status.json";

/// Blob-like key/value store for raw files and pipeline artifacts.
///
/// Implementations must be safe to call concurrently from multiple handlers
/// working on different documents; they need not serialize writes to the
/// same file (handlers are expected to be the only writer of their own
/// artifacts).
#[async_trait]
pub trait DocumentStorage: Send + Sync {
  /// Write `contents` under `(index, document_id, filename)`, creating any
  /// intermediate directories. Overwrites an existing file of the same key.
  async fn write_file(&self, index: &str, document_id: &str, filename: &str, contents: &[u8]) -> Result<()>;

  /// Read the full contents of a file. Returns `Error::Content` if it does
  /// not exist.
  async fn read_file(&self, index: &str, document_id: &str, filename: &str) -> Result<Vec<u8>>;

  async fn file_exists(&self, index: &str, document_id: &str, filename: &str) -> Result<bool>;

  /// List filenames present under a document's directory, in no particular
  /// order.
  async fn list_files(&self, index: &str, document_id: &str) -> Result<Vec<String>>;

  /// Remove a single file.
  async fn delete_file(&self, index: &str, document_id: &str, filename: &str) -> Result<()>;

  /// Remove a document's entire directory, including `status.json` and all
  /// generated artifacts. Used by the `delete_document` handler.
  async fn delete_document(&self, index: &str, document_id: &str) -> Result<()>;

  /// Persist the pipeline's current state under `status.json`.
  async fn write_pipeline_status(&self, pipeline: &DataPipeline) -> Result<()>;

  /// Reload a persisted pipeline, or `None` if it has never been written or
  /// has already been cleaned up.
  async fn read_pipeline_status(&self, index: &str, document_id: &str) -> Result<Option<DataPipeline>>;

  /// List every index name with at least one document directory. Used at
  /// startup to discover pipelines to resume (spec.md §4.1).
  async fn list_indexes(&self) -> Result<Vec<String>>;

  /// List every document id with a persisted `status.json` under `index`.
  async fn list_documents(&self, index: &str) -> Result<Vec<String>>;
}

/// Filesystem-backed `DocumentStorage`, rooted at a single base directory.
///
/// Layout: `<root>/<index>/<document_id>/<filename>`, with the pipeline's
/// persisted state at `<root>/<index>/<document_id>/status.json`.
#[derive(Debug, Clone)]
pub struct FsDocumentStorage {
  root: PathBuf,
}

impl FsDocumentStorage {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  fn document_dir(&self, index: &str, document_id: &str) -> PathBuf {
    self.root.join(index).join(document_id)
  }

  fn file_path(&self, index: &str, document_id: &str, filename: &str) -> PathBuf {
    self.document_dir(index, document_id).join(filename)
  }
}

#[async_trait]
impl DocumentStorage for FsDocumentStorage {
  async fn write_file(&self, index: &str, document_id: &str, filename: &str, contents: &[u8]) -> Result<()> {
    let path = self.file_path(index, document_id, filename);
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, contents).await?;
    debug!(index, document_id, filename, bytes = contents.len(), "wrote artifact");
    Ok(())
  }

  async fn read_file(&self, index: &str, document_id: &str, filename: &str) -> Result<Vec<u8>> {
    let path = self.file_path(index, document_id, filename);
    tokio::fs::read(&path)
      .await
      .map_err(|e| Error::Content(format!("reading {}: {e}", path.display())))
  }

  async fn file_exists(&self, index: &str, document_id: &str, filename: &str) -> Result<bool> {
    Ok(tokio::fs::try_exists(self.file_path(index, document_id, filename)).await?)
  }

  async fn list_files(&self, index: &str, document_id: &str) -> Result<Vec<String>> {
    let dir = self.document_dir(index, document_id);
    if !dir.exists() {
      return Ok(Vec::new());
    }
    let mut entries = tokio::fs::read_dir(&dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
      if entry.file_type().await?.is_file()
        && let Some(name) = entry.file_name().to_str()
        && name != STATUS_FILE
      {
        names.push(name.to_string());
      }
    }
    Ok(names)
  }

  async fn delete_file(&self, index: &str, document_id: &str, filename: &str) -> Result<()> {
    let path = self.file_path(index, document_id, filename);
    match tokio::fs::remove_file(&path).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }

  async fn delete_document(&self, index: &str, document_id: &str) -> Result<()> {
    let dir = self.document_dir(index, document_id);
    match tokio::fs::remove_dir_all(&dir).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }

  async fn write_pipeline_status(&self, pipeline: &DataPipeline) -> Result<()> {
    let json = serde_json::to_vec_pretty(pipeline)?;
    self.write_file(&pipeline.index, &pipeline.document_id, STATUS_FILE, &json).await
  }

  async fn read_pipeline_status(&self, index: &str, document_id: &str) -> Result<Option<DataPipeline>> {
    if !self.file_exists(index, document_id, STATUS_FILE).await? {
      return Ok(None);
    }
    let bytes = self.read_file(index, document_id, STATUS_FILE).await?;
    Ok(Some(serde_json::from_slice(&bytes)?))
  }

  async fn list_indexes(&self) -> Result<Vec<String>> {
    if !self.root.exists() {
      return Ok(Vec::new());
    }
    let mut entries = tokio::fs::read_dir(&self.root).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
      if entry.file_type().await?.is_dir()
        && let Some(name) = entry.file_name().to_str()
      {
        names.push(name.to_string());
      }
    }
    Ok(names)
  }

  async fn list_documents(&self, index: &str) -> Result<Vec<String>> {
    let dir = self.root.join(index);
    if !dir.exists() {
      return Ok(Vec::new());
    }
    let mut entries = tokio::fs::read_dir(&dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
      if entry.file_type().await?.is_dir()
        && let Some(name) = entry.file_name().to_str()
      {
        names.push(name.to_string());
      }
    }
    Ok(names)
  }
}

/// Default storage root, following the same `XDG_DATA_HOME` >
/// `dirs::data_dir()` precedence used elsewhere in this workspace.
pub fn default_storage_root(app_name: &str) -> PathBuf {
  if let Ok(path) = std::env::var("XDG_DATA_HOME") {
    return PathBuf::from(path).join(app_name);
  }
  dirs::data_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join(app_name)
}

#[cfg(test)]
mod tests {
  use super::*;
  use kmem_core::TagCollection;
  use tempfile::TempDir;

  fn storage() -> (TempDir, FsDocumentStorage) {
    let dir = TempDir::new().unwrap();
    let storage = FsDocumentStorage::new(dir.path());
    (dir, storage)
  }

  #[tokio::test]
  async fn write_then_read_roundtrips() {
    let (_dir, storage) = storage();
    storage.write_file("idx1", "doc1", "raw.txt", b"hello world").await.unwrap();
    let contents = storage.read_file("idx1", "doc1", "raw.txt").await.unwrap();
    assert_eq!(contents, b"hello world");
  }

  #[tokio::test]
  async fn read_missing_file_is_content_error() {
    let (_dir, storage) = storage();
    let err = storage.read_file("idx1", "doc1", "missing.txt").await.unwrap_err();
    assert!(matches!(err, Error::Content(_)));
  }

  #[tokio::test]
  async fn list_files_excludes_status_json() {
    let (_dir, storage) = storage();
    storage.write_file("idx1", "doc1", "a.txt", b"a").await.unwrap();
    storage.write_file("idx1", "doc1", "b.txt", b"b").await.unwrap();
    let pipeline = DataPipeline::new("idx1", "doc1", TagCollection::new());
    storage.write_pipeline_status(&pipeline).await.unwrap();

    let mut names = storage.list_files("idx1", "doc1").await.unwrap();
    names.sort();
    assert_eq!(names, vec!["a.txt", "b.txt"]);
  }

  #[tokio::test]
  async fn pipeline_status_roundtrips() {
    let (_dir, storage) = storage();
    let mut pipeline = DataPipeline::new("idx1", "doc1", TagCollection::new());
    pipeline.then("extract").then("partition");

    storage.write_pipeline_status(&pipeline).await.unwrap();
    let loaded = storage.read_pipeline_status("idx1", "doc1").await.unwrap().unwrap();
    assert_eq!(loaded.steps, pipeline.steps);
    assert_eq!(loaded.execution_id, pipeline.execution_id);
  }

  #[tokio::test]
  async fn missing_pipeline_status_is_none() {
    let (_dir, storage) = storage();
    assert!(storage.read_pipeline_status("idx1", "doc1").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn delete_document_removes_entire_directory() {
    let (_dir, storage) = storage();
    storage.write_file("idx1", "doc1", "a.txt", b"a").await.unwrap();
    storage.delete_document("idx1", "doc1").await.unwrap();
    assert!(!storage.file_exists("idx1", "doc1", "a.txt").await.unwrap());
  }

  #[tokio::test]
  async fn delete_document_is_idempotent() {
    let (_dir, storage) = storage();
    storage.delete_document("idx1", "nonexistent").await.unwrap();
  }

  #[tokio::test]
  async fn list_indexes_and_documents_reflect_written_pipelines() {
    let (_dir, storage) = storage();
    assert!(storage.list_indexes().await.unwrap().is_empty());

    let p1 = DataPipeline::new("idx1", "doc1", TagCollection::new());
    let p2 = DataPipeline::new("idx1", "doc2", TagCollection::new());
    let p3 = DataPipeline::new("idx2", "doc3", TagCollection::new());
    storage.write_pipeline_status(&p1).await.unwrap();
    storage.write_pipeline_status(&p2).await.unwrap();
    storage.write_pipeline_status(&p3).await.unwrap();

    let mut indexes = storage.list_indexes().await.unwrap();
    indexes.sort();
    assert_eq!(indexes, vec!["idx1", "idx2"]);

    let mut docs = storage.list_documents("idx1").await.unwrap();
    docs.sort();
    assert_eq!(docs, vec!["doc1", "doc2"]);
  }

  #[tokio::test]
  async fn list_documents_for_unknown_index_is_empty() {
    let (_dir, storage) = storage();
    assert!(storage.list_documents("nope").await.unwrap().is_empty());
  }
}
