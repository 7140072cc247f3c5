//! `MemoryDb`: the tag-filtered vector-store abstraction (spec.md §4.3).
//!
//! Two implementations are provided: [`LanceMemoryDb`], an embedded
//! on-disk store backed by LanceDB/Arrow (grounded on this workspace's
//! original LanceDB integration), and [`InMemoryMemoryDb`], a reference
//! implementation with identical filter/scoring semantics used by tests
//! and the `memory` backend kind in configuration.
//!
//! Embedding query text into a vector is the caller's responsibility —
//! this crate never depends on `embedding`, so `get_similar_list` takes an
//! already-embedded query vector rather than raw text.

use arrow_array::{Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::TryStreamExt;
use kmem_core::{Error, FilterSet, MemoryRecord, Payload, Result, ScoredRecord, TagCollection, cosine_similarity};
use lancedb::query::{ExecutableQuery, QueryBase};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Tag-filtered vector store: per-index upsert, cosine-similarity top-K,
/// filtered list, delete.
#[async_trait]
pub trait MemoryDb: Send + Sync {
  /// Idempotent; errors with `IndexSchemaConflict` if `name` already
  /// exists with a different vector size.
  async fn create_index(&self, name: &str, vector_size: usize) -> Result<()>;

  async fn get_indexes(&self) -> Result<Vec<String>>;

  /// Removes `name` and every record in it.
  async fn delete_index(&self, name: &str) -> Result<()>;

  /// Insert-or-overwrite by `record.id`; durable before returning.
  async fn upsert(&self, index: &str, record: MemoryRecord) -> Result<()>;

  /// Idempotent on a missing id.
  async fn delete(&self, index: &str, id: &str) -> Result<()>;

  /// Top-`limit` records by descending true cosine similarity to
  /// `query_vector`, dropping those scoring below `min_relevance`.
  /// `IndexNotFound` on a missing index returns an empty list rather than
  /// an error — retrieval before ingestion should find nothing, not fail.
  async fn get_similar_list(
    &self,
    index: &str,
    query_vector: &[f32],
    filters: &FilterSet,
    min_relevance: f32,
    limit: usize,
    with_embeddings: bool,
  ) -> Result<Vec<ScoredRecord>>;

  /// Same semantics as [`MemoryDb::get_similar_list`] without ranking.
  async fn get_list(&self, index: &str, filters: &FilterSet, limit: usize, with_embeddings: bool) -> Result<Vec<MemoryRecord>>;
}

fn record_schema(vector_dim: usize) -> Arc<Schema> {
  Arc::new(Schema::new(vec![
    Field::new("id", DataType::Utf8, false),
    Field::new("tags", DataType::Utf8, false),
    Field::new("payload", DataType::Utf8, false),
    Field::new(
      "vector",
      DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), vector_dim as i32),
      true,
    ),
  ]))
}

fn vector_dim_of(schema: &Schema) -> Option<usize> {
  schema.field_with_name("vector").ok().and_then(|f| match f.data_type() {
    DataType::FixedSizeList(_, len) => Some(*len as usize),
    _ => None,
  })
}

fn record_to_batch(record: &MemoryRecord, vector_dim: usize) -> Result<RecordBatch> {
  let id = StringArray::from(vec![record.id.clone()]);
  let tags = StringArray::from(vec![
    serde_json::to_string(&record.tags).map_err(Error::Serialization)?,
  ]);
  let payload = StringArray::from(vec![
    serde_json::to_string(&record.payload).map_err(Error::Serialization)?,
  ]);

  let mut vector = record.vector.clone();
  vector.resize(vector_dim, 0.0);
  let item_field = Arc::new(Field::new("item", DataType::Float32, true));
  let vector_list = FixedSizeListArray::try_new(item_field, vector_dim as i32, Arc::new(Float32Array::from(vector)), None)
    .map_err(|e| Error::PermanentBackend(e.to_string()))?;

  RecordBatch::try_new(
    record_schema(vector_dim),
    vec![Arc::new(id), Arc::new(tags), Arc::new(payload), Arc::new(vector_list)],
  )
  .map_err(|e| Error::PermanentBackend(e.to_string()))
}

fn batch_to_record(batch: &RecordBatch, row: usize) -> Result<MemoryRecord> {
  let get_string = |name: &str| -> Result<String> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<StringArray>())
      .map(|a| a.value(row).to_string())
      .ok_or_else(|| Error::PermanentBackend(format!("missing column {name}")))
  };

  let id = get_string("id")?;
  let tags_json = get_string("tags")?;
  let payload_json = get_string("payload")?;
  let tags: TagCollection = serde_json::from_str(&tags_json).map_err(Error::Serialization)?;
  let payload: Payload = serde_json::from_str(&payload_json).map_err(Error::Serialization)?;

  let vector = batch
    .column_by_name("vector")
    .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
    .map(|list| {
      let values = list.value(row);
      values
        .as_any()
        .downcast_ref::<Float32Array>()
        .map(|a| a.values().to_vec())
        .unwrap_or_default()
    })
    .unwrap_or_default();

  Ok(MemoryRecord::new(id, vector).with_tags(tags).with_payload(payload.upgrade()))
}

fn sql_quote(id: &str) -> String {
  id.replace('\'', "''")
}

/// Embedded on-disk vector store backed by LanceDB, one physical table per
/// logical index (the table name is the index name).
pub struct LanceMemoryDb {
  connection: lancedb::Connection,
}

impl LanceMemoryDb {
  pub async fn open(base_path: &Path) -> Result<Self> {
    if let Some(parent) = base_path.parent() {
      tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| Error::Configuration(format!("cannot create {}: {e}", base_path.display())))?;
    }
    let connection = lancedb::connect(base_path.to_string_lossy().as_ref())
      .execute()
      .await
      .map_err(|e| Error::TransientBackend(e.to_string()))?;
    Ok(Self { connection })
  }

  pub async fn open_default(app_name: &str) -> Result<Self> {
    Self::open(&default_base_path(app_name)).await
  }

  async fn table_names(&self) -> Result<Vec<String>> {
    self
      .connection
      .table_names()
      .execute()
      .await
      .map_err(|e| Error::TransientBackend(e.to_string()))
  }

  async fn open_table(&self, index: &str) -> Result<Option<lancedb::Table>> {
    if !self.table_names().await?.contains(&index.to_string()) {
      return Ok(None);
    }
    Ok(Some(
      self
        .connection
        .open_table(index)
        .execute()
        .await
        .map_err(|e| Error::TransientBackend(e.to_string()))?,
    ))
  }
}

pub fn default_base_path(app_name: &str) -> PathBuf {
  if let Ok(dir) = std::env::var("KMEM_DATA_DIR") {
    return PathBuf::from(dir).join("vectors");
  }
  if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
    return PathBuf::from(xdg).join(app_name).join("vectors");
  }
  dirs::data_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join(app_name)
    .join("vectors")
}

#[async_trait]
impl MemoryDb for LanceMemoryDb {
  async fn create_index(&self, name: &str, vector_size: usize) -> Result<()> {
    if let Some(table) = self.open_table(name).await? {
      let schema = table
        .schema()
        .await
        .map_err(|e| Error::TransientBackend(e.to_string()))?;
      let existing = vector_dim_of(&schema).unwrap_or(vector_size);
      if existing != vector_size {
        return Err(Error::IndexSchemaConflict {
          index: name.to_string(),
          expected: existing,
          actual: vector_size,
        });
      }
      return Ok(());
    }
    debug!(index = name, vector_size, "creating memory index");
    self
      .connection
      .create_empty_table(name, record_schema(vector_size))
      .execute()
      .await
      .map_err(|e| Error::TransientBackend(e.to_string()))?;
    Ok(())
  }

  async fn get_indexes(&self) -> Result<Vec<String>> {
    self.table_names().await
  }

  async fn delete_index(&self, name: &str) -> Result<()> {
    if self.open_table(name).await?.is_none() {
      return Ok(());
    }
    self
      .connection
      .drop_table(name)
      .await
      .map_err(|e| Error::TransientBackend(e.to_string()))
  }

  async fn upsert(&self, index: &str, record: MemoryRecord) -> Result<()> {
    let table = self
      .open_table(index)
      .await?
      .ok_or_else(|| Error::IndexNotFound(index.to_string()))?;

    let schema = table
      .schema()
      .await
      .map_err(|e| Error::TransientBackend(e.to_string()))?;
    let vector_dim = vector_dim_of(&schema).unwrap_or(record.vector.len());
    if !record.vector.is_empty() && record.vector.len() != vector_dim {
      return Err(Error::IndexSchemaConflict {
        index: index.to_string(),
        expected: vector_dim,
        actual: record.vector.len(),
      });
    }

    let _ = table.delete(&format!("id = '{}'", sql_quote(&record.id))).await;

    let batch = record_to_batch(&record, vector_dim)?;
    let batches = RecordBatchIterator::new(vec![Ok(batch)], record_schema(vector_dim));
    table
      .add(Box::new(batches))
      .execute()
      .await
      .map_err(|e| Error::TransientBackend(e.to_string()))?;
    Ok(())
  }

  async fn delete(&self, index: &str, id: &str) -> Result<()> {
    let Some(table) = self.open_table(index).await? else {
      return Ok(());
    };
    table
      .delete(&format!("id = '{}'", sql_quote(id)))
      .await
      .map_err(|e| Error::TransientBackend(e.to_string()))
  }

  async fn get_similar_list(
    &self,
    index: &str,
    query_vector: &[f32],
    filters: &FilterSet,
    min_relevance: f32,
    limit: usize,
    with_embeddings: bool,
  ) -> Result<Vec<ScoredRecord>> {
    let Some(table) = self.open_table(index).await? else {
      return Ok(Vec::new());
    };

    // Filters are evaluated in-process against decoded tags rather than
    // pushed down as SQL, so oversample generously before filtering and
    // ranking — this trades some backend efficiency for not having to
    // encode each tag key as its own indexed column.
    let oversampled = limit.saturating_mul(8).max(64);
    let results: Vec<RecordBatch> = table
      .vector_search(query_vector.to_vec())
      .map_err(|e| Error::TransientBackend(e.to_string()))?
      .limit(oversampled)
      .execute()
      .await
      .map_err(|e| Error::TransientBackend(e.to_string()))?
      .try_collect()
      .await
      .map_err(|e| Error::TransientBackend(e.to_string()))?;

    let mut scored = Vec::new();
    for batch in &results {
      for row in 0..batch.num_rows() {
        let mut record = batch_to_record(batch, row)?;
        if !filters.matches(&record.tags) {
          continue;
        }
        let score = cosine_similarity(query_vector, &record.vector);
        if score < min_relevance {
          continue;
        }
        if !with_embeddings {
          record.vector.clear();
        }
        scored.push(ScoredRecord { record, score });
      }
    }
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(limit);
    Ok(scored)
  }

  async fn get_list(&self, index: &str, filters: &FilterSet, limit: usize, with_embeddings: bool) -> Result<Vec<MemoryRecord>> {
    let Some(table) = self.open_table(index).await? else {
      return Ok(Vec::new());
    };

    let results: Vec<RecordBatch> = table
      .query()
      .execute()
      .await
      .map_err(|e| Error::TransientBackend(e.to_string()))?
      .try_collect()
      .await
      .map_err(|e| Error::TransientBackend(e.to_string()))?;

    let mut records = Vec::new();
    for batch in &results {
      for row in 0..batch.num_rows() {
        if records.len() >= limit {
          break;
        }
        let mut record = batch_to_record(batch, row)?;
        if !filters.matches(&record.tags) {
          continue;
        }
        if !with_embeddings {
          record.vector.clear();
        }
        records.push(record);
      }
    }
    Ok(records)
  }
}

struct InMemoryIndex {
  vector_size: usize,
  records: std::collections::BTreeMap<String, MemoryRecord>,
}

/// Reference `MemoryDb` used by tests and the `memory` backend kind — no
/// filesystem, no external process, same filter/scoring semantics as
/// [`LanceMemoryDb`].
#[derive(Default)]
pub struct InMemoryMemoryDb {
  indexes: DashMap<String, Mutex<InMemoryIndex>>,
}

impl InMemoryMemoryDb {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl MemoryDb for InMemoryMemoryDb {
  async fn create_index(&self, name: &str, vector_size: usize) -> Result<()> {
    if let Some(existing) = self.indexes.get(name) {
      let existing = existing.lock().await;
      if existing.vector_size != vector_size {
        return Err(Error::IndexSchemaConflict {
          index: name.to_string(),
          expected: existing.vector_size,
          actual: vector_size,
        });
      }
      return Ok(());
    }
    self.indexes.insert(
      name.to_string(),
      Mutex::new(InMemoryIndex {
        vector_size,
        records: std::collections::BTreeMap::new(),
      }),
    );
    Ok(())
  }

  async fn get_indexes(&self) -> Result<Vec<String>> {
    Ok(self.indexes.iter().map(|e| e.key().clone()).collect())
  }

  async fn delete_index(&self, name: &str) -> Result<()> {
    self.indexes.remove(name);
    Ok(())
  }

  async fn upsert(&self, index: &str, record: MemoryRecord) -> Result<()> {
    let entry = self
      .indexes
      .get(index)
      .ok_or_else(|| Error::IndexNotFound(index.to_string()))?;
    let mut state = entry.lock().await;
    if !record.vector.is_empty() && record.vector.len() != state.vector_size {
      return Err(Error::IndexSchemaConflict {
        index: index.to_string(),
        expected: state.vector_size,
        actual: record.vector.len(),
      });
    }
    state.records.insert(record.id.clone(), record);
    Ok(())
  }

  async fn delete(&self, index: &str, id: &str) -> Result<()> {
    if let Some(entry) = self.indexes.get(index) {
      entry.lock().await.records.remove(id);
    }
    Ok(())
  }

  async fn get_similar_list(
    &self,
    index: &str,
    query_vector: &[f32],
    filters: &FilterSet,
    min_relevance: f32,
    limit: usize,
    with_embeddings: bool,
  ) -> Result<Vec<ScoredRecord>> {
    let Some(entry) = self.indexes.get(index) else {
      return Ok(Vec::new());
    };
    let state = entry.lock().await;
    let mut scored: Vec<ScoredRecord> = state
      .records
      .values()
      .filter(|r| filters.matches(&r.tags))
      .map(|r| ScoredRecord {
        record: r.clone(),
        score: cosine_similarity(query_vector, &r.vector),
      })
      .filter(|s| s.score >= min_relevance)
      .collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(limit);
    if !with_embeddings {
      for s in &mut scored {
        s.record.vector.clear();
      }
    }
    Ok(scored)
  }

  async fn get_list(&self, index: &str, filters: &FilterSet, limit: usize, with_embeddings: bool) -> Result<Vec<MemoryRecord>> {
    let Some(entry) = self.indexes.get(index) else {
      return Ok(Vec::new());
    };
    let state = entry.lock().await;
    let mut records: Vec<MemoryRecord> = state
      .records
      .values()
      .filter(|r| filters.matches(&r.tags))
      .take(limit)
      .cloned()
      .collect();
    if !with_embeddings {
      for r in &mut records {
        r.vector.clear();
      }
    }
    Ok(records)
  }
}
