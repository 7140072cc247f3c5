//! Request router implementing spec.md §6's external interfaces
//! (`importDocument`, `importText`, `importWebPage`, `search`, `ask`,
//! `list`, `delete`, `status`) behind a JSON-RPC-shaped request/response
//! pair, transport-agnostic (the Unix-socket line protocol lives in
//! [`crate::server`]).

use base64::Engine;
use decoder::correct_mime_type;
use kmem_core::{CancellationToken, Error, FilterSet, TAG_SOURCE_URL, TagCollection, TagFilter};
use memorydb::MemoryDb;
use pipeline::{PipelineOrchestrator, UploadFile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::server::ShutdownHandle;
use embedding::EmbeddingProvider;

/// JSON-RPC style request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
  #[serde(default)]
  pub id: Option<serde_json::Value>,
  pub method: String,
  #[serde(default)]
  pub params: serde_json::Value,
}

/// JSON-RPC style response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<serde_json::Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub result: Option<serde_json::Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
  pub code: i32,
  pub message: String,
}

impl Response {
  pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
    Self {
      id,
      result: Some(result),
      error: None,
    }
  }

  pub fn error(id: Option<serde_json::Value>, code: i32, message: &str) -> Self {
    Self {
      id,
      result: None,
      error: Some(RpcError {
        code,
        message: message.to_string(),
      }),
    }
  }
}

/// JSON-RPC error codes used by [`Router`], distinct from the exit codes the
/// CLI maps errors to (spec.md §6).
mod codes {
  pub const PARSE_ERROR: i32 = -32700;
  pub const METHOD_NOT_FOUND: i32 = -32601;
  pub const INVALID_PARAMS: i32 = -32602;
  pub const CONFIGURATION: i32 = 1;
  pub const INPUT: i32 = 2;
  pub const NOT_FOUND: i32 = 3;
  pub const TRANSIENT: i32 = 4;
  pub const CANCELLED: i32 = 5;
  pub const INTERNAL: i32 = 6;
}

fn default_index() -> String {
  "default".to_string()
}

#[derive(Debug, Deserialize)]
struct ImportFile {
  name: String,
  mime_type: String,
  /// Base64-encoded file bytes (the JSON-RPC transport carries no
  /// multipart body, unlike the HTTP deployment spec.md §6 describes).
  content_base64: String,
}

#[derive(Debug, Deserialize)]
struct ImportDocumentParams {
  #[serde(default = "default_index")]
  index: String,
  #[serde(default)]
  document_id: Option<String>,
  #[serde(default)]
  tags: BTreeMap<String, Vec<String>>,
  #[serde(default)]
  steps: Option<Vec<String>>,
  files: Vec<ImportFile>,
}

#[derive(Debug, Deserialize)]
struct ImportTextParams {
  #[serde(default = "default_index")]
  index: String,
  #[serde(default)]
  document_id: Option<String>,
  #[serde(default)]
  tags: BTreeMap<String, Vec<String>>,
  text: String,
}

#[derive(Debug, Deserialize)]
struct ImportWebPageParams {
  #[serde(default = "default_index")]
  index: String,
  #[serde(default)]
  document_id: Option<String>,
  #[serde(default)]
  tags: BTreeMap<String, Vec<String>>,
  url: String,
}

#[derive(Debug, Deserialize)]
struct SearchParams {
  #[serde(default = "default_index")]
  index: String,
  query: String,
  #[serde(default)]
  filter: Vec<Vec<(String, String)>>,
  #[serde(default)]
  min_relevance: f32,
  #[serde(default = "default_limit")]
  limit: usize,
}

fn default_limit() -> usize {
  10
}

#[derive(Debug, Deserialize)]
struct AskParams {
  #[serde(default = "default_index")]
  index: String,
  question: String,
  #[serde(default)]
  filter: Vec<Vec<(String, String)>>,
  #[serde(default)]
  min_relevance: f32,
}

#[derive(Debug, Deserialize)]
struct ListParams {
  #[serde(default = "default_index")]
  index: String,
  #[serde(default)]
  filter: Vec<Vec<(String, String)>>,
  #[serde(default = "default_limit")]
  limit: usize,
}

#[derive(Debug, Deserialize)]
struct DocumentParams {
  #[serde(default = "default_index")]
  index: String,
  document_id: String,
}

fn tags_from_map(map: BTreeMap<String, Vec<String>>) -> TagCollection {
  let mut tags = TagCollection::new();
  for (k, vs) in map {
    for v in vs {
      tags.insert(&k, v);
    }
  }
  tags
}

fn filter_set_from_clauses(clauses: Vec<Vec<(String, String)>>) -> FilterSet {
  FilterSet::from_filters(clauses.into_iter().map(|conj| conj.into_iter().fold(TagFilter::new(), |f, (k, v)| f.with(k, v))))
}

fn tags_to_json(tags: &TagCollection) -> serde_json::Value {
  let mut map = serde_json::Map::new();
  for key in tags.keys() {
    map.insert(key.to_string(), serde_json::json!(tags.values(key)));
  }
  serde_json::Value::Object(map)
}

/// One partition returned by `search`/`ask`/`list` (spec.md §6).
#[derive(Debug, Serialize)]
struct PartitionResult {
  text: String,
  relevance: f32,
  last_update: String,
  tags: serde_json::Value,
}

/// One source document's partitions grouped together (spec.md §6's
/// `{results:[{sourceName, link, partitions}]}` response shape).
#[derive(Debug, Serialize)]
struct SourceResult {
  source_name: String,
  link: String,
  partitions: Vec<PartitionResult>,
}

fn group_by_source(records: Vec<(kmem_core::MemoryRecord, f32)>) -> Vec<SourceResult> {
  let mut grouped: Vec<(String, SourceResult)> = Vec::new();
  for (record, score) in records {
    let payload = record.payload.clone().upgrade();
    let document_id = record.document_id().unwrap_or("").to_string();
    let partition = PartitionResult {
      text: payload.get_str("text").unwrap_or("").to_string(),
      relevance: score,
      last_update: payload.get_str("timestamp").unwrap_or("").to_string(),
      tags: tags_to_json(&record.tags),
    };
    if let Some((_, entry)) = grouped.iter_mut().find(|(id, _)| *id == document_id) {
      entry.partitions.push(partition);
    } else {
      grouped.push((
        document_id,
        SourceResult {
          source_name: payload.get_str("source").unwrap_or("").to_string(),
          link: record.tags.values(TAG_SOURCE_URL).first().cloned().unwrap_or_default(),
          partitions: vec![partition],
        },
      ));
    }
  }
  grouped.into_iter().map(|(_, entry)| entry).collect()
}

fn error_to_response(id: Option<serde_json::Value>, err: Error) -> Response {
  let code = match &err {
    Error::Configuration(_) => codes::CONFIGURATION,
    Error::Input(_) => codes::INPUT,
    Error::IndexNotFound(_) | Error::IndexSchemaConflict { .. } => codes::NOT_FOUND,
    Error::TransientBackend(_) => codes::TRANSIENT,
    Error::Cancelled => codes::CANCELLED,
    Error::PermanentBackend(_) | Error::Content(_) | Error::Io(_) | Error::Serialization(_) => codes::INTERNAL,
  };
  Response::error(id, code, &err.to_string())
}

/// Fetches a URL with the retrying HTTP client spec.md §6 describes for
/// `importWebPage`: retries on 408/500/502/504 with backoff sequence
/// `1,1,1,2,2,3,4,5`s, up to 10 attempts.
async fn fetch_web_page(client: &reqwest::Client, url: &str, retry: &kmem_core::RetryConfig) -> Result<(Vec<u8>, String), Error> {
  let mut last_err = String::new();
  for attempt in 0..retry.max_attempts {
    match client.get(url).send().await {
      Ok(response) => {
        let status = response.status().as_u16();
        if response.status().is_success() {
          let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .unwrap_or_else(|| "text/plain".to_string());
          let bytes = response.bytes().await.map_err(|e| Error::TransientBackend(e.to_string()))?;
          return Ok((bytes.to_vec(), content_type));
        }
        if !retry.is_retryable_status(status) {
          return Err(Error::PermanentBackend(format!("fetching {url}: HTTP {status}")));
        }
        last_err = format!("HTTP {status}");
      }
      Err(e) => last_err = e.to_string(),
    }
    tokio::time::sleep(retry.backoff_for_attempt(attempt as usize)).await;
  }
  Err(Error::TransientBackend(format!("fetching {url} failed after {} attempts: {last_err}", retry.max_attempts)))
}

/// Request router for the daemon: every method spec.md §6 names plus
/// `ping`/`health`/`shutdown` for process lifecycle.
pub struct Router {
  orchestrator: Arc<PipelineOrchestrator>,
  memorydb: Arc<dyn MemoryDb>,
  embedding: Arc<dyn EmbeddingProvider>,
  http: reqwest::Client,
  retry: kmem_core::RetryConfig,
  shutdown_handle: Arc<Mutex<Option<ShutdownHandle>>>,
}

impl Router {
  pub fn new(
    orchestrator: Arc<PipelineOrchestrator>,
    memorydb: Arc<dyn MemoryDb>,
    embedding: Arc<dyn EmbeddingProvider>,
    retry: kmem_core::RetryConfig,
  ) -> Self {
    Self {
      orchestrator,
      memorydb,
      embedding,
      http: reqwest::Client::new(),
      retry,
      shutdown_handle: Arc::new(Mutex::new(None)),
    }
  }

  pub async fn set_shutdown_handle(&self, handle: ShutdownHandle) {
    *self.shutdown_handle.lock().await = Some(handle);
  }

  pub async fn handle(&self, request: Request) -> Response {
    debug!(method = %request.method, "handling request");
    let id = request.id.clone();
    match self.dispatch(request).await {
      Ok(result) => Response::success(id, result),
      Err(e) => error_to_response(id, e),
    }
  }

  async fn dispatch(&self, request: Request) -> Result<serde_json::Value, Error> {
    match request.method.as_str() {
      "ping" => Ok(serde_json::json!({"pong": true})),
      "health" => Ok(serde_json::json!({"status": "ok"})),
      "shutdown" => {
        if let Some(handle) = self.shutdown_handle.lock().await.as_ref() {
          handle.shutdown();
        }
        Ok(serde_json::json!({"shutting_down": true}))
      }
      "import_document" => self.import_document(request.params).await,
      "import_text" => self.import_text(request.params).await,
      "import_web_page" => self.import_web_page(request.params).await,
      "search" => self.search(request.params).await,
      "ask" => self.ask(request.params).await,
      "list" => self.list(request.params).await,
      "delete" => self.delete(request.params).await,
      "status" => self.status(request.params).await,
      other => Err(Error::Input(format!("unknown method: {other}"))),
    }
  }

  fn parse<T: serde::de::DeserializeOwned>(params: serde_json::Value) -> Result<T, Error> {
    serde_json::from_value(params).map_err(|e| Error::Input(format!("invalid params: {e}")))
  }

  async fn import_document(&self, params: serde_json::Value) -> Result<serde_json::Value, Error> {
    let params: ImportDocumentParams = Self::parse(params)?;
    if params.files.is_empty() {
      return Err(Error::Input("at least one file is required".to_string()));
    }

    let mut uploads = Vec::with_capacity(params.files.len());
    for file in &params.files {
      let content = base64::engine::general_purpose::STANDARD
        .decode(&file.content_base64)
        .map_err(|e| Error::Input(format!("invalid base64 content for {}: {e}", file.name)))?;
      let mime_type = correct_mime_type(&file.mime_type, &file.name);
      uploads.push(UploadFile::new(file.name.clone(), mime_type, content));
    }

    let tags = tags_from_map(params.tags);
    let mut pipeline = self
      .orchestrator
      .prepare_new_document_upload(params.index, params.document_id, tags, &uploads)?;

    let steps = params.steps.unwrap_or_else(|| {
      kmem_core::default_steps().iter().map(|s| s.to_string()).collect()
    });
    for step in steps {
      self.orchestrator.then(&mut pipeline, step);
    }

    let document_id = pipeline.document_id.clone();
    let result = self.orchestrator.run_pipeline_async(pipeline, uploads, CancellationToken::new()).await?;
    info!(document_id = %document_id, complete = result.complete(), "importDocument finished");
    Ok(serde_json::json!({"document_id": document_id}))
  }

  async fn import_text(&self, params: serde_json::Value) -> Result<serde_json::Value, Error> {
    let params: ImportTextParams = Self::parse(params)?;
    if params.text.trim().is_empty() {
      return Err(Error::Input("text must not be empty".to_string()));
    }
    let upload = UploadFile::new("text.txt", "text/plain", params.text.into_bytes());
    let tags = tags_from_map(params.tags);
    let mut pipeline = self
      .orchestrator
      .prepare_new_document_upload(params.index, params.document_id, tags, &[upload.clone()])?;
    for step in kmem_core::default_steps() {
      self.orchestrator.then(&mut pipeline, step);
    }
    let document_id = pipeline.document_id.clone();
    self.orchestrator.run_pipeline_async(pipeline, vec![upload], CancellationToken::new()).await?;
    Ok(serde_json::json!({"document_id": document_id}))
  }

  async fn import_web_page(&self, params: serde_json::Value) -> Result<serde_json::Value, Error> {
    let params: ImportWebPageParams = Self::parse(params)?;
    if params.url.trim().is_empty() {
      return Err(Error::Input("url must not be empty".to_string()));
    }
    let (content, content_type) = fetch_web_page(&self.http, &params.url, &self.retry).await?;
    let name = params.url.rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or("page.html").to_string();
    let mime_type = correct_mime_type(&content_type, &name);
    let upload = UploadFile::new(name, mime_type, content);

    let mut tags = tags_from_map(params.tags);
    tags.insert(TAG_SOURCE_URL, &params.url);
    let mut pipeline = self
      .orchestrator
      .prepare_new_document_upload(params.index, params.document_id, tags, &[upload.clone()])?;
    for step in kmem_core::default_steps() {
      self.orchestrator.then(&mut pipeline, step);
    }
    let document_id = pipeline.document_id.clone();
    self.orchestrator.run_pipeline_async(pipeline, vec![upload], CancellationToken::new()).await?;
    Ok(serde_json::json!({"document_id": document_id}))
  }

  async fn embed_query(&self, text: &str) -> Result<Vec<f32>, Error> {
    self.embedding.embed(text).await.map_err(|e| Error::TransientBackend(e.to_string()))
  }

  async fn search(&self, params: serde_json::Value) -> Result<serde_json::Value, Error> {
    let params: SearchParams = Self::parse(params)?;
    if params.query.trim().is_empty() {
      return Err(Error::Input("query must not be empty".to_string()));
    }
    let vector = self.embed_query(&params.query).await?;
    let filters = filter_set_from_clauses(params.filter);
    let scored = self
      .memorydb
      .get_similar_list(&params.index, &vector, &filters, params.min_relevance, params.limit, false)
      .await?;
    let records = scored.into_iter().map(|s| (s.record, s.score)).collect();
    Ok(serde_json::json!({"results": group_by_source(records)}))
  }

  async fn ask(&self, params: serde_json::Value) -> Result<serde_json::Value, Error> {
    let params: AskParams = Self::parse(params)?;
    if params.question.trim().is_empty() {
      return Err(Error::Input("question must not be empty".to_string()));
    }
    let vector = self.embed_query(&params.question).await?;
    let filters = filter_set_from_clauses(params.filter);
    let scored = self
      .memorydb
      .get_similar_list(&params.index, &vector, &filters, params.min_relevance, 5, false)
      .await?;
    let sources = group_by_source(scored.into_iter().map(|s| (s.record, s.score)).collect());
    // Answer synthesis is an out-of-scope `SearchClient` collaborator
    // (spec.md §1); this daemon returns the grounding sources verbatim.
    let text = sources
      .iter()
      .flat_map(|s| s.partitions.iter())
      .map(|p| p.text.as_str())
      .collect::<Vec<_>>()
      .join("\n\n");
    Ok(serde_json::json!({"text": text, "relevant_sources": sources}))
  }

  async fn list(&self, params: serde_json::Value) -> Result<serde_json::Value, Error> {
    let params: ListParams = Self::parse(params)?;
    let filters = filter_set_from_clauses(params.filter);
    let records = self.memorydb.get_list(&params.index, &filters, params.limit, false).await?;
    let records = records.into_iter().map(|r| (r, 1.0)).collect();
    Ok(serde_json::json!({"results": group_by_source(records)}))
  }

  async fn delete(&self, params: serde_json::Value) -> Result<serde_json::Value, Error> {
    let params: DocumentParams = Self::parse(params)?;
    let mut pipeline = kmem_core::DataPipeline::new(params.index, params.document_id, TagCollection::new());
    pipeline.then(kmem_core::STEP_DELETE_DOCUMENT);
    let result = self
      .orchestrator
      .run_pipeline_async(pipeline, Vec::new(), CancellationToken::new())
      .await?;
    Ok(serde_json::json!({"accepted": true, "complete": result.complete()}))
  }

  async fn status(&self, params: serde_json::Value) -> Result<serde_json::Value, Error> {
    let params: DocumentParams = Self::parse(params)?;
    let summary = self.orchestrator.read_pipeline_summary_async(&params.index, &params.document_id).await?;
    match summary {
      Some(summary) => Ok(serde_json::to_value(summary).expect("PipelineSummary always serializes")),
      None => Err(Error::Input(format!("no pipeline for {}/{}", params.index, params.document_id))),
    }
  }
}

/// Test-only helper for building a fully wired, in-memory `Router` —
/// shared by this module's tests and `server`'s socket roundtrip test.
#[cfg(test)]
pub(crate) mod test_support {
  use super::*;
  use docstore::FsDocumentStorage;
  use embedding::{EmbeddingError, EmbeddingProvider};
  use memorydb::InMemoryMemoryDb;

  struct StubEmbedder;

  #[async_trait::async_trait]
  impl EmbeddingProvider for StubEmbedder {
    fn name(&self) -> &str {
      "stub"
    }
    fn model_id(&self) -> &str {
      "stub-model"
    }
    fn dimensions(&self) -> usize {
      4
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
      let len = text.len() as f32;
      Ok(vec![len, len, len, len])
    }
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
      let mut out = Vec::new();
      for t in texts {
        out.push(self.embed(t).await?);
      }
      Ok(out)
    }
    async fn is_available(&self) -> bool {
      true
    }
  }

  pub(crate) fn in_memory_router(dir: &std::path::Path) -> Router {
    in_memory_router_with_orchestrator(dir).0
  }

  /// Same wiring as [`in_memory_router`], but also hands back the
  /// orchestrator so a test can run a pipeline with tags `import_web_page`
  /// would set, without needing an actual HTTP fetch.
  pub(crate) fn in_memory_router_with_orchestrator(dir: &std::path::Path) -> (Router, Arc<PipelineOrchestrator>) {
    let docstore: Arc<dyn docstore::DocumentStorage> = Arc::new(FsDocumentStorage::new(dir));
    let orchestrator = Arc::new(PipelineOrchestrator::new(Arc::clone(&docstore)));
    let memorydb: Arc<dyn MemoryDb> = Arc::new(InMemoryMemoryDb::new());
    let embedding: Arc<dyn EmbeddingProvider> = Arc::new(StubEmbedder);
    pipeline::register_default_handlers(
      &orchestrator,
      Arc::new(decoder::DecoderRegistry::with_defaults()),
      Arc::new(tokenizer::ApproxTokenizer::new("stub-model", 4.0)),
      &kmem_core::ChunkerConfig::default(),
      Arc::clone(&embedding),
      Arc::clone(&memorydb),
      Arc::new(pipeline::ExtractiveSummaryGenerator::new(200)),
    );
    let router = Router::new(Arc::clone(&orchestrator), memorydb, embedding, kmem_core::RetryConfig::default());
    (router, orchestrator)
  }
}

#[cfg(test)]
mod tests {
  use super::test_support::in_memory_router as test_router;
  use super::*;

  fn request(method: &str, params: serde_json::Value) -> Request {
    Request {
      id: Some(serde_json::json!(1)),
      method: method.to_string(),
      params,
    }
  }

  #[tokio::test]
  async fn ping_returns_pong() {
    let dir = tempfile::tempdir().unwrap();
    let router = test_router(dir.path());
    let response = router.handle(request("ping", serde_json::json!({}))).await;
    assert!(response.error.is_none());
    assert_eq!(response.result.unwrap()["pong"], true);
  }

  #[tokio::test]
  async fn unknown_method_is_input_error() {
    let dir = tempfile::tempdir().unwrap();
    let router = test_router(dir.path());
    let response = router.handle(request("nonexistent", serde_json::json!({}))).await;
    assert!(response.error.is_some());
  }

  #[tokio::test]
  async fn import_text_then_search_finds_it() {
    let dir = tempfile::tempdir().unwrap();
    let router = test_router(dir.path());

    let response = router
      .handle(request(
        "import_text",
        serde_json::json!({"index": "t1", "text": "mass-energy equivalence relates energy and mass"}),
      ))
      .await;
    assert!(response.error.is_none(), "{:?}", response.error);
    let document_id = response.result.unwrap()["document_id"].as_str().unwrap().to_string();

    let status_response = router
      .handle(request("status", serde_json::json!({"index": "t1", "document_id": document_id})))
      .await;
    assert!(status_response.error.is_none());
    assert_eq!(status_response.result.unwrap()["complete"], true);

    let search_response = router
      .handle(request("search", serde_json::json!({"index": "t1", "query": "energy"})))
      .await;
    assert!(search_response.error.is_none(), "{:?}", search_response.error);
    let results = search_response.result.unwrap()["results"].as_array().unwrap().len();
    assert_eq!(results, 1);
  }

  #[tokio::test]
  async fn import_text_rejects_empty_text() {
    let dir = tempfile::tempdir().unwrap();
    let router = test_router(dir.path());
    let response = router.handle(request("import_text", serde_json::json!({"index": "t1", "text": ""}))).await;
    assert!(response.error.is_some());
  }

  /// Regression test: `import_web_page` sets `source_url` as a pipeline tag
  /// (see [`Router::import_web_page`]); this must surface as `link` in
  /// search results, not silently stay empty.
  #[tokio::test]
  async fn source_url_tag_surfaces_as_link_in_search_results() {
    let dir = tempfile::tempdir().unwrap();
    let (router, orchestrator) = super::test_support::in_memory_router_with_orchestrator(dir.path());

    let mut tags = TagCollection::new();
    tags.insert(kmem_core::TAG_SOURCE_URL, "https://example.com/article");
    let upload = UploadFile::new("article.html", "text/plain", b"a page about kernels and memory".to_vec());
    let mut pipeline = orchestrator.prepare_new_document_upload("t1", None, tags, &[upload.clone()]).unwrap();
    for step in kmem_core::default_steps() {
      orchestrator.then(&mut pipeline, step);
    }
    orchestrator
      .run_pipeline_async(pipeline, vec![upload], CancellationToken::new())
      .await
      .unwrap();

    let search = router.handle(request("search", serde_json::json!({"index": "t1", "query": "kernels"}))).await;
    assert!(search.error.is_none(), "{:?}", search.error);
    let results = search.result.unwrap()["results"].as_array().unwrap().clone();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["link"], "https://example.com/article");
  }

  #[tokio::test]
  async fn delete_removes_search_results() {
    let dir = tempfile::tempdir().unwrap();
    let router = test_router(dir.path());
    let import = router
      .handle(request("import_text", serde_json::json!({"index": "t1", "text": "a document about kernels"})))
      .await;
    let document_id = import.result.unwrap()["document_id"].as_str().unwrap().to_string();

    let delete = router
      .handle(request("delete", serde_json::json!({"index": "t1", "document_id": document_id})))
      .await;
    assert!(delete.error.is_none());

    let list = router.handle(request("list", serde_json::json!({"index": "t1"}))).await;
    assert_eq!(list.result.unwrap()["results"].as_array().unwrap().len(), 0);
  }
}
