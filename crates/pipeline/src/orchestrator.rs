//! `PipelineOrchestrator`: builds, persists, executes and resumes pipelines
//! (spec.md §4.1).
//!
//! Two execution modes share every other piece of machinery:
//!
//! - *in-process*: [`PipelineOrchestrator::run_pipeline_async`] drives a
//!   pipeline to completion (or failure) on the calling task, one step
//!   after another.
//! - *distributed*: the same method only uploads files, persists the
//!   initial status and enqueues the first step; [`PipelineOrchestrator::run_distributed_step_once`]
//!   is what a worker process calls in a loop to dequeue and run one step
//!   at a time, re-enqueuing the next step on success.
//!
//! Both modes persist status after every successful step, never during
//! (spec.md §4.1's resumability contract), so a crash mid-step always
//! resumes from the last completed step rather than replaying partial
//! progress from scratch.

use docstore::DocumentStorage;
use kmem_core::{DataPipeline, Error, FileDetails, Result, TagCollection};
use queue::Queue;
use std::sync::Arc;
use std::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::{raw_artifact_name, PipelineContext};
use crate::handler::HandlerRegistry;

/// One source file supplied to [`PipelineOrchestrator::prepare_new_document_upload`]:
/// its declared metadata plus the bytes to be written into `DocumentStorage`
/// once the pipeline starts running.
#[derive(Debug, Clone)]
pub struct UploadFile {
  pub name: String,
  pub mime_type: String,
  pub content: Vec<u8>,
}

impl UploadFile {
  pub fn new(name: impl Into<String>, mime_type: impl Into<String>, content: Vec<u8>) -> Self {
    Self {
      name: name.into(),
      mime_type: mime_type.into(),
      content,
    }
  }
}

/// A condensed view of [`DataPipeline`] suitable for a status endpoint,
/// without the full per-step log (spec.md §4.1's `readPipelineSummaryAsync`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct PipelineSummary {
  pub index: String,
  pub document_id: String,
  pub execution_id: String,
  pub steps: Vec<String>,
  pub completed_steps: Vec<String>,
  pub remaining_steps: Vec<String>,
  pub complete: bool,
  pub failed: bool,
  pub file_count: usize,
}

impl From<&DataPipeline> for PipelineSummary {
  fn from(p: &DataPipeline) -> Self {
    Self {
      index: p.index.clone(),
      document_id: p.document_id.clone(),
      execution_id: p.execution_id.clone(),
      steps: p.steps.clone(),
      completed_steps: p.completed_steps.clone(),
      remaining_steps: p.remaining_steps.clone(),
      complete: p.complete(),
      failed: p.failed,
      file_count: p.files.len(),
    }
  }
}

fn queue_message_step(value: &serde_json::Value) -> Option<(&str, &str, &str)> {
  let index = value.get("index")?.as_str()?;
  let document_id = value.get("document_id")?.as_str()?;
  let step = value.get("step")?.as_str()?;
  Some((index, document_id, step))
}

pub struct PipelineOrchestrator {
  docstore: Arc<dyn DocumentStorage>,
  registry: RwLock<HandlerRegistry>,
  queue: Option<Arc<dyn Queue>>,
  cancellation: CancellationToken,
}

impl PipelineOrchestrator {
  /// In-process execution mode: steps run synchronously on the calling task.
  pub fn new(docstore: Arc<dyn DocumentStorage>) -> Self {
    Self {
      docstore,
      registry: RwLock::new(HandlerRegistry::new()),
      queue: None,
      cancellation: CancellationToken::new(),
    }
  }

  /// Distributed execution mode: step boundaries are dispatched through `queue`.
  pub fn with_queue(docstore: Arc<dyn DocumentStorage>, queue: Arc<dyn Queue>) -> Self {
    Self {
      docstore,
      registry: RwLock::new(HandlerRegistry::new()),
      queue: Some(queue),
      cancellation: CancellationToken::new(),
    }
  }

  pub fn is_distributed(&self) -> bool {
    self.queue.is_some()
  }

  pub fn add_handler(&self, handler: Arc<dyn crate::handler::StepHandler>) {
    self.registry.write().expect("registry lock poisoned").add_handler(handler);
  }

  pub fn try_add_handler(&self, handler: Arc<dyn crate::handler::StepHandler>) -> bool {
    self.registry.write().expect("registry lock poisoned").try_add_handler(handler)
  }

  /// Builds an unsaved pipeline: validates `index`/`files`, generates a
  /// `document_id` if absent, assigns a fresh `execution_id` (via
  /// `DataPipeline::new`), and records file metadata. `steps` starts empty;
  /// callers add steps with [`PipelineOrchestrator::then`].
  pub fn prepare_new_document_upload(
    &self,
    index: impl Into<String>,
    document_id: Option<String>,
    tags: TagCollection,
    files: &[UploadFile],
  ) -> Result<DataPipeline> {
    let index = index.into();
    if index.trim().is_empty() {
      return Err(Error::Input("index must not be empty".to_string()));
    }
    if files.is_empty() {
      return Err(Error::Input("at least one file is required".to_string()));
    }

    let document_id = match document_id {
      Some(id) if id.trim().is_empty() => return Err(Error::Input("documentId must not be empty when provided".to_string())),
      Some(id) => id,
      None => Uuid::now_v7().to_string(),
    };

    let mut pipeline = DataPipeline::new(index, document_id, tags);
    for file in files {
      let file_id = Uuid::now_v7().to_string();
      pipeline.files.push(FileDetails::new(file_id, file.name.clone(), file.content.len() as u64, file.mime_type.clone()));
    }
    Ok(pipeline)
  }

  /// Appends a step name. Duplicates are allowed — the same handler can run
  /// twice in one pipeline (spec.md §4.1).
  pub fn then(&self, pipeline: &mut DataPipeline, step_name: impl Into<String>) -> &Self {
    pipeline.then(step_name);
    self
  }

  /// Uploads every file's bytes into `DocumentStorage`, persists the
  /// initial status, then either runs every step in-process or enqueues
  /// the first one for distributed workers.
  pub async fn run_pipeline_async(&self, mut pipeline: DataPipeline, files: Vec<UploadFile>, cancellation: CancellationToken) -> Result<DataPipeline> {
    if pipeline.files.len() != files.len() {
      return Err(Error::Input("file metadata and upload content count mismatch".to_string()));
    }

    for (detail, file) in pipeline.files.iter().zip(files.iter()) {
      self
        .docstore
        .write_file(&pipeline.index, &pipeline.document_id, &raw_artifact_name(&detail.id), &file.content)
        .await?;
    }

    self.docstore.write_pipeline_status(&pipeline).await?;
    info!(index = %pipeline.index, document_id = %pipeline.document_id, steps = ?pipeline.steps, "pipeline uploaded, starting execution");

    match &self.queue {
      None => {
        let ctx = PipelineContext::new(Arc::clone(&self.docstore), cancellation);
        self.run_steps_in_process(pipeline, ctx).await
      }
      Some(queue) => {
        if let Some(step) = pipeline.current_step() {
          self.enqueue_step(queue.as_ref(), &pipeline, step).await?;
        }
        Ok(pipeline)
      }
    }
  }

  async fn enqueue_step(&self, queue: &dyn Queue, pipeline: &DataPipeline, step: &str) -> Result<()> {
    queue
      .enqueue(
        step,
        serde_json::json!({"index": pipeline.index, "document_id": pipeline.document_id, "step": step}),
      )
      .await
  }

  /// Drives `pipeline` to completion or failure on the calling task.
  /// Transient errors from a handler propagate to the caller (in-process
  /// mode has no queue to redeliver through); permanent errors mark the
  /// pipeline failed and return it rather than propagating.
  async fn run_steps_in_process(&self, mut pipeline: DataPipeline, ctx: PipelineContext) -> Result<DataPipeline> {
    loop {
      if ctx.is_cancelled() {
        return Err(Error::Cancelled);
      }
      let Some(step_name) = pipeline.current_step().map(str::to_string) else {
        break;
      };

      let handler = { self.registry.read().expect("registry lock poisoned").resolve(&step_name)? };
      match handler.invoke(pipeline, &ctx).await {
        Ok((true, updated)) => {
          pipeline = updated;
          pipeline.advance();
          ctx.docstore.write_pipeline_status(&pipeline).await?;
        }
        Ok((false, mut updated)) => {
          updated.mark_failed(format!("step {step_name} reported failure"));
          ctx.docstore.write_pipeline_status(&updated).await?;
          return Ok(updated);
        }
        Err(e) if e.is_permanent() => {
          pipeline.mark_failed(format!("step {step_name} failed permanently: {e}"));
          ctx.docstore.write_pipeline_status(&pipeline).await?;
          return Ok(pipeline);
        }
        Err(e) => return Err(e),
      }
    }
    Ok(pipeline)
  }

  /// Dequeues and runs at most one message from `step_name`'s queue,
  /// returning `true` if a message was found (whether or not it
  /// succeeded). Intended to be called in a loop by a distributed worker
  /// process (spec.md §4.1's distributed mode, §5's visibility-timeout
  /// backpressure).
  pub async fn run_distributed_step_once(&self, step_name: &str) -> Result<bool> {
    let Some(queue) = self.queue.as_ref() else {
      return Err(Error::Configuration("orchestrator is not configured for distributed execution".to_string()));
    };
    let Some(message) = queue.dequeue(step_name).await? else {
      return Ok(false);
    };

    let Some((index, document_id, msg_step)) = queue_message_step(&message.body) else {
      warn!(step_name, "malformed queue message, abandoning");
      queue.abandon(step_name, message.id).await?;
      return Ok(true);
    };
    debug_assert_eq!(msg_step, step_name);

    let Some(mut pipeline) = self.docstore.read_pipeline_status(index, document_id).await? else {
      warn!(index, document_id, "queue message referenced a pipeline with no persisted status, dropping");
      queue.complete(step_name, message.id).await?;
      return Ok(true);
    };

    if pipeline.current_step() != Some(step_name) {
      // Already advanced past this step by a previous redelivery — the
      // handler's work is done, just drop the stale message.
      queue.complete(step_name, message.id).await?;
      return Ok(true);
    }

    let ctx = PipelineContext::new(Arc::clone(&self.docstore), self.cancellation.child_token());
    let handler = { self.registry.read().expect("registry lock poisoned").resolve(step_name)? };

    match handler.invoke(pipeline, &ctx).await {
      Ok((true, mut updated)) => {
        updated.advance();
        self.docstore.write_pipeline_status(&updated).await?;
        queue.complete(step_name, message.id).await?;
        if let Some(next_step) = updated.current_step() {
          self.enqueue_step(queue.as_ref(), &updated, next_step).await?;
        }
        Ok(true)
      }
      Ok((false, mut updated)) => {
        updated.mark_failed(format!("step {step_name} reported failure"));
        self.docstore.write_pipeline_status(&updated).await?;
        queue.complete(step_name, message.id).await?;
        Ok(true)
      }
      Err(e) if e.is_permanent() => {
        pipeline = self.docstore.read_pipeline_status(index, document_id).await?.unwrap_or(pipeline);
        pipeline.mark_failed(format!("step {step_name} failed permanently: {e}"));
        self.docstore.write_pipeline_status(&pipeline).await?;
        queue.complete(step_name, message.id).await?;
        Ok(true)
      }
      Err(e) => {
        warn!(index, document_id, step_name, error = %e, "transient step failure, leaving message for redelivery");
        queue.abandon(step_name, message.id).await?;
        Ok(true)
      }
    }
  }

  /// Cooperatively cancels every in-flight in-process step. Already
  /// persisted pipelines resume on the next process start since status is
  /// only ever persisted after a completed step (spec.md §4.1).
  pub fn stop_all_pipelines_async(&self) {
    self.cancellation.cancel();
  }

  pub async fn read_pipeline_status_async(&self, index: &str, document_id: &str) -> Result<Option<DataPipeline>> {
    self.docstore.read_pipeline_status(index, document_id).await
  }

  pub async fn read_pipeline_summary_async(&self, index: &str, document_id: &str) -> Result<Option<PipelineSummary>> {
    Ok(self.read_pipeline_status_async(index, document_id).await?.as_ref().map(PipelineSummary::from))
  }

  pub async fn is_document_ready_async(&self, index: &str, document_id: &str) -> Result<bool> {
    Ok(self.read_pipeline_status_async(index, document_id).await?.is_some_and(|p| p.complete()))
  }

  /// At startup: re-enqueue every persisted pipeline under `index` whose
  /// status is not complete and not failed, at its first remaining step
  /// (spec.md §4.1's resumability contract). Only meaningful in
  /// distributed mode — in-process callers simply call
  /// `run_pipeline_async` again with the persisted pipeline.
  pub async fn resume_pipeline(&self, index: &str, document_id: &str) -> Result<()> {
    let Some(pipeline) = self.docstore.read_pipeline_status(index, document_id).await? else {
      return Ok(());
    };
    if pipeline.complete() || pipeline.failed {
      return Ok(());
    }
    if let (Some(queue), Some(step)) = (&self.queue, pipeline.current_step()) {
      info!(index, document_id, step, "resuming pipeline at first remaining step");
      self.enqueue_step(queue.as_ref(), &pipeline, step).await?;
    }
    Ok(())
  }
}
