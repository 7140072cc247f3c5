//! Daemon process lifecycle: builds every collaborator an `AppConfig`
//! names, wires spec.md §4.4's default handlers onto a `PipelineOrchestrator`,
//! resumes incomplete pipelines (spec.md §4.1), then serves the request
//! router over a Unix socket until shutdown.

use crate::router::Router;
use crate::server::{Server, ShutdownHandle};
use decoder::DecoderRegistry;
use docstore::{DocumentStorage, FsDocumentStorage};
use embedding::{EmbeddingProvider, OllamaProvider, OpenRouterProvider, wrap_resilient_arc};
use kmem_core::{AppConfig, EmbeddingProviderKind, MemoryDbBackend};
use memorydb::{InMemoryMemoryDb, LanceMemoryDb, MemoryDb};
use pipeline::{ExtractiveSummaryGenerator, PipelineOrchestrator, register_default_handlers};
use queue::InProcessQueue;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokenizer::ApproxTokenizer;
use tokio::signal;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum LifecycleError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("server error: {0}")]
  Server(#[from] crate::server::ServerError),
  #[error("configuration error: {0}")]
  Config(#[from] kmem_core::Error),
}

/// Daemon process configuration, derived from an [`AppConfig`] plus the
/// transport-level settings `AppConfig` doesn't carry (socket path).
#[derive(Debug, Clone)]
pub struct DaemonConfig {
  pub socket_path: PathBuf,
  pub app: AppConfig,
}

impl Default for DaemonConfig {
  fn default() -> Self {
    Self {
      socket_path: crate::server::default_socket_path(),
      app: AppConfig::default(),
    }
  }
}

fn create_embedding_provider(config: &kmem_core::EmbeddingConfig) -> Arc<dyn EmbeddingProvider> {
  match config.provider {
    EmbeddingProviderKind::Local => {
      let provider = OllamaProvider::new().with_url(&config.local_url).with_model(&config.model, config.dimensions);
      wrap_resilient_arc(provider)
    }
    EmbeddingProviderKind::Cloud => {
      let api_key = config
        .cloud_api_key
        .clone()
        .or_else(|| std::env::var("KMEM_EMBEDDING_API_KEY").ok())
        .unwrap_or_default();
      if api_key.is_empty() {
        warn!("no cloud embedding API key configured, falling back to the local provider");
        let provider = OllamaProvider::new().with_url(&config.local_url).with_model(&config.model, config.dimensions);
        wrap_resilient_arc(provider)
      } else {
        let provider = OpenRouterProvider::new(api_key).with_model(&config.model, config.dimensions);
        wrap_resilient_arc(provider)
      }
    }
  }
}

async fn create_memorydb(config: &kmem_core::MemoryDbConfig) -> kmem_core::Result<Arc<dyn MemoryDb>> {
  match config.backend {
    MemoryDbBackend::Lance => Ok(Arc::new(LanceMemoryDb::open(&config.base_path).await?)),
    MemoryDbBackend::Memory => Ok(Arc::new(InMemoryMemoryDb::new())),
  }
}

/// Re-enqueues every persisted pipeline that is neither complete nor failed
/// (spec.md §4.1's startup resumability contract). Best-effort: a pipeline
/// that fails to resume is logged and skipped rather than aborting startup.
async fn resume_incomplete_pipelines(docstore: &dyn DocumentStorage, orchestrator: &PipelineOrchestrator) {
  let indexes = match docstore.list_indexes().await {
    Ok(indexes) => indexes,
    Err(e) => {
      warn!("failed to enumerate indexes for startup resume: {e}");
      return;
    }
  };

  for index in indexes {
    let documents = match docstore.list_documents(&index).await {
      Ok(documents) => documents,
      Err(e) => {
        warn!(index = %index, "failed to enumerate documents for startup resume: {e}");
        continue;
      }
    };

    for document_id in documents {
      let status = match orchestrator.read_pipeline_status_async(&index, &document_id).await {
        Ok(status) => status,
        Err(e) => {
          warn!(index = %index, document_id = %document_id, "failed to read pipeline status: {e}");
          continue;
        }
      };
      let Some(pipeline) = status else { continue };
      if pipeline.complete() || pipeline.failed {
        continue;
      }
      info!(index = %index, document_id = %document_id, "resuming incomplete pipeline");
      if let Err(e) = orchestrator.resume_pipeline(&index, &document_id).await {
        warn!(index = %index, document_id = %document_id, "failed to resume pipeline: {e}");
      }
    }
  }
}

/// Owns the daemon's long-lived state and drives its run loop.
pub struct Daemon {
  config: DaemonConfig,
  shutdown: Option<ShutdownHandle>,
}

impl Daemon {
  pub fn new(config: DaemonConfig) -> Self {
    Self { config, shutdown: None }
  }

  pub async fn run(&mut self) -> Result<(), LifecycleError> {
    info!("starting kmem daemon");
    info!(socket = ?self.config.socket_path, "socket path");

    let docstore: Arc<dyn DocumentStorage> = Arc::new(FsDocumentStorage::new(&self.config.app.pipeline.storage_path));
    let memorydb = create_memorydb(&self.config.app.memorydb).await?;
    let embedding = create_embedding_provider(&self.config.app.embedding);
    info!(provider = embedding.name(), model = embedding.model_id(), dims = embedding.dimensions(), "embedding provider configured");
    if !embedding.is_available().await {
      warn!("embedding provider is not reachable; ingestion will fail until it is");
    }

    let orchestrator = if self.config.app.pipeline.distributed {
      let queue = InProcessQueue::new(
        std::time::Duration::from_secs(self.config.app.queue.visibility_timeout_secs),
        self.config.app.queue.max_dequeue_count,
      );
      Arc::new(PipelineOrchestrator::with_queue(Arc::clone(&docstore), Arc::new(queue)))
    } else {
      Arc::new(PipelineOrchestrator::new(Arc::clone(&docstore)))
    };

    register_default_handlers(
      &orchestrator,
      Arc::new(DecoderRegistry::with_defaults()),
      Arc::new(ApproxTokenizer::new(&self.config.app.embedding.model, 4.0)),
      &self.config.app.chunker,
      Arc::clone(&embedding),
      Arc::clone(&memorydb),
      Arc::new(ExtractiveSummaryGenerator::new(500)),
    );

    resume_incomplete_pipelines(docstore.as_ref(), &orchestrator).await;

    let router = Arc::new(Router::new(orchestrator, memorydb, embedding, self.config.app.retry.clone()));

    let server = Server::with_socket_path(Arc::clone(&router), self.config.socket_path.clone());
    let shutdown = server.shutdown_handle();
    self.shutdown = Some(shutdown.clone());
    router.set_shutdown_handle(shutdown.clone()).await;

    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
      if let Err(e) = signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        return;
      }
      info!("received ctrl-c, shutting down");
      shutdown_clone.shutdown();
    });

    server.run().await?;
    info!("daemon shutdown complete");
    Ok(())
  }

  pub fn shutdown(&self) {
    if let Some(ref shutdown) = self.shutdown {
      shutdown.shutdown();
    }
  }
}

/// Whether a daemon is already listening on `socket_path`.
pub fn is_running(socket_path: &std::path::Path) -> bool {
  std::os::unix::net::UnixStream::connect(socket_path).is_ok()
}

pub fn pid_file_path() -> PathBuf {
  if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
    PathBuf::from(runtime_dir).join("kmem.pid")
  } else {
    PathBuf::from(format!("/tmp/kmem-{}.pid", std::process::id()))
  }
}

pub fn write_pid_file() -> Result<(), std::io::Error> {
  std::fs::write(pid_file_path(), std::process::id().to_string())
}

pub fn remove_pid_file() {
  let _ = std::fs::remove_file(pid_file_path());
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn default_config_has_a_socket_path() {
    let config = DaemonConfig::default();
    assert!(!config.socket_path.to_string_lossy().is_empty());
  }

  #[test]
  fn is_running_false_for_nonexistent_socket() {
    let dir = TempDir::new().unwrap();
    let socket_path = dir.path().join("nonexistent.sock");
    assert!(!is_running(&socket_path));
  }
}
