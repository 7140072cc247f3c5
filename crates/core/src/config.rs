//! Process-wide configuration, built once at startup.
//!
//! Config priority: project-relative (`.kmem/config.toml`) > user
//! (`~/.config/kmem/config.toml`) > built-in defaults. Mirrors the
//! project-over-user-over-default layering used elsewhere in this codebase,
//! but produces a single immutable `AppConfig` rather than a mutable
//! singleton: callers build it once at process startup and pass it down,
//! they never reach for a global getter.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which vector-store backend `memorydb` should construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryDbBackend {
  #[default]
  Lance,
  Memory,
}

/// Which embedding generator `embedding` should construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
  #[default]
  Local,
  Cloud,
}

/// Queue behavior for the distributed execution mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  /// Seconds a dequeued message stays invisible before it's eligible again.
  pub visibility_timeout_secs: u64,
  /// Dequeue attempts before a message is routed to its poison queue.
  pub max_dequeue_count: u32,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      visibility_timeout_secs: 300,
      max_dequeue_count: 20,
    }
  }
}

/// Chunker defaults (spec.md §4.2). Per-request overrides still win; these
/// are only the fallback when a caller doesn't specify them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
  pub max_tokens_per_chunk: usize,
  pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
  fn default() -> Self {
    Self {
      max_tokens_per_chunk: 1000,
      overlap_tokens: 100,
    }
  }
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
  pub provider: EmbeddingProviderKind,
  pub model: String,
  pub dimensions: usize,
  /// Base URL for the local-service provider.
  pub local_url: String,
  /// API key for the cloud provider. If unset, read from `KMEM_EMBEDDING_API_KEY`.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cloud_api_key: Option<String>,
}

impl Default for EmbeddingConfig {
  fn default() -> Self {
    Self {
      provider: EmbeddingProviderKind::Local,
      model: "nomic-embed-text".to_string(),
      dimensions: 768,
      local_url: "http://localhost:11434".to_string(),
      cloud_api_key: None,
    }
  }
}

/// `memorydb` backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryDbConfig {
  pub backend: MemoryDbBackend,
  /// Directory under which per-index tables/files are created.
  pub base_path: PathBuf,
}

impl Default for MemoryDbConfig {
  fn default() -> Self {
    Self {
      backend: MemoryDbBackend::Lance,
      base_path: PathBuf::from("./kmem_data/vectors"),
    }
  }
}

/// HTTP retry policy shared by the embedding client and the web-page fetcher
/// (spec.md §6's exact backoff sequence).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  pub max_attempts: u32,
  pub backoff_secs: Vec<u64>,
  pub retry_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: 10,
      backoff_secs: vec![1, 1, 1, 2, 2, 3, 4, 5],
      retry_status_codes: vec![408, 500, 502, 504],
    }
  }
}

impl RetryConfig {
  /// Backoff before the given 0-indexed attempt, clamped to the last entry
  /// once the sequence is exhausted.
  pub fn backoff_for_attempt(&self, attempt: usize) -> std::time::Duration {
    let secs = self
      .backoff_secs
      .get(attempt)
      .or_else(|| self.backoff_secs.last())
      .copied()
      .unwrap_or(1);
    std::time::Duration::from_secs(secs)
  }

  pub fn is_retryable_status(&self, status: u16) -> bool {
    self.retry_status_codes.contains(&status)
  }
}

/// Document storage / orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  /// Root directory for pipeline status files and generated artifacts.
  pub storage_path: PathBuf,
  /// Whether pipelines run synchronously in-process or via `queue`.
  pub distributed: bool,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      storage_path: PathBuf::from("./kmem_data/storage"),
      distributed: false,
    }
  }
}

/// Process-wide application configuration. Built once at startup and passed
/// down by reference; nothing in this workspace reaches for a global getter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  pub queue: QueueConfig,
  pub chunker: ChunkerConfig,
  pub embedding: EmbeddingConfig,
  pub memorydb: MemoryDbConfig,
  pub retry: RetryConfig,
  pub pipeline: PipelineConfig,
}

impl AppConfig {
  /// Load configuration for a project directory, falling back to the user
  /// config and then built-in defaults. Never panics or errors: a missing or
  /// unparsable file just falls through to the next layer.
  pub fn load_for_project(project_path: &Path) -> Self {
    let project_config = Self::project_config_path(project_path);
    if project_config.exists()
      && let Ok(content) = std::fs::read_to_string(&project_config)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    if let Some(user_config_path) = Self::user_config_path()
      && user_config_path.exists()
      && let Ok(content) = std::fs::read_to_string(&user_config_path)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    Self::default()
  }

  pub fn project_config_path(project_path: &Path) -> PathBuf {
    project_path.join(".kmem").join("config.toml")
  }

  pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("KMEM_CONFIG_DIR") {
      return Some(PathBuf::from(path).join("config.toml"));
    }
    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
      return Some(PathBuf::from(path).join("kmem").join("config.toml"));
    }
    dirs::config_dir().map(|p: PathBuf| p.join("kmem").join("config.toml"))
  }

  /// Whether an existing index needs re-embedding because configured
  /// dimensions no longer match what's stored.
  pub fn needs_reembedding(&self, stored_dimensions: usize) -> bool {
    self.embedding.dimensions != stored_dimensions
  }

  /// Render a commented default config file, used by `kmem config init`.
  pub fn generate_template() -> String {
    r#"# kmem configuration
# Place in .kmem/config.toml (project) or ~/.config/kmem/config.toml (user)

[queue]
visibility_timeout_secs = 300
max_dequeue_count = 20

[chunker]
max_tokens_per_chunk = 1000
overlap_tokens = 100

[embedding]
provider = "local"
model = "nomic-embed-text"
dimensions = 768
local_url = "http://localhost:11434"
# cloud_api_key = "..."  # or set KMEM_EMBEDDING_API_KEY

[memorydb]
backend = "lance"
base_path = "./kmem_data/vectors"

[retry]
max_attempts = 10
backoff_secs = [1, 1, 1, 2, 2, 3, 4, 5]
retry_status_codes = [408, 500, 502, 504]

[pipeline]
storage_path = "./kmem_data/storage"
distributed = false
"#
    .to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn load_default_when_no_config() {
    let temp = TempDir::new().unwrap();
    let config = AppConfig::load_for_project(temp.path());
    assert_eq!(config.embedding.dimensions, 768);
    assert_eq!(config.queue.max_dequeue_count, 20);
  }

  #[test]
  fn load_project_config_overrides_defaults() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join(".kmem");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
      dir.join("config.toml"),
      r#"
[embedding]
dimensions = 1536
provider = "cloud"

[memorydb]
backend = "memory"
"#,
    )
    .unwrap();

    let config = AppConfig::load_for_project(temp.path());
    assert_eq!(config.embedding.dimensions, 1536);
    assert_eq!(config.embedding.provider, EmbeddingProviderKind::Cloud);
    assert_eq!(config.memorydb.backend, MemoryDbBackend::Memory);
  }

  #[test]
  fn toml_roundtrip() {
    let config = AppConfig::default();
    let toml_str = toml::to_string_pretty(&config).unwrap();
    let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
    assert_eq!(parsed.embedding.dimensions, config.embedding.dimensions);
    assert_eq!(parsed.retry.backoff_secs, config.retry.backoff_secs);
  }

  #[test]
  fn needs_reembedding_detects_dimension_change() {
    let config = AppConfig::default();
    assert!(config.needs_reembedding(1536));
    assert!(!config.needs_reembedding(768));
  }

  #[test]
  fn retry_backoff_sequence_matches_spec() {
    let retry = RetryConfig::default();
    let secs: Vec<u64> = (0..8).map(|i| retry.backoff_for_attempt(i).as_secs()).collect();
    assert_eq!(secs, vec![1, 1, 1, 2, 2, 3, 4, 5]);
    // exhausted sequence clamps to the last value
    assert_eq!(retry.backoff_for_attempt(20).as_secs(), 5);
  }

  #[test]
  fn retry_status_codes() {
    let retry = RetryConfig::default();
    assert!(retry.is_retryable_status(502));
    assert!(!retry.is_retryable_status(404));
  }

  #[test]
  fn generate_template_contains_all_sections() {
    let template = AppConfig::generate_template();
    assert!(template.contains("[queue]"));
    assert!(template.contains("[chunker]"));
    assert!(template.contains("[embedding]"));
    assert!(template.contains("[memorydb]"));
    assert!(template.contains("[retry]"));
    assert!(template.contains("[pipeline]"));
  }
}
