use anyhow::{Context, Result};
use base64::Engine;
use clap::{Parser, Subcommand};
use daemon::{Client, Daemon, DaemonConfig, default_socket_path, is_running};
use kmem_core::AppConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "kmem")]
#[command(about = "Ingest documents and answer questions over them")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Start the daemon
  Daemon,
  /// Stop a running daemon
  Stop,
  /// Ingest one or more files into an index
  ImportDocument {
    files: Vec<PathBuf>,
    #[arg(short, long, default_value = "default")]
    index: String,
    #[arg(long)]
    document_id: Option<String>,
    /// Repeatable `key=value` tag
    #[arg(long = "tag")]
    tags: Vec<String>,
  },
  /// Ingest raw text into an index
  ImportText {
    text: String,
    #[arg(short, long, default_value = "default")]
    index: String,
    #[arg(long)]
    document_id: Option<String>,
    #[arg(long = "tag")]
    tags: Vec<String>,
  },
  /// Fetch and ingest a web page into an index
  ImportWebPage {
    url: String,
    #[arg(short, long, default_value = "default")]
    index: String,
    #[arg(long)]
    document_id: Option<String>,
    #[arg(long = "tag")]
    tags: Vec<String>,
  },
  /// Search for relevant partitions
  Search {
    query: String,
    #[arg(short, long, default_value = "default")]
    index: String,
    #[arg(long, default_value = "10")]
    limit: usize,
    #[arg(long, default_value = "0.0")]
    min_relevance: f32,
    /// Repeatable `key=value` tag clause, ANDed within one `--filter`
    #[arg(long = "filter")]
    filters: Vec<String>,
  },
  /// Ask a question; returns grounding sources for the answer
  Ask {
    question: String,
    #[arg(short, long, default_value = "default")]
    index: String,
    #[arg(long, default_value = "0.0")]
    min_relevance: f32,
    #[arg(long = "filter")]
    filters: Vec<String>,
  },
  /// List ingested partitions without ranking
  List {
    #[arg(short, long, default_value = "default")]
    index: String,
    #[arg(long, default_value = "10")]
    limit: usize,
    #[arg(long = "filter")]
    filters: Vec<String>,
  },
  /// Delete a document and every partition derived from it
  Delete {
    document_id: String,
    #[arg(short, long, default_value = "default")]
    index: String,
  },
  /// Read a pipeline's ingestion status
  Status {
    document_id: String,
    #[arg(short, long, default_value = "default")]
    index: String,
  },
}

fn data_dir() -> PathBuf {
  if let Ok(path) = std::env::var("KMEM_DATA_DIR") {
    return PathBuf::from(path);
  }
  dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("kmem")
}

fn init_cli_logging() {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
    .init();
}

fn init_daemon_logging() -> Option<WorkerGuard> {
  let log_dir = data_dir();
  if std::fs::create_dir_all(&log_dir).is_err() {
    init_cli_logging();
    return None;
  }

  let file_appender = tracing_appender::rolling::daily(&log_dir, "kmem.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
  let env_filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
  let console_layer = tracing_subscriber::fmt::layer().with_target(true).with_ansi(true);
  let file_layer = tracing_subscriber::fmt::layer().with_target(true).with_ansi(false).with_writer(file_writer);

  tracing_subscriber::registry().with(env_filter).with(console_layer).with(file_layer).init();
  Some(guard)
}

/// Splits `key=value` tag arguments into the `[key, [value, value, ...]]`
/// map shape the daemon's `import_*` methods expect.
fn tags_to_params(tags: &[String]) -> Result<serde_json::Value> {
  let mut map = serde_json::Map::new();
  for tag in tags {
    let (key, value) = tag.split_once('=').with_context(|| format!("tag `{tag}` must be `key=value`"))?;
    map
      .entry(key.to_string())
      .or_insert_with(|| serde_json::Value::Array(Vec::new()))
      .as_array_mut()
      .expect("inserted as array")
      .push(serde_json::Value::String(value.to_string()));
  }
  Ok(serde_json::Value::Object(map))
}

/// Splits repeated `--filter key=value,key2=value2` clauses (one clause per
/// flag occurrence, comma-separated `key=value` pairs ANDed within it) into
/// the daemon's `[[(key, value)]]` DNF shape.
fn filters_to_params(filters: &[String]) -> Result<serde_json::Value> {
  let mut clauses = Vec::new();
  for filter in filters {
    let mut conjunction = Vec::new();
    for pair in filter.split(',') {
      let (key, value) = pair.split_once('=').with_context(|| format!("filter clause `{pair}` must be `key=value`"))?;
      conjunction.push(serde_json::json!([key, value]));
    }
    clauses.push(serde_json::Value::Array(conjunction));
  }
  Ok(serde_json::Value::Array(clauses))
}

/// Maps a daemon JSON-RPC error back to the CLI's exit code contract
/// (spec.md §6): 2 configuration, 3 bad input, 4 transient backend after
/// retries, 5 cancellation, 1 anything else.
fn exit_code_for_rpc_error(code: i32) -> u8 {
  match code {
    1 => 2,
    2 | 3 => 3,
    4 => 4,
    5 => 5,
    _ => 1,
  }
}

async fn call_daemon(method: &str, params: serde_json::Value) -> Result<Result<serde_json::Value, ExitCode>> {
  let mut client = Client::connect().await.context("daemon is not running (start it with `kmem daemon`)")?;
  let response = client.call(method, params).await.context("request to daemon failed")?;
  if let Some(err) = response.error {
    error!(code = err.code, message = %err.message, "daemon returned an error");
    return Ok(Err(ExitCode::from(exit_code_for_rpc_error(err.code))));
  }
  Ok(Ok(response.result.unwrap_or(serde_json::Value::Null)))
}

fn print_result(result: &serde_json::Value) {
  println!("{}", serde_json::to_string_pretty(result).unwrap_or_default());
}

async fn cmd_daemon() -> Result<ExitCode> {
  let _guard = init_daemon_logging();
  let project_path = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
  let app_config = AppConfig::load_for_project(&project_path);
  let config = DaemonConfig {
    socket_path: default_socket_path(),
    app: app_config,
  };
  let mut daemon = Daemon::new(config);
  info!("starting kmem daemon");
  daemon.run().await.context("daemon exited with an error")?;
  Ok(ExitCode::SUCCESS)
}

async fn cmd_stop() -> Result<ExitCode> {
  if !is_running(&default_socket_path()) {
    println!("daemon is not running");
    return Ok(ExitCode::SUCCESS);
  }
  match call_daemon("shutdown", serde_json::json!({})).await? {
    Ok(_) => {
      println!("shutdown requested");
      Ok(ExitCode::SUCCESS)
    }
    Err(code) => Ok(code),
  }
}

async fn cmd_import_document(files: Vec<PathBuf>, index: String, document_id: Option<String>, tags: Vec<String>) -> Result<ExitCode> {
  if files.is_empty() {
    eprintln!("at least one file is required");
    return Ok(ExitCode::from(3));
  }
  let mut file_params = Vec::with_capacity(files.len());
  for path in &files {
    let content = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("file").to_string();
    let mime_type = mime_guess_from_name(&name);
    file_params.push(serde_json::json!({
      "name": name,
      "mime_type": mime_type,
      "content_base64": base64::engine::general_purpose::STANDARD.encode(&content),
    }));
  }
  let params = serde_json::json!({
    "index": index,
    "document_id": document_id,
    "tags": tags_to_params(&tags)?,
    "files": file_params,
  });
  match call_daemon("import_document", params).await? {
    Ok(result) => {
      print_result(&result);
      Ok(ExitCode::SUCCESS)
    }
    Err(code) => Ok(code),
  }
}

fn mime_guess_from_name(name: &str) -> &'static str {
  let lower = name.to_lowercase();
  if lower.ends_with(".md") {
    "text/markdown"
  } else if lower.ends_with(".html") || lower.ends_with(".htm") {
    "text/html"
  } else {
    "text/plain"
  }
}

async fn cmd_import_text(text: String, index: String, document_id: Option<String>, tags: Vec<String>) -> Result<ExitCode> {
  let params = serde_json::json!({
    "index": index,
    "document_id": document_id,
    "tags": tags_to_params(&tags)?,
    "text": text,
  });
  match call_daemon("import_text", params).await? {
    Ok(result) => {
      print_result(&result);
      Ok(ExitCode::SUCCESS)
    }
    Err(code) => Ok(code),
  }
}

async fn cmd_import_web_page(url: String, index: String, document_id: Option<String>, tags: Vec<String>) -> Result<ExitCode> {
  let params = serde_json::json!({
    "index": index,
    "document_id": document_id,
    "tags": tags_to_params(&tags)?,
    "url": url,
  });
  match call_daemon("import_web_page", params).await? {
    Ok(result) => {
      print_result(&result);
      Ok(ExitCode::SUCCESS)
    }
    Err(code) => Ok(code),
  }
}

async fn cmd_search(query: String, index: String, limit: usize, min_relevance: f32, filters: Vec<String>) -> Result<ExitCode> {
  let params = serde_json::json!({
    "index": index,
    "query": query,
    "limit": limit,
    "min_relevance": min_relevance,
    "filter": filters_to_params(&filters)?,
  });
  match call_daemon("search", params).await? {
    Ok(result) => {
      print_result(&result);
      Ok(ExitCode::SUCCESS)
    }
    Err(code) => Ok(code),
  }
}

async fn cmd_ask(question: String, index: String, min_relevance: f32, filters: Vec<String>) -> Result<ExitCode> {
  let params = serde_json::json!({
    "index": index,
    "question": question,
    "min_relevance": min_relevance,
    "filter": filters_to_params(&filters)?,
  });
  match call_daemon("ask", params).await? {
    Ok(result) => {
      print_result(&result);
      Ok(ExitCode::SUCCESS)
    }
    Err(code) => Ok(code),
  }
}

async fn cmd_list(index: String, limit: usize, filters: Vec<String>) -> Result<ExitCode> {
  let params = serde_json::json!({
    "index": index,
    "limit": limit,
    "filter": filters_to_params(&filters)?,
  });
  match call_daemon("list", params).await? {
    Ok(result) => {
      print_result(&result);
      Ok(ExitCode::SUCCESS)
    }
    Err(code) => Ok(code),
  }
}

async fn cmd_delete(document_id: String, index: String) -> Result<ExitCode> {
  let params = serde_json::json!({"index": index, "document_id": document_id});
  match call_daemon("delete", params).await? {
    Ok(result) => {
      print_result(&result);
      Ok(ExitCode::SUCCESS)
    }
    Err(code) => Ok(code),
  }
}

async fn cmd_status(document_id: String, index: String) -> Result<ExitCode> {
  let params = serde_json::json!({"index": index, "document_id": document_id});
  match call_daemon("status", params).await? {
    Ok(result) => {
      print_result(&result);
      Ok(ExitCode::SUCCESS)
    }
    Err(code) => Ok(code),
  }
}

#[tokio::main]
async fn main() -> ExitCode {
  let cli = Cli::parse();

  if !matches!(cli.command, Commands::Daemon) {
    init_cli_logging();
  }

  let result = match cli.command {
    Commands::Daemon => cmd_daemon().await,
    Commands::Stop => cmd_stop().await,
    Commands::ImportDocument { files, index, document_id, tags } => cmd_import_document(files, index, document_id, tags).await,
    Commands::ImportText { text, index, document_id, tags } => cmd_import_text(text, index, document_id, tags).await,
    Commands::ImportWebPage { url, index, document_id, tags } => cmd_import_web_page(url, index, document_id, tags).await,
    Commands::Search { query, index, limit, min_relevance, filters } => cmd_search(query, index, limit, min_relevance, filters).await,
    Commands::Ask { question, index, min_relevance, filters } => cmd_ask(question, index, min_relevance, filters).await,
    Commands::List { index, limit, filters } => cmd_list(index, limit, filters).await,
    Commands::Delete { document_id, index } => cmd_delete(document_id, index).await,
    Commands::Status { document_id, index } => cmd_status(document_id, index).await,
  };

  match result {
    Ok(code) => code,
    Err(e) => {
      eprintln!("error: {e:#}");
      ExitCode::FAILURE
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tags_to_params_groups_repeated_keys() {
    let params = tags_to_params(&["lang=en".to_string(), "lang=fr".to_string(), "user=blake".to_string()]).unwrap();
    assert_eq!(params["lang"], serde_json::json!(["en", "fr"]));
    assert_eq!(params["user"], serde_json::json!(["blake"]));
  }

  #[test]
  fn tags_to_params_rejects_missing_equals() {
    assert!(tags_to_params(&["broken".to_string()]).is_err());
  }

  #[test]
  fn filters_to_params_builds_dnf_clauses() {
    let params = filters_to_params(&["user=blake,doc=a".to_string(), "user=taylor".to_string()]).unwrap();
    assert_eq!(
      params,
      serde_json::json!([
        [["user", "blake"], ["doc", "a"]],
        [["user", "taylor"]],
      ])
    );
  }

  #[test]
  fn mime_guess_recognizes_markdown() {
    assert_eq!(mime_guess_from_name("readme.md"), "text/markdown");
    assert_eq!(mime_guess_from_name("page.html"), "text/html");
    assert_eq!(mime_guess_from_name("notes.txt"), "text/plain");
  }

  #[test]
  fn exit_code_mapping_matches_spec() {
    assert_eq!(exit_code_for_rpc_error(2), 3);
    assert_eq!(exit_code_for_rpc_error(4), 4);
    assert_eq!(exit_code_for_rpc_error(5), 5);
  }
}
