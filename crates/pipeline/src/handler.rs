//! The step-invocation contract and the handler registry (spec.md §4.1,
//! §9's "dynamic-dispatch handler registry with reflection-backed DI").
//!
//! The registry is a plain map built explicitly at startup — no runtime
//! type lookup, no DI container. A step name that has no registered
//! handler is a configuration error caught when a pipeline is first run,
//! not when the binary starts, so the same registry can be grown
//! incrementally in tests.

use async_trait::async_trait;
use kmem_core::{DataPipeline, Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::PipelineContext;

/// A concrete step implementation. A handler is forbidden from advancing
/// `pipeline.completed_steps` itself — only the orchestrator does that,
/// and only when `invoke` reports `success = true` (spec.md §4.1).
///
/// Handlers must be idempotent: a step that already partially ran (crash
/// mid-file-loop, at-least-once redelivery) may be invoked again and must
/// produce the same end state without duplicating work.
#[async_trait]
pub trait StepHandler: Send + Sync {
  fn step_name(&self) -> &str;

  async fn invoke(&self, pipeline: DataPipeline, ctx: &PipelineContext) -> Result<(bool, DataPipeline)>;
}

/// Read-only after startup (spec.md §5's shared-resource policy): built
/// once, then only ever queried by the orchestrator.
#[derive(Default)]
pub struct HandlerRegistry {
  handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a handler for its step name, replacing any existing
  /// registration for that name.
  pub fn add_handler(&mut self, handler: Arc<dyn StepHandler>) -> &mut Self {
    self.handlers.insert(handler.step_name().to_string(), handler);
    self
  }

  /// Register only if no handler is already registered for this step name.
  pub fn try_add_handler(&mut self, handler: Arc<dyn StepHandler>) -> bool {
    if self.handlers.contains_key(handler.step_name()) {
      return false;
    }
    self.handlers.insert(handler.step_name().to_string(), handler);
    true
  }

  pub fn get(&self, step_name: &str) -> Option<Arc<dyn StepHandler>> {
    self.handlers.get(step_name).cloned()
  }

  pub fn resolve(&self, step_name: &str) -> Result<Arc<dyn StepHandler>> {
    self
      .get(step_name)
      .ok_or_else(|| Error::Configuration(format!("no handler registered for step {step_name:?}")))
  }

  pub fn step_names(&self) -> impl Iterator<Item = &str> {
    self.handlers.keys().map(String::as_str)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct NoopHandler(&'static str);

  #[async_trait]
  impl StepHandler for NoopHandler {
    fn step_name(&self) -> &str {
      self.0
    }

    async fn invoke(&self, pipeline: DataPipeline, _ctx: &PipelineContext) -> Result<(bool, DataPipeline)> {
      Ok((true, pipeline))
    }
  }

  #[test]
  fn try_add_handler_is_idempotent() {
    let mut registry = HandlerRegistry::new();
    assert!(registry.try_add_handler(Arc::new(NoopHandler("extract"))));
    assert!(!registry.try_add_handler(Arc::new(NoopHandler("extract"))));
    assert_eq!(registry.step_names().count(), 1);
  }

  #[test]
  fn add_handler_replaces_existing() {
    let mut registry = HandlerRegistry::new();
    registry.add_handler(Arc::new(NoopHandler("extract")));
    registry.add_handler(Arc::new(NoopHandler("extract")));
    assert_eq!(registry.step_names().count(), 1);
  }

  #[test]
  fn resolve_missing_step_is_configuration_error() {
    let registry = HandlerRegistry::new();
    let err = registry.resolve("missing").unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
  }
}
