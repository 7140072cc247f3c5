//! Cooperative cancellation, threaded from a daemon ingest call down through
//! `PipelineContext` into every handler.

pub use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn child_token_cancelled_with_parent() {
    let parent = CancellationToken::new();
    let child = parent.child_token();
    assert!(!child.is_cancelled());
    parent.cancel();
    assert!(child.is_cancelled());
  }
}
