//! FIFO message queue with at-least-once dequeue, visibility timeout and
//! poison routing, used by the distributed pipeline execution mode
//! (spec.md §4.1, §5).
//!
//! A message that stays dequeued-but-unacknowledged past its visibility
//! timeout becomes eligible for redelivery again, incrementing its dequeue
//! count. Once the count exceeds a configured bound it is moved to a side
//! "poison" queue named `<queue_name>.poison` with its original content
//! preserved, and is never redelivered from the main queue again. A message
//! that is explicitly `abandon`ed (rather than timing out) is held back from
//! redelivery for `dequeueCount × 1s` (spec.md §5's backpressure policy).

use async_trait::async_trait;
use dashmap::DashMap;
use kmem_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// A single queue message: the step-invocation payload plus delivery
/// bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
  pub id: Uuid,
  pub body: serde_json::Value,
  /// Number of times this message has been handed out by `dequeue`.
  pub dequeue_count: u32,
}

impl Message {
  fn new(body: serde_json::Value) -> Self {
    Self {
      id: Uuid::now_v7(),
      body,
      dequeue_count: 0,
    }
  }
}

/// Queue capability set: enqueue, at-least-once dequeue with visibility
/// timeout, and poison-queue inspection.
///
/// Implementations must be safe to share across tasks/workers (`Send +
/// Sync`). A message handed out by `dequeue` is invisible to other
/// consumers until `complete`, `abandon`, or the visibility timeout elapses,
/// whichever comes first.
#[async_trait]
pub trait Queue: Send + Sync {
  /// Append a message to the named queue's tail.
  async fn enqueue(&self, queue_name: &str, body: serde_json::Value) -> Result<()>;

  /// Pop the oldest visible message, making it invisible for this queue's
  /// configured visibility timeout. Returns `None` if the queue is empty.
  async fn dequeue(&self, queue_name: &str) -> Result<Option<Message>>;

  /// Acknowledge successful processing: the message is removed for good.
  /// Idempotent if the message is already gone (e.g. completed twice after
  /// a crash-replay).
  async fn complete(&self, queue_name: &str, message_id: Uuid) -> Result<()>;

  /// Report failed processing: the message becomes visible again after a
  /// delay of `dequeueCount × 1s` (or moves to the poison queue if its
  /// dequeue count has already exceeded the configured bound).
  async fn abandon(&self, queue_name: &str, message_id: Uuid) -> Result<()>;

  /// List messages currently sitting in `<queue_name>`'s poison queue.
  async fn poisoned(&self, queue_name: &str) -> Result<Vec<Message>>;

  /// Current count of visible + in-flight messages, for status reporting.
  async fn depth(&self, queue_name: &str) -> Result<usize>;
}

struct InFlight {
  message: Message,
  visible_at: Instant,
}

/// A message abandoned by its handler, held back from redelivery until
/// `ready_at`.
struct Delayed {
  message: Message,
  ready_at: Instant,
}

#[derive(Default)]
struct QueueState {
  pending: VecDeque<Message>,
  in_flight: std::collections::HashMap<Uuid, InFlight>,
  delayed: Vec<Delayed>,
  poison: Vec<Message>,
}

/// In-process `Queue` backed by per-queue-name mutex-guarded state.
///
/// Used directly by the in-process pipeline execution mode's tests and as
/// the reference implementation the distributed mode dispatches against
/// when no external broker is configured.
pub struct InProcessQueue {
  queues: DashMap<String, Mutex<QueueState>>,
  visibility_timeout: Duration,
  max_dequeue_count: u32,
}

impl InProcessQueue {
  pub fn new(visibility_timeout: Duration, max_dequeue_count: u32) -> Self {
    Self {
      queues: DashMap::new(),
      visibility_timeout,
      max_dequeue_count,
    }
  }

  fn entry(&self, queue_name: &str) -> dashmap::mapref::one::Ref<'_, String, Mutex<QueueState>> {
    self.queues.entry(queue_name.to_string()).or_default();
    self.queues.get(queue_name).expect("just inserted")
  }

  /// Move any in-flight message whose visibility timeout has elapsed back
  /// to `pending`, or to `poison` if it has exhausted its dequeue budget.
  fn reap_expired(&self, state: &mut QueueState, queue_name: &str) {
    let now = Instant::now();
    let expired: Vec<Uuid> = state
      .in_flight
      .iter()
      .filter(|(_, inflight)| inflight.visible_at <= now)
      .map(|(id, _)| *id)
      .collect();

    for id in expired {
      if let Some(inflight) = state.in_flight.remove(&id) {
        if inflight.message.dequeue_count >= self.max_dequeue_count {
          warn!(queue_name, message_id = %id, dequeue_count = inflight.message.dequeue_count, "message exceeded max dequeue count, routing to poison queue");
          state.poison.push(inflight.message);
        } else {
          state.pending.push_back(inflight.message);
        }
      }
    }
  }

  /// Move any delayed message whose `ready_at` has passed back onto `pending`.
  fn promote_ready_delayed(&self, state: &mut QueueState) {
    let now = Instant::now();
    let mut i = 0;
    while i < state.delayed.len() {
      if state.delayed[i].ready_at <= now {
        let delayed = state.delayed.remove(i);
        state.pending.push_back(delayed.message);
      } else {
        i += 1;
      }
    }
  }
}

#[async_trait]
impl Queue for InProcessQueue {
  async fn enqueue(&self, queue_name: &str, body: serde_json::Value) -> Result<()> {
    let entry = self.entry(queue_name);
    let mut state = entry.lock().await;
    state.pending.push_back(Message::new(body));
    debug!(queue_name, "enqueued message");
    Ok(())
  }

  async fn dequeue(&self, queue_name: &str) -> Result<Option<Message>> {
    let entry = self.entry(queue_name);
    let mut state = entry.lock().await;
    self.reap_expired(&mut state, queue_name);
    self.promote_ready_delayed(&mut state);

    let Some(mut message) = state.pending.pop_front() else {
      return Ok(None);
    };
    message.dequeue_count += 1;
    let id = message.id;
    state.in_flight.insert(
      id,
      InFlight {
        message: message.clone(),
        visible_at: Instant::now() + self.visibility_timeout,
      },
    );
    Ok(Some(message))
  }

  async fn complete(&self, queue_name: &str, message_id: Uuid) -> Result<()> {
    let entry = self.entry(queue_name);
    let mut state = entry.lock().await;
    state.in_flight.remove(&message_id);
    Ok(())
  }

  async fn abandon(&self, queue_name: &str, message_id: Uuid) -> Result<()> {
    let entry = self.entry(queue_name);
    let mut state = entry.lock().await;
    if let Some(inflight) = state.in_flight.remove(&message_id) {
      if inflight.message.dequeue_count >= self.max_dequeue_count {
        state.poison.push(inflight.message);
      } else {
        let delay = Duration::from_secs(inflight.message.dequeue_count as u64);
        debug!(queue_name, message_id = %message_id, delay_secs = delay.as_secs(), "message abandoned, delaying redelivery");
        state.delayed.push(Delayed {
          message: inflight.message,
          ready_at: Instant::now() + delay,
        });
      }
    }
    Ok(())
  }

  async fn poisoned(&self, queue_name: &str) -> Result<Vec<Message>> {
    let entry = self.entry(queue_name);
    let state = entry.lock().await;
    Ok(state.poison.clone())
  }

  async fn depth(&self, queue_name: &str) -> Result<usize> {
    let entry = self.entry(queue_name);
    let mut state = entry.lock().await;
    self.reap_expired(&mut state, queue_name);
    self.promote_ready_delayed(&mut state);
    Ok(state.pending.len() + state.in_flight.len() + state.delayed.len())
  }
}

impl From<&kmem_core::QueueConfig> for InProcessQueue {
  fn from(config: &kmem_core::QueueConfig) -> Self {
    Self::new(Duration::from_secs(config.visibility_timeout_secs), config.max_dequeue_count)
  }
}

/// Error raised by callers that expect a message to still be in flight
/// (e.g. a heartbeat extension) but find it already completed or abandoned.
pub fn message_not_in_flight(queue_name: &str, message_id: Uuid) -> Error {
  Error::TransientBackend(format!("message {message_id} is no longer in flight on queue {queue_name}"))
}
