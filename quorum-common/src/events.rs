//! Event types for the Quorum event system
//!
//! Provides publication progress events and the EventBus that fans them out
//! to SSE clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Quorum event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QuorumEvent {
    /// A publication run passed configuration checks and entered the task loop
    PublicationStarted {
        process_id: Uuid,
        campaign_id: Uuid,
        /// Campaign mode being published (e.g. "transcription")
        mode: String,
        timestamp: DateTime<Utc>,
    },

    /// One task was handled by the run
    TaskProcessed {
        process_id: Uuid,
        task_id: Uuid,
        /// "published", "skipped" or "failed"
        outcome: String,
        timestamp: DateTime<Utc>,
    },

    /// The run finished, possibly with some tasks left unpublished
    PublicationCompleted {
        process_id: Uuid,
        published: usize,
        skipped: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },

    /// The run aborted on a fatal error
    PublicationFailed {
        process_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl QuorumEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &str {
        match self {
            QuorumEvent::PublicationStarted { .. } => "PublicationStarted",
            QuorumEvent::TaskProcessed { .. } => "TaskProcessed",
            QuorumEvent::PublicationCompleted { .. } => "PublicationCompleted",
            QuorumEvent::PublicationFailed { .. } => "PublicationFailed",
        }
    }

    /// Process the event belongs to
    pub fn process_id(&self) -> Uuid {
        match self {
            QuorumEvent::PublicationStarted { process_id, .. }
            | QuorumEvent::TaskProcessed { process_id, .. }
            | QuorumEvent::PublicationCompleted { process_id, .. }
            | QuorumEvent::PublicationFailed { process_id, .. } => *process_id,
        }
    }
}

/// Central event distribution bus
///
/// Wraps a tokio broadcast channel: publishing never blocks, slow
/// subscribers observe a lag instead of stalling the run.
///
/// # Examples
///
/// ```
/// use quorum_common::events::{EventBus, QuorumEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(QuorumEvent::PublicationFailed {
///     process_id: uuid::Uuid::new_v4(),
///     error: "No available matching class".to_string(),
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QuorumEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<QuorumEvent> {
        self.tx.subscribe()
    }

    /// Emit an event
    ///
    /// Returns `Err` if no subscribers are listening.
    pub fn emit(
        &self,
        event: QuorumEvent,
    ) -> Result<usize, broadcast::error::SendError<QuorumEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: QuorumEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
