//! Event types for the Chorus event system
//!
//! Provides shared event definitions and the EventBus used to notify callers
//! (SSE clients, in-process listeners) about pipeline progress.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Chorus event types
///
/// Events are broadcast via EventBus and can be serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChorusEvent {
    /// Reference feature set changed status
    ReferenceStatusChanged {
        reference_id: Uuid,
        song_id: String,
        voice_part: String,
        /// New status ("PENDING", "PROCESSING", "READY", "FAILED")
        status: String,
        /// Error message when status is FAILED
        error: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Worker claimed an analysis attempt
    AnalysisStarted {
        attempt_id: Uuid,
        user_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Analysis attempt reached READY
    AnalysisCompleted {
        attempt_id: Uuid,
        user_id: String,
        overall_score: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Analysis attempt reached FAILED
    ///
    /// Emitted even for failures so polling consumers stop promptly.
    AnalysisFailed {
        attempt_id: Uuid,
        user_id: String,
        /// Pipeline stage that failed (e.g. "decode", "align")
        stage: String,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl ChorusEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &str {
        match self {
            ChorusEvent::ReferenceStatusChanged { .. } => "ReferenceStatusChanged",
            ChorusEvent::AnalysisStarted { .. } => "AnalysisStarted",
            ChorusEvent::AnalysisCompleted { .. } => "AnalysisCompleted",
            ChorusEvent::AnalysisFailed { .. } => "AnalysisFailed",
        }
    }

    /// Attempt this event refers to, if any
    pub fn attempt_id(&self) -> Option<Uuid> {
        match self {
            ChorusEvent::AnalysisStarted { attempt_id, .. }
            | ChorusEvent::AnalysisCompleted { attempt_id, .. }
            | ChorusEvent::AnalysisFailed { attempt_id, .. } => Some(*attempt_id),
            ChorusEvent::ReferenceStatusChanged { .. } => None,
        }
    }
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use chorus_common::events::{ChorusEvent, EventBus};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(ChorusEvent::AnalysisStarted {
///     attempt_id: uuid::Uuid::new_v4(),
///     user_id: "alto-7".to_string(),
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChorusEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ChorusEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ChorusEvent,
    ) -> Result<usize, broadcast::error::SendError<ChorusEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ChorusEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
