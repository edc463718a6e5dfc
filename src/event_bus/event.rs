use std::fmt::Debug;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Event Envelope - dispatch metadata around a domain event
// ============================================================================

/// Generic Event Envelope - wraps any domain event with metadata
///
/// `causation_id` points at the envelope whose handler published this one,
/// `correlation_id` is shared by every event of one inbound request.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct EventEnvelope<E> {
    pub event_id: Uuid,
    pub event_type: String,
    pub event_data: E,

    pub causation_id: Option<Uuid>,
    pub correlation_id: Uuid,

    /// Nesting level: 0 for events published outside any handler
    pub depth: u32,
    pub timestamp: DateTime<Utc>,
}

impl<E: DomainEvent> EventEnvelope<E> {
    pub fn new(event_data: E, correlation_id: Uuid) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: event_data.event_type().to_string(),
            event_data,
            causation_id: None,
            correlation_id,
            depth: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn caused_by(mut self, causation_id: Uuid, depth: u32) -> Self {
        self.causation_id = Some(causation_id);
        self.depth = depth;
        self
    }
}

// ============================================================================
// Domain Event Trait
// ============================================================================

/// Implemented by every event type carried on an [`EventBus`](super::EventBus).
///
/// `Kind` is the subscription key; listeners register per kind rather than
/// by string name.
pub trait DomainEvent: Clone + Send + Sync {
    type Kind: Copy + Eq + Hash + Debug + Send + Sync;

    fn kind(&self) -> Self::Kind;
    fn event_type(&self) -> &'static str;
}

/// JSON form of an envelope, as written to audit logs.
pub fn serialize_event<E: Serialize>(envelope: &EventEnvelope<E>) -> serde_json::Result<String> {
    serde_json::to_string(envelope)
}
