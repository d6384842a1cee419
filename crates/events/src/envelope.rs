use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope for an audit event, containing delivery metadata.
///
/// This is the unit handed to the audit/event sink.
///
/// Notes:
/// - `subject_type` names the entity the event is about ("reservation",
///   "transfer", "stock", ...); `subject_id` is that entity's id.
/// - `sequence_number` is assigned by the publisher and is monotonically
///   increasing per publisher, so consumers can detect gaps and duplicates.
/// - `payload` is the domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,

    subject_id: Uuid,
    subject_type: String,

    /// Monotonically increasing position in the publisher's output.
    sequence_number: u64,

    recorded_at: DateTime<Utc>,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        subject_id: Uuid,
        subject_type: impl Into<String>,
        sequence_number: u64,
        recorded_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            subject_id,
            subject_type: subject_type.into(),
            sequence_number,
            recorded_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn subject_id(&self) -> Uuid {
        self.subject_id
    }

    pub fn subject_type(&self) -> &str {
        &self.subject_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
