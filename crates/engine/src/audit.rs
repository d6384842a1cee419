//! Audit sink: where committed transitions are reported.
//!
//! Recording is fire-and-forget. A failed publish is logged and never undoes
//! the ledger mutation it describes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;
use uuid::Uuid;

use stockpilot_core::Clock;
use stockpilot_events::{Event, EventBus, EventEnvelope};
use stockpilot_inventory::InventoryEvent;

pub trait AuditSink: Send + Sync {
    fn record(&self, event: InventoryEvent);
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: InventoryEvent) {}
}

/// Wraps events in envelopes and publishes them on a typed bus.
pub struct BusAuditSink<B> {
    bus: B,
    clock: Arc<dyn Clock>,
    sequence: AtomicU64,
}

impl<B> BusAuditSink<B> {
    pub fn new(bus: B, clock: Arc<dyn Clock>) -> Self {
        Self {
            bus,
            clock,
            sequence: AtomicU64::new(0),
        }
    }

    fn envelope<P>(&self, subject: (&'static str, Uuid), payload: P) -> EventEnvelope<P> {
        let (subject_type, subject_id) = subject;
        EventEnvelope::new(
            Uuid::now_v7(),
            subject_id,
            subject_type,
            self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            self.clock.now(),
            payload,
        )
    }
}

impl<B> AuditSink for BusAuditSink<B>
where
    B: EventBus<EventEnvelope<InventoryEvent>>,
{
    fn record(&self, event: InventoryEvent) {
        let event_type = event.event_type();
        let envelope = self.envelope(event.subject(), event);
        if let Err(err) = self.bus.publish(envelope) {
            warn!(event_type, error = ?err, "audit publish failed");
        }
    }
}

/// Publishes events as JSON payloads, for buses shared with non-Rust consumers.
pub struct JsonBusAuditSink<B> {
    inner: BusAuditSink<B>,
}

impl<B> JsonBusAuditSink<B> {
    pub fn new(bus: B, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: BusAuditSink::new(bus, clock),
        }
    }
}

impl<B> AuditSink for JsonBusAuditSink<B>
where
    B: EventBus<EventEnvelope<serde_json::Value>>,
{
    fn record(&self, event: InventoryEvent) {
        let event_type = event.event_type();
        let payload = match serde_json::to_value(&event) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(event_type, error = %err, "audit event could not be serialized");
                return;
            }
        };
        let envelope = self.inner.envelope(event.subject(), payload);
        if let Err(err) = self.inner.bus.publish(envelope) {
            warn!(event_type, error = ?err, "audit publish failed");
        }
    }
}

impl<S: AuditSink + ?Sized> AuditSink for Arc<S> {
    fn record(&self, event: InventoryEvent) {
        (**self).record(event)
    }
}
