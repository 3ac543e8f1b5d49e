use tracing::info;

use noor_core::audit::{AuditEvent, AuditSink};

/// Emits audit events as structured log records.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();
        info!(
            event_name = event.action.as_str(),
            event_id = %event.event_id,
            correlation_id = %event.correlation_id,
            sender_id = event.sender_id.as_ref().map(|sender| sender.as_str()).unwrap_or(""),
            category = ?event.action.category(),
            outcome = ?event.outcome,
            actor = %event.actor,
            metadata = %metadata,
            "audit event"
        );
    }
}
