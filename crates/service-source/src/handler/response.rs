//! Callback through which the response-producing stage completes calls.

use crate::domain::correlation::CorrelationId;
use crate::domain::pending::CorrelationTable;
use std::sync::Arc;
use tracing::debug;

/// Completes pending calls with payloads produced downstream.
///
/// Unknown, expired and already-completed IDs are a silent no-op: losing the
/// race against the deadline is an expected outcome, not an error.
#[derive(Debug)]
pub struct ResponseDispatcher {
    source_id: String,
    table: Arc<CorrelationTable>,
    enabled: bool,
}

impl ResponseDispatcher {
    /// Dispatcher for the built-in event service
    pub fn new(source_id: impl Into<String>, table: Arc<CorrelationTable>) -> Self {
        Self {
            source_id: source_id.into(),
            table,
            enabled: true,
        }
    }

    /// Dispatcher for a custom service, which completes its own calls.
    /// Every dispatch is a no-op.
    pub fn disabled(source_id: impl Into<String>, table: Arc<CorrelationTable>) -> Self {
        Self {
            source_id: source_id.into(),
            table,
            enabled: false,
        }
    }

    /// Complete the call identified by the textual correlation ID.
    ///
    /// Returns true if a pending call was completed.
    pub fn dispatch(&self, correlation_id: &str, payload: String) -> bool {
        match CorrelationId::parse(correlation_id) {
            Ok(id) => self.dispatch_id(id, payload),
            Err(_) => {
                debug!(
                    source_id = %self.source_id,
                    correlation_id,
                    "Ignoring response with unparseable correlation id"
                );
                false
            }
        }
    }

    /// Complete the call identified by `id`.
    pub fn dispatch_id(&self, id: CorrelationId, payload: String) -> bool {
        if !self.enabled {
            debug!(
                source_id = %self.source_id,
                correlation_id = %id,
                "Custom service completes its own calls; ignoring response"
            );
            return false;
        }

        let Some((handle, elapsed)) = self.table.remove_with_age(&id) else {
            debug!(
                source_id = %self.source_id,
                correlation_id = %id,
                "Response for unknown or expired correlation id"
            );
            return false;
        };

        self.table.stats().record_completed(!handle.is_closed());
        let delivered = handle.complete(payload);
        debug!(
            source_id = %self.source_id,
            correlation_id = %id,
            response_time_ms = elapsed.as_millis() as u64,
            delivered,
            "Completed pending call"
        );
        true
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Whether this dispatcher completes calls (built-in service mode)
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
