//! Inbound entry point of the built-in event service.
//!
//! Per call: mint a correlation ID, resolve transport properties from the
//! call's metadata, register the response handle, arm its deadline, then hand
//! the payload to the listener.
//! Registration happens before the listener sees the event, so a response
//! produced immediately downstream always finds its pending call.

use crate::adapters::render_metadata;
use crate::domain::correlation::{CorrelationId, MESSAGE_ID};
use crate::domain::error::{CallStatus, HeaderError};
use crate::domain::pending::{CorrelationTable, ResponseHandle};
use crate::ports::{EventListener, HeaderExtractor};
use crate::scheduler::TimeoutScheduler;
use axum::http::HeaderMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// Header augmentation settings
pub struct HeaderAugmentation {
    /// Collaborator that resolves the requested properties
    pub extractor: Arc<dyn HeaderExtractor>,
    /// Transport property names the listener expects, in order
    pub requested: Vec<String>,
}

/// Header string for one call: its rendered metadata plus its correlation ID
fn header_string(metadata: &HeaderMap, id: &CorrelationId) -> String {
    let rendered = render_metadata(metadata);
    if rendered.is_empty() {
        format!("'{}:{}'", MESSAGE_ID, id)
    } else {
        format!("{}, '{}:{}'", rendered, MESSAGE_ID, id)
    }
}

impl HeaderAugmentation {
    fn transport_properties(
        &self,
        metadata: &HeaderMap,
        id: &CorrelationId,
    ) -> Result<Vec<String>, HeaderError> {
        self.extractor
            .extract(&header_string(metadata, id), &self.requested)
    }
}

/// Request handler for the built-in event service
pub struct RequestHandler {
    source_id: String,
    table: Arc<CorrelationTable>,
    scheduler: TimeoutScheduler,
    listener: Arc<dyn EventListener>,
    headers: Option<HeaderAugmentation>,
    rejected: AtomicU64,
}

impl RequestHandler {
    pub fn new(
        source_id: impl Into<String>,
        table: Arc<CorrelationTable>,
        scheduler: TimeoutScheduler,
        listener: Arc<dyn EventListener>,
        headers: Option<HeaderAugmentation>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            table,
            scheduler,
            listener,
            headers,
            rejected: AtomicU64::new(0),
        }
    }

    /// Accept one inbound call carrying `metadata`.
    ///
    /// The handle is either registered (and later resolved by the response
    /// dispatcher or the deadline) or failed immediately.
    pub fn handle(&self, payload: String, metadata: &HeaderMap, handle: ResponseHandle) {
        let id = CorrelationId::new();

        let transport_properties = match &self.headers {
            Some(headers) => match headers.transport_properties(metadata, &id) {
                Ok(properties) => properties,
                Err(e) => {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    error!(
                        source_id = %self.source_id,
                        correlation_id = %id,
                        error = %e,
                        "Dropping request"
                    );
                    handle.fail(CallStatus::DataLoss);
                    return;
                }
            },
            None => vec![id.to_string()],
        };

        if let Err(dup) = self.table.insert(id, handle) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            error!(source_id = %self.source_id, error = %dup, "Dropping request");
            dup.handle.fail(CallStatus::Internal);
            return;
        }
        self.scheduler.arm(id);

        debug!(
            source_id = %self.source_id,
            correlation_id = %id,
            "Dispatching request to listener"
        );
        self.listener.on_event(payload, transport_properties);
    }

    /// Number of calls rejected before registration
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ChannelListener, QuotedHeaderExtractor};
    use axum::http::HeaderValue;
    use std::time::Duration;

    fn handler_with(headers: Option<HeaderAugmentation>) -> (
        RequestHandler,
        Arc<CorrelationTable>,
        tokio::sync::mpsc::UnboundedReceiver<crate::adapters::ReceivedEvent>,
    ) {
        let table = Arc::new(CorrelationTable::new());
        let (scheduler, task) = TimeoutScheduler::new(Arc::clone(&table), Duration::from_secs(30));
        tokio::spawn(task.run());
        let (listener, events) = ChannelListener::new();
        let handler = RequestHandler::new(
            "test-source",
            Arc::clone(&table),
            scheduler,
            Arc::new(listener),
            headers,
        );
        (handler, table, events)
    }

    fn augmentation(requested: &[&str]) -> HeaderAugmentation {
        HeaderAugmentation {
            extractor: Arc::new(QuotedHeaderExtractor::new()),
            requested: requested.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn metadata(entries: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut metadata = HeaderMap::new();
        for (name, value) in entries {
            metadata.insert(*name, HeaderValue::from_static(*value));
        }
        metadata
    }

    #[tokio::test]
    async fn test_without_headers_forwards_correlation_id_only() {
        let (handler, table, mut events) = handler_with(None);
        let (handle, _rx) = ResponseHandle::channel();

        handler.handle("payload".into(), &HeaderMap::new(), handle);

        let event = events.recv().await.unwrap();
        assert_eq!(event.payload, "payload");
        assert_eq!(event.transport_properties.len(), 1);
        let id = CorrelationId::parse(&event.transport_properties[0]).unwrap();
        assert!(table.contains(&id));
    }

    #[tokio::test]
    async fn test_entry_is_visible_when_listener_runs() {
        struct AssertRegistered(Arc<CorrelationTable>);
        impl EventListener for AssertRegistered {
            fn on_event(&self, _payload: String, properties: Vec<String>) {
                let id = CorrelationId::parse(&properties[0]).unwrap();
                let handle = self.0.remove_if_present(&id).expect("registered before dispatch");
                handle.complete("fast".into());
            }
        }

        let table = Arc::new(CorrelationTable::new());
        let (scheduler, _task) = TimeoutScheduler::new(Arc::clone(&table), Duration::from_secs(30));
        let handler = RequestHandler::new(
            "fast",
            Arc::clone(&table),
            scheduler,
            Arc::new(AssertRegistered(Arc::clone(&table))),
            None,
        );

        let (handle, rx) = ResponseHandle::channel();
        handler.handle("x".into(), &HeaderMap::new(), handle);
        assert_eq!(rx.await.unwrap(), Ok("fast".to_string()));
    }

    #[tokio::test]
    async fn test_headers_resolve_requested_properties() {
        let (handler, table, mut events) =
            handler_with(Some(augmentation(&["name", MESSAGE_ID, "age"])));
        let (handle, _rx) = ResponseHandle::channel();

        let call_metadata = metadata(&[("name", "John"), ("age", "23")]);
        handler.handle("body".into(), &call_metadata, handle);

        let event = events.recv().await.unwrap();
        assert_eq!(event.transport_properties[0], "John");
        assert_eq!(event.transport_properties[2], "23");
        let id = CorrelationId::parse(&event.transport_properties[1]).unwrap();
        assert!(table.contains(&id));
    }

    #[tokio::test]
    async fn test_each_call_resolves_its_own_metadata() {
        let (handler, _table, mut events) = handler_with(Some(augmentation(&["name"])));

        for name in ["John", "Jane"] {
            let (handle, _rx) = ResponseHandle::channel();
            let mut call_metadata = HeaderMap::new();
            call_metadata.insert("name", HeaderValue::from_static(name));
            handler.handle("body".into(), &call_metadata, handle);

            let event = events.recv().await.unwrap();
            assert_eq!(event.transport_properties, vec![name.to_string()]);
        }
    }

    #[tokio::test]
    async fn test_missing_requested_property_rejects() {
        let (handler, table, mut events) = handler_with(Some(augmentation(&["name", "age"])));
        let (handle, rx) = ResponseHandle::channel();

        handler.handle("body".into(), &metadata(&[("name", "John")]), handle);

        assert_eq!(rx.await.unwrap(), Err(CallStatus::DataLoss));
        assert!(table.is_empty());
        assert_eq!(table.stats().registered(), 0);
        assert_eq!(handler.rejected_count(), 1);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_header_string_appends_message_id() {
        let id = CorrelationId::new();
        assert_eq!(
            header_string(&metadata(&[("a", "1")]), &id),
            format!("'a:1', 'messageId:{}'", id)
        );
        assert_eq!(
            header_string(&HeaderMap::new(), &id),
            format!("'messageId:{}'", id)
        );
    }
}
