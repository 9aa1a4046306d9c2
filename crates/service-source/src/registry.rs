//! Source registry - maps a configured source ID to its live dispatcher.
//!
//! Response-producing stages use it to route a computed payload back to the
//! source that accepted the call. The registry is an explicitly shared value:
//! sources are registered while their server runs and removed when it stops.

use crate::domain::error::RegistryError;
use crate::handler::ResponseDispatcher;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Lookup from source ID to response dispatcher
#[derive(Debug, Default)]
pub struct SourceRegistry {
    sources: DashMap<String, Arc<ResponseDispatcher>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dispatcher under its source ID.
    pub fn register(&self, dispatcher: Arc<ResponseDispatcher>) -> Result<(), RegistryError> {
        let source_id = dispatcher.source_id().to_string();
        match self.sources.entry(source_id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyRegistered(source_id)),
            Entry::Vacant(slot) => {
                slot.insert(dispatcher);
                info!(source_id = %source_id, "Registered service source");
                Ok(())
            }
        }
    }

    /// Remove the dispatcher registered under `source_id`.
    ///
    /// Returns false if nothing was registered.
    pub fn deregister(&self, source_id: &str) -> bool {
        let removed = self.sources.remove(source_id).is_some();
        if removed {
            info!(source_id, "Deregistered service source");
        }
        removed
    }

    /// Look up the dispatcher for `source_id`
    pub fn dispatcher(&self, source_id: &str) -> Option<Arc<ResponseDispatcher>> {
        self.sources.get(source_id).map(|d| Arc::clone(d.value()))
    }

    /// Route a response to the source that accepted the call.
    ///
    /// Returns true if a pending call was completed. Unknown sources are a
    /// no-op, like unknown correlation IDs.
    pub fn dispatch(&self, source_id: &str, correlation_id: &str, payload: String) -> bool {
        match self.dispatcher(source_id) {
            Some(dispatcher) => dispatcher.dispatch(correlation_id, payload),
            None => {
                debug!(source_id, "Response for unregistered source");
                false
            }
        }
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.sources.contains_key(source_id)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::correlation::CorrelationId;
    use crate::domain::pending::{CorrelationTable, ResponseHandle};

    fn dispatcher(source_id: &str) -> (Arc<ResponseDispatcher>, Arc<CorrelationTable>) {
        let table = Arc::new(CorrelationTable::new());
        (
            Arc::new(ResponseDispatcher::new(source_id, Arc::clone(&table))),
            table,
        )
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = SourceRegistry::new();
        let (d, _) = dispatcher("1");
        registry.register(d).unwrap();

        assert!(registry.contains("1"));
        assert_eq!(registry.dispatcher("1").unwrap().source_id(), "1");
        assert!(registry.dispatcher("2").is_none());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = SourceRegistry::new();
        let (a, _) = dispatcher("dup");
        let (b, _) = dispatcher("dup");
        registry.register(a).unwrap();

        assert_eq!(
            registry.register(b),
            Err(RegistryError::AlreadyRegistered("dup".into()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_deregister() {
        let registry = SourceRegistry::new();
        let (d, _) = dispatcher("1");
        registry.register(d).unwrap();

        assert!(registry.deregister("1"));
        assert!(!registry.deregister("1"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_routes_to_source() {
        let registry = SourceRegistry::new();
        let (d, table) = dispatcher("orders");
        registry.register(d).unwrap();

        let id = CorrelationId::new();
        let (handle, rx) = ResponseHandle::channel();
        table.insert(id, handle).unwrap();

        assert!(!registry.dispatch("payments", &id.to_string(), "wrong".into()));
        assert!(registry.dispatch("orders", &id.to_string(), "right".into()));
        assert_eq!(rx.await.unwrap(), Ok("right".to_string()));
    }
}
