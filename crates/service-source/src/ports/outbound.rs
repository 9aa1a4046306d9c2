//! Outbound ports for the service source.

use crate::domain::error::HeaderError;

/// Receives decoded payloads from the source.
///
/// Fire-and-forget: the source never waits on downstream processing, so
/// implementations must hand the event off without blocking on it.
pub trait EventListener: Send + Sync {
    /// Deliver a payload together with its resolved transport properties.
    fn on_event(&self, payload: String, transport_properties: Vec<String>);
}

/// Resolves transport properties from a header string.
pub trait HeaderExtractor: Send + Sync {
    /// Returns one value per requested property name, in request order.
    fn extract(&self, headers: &str, requested: &[String]) -> Result<Vec<String>, HeaderError>;
}
