//! Domain types for the service source.
//!
//! Correlation, pending-call bookkeeping, configuration, lifecycle state and
//! error taxonomy. Nothing here performs I/O.

pub mod config;
pub mod correlation;
pub mod error;
pub mod lifecycle;
pub mod pending;

// Re-exports for convenience
pub use config::{Endpoint, SourceConfig, DEFAULT_METHOD_NAME, DEFAULT_SERVICE_NAME};
pub use correlation::{CorrelationId, MESSAGE_ID};
pub use error::{
    CallStatus, ConfigError, HeaderError, RegistryError, SourceError, SourceResult, StatusBody,
};
pub use lifecycle::{AtomicLifecycle, LifecycleState, ShutdownOutcome};
pub use pending::{
    CallOutcome, CorrelationTable, DuplicateCorrelationId, PendingStats, ResponseHandle,
};
