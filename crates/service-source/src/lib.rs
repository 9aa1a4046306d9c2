//! Service Source - RPC ingress with asynchronous response correlation.
//!
//! Accepts inbound calls on one configured endpoint, hands each payload to an
//! event listener, and completes the call later when a downstream stage
//! produces the response, or fails it when the response does not arrive in
//! time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          SERVICE SOURCE                              │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │   POST /EventService/process                                         │
//! │          │                                                           │
//! │  ┌───────┴──────────────────────────────────────┐                    │
//! │  │               Middleware Stack               │                    │
//! │  │  Tracing → ForceCancel → Limits → BodyLimit  │                    │
//! │  └───────┬──────────────────────────────────────┘                    │
//! │          │                                                           │
//! │  ┌───────┴────────┐  insert  ┌──────────────────┐  arm  ┌─────────┐  │
//! │  │ RequestHandler ├─────────▶│ CorrelationTable │◀──────┤ Deadline│  │
//! │  └───────┬────────┘          │  (promise table) │ expire│  Task   │  │
//! │          │                   └────────▲─────────┘       └─────────┘  │
//! │          │ on_event                   │ remove + complete            │
//! │          ▼                   ┌────────┴───────────┐                  │
//! │    EventListener             │ ResponseDispatcher │◀── SourceRegistry│
//! │                              └────────────────────┘                  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each accepted call ends exactly once: either the dispatcher or the deadline
//! task removes its entry from the [`CorrelationTable`], never both.
//!
//! # Usage
//!
//! ```ignore
//! use service_source::{ChannelListener, ServiceSource, SourceConfig};
//!
//! let (listener, mut events) = ChannelListener::new();
//! let source = ServiceSource::new(
//!     SourceConfig::new("grpc://0.0.0.0:8888", "orders"),
//!     Arc::new(listener),
//! )?;
//! source.start().await?;
//!
//! while let Some(event) = events.recv().await {
//!     let id = &event.transport_properties[0];
//!     source.dispatcher().dispatch(id, event.payload);
//! }
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod domain;
pub mod handler;
pub mod middleware;
pub mod ports;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod service;

// Re-exports
pub use adapters::{ChannelListener, QuotedHeaderExtractor, ReceivedEvent};
pub use domain::{
    CallOutcome, CallStatus, ConfigError, CorrelationId, CorrelationTable, Endpoint, HeaderError,
    LifecycleState, PendingStats, RegistryError, ResponseHandle, ShutdownOutcome, SourceConfig,
    SourceError, SourceResult, StatusBody, MESSAGE_ID,
};
pub use handler::{RequestHandler, ResponseDispatcher};
pub use ports::{EventListener, HeaderExtractor};
pub use registry::SourceRegistry;
pub use scheduler::TimeoutScheduler;
pub use server::{AxumServer, RpcServer, ServerLifecycle};
pub use service::{Event, ServiceSource, ServiceSourceBuilder};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
