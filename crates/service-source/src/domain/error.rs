//! Error types for the service source.
//!
//! Per-call failures are expressed as [`CallStatus`] and resolved on the call's
//! own response handle. Everything else is process level and propagates to the
//! supervisor of the source's lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Status codes carried in per-call error bodies (gRPC numbering)
pub mod codes {
    pub const DEADLINE_EXCEEDED: i32 = 4;
    pub const RESOURCE_EXHAUSTED: i32 = 8;
    pub const INTERNAL: i32 = 13;
    pub const UNAVAILABLE: i32 = 14;
    pub const DATA_LOSS: i32 = 15;
}

/// Terminal failure of a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallStatus {
    /// No response arrived within the service timeout
    DeadlineExceeded,
    /// Request dropped before it was registered (header extraction failed)
    DataLoss,
    /// Inbound metadata exceeded the configured limit
    ResourceExhausted,
    /// Inbound message exceeded the configured limit
    MessageTooLarge,
    /// Server is terminating in-flight calls
    Unavailable,
    /// Invariant violation inside the source
    Internal,
}

impl CallStatus {
    /// Numeric status code
    pub fn code(&self) -> i32 {
        match self {
            Self::DeadlineExceeded => codes::DEADLINE_EXCEEDED,
            Self::DataLoss => codes::DATA_LOSS,
            Self::ResourceExhausted | Self::MessageTooLarge => codes::RESOURCE_EXHAUSTED,
            Self::Unavailable => codes::UNAVAILABLE,
            Self::Internal => codes::INTERNAL,
        }
    }

    /// Human readable description sent to the client
    pub fn message(&self) -> &'static str {
        match self {
            Self::DeadlineExceeded => "deadline exceeded while waiting for response",
            Self::DataLoss => "request dropped",
            Self::ResourceExhausted => "request metadata too large",
            Self::MessageTooLarge => "request message too large",
            Self::Unavailable => "server is shutting down",
            Self::Internal => "internal error",
        }
    }

    /// Wire form of this status
    pub fn to_body(&self) -> StatusBody {
        StatusBody {
            code: self.code(),
            message: self.message().to_string(),
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message())
    }
}

impl std::error::Error for CallStatus {}

/// JSON body returned for a failed call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBody {
    pub code: i32,
    pub message: String,
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required option '{0}'")]
    MissingOption(&'static str),

    #[error("option '{option}' has invalid value '{value}'")]
    InvalidNumber { option: &'static str, value: String },

    #[error("invalid url '{0}': expected grpc://<host>:<port>[/<service>/<method>]")]
    InvalidUrl(String),

    #[error("unsupported url scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("invalid port in url '{0}'")]
    InvalidPort(String),

    #[error("invalid limit: {0}")]
    InvalidLimit(String),

    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("service '{service}/{method}' is not the built-in event service; supply a custom service")]
    UnknownService { service: String, method: String },

    #[error("the built-in event service requires an event listener")]
    MissingListener,
}

/// Failure of the header-extraction collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("malformed header entry '{0}'")]
    Malformed(String),

    #[error("requested transport property '{0}' is not present in headers")]
    MissingProperty(String),
}

/// Source registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("a source is already registered under id '{0}'")]
    AlreadyRegistered(String),
}

/// Process-level source errors (startup and shutdown)
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Server socket bind error
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// `start()` called more than once
    #[error("server has already been started")]
    AlreadyStarted,

    /// Any other startup failure
    #[error("startup error: {0}")]
    Startup(String),

    /// Forced shutdown did not finish within the grace period. The server is
    /// left in an indeterminate state.
    #[error("server did not terminate within {0:?} after forced shutdown")]
    ShutdownTimedOut(Duration),

    /// Registry error
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Result type for source lifecycle operations
pub type SourceResult<T> = Result<T, SourceError>;
