//! Correlation ID for matching an inbound call with its out-of-band response.
//!
//! Minted by the server when a call arrives; never supplied by the client.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Transport property key under which the correlation ID is published to the
/// listener when header augmentation is configured.
pub const MESSAGE_ID: &str = "messageId";

/// Correlation ID for a single inbound call.
///
/// Backed by a random (v4) UUID: 122 random bits make collisions between
/// concurrently pending calls negligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a fresh random correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from the textual form handed out to the listener
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s.trim()).map(Self)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}
