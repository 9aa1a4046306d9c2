//! Ports for the service source.
//!
//! Collaborators the source calls out to but does not implement itself.

pub mod outbound;

pub use outbound::{EventListener, HeaderExtractor};
