//! Adapters for the service source.
//!
//! Concrete collaborator implementations and transport conversions.

pub mod error_conversions;
pub mod headers;
pub mod listener;

pub use headers::{render_metadata, QuotedHeaderExtractor};
pub use listener::{ChannelListener, ReceivedEvent};
