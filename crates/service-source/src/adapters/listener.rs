//! Channel-backed event listener.
//!
//! Hands every received event to an unbounded tokio channel so a downstream
//! stage can process it on its own task.

use crate::ports::EventListener;
use tokio::sync::mpsc;
use tracing::warn;

/// Event as handed to the downstream stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedEvent {
    pub payload: String,
    pub transport_properties: Vec<String>,
}

/// [`EventListener`] that forwards into an mpsc channel
#[derive(Debug, Clone)]
pub struct ChannelListener {
    sender: mpsc::UnboundedSender<ReceivedEvent>,
}

impl ChannelListener {
    /// Create a listener and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ReceivedEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventListener for ChannelListener {
    fn on_event(&self, payload: String, transport_properties: Vec<String>) {
        let event = ReceivedEvent {
            payload,
            transport_properties,
        };
        if self.sender.send(event).is_err() {
            warn!("Event receiver dropped; discarding event");
        }
    }
}
