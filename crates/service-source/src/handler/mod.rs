//! Call handling: inbound registration and outbound completion.

pub mod request;
pub mod response;

pub use request::{HeaderAugmentation, RequestHandler};
pub use response::ResponseDispatcher;
