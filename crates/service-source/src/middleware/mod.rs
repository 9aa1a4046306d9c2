//! Middleware stack applied to every served router.
//!
//! Layer order: Request → CallTracing → ForceCancel → InboundLimits → BodyLimit → Handler

pub mod cancel;
pub mod limits;
pub mod tracing;

pub use cancel::ForceCancelLayer;
pub use limits::{metadata_size, InboundLimits, InboundLimitsLayer};
pub use tracing::CallTracingLayer;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tokio::sync::watch;
use tower_http::limit::RequestBodyLimitLayer;

/// Wrap `router` in the full middleware stack
pub fn apply(
    router: Router,
    source_id: &str,
    limits: InboundLimits,
    force: watch::Receiver<bool>,
) -> Router {
    router
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(limits.max_message_size))
        .layer(InboundLimitsLayer::new(limits))
        .layer(ForceCancelLayer::new(force))
        .layer(CallTracingLayer::new(source_id))
}
