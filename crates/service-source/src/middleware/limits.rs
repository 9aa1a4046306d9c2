//! Inbound size limits.
//!
//! Metadata (request headers) is measured the way HTTP/2 header lists are:
//! name length + value length + 32 bytes of per-entry overhead. Requests over
//! the metadata limit fail with `ResourceExhausted` before reaching a handler.
//! A declared `content-length` over the message limit is rejected up front;
//! streamed bodies are capped by the body limit applied next to this layer, and
//! its bare `413` is rewritten so every oversized message fails with the same
//! `MessageTooLarge` body.

use crate::domain::error::CallStatus;
use axum::{
    body::Body,
    http::{header::CONTENT_LENGTH, HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tower::{Layer, Service};
use tracing::warn;

/// Per-entry overhead added to every header when measuring metadata size
pub const HEADER_ENTRY_OVERHEAD: usize = 32;

/// Limits enforced on every inbound call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundLimits {
    /// Maximum request body size in bytes
    pub max_message_size: usize,
    /// Maximum total header size in bytes
    pub max_metadata_size: usize,
}

/// Total metadata size of a header map
pub fn metadata_size(headers: &HeaderMap) -> usize {
    headers
        .iter()
        .map(|(name, value)| name.as_str().len() + value.len() + HEADER_ENTRY_OVERHEAD)
        .sum()
}

/// Layer enforcing [`InboundLimits`]
#[derive(Clone)]
pub struct InboundLimitsLayer {
    limits: Arc<InboundLimits>,
}

impl InboundLimitsLayer {
    pub fn new(limits: InboundLimits) -> Self {
        Self {
            limits: Arc::new(limits),
        }
    }
}

impl<S> Layer<S> for InboundLimitsLayer {
    type Service = InboundLimitsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InboundLimitsService {
            inner,
            limits: Arc::clone(&self.limits),
        }
    }
}

/// Limits service
#[derive(Clone)]
pub struct InboundLimitsService<S> {
    inner: S,
    limits: Arc<InboundLimits>,
}

impl<S> Service<Request<Body>> for InboundLimitsService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let limits = Arc::clone(&self.limits);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let size = metadata_size(req.headers());
            if size > limits.max_metadata_size {
                warn!(
                    size,
                    max = limits.max_metadata_size,
                    "Request metadata too large"
                );
                return Ok(CallStatus::ResourceExhausted.into_response());
            }

            // Fast path on the declared length
            if let Some(len) = declared_length(req.headers()) {
                if len > limits.max_message_size {
                    warn!(
                        size = len,
                        max = limits.max_message_size,
                        "Request message too large"
                    );
                    return Ok(CallStatus::MessageTooLarge.into_response());
                }
            }

            let resp = inner.call(req).await?;
            if resp.status() == StatusCode::PAYLOAD_TOO_LARGE {
                warn!(max = limits.max_message_size, "Request message too large");
                return Ok(CallStatus::MessageTooLarge.into_response());
            }
            Ok(resp)
        })
    }
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers.get(CONTENT_LENGTH)?.to_str().ok()?.parse().ok()
}
