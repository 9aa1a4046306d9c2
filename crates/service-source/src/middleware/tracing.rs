//! Per-call tracing span.

use axum::{body::Body, http::Request, response::Response};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};
use tracing::{debug, info_span, Instrument, Span};

/// Tracing layer that opens a `source_call` span around every call
#[derive(Clone)]
pub struct CallTracingLayer {
    source_id: Arc<str>,
}

impl CallTracingLayer {
    pub fn new(source_id: impl Into<Arc<str>>) -> Self {
        Self {
            source_id: source_id.into(),
        }
    }
}

impl<S> Layer<S> for CallTracingLayer {
    type Service = CallTracingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CallTracingService {
            inner,
            source_id: Arc::clone(&self.source_id),
        }
    }
}

/// Tracing service
#[derive(Clone)]
pub struct CallTracingService<S> {
    inner: S,
    source_id: Arc<str>,
}

impl<S> Service<Request<Body>> for CallTracingService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();

        let span = info_span!(
            "source_call",
            source_id = %self.source_id,
            http.method = %req.method(),
            http.target = %req.uri().path(),
            http.status_code = tracing::field::Empty,
            elapsed_ms = tracing::field::Empty,
        );

        Box::pin(
            async move {
                let started = Instant::now();
                let result = inner.call(req).await;

                let span = Span::current();
                span.record("elapsed_ms", started.elapsed().as_millis() as u64);
                if let Ok(response) = &result {
                    span.record("http.status_code", response.status().as_u16());
                    debug!(status = %response.status(), "Call finished");
                }

                result
            }
            .instrument(span),
        )
    }
}
