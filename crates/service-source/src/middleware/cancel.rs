//! Forced-shutdown cancellation.
//!
//! The server hands every call a receiver of its force signal. Once the signal
//! is raised, in-flight calls are dropped and answered with `Unavailable`, and
//! calls arriving afterwards are answered the same way without running.

use crate::domain::error::CallStatus;
use axum::{
    body::Body,
    http::Request,
    response::{IntoResponse, Response},
};
use tokio::sync::watch;
use tower::{Layer, Service};
use tracing::debug;

/// Layer racing each call against the force signal
#[derive(Clone)]
pub struct ForceCancelLayer {
    force: watch::Receiver<bool>,
}

impl ForceCancelLayer {
    pub fn new(force: watch::Receiver<bool>) -> Self {
        Self { force }
    }
}

impl<S> Layer<S> for ForceCancelLayer {
    type Service = ForceCancelService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ForceCancelService {
            inner,
            force: self.force.clone(),
        }
    }
}

/// Cancellation service
#[derive(Clone)]
pub struct ForceCancelService<S> {
    inner: S,
    force: watch::Receiver<bool>,
}

impl<S> Service<Request<Body>> for ForceCancelService<S>
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
        let mut force = self.force.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let forced = async {
                // A dropped sender never forces
                if force.wait_for(|forced| *forced).await.is_err() {
                    std::future::pending::<()>().await;
                }
            };

            tokio::select! {
                biased;
                _ = forced => {
                    debug!("Terminating in-flight call");
                    Ok(CallStatus::Unavailable.into_response())
                }
                result = inner.call(req) => result,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use std::convert::Infallible;
    use std::time::Duration;
    use tower::{service_fn, ServiceExt};

    fn never_finishes() -> impl Service<
        Request<Body>,
        Response = Response,
        Error = Infallible,
        Future = impl std::future::Future<Output = Result<Response, Infallible>> + Send,
    > + Clone
           + Send
           + 'static {
        service_fn(|_req: Request<Body>| async {
            std::future::pending::<()>().await;
            Ok::<_, Infallible>(StatusCode::OK.into_response())
        })
    }

    fn request() -> Request<Body> {
        Request::builder().body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_unforced_call_completes() {
        let (_tx, rx) = watch::channel(false);
        let ok = service_fn(|_req: Request<Body>| async {
            Ok::<_, Infallible>(StatusCode::OK.into_response())
        });
        let resp = ForceCancelLayer::new(rx).layer(ok).oneshot(request()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_force_terminates_in_flight_call() {
        let (tx, rx) = watch::channel(false);
        let call = tokio::spawn(ForceCancelLayer::new(rx).layer(never_finishes()).oneshot(request()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send_replace(true);

        let resp = call.await.unwrap().unwrap();
        assert_eq!(resp.status(), CallStatus::Unavailable.http_status());
    }

    #[tokio::test]
    async fn test_call_after_force_is_rejected() {
        let (tx, rx) = watch::channel(false);
        tx.send_replace(true);
        let resp = ForceCancelLayer::new(rx)
            .layer(never_finishes())
            .oneshot(request())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_dropped_sender_does_not_cancel() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let mut call =
            tokio_test::task::spawn(ForceCancelLayer::new(rx).layer(never_finishes()).oneshot(request()));
        tokio_test::assert_pending!(call.poll());
        tokio::time::sleep(Duration::from_millis(20)).await;
        tokio_test::assert_pending!(call.poll());
    }
}
