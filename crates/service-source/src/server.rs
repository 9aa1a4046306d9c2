//! Server lifecycle.
//!
//! [`RpcServer`] is the seam to the underlying network server. [`AxumServer`]
//! is the production implementation; [`ServerLifecycle`] owns one exclusively
//! and drives it through `Created → Started → ShuttingDownGraceful →
//! ShuttingDownForced → Stopped`.
//!
//! Shutdown is bounded by twice the grace period: one window for in-flight
//! calls to drain, one for forced termination to complete.

use crate::domain::error::{SourceError, SourceResult};
use crate::domain::lifecycle::{AtomicLifecycle, LifecycleState, ShutdownOutcome};
use crate::middleware::{self, InboundLimits};
use async_trait::async_trait;
use axum::Router;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Network server controlled by [`ServerLifecycle`]
#[async_trait]
pub trait RpcServer: Send {
    /// Bind and start serving. Returns the bound address.
    async fn start(&mut self) -> SourceResult<SocketAddr>;

    /// Stop accepting new calls; in-flight calls continue.
    fn shutdown(&mut self);

    /// Terminate in-flight calls.
    fn shutdown_now(&mut self);

    /// Wait up to `timeout` for the server to terminate.
    /// Returns true if it has terminated.
    async fn await_termination(&mut self, timeout: Duration) -> bool;
}

/// axum-backed [`RpcServer`]
pub struct AxumServer {
    addr: SocketAddr,
    source_id: String,
    limits: InboundLimits,
    router: Option<Router>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    force_tx: watch::Sender<bool>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl AxumServer {
    pub fn new(
        addr: SocketAddr,
        source_id: impl Into<String>,
        limits: InboundLimits,
        router: Router,
    ) -> Self {
        let (force_tx, _) = watch::channel(false);
        Self {
            addr,
            source_id: source_id.into(),
            limits,
            router: Some(router),
            shutdown_tx: None,
            force_tx,
            task: None,
        }
    }
}

#[async_trait]
impl RpcServer for AxumServer {
    async fn start(&mut self) -> SourceResult<SocketAddr> {
        let router = self.router.take().ok_or(SourceError::AlreadyStarted)?;

        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| SourceError::Bind {
                addr: self.addr,
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| SourceError::Startup(e.to_string()))?;

        let router = middleware::apply(
            router,
            &self.source_id,
            self.limits,
            self.force_tx.subscribe(),
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        self.shutdown_tx = Some(shutdown_tx);
        self.task = Some(tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        }));

        Ok(local_addr)
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    fn shutdown_now(&mut self) {
        self.shutdown();
        self.force_tx.send_replace(true);
    }

    async fn await_termination(&mut self, timeout: Duration) -> bool {
        let Some(task) = self.task.as_mut() else {
            return true;
        };

        match tokio::time::timeout(timeout, task).await {
            Ok(joined) => {
                self.task = None;
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(error = %e, "Server exited with error"),
                    Err(e) => warn!(error = %e, "Server task failed"),
                }
                true
            }
            Err(_) => false,
        }
    }
}

/// Owns an [`RpcServer`] and its lifecycle state.
///
/// The server is reachable only through this type; nothing else may shut it
/// down.
pub struct ServerLifecycle<S> {
    server: tokio::sync::Mutex<S>,
    state: AtomicLifecycle,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl<S: RpcServer> ServerLifecycle<S> {
    pub fn new(server: S) -> Self {
        Self {
            server: tokio::sync::Mutex::new(server),
            state: AtomicLifecycle::new(),
            local_addr: Mutex::new(None),
        }
    }

    /// Bind and start listening. Callable once; a failed start is final.
    pub async fn start(&self) -> SourceResult<SocketAddr> {
        self.start_with(|| Ok(())).await
    }

    /// Like [`start`](Self::start), running `prepare` once this caller has
    /// claimed the start and before the server binds.
    ///
    /// Concurrent callers that lose the claim get
    /// [`SourceError::AlreadyStarted`] and never run their `prepare`. A failing
    /// `prepare` stops the lifecycle like a failed bind.
    pub async fn start_with<F>(&self, prepare: F) -> SourceResult<SocketAddr>
    where
        F: FnOnce() -> SourceResult<()>,
    {
        if !self
            .state
            .transition(LifecycleState::Created, LifecycleState::Started)
        {
            return Err(SourceError::AlreadyStarted);
        }

        if let Err(e) = prepare() {
            self.state.set(LifecycleState::Stopped);
            error!(error = %e, "Server failed to start");
            return Err(e);
        }

        let mut server = self.server.lock().await;
        match server.start().await {
            Ok(addr) => {
                *self.local_addr.lock() = Some(addr);
                info!(%addr, "Server started");
                Ok(addr)
            }
            Err(e) => {
                self.state.set(LifecycleState::Stopped);
                error!(error = %e, "Server failed to start");
                Err(e)
            }
        }
    }

    /// Graceful shutdown escalating to forced termination.
    ///
    /// Waits up to `grace` for in-flight calls to drain, then terminates them
    /// and waits up to `grace` again. If forced termination does not finish in
    /// time the server is left in an indeterminate state and
    /// [`SourceError::ShutdownTimedOut`] is returned.
    pub async fn shutdown(&self, grace: Duration) -> SourceResult<ShutdownOutcome> {
        if !self
            .state
            .transition(LifecycleState::Started, LifecycleState::ShuttingDownGraceful)
        {
            debug!(state = %self.state.get(), "Server not running; shutdown is a no-op");
            return Ok(ShutdownOutcome::NotRunning);
        }

        let mut server = self.server.lock().await;
        info!(grace_ms = grace.as_millis() as u64, "Shutting down server");
        server.shutdown();
        if server.await_termination(grace).await {
            self.state.set(LifecycleState::Stopped);
            info!("Server stopped gracefully");
            return Ok(ShutdownOutcome::Graceful);
        }

        self.state.set(LifecycleState::ShuttingDownForced);
        warn!(
            grace_ms = grace.as_millis() as u64,
            "In-flight calls did not drain; forcing shutdown"
        );
        server.shutdown_now();
        if server.await_termination(grace).await {
            self.state.set(LifecycleState::Stopped);
            info!("Server stopped after forced shutdown");
            return Ok(ShutdownOutcome::Forced);
        }

        error!(
            grace_ms = grace.as_millis() as u64,
            "Server did not terminate after forced shutdown"
        );
        Err(SourceError::ShutdownTimedOut(grace))
    }

    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    /// Whether the server is accepting calls
    pub fn is_running(&self) -> bool {
        self.state.get() == LifecycleState::Started
    }

    /// Bound address, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Phases needed before the fake terminates
    #[derive(Clone, Copy)]
    enum Terminates {
        Immediately,
        AfterForce,
        Never,
    }

    struct FakeServer {
        terminates: Terminates,
        forced: bool,
        fail_start: bool,
        shutdown_calls: Arc<AtomicUsize>,
    }

    impl FakeServer {
        fn new(terminates: Terminates) -> Self {
            Self {
                terminates,
                forced: false,
                fail_start: false,
                shutdown_calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl RpcServer for FakeServer {
        async fn start(&mut self) -> SourceResult<SocketAddr> {
            if self.fail_start {
                return Err(SourceError::Startup("port in use".into()));
            }
            Ok("127.0.0.1:4000".parse().unwrap())
        }

        fn shutdown(&mut self) {
            self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        }

        fn shutdown_now(&mut self) {
            self.forced = true;
        }

        async fn await_termination(&mut self, timeout: Duration) -> bool {
            let done = match self.terminates {
                Terminates::Immediately => true,
                Terminates::AfterForce => self.forced,
                Terminates::Never => false,
            };
            if !done {
                tokio::time::sleep(timeout).await;
            }
            done
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_shutdown() {
        let lifecycle = ServerLifecycle::new(FakeServer::new(Terminates::Immediately));
        lifecycle.start().await.unwrap();
        assert!(lifecycle.is_running());

        let started = tokio::time::Instant::now();
        let outcome = lifecycle.shutdown(Duration::from_secs(5)).await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::Graceful);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalates_to_forced_shutdown() {
        let lifecycle = ServerLifecycle::new(FakeServer::new(Terminates::AfterForce));
        lifecycle.start().await.unwrap();

        let started = tokio::time::Instant::now();
        let outcome = lifecycle.shutdown(Duration::from_secs(2)).await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::Forced);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_server_is_fatal_after_two_windows() {
        let lifecycle = ServerLifecycle::new(FakeServer::new(Terminates::Never));
        lifecycle.start().await.unwrap();

        let started = tokio::time::Instant::now();
        let err = lifecycle.shutdown(Duration::from_secs(3)).await.unwrap_err();
        assert!(matches!(err, SourceError::ShutdownTimedOut(d) if d == Duration::from_secs(3)));
        assert!(started.elapsed() >= Duration::from_secs(6));
        assert!(started.elapsed() < Duration::from_secs(7));
        assert_eq!(lifecycle.state(), LifecycleState::ShuttingDownForced);
    }

    #[tokio::test]
    async fn test_shutdown_before_start_is_noop() {
        let server = FakeServer::new(Terminates::Immediately);
        let calls = Arc::clone(&server.shutdown_calls);
        let lifecycle = ServerLifecycle::new(server);

        let outcome = lifecycle.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::NotRunning);
        assert_eq!(lifecycle.state(), LifecycleState::Created);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_shutdown_is_noop() {
        let server = FakeServer::new(Terminates::Immediately);
        let calls = Arc::clone(&server.shutdown_calls);
        let lifecycle = ServerLifecycle::new(server);
        lifecycle.start().await.unwrap();

        lifecycle.shutdown(Duration::from_secs(1)).await.unwrap();
        let outcome = lifecycle.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::NotRunning);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_is_callable_once() {
        let lifecycle = ServerLifecycle::new(FakeServer::new(Terminates::Immediately));
        assert_eq!(
            lifecycle.start().await.unwrap(),
            "127.0.0.1:4000".parse::<SocketAddr>().unwrap()
        );
        assert!(matches!(
            lifecycle.start().await,
            Err(SourceError::AlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn test_failed_start_is_final() {
        let mut server = FakeServer::new(Terminates::Immediately);
        server.fail_start = true;
        let lifecycle = ServerLifecycle::new(server);

        assert!(matches!(
            lifecycle.start().await,
            Err(SourceError::Startup(_))
        ));
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
        assert!(lifecycle.local_addr().is_none());
        assert!(matches!(
            lifecycle.start().await,
            Err(SourceError::AlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn test_prepare_runs_only_for_the_winning_start() {
        let lifecycle = Arc::new(ServerLifecycle::new(FakeServer::new(Terminates::Immediately)));
        let prepared = Arc::new(AtomicUsize::new(0));

        let starts: Vec<_> = (0..8)
            .map(|_| {
                let lifecycle = Arc::clone(&lifecycle);
                let prepared = Arc::clone(&prepared);
                tokio::spawn(async move {
                    lifecycle
                        .start_with(|| {
                            prepared.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .await
                })
            })
            .collect();

        let mut started = 0;
        for start in starts {
            match start.await.unwrap() {
                Ok(_) => started += 1,
                Err(e) => assert!(matches!(e, SourceError::AlreadyStarted)),
            }
        }
        assert_eq!(started, 1);
        assert_eq!(prepared.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_prepare_is_final() {
        let lifecycle = ServerLifecycle::new(FakeServer::new(Terminates::Immediately));

        let result = lifecycle
            .start_with(|| Err(SourceError::Startup("not ready".into())))
            .await;
        assert!(matches!(result, Err(SourceError::Startup(_))));
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
        assert!(lifecycle.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_axum_server_binds_ephemeral_port() {
        let limits = InboundLimits {
            max_message_size: 1024,
            max_metadata_size: 1024,
        };
        let mut server = AxumServer::new(
            "127.0.0.1:0".parse().unwrap(),
            "test",
            limits,
            Router::new(),
        );

        let addr = server.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert!(matches!(server.start().await, Err(SourceError::AlreadyStarted)));

        server.shutdown();
        assert!(server.await_termination(Duration::from_secs(5)).await);
    }
}
