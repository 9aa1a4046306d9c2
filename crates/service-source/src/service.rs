//! Service source - composition root.
//!
//! Wires the correlation table, deadline scheduler, request handler, response
//! dispatcher and server lifecycle for one configured endpoint, and ties the
//! source's registry entry to the server's start and stop.

use crate::adapters::QuotedHeaderExtractor;
use crate::domain::config::SourceConfig;
use crate::domain::error::{CallStatus, ConfigError, SourceResult};
use crate::domain::lifecycle::{LifecycleState, ShutdownOutcome};
use crate::domain::pending::{CorrelationTable, PendingStats, ResponseHandle};
use crate::handler::{HeaderAugmentation, RequestHandler, ResponseDispatcher};
use crate::middleware::InboundLimits;
use crate::ports::{EventListener, HeaderExtractor};
use crate::registry::SourceRegistry;
use crate::scheduler::{DeadlineTask, TimeoutScheduler};
use crate::server::{AxumServer, ServerLifecycle};
use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Message exchanged by the built-in event service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub payload: String,
}

/// Handler of the built-in method: accept the call, then await its outcome.
async fn process(
    State(handler): State<Arc<RequestHandler>>,
    metadata: HeaderMap,
    Json(event): Json<Event>,
) -> Response {
    let (handle, outcome) = ResponseHandle::channel();
    handler.handle(event.payload, &metadata, handle);

    match outcome.await {
        Ok(Ok(payload)) => Json(Event { payload }).into_response(),
        Ok(Err(status)) => status.into_response(),
        Err(_) => CallStatus::Internal.into_response(),
    }
}

/// Router exposing the built-in event service at `path`
fn event_router(path: &str, handler: Arc<RequestHandler>) -> Router {
    Router::new()
        .route(path, post(process))
        .with_state(handler)
}

/// Builder for [`ServiceSource`]
pub struct ServiceSourceBuilder {
    config: SourceConfig,
    listener: Option<Arc<dyn EventListener>>,
    extractor: Arc<dyn HeaderExtractor>,
    requested_properties: Option<Vec<String>>,
    custom_service: Option<Router>,
    registry: Option<Arc<SourceRegistry>>,
}

impl ServiceSourceBuilder {
    /// Listener receiving every accepted payload (built-in service only)
    pub fn listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Collaborator resolving transport properties from headers
    pub fn header_extractor(mut self, extractor: Arc<dyn HeaderExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Transport property names forwarded to the listener, in order.
    ///
    /// Enables header augmentation: each name is resolved from the metadata of
    /// the call, and [`MESSAGE_ID`](crate::MESSAGE_ID) from its correlation ID.
    /// A call missing a requested property is rejected with `DataLoss`.
    pub fn requested_properties<I, T>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.requested_properties = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Serve a user-defined service instead of the built-in one.
    ///
    /// The service completes its own calls; the source's dispatcher ignores
    /// every response.
    pub fn custom_service(mut self, router: Router) -> Self {
        self.custom_service = Some(router);
        self
    }

    /// Registry the source registers in while running
    pub fn registry(mut self, registry: Arc<SourceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> SourceResult<ServiceSource> {
        self.config.validate()?;
        let endpoint = self.config.endpoint()?;
        let source_id = self.config.source_id.clone();
        let table = Arc::new(CorrelationTable::new());
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(SourceRegistry::new()));

        let (router, dispatcher, handler, deadline_task) = match self.custom_service {
            Some(router) => {
                let dispatcher = ResponseDispatcher::disabled(&source_id, Arc::clone(&table));
                (router, dispatcher, None, None)
            }
            None => {
                if !endpoint.is_default_service() {
                    return Err(ConfigError::UnknownService {
                        service: endpoint.service_name().to_string(),
                        method: endpoint.method_name().to_string(),
                    }
                    .into());
                }
                let listener = self.listener.ok_or(ConfigError::MissingListener)?;

                let (scheduler, task) =
                    TimeoutScheduler::new(Arc::clone(&table), self.config.service_timeout());
                let extractor = self.extractor;
                let headers = self
                    .requested_properties
                    .map(|requested| HeaderAugmentation {
                        extractor,
                        requested,
                    });
                let handler = Arc::new(RequestHandler::new(
                    &source_id,
                    Arc::clone(&table),
                    scheduler,
                    listener,
                    headers,
                ));

                let router = event_router(&endpoint.route_path(), Arc::clone(&handler));
                let dispatcher = ResponseDispatcher::new(&source_id, Arc::clone(&table));
                (router, dispatcher, Some(handler), Some(task))
            }
        };

        let limits = InboundLimits {
            max_message_size: self.config.max_inbound_message_size,
            max_metadata_size: self.config.max_inbound_metadata_size,
        };
        let server = AxumServer::new(endpoint.socket_addr(), &source_id, limits, router);

        Ok(ServiceSource {
            config: self.config,
            table,
            handler,
            dispatcher: Arc::new(dispatcher),
            registry,
            lifecycle: ServerLifecycle::new(server),
            deadline_task: Mutex::new(deadline_task),
        })
    }
}

/// One RPC ingress endpoint
pub struct ServiceSource {
    config: SourceConfig,
    table: Arc<CorrelationTable>,
    handler: Option<Arc<RequestHandler>>,
    dispatcher: Arc<ResponseDispatcher>,
    registry: Arc<SourceRegistry>,
    lifecycle: ServerLifecycle<AxumServer>,
    deadline_task: Mutex<Option<DeadlineTask>>,
}

impl ServiceSource {
    pub fn builder(config: SourceConfig) -> ServiceSourceBuilder {
        ServiceSourceBuilder {
            config,
            listener: None,
            extractor: Arc::new(QuotedHeaderExtractor::new()),
            requested_properties: None,
            custom_service: None,
            registry: None,
        }
    }

    /// Source serving the built-in event service with default collaborators
    pub fn new(config: SourceConfig, listener: Arc<dyn EventListener>) -> SourceResult<Self> {
        Self::builder(config).listener(listener).build()
    }

    /// Register in the registry and start the server.
    ///
    /// Callable once; concurrent and repeated calls fail with
    /// [`SourceError::AlreadyStarted`](crate::SourceError::AlreadyStarted).
    /// On failure the registry entry is removed again and the source stays
    /// stopped.
    pub async fn start(&self) -> SourceResult<SocketAddr> {
        let mut registered = false;
        let started = self
            .lifecycle
            .start_with(|| {
                self.registry.register(Arc::clone(&self.dispatcher))?;
                registered = true;
                if let Some(task) = self.deadline_task.lock().take() {
                    tokio::spawn(task.run());
                }
                Ok(())
            })
            .await;

        match started {
            Ok(addr) => {
                info!(
                    source_id = %self.config.source_id,
                    %addr,
                    custom_service = !self.dispatcher.is_enabled(),
                    "Service source started"
                );
                Ok(addr)
            }
            Err(e) => {
                if registered {
                    self.registry.deregister(&self.config.source_id);
                }
                Err(e)
            }
        }
    }

    /// Shut down with the configured grace period
    pub async fn shutdown(&self) -> SourceResult<ShutdownOutcome> {
        self.shutdown_within(self.config.shutdown_grace_period())
            .await
    }

    /// Shut down, allowing `grace` per shutdown phase.
    ///
    /// The registry entry is removed once the server has stopped, or once
    /// forced shutdown has failed.
    pub async fn shutdown_within(&self, grace: Duration) -> SourceResult<ShutdownOutcome> {
        let outcome = self.lifecycle.shutdown(grace).await;
        if !matches!(outcome, Ok(ShutdownOutcome::NotRunning)) {
            self.registry.deregister(&self.config.source_id);
        }
        outcome
    }

    /// Callback used by response-producing stages
    pub fn dispatcher(&self) -> Arc<ResponseDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn registry(&self) -> Arc<SourceRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Bound address, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle.local_addr()
    }

    /// Number of calls currently awaiting a response.
    ///
    /// Read-only observability; it never affects how a call is resolved.
    pub fn pending_count(&self) -> usize {
        self.table.len()
    }

    pub fn stats(&self) -> &PendingStats {
        self.table.stats()
    }

    /// Calls rejected before registration (built-in service only)
    pub fn rejected_count(&self) -> u64 {
        self.handler.as_ref().map_or(0, |h| h.rejected_count())
    }
}
