//! Source configuration with validation.
//!
//! Options can be loaded from a serde document or from the flat string option
//! map handed over by the host engine (`SourceConfig::from_options`).

use crate::domain::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Service name of the built-in event service
pub const DEFAULT_SERVICE_NAME: &str = "EventService";
/// Method name of the built-in event service
pub const DEFAULT_METHOD_NAME: &str = "process";

/// URL scheme accepted for the endpoint
pub const URL_SCHEME: &str = "grpc";

/// Option keys recognized by [`SourceConfig::from_options`]
pub mod keys {
    pub const URL: &str = "url";
    pub const SOURCE_ID: &str = "source.id";
    pub const MAX_INBOUND_MESSAGE_SIZE: &str = "max.inbound.message.size";
    pub const MAX_INBOUND_METADATA_SIZE: &str = "max.inbound.metadata.size";
    pub const SERVICE_TIMEOUT: &str = "service.timeout";
    pub const SERVER_SHUTDOWN_WAITING_TIME: &str = "server.shutdown.waiting.time";
}

/// Service source configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// `grpc://<host>:<port>[/<service>/<method>]`
    pub url: String,
    /// Identifier response producers use to find this source
    pub source_id: String,
    /// Maximum inbound message size in bytes
    pub max_inbound_message_size: usize,
    /// Maximum inbound metadata size in bytes
    pub max_inbound_metadata_size: usize,
    /// Time to wait for a response before failing the call (milliseconds)
    pub service_timeout_ms: u64,
    /// Shutdown grace period (seconds), applied to each shutdown phase
    pub server_shutdown_waiting_time: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            source_id: String::new(),
            max_inbound_message_size: 4 * 1024 * 1024,
            max_inbound_metadata_size: 8192,
            service_timeout_ms: 10_000,
            server_shutdown_waiting_time: 5,
        }
    }
}

impl SourceConfig {
    /// Create a configuration with defaults for everything but the required options
    pub fn new(url: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            source_id: source_id.into(),
            ..Self::default()
        }
    }

    /// Build from the host engine's flat option map
    pub fn from_options(options: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let url = options
            .get(keys::URL)
            .cloned()
            .ok_or(ConfigError::MissingOption(keys::URL))?;
        let source_id = options
            .get(keys::SOURCE_ID)
            .cloned()
            .ok_or(ConfigError::MissingOption(keys::SOURCE_ID))?;

        let config = Self {
            url,
            source_id,
            max_inbound_message_size: parse_option(
                options,
                keys::MAX_INBOUND_MESSAGE_SIZE,
                defaults.max_inbound_message_size,
            )?,
            max_inbound_metadata_size: parse_option(
                options,
                keys::MAX_INBOUND_METADATA_SIZE,
                defaults.max_inbound_metadata_size,
            )?,
            service_timeout_ms: parse_option(
                options,
                keys::SERVICE_TIMEOUT,
                defaults.service_timeout_ms,
            )?,
            server_shutdown_waiting_time: parse_option(
                options,
                keys::SERVER_SHUTDOWN_WAITING_TIME,
                defaults.server_shutdown_waiting_time,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::MissingOption(keys::URL));
        }
        if self.source_id.trim().is_empty() {
            return Err(ConfigError::MissingOption(keys::SOURCE_ID));
        }

        if self.max_inbound_message_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_inbound_message_size cannot be 0".into(),
            ));
        }
        if self.max_inbound_metadata_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_inbound_metadata_size cannot be 0".into(),
            ));
        }

        if self.service_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout(
                "service timeout cannot be 0".into(),
            ));
        }
        if self.server_shutdown_waiting_time == 0 {
            return Err(ConfigError::InvalidTimeout(
                "server shutdown waiting time cannot be 0".into(),
            ));
        }

        self.endpoint().map(|_| ())
    }

    /// Parse the configured URL
    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        Endpoint::parse(&self.url)
    }

    /// Per-call response timeout
    pub fn service_timeout(&self) -> Duration {
        Duration::from_millis(self.service_timeout_ms)
    }

    /// Grace period for each shutdown phase
    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.server_shutdown_waiting_time)
    }
}

fn parse_option<T: std::str::FromStr>(
    options: &HashMap<String, String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match options.get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
            option: key,
            value: raw.clone(),
        }),
    }
}

/// Parsed endpoint URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: IpAddr,
    pub port: u16,
    pub service: Option<String>,
    pub method: Option<String>,
}

impl Endpoint {
    /// Parse `grpc://<host>:<port>[/<service>/<method>]`
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let url = url.trim();
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| ConfigError::InvalidUrl(url.to_string()))?;
        if !scheme.eq_ignore_ascii_case(URL_SCHEME) {
            return Err(ConfigError::UnsupportedScheme(scheme.to_string()));
        }

        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, path),
            None => (rest, ""),
        };

        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::InvalidPort(url.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| ConfigError::InvalidPort(url.to_string()))?;
        let host = resolve_bind_host(host).ok_or_else(|| ConfigError::InvalidUrl(url.to_string()))?;

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let (service, method) = match segments.as_slice() {
            [] => (None, None),
            [service, method] => (Some(service.to_string()), Some(method.to_string())),
            _ => return Err(ConfigError::InvalidUrl(url.to_string())),
        };

        Ok(Self {
            host,
            port,
            service,
            method,
        })
    }

    /// Address the server binds to
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn service_name(&self) -> &str {
        self.service.as_deref().unwrap_or(DEFAULT_SERVICE_NAME)
    }

    pub fn method_name(&self) -> &str {
        self.method.as_deref().unwrap_or(DEFAULT_METHOD_NAME)
    }

    /// Whether the URL names the built-in event service (or names no service)
    pub fn is_default_service(&self) -> bool {
        self.service_name() == DEFAULT_SERVICE_NAME && self.method_name() == DEFAULT_METHOD_NAME
    }

    /// HTTP route of the exposed method
    pub fn route_path(&self) -> String {
        format!("/{}/{}", self.service_name(), self.method_name())
    }
}

/// IP literals and `localhost` bind as given; other host names bind every interface.
fn resolve_bind_host(host: &str) -> Option<IpAddr> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return None;
    }
    if host.eq_ignore_ascii_case("localhost") {
        return Some(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
    Some(
        host.parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
    )
}
