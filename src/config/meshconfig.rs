// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mesh client configuration file parser
//!
//! The file is YAML; every section is optional and falls back to the
//! defaults the façades use without configuration. Durations are given in
//! milliseconds.
//!
//! ```yaml
//! service_name: bookings
//! pubsub_name: pubsub
//! state_store: statestore
//! sidecar:
//!   endpoint: http://127.0.0.1:3500
//!   request_timeout_ms: 5000
//! retry:
//!   max_retries: 3
//!   backoff: exponential
//!   base_delay_ms: 100
//! circuit_breaker:
//!   failure_threshold: 3
//!   break_duration_ms: 30000
//! logging:
//!   success_level: debug
//!   error_level: warn
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MeshError, Result};
use crate::runtime::{
    Backoff, CircuitBreakerConfig, ExponentialBackoff, FixedBackoff, LogLevel, LoggingConfig,
    MetricsConfig, NoBackoff, RetryConfig, TracingConfig,
};
use crate::transport::dapr::{DaprSidecarConfig, DEFAULT_DAPR_ENDPOINT, DEFAULT_STATE_STORE};
use crate::transport::DEFAULT_PUBSUB_NAME;

/// Path of the configuration file.
pub const ENV_MESH_CONFIG: &str = "MESH_CONFIG";
/// Full sidecar HTTP endpoint.
pub const ENV_DAPR_HTTP_ENDPOINT: &str = "DAPR_HTTP_ENDPOINT";
/// Sidecar HTTP port on localhost; ignored when the endpoint is set.
pub const ENV_DAPR_HTTP_PORT: &str = "DAPR_HTTP_PORT";
/// Sidecar API token.
pub const ENV_DAPR_API_TOKEN: &str = "DAPR_API_TOKEN";
/// Default pub/sub component.
pub const ENV_MESH_PUBSUB_NAME: &str = "MESH_PUBSUB_NAME";
/// State store component.
pub const ENV_MESH_STATESTORE_NAME: &str = "MESH_STATESTORE_NAME";

/// The whole configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MeshConfig {
    /// Name of this service, recorded on spans
    pub service_name: String,

    /// Bus used by publishes that do not name one
    pub pubsub_name: String,

    /// State store component used by the cache façade
    pub state_store: String,

    pub sidecar: SidecarSection,
    pub retry: RetrySection,
    pub circuit_breaker: CircuitBreakerSection,
    pub logging: LoggingSection,
    pub tracing: TracingSection,
    pub metrics: MetricsSection,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            service_name: TracingConfig::default().service_name,
            pubsub_name: DEFAULT_PUBSUB_NAME.to_string(),
            state_store: DEFAULT_STATE_STORE.to_string(),
            sidecar: SidecarSection::default(),
            retry: RetrySection::default(),
            circuit_breaker: CircuitBreakerSection::default(),
            logging: LoggingSection::default(),
            tracing: TracingSection::default(),
            metrics: MetricsSection::default(),
        }
    }
}

/// Where the sidecar listens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SidecarSection {
    pub endpoint: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    /// Per-request deadline; unset means no deadline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
}

impl Default for SidecarSection {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_DAPR_ENDPOINT.to_string(),
            api_token: None,
            request_timeout_ms: None,
        }
    }
}

/// Backoff families selectable from the file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Exponential,
    Fixed,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySection {
    /// Set to false to make every call single-shot
    pub enabled: bool,
    pub max_retries: u32,
    pub backoff: BackoffKind,
    /// Base delay for exponential backoff, or the delay for fixed backoff
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            backoff: BackoffKind::Exponential,
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerSection {
    pub failure_threshold: usize,
    pub success_threshold: usize,
    pub break_duration_ms: u64,
    pub half_open_max_requests: usize,
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 1,
            break_duration_ms: 30_000,
            half_open_max_requests: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSection {
    pub success_level: LogLevel,
    pub error_level: LogLevel,
    pub payload_sizes: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        let defaults = LoggingConfig::default();
        Self {
            success_level: defaults.success_level,
            error_level: defaults.error_level,
            payload_sizes: defaults.log_payload_sizes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TracingSection {
    pub enabled: bool,
}

impl Default for TracingSection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsSection {
    pub enabled: bool,
    pub namespace: String,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            namespace: MetricsConfig::default().namespace,
        }
    }
}

impl MeshConfig {
    /// Load the file named by `MESH_CONFIG`, or the default path, then apply
    /// environment overrides. A missing default file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, an override is
    /// malformed, or the result fails [`validate`](Self::validate).
    #[allow(clippy::result_large_err)]
    pub fn load_with_env() -> Result<Self> {
        let mut config = match std::env::var_os(ENV_MESH_CONFIG) {
            Some(path) => Self::load_from_path(PathBuf::from(path))?,
            None => match Self::default_path() {
                Ok(path) if path.exists() => Self::load_from_path(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read
    /// - The file is malformed YAML
    #[allow(clippy::result_large_err)]
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            MeshError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed
    #[allow(clippy::result_large_err)]
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| MeshError::Config(format!("Failed to parse config YAML: {}", e)))
    }

    /// Default config file path (`<config dir>/mesh-framework/config.yaml`)
    ///
    /// # Errors
    ///
    /// Returns an error if the platform config directory cannot be determined
    #[allow(clippy::result_large_err)]
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().ok_or_else(|| {
            MeshError::Config("Could not determine config directory".to_string())
        })?;

        Ok(dir.join("mesh-framework").join("config.yaml"))
    }

    /// Apply overrides from a variable lookup.
    ///
    /// `DAPR_HTTP_ENDPOINT` wins over `DAPR_HTTP_PORT`.
    ///
    /// # Errors
    ///
    /// Returns an error if `DAPR_HTTP_PORT` is not a port number.
    #[allow(clippy::result_large_err)]
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENV_DAPR_HTTP_ENDPOINT) {
            self.sidecar.endpoint = endpoint;
        } else if let Some(port) = lookup(ENV_DAPR_HTTP_PORT) {
            let port: u16 = port.trim().parse().map_err(|_| {
                MeshError::Config(format!("{ENV_DAPR_HTTP_PORT} is not a port: '{port}'"))
            })?;
            self.sidecar.endpoint = format!("http://127.0.0.1:{port}");
        }
        if let Some(token) = lookup(ENV_DAPR_API_TOKEN) {
            self.sidecar.api_token = Some(token);
        }
        if let Some(bus) = lookup(ENV_MESH_PUBSUB_NAME) {
            self.pubsub_name = bus;
        }
        if let Some(store) = lookup(ENV_MESH_STATESTORE_NAME) {
            self.state_store = store;
        }
        Ok(())
    }

    /// Check names, thresholds and the sidecar endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Config`] describing the first problem found.
    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(MeshError::Config(msg.to_string()));

        if self.pubsub_name.trim().is_empty() {
            return invalid("pubsub_name must not be empty");
        }
        if self.state_store.trim().is_empty() {
            return invalid("state_store must not be empty");
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return invalid("circuit_breaker.failure_threshold must be at least 1");
        }
        if self.circuit_breaker.success_threshold == 0 {
            return invalid("circuit_breaker.success_threshold must be at least 1");
        }
        if self.circuit_breaker.half_open_max_requests == 0 {
            return invalid("circuit_breaker.half_open_max_requests must be at least 1");
        }
        if self.circuit_breaker.break_duration_ms == 0 {
            return invalid("circuit_breaker.break_duration_ms must be positive");
        }
        if self.retry.backoff == BackoffKind::Exponential && self.retry.multiplier < 1.0 {
            return invalid("retry.multiplier must be at least 1.0");
        }
        if self.sidecar.request_timeout_ms == Some(0) {
            return invalid("sidecar.request_timeout_ms must be positive");
        }
        self.sidecar_config().map(|_| ())
    }

    pub fn retry_config(&self) -> RetryConfig {
        if !self.retry.enabled {
            return RetryConfig::disabled();
        }

        let base = Duration::from_millis(self.retry.base_delay_ms);
        let backoff: Backoff = match self.retry.backoff {
            BackoffKind::Exponential => ExponentialBackoff::new(base)
                .with_multiplier(self.retry.multiplier)
                .with_max_delay(Duration::from_millis(self.retry.max_delay_ms))
                .into(),
            BackoffKind::Fixed => FixedBackoff::new(base).into(),
            BackoffKind::None => NoBackoff.into(),
        };

        RetryConfig::builder()
            .max_retries(self.retry.max_retries)
            .backoff(backoff)
            .build()
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        let section = &self.circuit_breaker;
        CircuitBreakerConfig::new()
            .with_failure_threshold(section.failure_threshold)
            .with_success_threshold(section.success_threshold)
            .with_reset_timeout(Duration::from_millis(section.break_duration_ms))
            .with_half_open_max_requests(section.half_open_max_requests)
    }

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::new()
            .with_success_level(self.logging.success_level)
            .with_error_level(self.logging.error_level)
            .with_payload_sizes(self.logging.payload_sizes)
    }

    pub fn tracing_config(&self) -> TracingConfig {
        TracingConfig::builder()
            .service_name(self.service_name.clone())
            .enabled(self.tracing.enabled)
            .build()
    }

    /// Metrics settings, or `None` when metrics are off.
    pub fn metrics_config(&self) -> Option<MetricsConfig> {
        self.metrics.enabled.then(|| {
            MetricsConfig::builder()
                .namespace(self.metrics.namespace.clone())
                .build()
        })
    }

    /// Connection settings for [`DaprSidecar`](crate::transport::dapr::DaprSidecar).
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Config`] if the endpoint is not an http URL.
    #[allow(clippy::result_large_err)]
    pub fn sidecar_config(&self) -> Result<DaprSidecarConfig> {
        let mut config = DaprSidecarConfig::from_endpoint(&self.sidecar.endpoint)?
            .with_state_store(self.state_store.clone());
        if let Some(token) = &self.sidecar.api_token {
            config = config.with_api_token(token.clone());
        }
        if let Some(ms) = self.sidecar.request_timeout_ms {
            config = config.with_request_timeout(Duration::from_millis(ms));
        }
        Ok(config)
    }
}
