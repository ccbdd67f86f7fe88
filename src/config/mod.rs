// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration management for mesh clients
//!
//! This module loads the YAML configuration that drives the invocation and
//! cache façades: sidecar location, component names, retry and circuit
//! breaker tuning, logging, tracing and metrics.
//!
//! # Environment Variables
//!
//! The following environment variables are supported:
//!
//! - `MESH_CONFIG` - Path to the config file (default: `<config dir>/mesh-framework/config.yaml`)
//! - `DAPR_HTTP_ENDPOINT` - Full sidecar HTTP endpoint
//! - `DAPR_HTTP_PORT` - Sidecar port on localhost, when no endpoint is given
//! - `DAPR_API_TOKEN` - Token sent as `dapr-api-token`
//! - `MESH_PUBSUB_NAME` - Default pub/sub component
//! - `MESH_STATESTORE_NAME` - State store component
//!
//! # Example
//!
//! ```no_run
//! use mesh_framework_rs::config::MeshConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load with environment variable overrides
//! let config = MeshConfig::load_with_env()?;
//! println!("Publishing to bus {}", config.pubsub_name);
//! # Ok(())
//! # }
//! ```

mod meshconfig;

pub use meshconfig::{
    BackoffKind, CircuitBreakerSection, LoggingSection, MeshConfig, MetricsSection,
    RetrySection, SidecarSection, TracingSection, ENV_DAPR_API_TOKEN, ENV_DAPR_HTTP_ENDPOINT,
    ENV_DAPR_HTTP_PORT, ENV_MESH_CONFIG, ENV_MESH_PUBSUB_NAME, ENV_MESH_STATESTORE_NAME,
};
