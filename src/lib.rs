// SPDX-License-Identifier: MIT OR Apache-2.0

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod runtime;
pub mod testkit;
pub mod transport;

pub use cache::{CacheClient, CacheEntry, StateStore};
pub use client::{from_sidecar, InvocationClient, InvocationClientBuilder};
pub use config::MeshConfig;
pub use error::{Fault, FaultKind, MeshError};
pub use runtime::{
    CircuitBreakerConfig, CircuitState, LoggingConfig, MetricsCollector, RetryConfig,
    TracingConfig,
};
pub use transport::dapr::{DaprSidecar, DaprSidecarConfig};
pub use transport::{Event, PubSubTopic, Transport};
