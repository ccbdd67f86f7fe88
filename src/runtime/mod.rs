// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runtime utilities for resilience and observability.
//!
//! This module provides the retry policy, per-target circuit breakers, the
//! combined [`ResiliencePolicy`], request logging, call spans and metrics used
//! by the invocation and cache façades.

mod circuit_breaker;
mod logging;
mod metrics;
mod resilience;
mod retry;
mod tracing;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitPermit, CircuitState,
};
pub use logging::{LogLevel, LoggingConfig, RequestCounters, RequestLogger, RequestSpan};
pub use metrics::{
    CallOutcome, MetricsCollector, MetricsConfig, MetricsConfigBuilder, MetricsSnapshot,
};
pub use resilience::ResiliencePolicy;
pub use retry::{
    Backoff, BackoffStrategy, ExponentialBackoff, FixedBackoff, NoBackoff, RetryConfig,
    RetryConfigBuilder, RetryError,
};
pub use tracing::{InvocationSpan, SpanFactory, TracingConfig, TracingConfigBuilder};
