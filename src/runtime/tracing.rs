// SPDX-License-Identifier: MIT OR Apache-2.0

//! OpenTelemetry-attributed spans for façade calls.
//!
//! The crate only depends on `tracing`. Exporting the spans to a collector is
//! the host's job: install a `tracing-opentelemetry` layer on the subscriber
//! and the attributes below map directly onto OpenTelemetry semantic
//! conventions.
//!
//! | Attribute | Description |
//! |-----------|-------------|
//! | `rpc.system` | Always "dapr" |
//! | `rpc.service` | Target service, bus or state store |
//! | `rpc.method` | Method, topic or cache operation |
//! | `otel.status_code` | "OK" or "ERROR" |
//! | `error.message` | Failure description |
//! | `duration_ms` | Wall-clock duration |

use std::time::{Duration, Instant};
use tracing::{field, info_span, Span};

/// Configuration for call spans.
#[derive(Debug, Clone, PartialEq)]
pub struct TracingConfig {
    /// Name of the calling service, recorded as `peer.service` on each span
    pub service_name: String,
    /// Whether to create spans at all
    pub enabled: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "mesh-client".to_string(),
            enabled: true,
        }
    }
}

impl TracingConfig {
    pub fn builder() -> TracingConfigBuilder {
        TracingConfigBuilder::default()
    }
}

/// Builder for `TracingConfig`.
#[derive(Debug, Default)]
pub struct TracingConfigBuilder {
    service_name: Option<String>,
    enabled: Option<bool>,
}

impl TracingConfigBuilder {
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn build(self) -> TracingConfig {
        let default = TracingConfig::default();
        TracingConfig {
            service_name: self.service_name.unwrap_or(default.service_name),
            enabled: self.enabled.unwrap_or(default.enabled),
        }
    }
}

/// A span around one façade call.
#[derive(Debug)]
pub struct InvocationSpan {
    span: Span,
    start: Instant,
    service: String,
    method: String,
}

impl InvocationSpan {
    /// Create a span for a call to `method` on `service`.
    pub fn new(caller: &str, service: &str, method: &str) -> Self {
        let span = info_span!(
            "mesh.call",
            rpc.system = "dapr",
            rpc.service = %service,
            rpc.method = %method,
            peer.service = %caller,
            otel.status_code = field::Empty,
            error.message = field::Empty,
            duration_ms = field::Empty,
        );

        Self {
            span,
            start: Instant::now(),
            service: service.to_string(),
            method: method.to_string(),
        }
    }

    /// A span that records nothing.
    pub fn disabled(service: &str, method: &str) -> Self {
        Self {
            span: Span::none(),
            start: Instant::now(),
            service: service.to_string(),
            method: method.to_string(),
        }
    }

    /// Get the underlying `tracing::Span`.
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn record_success(&self) {
        self.span.record("otel.status_code", "OK");
        self.span
            .record("duration_ms", self.start.elapsed().as_millis() as i64);
    }

    pub fn record_error(&self, error: &str) {
        self.span.record("otel.status_code", "ERROR");
        self.span.record("error.message", error);
        self.span
            .record("duration_ms", self.start.elapsed().as_millis() as i64);
    }
}

/// Span factory for creating consistent spans across the façades.
#[derive(Debug, Clone, Default)]
pub struct SpanFactory {
    config: TracingConfig,
}

impl SpanFactory {
    pub fn new(config: TracingConfig) -> Self {
        Self { config }
    }

    /// Span for a service invocation.
    pub fn invoke_span(&self, service: &str, method: &str) -> InvocationSpan {
        self.create(service, method)
    }

    /// Span for a publish; the bus plays the service role.
    pub fn publish_span(&self, bus: &str, topic: &str) -> InvocationSpan {
        self.create(bus, topic)
    }

    /// Span for a cache operation against a state store.
    pub fn cache_span(&self, store: &str, operation: &str) -> InvocationSpan {
        self.create(store, operation)
    }

    fn create(&self, service: &str, method: &str) -> InvocationSpan {
        if self.config.enabled {
            InvocationSpan::new(&self.config.service_name, service, method)
        } else {
            InvocationSpan::disabled(service, method)
        }
    }

    pub fn config(&self) -> &TracingConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_config_default() {
        let config = TracingConfig::default();
        assert_eq!(config.service_name, "mesh-client");
        assert!(config.enabled);
    }

    #[test]
    fn test_tracing_config_builder() {
        let config = TracingConfig::builder()
            .service_name("bookings")
            .enabled(false)
            .build();

        assert_eq!(config.service_name, "bookings");
        assert!(!config.enabled);
    }

    #[test]
    fn test_invocation_span_records_outcomes() {
        let span = InvocationSpan::new("bookings", "payments", "charge");
        assert_eq!(span.service(), "payments");
        assert_eq!(span.method(), "charge");

        span.record_success();
        span.record_error("connection refused");
    }

    #[test]
    fn test_span_factory_disabled_spans() {
        let factory = SpanFactory::new(TracingConfig::builder().enabled(false).build());
        let span = factory.invoke_span("payments", "charge");

        assert!(span.span().is_none());
        assert_eq!(span.method(), "charge");
    }

    #[test]
    fn test_span_factory_kinds() {
        let factory = SpanFactory::default();
        assert_eq!(factory.publish_span("pubsub", "booking-created").service(), "pubsub");
        assert_eq!(factory.cache_span("statestore", "get").method(), "get");
    }

    #[test]
    fn test_span_elapsed() {
        let span = InvocationSpan::new("users", "providers", "list");
        std::thread::sleep(Duration::from_millis(5));
        assert!(span.elapsed() >= Duration::from_millis(5));
    }
}
