// SPDX-License-Identifier: MIT OR Apache-2.0

//! Service invocation and pub/sub façade.
//!
//! [`InvocationClient`] encodes requests as JSON, hands them to a
//! [`Transport`] under the [`ResiliencePolicy`] and decodes the response.
//! Invocations share a circuit breaker per service name and publishes share
//! one per bus name.
//!
//! # Example
//!
//! ```no_run
//! use mesh_framework_rs::client::from_sidecar;
//! use mesh_framework_rs::config::MeshConfig;
//! use serde::{Deserialize, Serialize};
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Serialize)]
//! struct CreateBooking {
//!     provider_id: u32,
//! }
//!
//! #[derive(Deserialize)]
//! struct Booking {
//!     id: u64,
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (client, _cache) = from_sidecar(&MeshConfig::load_with_env()?)?;
//! let cancel = CancellationToken::new();
//!
//! let booking: Booking = client
//!     .invoke_with("bookings", "create", &CreateBooking { provider_id: 3 }, &cancel)
//!     .await?;
//! client.publish("booking-created", &booking.id, &cancel).await?;
//! # Ok(())
//! # }
//! ```

use crate::cache::CacheClient;
use crate::config::MeshConfig;
use crate::error::{MeshError, Result};
use crate::runtime::{
    CircuitBreakerConfig, CircuitState, LoggingConfig, MetricsCollector, RequestCounters,
    RequestLogger, ResiliencePolicy, RetryConfig, SpanFactory, TracingConfig,
};
use crate::transport::dapr::DaprSidecar;
use crate::transport::{
    require_name, Event, InvocationRequest, PubSubTopic, ServiceAddress, Transport,
    DEFAULT_PUBSUB_NAME, JSON_CONTENT_TYPE,
};
use bytes::Bytes;
use http::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

struct ClientInner {
    transport: Arc<dyn Transport>,
    policy: ResiliencePolicy,
    logger: RequestLogger,
    spans: SpanFactory,
    default_bus: String,
}

/// Resilient invocation and publish façade.
///
/// Cloning is cheap; clones share breakers, counters and the transport.
#[derive(Clone)]
pub struct InvocationClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for InvocationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationClient")
            .field("default_bus", &self.inner.default_bus)
            .field("policy", &self.inner.policy)
            .finish_non_exhaustive()
    }
}

/// Builder for [`InvocationClient`].
pub struct InvocationClientBuilder {
    transport: Arc<dyn Transport>,
    retry: RetryConfig,
    circuit_breaker: CircuitBreakerConfig,
    logging: LoggingConfig,
    tracing: TracingConfig,
    metrics: Option<Arc<MetricsCollector>>,
    default_bus: String,
}

impl InvocationClientBuilder {
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    pub fn logging(mut self, config: LoggingConfig) -> Self {
        self.logging = config;
        self
    }

    pub fn tracing(mut self, config: TracingConfig) -> Self {
        self.tracing = config;
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Bus used by [`InvocationClient::publish`].
    pub fn default_bus(mut self, bus: impl Into<String>) -> Self {
        self.default_bus = bus.into();
        self
    }

    /// # Errors
    ///
    /// Returns [`MeshError::Validation`] if the default bus name is empty.
    pub fn build(self) -> Result<InvocationClient> {
        require_name("default bus", &self.default_bus)?;

        let mut policy = ResiliencePolicy::new(self.retry, self.circuit_breaker);
        if let Some(metrics) = self.metrics {
            policy = policy.with_metrics(metrics);
        }

        Ok(InvocationClient {
            inner: Arc::new(ClientInner {
                transport: self.transport,
                policy,
                logger: RequestLogger::with_config(self.logging),
                spans: SpanFactory::new(self.tracing),
                default_bus: self.default_bus,
            }),
        })
    }
}

impl InvocationClient {
    /// A client with the default policy: three retries at 200/400/800ms and
    /// a breaker that opens for 30s after three failed calls.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport,
                policy: ResiliencePolicy::default(),
                logger: RequestLogger::new(),
                spans: SpanFactory::default(),
                default_bus: DEFAULT_PUBSUB_NAME.to_string(),
            }),
        }
    }

    pub fn builder(transport: Arc<dyn Transport>) -> InvocationClientBuilder {
        InvocationClientBuilder {
            transport,
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            logging: LoggingConfig::default(),
            tracing: TracingConfig::default(),
            metrics: None,
            default_bus: DEFAULT_PUBSUB_NAME.to_string(),
        }
    }

    /// A client tuned by `config`, sending through `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Config`] if `config` does not validate.
    pub fn from_config(transport: Arc<dyn Transport>, config: &MeshConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = Self::builder(transport)
            .retry(config.retry_config())
            .circuit_breaker(config.circuit_breaker_config())
            .logging(config.logging_config())
            .tracing(config.tracing_config())
            .default_bus(config.pubsub_name.clone());
        if let Some(metrics) = config.metrics_config() {
            builder = builder.metrics(Arc::new(MetricsCollector::new(metrics)));
        }
        builder.build()
    }

    /// Invoke `method` on `service` with no body, using the transport's
    /// default verb.
    ///
    /// An empty response body decodes as JSON `null`, so `()` and
    /// `Option<T>` are valid response types.
    ///
    /// # Errors
    ///
    /// - [`MeshError::Validation`] for an empty service or method
    /// - [`MeshError::CircuitOpen`] while the service's breaker is open
    /// - [`MeshError::Invocation`] when the call still fails after retrying
    /// - [`MeshError::Cancelled`] when `cancel` fires
    /// - [`MeshError::Serialization`] when the response is not an `R`
    pub async fn invoke<R>(&self, service: &str, method: &str, cancel: &CancellationToken) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let address = ServiceAddress::new(service, method)?;
        self.call(InvocationRequest::new(address), cancel).await
    }

    /// Invoke `method` on `service` with a JSON-encoded `request` body.
    ///
    /// # Errors
    ///
    /// As [`invoke`](Self::invoke); encoding failures are
    /// [`MeshError::Serialization`].
    pub async fn invoke_with<Q, R>(
        &self,
        service: &str,
        method: &str,
        request: &Q,
        cancel: &CancellationToken,
    ) -> Result<R>
    where
        Q: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let address = ServiceAddress::new(service, method)?;
        let payload = Bytes::from(serde_json::to_vec(request)?);
        self.call(InvocationRequest::new(address).with_payload(payload), cancel)
            .await
    }

    /// Invoke with an explicit HTTP verb and no body.
    ///
    /// # Errors
    ///
    /// As [`invoke`](Self::invoke).
    pub async fn invoke_method<R>(
        &self,
        verb: Method,
        service: &str,
        method: &str,
        cancel: &CancellationToken,
    ) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let address = ServiceAddress::new(service, method)?;
        self.call(InvocationRequest::new(address).with_verb(verb), cancel)
            .await
    }

    /// Invoke with an explicit HTTP verb and a JSON body.
    ///
    /// # Errors
    ///
    /// As [`invoke_with`](Self::invoke_with).
    pub async fn invoke_method_with<Q, R>(
        &self,
        verb: Method,
        service: &str,
        method: &str,
        request: &Q,
        cancel: &CancellationToken,
    ) -> Result<R>
    where
        Q: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let address = ServiceAddress::new(service, method)?;
        let payload = Bytes::from(serde_json::to_vec(request)?);
        let request = InvocationRequest::new(address)
            .with_verb(verb)
            .with_payload(payload);
        self.call(request, cancel).await
    }

    /// Publish `event` to `topic` on the default bus.
    ///
    /// # Errors
    ///
    /// - [`MeshError::Validation`] for an empty topic
    /// - [`MeshError::CircuitOpen`] while the bus's breaker is open
    /// - [`MeshError::Invocation`] when publishing still fails after retrying
    /// - [`MeshError::Cancelled`] when `cancel` fires
    pub async fn publish<E>(&self, topic: &str, event: &E, cancel: &CancellationToken) -> Result<()>
    where
        E: Serialize + ?Sized,
    {
        let topic = PubSubTopic::new(self.inner.default_bus.as_str(), topic)?;
        self.emit(&topic, event, cancel).await
    }

    /// Publish `event` to `topic` on the named `bus`.
    ///
    /// # Errors
    ///
    /// As [`publish`](Self::publish); an empty bus is also a
    /// [`MeshError::Validation`].
    pub async fn publish_to<E>(
        &self,
        bus: &str,
        topic: &str,
        event: &E,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        E: Serialize + ?Sized,
    {
        let topic = PubSubTopic::new(bus, topic)?;
        self.emit(&topic, event, cancel).await
    }

    /// Publish a prepared [`Event`].
    ///
    /// # Errors
    ///
    /// As [`publish_to`](Self::publish_to).
    pub async fn publish_event<E>(&self, event: &Event<E>, cancel: &CancellationToken) -> Result<()>
    where
        E: Serialize,
    {
        self.emit(&event.topic, &event.payload, cancel).await
    }

    /// Breaker state for invocations of `service` (or publishes on a bus of
    /// that name). Targets never called report `Closed`.
    pub fn circuit_state(&self, target: &str) -> CircuitState {
        self.inner.policy.circuit_state(target)
    }

    pub fn policy(&self) -> &ResiliencePolicy {
        &self.inner.policy
    }

    pub fn metrics(&self) -> Option<&Arc<MetricsCollector>> {
        self.inner.policy.metrics()
    }

    /// Success and failure counts of finished calls.
    pub fn request_counters(&self) -> &RequestCounters {
        self.inner.logger.counters()
    }

    pub fn default_bus(&self) -> &str {
        &self.inner.default_bus
    }

    async fn call<R>(&self, request: InvocationRequest, cancel: &CancellationToken) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let inner = &*self.inner;
        let address = request.address();
        let target = address.to_string();
        let span = inner.spans.invoke_span(address.service(), address.method());
        let log = inner.logger.start("invoke", &target);

        let transport = &inner.transport;
        let outcome = inner
            .policy
            .execute("invoke", address.service(), &target, cancel, || {
                transport.invoke(&request)
            })
            .instrument(span.span().clone())
            .await
            .and_then(|body| Ok((decode::<R>(&body)?, body.len())));

        match outcome {
            Ok((value, size)) => {
                span.record_success();
                inner.logger.finish_success(log, Some(size));
                Ok(value)
            }
            Err(err) => {
                span.record_error(&err.to_string());
                inner.logger.finish_error(log, &err);
                Err(err)
            }
        }
    }

    async fn emit<E>(&self, topic: &PubSubTopic, event: &E, cancel: &CancellationToken) -> Result<()>
    where
        E: Serialize + ?Sized,
    {
        let inner = &*self.inner;
        let payload = Bytes::from(serde_json::to_vec(event)?);
        let target = topic.to_string();
        let span = inner.spans.publish_span(topic.bus(), topic.topic());
        let log = inner.logger.start("publish", &target);

        let transport = &inner.transport;
        let outcome = inner
            .policy
            .execute("publish", topic.bus(), &target, cancel, || {
                transport.publish(topic, payload.clone(), JSON_CONTENT_TYPE)
            })
            .instrument(span.span().clone())
            .await;

        match outcome {
            Ok(()) => {
                span.record_success();
                inner.logger.finish_success(log, None);
                Ok(())
            }
            Err(err) => {
                span.record_error(&err.to_string());
                inner.logger.finish_error(log, &err);
                Err(err)
            }
        }
    }
}

fn decode<R: DeserializeOwned>(body: &[u8]) -> Result<R> {
    let body = if body.is_empty() { &b"null"[..] } else { body };
    serde_json::from_slice(body).map_err(MeshError::from)
}

/// Build an invocation client and a cache client that share one sidecar
/// connection pool.
///
/// # Errors
///
/// Returns [`MeshError::Config`] if `config` does not validate.
pub fn from_sidecar(config: &MeshConfig) -> Result<(InvocationClient, CacheClient)> {
    let sidecar = Arc::new(DaprSidecar::new(config.sidecar_config()?));
    let client = InvocationClient::from_config(Arc::clone(&sidecar) as Arc<dyn Transport>, config)?;
    let cache = CacheClient::with_spans(sidecar, SpanFactory::new(config.tracing_config()));
    Ok((client, cache))
}

#[cfg(test)]
mod tests;
