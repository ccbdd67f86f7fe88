// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport seam between the façades and the deployment platform.
//!
//! The invocation façade never talks to the network itself. It builds an
//! [`InvocationRequest`] and hands it to a [`Transport`], which may be the
//! sidecar client in [`dapr`], an in-memory double from
//! [`crate::testkit`], or anything else that can move bytes to a named
//! service.

pub mod dapr;

use crate::error::{Fault, MeshError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use std::fmt;

/// Bus used when a publish does not name one.
pub const DEFAULT_PUBSUB_NAME: &str = "pubsub";

/// Content type of payloads encoded by the façades.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Identifies a remote operation on a logical service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceAddress {
    service: String,
    method: String,
}

impl ServiceAddress {
    /// Create an address, rejecting empty names.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::Validation` if either part is empty or blank.
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Result<Self> {
        let service = service.into();
        let method = method.into();
        require_name("service name", &service)?;
        require_name("method name", &method)?;
        Ok(Self { service, method })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.method)
    }
}

/// A single request/response call handed to a [`Transport`].
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    address: ServiceAddress,
    verb: Option<Method>,
    payload: Option<Bytes>,
    content_type: &'static str,
}

impl InvocationRequest {
    /// Create a request with no body and no explicit verb.
    #[must_use]
    pub fn new(address: ServiceAddress) -> Self {
        Self {
            address,
            verb: None,
            payload: None,
            content_type: JSON_CONTENT_TYPE,
        }
    }

    /// Set the HTTP verb for verb-sensitive transports.
    #[must_use]
    pub fn with_verb(mut self, verb: Method) -> Self {
        self.verb = Some(verb);
        self
    }

    /// Attach an encoded body.
    #[must_use]
    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn address(&self) -> &ServiceAddress {
        &self.address
    }

    pub fn verb(&self) -> Option<&Method> {
        self.verb.as_ref()
    }

    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }
}

/// A named topic on a named pub/sub bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PubSubTopic {
    bus: String,
    topic: String,
}

impl PubSubTopic {
    /// Create a topic on an explicit bus.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::Validation` if either name is empty or blank.
    pub fn new(bus: impl Into<String>, topic: impl Into<String>) -> Result<Self> {
        let bus = bus.into();
        let topic = topic.into();
        require_name("bus name", &bus)?;
        require_name("topic name", &topic)?;
        Ok(Self { bus, topic })
    }

    /// Create a topic on [`DEFAULT_PUBSUB_NAME`].
    ///
    /// # Errors
    ///
    /// Returns `MeshError::Validation` if the topic name is empty or blank.
    pub fn on_default_bus(topic: impl Into<String>) -> Result<Self> {
        Self::new(DEFAULT_PUBSUB_NAME, topic)
    }

    pub fn bus(&self) -> &str {
        &self.bus
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl fmt::Display for PubSubTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bus, self.topic)
    }
}

/// An event bound for a topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Event<T> {
    pub topic: PubSubTopic,
    pub payload: T,
}

impl<T> Event<T> {
    pub fn new(topic: PubSubTopic, payload: T) -> Self {
        Self { topic, payload }
    }
}

/// Request/response and publish primitives addressed by logical name.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a call and return the raw response body.
    async fn invoke(&self, request: &InvocationRequest) -> std::result::Result<Bytes, Fault>;

    /// Publish an encoded payload to a topic.
    async fn publish(
        &self,
        topic: &PubSubTopic,
        payload: Bytes,
        content_type: &str,
    ) -> std::result::Result<(), Fault>;
}

pub(crate) fn require_name(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(MeshError::Validation(format!("{what} must not be empty")));
    }
    Ok(())
}
