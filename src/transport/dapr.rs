// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dapr sidecar client over the sidecar's HTTP API.
//!
//! [`DaprSidecar`] implements both [`Transport`] and [`StateStore`], so a
//! single pooled HTTP/1.1 client serves service invocation, pub/sub and
//! state management.
//!
//! State values are opaque bytes. They are written as `{"base64": "..."}`
//! and decoded again on read, so every byte sequence survives the sidecar's
//! JSON state API unchanged. Values written by other clients in any other
//! shape are returned as the raw JSON the sidecar serves.
//!
//! # Example
//!
//! ```no_run
//! use mesh_framework_rs::transport::dapr::{DaprSidecar, DaprSidecarConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let sidecar = DaprSidecar::new(
//!     DaprSidecarConfig::from_endpoint("http://127.0.0.1:3500")?
//!         .with_state_store("redis-cache")
//!         .with_api_token("s3cr3t"),
//! );
//! # let _ = sidecar;
//! # Ok(())
//! # }
//! ```

use crate::cache::StateStore;
use crate::error::{Fault, FaultKind, MeshError, Result};
use crate::transport::{InvocationRequest, PubSubTopic, Transport};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::trace;
use url::Url;

/// Default sidecar HTTP endpoint.
pub const DEFAULT_DAPR_ENDPOINT: &str = "http://127.0.0.1:3500";

/// Default state store component name.
pub const DEFAULT_STATE_STORE: &str = "statestore";

/// Header carrying the sidecar API token.
pub const API_TOKEN_HEADER: &str = "dapr-api-token";

const API_VERSION: &str = "v1.0";

/// Connection settings for the sidecar.
#[derive(Clone, PartialEq)]
pub struct DaprSidecarConfig {
    /// Base URL of the sidecar HTTP API
    pub endpoint: Url,
    /// Value of the `dapr-api-token` header, if the sidecar requires one
    pub api_token: Option<String>,
    /// State store component used by the cache façade
    pub state_store: String,
    /// Per-request deadline; `None` waits for the sidecar indefinitely
    pub request_timeout: Option<Duration>,
}

impl fmt::Debug for DaprSidecarConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaprSidecarConfig")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("state_store", &self.state_store)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl DaprSidecarConfig {
    /// Parse `endpoint` and use defaults for everything else.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Config`] if the endpoint is not an absolute
    /// `http` URL.
    pub fn from_endpoint(endpoint: &str) -> Result<Self> {
        let url = Url::parse(endpoint)
            .map_err(|e| MeshError::Config(format!("invalid sidecar endpoint '{endpoint}': {e}")))?;
        if url.scheme() != "http" || url.cannot_be_a_base() {
            return Err(MeshError::Config(format!(
                "sidecar endpoint must be an http URL, got '{endpoint}'"
            )));
        }

        Ok(Self {
            endpoint: url,
            api_token: None,
            state_store: DEFAULT_STATE_STORE.to_string(),
            request_timeout: None,
        })
    }

    #[must_use]
    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_state_store(mut self, store: impl Into<String>) -> Self {
        self.state_store = store.into();
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

impl Default for DaprSidecarConfig {
    fn default() -> Self {
        Self {
            endpoint: Url::parse(DEFAULT_DAPR_ENDPOINT).expect("default endpoint is a valid URL"),
            api_token: None,
            state_store: DEFAULT_STATE_STORE.to_string(),
            request_timeout: None,
        }
    }
}

#[derive(Serialize)]
struct StateItem<'a> {
    key: &'a str,
    value: StoredValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<StateMetadata>,
}

/// Envelope around a state value as kept by the sidecar.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct StoredValue {
    base64: String,
}

impl StoredValue {
    fn encode(value: &[u8]) -> Self {
        Self {
            base64: STANDARD.encode(value),
        }
    }

    fn decode(body: Bytes) -> std::result::Result<Bytes, Fault> {
        let Ok(stored) = serde_json::from_slice::<StoredValue>(&body) else {
            return Ok(body);
        };
        STANDARD
            .decode(stored.base64.as_bytes())
            .map(Bytes::from)
            .map_err(|e| {
                Fault::new(FaultKind::Other, format!("corrupt state value: {e}")).with_source(e)
            })
    }
}

#[derive(Serialize)]
struct StateMetadata {
    #[serde(rename = "ttlInSeconds")]
    ttl_in_seconds: String,
}

/// HTTP client for a Dapr sidecar.
#[derive(Clone)]
pub struct DaprSidecar {
    config: DaprSidecarConfig,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl fmt::Debug for DaprSidecar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaprSidecar")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DaprSidecar {
    pub fn new(config: DaprSidecarConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { config, client }
    }

    pub fn config(&self) -> &DaprSidecarConfig {
        &self.config
    }

    fn uri(&self, segments: &[&str]) -> std::result::Result<Uri, Fault> {
        let mut url = self.config.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| Fault::client("sidecar endpoint cannot carry a path"))?
            .pop_if_empty()
            .push(API_VERSION)
            .extend(segments);

        url.as_str()
            .parse::<Uri>()
            .map_err(|e| Fault::client(format!("invalid request URI {url}: {e}")).with_source(e))
    }

    async fn send(
        &self,
        method: Method,
        uri: Uri,
        payload: Option<(Bytes, &str)>,
    ) -> std::result::Result<(StatusCode, Bytes), Fault> {
        trace!(target: "mesh_framework::invoke", %method, %uri, "sending sidecar request");

        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = &self.config.api_token {
            builder = builder.header(API_TOKEN_HEADER, token);
        }
        let body = match payload {
            Some((bytes, content_type)) => {
                builder = builder.header(CONTENT_TYPE, content_type);
                Full::new(bytes)
            }
            None => Full::new(Bytes::new()),
        };
        let request = builder
            .body(body)
            .map_err(|e| Fault::client(format!("invalid request: {e}")).with_source(e))?;

        let response = match self.config.request_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.client.request(request))
                .await
                .map_err(|_| {
                    Fault::new(
                        FaultKind::Timeout,
                        format!("sidecar did not answer within {timeout:?}"),
                    )
                })?,
            None => self.client.request(request).await,
        }
        .map_err(|e| Fault::unavailable(format!("sidecar unreachable: {e}")).with_source(e))?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| Fault::unavailable(format!("response body interrupted: {e}")).with_source(e))?
            .to_bytes();

        Ok((status, body))
    }
}

fn check(status: StatusCode, body: Bytes) -> std::result::Result<Bytes, Fault> {
    if status.is_success() {
        Ok(body)
    } else {
        Err(Fault::from_status(
            status.as_u16(),
            &String::from_utf8_lossy(&body),
        ))
    }
}

fn ttl_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

#[async_trait]
impl Transport for DaprSidecar {
    async fn invoke(&self, request: &InvocationRequest) -> std::result::Result<Bytes, Fault> {
        let address = request.address();
        let uri = self.uri(&["invoke", address.service(), "method", address.method()])?;
        let verb = request.verb().cloned().unwrap_or(Method::POST);
        let payload = request
            .payload()
            .map(|payload| (payload.clone(), request.content_type()));

        let (status, body) = self.send(verb, uri, payload).await?;
        check(status, body)
    }

    async fn publish(
        &self,
        topic: &PubSubTopic,
        payload: Bytes,
        content_type: &str,
    ) -> std::result::Result<(), Fault> {
        let uri = self.uri(&["publish", topic.bus(), topic.topic()])?;
        let (status, body) = self
            .send(Method::POST, uri, Some((payload, content_type)))
            .await?;
        check(status, body).map(|_| ())
    }
}

#[async_trait]
impl StateStore for DaprSidecar {
    fn name(&self) -> &str {
        &self.config.state_store
    }

    async fn get(&self, key: &str) -> std::result::Result<Bytes, Fault> {
        let uri = self.uri(&["state", &self.config.state_store, key])?;
        let (status, body) = self.send(Method::GET, uri, None).await?;

        // The sidecar answers a missing key with 204 and an empty body.
        if status == StatusCode::NO_CONTENT || (status.is_success() && body.is_empty()) {
            return Err(Fault::not_found(format!("key '{key}' not found")));
        }
        StoredValue::decode(check(status, body)?)
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> std::result::Result<(), Fault> {
        let item = StateItem {
            key,
            value: StoredValue::encode(&value),
            metadata: ttl.map(|ttl| StateMetadata {
                ttl_in_seconds: ttl_seconds(ttl).to_string(),
            }),
        };
        let payload = serde_json::to_vec(&[item]).map_err(|e| {
            Fault::client(format!("cannot encode state item: {e}")).with_source(e)
        })?;

        let uri = self.uri(&["state", &self.config.state_store])?;
        let (status, body) = self
            .send(
                Method::POST,
                uri,
                Some((Bytes::from(payload), crate::transport::JSON_CONTENT_TYPE)),
            )
            .await?;
        check(status, body).map(|_| ())
    }

    async fn delete(&self, key: &str) -> std::result::Result<(), Fault> {
        let uri = self.uri(&["state", &self.config.state_store, key])?;
        let (status, body) = self.send(Method::DELETE, uri, None).await?;
        check(status, body).map(|_| ())
    }

    async fn exists(&self, key: &str) -> std::result::Result<bool, Fault> {
        match self.get(key).await {
            Ok(_) => Ok(true),
            Err(fault) if fault.is_not_found() => Ok(false),
            Err(fault) => Err(fault),
        }
    }

    fn supports_ttl(&self) -> bool {
        true
    }
}
