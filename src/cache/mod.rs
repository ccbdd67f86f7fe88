// SPDX-License-Identifier: MIT OR Apache-2.0

//! Key/value cache façade over a pluggable state store.
//!
//! [`CacheClient`] turns store-level faults into [`MeshError`]s and hides the
//! store's notion of "missing": a key that does not exist reads as `None`
//! and reports `false` from [`CacheClient::exists`].
//!
//! Cache calls are neither retried nor circuit-broken; they do honour the
//! caller's cancellation token.
//!
//! # Example
//!
//! ```
//! use mesh_framework_rs::cache::CacheClient;
//! use mesh_framework_rs::testkit::InMemoryStore;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> mesh_framework_rs::error::Result<()> {
//! let cache = CacheClient::new(Arc::new(InMemoryStore::new()));
//! let cancel = CancellationToken::new();
//!
//! cache.set("greeting", "hello", None, &cancel).await?;
//! assert_eq!(cache.get("greeting", &cancel).await?.as_deref(), Some(&b"hello"[..]));
//! assert_eq!(cache.get("missing-key", &cancel).await?, None);
//! # Ok(())
//! # }
//! ```

use crate::error::{Fault, MeshError, Result};
use crate::runtime::SpanFactory;
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

/// A key/value store reachable by key.
///
/// Implementations report a missing key from [`get`](StateStore::get) as a
/// [`FaultKind::NotFound`](crate::error::FaultKind::NotFound) fault.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Component name, used in logs and spans.
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> std::result::Result<Bytes, Fault>;

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> std::result::Result<(), Fault>;

    async fn delete(&self, key: &str) -> std::result::Result<(), Fault>;

    async fn exists(&self, key: &str) -> std::result::Result<bool, Fault>;

    /// Whether entries can expire on their own.
    fn supports_ttl(&self) -> bool;
}

/// A value to store, with an optional time-to-live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub value: Bytes,
    pub ttl: Option<Duration>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ttl: None,
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Cache façade.
#[derive(Clone)]
pub struct CacheClient {
    store: Arc<dyn StateStore>,
    spans: SpanFactory,
}

impl std::fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient")
            .field("store", &self.store.name())
            .finish_non_exhaustive()
    }
}

impl CacheClient {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self::with_spans(store, SpanFactory::default())
    }

    pub fn with_spans(store: Arc<dyn StateStore>, spans: SpanFactory) -> Self {
        Self { store, spans }
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// Store `value` under `key`, optionally expiring after `ttl`.
    ///
    /// # Errors
    ///
    /// - [`MeshError::Validation`] for an empty key or a zero TTL
    /// - [`MeshError::Unsupported`] when a TTL is given and the store cannot
    ///   expire entries; the store is not touched
    /// - [`MeshError::Cache`] when the store fails
    /// - [`MeshError::Cancelled`] when `cancel` fires first
    pub async fn set(
        &self,
        key: &str,
        value: impl Into<Bytes>,
        ttl: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        require_key(key)?;
        if let Some(ttl) = ttl {
            if ttl.is_zero() {
                return Err(MeshError::Validation("cache ttl must be positive".to_string()));
            }
            if !self.store.supports_ttl() {
                return Err(MeshError::Unsupported(format!(
                    "state store '{}' does not support ttl",
                    self.store.name()
                )));
            }
        }

        let value = value.into();
        self.run("set", key, cancel, self.store.set(key, value, ttl))
            .await?
            .map_err(|fault| self.failed("set", key, fault))
    }

    /// Store a prepared [`CacheEntry`].
    ///
    /// # Errors
    ///
    /// Same as [`set`](Self::set).
    pub async fn set_entry(&self, entry: CacheEntry, cancel: &CancellationToken) -> Result<()> {
        self.set(&entry.key, entry.value, entry.ttl, cancel).await
    }

    /// Read the value under `key`; a missing key is `None`.
    ///
    /// # Errors
    ///
    /// [`MeshError::Validation`], [`MeshError::Cache`] or
    /// [`MeshError::Cancelled`].
    pub async fn get(&self, key: &str, cancel: &CancellationToken) -> Result<Option<Bytes>> {
        require_key(key)?;
        match self.run("get", key, cancel, self.store.get(key)).await? {
            Ok(value) => Ok(Some(value)),
            Err(fault) if fault.is_not_found() => Ok(None),
            Err(fault) => Err(self.failed("get", key, fault)),
        }
    }

    /// Remove `key`. Removing a missing key succeeds.
    ///
    /// # Errors
    ///
    /// [`MeshError::Validation`], [`MeshError::Cache`] or
    /// [`MeshError::Cancelled`].
    pub async fn delete(&self, key: &str, cancel: &CancellationToken) -> Result<()> {
        require_key(key)?;
        match self.run("delete", key, cancel, self.store.delete(key)).await? {
            Ok(()) => Ok(()),
            Err(fault) if fault.is_not_found() => Ok(()),
            Err(fault) => Err(self.failed("delete", key, fault)),
        }
    }

    /// Whether `key` holds a value.
    ///
    /// # Errors
    ///
    /// [`MeshError::Validation`], [`MeshError::Cache`] or
    /// [`MeshError::Cancelled`].
    pub async fn exists(&self, key: &str, cancel: &CancellationToken) -> Result<bool> {
        require_key(key)?;
        match self.run("exists", key, cancel, self.store.exists(key)).await? {
            Ok(found) => Ok(found),
            Err(fault) if fault.is_not_found() => Ok(false),
            Err(fault) => Err(self.failed("exists", key, fault)),
        }
    }

    /// Encode `value` as JSON and store it.
    ///
    /// # Errors
    ///
    /// [`MeshError::Serialization`] if encoding fails, otherwise as
    /// [`set`](Self::set).
    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let encoded = serde_json::to_vec(value)?;
        self.set(key, encoded, ttl, cancel).await
    }

    /// Read and decode a JSON value; a missing key is `None`.
    ///
    /// # Errors
    ///
    /// [`MeshError::Serialization`] if the stored bytes are not a `T`,
    /// otherwise as [`get`](Self::get).
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<T>> {
        match self.get(key, cancel).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn run<T, Fut>(
        &self,
        operation: &str,
        key: &str,
        cancel: &CancellationToken,
        call: Fut,
    ) -> Result<std::result::Result<T, Fault>>
    where
        Fut: Future<Output = std::result::Result<T, Fault>>,
    {
        let cancelled = || MeshError::Cancelled {
            target: format!("{}/{key}", self.store.name()),
        };
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        let span = self.spans.cache_span(self.store.name(), operation);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                span.record_error("cancelled");
                return Err(cancelled());
            }
            outcome = call.instrument(span.span().clone()) => outcome,
        };

        match &outcome {
            Err(fault) if !fault.is_not_found() => span.record_error(&fault.to_string()),
            _ => {
                span.record_success();
                debug!(
                    target: "mesh_framework::cache",
                    store = self.store.name(),
                    operation,
                    key,
                    elapsed_ms = span.elapsed().as_millis() as u64,
                    "cache call completed"
                );
            }
        }
        Ok(outcome)
    }

    fn failed(&self, operation: &str, key: &str, fault: Fault) -> MeshError {
        warn!(
            target: "mesh_framework::cache",
            store = self.store.name(),
            operation,
            key,
            error = %fault,
            "cache call failed"
        );
        MeshError::Cache {
            key: key.to_string(),
            source: fault,
        }
    }
}

fn require_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(MeshError::Validation("cache key must not be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FaultKind;
    use crate::testkit::InMemoryStore;
    use serde::Deserialize;

    fn cache_over(store: &Arc<InMemoryStore>) -> CacheClient {
        CacheClient::new(Arc::clone(store) as Arc<dyn StateStore>)
    }

    #[tokio::test]
    async fn test_missing_key_reads_as_none() {
        let store = Arc::new(InMemoryStore::new());
        let cache = cache_over(&store);
        let cancel = CancellationToken::new();

        assert_eq!(cache.get("missing-key", &cancel).await.unwrap(), None);
        assert!(!cache.exists("missing-key", &cancel).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = Arc::new(InMemoryStore::new());
        let cache = cache_over(&store);
        let cancel = CancellationToken::new();

        cache.set("user:1", "alice", None, &cancel).await.unwrap();
        assert!(cache.exists("user:1", &cancel).await.unwrap());
        assert_eq!(
            cache.get("user:1", &cancel).await.unwrap(),
            Some(Bytes::from_static(b"alice"))
        );

        cache.delete("user:1", &cancel).await.unwrap();
        assert_eq!(cache.get("user:1", &cancel).await.unwrap(), None);

        // Deleting again is fine.
        cache.delete("user:1", &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_key_is_rejected_before_store() {
        let store = Arc::new(InMemoryStore::new());
        let cache = cache_over(&store);
        let cancel = CancellationToken::new();

        assert!(matches!(
            cache.get("", &cancel).await,
            Err(MeshError::Validation(_))
        ));
        assert!(matches!(
            cache.set(" ", "x", None, &cancel).await,
            Err(MeshError::Validation(_))
        ));
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn test_ttl_without_store_support_fails_loudly() {
        let store = Arc::new(InMemoryStore::without_ttl());
        let cache = cache_over(&store);
        let cancel = CancellationToken::new();

        let err = cache
            .set("session", "token", Some(Duration::from_secs(60)), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, MeshError::Unsupported(_)));
        assert_eq!(store.calls(), 0);

        // Without a TTL the same store works.
        cache.set("session", "token", None, &cancel).await.unwrap();
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_is_invalid() {
        let store = Arc::new(InMemoryStore::new());
        let cache = cache_over(&store);
        let cancel = CancellationToken::new();

        assert!(matches!(
            cache.set("k", "v", Some(Duration::ZERO), &cancel).await,
            Err(MeshError::Validation(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_is_forwarded_and_expires() {
        let store = Arc::new(InMemoryStore::new());
        let cache = cache_over(&store);
        let cancel = CancellationToken::new();

        cache
            .set_entry(
                CacheEntry::new("otp", "123456").with_ttl(Duration::from_secs(30)),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(store.ttl_of("otp"), Some(Duration::from_secs(30)));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.get("otp", &cancel).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_fault_becomes_cache_error() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_with(FaultKind::Unavailable, "redis down");
        let cache = cache_over(&store);
        let cancel = CancellationToken::new();

        let err = cache.get("user:1", &cancel).await.unwrap_err();
        match err {
            MeshError::Cache { key, source } => {
                assert_eq!(key, "user:1");
                assert_eq!(source.kind(), FaultKind::Unavailable);
            }
            other => panic!("expected Cache error, got {other:?}"),
        }

        // No retry for cache calls.
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_cache_call() {
        let store = Arc::new(InMemoryStore::new());
        let cache = cache_over(&store);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = cache.get("user:1", &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(store.calls(), 0);
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Provider {
        id: u32,
        name: String,
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let store = Arc::new(InMemoryStore::new());
        let cache = cache_over(&store);
        let cancel = CancellationToken::new();
        let provider = Provider {
            id: 3,
            name: "Dr. Osei".to_string(),
        };

        cache
            .set_json("provider:3", &provider, None, &cancel)
            .await
            .unwrap();
        let loaded: Option<Provider> = cache.get_json("provider:3", &cancel).await.unwrap();
        assert_eq!(loaded, Some(provider));

        let missing: Option<Provider> = cache.get_json("provider:4", &cancel).await.unwrap();
        assert!(missing.is_none());

        cache.set("provider:5", "not json", None, &cancel).await.unwrap();
        let broken = cache.get_json::<Provider>("provider:5", &cancel).await;
        assert!(matches!(broken, Err(MeshError::Serialization(_))));
    }
}
