// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process test doubles for the transport and state store seams.
//!
//! [`ScriptedTransport`] replays queued responses and records every call;
//! [`InMemoryStore`] is a map-backed [`StateStore`] with optional TTL
//! support and fault injection. Both are cheap to share behind an `Arc`.

use crate::cache::StateStore;
use crate::error::{Fault, FaultKind};
use crate::transport::{InvocationRequest, PubSubTopic, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

type Scripted = std::result::Result<Bytes, (FaultKind, String)>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An event captured by [`ScriptedTransport::publish`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub topic: PubSubTopic,
    pub payload: Bytes,
    pub content_type: String,
}

impl PublishedEvent {
    /// Decode the payload as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.payload)
    }
}

/// A [`Transport`] that answers from a script.
///
/// Each call pops the next scripted outcome; with an empty script calls
/// succeed with an empty body. Targets marked with
/// [`fail_target`](Self::fail_target) fail on every call regardless of the
/// script. Invocations are matched by service name and publishes by bus
/// name.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    failing: Mutex<HashMap<String, (FaultKind, String)>>,
    latency: Mutex<Option<Duration>>,
    invocations: Mutex<Vec<InvocationRequest>>,
    published: Mutex<Vec<PublishedEvent>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response body.
    pub fn push_ok(&self, body: impl Into<Bytes>) -> &Self {
        lock(&self.script).push_back(Ok(body.into()));
        self
    }

    /// Queue a JSON response body.
    ///
    /// # Panics
    ///
    /// Panics if `body` cannot be encoded as JSON.
    pub fn push_json<T: Serialize>(&self, body: &T) -> &Self {
        let encoded = match serde_json::to_vec(body) {
            Ok(encoded) => encoded,
            Err(e) => panic!("scripted response is not JSON-encodable: {e}"),
        };
        self.push_ok(encoded)
    }

    /// Queue a fault.
    pub fn push_fault(&self, kind: FaultKind, message: impl Into<String>) -> &Self {
        lock(&self.script).push_back(Err((kind, message.into())));
        self
    }

    /// Queue `count` copies of the same fault.
    pub fn push_faults(&self, count: usize, kind: FaultKind, message: &str) -> &Self {
        for _ in 0..count {
            self.push_fault(kind, message);
        }
        self
    }

    /// Make every call to `target` fail until [`recover_target`](Self::recover_target).
    pub fn fail_target(&self, target: &str, kind: FaultKind, message: impl Into<String>) {
        lock(&self.failing).insert(target.to_string(), (kind, message.into()));
    }

    pub fn recover_target(&self, target: &str) {
        lock(&self.failing).remove(target);
    }

    /// Delay every call by `latency` (tokio time).
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = Some(latency);
    }

    /// Number of transport calls, invocations and publishes together.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> Vec<InvocationRequest> {
        lock(&self.invocations).clone()
    }

    pub fn published(&self) -> Vec<PublishedEvent> {
        lock(&self.published).clone()
    }

    async fn answer(&self, target: &str) -> Scripted {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(failure) = lock(&self.failing).get(target) {
            return Err(failure.clone());
        }
        lock(&self.script).pop_front().unwrap_or(Ok(Bytes::new()))
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn invoke(&self, request: &InvocationRequest) -> std::result::Result<Bytes, Fault> {
        lock(&self.invocations).push(request.clone());
        self.answer(request.address().service())
            .await
            .map_err(|(kind, message)| Fault::new(kind, message))
    }

    async fn publish(
        &self,
        topic: &PubSubTopic,
        payload: Bytes,
        content_type: &str,
    ) -> std::result::Result<(), Fault> {
        lock(&self.published).push(PublishedEvent {
            topic: topic.clone(),
            payload,
            content_type: content_type.to_string(),
        });
        self.answer(topic.bus())
            .await
            .map(|_| ())
            .map_err(|(kind, message)| Fault::new(kind, message))
    }
}

#[derive(Debug)]
struct StoredValue {
    value: Bytes,
    ttl: Option<Duration>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

/// A map-backed [`StateStore`].
#[derive(Debug)]
pub struct InMemoryStore {
    name: String,
    supports_ttl: bool,
    entries: Mutex<HashMap<String, StoredValue>>,
    failure: Mutex<Option<(FaultKind, String)>>,
    calls: AtomicUsize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// A TTL-capable store named "statestore".
    pub fn new() -> Self {
        Self::named("statestore", true)
    }

    /// A store that cannot expire entries.
    pub fn without_ttl() -> Self {
        Self::named("statestore", false)
    }

    pub fn named(name: impl Into<String>, supports_ttl: bool) -> Self {
        Self {
            name: name.into(),
            supports_ttl,
            entries: Mutex::new(HashMap::new()),
            failure: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail every operation with this fault until [`heal`](Self::heal).
    pub fn fail_with(&self, kind: FaultKind, message: impl Into<String>) {
        *lock(&self.failure) = Some((kind, message.into()));
    }

    pub fn heal(&self) {
        *lock(&self.failure) = None;
    }

    /// Operations that reached the store.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// TTL recorded for `key`, if any.
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        lock(&self.entries).get(key).and_then(|stored| stored.ttl)
    }

    /// Live entries.
    pub fn len(&self) -> usize {
        lock(&self.entries).values().filter(|v| v.is_live()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn enter(&self) -> std::result::Result<(), Fault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &*lock(&self.failure) {
            Some((kind, message)) => Err(Fault::new(*kind, message.clone())),
            None => Ok(()),
        }
    }

    fn live(&self, key: &str) -> Option<Bytes> {
        let mut entries = lock(&self.entries);
        match entries.get(key) {
            Some(stored) if stored.is_live() => Some(stored.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> std::result::Result<Bytes, Fault> {
        self.enter()?;
        self.live(key)
            .ok_or_else(|| Fault::not_found(format!("key '{key}' not found")))
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> std::result::Result<(), Fault> {
        self.enter()?;
        if ttl.is_some() && !self.supports_ttl {
            return Err(Fault::new(FaultKind::Unsupported, "ttl not supported"));
        }
        lock(&self.entries).insert(
            key.to_string(),
            StoredValue {
                value,
                ttl,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> std::result::Result<(), Fault> {
        self.enter()?;
        lock(&self.entries).remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> std::result::Result<bool, Fault> {
        self.enter()?;
        Ok(self.live(key).is_some())
    }

    fn supports_ttl(&self) -> bool {
        self.supports_ttl
    }
}
