// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end flows through the public API.
//!
//! The in-process doubles cover the resilience behaviour. The sidecar test at
//! the bottom only runs when `MESH_DAPR_TESTS` is set and a Dapr sidecar is
//! reachable through the usual environment variables.

use anyhow::{ensure, Context, Result};
use mesh_framework_rs::error::FaultKind;
use mesh_framework_rs::testkit::{InMemoryStore, ScriptedTransport};
use mesh_framework_rs::{
    from_sidecar, CacheClient, CircuitState, InvocationClient, MeshConfig, MeshError,
    MetricsCollector, StateStore, Transport,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Provider {
    id: u32,
    name: String,
    specialty: String,
}

fn provider() -> Provider {
    Provider {
        id: 3,
        name: "Dr. Osei".to_string(),
        specialty: "cardiology".to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_booking_flow_with_cache_aside() -> Result<()> {
    let transport = Arc::new(ScriptedTransport::new());
    let store = Arc::new(InMemoryStore::new());
    let client = InvocationClient::new(Arc::clone(&transport) as Arc<dyn Transport>);
    let cache = CacheClient::new(Arc::clone(&store) as Arc<dyn StateStore>);
    let cancel = CancellationToken::new();

    transport
        .push_fault(FaultKind::Timeout, "upstream timeout")
        .push_json(&provider());

    // Cache miss, then fetch and populate.
    let key = "provider:3";
    let cached: Option<Provider> = cache.get_json(key, &cancel).await?;
    ensure!(cached.is_none(), "cache should start empty");

    let fetched: Provider = client
        .invoke("providers", "get", &cancel)
        .await
        .context("provider lookup")?;
    cache
        .set_json(key, &fetched, Some(Duration::from_secs(300)), &cancel)
        .await?;

    let hit: Option<Provider> = cache.get_json(key, &cancel).await?;
    assert_eq!(hit, Some(provider()));
    assert_eq!(transport.calls(), 2);
    assert_eq!(store.ttl_of(key), Some(Duration::from_secs(300)));

    client.publish("provider-viewed", &fetched.id, &cancel).await?;
    assert_eq!(transport.published().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_outage_and_recovery() -> Result<()> {
    let transport = Arc::new(ScriptedTransport::new());
    let metrics = Arc::new(MetricsCollector::with_defaults());
    let client = InvocationClient::builder(Arc::clone(&transport) as Arc<dyn Transport>)
        .metrics(Arc::clone(&metrics))
        .build()?;
    let cancel = CancellationToken::new();

    transport.fail_target("bookings", FaultKind::Unavailable, "connection refused");
    for _ in 0..3 {
        let err = client
            .invoke::<()>("bookings", "list", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, MeshError::Invocation { attempts: 4, .. }));
    }

    let calls = transport.calls();
    let rejected = client.invoke::<()>("bookings", "list", &cancel).await;
    assert!(matches!(rejected, Err(MeshError::CircuitOpen { .. })));
    assert_eq!(transport.calls(), calls);

    // Other services keep working during the outage.
    client.invoke::<()>("users", "me", &cancel).await?;

    tokio::time::advance(Duration::from_secs(30)).await;
    transport.recover_target("bookings");
    client.invoke::<()>("bookings", "list", &cancel).await?;
    assert_eq!(client.circuit_state("bookings"), CircuitState::Closed);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.failed_calls, 3);
    assert_eq!(snapshot.successful_calls, 2);
    assert_eq!(metrics.circuit_rejections("bookings"), 1);
    Ok(())
}

#[tokio::test]
async fn test_ttl_requires_store_support() -> Result<()> {
    let cache = CacheClient::new(Arc::new(InMemoryStore::without_ttl()));
    let cancel = CancellationToken::new();

    let err = cache
        .set("session:1", "token", Some(Duration::from_secs(60)), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, MeshError::Unsupported(_)));
    assert!(!cache.exists("session:1", &cancel).await?);
    Ok(())
}

#[tokio::test]
async fn test_dapr_sidecar_roundtrip() -> Result<()> {
    if std::env::var("MESH_DAPR_TESTS").is_err() {
        println!("Skipping sidecar test (MESH_DAPR_TESTS not set)");
        return Ok(());
    }

    let config = MeshConfig::load_with_env()?;
    let (_client, cache) = from_sidecar(&config)?;
    let cancel = CancellationToken::new();

    cache.set_json("mesh-it", &provider(), None, &cancel).await?;
    let loaded: Option<Provider> = cache.get_json("mesh-it", &cancel).await?;
    assert_eq!(loaded, Some(provider()));

    cache.delete("mesh-it", &cancel).await?;
    assert!(!cache.exists("mesh-it", &cancel).await?);
    Ok(())
}
