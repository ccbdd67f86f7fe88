// SPDX-License-Identifier: MIT OR Apache-2.0

//! Example: Resilient invocation, publishing and caching
//!
//! Runs against the in-process test doubles, so no sidecar is needed. Set
//! `RUST_LOG=mesh_framework=debug` to watch retries and breaker transitions.
//!
//! With `--sidecar` the same calls go to the Dapr sidecar described by the
//! usual environment (`DAPR_HTTP_PORT`, `MESH_CONFIG`, ...).

use mesh_framework_rs::error::FaultKind;
use mesh_framework_rs::testkit::{InMemoryStore, ScriptedTransport};
use mesh_framework_rs::{
    from_sidecar, CacheClient, InvocationClient, MeshConfig, MeshError, MetricsCollector,
    Transport,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize)]
struct CreateBooking {
    provider_id: u32,
    slot: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Booking {
    id: u64,
    status: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cancel = CancellationToken::new();

    if std::env::args().any(|arg| arg == "--sidecar") {
        let (client, cache) = from_sidecar(&MeshConfig::load_with_env()?)?;
        return run(&client, &cache, &cancel).await;
    }

    // ==========================================================================
    // 1. Scripted transport: two transient faults, then a booking
    // ==========================================================================
    println!("=== Retry ===");

    let transport = Arc::new(ScriptedTransport::new());
    transport
        .push_fault(FaultKind::Unavailable, "connection refused")
        .push_fault(FaultKind::Server, "HTTP 500")
        .push_json(&Booking {
            id: 42,
            status: "confirmed".to_string(),
        });

    let metrics = Arc::new(MetricsCollector::with_defaults());
    let client = InvocationClient::builder(Arc::clone(&transport) as Arc<dyn Transport>)
        .metrics(Arc::clone(&metrics))
        .build()?;
    let cache = CacheClient::new(Arc::new(InMemoryStore::new()));

    run(&client, &cache, &cancel).await?;
    println!("Transport calls: {}", transport.calls());

    // ==========================================================================
    // 2. Circuit breaker
    // ==========================================================================
    println!("\n=== Circuit Breaker ===");

    transport.fail_target("payments", FaultKind::Unavailable, "payments down");
    for attempt in 1..=4 {
        match client.invoke::<()>("payments", "charge", &cancel).await {
            Ok(()) => println!("  Call {attempt}: ok"),
            Err(MeshError::CircuitOpen { retry_after, .. }) => {
                println!("  Call {attempt}: rejected, circuit open for {retry_after:?}")
            }
            Err(e) => println!("  Call {attempt}: {e}"),
        }
    }
    println!("payments: {}", client.circuit_state("payments"));
    println!("bookings: {}", client.circuit_state("bookings"));

    // ==========================================================================
    // 3. Cancellation
    // ==========================================================================
    println!("\n=== Cancellation ===");

    transport.set_latency(Duration::from_secs(2));
    let deadline = cancel.child_token();
    let trigger = deadline.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });
    match client.invoke::<()>("bookings", "slow", &deadline).await {
        Err(e) if e.is_cancelled() => println!("  {e}"),
        other => println!("  unexpected: {other:?}"),
    }

    println!("\n=== Metrics ===");
    println!("{}", metrics.to_prometheus_text());

    Ok(())
}

async fn run(
    client: &InvocationClient,
    cache: &CacheClient,
    cancel: &CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let booking: Booking = client
        .invoke_with(
            "bookings",
            "create",
            &CreateBooking {
                provider_id: 3,
                slot: "2026-10-20T09:30".to_string(),
            },
            cancel,
        )
        .await?;
    println!("Booked: {booking:?}");

    client.publish("booking-created", &booking, cancel).await?;
    println!("Published booking-created on {}", client.default_bus());

    let key = format!("booking:{}", booking.id);
    cache.set_json(&key, &booking, None, cancel).await?;
    let cached: Option<Booking> = cache.get_json(&key, cancel).await?;
    println!("Cached: {cached:?}");
    println!("Missing key: {:?}", cache.get("missing-key", cancel).await?);

    Ok(())
}
