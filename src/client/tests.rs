// SPDX-License-Identifier: MIT OR Apache-2.0

use super::*;
use crate::error::FaultKind;
use crate::runtime::MetricsConfig;
use crate::testkit::ScriptedTransport;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Serialize)]
struct CreateBooking {
    provider_id: u32,
    slot: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Booking {
    id: u64,
    status: String,
}

fn setup() -> (Arc<ScriptedTransport>, InvocationClient) {
    let transport = Arc::new(ScriptedTransport::new());
    let client = InvocationClient::new(Arc::clone(&transport) as Arc<dyn Transport>);
    (transport, client)
}

/// Fail one call all the way through its retries.
async fn exhaust(client: &InvocationClient, service: &str, cancel: &CancellationToken) -> MeshError {
    client
        .invoke::<()>(service, "create", cancel)
        .await
        .unwrap_err()
}

#[tokio::test]
async fn test_empty_names_are_rejected_without_transport() {
    let (transport, client) = setup();
    let cancel = CancellationToken::new();

    let cases = [
        client.invoke::<()>("", "create", &cancel).await,
        client.invoke::<()>("bookings", "", &cancel).await,
        client.invoke_with::<_, ()>(" ", "create", &1, &cancel).await,
        client.invoke_method::<()>(Method::GET, "bookings", "", &cancel).await,
        client.publish("", &1, &cancel).await,
        client.publish_to("", "orders", &1, &cancel).await,
    ];

    for result in cases {
        assert!(matches!(result, Err(MeshError::Validation(_))));
    }
    assert_eq!(transport.calls(), 0);
    assert_eq!(client.circuit_state("bookings"), CircuitState::Closed);
}

#[tokio::test]
async fn test_invoke_with_encodes_request_and_decodes_response() {
    let (transport, client) = setup();
    let cancel = CancellationToken::new();
    transport.push_json(&Booking {
        id: 7,
        status: "confirmed".to_string(),
    });

    let booking: Booking = client
        .invoke_with(
            "bookings",
            "create",
            &CreateBooking {
                provider_id: 3,
                slot: "09:30".to_string(),
            },
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(booking.id, 7);

    let sent = transport.invocations();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].address().to_string(), "bookings/create");
    assert!(sent[0].verb().is_none());
    let body: serde_json::Value = serde_json::from_slice(sent[0].payload().unwrap()).unwrap();
    assert_eq!(body, serde_json::json!({"provider_id": 3, "slot": "09:30"}));
}

#[tokio::test]
async fn test_invoke_method_carries_verb() {
    let (transport, client) = setup();
    let cancel = CancellationToken::new();

    client
        .invoke_method::<()>(Method::DELETE, "bookings", "cancel", &cancel)
        .await
        .unwrap();
    client
        .invoke_method_with::<_, ()>(Method::PUT, "users", "profile", &"Ada", &cancel)
        .await
        .unwrap();

    let sent = transport.invocations();
    assert_eq!(sent[0].verb(), Some(&Method::DELETE));
    assert!(sent[0].payload().is_none());
    assert_eq!(sent[1].verb(), Some(&Method::PUT));
    assert_eq!(sent[1].payload().map(|p| &p[..]), Some(&br#""Ada""#[..]));
}

#[tokio::test]
async fn test_empty_response_decodes_as_null() {
    let (_transport, client) = setup();
    let cancel = CancellationToken::new();

    client.invoke::<()>("bookings", "ping", &cancel).await.unwrap();
    let none: Option<Booking> = client.invoke("bookings", "find", &cancel).await.unwrap();
    assert!(none.is_none());
}

#[tokio::test]
async fn test_undecodable_response_is_not_retried() {
    let (transport, client) = setup();
    let cancel = CancellationToken::new();
    transport.push_ok(&b"<html>oops</html>"[..]);

    let err = client
        .invoke::<Booking>("bookings", "get", &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, MeshError::Serialization(_)));
    assert_eq!(transport.calls(), 1);
    assert_eq!(client.request_counters().failed_requests(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_faults_are_retried_with_backoff() {
    let (transport, client) = setup();
    let cancel = CancellationToken::new();
    transport
        .push_fault(FaultKind::Unavailable, "connection refused")
        .push_fault(FaultKind::Server, "HTTP 500")
        .push_json(&Booking {
            id: 9,
            status: "pending".to_string(),
        });

    let start = Instant::now();
    let booking: Booking = client.invoke("bookings", "create", &cancel).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(booking.id, 9);
    assert_eq!(transport.calls(), 3);
    // 200ms + 400ms of backoff
    assert!(elapsed >= Duration::from_millis(600), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(650), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_surface_last_fault() {
    let (transport, client) = setup();
    let cancel = CancellationToken::new();
    transport
        .push_faults(3, FaultKind::Timeout, "timed out")
        .push_fault(FaultKind::Server, "HTTP 503: last");

    let start = Instant::now();
    let err = exhaust(&client, "bookings", &cancel).await;

    match err {
        MeshError::Invocation {
            target,
            attempts,
            source,
            ..
        } => {
            assert_eq!(target, "bookings/create");
            assert_eq!(attempts, 4);
            assert_eq!(source.message(), "HTTP 503: last");
        }
        other => panic!("expected Invocation, got {other:?}"),
    }
    assert_eq!(transport.calls(), 4);
    // 200 + 400 + 800
    assert!(start.elapsed() >= Duration::from_millis(1400));
    assert!(start.elapsed() < Duration::from_millis(1450));
}

#[tokio::test]
async fn test_client_faults_are_not_retried() {
    let (transport, client) = setup();
    let cancel = CancellationToken::new();
    transport.push_fault(FaultKind::Client, "HTTP 400: bad slot");

    let err = exhaust(&client, "bookings", &cancel).await;

    assert!(matches!(err, MeshError::Invocation { attempts: 1, .. }));
    assert_eq!(transport.calls(), 1);
    assert_eq!(client.policy().breakers().get("bookings").failure_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_opens_after_three_failed_calls() {
    let (transport, client) = setup();
    let cancel = CancellationToken::new();
    transport.fail_target("bookings", FaultKind::Unavailable, "down");

    for _ in 0..3 {
        let err = exhaust(&client, "bookings", &cancel).await;
        assert!(matches!(err, MeshError::Invocation { .. }));
    }
    assert_eq!(client.circuit_state("bookings"), CircuitState::Open);
    assert_eq!(transport.calls(), 12);

    let err = exhaust(&client, "bookings", &cancel).await;
    match err {
        MeshError::CircuitOpen {
            target,
            retry_after,
        } => {
            assert_eq!(target, "bookings");
            assert!(retry_after <= Duration::from_secs(30));
            assert!(retry_after > Duration::ZERO);
        }
        other => panic!("expected CircuitOpen, got {other:?}"),
    }
    assert_eq!(transport.calls(), 12);
}

#[tokio::test(start_paused = true)]
async fn test_probe_success_closes_circuit() {
    let (transport, client) = setup();
    let cancel = CancellationToken::new();
    transport.fail_target("bookings", FaultKind::Unavailable, "down");
    for _ in 0..3 {
        exhaust(&client, "bookings", &cancel).await;
    }

    tokio::time::advance(Duration::from_secs(29)).await;
    assert!(exhaust(&client, "bookings", &cancel).await.is_circuit_open());

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(client.circuit_state("bookings"), CircuitState::HalfOpen);

    transport.recover_target("bookings");
    client.invoke::<()>("bookings", "create", &cancel).await.unwrap();

    assert_eq!(client.circuit_state("bookings"), CircuitState::Closed);
    assert_eq!(client.policy().breakers().get("bookings").failure_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_probe_failure_reopens_circuit() {
    let (transport, client) = setup();
    let cancel = CancellationToken::new();
    transport.fail_target("bookings", FaultKind::Unavailable, "down");
    for _ in 0..3 {
        exhaust(&client, "bookings", &cancel).await;
    }

    tokio::time::advance(Duration::from_secs(30)).await;
    let calls_before = transport.calls();

    let err = exhaust(&client, "bookings", &cancel).await;
    assert!(matches!(err, MeshError::Invocation { .. }));
    assert!(transport.calls() > calls_before);
    assert_eq!(client.circuit_state("bookings"), CircuitState::Open);

    // A fresh break started when the probe failed.
    match exhaust(&client, "bookings", &cancel).await {
        MeshError::CircuitOpen { retry_after, .. } => {
            assert!(retry_after > Duration::from_secs(29));
        }
        other => panic!("expected CircuitOpen, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_half_open_admits_a_single_probe() {
    let (transport, client) = setup();
    let cancel = CancellationToken::new();
    transport.fail_target("bookings", FaultKind::Unavailable, "down");
    for _ in 0..3 {
        exhaust(&client, "bookings", &cancel).await;
    }
    tokio::time::advance(Duration::from_secs(30)).await;
    transport.recover_target("bookings");
    transport.set_latency(Duration::from_secs(1));

    let probe = {
        let client = client.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { client.invoke::<()>("bookings", "create", &cancel).await })
    };
    // Let the probe reach the transport.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let rejected = exhaust(&client, "bookings", &cancel).await;
    assert!(rejected.is_circuit_open());

    probe.await.unwrap().unwrap();
    assert_eq!(client.circuit_state("bookings"), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_breakers_are_independent_per_service() {
    let (transport, client) = setup();
    let cancel = CancellationToken::new();
    transport.fail_target("bookings", FaultKind::Unavailable, "down");

    for _ in 0..3 {
        exhaust(&client, "bookings", &cancel).await;
    }
    assert_eq!(client.circuit_state("bookings"), CircuitState::Open);

    client.invoke::<()>("payments", "charge", &cancel).await.unwrap();
    assert_eq!(client.circuit_state("payments"), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff() {
    let (transport, client) = setup();
    let cancel = CancellationToken::new();
    transport.fail_target("bookings", FaultKind::Unavailable, "down");

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    // First attempt at 0ms, second after 200ms, cancelled while waiting 400ms.
    let err = exhaust(&client, "bookings", &cancel).await;

    match err {
        MeshError::Cancelled { target } => assert_eq!(target, "bookings/create"),
        other => panic!("expected Cancelled, got {other:?}"),
    }
    assert_eq!(transport.calls(), 2);
    assert_eq!(client.policy().breakers().get("bookings").failure_count(), 0);
    assert_eq!(client.circuit_state("bookings"), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_call() {
    let (transport, client) = setup();
    let cancel = CancellationToken::new();
    transport.set_latency(Duration::from_secs(5));

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let err = exhaust(&client, "bookings", &cancel).await;
    assert!(err.is_cancelled());
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_already_cancelled_token() {
    let (transport, client) = setup();
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert!(exhaust(&client, "bookings", &cancel).await.is_cancelled());
    assert!(client
        .publish("orders", &1, &cancel)
        .await
        .unwrap_err()
        .is_cancelled());
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_publish_uses_default_bus() {
    let (transport, client) = setup();
    let cancel = CancellationToken::new();

    client
        .publish(
            "booking-created",
            &Booking {
                id: 1,
                status: "confirmed".to_string(),
            },
            &cancel,
        )
        .await
        .unwrap();
    client
        .publish_to("kafka", "audit", &"created", &cancel)
        .await
        .unwrap();

    let published = transport.published();
    assert_eq!(published[0].topic.bus(), "pubsub");
    assert_eq!(published[0].topic.topic(), "booking-created");
    assert_eq!(published[0].content_type, "application/json");
    let event: Booking = published[0].json().unwrap();
    assert_eq!(event.id, 1);
    assert_eq!(published[1].topic.bus(), "kafka");
}

#[tokio::test]
async fn test_publish_event() {
    let (transport, client) = setup();
    let cancel = CancellationToken::new();
    let event = Event::new(PubSubTopic::new("pubsub", "reminders").unwrap(), vec![1, 2, 3]);

    client.publish_event(&event, &cancel).await.unwrap();

    let published = transport.published();
    assert_eq!(published[0].topic.topic(), "reminders");
    assert_eq!(&published[0].payload[..], b"[1,2,3]");
}

#[tokio::test(start_paused = true)]
async fn test_publish_breaker_is_keyed_by_bus() {
    let (transport, client) = setup();
    let cancel = CancellationToken::new();
    transport.fail_target("pubsub", FaultKind::Unavailable, "broker down");

    for topic in ["a", "b", "c"] {
        assert!(client.publish(topic, &0, &cancel).await.is_err());
    }
    assert_eq!(client.circuit_state("pubsub"), CircuitState::Open);

    let err = client.publish("d", &0, &cancel).await.unwrap_err();
    assert!(err.is_circuit_open());

    client.publish_to("kafka", "d", &0, &cancel).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_metrics_are_recorded() {
    let transport = Arc::new(ScriptedTransport::new());
    let metrics = Arc::new(MetricsCollector::new(MetricsConfig::default()));
    let client = InvocationClient::builder(Arc::clone(&transport) as Arc<dyn Transport>)
        .metrics(Arc::clone(&metrics))
        .build()
        .unwrap();
    let cancel = CancellationToken::new();

    transport.push_fault(FaultKind::Server, "HTTP 500");
    client.invoke::<()>("bookings", "create", &cancel).await.unwrap();
    client.publish("orders", &1, &cancel).await.unwrap();

    assert_eq!(metrics.successful_calls(), 2);
    assert_eq!(metrics.retries("bookings"), 1);
    assert_eq!(metrics.circuit_state("bookings"), Some(CircuitState::Closed));
    assert!(client.metrics().is_some());

    let text = metrics.to_prometheus_text();
    assert!(text.contains("mesh_client_calls_total"));
}

#[tokio::test]
async fn test_from_config_applies_settings() {
    let transport = Arc::new(ScriptedTransport::new());
    let config = MeshConfig::from_yaml(
        "pubsub_name: events\nretry:\n  enabled: false\nmetrics:\n  enabled: true\n",
    )
    .unwrap();

    let client = InvocationClient::from_config(Arc::clone(&transport) as Arc<dyn Transport>, &config)
        .unwrap();
    let cancel = CancellationToken::new();

    assert_eq!(client.default_bus(), "events");
    assert_eq!(client.policy().retry().max_retries, 0);
    assert!(client.metrics().is_some());

    transport.push_fault(FaultKind::Unavailable, "down");
    let err = client.invoke::<()>("bookings", "create", &cancel).await.unwrap_err();
    assert!(matches!(err, MeshError::Invocation { attempts: 1, .. }));
}

#[test]
fn test_builder_rejects_empty_default_bus() {
    let transport: Arc<dyn Transport> = Arc::new(ScriptedTransport::new());
    let result = InvocationClient::builder(transport).default_bus("").build();
    assert!(matches!(result, Err(MeshError::Validation(_))));
}

#[tokio::test]
async fn test_from_sidecar_builds_both_facades() {
    let config = MeshConfig::from_yaml("state_store: redis\n").unwrap();
    let (client, cache) = from_sidecar(&config).unwrap();

    assert_eq!(client.default_bus(), "pubsub");
    assert_eq!(cache.store_name(), "redis");
}
