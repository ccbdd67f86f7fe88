// SPDX-License-Identifier: MIT OR Apache-2.0

//! The combined resilience policy: a per-target circuit breaker around a
//! retry loop.
//!
//! The breaker is consulted once per logical call. Retries happen inside the
//! admitted call, so a call that still fails after every retry counts as a
//! single failure.

use crate::error::{Fault, MeshError, Result};
use crate::runtime::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
use crate::runtime::metrics::{CallOutcome, MetricsCollector};
use crate::runtime::retry::{RetryConfig, RetryError};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Retry and circuit-breaking applied to every façade call.
#[derive(Debug)]
pub struct ResiliencePolicy {
    retry: RetryConfig,
    breakers: CircuitBreakerRegistry,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Default for ResiliencePolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default(), CircuitBreakerConfig::default())
    }
}

impl ResiliencePolicy {
    #[must_use]
    pub fn new(retry: RetryConfig, breaker: CircuitBreakerConfig) -> Self {
        Self {
            retry,
            breakers: CircuitBreakerRegistry::new(breaker),
            metrics: None,
        }
    }

    /// Record call outcomes, retries and breaker state in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn metrics(&self) -> Option<&Arc<MetricsCollector>> {
        self.metrics.as_ref()
    }

    /// Current breaker state for `key`. Targets never called are closed.
    #[must_use]
    pub fn circuit_state(&self, key: &str) -> CircuitState {
        self.breakers.state_of(key).unwrap_or(CircuitState::Closed)
    }

    /// Run `operation` under the breaker for `key`, retrying transient
    /// faults.
    ///
    /// `target` names the call in errors (for example `bookings/create`);
    /// `key` selects the breaker (the service or bus name).
    ///
    /// # Errors
    ///
    /// - [`MeshError::Cancelled`] when `cancel` fires before or during the call
    /// - [`MeshError::CircuitOpen`] when the breaker rejects the call
    /// - [`MeshError::Invocation`] for the last fault once retrying stops
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        key: &str,
        target: &str,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, Fault>>,
    {
        let started = Instant::now();

        if cancel.is_cancelled() {
            self.record(operation, key, CallOutcome::Cancelled, started);
            return Err(MeshError::Cancelled {
                target: target.to_string(),
            });
        }

        let breaker = self.breakers.get(key);
        let permit = match breaker.try_acquire() {
            Ok(permit) => permit,
            Err(retry_after) => {
                debug!(
                    target: "mesh_framework::resilience",
                    breaker = key,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "call rejected by open circuit"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_circuit_rejection(key);
                }
                self.record(operation, key, CallOutcome::Rejected, started);
                return Err(MeshError::CircuitOpen {
                    target: key.to_string(),
                    retry_after,
                });
            }
        };

        let mut attempts = 0u32;
        let outcome = self
            .retry
            .execute(cancel, || {
                attempts += 1;
                call()
            })
            .await;

        let (result, call_outcome) = match outcome {
            Ok(value) => {
                permit.succeed();
                (Ok(value), CallOutcome::Success)
            }
            Err(RetryError::Exhausted(fault)) => {
                permit.fail();
                (Err(invocation_error(target, attempts, fault)), CallOutcome::Failure)
            }
            Err(RetryError::Rejected(fault)) => {
                drop(permit);
                (Err(invocation_error(target, attempts, fault)), CallOutcome::Failure)
            }
            Err(RetryError::Cancelled) => {
                drop(permit);
                let err = MeshError::Cancelled {
                    target: target.to_string(),
                };
                (Err(err), CallOutcome::Cancelled)
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.set_circuit_state(key, breaker.state());
            metrics.record_retries(key, attempts.saturating_sub(1));
        }
        self.record(operation, key, call_outcome, started);

        result
    }

    fn record(&self, operation: &str, key: &str, outcome: CallOutcome, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_call(operation, key, outcome, started.elapsed());
        }
    }
}

fn invocation_error(target: &str, attempts: u32, fault: Fault) -> MeshError {
    MeshError::Invocation {
        target: target.to_string(),
        summary: fault.message().to_string(),
        attempts,
        source: fault,
    }
}
