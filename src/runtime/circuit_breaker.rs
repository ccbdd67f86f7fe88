// SPDX-License-Identifier: MIT OR Apache-2.0

//! Circuit breaker pattern implementation for resilient service calls.
//!
//! One breaker exists per logical target (a service name for invocations, a
//! bus name for publishes). Breakers are created lazily by
//! [`CircuitBreakerRegistry`] and live for the process lifetime.
//!
//! # States
//!
//! - **Closed**: Normal operation, requests pass through
//! - **Open**: Requests immediately fail (target is down)
//! - **Half-Open**: A single probe tests whether the target recovered
//!
//! # Example
//!
//! ```
//! use mesh_framework_rs::runtime::{CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
//! use std::time::Duration;
//!
//! let registry = CircuitBreakerRegistry::new(
//!     CircuitBreakerConfig::default().with_reset_timeout(Duration::from_secs(30)),
//! );
//!
//! let breaker = registry.get("bookings");
//! let permit = breaker.try_acquire().expect("closed circuit admits calls");
//! permit.fail();
//!
//! assert_eq!(breaker.state(), CircuitState::Closed);
//! assert_eq!(breaker.failure_count(), 1);
//! ```

use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests pass through normally.
    Closed,
    /// Circuit is open, requests fail immediately.
    Open,
    /// Circuit is half-open, testing if the target has recovered.
    HalfOpen,
}

impl CircuitState {
    /// Numeric encoding used by gauges (0=closed, 1=half-open, 2=open).
    #[must_use]
    pub fn as_gauge(self) -> u64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: usize,
    /// Successful probes in half-open state before closing.
    pub success_threshold: usize,
    /// Duration to wait before transitioning from open to half-open.
    pub reset_timeout: Duration,
    /// Maximum number of concurrent probes in half-open state.
    pub half_open_max_requests: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 1,
            reset_timeout: Duration::from_secs(30),
            half_open_max_requests: 1,
        }
    }
}

impl CircuitBreakerConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: usize) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the success threshold for recovery.
    #[must_use]
    pub fn with_success_threshold(mut self, threshold: usize) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set the reset timeout.
    #[must_use]
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Set the maximum half-open probes.
    #[must_use]
    pub fn with_half_open_max_requests(mut self, max: usize) -> Self {
        self.half_open_max_requests = max;
        self
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: usize,
    success_count: usize,
    probes_in_flight: usize,
    opened_at: Option<Instant>,
    // Bumped on every state transition; permits issued under an older
    // generation settle without touching the state.
    generation: u64,
}

/// Circuit breaker for a single target.
///
/// All state transitions happen under one short-lived mutex; nothing is held
/// across an await point.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker for `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                probes_in_flight: 0,
                opened_at: None,
                generation: 0,
            }),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        }
    }

    /// Create a circuit breaker with default configuration.
    #[must_use]
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move Open -> HalfOpen once the break has elapsed.
    fn refresh(&self, inner: &mut Inner) {
        if inner.state != CircuitState::Open {
            return;
        }
        if let Some(opened_at) = inner.opened_at {
            if opened_at.elapsed() >= self.config.reset_timeout {
                inner.state = CircuitState::HalfOpen;
                inner.probes_in_flight = 0;
                inner.success_count = 0;
                inner.generation += 1;
                info!(
                    target: "mesh_framework::resilience",
                    circuit = %self.name,
                    "circuit half-open, admitting probe"
                );
            }
        }
    }

    fn open(&self, inner: &mut Inner) {
        inner.state = CircuitState::Open;
        inner.generation += 1;
        inner.opened_at = Some(Instant::now());
        inner.probes_in_flight = 0;
        inner.success_count = 0;
        warn!(
            target: "mesh_framework::resilience",
            circuit = %self.name,
            break_secs = self.config.reset_timeout.as_secs_f64(),
            "circuit opened"
        );
    }

    fn close(&self, inner: &mut Inner) {
        inner.state = CircuitState::Closed;
        inner.generation += 1;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.probes_in_flight = 0;
        inner.opened_at = None;
        info!(
            target: "mesh_framework::resilience",
            circuit = %self.name,
            "circuit closed"
        );
    }

    /// Name of the target this breaker protects.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current circuit state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Check if the circuit would admit a request right now.
    #[must_use]
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        let state = inner.state;
        match state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => inner.probes_in_flight < self.config.half_open_max_requests,
        }
    }

    /// Ask to run one call through the circuit.
    ///
    /// The returned permit must be settled with [`CircuitPermit::succeed`] or
    /// [`CircuitPermit::fail`]. Dropping it unsettled (cancellation, a
    /// non-transient fault) leaves the failure streak untouched and frees a
    /// half-open probe slot.
    ///
    /// # Errors
    ///
    /// Returns the time left until the next probe window when the call is
    /// rejected.
    pub fn try_acquire(self: &Arc<Self>) -> Result<CircuitPermit, Duration> {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.lock();
        self.refresh(&mut inner);

        let state = inner.state;
        let probe = match state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen
                if inner.probes_in_flight < self.config.half_open_max_requests =>
            {
                inner.probes_in_flight += 1;
                true
            }
            CircuitState::HalfOpen => {
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
                return Err(Duration::ZERO);
            }
            CircuitState::Open => {
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
                return Err(Self::remaining(&inner, self.config.reset_timeout));
            }
        };

        Ok(CircuitPermit {
            breaker: Arc::clone(self),
            generation: inner.generation,
            probe,
            settled: false,
        })
    }

    fn remaining(inner: &Inner, reset_timeout: Duration) -> Duration {
        inner
            .opened_at
            .map(|opened| reset_timeout.saturating_sub(opened.elapsed()))
            .unwrap_or(Duration::ZERO)
    }

    fn on_success(&self, generation: u64, probe: bool) {
        let mut inner = self.lock();
        if generation != inner.generation {
            return;
        }
        let state = inner.state;
        match state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                if probe {
                    inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
                }
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    self.close(&mut inner);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, generation: u64) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.lock();
        // Admitted before the last transition; the current state stands.
        if generation != inner.generation {
            return;
        }
        let state = inner.state;
        match state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    self.open(&mut inner);
                }
            }
            CircuitState::HalfOpen => {
                self.open(&mut inner);
            }
            CircuitState::Open => {}
        }
    }

    fn on_release(&self, generation: u64, probe: bool) {
        let mut inner = self.lock();
        if probe && inner.state == CircuitState::HalfOpen && generation == inner.generation {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }
    }

    /// Manually reset the circuit breaker to closed state.
    pub fn reset(&self) {
        let mut inner = self.lock();
        self.close(&mut inner);
    }

    /// Get the time until the circuit admits a probe (if open).
    #[must_use]
    pub fn time_until_retry(&self) -> Option<Duration> {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        if inner.state != CircuitState::Open {
            return None;
        }
        Some(Self::remaining(&inner, self.config.reset_timeout))
    }

    /// Get the current consecutive failure count.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.lock().failure_count
    }

    /// Get total number of calls.
    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    /// Get total number of failures.
    #[must_use]
    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    /// Get total number of rejections (circuit open).
    #[must_use]
    pub fn total_rejections(&self) -> u64 {
        self.total_rejections.load(Ordering::Relaxed)
    }

    /// Get failure rate (0.0 to 1.0).
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let total = self.total_calls.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let failures = self.total_failures.load(Ordering::Relaxed);
        failures as f64 / total as f64
    }

    /// Get the circuit breaker configuration.
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}

/// Admission of one call through a [`CircuitBreaker`].
#[derive(Debug)]
#[must_use = "an unsettled permit does not count toward the breaker"]
pub struct CircuitPermit {
    breaker: Arc<CircuitBreaker>,
    generation: u64,
    probe: bool,
    settled: bool,
}

impl CircuitPermit {
    /// Whether this call is a half-open probe.
    #[must_use]
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Record a successful call.
    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success(self.generation, self.probe);
    }

    /// Record a failed call; counts toward the failure threshold.
    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.generation);
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_release(self.generation, self.probe);
        }
    }
}

/// Lazily populated map of per-target circuit breakers.
///
/// Lookups on different targets land on different shards and never contend
/// on a shared lock.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Get the breaker for `target`, creating it on first use.
    #[must_use]
    pub fn get(&self, target: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(target) {
            return Arc::clone(breaker.value());
        }
        let breaker = self
            .breakers
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(target, self.config.clone())));
        Arc::clone(breaker.value())
    }

    /// Current state for `target`, if a call has ever been made to it.
    #[must_use]
    pub fn state_of(&self, target: &str) -> Option<CircuitState> {
        self.breakers.get(target).map(|b| b.value().state())
    }

    /// Names of all targets with a breaker.
    #[must_use]
    pub fn targets(&self) -> Vec<String> {
        self.breakers.iter().map(|e| e.key().clone()).collect()
    }

    /// Reset every breaker to closed.
    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }

    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
