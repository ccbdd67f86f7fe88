// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retry policies and backoff strategies for resilient service calls.
//!
//! Only transient faults (see [`FaultKind::is_transient`]) are retried. Every
//! wait between attempts races the caller's cancellation token, so a
//! cancelled call returns promptly instead of sleeping out its backoff.
//!
//! # Example
//!
//! ```
//! use mesh_framework_rs::runtime::{ExponentialBackoff, RetryConfig};
//! use std::time::Duration;
//!
//! let retry = RetryConfig::builder()
//!     .max_retries(3)
//!     .backoff(ExponentialBackoff::new(Duration::from_millis(100)))
//!     .build();
//!
//! assert_eq!(retry.delay_for(1), Duration::from_millis(200));
//! ```
//!
//! [`FaultKind::is_transient`]: crate::error::FaultKind::is_transient

use crate::error::Fault;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Defines a backoff strategy for retry delays.
pub trait BackoffStrategy: Send + Sync {
    /// Delay before retry number `attempt` (1 for the first retry).
    fn delay(&self, attempt: u32) -> Duration;
}

// =============================================================================
// No Backoff
// =============================================================================

/// No delay between retries.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NoBackoff;

impl NoBackoff {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl BackoffStrategy for NoBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

// =============================================================================
// Fixed Backoff
// =============================================================================

/// Fixed delay between retries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedBackoff {
    delay: Duration,
}

impl FixedBackoff {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    #[must_use]
    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }
}

impl BackoffStrategy for FixedBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

// =============================================================================
// Exponential Backoff
// =============================================================================

/// Exponential backoff: `base * multiplier^attempt`, capped at `max_delay`.
///
/// With the defaults (100ms base, multiplier 2) the three retries wait
/// 200ms, 400ms and 800ms. There is no jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    /// Set the maximum delay cap.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set the multiplier for exponential growth.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let millis = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

// =============================================================================
// Backoff selection
// =============================================================================

/// The backoff strategy carried by a [`RetryConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    None(NoBackoff),
    Fixed(FixedBackoff),
    Exponential(ExponentialBackoff),
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential(ExponentialBackoff::default())
    }
}

impl BackoffStrategy for Backoff {
    fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::None(b) => b.delay(attempt),
            Backoff::Fixed(b) => b.delay(attempt),
            Backoff::Exponential(b) => b.delay(attempt),
        }
    }
}

impl From<NoBackoff> for Backoff {
    fn from(b: NoBackoff) -> Self {
        Backoff::None(b)
    }
}

impl From<FixedBackoff> for Backoff {
    fn from(b: FixedBackoff) -> Self {
        Backoff::Fixed(b)
    }
}

impl From<ExponentialBackoff> for Backoff {
    fn from(b: ExponentialBackoff) -> Self {
        Backoff::Exponential(b)
    }
}

// =============================================================================
// Retry Configuration
// =============================================================================

/// Why a retried operation did not produce a value.
#[derive(Debug)]
pub enum RetryError {
    /// The caller cancelled before an attempt or during a backoff wait.
    Cancelled,
    /// A transient fault persisted through every retry.
    Exhausted(Fault),
    /// A fault that retrying cannot fix.
    Rejected(Fault),
}

/// Retry configuration: how many extra attempts and how long to wait.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Backoff strategy for calculating delays.
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Disable retries.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            backoff: Backoff::None(NoBackoff),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    /// Execute an async operation with retry logic.
    ///
    /// The operation is polled against `cancel`; cancellation wins over an
    /// in-flight attempt and over a backoff wait.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::Rejected`] for non-transient faults,
    /// [`RetryError::Exhausted`] once retries run out and
    /// [`RetryError::Cancelled`] when `cancel` fires.
    pub async fn execute<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Fault>>,
    {
        let mut retries = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                outcome = operation() => outcome,
            };

            let fault = match outcome {
                Ok(value) => return Ok(value),
                Err(fault) => fault,
            };

            if !fault.is_transient() {
                return Err(RetryError::Rejected(fault));
            }

            if retries >= self.max_retries {
                return Err(RetryError::Exhausted(fault));
            }

            retries += 1;
            let delay = self.backoff.delay(retries);
            debug!(
                target: "mesh_framework::resilience",
                retry = retries,
                delay_ms = delay.as_millis() as u64,
                fault = %fault,
                "transient fault, backing off"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Builder for `RetryConfig`.
#[derive(Debug, Clone)]
pub struct RetryConfigBuilder {
    max_retries: u32,
    backoff: Backoff,
}

impl RetryConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_retries: defaults.max_retries,
            backoff: defaults.backoff,
        }
    }

    /// Set maximum retry attempts.
    #[must_use]
    pub fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Set the backoff strategy.
    #[must_use]
    pub fn backoff(mut self, backoff: impl Into<Backoff>) -> Self {
        self.backoff = backoff.into();
        self
    }

    #[must_use]
    pub fn build(self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            backoff: self.backoff,
        }
    }
}

impl Default for RetryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
