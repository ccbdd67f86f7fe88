// SPDX-License-Identifier: MIT OR Apache-2.0

//! Structured request logging for façade calls.
//!
//! Every invoke, publish and cache operation goes through a [`RequestLogger`],
//! which times the call and emits one event when it finishes, at a level
//! chosen per outcome.
//!
//! # Example
//!
//! ```
//! use mesh_framework_rs::runtime::{LogLevel, LoggingConfig, RequestLogger};
//!
//! let logger = RequestLogger::with_config(
//!     LoggingConfig::new()
//!         .with_success_level(LogLevel::Debug)
//!         .with_payload_sizes(true),
//! );
//!
//! let span = logger.start("invoke", "bookings/create");
//! logger.finish_success(span, Some(128));
//! assert_eq!(logger.counters().successful_requests(), 1);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Log level for request logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    /// Disabled - no logging.
    Off,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
            LogLevel::Off => write!(f, "OFF"),
        }
    }
}

/// Configuration for request logging.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Log level for successful requests.
    pub success_level: LogLevel,
    /// Log level for failed requests.
    pub error_level: LogLevel,
    /// Whether to include response sizes in success events.
    pub log_payload_sizes: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            success_level: LogLevel::Debug,
            error_level: LogLevel::Warn,
            log_payload_sizes: false,
        }
    }
}

impl LoggingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_success_level(mut self, level: LogLevel) -> Self {
        self.success_level = level;
        self
    }

    #[must_use]
    pub fn with_error_level(mut self, level: LogLevel) -> Self {
        self.error_level = level;
        self
    }

    #[must_use]
    pub fn with_payload_sizes(mut self, enabled: bool) -> Self {
        self.log_payload_sizes = enabled;
        self
    }

    /// Log every call at info and failures at error.
    #[must_use]
    pub fn verbose() -> Self {
        Self {
            success_level: LogLevel::Info,
            error_level: LogLevel::Error,
            log_payload_sizes: true,
        }
    }

    /// Log only failures.
    #[must_use]
    pub fn quiet() -> Self {
        Self {
            success_level: LogLevel::Off,
            error_level: LogLevel::Warn,
            log_payload_sizes: false,
        }
    }
}

/// Success/failure counters kept by a [`RequestLogger`].
#[derive(Debug, Default)]
pub struct RequestCounters {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
}

impl RequestCounters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn successful_requests(&self) -> u64 {
        self.successful_requests.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }

    /// Get the success rate (0.0 to 1.0).
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 1.0;
        }
        let successful = self.successful_requests.load(Ordering::Relaxed);
        successful as f64 / total as f64
    }

    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.successful_requests.store(0, Ordering::Relaxed);
        self.failed_requests.store(0, Ordering::Relaxed);
    }
}

fn emit(level: LogLevel, operation: &str, target: &str, elapsed: Duration, message: &str) {
    let elapsed_ms = elapsed.as_millis() as u64;
    match level {
        LogLevel::Trace => {
            trace!(target: "mesh_framework::invoke", { call.operation = operation, call.target = target, elapsed_ms }, "{message}")
        }
        LogLevel::Debug => {
            debug!(target: "mesh_framework::invoke", { call.operation = operation, call.target = target, elapsed_ms }, "{message}")
        }
        LogLevel::Info => {
            info!(target: "mesh_framework::invoke", { call.operation = operation, call.target = target, elapsed_ms }, "{message}")
        }
        LogLevel::Warn => {
            warn!(target: "mesh_framework::invoke", { call.operation = operation, call.target = target, elapsed_ms }, "{message}")
        }
        LogLevel::Error => {
            error!(target: "mesh_framework::invoke", { call.operation = operation, call.target = target, elapsed_ms }, "{message}")
        }
        LogLevel::Off => {}
    }
}

/// A request logger that tracks timing and logs outcomes.
#[derive(Debug, Default)]
pub struct RequestLogger {
    config: LoggingConfig,
    counters: RequestCounters,
}

impl RequestLogger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: LoggingConfig) -> Self {
        Self {
            config,
            counters: RequestCounters::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &LoggingConfig {
        &self.config
    }

    #[must_use]
    pub fn counters(&self) -> &RequestCounters {
        &self.counters
    }

    /// Start tracking a request.
    #[must_use]
    pub fn start(&self, operation: &str, target: &str) -> RequestSpan {
        RequestSpan {
            operation: operation.to_string(),
            target: target.to_string(),
            start: Instant::now(),
        }
    }

    /// Finish tracking a request (success).
    pub fn finish_success(&self, span: RequestSpan, response_bytes: Option<usize>) {
        self.counters.record_success();
        if self.config.success_level == LogLevel::Off {
            return;
        }

        let message = match response_bytes {
            Some(bytes) if self.config.log_payload_sizes => {
                format!("call completed ({bytes} response bytes)")
            }
            _ => "call completed".to_string(),
        };
        emit(
            self.config.success_level,
            &span.operation,
            &span.target,
            span.elapsed(),
            &message,
        );
    }

    /// Finish tracking a request (failure).
    pub fn finish_error(&self, span: RequestSpan, error: &dyn fmt::Display) {
        self.counters.record_failure();
        if self.config.error_level == LogLevel::Off {
            return;
        }

        emit(
            self.config.error_level,
            &span.operation,
            &span.target,
            span.elapsed(),
            &format!("call failed: {error}"),
        );
    }
}

/// A span representing an in-flight request.
#[derive(Debug)]
pub struct RequestSpan {
    operation: String,
    target: String,
    start: Instant,
}

impl RequestSpan {
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
