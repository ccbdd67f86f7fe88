// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Boxed cause carried by a [`Fault`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Classification of a collaborator fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// The target could not be reached (connection refused, reset, DNS).
    Unavailable,
    /// The target did not answer in time.
    Timeout,
    /// The target answered with a server-side error.
    Server,
    /// The request was rejected as malformed or unauthorized.
    Client,
    /// The addressed key or route does not exist.
    NotFound,
    /// The collaborator lacks a requested capability.
    Unsupported,
    /// Anything the collaborator could not classify.
    Other,
}

impl FaultKind {
    /// Returns `true` for faults that are worth retrying.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            FaultKind::Unavailable | FaultKind::Timeout | FaultKind::Server | FaultKind::Other
        )
    }

    /// Classify an HTTP status code.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            404 => FaultKind::NotFound,
            408 | 504 => FaultKind::Timeout,
            501 => FaultKind::Unsupported,
            502 | 503 => FaultKind::Unavailable,
            429 | 500..=599 => FaultKind::Server,
            400..=499 => FaultKind::Client,
            _ => FaultKind::Other,
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultKind::Unavailable => "unavailable",
            FaultKind::Timeout => "timeout",
            FaultKind::Server => "server error",
            FaultKind::Client => "client error",
            FaultKind::NotFound => "not found",
            FaultKind::Unsupported => "unsupported",
            FaultKind::Other => "unknown",
        };
        f.write_str(name)
    }
}

/// A fault reported by a transport or state store.
///
/// Collaborators only ever return this type; the façades wrap it into
/// [`MeshError`] before it reaches a caller.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct Fault {
    kind: FaultKind,
    message: String,
    status: Option<u16>,
    #[source]
    source: Option<BoxError>,
}

impl Fault {
    /// Create a fault of the given kind.
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            source: None,
        }
    }

    /// Shorthand for a [`FaultKind::Unavailable`] fault.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Unavailable, message)
    }

    /// Shorthand for a [`FaultKind::Server`] fault.
    pub fn server(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Server, message)
    }

    /// Shorthand for a [`FaultKind::Client`] fault.
    pub fn client(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Client, message)
    }

    /// Shorthand for a [`FaultKind::NotFound`] fault.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FaultKind::NotFound, message)
    }

    /// Build a fault from an HTTP status and response body.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {body}")
        };
        Self {
            kind: FaultKind::from_status(status),
            message,
            status: Some(status),
            source: None,
        }
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Fault classification.
    #[must_use]
    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    /// Human-readable description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status, when the fault came from an HTTP response.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Whether retrying may help.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Whether the fault signals a missing key or route.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind == FaultKind::NotFound
    }
}

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invocation of {target} failed after {attempts} attempt(s): {summary}")]
    Invocation {
        target: String,
        summary: String,
        attempts: u32,
        #[source]
        source: Fault,
    },

    #[error("Circuit breaker for '{target}' is open, will retry after {retry_after:?}")]
    CircuitOpen {
        target: String,
        retry_after: Duration,
    },

    #[error("Call to {target} was cancelled")]
    Cancelled { target: String },

    #[error("Cache operation on key '{key}' failed: {source}")]
    Cache {
        key: String,
        #[source]
        source: Fault,
    },

    #[error("Unsupported capability: {0}")]
    Unsupported(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MeshError {
    /// Returns `true` if the call was rejected by an open circuit.
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, MeshError::CircuitOpen { .. })
    }

    /// Returns `true` if the call was cancelled by the caller.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MeshError::Cancelled { .. })
    }

    /// The collaborator fault behind this error, if any.
    #[must_use]
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            MeshError::Invocation { source, .. } | MeshError::Cache { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MeshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_kind_from_status() {
        assert_eq!(FaultKind::from_status(404), FaultKind::NotFound);
        assert_eq!(FaultKind::from_status(400), FaultKind::Client);
        assert_eq!(FaultKind::from_status(403), FaultKind::Client);
        assert_eq!(FaultKind::from_status(408), FaultKind::Timeout);
        assert_eq!(FaultKind::from_status(429), FaultKind::Server);
        assert_eq!(FaultKind::from_status(500), FaultKind::Server);
        assert_eq!(FaultKind::from_status(501), FaultKind::Unsupported);
        assert_eq!(FaultKind::from_status(503), FaultKind::Unavailable);
        assert_eq!(FaultKind::from_status(504), FaultKind::Timeout);
    }

    #[test]
    fn test_transient_classification() {
        assert!(FaultKind::Unavailable.is_transient());
        assert!(FaultKind::Timeout.is_transient());
        assert!(FaultKind::Server.is_transient());
        assert!(FaultKind::Other.is_transient());

        assert!(!FaultKind::Client.is_transient());
        assert!(!FaultKind::NotFound.is_transient());
        assert!(!FaultKind::Unsupported.is_transient());
    }

    #[test]
    fn test_fault_from_status_message() {
        let fault = Fault::from_status(503, "sidecar not ready");
        assert_eq!(fault.kind(), FaultKind::Unavailable);
        assert_eq!(fault.status(), Some(503));
        assert_eq!(fault.to_string(), "unavailable: HTTP 503: sidecar not ready");

        let empty = Fault::from_status(500, "");
        assert_eq!(empty.message(), "HTTP 500");
    }

    #[test]
    fn test_fault_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let fault = Fault::unavailable("connect failed").with_source(io);
        let source = std::error::Error::source(&fault).expect("source attached");
        assert_eq!(source.to_string(), "refused");
    }

    #[test]
    fn test_invocation_error_display() {
        let err = MeshError::Invocation {
            target: "bookings/create".to_string(),
            summary: "server error: HTTP 500".to_string(),
            attempts: 4,
            source: Fault::server("HTTP 500"),
        };
        assert_eq!(
            err.to_string(),
            "Invocation of bookings/create failed after 4 attempt(s): server error: HTTP 500"
        );
        assert_eq!(err.fault().map(Fault::kind), Some(FaultKind::Server));
    }

    #[test]
    fn test_error_predicates() {
        let open = MeshError::CircuitOpen {
            target: "payments".to_string(),
            retry_after: Duration::from_secs(30),
        };
        assert!(open.is_circuit_open());
        assert!(!open.is_cancelled());

        let cancelled = MeshError::Cancelled {
            target: "payments/charge".to_string(),
        };
        assert!(cancelled.is_cancelled());
        assert!(cancelled.fault().is_none());
    }
}
