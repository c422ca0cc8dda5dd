//! Error taxonomy shared across the accord crates

use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the workspace
pub type AccordResult<T> = Result<T, AccordError>;

/// Errors surfaced by the client core
#[derive(Debug, Error)]
pub enum AccordError {
    // =========================================================================
    // Recoverable transport-level failures
    // =========================================================================
    /// Connection refused, TLS failure, socket read error. Retried by the
    /// owning controller before surfacing.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed JSON, unknown opcode, missing required field. Logged and
    /// dropped at the boundary.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 429 response. Carries the server-requested wait.
    #[error("Rate limited: retry after {retry_after:.3}s")]
    RateLimited { retry_after: f64 },

    // =========================================================================
    // Failures that surface to the caller
    // =========================================================================
    /// 401 on REST or gateway close code 4004. Never retried.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// 403 from REST.
    #[error("Missing permission: {0}")]
    Permission(String),

    /// Any other non-success HTTP status.
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },

    /// Non-resumable gateway close after exhausted retries.
    #[error("Gateway closed: code {code} ({reason})")]
    GatewayClosed { code: u16, reason: String },

    /// Invalid inputs to construction.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation submitted after shutdown.
    #[error("Client is shutting down")]
    Shutdown,
}

impl AccordError {
    /// Whether the owning controller may retry the operation internally
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RateLimited { .. })
            || matches!(self, Self::Http { status, .. } if *status >= 500)
    }

    /// Whether the error terminates the affected client
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Authentication(_) | Self::GatewayClosed { .. })
    }

    /// Server-requested wait before retrying, if any
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(Duration::from_secs_f64(*retry_after)),
            _ => None,
        }
    }
}
