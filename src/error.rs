// src/error.rs
//! Failure taxonomy shared by sources, the retrying invoker and the resolver.
//!
//! Nothing in here ever crosses `FallbackResolver::resolve`; these values are
//! folded into envelope warnings before the caller sees them.

use std::fmt;
use std::time::Duration;

/// Error returned by a single source attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Network trouble, timeouts, 5xx and 429. Worth another attempt.
    #[error("transient: {0}")]
    Transient(String),
    /// 4xx (other than 429), missing resource, invalid payload. Never retried.
    #[error("terminal: {0}")]
    Terminal(String),
}

impl SourceError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn terminal(msg: impl Into<String>) -> Self {
        Self::Terminal(msg.into())
    }

    pub fn not_found(what: impl fmt::Display) -> Self {
        Self::Terminal(format!("not found: {what}"))
    }

    pub fn timed_out(after: Duration) -> Self {
        Self::Transient(format!("timed out after {} ms", after.as_millis()))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Terminal(m) => m,
        }
    }

    /// Classify a non-success HTTP status.
    /// 5xx and 429 are transient; 404/410 read as "not found"; other codes are terminal.
    pub fn from_status(status: u16, context: &str) -> Self {
        match status {
            429 => Self::transient(format!("{context}: rate limited (HTTP 429)")),
            500..=599 => Self::transient(format!("{context}: server error (HTTP {status})")),
            404 | 410 => Self::not_found(format!("{context} (HTTP {status})")),
            _ => Self::terminal(format!("{context}: HTTP {status}")),
        }
    }

    /// Classify a transport-level `reqwest` error.
    /// The request URL is dropped from the message; it may carry credentials.
    pub fn from_reqwest(err: reqwest::Error, context: &str) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), context);
        }
        let err = err.without_url();
        if err.is_decode() || err.is_builder() {
            return Self::terminal(format!("{context}: {err}"));
        }
        // connect, timeout, request and body errors are all worth retrying
        Self::transient(format!("{context}: {err}"))
    }
}

/// Why a source produced no usable value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Every attempt failed with a transient error.
    RetriesExhausted,
    /// A terminal error stopped the source on the spot.
    Terminal,
    /// The caller cancelled before another attempt could start.
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::RetriesExhausted => "retries exhausted",
            FailureKind::Terminal => "terminal failure",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Final outcome of `RetryingInvoker::call` when no attempt succeeded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{source_name}: {kind} after {attempts} attempt(s): {reason}")]
pub struct Failure {
    pub source_name: String,
    pub kind: FailureKind,
    pub attempts: u32,
    /// Description of the last error seen.
    pub reason: String,
}

impl Failure {
    pub fn new(
        source_name: impl Into<String>,
        kind: FailureKind,
        attempts: u32,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            kind,
            attempts,
            reason: reason.into(),
        }
    }
}
