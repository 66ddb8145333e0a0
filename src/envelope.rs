// src/envelope.rs
//! Resolved value plus the trust metadata downstream code must inspect.

use serde::Serialize;

/// Immutable result of one `resolve()` call.
///
/// Fields are private so an envelope cannot be edited after the resolver hands
/// it out; use the accessors or `into_value`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceEnvelope<T> {
    value: T,
    source_name: String,
    confidence: f64,
    degraded: bool,
    warnings: Vec<String>,
    terminal: bool,
}

impl<T> ConfidenceEnvelope<T> {
    /// Value produced by a live source. `confidence` is clamped to [0, 1].
    pub fn resolved(
        value: T,
        source_name: impl Into<String>,
        confidence: f64,
        degraded: bool,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            value,
            source_name: source_name.into(),
            confidence: clamp01(confidence),
            degraded,
            warnings,
            terminal: false,
        }
    }

    /// Static default used once every source has failed.
    pub fn terminal(
        value: T,
        source_name: impl Into<String>,
        confidence: f64,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            value,
            source_name: source_name.into(),
            confidence: clamp01(confidence),
            degraded: false,
            warnings,
            terminal: true,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// True when the value came straight from a source without repair or fallback to the default.
    pub fn is_clean(&self) -> bool {
        !self.degraded && !self.terminal
    }

    /// Transform the payload, keeping provenance untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ConfidenceEnvelope<U> {
        ConfidenceEnvelope {
            value: f(self.value),
            source_name: self.source_name,
            confidence: self.confidence,
            degraded: self.degraded,
            warnings: self.warnings,
            terminal: self.terminal,
        }
    }
}

fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}
