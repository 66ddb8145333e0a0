// src/telemetry.rs
//! Instrumentation collaborator injected into the invoker, parser and resolver.
//!
//! The caller owns its lifecycle: build one `Arc<dyn Telemetry>` and hand it to
//! whatever needs it. `TracingTelemetry` is the production choice,
//! `RecordingTelemetry` keeps events in memory for tests and quick statistics.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::{counter, histogram};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::SourceError;
use crate::recovery::RecoveryStage;

pub type SharedTelemetry = Arc<dyn Telemetry>;

/// Hooks fired along the resolution path. Every method defaults to a no-op.
pub trait Telemetry: Send + Sync {
    fn attempt_started(&self, _source: &str, _attempt: u32) {}
    fn attempt_succeeded(&self, _source: &str, _attempt: u32, _elapsed: Duration) {}
    fn attempt_failed(&self, _source: &str, _attempt: u32, _error: &SourceError, _will_retry: bool) {}
    /// `text_id` is an anonymised hash of the raw text, never the text itself.
    fn stage_attempted(&self, _text_id: &str, _stage: RecoveryStage, _accepted: bool) {}
    fn source_rejected(&self, _source: &str, _reason: &str) {}
    fn resolved(&self, _source: &str, _confidence: f64, _degraded: bool) {}
    fn chain_exhausted(&self, _failures: usize) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {}

pub fn noop() -> SharedTelemetry {
    Arc::new(NoopTelemetry)
}

/// Emits `tracing` events and `metrics` counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TracingTelemetry {
    pub fn shared() -> SharedTelemetry {
        crate::metrics::ensure_metrics_described();
        Arc::new(Self)
    }
}

impl Telemetry for TracingTelemetry {
    fn attempt_started(&self, source: &str, attempt: u32) {
        counter!("source_attempts_total", "source" => source.to_string()).increment(1);
        if attempt > 1 {
            counter!("source_retries_total", "source" => source.to_string()).increment(1);
        }
        debug!(target: "retry", source, attempt, "attempt started");
    }

    fn attempt_succeeded(&self, source: &str, attempt: u32, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1_000.0;
        histogram!("source_attempt_ms", "source" => source.to_string()).record(ms);
        debug!(target: "retry", source, attempt, elapsed_ms = ms, "attempt succeeded");
    }

    fn attempt_failed(&self, source: &str, attempt: u32, error: &SourceError, will_retry: bool) {
        counter!("source_failures_total", "source" => source.to_string()).increment(1);
        warn!(target: "retry", source, attempt, will_retry, error = %error, "attempt failed");
    }

    fn stage_attempted(&self, text_id: &str, stage: RecoveryStage, accepted: bool) {
        if accepted {
            counter!("recovery_stage_total", "stage" => stage.as_str()).increment(1);
        }
        debug!(target: "recovery", %text_id, stage = stage.as_str(), accepted, "recovery stage");
    }

    fn source_rejected(&self, source: &str, reason: &str) {
        warn!(target: "resolver", source, reason, "source rejected");
    }

    fn resolved(&self, source: &str, confidence: f64, degraded: bool) {
        counter!("resolve_total").increment(1);
        if degraded {
            counter!("resolve_degraded_total").increment(1);
        }
        info!(target: "resolver", source, confidence, degraded, "resolved");
    }

    fn chain_exhausted(&self, failures: usize) {
        counter!("resolve_total").increment(1);
        counter!("resolve_terminal_total").increment(1);
        warn!(target: "resolver", failures, "every source failed, using terminal default");
    }
}

/// One recorded hook invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    AttemptStarted { source: String, attempt: u32 },
    AttemptSucceeded { source: String, attempt: u32 },
    AttemptFailed { source: String, attempt: u32, error: SourceError, will_retry: bool },
    StageAttempted { stage: RecoveryStage, accepted: bool },
    SourceRejected { source: String, reason: String },
    Resolved { source: String, confidence: f64, degraded: bool },
    ChainExhausted { failures: usize },
}

/// Summary over recorded attempts.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CallStats {
    pub attempts: usize,
    pub successes: usize,
    pub failures: usize,
    pub success_rate: f64,
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.lock().clone()
    }

    /// Attempts started for `source`.
    pub fn attempts_for(&self, source: &str) -> usize {
        self.lock()
            .iter()
            .filter(|e| matches!(e, TelemetryEvent::AttemptStarted { source: s, .. } if s == source))
            .count()
    }

    /// Stages that accepted a value, in order.
    pub fn accepted_stages(&self) -> Vec<RecoveryStage> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                TelemetryEvent::StageAttempted { stage, accepted: true } => Some(*stage),
                _ => None,
            })
            .collect()
    }

    pub fn stats(&self) -> CallStats {
        let events = self.lock();
        let mut stats = CallStats::default();
        for e in events.iter() {
            match e {
                TelemetryEvent::AttemptStarted { .. } => stats.attempts += 1,
                TelemetryEvent::AttemptSucceeded { .. } => stats.successes += 1,
                TelemetryEvent::AttemptFailed { .. } => stats.failures += 1,
                _ => {}
            }
        }
        if stats.attempts > 0 {
            stats.success_rate = stats.successes as f64 / stats.attempts as f64;
        }
        stats
    }

    fn push(&self, event: TelemetryEvent) {
        self.lock().push(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TelemetryEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Telemetry for RecordingTelemetry {
    fn attempt_started(&self, source: &str, attempt: u32) {
        self.push(TelemetryEvent::AttemptStarted {
            source: source.to_string(),
            attempt,
        });
    }

    fn attempt_succeeded(&self, source: &str, attempt: u32, _elapsed: Duration) {
        self.push(TelemetryEvent::AttemptSucceeded {
            source: source.to_string(),
            attempt,
        });
    }

    fn attempt_failed(&self, source: &str, attempt: u32, error: &SourceError, will_retry: bool) {
        self.push(TelemetryEvent::AttemptFailed {
            source: source.to_string(),
            attempt,
            error: error.clone(),
            will_retry,
        });
    }

    fn stage_attempted(&self, _text_id: &str, stage: RecoveryStage, accepted: bool) {
        self.push(TelemetryEvent::StageAttempted { stage, accepted });
    }

    fn source_rejected(&self, source: &str, reason: &str) {
        self.push(TelemetryEvent::SourceRejected {
            source: source.to_string(),
            reason: reason.to_string(),
        });
    }

    fn resolved(&self, source: &str, confidence: f64, degraded: bool) {
        self.push(TelemetryEvent::Resolved {
            source: source.to_string(),
            confidence,
            degraded,
        });
    }

    fn chain_exhausted(&self, failures: usize) {
        self.push(TelemetryEvent::ChainExhausted { failures });
    }
}

/// Short anonymised id for a piece of text (first 6 bytes of SHA-256, hex).
pub fn text_id(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Install a compact fmt subscriber filtered by `RUST_LOG`.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("portfolio_resilience=info,warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_id_is_stable_and_short() {
        let a = text_id("{\"overall_score\": 7}");
        assert_eq!(a.len(), 12);
        assert_eq!(a, text_id("{\"overall_score\": 7}"));
        assert_ne!(a, text_id("{\"overall_score\": 8}"));
    }

    #[test]
    fn stats_count_attempts() {
        let rec = RecordingTelemetry::default();
        rec.attempt_started("ssi", 1);
        rec.attempt_failed("ssi", 1, &SourceError::transient("boom"), true);
        rec.attempt_started("ssi", 2);
        rec.attempt_succeeded("ssi", 2, Duration::from_millis(3));
        let s = rec.stats();
        assert_eq!(s.attempts, 2);
        assert_eq!(s.failures, 1);
        assert_eq!(s.successes, 1);
        assert!((s.success_rate - 0.5).abs() < 1e-9);
        assert_eq!(rec.attempts_for("ssi"), 2);
        assert_eq!(rec.attempts_for("cafef"), 0);
    }

    #[test]
    fn init_tracing_twice_is_harmless() {
        init_tracing();
        init_tracing();
    }
}
