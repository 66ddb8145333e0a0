// src/retry.rs
//! Bounded retries with exponential backoff around one source operation.

use std::time::Duration;

use tokio::time::Instant;

use crate::cancel::CancelSignal;
use crate::error::{Failure, FailureKind, SourceError};
use crate::source::{RawResult, Source};
use crate::telemetry::{self, SharedTelemetry};

/// Backoff schedule: `base_delay * 2^n` before retry `n` (0-based), capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const MULTIPLIER: u32 = 2;

    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// No waiting between attempts.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = Self::MULTIPLIER.saturating_pow(retry);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    /// 4 s base, 10 s cap.
    fn default() -> Self {
        Self::new(Duration::from_secs(4), Duration::from_secs(10))
    }
}

#[derive(Clone)]
pub struct RetryingInvoker {
    policy: RetryPolicy,
    telemetry: SharedTelemetry,
}

impl Default for RetryingInvoker {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), telemetry::noop())
    }
}

impl RetryingInvoker {
    pub fn new(policy: RetryPolicy, telemetry: SharedTelemetry) -> Self {
        Self { policy, telemetry }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Up to `max_retries + 1` attempts. Transient errors are retried after a
    /// backoff; a terminal error ends the call at once. Never panics, never
    /// returns anything but the raw result or a `Failure` value.
    pub async fn call<Req, T>(
        &self,
        source: &Source<Req, T>,
        request: &Req,
    ) -> Result<RawResult<T>, Failure>
    where
        Req: Sync,
        T: Send,
    {
        self.call_with_cancel(source, request, None).await
    }

    /// Sleeps the policy delay; a cancel wakes it early and the next loop
    /// turn reports the cancellation.
    async fn backoff(&self, attempt: u32, cancel: Option<&CancelSignal>) {
        let delay = tokio::time::sleep(self.policy.delay_for(attempt - 1));
        match cancel {
            Some(c) => {
                tokio::select! {
                    _ = delay => {}
                    _ = c.cancelled() => {}
                }
            }
            None => delay.await,
        }
    }

    pub async fn call_with_cancel<Req, T>(
        &self,
        source: &Source<Req, T>,
        request: &Req,
        cancel: Option<&CancelSignal>,
    ) -> Result<RawResult<T>, Failure>
    where
        Req: Sync,
        T: Send,
    {
        let spec = source.spec();
        let name = spec.name.as_str();
        let total = spec.max_retries.saturating_add(1);
        let mut last_err: Option<SourceError> = None;

        for attempt in 1..=total {
            if cancel.is_some_and(CancelSignal::is_cancelled) {
                let reason = last_err
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "cancelled before first attempt".to_string());
                return Err(Failure::new(name, FailureKind::Cancelled, attempt - 1, reason));
            }

            if let Some(gate) = source.gate() {
                gate.acquire().await;
            }

            self.telemetry.attempt_started(name, attempt);
            let started = Instant::now();
            let outcome = match tokio::time::timeout(spec.timeout, source.operation().call(request)).await {
                Ok(res) => res,
                Err(_) => Err(SourceError::timed_out(spec.timeout)),
            };

            match outcome {
                Ok(raw) => {
                    self.telemetry
                        .attempt_succeeded(name, attempt, started.elapsed());
                    return Ok(raw);
                }
                Err(err) => {
                    let will_retry = err.is_retryable() && attempt < total;
                    self.telemetry
                        .attempt_failed(name, attempt, &err, will_retry);

                    if !err.is_retryable() {
                        return Err(Failure::new(
                            name,
                            FailureKind::Terminal,
                            attempt,
                            err.to_string(),
                        ));
                    }
                    if will_retry {
                        self.backoff(attempt, cancel).await;
                    }
                    last_err = Some(err);
                }
            }
        }

        let reason = last_err.map(|e| e.to_string()).unwrap_or_default();
        Err(Failure::new(
            name,
            FailureKind::RetriesExhausted,
            total,
            reason,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::scripted::{FnSource, ScriptedSource, Step};
    use crate::source::SourceSpec;
    use crate::telemetry::RecordingTelemetry;

    fn spec(retries: u32) -> SourceSpec {
        SourceSpec::new("ssi", 1, 0.9)
            .with_retries(retries)
            .with_timeout(Duration::from_secs(5))
    }

    #[test]
    fn delays_double_and_cap() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for(0), Duration::from_secs(4));
        assert_eq!(p.delay_for(1), Duration::from_secs(8));
        assert_eq!(p.delay_for(2), Duration::from_secs(10));
        assert_eq!(p.delay_for(40), Duration::from_secs(10));
        assert_eq!(RetryPolicy::immediate().delay_for(3), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_retries_with_last_error() {
        let src = ScriptedSource::<i32>::new(vec![
            Step::Err(SourceError::transient("503 one")),
            Step::Err(SourceError::transient("503 two")),
        ]);
        let counter = src.call_counter();
        let source = Source::new(spec(1), src);
        let inv = RetryingInvoker::default();
        let err = inv.call(&source, &()).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::RetriesExhausted);
        assert_eq!(err.attempts, 2);
        assert!(err.reason.contains("503 two"));
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_transient() {
        let slow = Step::Delayed(Duration::from_secs(30), Box::new(Step::Ok(RawResult::Data(1))));
        let src = ScriptedSource::new(vec![slow, Step::Ok(RawResult::Data(2))]);
        let source = Source::new(spec(1), src);
        let rec = RecordingTelemetry::new();
        let inv = RetryingInvoker::new(RetryPolicy::default(), rec.clone());
        let out = inv.call(&source, &()).await;
        assert_eq!(out, Ok(RawResult::Data(2)));
        assert_eq!(rec.stats().failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start() {
        let source = Source::new(spec(3), ScriptedSource::always_data(1));
        let cancel = CancelSignal::new();
        cancel.cancel();
        let err = RetryingInvoker::default()
            .call_with_cancel(&source, &(), Some(&cancel))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Cancelled);
        assert_eq!(err.attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_attempt_cuts_the_backoff_short() {
        let cancel = CancelSignal::new();
        let op = FnSource::<_, (), i32>::new({
            let cancel = cancel.clone();
            move |_: ()| {
                let cancel = cancel.clone();
                async move {
                    cancel.cancel();
                    Err::<RawResult<i32>, _>(SourceError::transient("503"))
                }
            }
        });
        let source = Source::new(spec(2), op);
        let t0 = Instant::now();
        let err = RetryingInvoker::default()
            .call_with_cancel(&source, &(), Some(&cancel))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Cancelled);
        assert_eq!(err.attempts, 1);
        assert!(err.reason.contains("503"), "{}", err.reason);
        // default policy would have slept 4 s before the second attempt
        assert!(t0.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_sleeping_wakes_the_backoff() {
        let source = Source::new(
            spec(2),
            ScriptedSource::<i32>::always_err(SourceError::transient("503")),
        );
        let cancel = CancelSignal::new();
        let canceller = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                cancel.cancel();
            }
        });
        let t0 = Instant::now();
        let err = RetryingInvoker::default()
            .call_with_cancel(&source, &(), Some(&cancel))
            .await
            .unwrap_err();
        canceller.await.unwrap();
        assert_eq!(err.kind, FailureKind::Cancelled);
        assert!(t0.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn gate_spaces_attempts() {
        let src = ScriptedSource::new(vec![
            Step::Err(SourceError::transient("503")),
            Step::Ok(RawResult::Data(1)),
        ]);
        let source = Source::new(spec(1).with_min_interval(Duration::from_secs(20)), src);
        let inv = RetryingInvoker::new(RetryPolicy::immediate(), telemetry::noop());
        let t0 = Instant::now();
        assert!(inv.call(&source, &()).await.is_ok());
        assert!(t0.elapsed() >= Duration::from_secs(20));
    }
}
