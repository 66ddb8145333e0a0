// tests/retry_invoker.rs
use std::time::Duration;

use portfolio_resilience::providers::{ScriptedSource, Step};
use portfolio_resilience::telemetry::{RecordingTelemetry, TelemetryEvent};
use portfolio_resilience::{
    FailureKind, RawResult, RetryPolicy, RetryingInvoker, Source, SourceError, SourceSpec,
};
use tokio::time::Instant;

fn ssi(retries: u32) -> SourceSpec {
    SourceSpec::new("ssi", 1, 0.9).with_retries(retries)
}

#[tokio::test(start_paused = true)]
async fn fails_twice_then_succeeds_within_budget() {
    let op = ScriptedSource::new(vec![
        Step::Err(SourceError::from_status(503, "ssi")),
        Step::Err(SourceError::transient("connection reset by peer")),
        Step::Ok(RawResult::Data(55_500i64)),
    ]);
    let calls = op.call_counter();
    let source = Source::new(ssi(2), op);
    let rec = RecordingTelemetry::new();
    let invoker = RetryingInvoker::new(RetryPolicy::default(), rec.clone());

    let t0 = Instant::now();
    let out = invoker.call(&source, &()).await;
    let elapsed = t0.elapsed();

    assert_eq!(out, Ok(RawResult::Data(55_500)));
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    // base_delay + base_delay * 2
    assert!(elapsed >= Duration::from_secs(4 + 8), "{elapsed:?}");

    let stats = rec.stats();
    assert_eq!(stats.attempts, 3);
    assert_eq!(stats.failures, 2);
    assert_eq!(stats.successes, 1);
    assert!((stats.success_rate - 1.0 / 3.0).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn terminal_error_is_never_retried() {
    let op = ScriptedSource::<i64>::always_err(SourceError::from_status(404, "ssi VCB"));
    let calls = op.call_counter();
    let source = Source::new(ssi(5), op);
    let rec = RecordingTelemetry::new();
    let invoker = RetryingInvoker::new(RetryPolicy::default(), rec.clone());

    let t0 = Instant::now();
    let failure = invoker.call(&source, &()).await.unwrap_err();

    assert_eq!(failure.kind, FailureKind::Terminal);
    assert_eq!(failure.attempts, 1);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(rec.attempts_for("ssi"), 1);
    assert!(t0.elapsed() < Duration::from_millis(1));
    assert!(rec.events().iter().any(|e| matches!(
        e,
        TelemetryEvent::AttemptFailed { will_retry: false, .. }
    )));
}

#[tokio::test(start_paused = true)]
async fn backoff_is_capped() {
    let op = ScriptedSource::<i64>::always_err(SourceError::from_status(429, "ssi"));
    let source = Source::new(ssi(3), op);
    let invoker = RetryingInvoker::default();

    let t0 = Instant::now();
    let failure = invoker.call(&source, &()).await.unwrap_err();

    assert_eq!(failure.kind, FailureKind::RetriesExhausted);
    assert_eq!(failure.attempts, 4);
    assert!(failure.reason.contains("rate limited"));
    // 4 + 8 + 10 (capped), no sleep after the last attempt
    let elapsed = t0.elapsed();
    assert!(elapsed >= Duration::from_secs(22), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(23), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn zero_retries_means_one_attempt() {
    let op = ScriptedSource::<i64>::always_err(SourceError::transient("boom"));
    let calls = op.call_counter();
    let source = Source::new(ssi(0), op);
    let failure = RetryingInvoker::default()
        .call(&source, &())
        .await
        .unwrap_err();
    assert_eq!(failure.attempts, 1);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}
