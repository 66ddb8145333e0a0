use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up before the first event).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("resolve_total", "Resolve calls that returned an envelope.");
        describe_counter!(
            "resolve_terminal_total",
            "Resolve calls that fell through to the terminal default."
        );
        describe_counter!(
            "resolve_degraded_total",
            "Resolve calls answered with a repaired value."
        );
        describe_counter!("source_attempts_total", "Source attempts started.");
        describe_counter!("source_retries_total", "Source attempts beyond the first.");
        describe_counter!("source_failures_total", "Failed source attempts.");
        describe_counter!(
            "recovery_stage_total",
            "Recovery stage that produced the accepted object."
        );
        describe_histogram!("source_attempt_ms", "Successful attempt latency in milliseconds.");
    });
}

/// Install the Prometheus recorder and return the render handle.
/// The caller decides how to expose `handle.render()`.
pub fn install_prometheus() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;
    ensure_metrics_described();
    Ok(handle)
}
