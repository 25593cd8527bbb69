//! Prometheus metrics registration and export.
//!
//! Defines every metric circuit-weaver records and the functions that
//! initialize, register and export them.

use prometheus::{
    CounterVec, Encoder, Gauge, HistogramVec, IntCounter, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// The registry and every metric family registered in it.
#[derive(Debug)]
pub struct Metrics {
    pub registry: Registry,
    /// Jobs finished, labeled by outcome (done/abandoned).
    pub jobs_total: CounterVec,
    /// Job wall-clock duration in seconds, labeled by outcome.
    pub job_duration: HistogramVec,
    /// Jobs currently owned by an orchestrator.
    pub jobs_in_progress: Gauge,
    /// Attempts, labeled by stage and verdict.
    pub attempts_total: CounterVec,
    /// Debug rounds, labeled by result (winner/all_failed).
    pub race_rounds_total: CounterVec,
    /// Backend calls, labeled by backend name and status.
    pub backend_calls_total: CounterVec,
    /// Corrective records committed by the miner.
    pub mined_records_total: IntCounter,
    /// Store writes that failed after all retries, labeled by store.
    pub store_write_failures: CounterVec,
}

/// Registry and families, set together by the first successful [`init_metrics`].
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// The initialized metrics, or `None` before [`init_metrics`].
pub fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

/// Initialize all metrics and register them with the registry.
///
/// Safe to call more than once; later calls leave the first registry in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if a metric cannot be created or registered.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    // Job metrics
    let jobs_total = CounterVec::new(
        Opts::new("circuit_weaver_jobs_total", "Total number of jobs finished"),
        &["outcome"],
    )?;

    let job_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "circuit_weaver_job_duration_seconds",
            "Job duration in seconds",
        )
        .buckets(vec![10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0]),
        &["outcome"],
    )?;

    let jobs_in_progress = Gauge::new(
        "circuit_weaver_jobs_in_progress",
        "Number of jobs currently being processed",
    )?;

    // Execution metrics
    let attempts_total = CounterVec::new(
        Opts::new("circuit_weaver_attempts_total", "Total sandboxed attempts"),
        &["stage", "verdict"],
    )?;

    let race_rounds_total = CounterVec::new(
        Opts::new("circuit_weaver_race_rounds_total", "Total debug rounds raced"),
        &["result"],
    )?;

    let backend_calls_total = CounterVec::new(
        Opts::new("circuit_weaver_backend_calls_total", "Total generation backend calls"),
        &["backend", "status"],
    )?;

    // Knowledge metrics
    let mined_records_total = IntCounter::new(
        "circuit_weaver_mined_records_total",
        "Corrective records committed by the solution miner",
    )?;

    let store_write_failures = CounterVec::new(
        Opts::new(
            "circuit_weaver_store_write_failures_total",
            "Store writes that failed after retries",
        ),
        &["store"],
    )?;

    registry.register(Box::new(jobs_total.clone()))?;
    registry.register(Box::new(job_duration.clone()))?;
    registry.register(Box::new(jobs_in_progress.clone()))?;
    registry.register(Box::new(attempts_total.clone()))?;
    registry.register(Box::new(race_rounds_total.clone()))?;
    registry.register(Box::new(backend_calls_total.clone()))?;
    registry.register(Box::new(mined_records_total.clone()))?;
    registry.register(Box::new(store_write_failures.clone()))?;

    // A concurrent initializer may have won; its set stays and this one is dropped whole.
    let _ = METRICS.set(Metrics {
        registry,
        jobs_total,
        job_duration,
        jobs_in_progress,
        attempts_total,
        race_rounds_total,
        backend_calls_total,
        mined_records_total,
        store_write_failures,
    });

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead when the registry is not initialized or
/// encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = METRICS.get().map(|m| &m.registry) else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

/// Write the current metrics snapshot to `path`.
pub async fn write_metrics_file(path: &std::path::Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, export_metrics()).await
}
