//! Recording helpers over the raw Prometheus metrics.
//!
//! Every method is a no-op until [`super::init_metrics`] has run, so library
//! code can record unconditionally.

use super::prometheus::metrics;

/// Metrics collector for circuit-weaver operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a finished job.
    pub fn record_job(&self, outcome: &str, duration_secs: f64) {
        if let Some(m) = metrics() {
            m.jobs_total.with_label_values(&[outcome]).inc();
            m.job_duration
                .with_label_values(&[outcome])
                .observe(duration_secs);
        }

        tracing::trace!(outcome, duration_secs, "Recorded job metric");
    }

    pub fn job_started(&self) {
        if let Some(m) = metrics() {
            m.jobs_in_progress.inc();
        }
    }

    pub fn job_finished(&self) {
        if let Some(m) = metrics() {
            m.jobs_in_progress.dec();
        }
    }

    /// Record one sandboxed attempt.
    ///
    /// `stage` is `initial`, `repair` or `final`. An initial generation
    /// failure is recorded with verdict `generation_error`.
    pub fn record_attempt(&self, stage: &str, verdict: &str) {
        if let Some(m) = metrics() {
            m.attempts_total.with_label_values(&[stage, verdict]).inc();
        }
    }

    pub fn record_race(&self, result: &str) {
        if let Some(m) = metrics() {
            m.race_rounds_total.with_label_values(&[result]).inc();
        }
    }

    pub fn record_backend_call(&self, backend: &str, success: bool) {
        let status = if success { "success" } else { "failure" };
        if let Some(m) = metrics() {
            m.backend_calls_total.with_label_values(&[backend, status]).inc();
        }
    }

    pub fn record_mined(&self, count: u64) {
        if let Some(m) = metrics() {
            m.mined_records_total.inc_by(count);
        }
    }

    pub fn record_store_write_failure(&self, store: &str) {
        if let Some(m) = metrics() {
            m.store_write_failures.with_label_values(&[store]).inc();
        }
        tracing::trace!(store, "Recorded store write failure");
    }
}
