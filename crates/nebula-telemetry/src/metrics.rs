//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters and gauges the job service reports on.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    progress_events_total: IntCounterVec,
    active_jobs: IntGauge,
    jobs_finished_total: IntCounterVec,
    admission_rejected_total: IntCounterVec,
    store_flushes_total: IntCounter,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Jobs with a live session.
    pub active_jobs: i64,
    /// Durable flushes of the downloads document.
    pub store_flushes_total: u64,
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::collector("build", name, source))
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::collector("register", name, source))
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = counter_vec(
            "http_requests_total",
            "Total HTTP requests received",
            &["route", "code"],
        )?;
        let progress_events_total = counter_vec(
            "progress_events_total",
            "Progress events published by payload type",
            &["type"],
        )?;
        let active_jobs = IntGauge::with_opts(Opts::new("active_jobs", "Jobs with a live session"))
            .map_err(|source| TelemetryError::collector("build", "active_jobs", source))?;
        let jobs_finished_total = counter_vec(
            "jobs_finished_total",
            "Jobs that reached a terminal state by outcome",
            &["outcome"],
        )?;
        let admission_rejected_total = counter_vec(
            "admission_rejected_total",
            "Requests rejected by admission control by layer",
            &["layer"],
        )?;
        let store_flushes_total = IntCounter::with_opts(Opts::new(
            "store_flushes_total",
            "Durable flushes of the downloads document",
        ))
        .map_err(|source| TelemetryError::collector("build", "store_flushes_total", source))?;

        register(&registry, "http_requests_total", &http_requests_total)?;
        register(&registry, "progress_events_total", &progress_events_total)?;
        register(&registry, "active_jobs", &active_jobs)?;
        register(&registry, "jobs_finished_total", &jobs_finished_total)?;
        register(
            &registry,
            "admission_rejected_total",
            &admission_rejected_total,
        )?;
        register(&registry, "store_flushes_total", &store_flushes_total)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                http_requests_total,
                progress_events_total,
                active_jobs,
                jobs_finished_total,
                admission_rejected_total,
                store_flushes_total,
            }),
        })
    }

    /// Increment the HTTP request counter for the given route and status code.
    pub fn inc_http_request(&self, route: &str, status: u16) {
        self.inner
            .http_requests_total
            .with_label_values(&[route, &status.to_string()])
            .inc();
    }

    /// Increment the progress event counter for a payload type.
    pub fn inc_progress_event(&self, kind: &str) {
        self.inner
            .progress_events_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Set the active job gauge.
    pub fn set_active_jobs(&self, count: usize) {
        self.inner
            .active_jobs
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Record a job reaching a terminal state.
    pub fn inc_job_finished(&self, outcome: &str) {
        self.inner
            .jobs_finished_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Record a request rejected by one admission layer.
    pub fn inc_admission_rejected(&self, layer: &str) {
        self.inner
            .admission_rejected_total
            .with_label_values(&[layer])
            .inc();
    }

    /// Record a durable store flush.
    pub fn inc_store_flush(&self) {
        self.inner.store_flushes_total.inc();
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::Render { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::RenderUtf8 { source })
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_jobs: self.inner.active_jobs.get(),
            store_flushes_total: self.inner.store_flushes_total.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_snapshot_reflects_updates() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_http_request("/health", 200);
        metrics.inc_progress_event("progress");
        metrics.set_active_jobs(3);
        metrics.inc_job_finished("completed");
        metrics.inc_admission_rejected("global");
        metrics.inc_store_flush();
        metrics.inc_store_flush();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_jobs, 3);
        assert_eq!(snapshot.store_flushes_total, 2);

        let rendered = metrics.render()?;
        assert!(rendered.contains("http_requests_total"));
        assert!(rendered.contains("jobs_finished_total{outcome=\"completed\"} 1"));
        assert!(rendered.contains("admission_rejected_total{layer=\"global\"} 1"));
        Ok(())
    }

    #[test]
    fn snapshot_serialises_for_health() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let metrics = Metrics::new()?;
        let value = serde_json::to_value(metrics.snapshot())?;
        assert_eq!(value["active_jobs"], 0);
        Ok(())
    }
}
