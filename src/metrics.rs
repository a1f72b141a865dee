//! Prometheus-compatible metrics for the device manager
//!
//! Thread-safe counters for jobs and bytes processed, plus transfer
//! timing. The counters double as the read-only statistics surface:
//! monotonically increasing and safe to read concurrently with writers.
//!
//! Uses the prometheus-client crate; all updates are lock-free atomics.

use prometheus_client::{
    encoding::text::encode,
    metrics::counter::Counter,
    metrics::gauge::Gauge,
    metrics::histogram::{exponential_buckets, Histogram},
    registry::Registry,
};

use crate::error::{AccelError, AccelResult};

/// Metrics collected by one device instance
#[derive(Debug)]
pub struct Metrics {
    /// Registry containing all metrics
    pub registry: Registry,

    /// Jobs accepted by submit
    pub jobs_submitted: Counter<u64>,

    /// Jobs that reached Complete
    pub jobs_completed: Counter<u64>,

    /// Jobs that reached Error
    pub jobs_failed: Counter<u64>,

    /// Jobs forcibly terminated by a wait deadline
    pub jobs_timed_out: Counter<u64>,

    /// Total bytes moved by completed transfers and jobs
    pub bytes_transferred: Counter<u64>,

    /// Synchronous transfers that hit their timeout
    pub transfer_timeouts: Counter<u64>,

    /// Jobs currently between submit and a terminal state
    pub active_jobs: Gauge<i64>,

    /// Wall-clock duration of completed transfers and jobs
    pub transfer_duration_seconds: Histogram,
}

impl Metrics {
    /// Create a metrics collection with every metric registered
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let jobs_submitted = Counter::default();
        registry.register(
            "accelforge_jobs_submitted",
            "Jobs accepted for execution",
            jobs_submitted.clone(),
        );

        let jobs_completed = Counter::default();
        registry.register(
            "accelforge_jobs_completed",
            "Jobs that completed successfully",
            jobs_completed.clone(),
        );

        let jobs_failed = Counter::default();
        registry.register(
            "accelforge_jobs_failed",
            "Jobs that ended with a device error",
            jobs_failed.clone(),
        );

        let jobs_timed_out = Counter::default();
        registry.register(
            "accelforge_jobs_timed_out",
            "Jobs terminated by a wait deadline",
            jobs_timed_out.clone(),
        );

        let bytes_transferred = Counter::default();
        registry.register(
            "accelforge_bytes_transferred",
            "Bytes moved between host and device",
            bytes_transferred.clone(),
        );

        let transfer_timeouts = Counter::default();
        registry.register(
            "accelforge_transfer_timeouts",
            "Synchronous transfers that hit their timeout",
            transfer_timeouts.clone(),
        );

        let active_jobs = Gauge::default();
        registry.register(
            "accelforge_active_jobs",
            "Jobs currently outstanding",
            active_jobs.clone(),
        );

        // Buckets: 100us, 1ms, 10ms, 100ms, 1s, 10s
        let transfer_duration_seconds = Histogram::new(exponential_buckets(0.0001, 10.0, 6));
        registry.register(
            "accelforge_transfer_duration_seconds",
            "Wall-clock duration of transfers and jobs",
            transfer_duration_seconds.clone(),
        );

        Metrics {
            registry,
            jobs_submitted,
            jobs_completed,
            jobs_failed,
            jobs_timed_out,
            bytes_transferred,
            transfer_timeouts,
            active_jobs,
            transfer_duration_seconds,
        }
    }

    /// Encode all metrics in Prometheus text exposition format
    pub fn encode_text(&self) -> AccelResult<String> {
        let mut out = String::new();
        encode(&mut out, &self.registry)
            .map_err(|e| AccelError::Internal(format!("metrics encoding failed: {}", e)))?;
        Ok(out)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
